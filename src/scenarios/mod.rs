//! Predefined worlds.
//!
//! Each [`Scenario`] builds a [`WorldDefinition`] the server can load
//! directly or send to clients as the world-state bootstrap:
//! - Sun-Earth two-body test
//! - Earth-Moon system
//! - Inner and full solar system
//! - Seeded asteroid cluster (stress test for the tree)

pub mod presets;

use bevy::log::{info, warn};

use crate::physics::{Simulation, SimulationConfig};
use crate::protocol::{IdHashMap, ProtocolError, WorldDefinition};
use crate::types::TICK_RATE;

pub use presets::SCENARIOS;

/// A named world preset.
#[derive(Clone, Copy, Debug)]
pub struct Scenario {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Simulated seconds per real second.
    pub time_scale: f64,
    /// Build the world; the seed only matters for generated scenarios.
    pub build: fn(u64) -> WorldDefinition,
}

impl Scenario {
    /// Look a scenario up by id.
    pub fn find(id: &str) -> Option<&'static Scenario> {
        let found = SCENARIOS.iter().find(|s| s.id == id);
        if found.is_none() {
            warn!("Unknown scenario ID: {id}");
        }
        found
    }

    /// Tick length that runs this scenario at [`TICK_RATE`] ticks per real second.
    pub fn timestep(&self) -> f64 {
        self.time_scale / TICK_RATE
    }

    /// Replace the simulation's bodies with this scenario and apply its
    /// time scale and matching timestep. Returns the id map for the new world.
    pub fn load(&self, simulation: &mut Simulation, seed: u64) -> Result<IdHashMap, ProtocolError> {
        info!("Loading scenario: {} ({})", self.name, self.id);
        let ids = simulation.load_world(&(self.build)(seed))?;
        simulation.set_config(SimulationConfig {
            timestep: self.timestep(),
            time_scale: self.time_scale,
            ..simulation.config().clone()
        })?;
        Ok(ids)
    }
}
