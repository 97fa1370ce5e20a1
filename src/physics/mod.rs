//! N-body gravity simulation.
//!
//! This module owns the authoritative physics: a start-of-tick gravity
//! field, the Barnes-Hut tree or direct solver that samples it, the
//! integrator set, sphere-of-influence tracking and the [`Simulation`]
//! engine tying them together. [`SimulationPlugin`] drives an engine from
//! Bevy's clock for headless servers and tests.

mod barnes_hut;
mod engine;
mod gravity;
mod integrator;
mod soi;

#[cfg(test)]
mod proptest_physics;

use bevy::prelude::*;

pub use barnes_hut::{BarnesHutTree, DEFAULT_THETA, MAX_TREE_DEPTH, OctreeNode, TreeStats};
pub use engine::{EncounterState, GravityMethod, Simulation, SimulationConfig, SimulationEvent};
pub use gravity::GravityField;
pub use integrator::{
    IntegratorKind, Integrators, Rk45Config, Rk45Report, rk4_step, rk45_step, velocity_verlet_step,
};
pub use soi::{SoiTracker, SoiTransition, dominant_body, hill_radius, soi_radii};

/// Errors raised by the simulation core.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("gravitational singularity between '{body}' and '{other}'")]
    Singularity { body: String, other: String },

    #[error("body '{0}' already exists")]
    DuplicateBody(String),

    #[error("unknown body '{0}'")]
    UnknownBody(String),

    #[error("invalid body '{id}': {reason}")]
    InvalidBody { id: String, reason: String },

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),
}

/// System set containing the per-frame simulation advance.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimulationSet;

/// Plugin running a [`Simulation`] resource from Bevy's frame clock.
///
/// Each `Update` feeds the real frame delta into the engine's fixed-timestep
/// accumulator. Step failures are logged and the tick is skipped; the engine
/// rolls the failed tick back so the world stays consistent.
#[derive(Default)]
pub struct SimulationPlugin {
    pub config: SimulationConfig,
}

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        let simulation = Simulation::new(self.config.clone()).unwrap_or_else(|err| {
            error!("{err}; falling back to default simulation config");
            Simulation::default()
        });
        app.insert_resource(simulation)
            .add_systems(Update, advance_simulation.in_set(SimulationSet));
    }
}

/// Advance the simulation by the real time elapsed since the last frame.
fn advance_simulation(mut simulation: ResMut<Simulation>, time: Res<Time>) {
    if let Err(err) = simulation.update(time.delta_secs_f64()) {
        error!("Simulation tick failed: {err}");
    }
}
