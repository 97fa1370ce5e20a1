//! nbody-server - headless authoritative simulation server
//!
//! Runs a scenario at the fixed tick rate, encodes each tick as a binary
//! frame for the transport layer, and logs diagnostics once per real second.
//!
//! Usage: `nbody-server [scenario-id] [seed]`

use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;

use nbody_sync::physics::{Simulation, SimulationPlugin, SimulationSet};
use nbody_sync::protocol::{IdHashMap, encode_tick};
use nbody_sync::scenarios::Scenario;
use nbody_sync::types::{SECONDS_PER_DAY, TICK_RATE};

const DEFAULT_SCENARIO: &str = "inner_solar_system";

/// Server bookkeeping around the simulation resource.
#[derive(Resource)]
struct ServerWorld {
    scenario: String,
    seed: u64,
    ids: IdHashMap,
    initial_energy: f64,
    last_report: f64,
}

/// Most recent encoded tick, ready for the transport to broadcast.
#[derive(Resource, Default)]
struct LatestFrame {
    tick: u64,
    bytes: Vec<u8>,
}

fn main() {
    let mut args = std::env::args().skip(1);
    let scenario = args.next().unwrap_or_else(|| DEFAULT_SCENARIO.to_string());
    let seed = args.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    App::new()
        .add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(1.0 / TICK_RATE))),
        )
        .add_plugins(LogPlugin::default())
        .add_plugins(SimulationPlugin::default())
        .insert_resource(ServerWorld {
            scenario,
            seed,
            ids: IdHashMap::default(),
            initial_energy: 0.0,
            last_report: 0.0,
        })
        .init_resource::<LatestFrame>()
        .add_systems(Startup, load_scenario)
        .add_systems(Update, (encode_frame, report_diagnostics).after(SimulationSet))
        .run();
}

fn load_scenario(mut simulation: ResMut<Simulation>, mut server: ResMut<ServerWorld>) {
    let scenario = Scenario::find(&server.scenario)
        .or_else(|| Scenario::find(DEFAULT_SCENARIO))
        .copied();
    let Some(scenario) = scenario else {
        error!("No scenario available to load");
        return;
    };

    match scenario.load(&mut simulation, server.seed) {
        Ok(ids) => {
            server.ids = ids;
            server.initial_energy = simulation.energy().total();
            info!(
                "Serving '{}' with {} bodies at {} Hz (time scale {}x)",
                scenario.name,
                simulation.body_count(),
                TICK_RATE,
                scenario.time_scale
            );
        }
        Err(err) => error!("Failed to load scenario '{}': {err}", scenario.id),
    }
}

fn encode_frame(simulation: Res<Simulation>, server: Res<ServerWorld>, mut frame: ResMut<LatestFrame>) {
    if simulation.tick() == frame.tick {
        return;
    }
    let states = simulation.body_states(simulation.time());
    match encode_tick(&states, simulation.tick() as u32, &server.ids) {
        Ok(bytes) => {
            frame.tick = simulation.tick();
            frame.bytes = bytes;
        }
        Err(err) => warn!("Dropping tick {} frame: {err}", simulation.tick()),
    }
}

fn report_diagnostics(
    simulation: Res<Simulation>,
    frame: Res<LatestFrame>,
    time: Res<Time>,
    mut server: ResMut<ServerWorld>,
) {
    let now = time.elapsed_secs_f64();
    if now - server.last_report < 1.0 {
        return;
    }
    server.last_report = now;

    let state = simulation.state();
    let stats = simulation.tree_stats();
    let drift = if server.initial_energy != 0.0 {
        ((state.total_energy - server.initial_energy) / server.initial_energy).abs()
    } else {
        0.0
    };
    info!(
        "day {:.2} | tick {} | {} bodies | tree {} nodes, depth {} | dE/E {:.2e} | frame {} B",
        state.time / SECONDS_PER_DAY,
        state.tick,
        state.body_count,
        stats.node_count,
        stats.max_depth,
        drift,
        frame.bytes.len()
    );
}
