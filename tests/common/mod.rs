//! Common test utilities for integration tests.

#![allow(dead_code)]

use bevy::math::DVec3;
use nbody_sync::physics::{GravityMethod, Simulation, SimulationConfig};
use nbody_sync::protocol::WorldDefinition;
use nbody_sync::types::Body;

/// Central mass of the natural-unit test worlds.
pub const SUN_MASS: f64 = 1e6;

/// Natural units (G = 1), collisions and SOI off unless a test turns them on.
pub fn natural_config(method: GravityMethod) -> SimulationConfig {
    SimulationConfig {
        gravity_method: method,
        enable_collisions: false,
        enable_soi: false,
        ..SimulationConfig::natural_units()
    }
}

/// Circular orbit of radius `r` around [`SUN_MASS`] in the XZ plane (G = 1).
pub fn circular_orbit(r: f64) -> (DVec3, DVec3) {
    (DVec3::new(r, 0.0, 0.0), DVec3::new(0.0, 0.0, (SUN_MASS / r).sqrt()))
}

/// Kepler period around [`SUN_MASS`] (G = 1).
pub fn orbital_period(a: f64) -> f64 {
    std::f64::consts::TAU * (a.powi(3) / SUN_MASS).sqrt()
}

/// Sun at the origin plus a passive satellite on a circular orbit at `r`.
pub fn sun_and_satellite(config: SimulationConfig, r: f64) -> Simulation {
    let mut sim = Simulation::new(config).unwrap();
    let (pos, vel) = circular_orbit(r);
    sim.add_body(Body::massive("sun", SUN_MASS, 1.0)).unwrap();
    sim.add_body(Body::passive("satellite", 1.0, 0.1).with_position(pos).with_velocity(vel))
        .unwrap();
    sim
}

/// `n` massive bodies in a cube of half-width `extent`, reproducible from `seed`.
pub fn random_cloud(n: usize, extent: f64, seed: u64) -> Vec<Body> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut range = |lo: f64, hi: f64| lo + (hi - lo) * rng.f64();
    (0..n)
        .map(|i| {
            let mass = range(1.0, 10.0);
            let position = DVec3::new(range(-extent, extent), range(-extent, extent), range(-extent, extent));
            Body::massive(format!("b{i}"), mass, 0.01).with_position(position)
        })
        .collect()
}

/// Bootstrap document for the client/server tests: a sun and a player ship
/// in natural units.
pub const SHIP_WORLD: &str = r#"{
    "name": "Proving Ground",
    "description": "A sun and one ship",
    "bodies": [
        {"id": "sun", "type": "massive", "mass": 1e6, "radius": 1, "softening": 0,
         "position": [0, 0, 0], "velocity": [0, 0, 0]},
        {"id": "ship-1", "type": "passive", "mass": 1000, "radius": 0.05, "softening": 0,
         "position": [100, 0, 0], "velocity": [0, 0, 100]}
    ]
}"#;

pub fn ship_world() -> WorldDefinition {
    WorldDefinition::from_json(SHIP_WORLD).unwrap()
}
