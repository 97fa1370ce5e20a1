//! Test utilities for gravity simulation tests.
//!
//! Provides fixtures for small worlds in natural units (G = 1) and
//! assertions for conserved quantities.

use bevy::math::DVec3;

use crate::physics::{Simulation, SimulationConfig};
use crate::types::Body;

/// Fixtures for creating test worlds.
pub mod fixtures {
    use super::*;

    /// Mass of the fixture sun.
    pub const SUN_MASS: f64 = 1e6;
    /// Orbit radius of the fixture planet.
    pub const PLANET_ORBIT: f64 = 100.0;

    /// Empty simulation with G = 1.
    pub fn natural_sim() -> Simulation {
        Simulation::new(SimulationConfig::natural_units()).unwrap()
    }

    /// Position and velocity of a circular orbit of radius `r` around a mass
    /// at rest at the origin, in the XZ plane.
    pub fn circular_orbit(central_mass: f64, r: f64, g: f64) -> (DVec3, DVec3) {
        let v = (g * central_mass / r).sqrt();
        (DVec3::new(r, 0.0, 0.0), DVec3::new(0.0, 0.0, v))
    }

    /// A sun of mass 1e6 and radius 1 at the origin with a unit-mass
    /// "planet" on a circular orbit at r = 100 (speed 100, period 2π s).
    pub fn two_body_sim() -> Simulation {
        let mut sim = natural_sim();
        let (pos, vel) = circular_orbit(SUN_MASS, PLANET_ORBIT, 1.0);
        sim.add_body(Body::massive("sun", SUN_MASS, 1.0)).unwrap();
        sim.add_body(Body::massive("planet", 1.0, 0.1).with_position(pos).with_velocity(vel))
            .unwrap();
        sim
    }

    /// `n` massive bodies with masses in [1, 10) scattered through a cube of
    /// half-width `extent`, reproducible from `seed`.
    pub fn random_cloud(n: usize, extent: f64, seed: u64) -> Vec<Body> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut range = |lo: f64, hi: f64| lo + (hi - lo) * rng.f64();
        (0..n)
            .map(|i| {
                let mass = range(1.0, 10.0);
                let position = DVec3::new(
                    range(-extent, extent),
                    range(-extent, extent),
                    range(-extent, extent),
                );
                Body::massive(format!("b{i}"), mass, 0.01).with_position(position)
            })
            .collect()
    }
}

/// Assertions for verifying physical invariants.
pub mod assertions {
    use super::*;

    /// Kepler's third law: T = 2π·sqrt(a³ / (G·M)).
    pub fn orbital_period(central_mass: f64, semi_major_axis: f64, g: f64) -> f64 {
        std::f64::consts::TAU * (semi_major_axis.powi(3) / (g * central_mass)).sqrt()
    }

    /// |final − initial| / |initial|, or the absolute change when initial is ~0.
    pub fn relative_drift(initial: f64, final_value: f64) -> f64 {
        if initial.abs() > 1e-10 {
            ((final_value - initial) / initial).abs()
        } else {
            (final_value - initial).abs()
        }
    }

    /// Assert that energy is conserved within tolerance.
    ///
    /// # Panics
    /// Panics if relative energy drift exceeds tolerance.
    pub fn assert_energy_conserved(initial_energy: f64, final_energy: f64, tolerance: f64) {
        let drift = relative_drift(initial_energy, final_energy);
        assert!(
            drift <= tolerance,
            "Energy not conserved: initial={initial_energy:.6e}, final={final_energy:.6e}, drift={drift:.6e}, tolerance={tolerance:.6e}"
        );
    }

    /// Assert that a vector quantity (momentum, angular momentum) is
    /// unchanged within `tolerance` of its initial magnitude.
    ///
    /// # Panics
    /// Panics if the change exceeds tolerance.
    pub fn assert_vector_conserved(name: &str, initial: DVec3, final_value: DVec3, tolerance: f64) {
        let scale = initial.length().max(1e-10);
        let drift = (final_value - initial).length() / scale;
        assert!(
            drift <= tolerance,
            "{name} not conserved: initial={initial}, final={final_value}, drift={drift:.6e}, tolerance={tolerance:.6e}"
        );
    }
}

/// Utilities for creating headless Bevy apps for testing.
pub mod bevy_test {
    use bevy::prelude::*;

    /// Create a minimal Bevy app for testing without rendering.
    ///
    /// This app uses MinimalPlugins for a lightweight test environment.
    pub fn headless_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_body_fixture_is_circular() {
        let sim = fixtures::two_body_sim();
        let planet = sim.body("planet").unwrap();
        let g_m = fixtures::SUN_MASS;
        assert_relative_eq!(planet.velocity.length(), (g_m / planet.position.length()).sqrt());
    }

    #[test]
    fn test_fixture_period_is_two_pi() {
        let period = assertions::orbital_period(fixtures::SUN_MASS, fixtures::PLANET_ORBIT, 1.0);
        assert_relative_eq!(period, std::f64::consts::TAU, epsilon = 1e-12);
    }

    #[test]
    fn test_random_cloud_is_seeded() {
        let a = fixtures::random_cloud(10, 5.0, 3);
        let b = fixtures::random_cloud(10, 5.0, 3);
        assert_eq!(a, b);
        assert!(a.iter().all(|body| body.position.abs().max_element() <= 5.0));
    }

    #[test]
    fn test_relative_drift_handles_zero() {
        assert_eq!(assertions::relative_drift(0.0, 1e-3), 1e-3);
        assert_relative_eq!(assertions::relative_drift(-2.0, -2.2), 0.1, epsilon = 1e-12);
    }
}
