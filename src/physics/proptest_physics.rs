//! Property-based tests for the simulation core using proptest.
//!
//! These tests verify physical invariants and solver agreement across a wide
//! range of generated worlds.

use bevy::math::{DQuat, DVec3};
use proptest::prelude::*;

use super::{BarnesHutTree, GravityField, GravityMethod, Simulation, SimulationConfig};
use crate::collision::resolve_collisions;
use crate::math::integrate_spin;
use crate::prediction::{PredictionBuffer, PredictionRecord};
use crate::test_utils::{assertions, fixtures};
use crate::types::Body;

fn vec3(range: std::ops::Range<f64>) -> impl Strategy<Value = DVec3> {
    (range.clone(), range.clone(), range).prop_map(|(x, y, z)| DVec3::new(x, y, z))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// With theta = 0 the tree opens every node and must agree with direct
    /// summation for any cloud.
    #[test]
    fn prop_zero_theta_tree_matches_direct(n in 2usize..40, seed in any::<u64>()) {
        let bodies = fixtures::random_cloud(n, 50.0, seed);
        let field = GravityField::from_bodies(&bodies);
        let mut tree = BarnesHutTree::new(0.0);
        tree.build(&field).unwrap();

        for (i, body) in bodies.iter().enumerate() {
            let exact = field.direct_acceleration(&body.id, body.position, Some(i), 1.0).unwrap();
            let approx = tree.acceleration_at(&field, &body.id, body.position, Some(i), 1.0).unwrap();
            prop_assert!(
                (exact - approx).length() <= 1e-9 * exact.length() + 1e-10,
                "body {} differs: direct={} tree={}", body.id, exact, approx
            );
        }
    }

    /// Velocity Verlet keeps the energy of a circular two-body orbit bounded
    /// over a full period.
    #[test]
    fn prop_verlet_energy_bounded_one_orbit(radius in 50.0f64..400.0) {
        let mut sim = Simulation::new(SimulationConfig {
            gravity_method: GravityMethod::Direct,
            enable_collisions: false,
            enable_soi: false,
            ..SimulationConfig::natural_units()
        })
        .unwrap();
        let (pos, vel) = fixtures::circular_orbit(fixtures::SUN_MASS, radius, 1.0);
        sim.add_body(Body::massive("sun", fixtures::SUN_MASS, 1.0)).unwrap();
        sim.add_body(Body::passive("satellite", 1.0, 0.1).with_position(pos).with_velocity(vel)).unwrap();

        let period = assertions::orbital_period(fixtures::SUN_MASS, radius, 1.0);
        let steps = 500;
        let dt = period / steps as f64;
        let satellite_energy = |sim: &Simulation| {
            let b = sim.body("satellite").unwrap();
            0.5 * b.velocity.length_squared() - fixtures::SUN_MASS / b.position.length()
        };

        let initial = satellite_energy(&sim);
        for _ in 0..steps {
            sim.step(dt).unwrap();
        }
        let drift = assertions::relative_drift(initial, satellite_energy(&sim));
        prop_assert!(drift < 1e-3, "energy drift {:.3e} at r={}", drift, radius);
    }

    /// Perfectly elastic collisions conserve momentum and kinetic energy.
    #[test]
    fn prop_elastic_collision_conserves(
        ma in 0.1f64..100.0,
        mb in 0.1f64..100.0,
        offset in vec3(-1.0..1.0),
        va in vec3(-10.0..10.0),
        vb in vec3(-10.0..10.0),
    ) {
        prop_assume!(offset.length() > 1e-3);
        let mut bodies = vec![
            Body::massive("a", ma, 1.0).with_velocity(va),
            Body::massive("b", mb, 1.0).with_position(offset).with_velocity(vb),
        ];
        let p0 = bodies[0].momentum() + bodies[1].momentum();
        let k0 = bodies[0].kinetic_energy() + bodies[1].kinetic_energy();

        let events = resolve_collisions(&mut bodies, 1.0, 0.0);

        let p1 = bodies[0].momentum() + bodies[1].momentum();
        let k1 = bodies[0].kinetic_energy() + bodies[1].kinetic_energy();
        prop_assert!((p1 - p0).length() <= 1e-9 * (1.0 + p0.length()), "momentum {} -> {}", p0, p1);
        prop_assert!((k1 - k0).abs() <= 1e-9 * (1.0 + k0), "energy {} -> {}", k0, k1);
        prop_assert!(events.len() <= 1);
    }

    /// Perfectly inelastic collisions remove the normal closing speed.
    #[test]
    fn prop_inelastic_collision_stops_normal_motion(
        ma in 0.1f64..100.0,
        mb in 0.1f64..100.0,
        offset in vec3(-1.0..1.0),
        va in vec3(-10.0..10.0),
        vb in vec3(-10.0..10.0),
    ) {
        prop_assume!(offset.length() > 1e-3);
        let mut bodies = vec![
            Body::massive("a", ma, 1.0).with_velocity(va),
            Body::massive("b", mb, 1.0).with_position(offset).with_velocity(vb),
        ];
        let events = resolve_collisions(&mut bodies, 0.0, 0.0);
        if let Some(event) = events.first() {
            let normal_speed = (bodies[1].velocity - bodies[0].velocity).dot(event.normal);
            prop_assert!(normal_speed.abs() < 1e-9, "residual normal speed {}", normal_speed);
        }
    }

    /// Spin integration keeps orientations on the unit sphere.
    #[test]
    fn prop_spin_stays_normalized(w in -50.0f64..50.0, dt in 1e-4f64..1.0, steps in 1usize..200) {
        let mut q = DQuat::from_rotation_x(0.3);
        for _ in 0..steps {
            q = integrate_spin(q, w, dt);
        }
        prop_assert!((q.length() - 1.0).abs() < 1e-12);
    }

    /// The ring only ever answers with the newest record for its slot.
    #[test]
    fn prop_ring_keeps_latest_window(capacity in 1usize..80, count in 1u64..300) {
        let mut buffer = PredictionBuffer::new(capacity);
        for tick in 1..=count {
            buffer.push(PredictionRecord {
                tick,
                input: Default::default(),
                orientation: DQuat::IDENTITY,
                position: DVec3::splat(tick as f64),
                velocity: DVec3::ZERO,
            });
        }
        let oldest_kept = count.saturating_sub(capacity as u64) + 1;
        for tick in 1..=count {
            prop_assert_eq!(buffer.get(tick).is_some(), tick >= oldest_kept);
        }
        prop_assert_eq!(buffer.len() as u64, count.min(capacity as u64));
    }
}
