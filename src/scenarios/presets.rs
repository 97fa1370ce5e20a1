//! Built-in world definitions.
//!
//! Orbits lie in the XZ plane: bodies start on +X moving along +Z, so +Y is
//! the system's north.

use std::f64::consts::TAU;

use crate::protocol::{BodyDefinition, WorldDefinition};
use crate::types::{AU, BodyKind, G};

use super::Scenario;

// Physical data (SI)
pub const SOLAR_MASS: f64 = 1.98892e30;
pub const SOLAR_RADIUS: f64 = 6.96340e8;
pub const EARTH_MASS: f64 = 5.9722e24;
pub const EARTH_RADIUS: f64 = 6.371e6;
pub const LUNAR_MASS: f64 = 7.342e22;
pub const LUNAR_RADIUS: f64 = 1.7374e6;
pub const LUNAR_ORBIT: f64 = 3.844e8;
pub const JUPITER_MASS: f64 = 1.8982e27;
pub const JUPITER_RADIUS: f64 = 6.9911e7;

/// All built-in scenarios.
pub static SCENARIOS: &[Scenario] = &[TWO_BODY, EARTH_MOON, INNER_SOLAR_SYSTEM, SOLAR_SYSTEM, ASTEROID_CLUSTER];

pub static TWO_BODY: Scenario = Scenario {
    id: "two_body",
    name: "Two Body Test",
    description: "Sun and Earth on a circular orbit",
    time_scale: 86_400.0,
    build: |_| two_body(),
};

pub static EARTH_MOON: Scenario = Scenario {
    id: "earth_moon",
    name: "Earth-Moon System",
    description: "Earth and its Moon",
    time_scale: 3_600.0,
    build: |_| earth_moon(),
};

pub static INNER_SOLAR_SYSTEM: Scenario = Scenario {
    id: "inner_solar_system",
    name: "Inner Solar System",
    description: "Sun, the rocky planets and the Moon",
    time_scale: 86_400.0,
    build: |_| inner_solar_system(),
};

pub static SOLAR_SYSTEM: Scenario = Scenario {
    id: "solar_system",
    name: "Solar System",
    description: "Our solar system with all 8 planets",
    time_scale: 7.0 * 86_400.0,
    build: |_| solar_system(),
};

pub static ASTEROID_CLUSTER: Scenario = Scenario {
    id: "asteroid_cluster",
    name: "Asteroid Cluster",
    description: "Sun, Jupiter and a seeded belt of massive asteroids",
    time_scale: 7.0 * 86_400.0,
    build: |seed| asteroid_cluster(500, seed),
};

// =============================================================================
// Builders
// =============================================================================

/// Speed of a circular orbit of radius `r` around `central_mass`.
pub fn circular_velocity(central_mass: f64, r: f64) -> f64 {
    (G * central_mass / r).sqrt()
}

fn planet_softening(radius: f64) -> f64 {
    (radius * 0.001).max(1000.0)
}

fn sun() -> BodyDefinition {
    BodyDefinition::new("sun", BodyKind::Massive, SOLAR_MASS, SOLAR_RADIUS)
        .with_name("Sun")
        .with_softening(SOLAR_RADIUS * 0.01)
}

/// A massive body on a circular orbit of radius `a` about a primary at rest
/// at the origin.
fn planet(id: &str, name: &str, mass: f64, radius: f64, a: f64) -> BodyDefinition {
    BodyDefinition::new(id, BodyKind::Massive, mass, radius)
        .with_name(name)
        .with_softening(planet_softening(radius))
        .with_position([a, 0.0, 0.0])
        .with_velocity([0.0, 0.0, circular_velocity(SOLAR_MASS, a)])
}

/// The Moon, orbiting a body defined by `earth`.
fn moon_of(earth: &BodyDefinition) -> BodyDefinition {
    let [x, y, z] = earth.position;
    let [vx, vy, vz] = earth.velocity;
    BodyDefinition::new("moon", BodyKind::Massive, LUNAR_MASS, LUNAR_RADIUS)
        .with_name("Moon")
        .with_softening(500.0)
        .with_position([x + LUNAR_ORBIT, y, z])
        .with_velocity([vx, vy, vz + circular_velocity(EARTH_MASS, LUNAR_ORBIT)])
}

pub fn two_body() -> WorldDefinition {
    WorldDefinition::new("Two Body Test", "Simple Sun-Earth system for testing")
        .with_body(sun())
        .with_body(planet("earth", "Earth", EARTH_MASS, EARTH_RADIUS, AU))
}

pub fn earth_moon() -> WorldDefinition {
    let earth = BodyDefinition::new("earth", BodyKind::Massive, EARTH_MASS, EARTH_RADIUS)
        .with_name("Earth")
        .with_softening(planet_softening(EARTH_RADIUS));
    let moon = moon_of(&earth);
    WorldDefinition::new("Earth-Moon System", "Earth and its Moon")
        .with_body(earth)
        .with_body(moon)
}

pub fn inner_solar_system() -> WorldDefinition {
    let earth = planet("earth", "Earth", EARTH_MASS, EARTH_RADIUS, AU);
    let moon = moon_of(&earth);
    WorldDefinition::new("Inner Solar System", "Sun, Mercury, Venus, Earth, Moon and Mars")
        .with_body(sun())
        .with_body(planet("mercury", "Mercury", 3.3011e23, 2.4397e6, 5.791e10))
        .with_body(planet("venus", "Venus", 4.8675e24, 6.0518e6, 1.0821e11))
        .with_body(earth)
        .with_body(moon)
        .with_body(planet("mars", "Mars", 6.4171e23, 3.3895e6, 2.279e11))
}

pub fn solar_system() -> WorldDefinition {
    let planets = [
        ("mercury", "Mercury", 3.3011e23, 2.4397e6, 5.791e10),
        ("venus", "Venus", 4.8675e24, 6.0518e6, 1.0821e11),
        ("earth", "Earth", EARTH_MASS, EARTH_RADIUS, AU),
        ("mars", "Mars", 6.4171e23, 3.3895e6, 2.279e11),
        ("jupiter", "Jupiter", JUPITER_MASS, JUPITER_RADIUS, 7.785e11),
        ("saturn", "Saturn", 5.6834e26, 5.8232e7, 1.4335e12),
        ("uranus", "Uranus", 8.6810e25, 2.5362e7, 2.8725e12),
        ("neptune", "Neptune", 1.02413e26, 2.4622e7, 4.4951e12),
    ];
    planets.into_iter().fold(
        WorldDefinition::new("Solar System", "Our solar system with all 8 planets").with_body(sun()),
        |world, (id, name, mass, radius, a)| world.with_body(planet(id, name, mass, radius, a)),
    )
}

/// Sun, Jupiter and `n` massive asteroids on near-circular orbits between
/// 2.1 and 3.3 AU, placed by a generator seeded with `seed`.
pub fn asteroid_cluster(n: usize, seed: u64) -> WorldDefinition {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut world = WorldDefinition::new("Asteroid Cluster", "Seeded main-belt analogue")
        .with_body(sun())
        .with_body(planet("jupiter", "Jupiter", JUPITER_MASS, JUPITER_RADIUS, 7.785e11));
    world.seed = seed;

    for i in 0..n {
        let a = AU * (2.1 + 1.2 * rng.f64());
        let theta = TAU * rng.f64();
        // Up to ~1° of inclination
        let lift = a * 0.02 * (rng.f64() - 0.5);
        let v = circular_velocity(SOLAR_MASS, a);
        let radius = 1e3 + 9e4 * rng.f64();
        // Rocky density ~2000 kg/m³
        let mass = 2000.0 * 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);

        world.bodies.push(
            BodyDefinition::new(format!("asteroid-{i}"), BodyKind::Massive, mass, radius)
                .with_softening(radius)
                .with_position([a * theta.cos(), lift, a * theta.sin()])
                .with_velocity([-v * theta.sin(), 0.0, v * theta.cos()]),
        );
    }
    world
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_presets_are_valid_worlds() {
        for scenario in SCENARIOS {
            let world = (scenario.build)(1);
            world.validate().unwrap();
            world.id_map().unwrap_or_else(|e| panic!("{}: {e}", scenario.id));
            let bodies = world.to_bodies().unwrap();
            assert!(bodies.len() >= 2, "{} should have at least two bodies", scenario.id);
        }
    }

    #[test]
    fn test_earth_orbits_in_xz_plane() {
        let world = two_body();
        let earth = &world.bodies[1];
        assert_eq!(earth.position, [AU, 0.0, 0.0]);
        assert_eq!(earth.velocity[0], 0.0);
        assert_eq!(earth.velocity[1], 0.0);
        // Earth's mean orbital speed
        assert_relative_eq!(earth.velocity[2], 29_780.0, max_relative = 0.01);
    }

    #[test]
    fn test_moon_rides_with_earth() {
        let world = inner_solar_system();
        let earth = world.bodies.iter().find(|b| b.id == "earth").unwrap();
        let moon = world.bodies.iter().find(|b| b.id == "moon").unwrap();
        assert_relative_eq!(moon.position[0] - earth.position[0], LUNAR_ORBIT);
        assert_relative_eq!(moon.velocity[2] - earth.velocity[2], 1_018.0, max_relative = 0.01);
    }

    #[test]
    fn test_cluster_is_reproducible() {
        let a = asteroid_cluster(50, 42);
        let b = asteroid_cluster(50, 42);
        let c = asteroid_cluster(50, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.bodies.len(), 52);
        assert_eq!(a.seed, 42);
    }
}
