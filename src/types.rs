//! Core body types and physical constants.

use bevy::math::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::physics::SimulationError;

/// Physical constants (SI units)

/// Gravitational constant (m³·kg⁻¹·s⁻²)
pub const G: f64 = 6.67430e-11;

/// Softening length applied to bodies loaded without one (meters)
pub const DEFAULT_SOFTENING: f64 = 1000.0;

/// Authoritative physics tick rate (Hz)
pub const TICK_RATE: f64 = 60.0;

/// Fixed physics timestep (seconds)
pub const DEFAULT_TIMESTEP: f64 = 1.0 / TICK_RATE;

/// Separations below this are treated as a gravitational singularity (meters)
pub const SINGULARITY_DISTANCE: f64 = 1e-10;

/// Astronomical unit in meters
pub const AU: f64 = 1.495978707e11;

/// Seconds per day
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Whether a body takes part in the gravity field or only responds to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    /// Exerts and receives gravity.
    Massive,
    /// Receives gravity only (ships, debris, satellites).
    Passive,
}

/// A simulated body.
///
/// Position and velocity are in meters and m/s from the world origin.
/// `thrust` is an externally applied acceleration added on top of gravity.
#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub id: String,
    pub kind: BodyKind,
    /// Mass in kilograms.
    pub mass: f64,
    /// Physical radius in meters (used for collisions and encounter detection).
    pub radius: f64,
    /// Gravitational softening length in meters.
    pub softening: f64,
    pub position: DVec3,
    pub velocity: DVec3,
    pub orientation: DQuat,
    /// Spin rate about the local +Y axis (rad/s).
    pub angular_velocity: f64,
    /// Applied acceleration in m/s², zero unless an input drives the body.
    pub thrust: DVec3,
    /// Explicit sphere-of-influence radius; `None` derives the Hill radius.
    pub soi_radius: Option<f64>,
}

impl Body {
    fn new(id: impl Into<String>, kind: BodyKind, mass: f64, radius: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            mass,
            radius,
            softening: 0.0,
            position: DVec3::ZERO,
            velocity: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            angular_velocity: 0.0,
            thrust: DVec3::ZERO,
            soi_radius: None,
        }
    }

    /// Create a massive body at rest at the origin.
    pub fn massive(id: impl Into<String>, mass: f64, radius: f64) -> Self {
        Self::new(id, BodyKind::Massive, mass, radius)
    }

    /// Create a passive body at rest at the origin.
    pub fn passive(id: impl Into<String>, mass: f64, radius: f64) -> Self {
        Self::new(id, BodyKind::Passive, mass, radius)
    }

    pub fn with_position(mut self, position: DVec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_softening(mut self, softening: f64) -> Self {
        self.softening = softening;
        self
    }

    pub fn with_orientation(mut self, orientation: DQuat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_spin(mut self, angular_velocity: f64) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_soi_radius(mut self, radius: f64) -> Self {
        self.soi_radius = Some(radius);
        self
    }

    #[inline]
    pub fn is_massive(&self) -> bool {
        self.kind == BodyKind::Massive
    }

    /// Kinetic energy ½mv² in joules.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.length_squared()
    }

    /// Linear momentum in kg·m/s.
    pub fn momentum(&self) -> DVec3 {
        self.velocity * self.mass
    }

    /// Check the physical invariants of a body before it enters a simulation.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: &str| SimulationError::InvalidBody {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.is_empty() {
            return Err(invalid("empty id"));
        }
        if !self.mass.is_finite() || self.mass < 0.0 {
            return Err(invalid("mass must be finite and non-negative"));
        }
        if self.is_massive() && self.mass <= 0.0 {
            return Err(invalid("massive bodies need positive mass"));
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(invalid("radius must be positive"));
        }
        if !self.softening.is_finite() || self.softening < 0.0 {
            return Err(invalid("softening must be non-negative"));
        }
        if !self.position.is_finite() || !self.velocity.is_finite() {
            return Err(invalid("state must be finite"));
        }
        if !self.orientation.is_finite() || !self.angular_velocity.is_finite() {
            return Err(invalid("orientation must be finite"));
        }
        if self.soi_radius.is_some_and(|soi| soi.is_nan() || soi <= 0.0) {
            return Err(invalid("SOI radius must be positive"));
        }
        Ok(())
    }

    /// Owned copy of the fields a renderer needs.
    pub fn snapshot(&self) -> BodySnapshot {
        BodySnapshot {
            id: self.id.clone(),
            kind: self.kind,
            position: self.position,
            velocity: self.velocity,
            radius: self.radius,
            orientation: self.orientation,
        }
    }
}

/// Render-facing copy of a body's state.
#[derive(Clone, Debug, PartialEq)]
pub struct BodySnapshot {
    pub id: String,
    pub kind: BodyKind,
    pub position: DVec3,
    pub velocity: DVec3,
    pub radius: f64,
    pub orientation: DQuat,
}

/// Diagnostic summary of a simulation at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub time: f64,
    pub tick: u64,
    pub body_count: usize,
    pub massive_bodies: usize,
    pub passive_bodies: usize,
    pub kinetic_energy: f64,
    pub potential_energy: f64,
    pub total_energy: f64,
}

/// Energy breakdown in joules.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnergyReport {
    pub kinetic: f64,
    pub potential: f64,
}

impl EnergyReport {
    #[inline]
    pub fn total(&self) -> f64 {
        self.kinetic + self.potential
    }
}
