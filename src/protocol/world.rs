//! World bootstrap definitions.
//!
//! A [`WorldDefinition`] is the JSON document a server sends a joining
//! client (and the format scenario presets are written in). Its body order
//! is the canonical id list both sides build their [`IdHashMap`] from.

use std::collections::HashSet;

use bevy::log::info;
use bevy::math::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use super::{CodecError, IdHashMap, ProtocolError, TickFrame};
use crate::math::vec_from_array;
use crate::physics::Simulation;
use crate::types::{Body, BodyKind, DEFAULT_SOFTENING};

fn default_softening() -> f64 {
    DEFAULT_SOFTENING
}

/// One body as written in a world document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDefinition {
    pub id: String,
    /// Display name; the id is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: BodyKind,
    pub mass: f64,
    pub radius: f64,
    /// Default: 1000 m.
    #[serde(default = "default_softening")]
    pub softening: f64,
    pub position: [f64; 3],
    #[serde(default)]
    pub velocity: [f64; 3],
    /// `[x, y, z, w]`; identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<[f64; 4]>,
    #[serde(default)]
    pub angular_velocity: f64,
    /// Absent means derive the Hill radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soi_radius: Option<f64>,
}

impl BodyDefinition {
    pub fn new(id: impl Into<String>, kind: BodyKind, mass: f64, radius: f64) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            mass,
            radius,
            softening: DEFAULT_SOFTENING,
            position: [0.0; 3],
            velocity: [0.0; 3],
            orientation: None,
            angular_velocity: 0.0,
            soi_radius: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: [f64; 3]) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_softening(mut self, softening: f64) -> Self {
        self.softening = softening;
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

    /// Build and validate the simulated body.
    pub fn to_body(&self) -> Result<Body, ProtocolError> {
        let orientation = match self.orientation {
            Some(q) => {
                let q = DQuat::from_array(q);
                if q.is_finite() && q.length_squared() > 0.0 {
                    q.normalize()
                } else {
                    DQuat::IDENTITY
                }
            }
            None => DQuat::IDENTITY,
        };

        let mut body = match self.kind {
            BodyKind::Massive => Body::massive(self.id.clone(), self.mass, self.radius),
            BodyKind::Passive => Body::passive(self.id.clone(), self.mass, self.radius),
        }
        .with_position(vec_from_array(self.position))
        .with_velocity(vec_from_array(self.velocity))
        .with_softening(self.softening)
        .with_orientation(orientation)
        .with_spin(self.angular_velocity);
        // Infinite SOI is the same as "never leaves", which None already means
        // for the heaviest body
        if let Some(r) = self.soi_radius.filter(|r| r.is_finite()) {
            body = body.with_soi_radius(r);
        }

        body.validate()?;
        Ok(body)
    }

    pub fn from_body(body: &Body) -> Self {
        let array = |v: DVec3| v.to_array();
        Self {
            id: body.id.clone(),
            name: None,
            kind: body.kind,
            mass: body.mass,
            radius: body.radius,
            softening: body.softening,
            position: array(body.position),
            velocity: array(body.velocity),
            orientation: (body.orientation != DQuat::IDENTITY).then(|| body.orientation.to_array()),
            angular_velocity: body.angular_velocity,
            soi_radius: body.soi_radius.filter(|r| r.is_finite()),
        }
    }
}

/// A complete world: the bootstrap document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Generator seed for procedurally built worlds; 0 otherwise.
    #[serde(default)]
    pub seed: u64,
    pub bodies: Vec<BodyDefinition>,
}

impl WorldDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: BodyDefinition) -> Self {
        self.bodies.push(body);
        self
    }

    /// Parse and check for duplicate ids.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let world: Self = serde_json::from_str(text)?;
        world.validate()?;
        Ok(world)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        let mut seen = HashSet::with_capacity(self.bodies.len());
        for body in &self.bodies {
            if body.id.is_empty() {
                return Err(ProtocolError::InvalidWorld("body with empty id".to_string()));
            }
            if !seen.insert(body.id.as_str()) {
                return Err(ProtocolError::InvalidWorld(format!("duplicate body id '{}'", body.id)));
            }
        }
        Ok(())
    }

    pub fn to_bodies(&self) -> Result<Vec<Body>, ProtocolError> {
        self.bodies.iter().map(BodyDefinition::to_body).collect()
    }

    /// Hash map over the canonical id list.
    pub fn id_map(&self) -> Result<IdHashMap, CodecError> {
        IdHashMap::new(self.bodies.iter().map(|b| b.id.as_str()))
    }
}

// =============================================================================
// Simulation bootstrap
// =============================================================================

impl Simulation {
    /// Replace every body with the world's, returning its id map.
    ///
    /// Nothing changes unless the whole world validates.
    pub fn load_world(&mut self, world: &WorldDefinition) -> Result<IdHashMap, ProtocolError> {
        world.validate()?;
        let ids = world.id_map()?;
        let bodies = world.to_bodies()?;
        self.load_bodies(bodies)?;
        info!("Loaded world '{}' ({} bodies)", world.name, world.bodies.len());
        Ok(ids)
    }

    /// Describe the current bodies as a world document.
    pub fn export_world(&self, name: impl Into<String>, description: impl Into<String>) -> WorldDefinition {
        WorldDefinition {
            name: name.into(),
            description: description.into(),
            seed: 0,
            bodies: self.bodies().iter().map(BodyDefinition::from_body).collect(),
        }
    }

    /// Snap bodies to a decoded frame, leaving `skip` (the locally
    /// predicted body) alone. Returns how many bodies were updated.
    pub fn apply_snapshot(&mut self, frame: &TickFrame, skip: Option<&str>) -> usize {
        self.apply_states(&frame.states, skip)
    }
}
