//! Client/server wire protocol.
//!
//! Per-tick body state travels as compact little-endian binary frames
//! ([`codec`]); everything else (joins, chat, body add/remove, config and
//! clock control) is JSON ([`messages`]). New clients bootstrap from a JSON
//! [`WorldDefinition`].

pub mod codec;
pub mod messages;
pub mod world;

use bevy::math::{DQuat, DVec3};

pub use codec::{
    CodecError, HEADER_SIZE, IdHashMap, RECORD_SIZE, TickFrame, decode_tick, encode_tick, frame_len,
    id_hash,
};
pub use messages::{ControlMessage, MessageLevel, MessagePayload};
pub use world::{BodyDefinition, WorldDefinition};

use crate::math::{pack_orientation, unpack_orientation};
use crate::physics::SimulationError;
use crate::types::Body;

/// Errors from parsing or applying protocol data.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("simulation rejected message: {0}")]
    Simulation(#[from] SimulationError),

    #[error("invalid world definition: {0}")]
    InvalidWorld(String),
}

/// One body's kinematic state as carried on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyState {
    pub id: String,
    pub position: DVec3,
    pub velocity: DVec3,
    /// `[x, y, z, w]`
    pub orientation: [f32; 4],
    /// Spin rate about the local +Y axis (rad/s).
    pub angular_velocity: f32,
    /// Receive (or capture) time in seconds; not transmitted.
    pub timestamp: f64,
}

impl BodyState {
    pub fn from_body(body: &Body, timestamp: f64) -> Self {
        Self {
            id: body.id.clone(),
            position: body.position,
            velocity: body.velocity,
            orientation: pack_orientation(body.orientation),
            angular_velocity: body.angular_velocity as f32,
            timestamp,
        }
    }

    #[inline]
    pub fn orientation_quat(&self) -> DQuat {
        unpack_orientation(self.orientation)
    }
}
