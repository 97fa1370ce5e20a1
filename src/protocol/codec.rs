//! Binary tick frames.
//!
//! Layout, all little-endian:
//!
//! ```text
//! header  u32 tick | u32 count
//! record  u32 id-hash
//!         f64 pos.x | f64 pos.y | f64 pos.z
//!         f64 vel.x | f64 vel.y | f64 vel.z
//!         f32 rot.x | f32 rot.y | f32 rot.z | f32 rot.w
//!         f32 angular velocity
//! ```
//!
//! Ids travel as 32-bit hashes resolved through an [`IdHashMap`] both ends
//! build from the world-state bootstrap. Decoding fails closed: a frame
//! whose length disagrees with its count, or that names an unknown hash,
//! is rejected whole.

use std::collections::HashMap;

use bevy::math::DVec3;

use super::BodyState;

/// Bytes in the frame header.
pub const HEADER_SIZE: usize = 8;

/// Bytes per body record.
pub const RECORD_SIZE: usize = 4 + 3 * 8 + 3 * 8 + 4 * 4 + 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    TrailingBytes { expected: usize, actual: usize },

    #[error("unknown body hash {0:#010x}")]
    UnknownHash(u32),

    #[error("body '{0}' is not in the id map")]
    UnknownBodyId(String),

    #[error("id hash collision {hash:#010x} between '{first}' and '{second}'")]
    HashCollision {
        hash: u32,
        first: String,
        second: String,
    },

    #[error("too many bodies for one frame: {0}")]
    TooManyBodies(usize),
}

/// 32-bit string hash: `h = h·31 + c` over UTF-16 code units, wrapping.
pub fn id_hash(id: &str) -> u32 {
    id.encode_utf16()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Exact encoded size of a frame with `count` records.
#[inline]
pub fn frame_len(count: usize) -> usize {
    HEADER_SIZE + RECORD_SIZE * count
}

/// Hash-to-id lookup shared by encoder and decoder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdHashMap {
    by_hash: HashMap<u32, String>,
}

impl IdHashMap {
    /// Build from the canonical id list.
    ///
    /// # Errors
    /// [`CodecError::HashCollision`] if two distinct ids share a hash.
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<Self, CodecError> {
        let mut map = Self::default();
        for id in ids {
            map.insert(id)?;
        }
        Ok(map)
    }

    /// Register an id, returning its hash. Re-inserting the same id is a no-op.
    pub fn insert(&mut self, id: &str) -> Result<u32, CodecError> {
        let hash = id_hash(id);
        match self.by_hash.get(&hash) {
            Some(existing) if existing != id => Err(CodecError::HashCollision {
                hash,
                first: existing.clone(),
                second: id.to_string(),
            }),
            Some(_) => Ok(hash),
            None => {
                self.by_hash.insert(hash, id.to_string());
                Ok(hash)
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let hash = id_hash(id);
        if self.by_hash.get(&hash).is_some_and(|s| s == id) {
            self.by_hash.remove(&hash);
            true
        } else {
            false
        }
    }

    pub fn get(&self, hash: u32) -> Option<&str> {
        self.by_hash.get(&hash).map(String::as_str)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.get(id_hash(id)) == Some(id)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TickFrame {
    /// Low 32 bits of the sender's tick counter.
    pub tick: u32,
    pub states: Vec<BodyState>,
}

/// Encode one tick of body states.
///
/// # Errors
/// [`CodecError::UnknownBodyId`] if a state's id was never registered.
pub fn encode_tick(states: &[BodyState], tick: u32, ids: &IdHashMap) -> Result<Vec<u8>, CodecError> {
    let count = u32::try_from(states.len()).map_err(|_| CodecError::TooManyBodies(states.len()))?;

    let mut buf = Vec::with_capacity(frame_len(states.len()));
    buf.extend_from_slice(&tick.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());

    for state in states {
        if !ids.contains_id(&state.id) {
            return Err(CodecError::UnknownBodyId(state.id.clone()));
        }
        buf.extend_from_slice(&id_hash(&state.id).to_le_bytes());
        for v in [state.position, state.velocity] {
            buf.extend_from_slice(&v.x.to_le_bytes());
            buf.extend_from_slice(&v.y.to_le_bytes());
            buf.extend_from_slice(&v.z.to_le_bytes());
        }
        for c in state.orientation {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&state.angular_velocity.to_le_bytes());
    }

    Ok(buf)
}

/// Decode a frame, stamping every state with `received_at`.
///
/// # Errors
/// - [`CodecError::Truncated`] if the buffer is shorter than its header claims.
/// - [`CodecError::TrailingBytes`] if it is longer.
/// - [`CodecError::UnknownHash`] if any record's hash is not in `ids`.
pub fn decode_tick(bytes: &[u8], ids: &IdHashMap, received_at: f64) -> Result<TickFrame, CodecError> {
    let mut r = Cursor::new(bytes);
    let tick = r.read_u32_le()?;
    let count = r.read_u32_le()? as usize;

    let expected = RECORD_SIZE
        .checked_mul(count)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .unwrap_or(usize::MAX);
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(CodecError::TrailingBytes {
            expected,
            actual: bytes.len(),
        });
    }

    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        let hash = r.read_u32_le()?;
        let id = ids.get(hash).ok_or(CodecError::UnknownHash(hash))?;
        let position = r.read_dvec3()?;
        let velocity = r.read_dvec3()?;
        let orientation = [r.read_f32_le()?, r.read_f32_le()?, r.read_f32_le()?, r.read_f32_le()?];
        let angular_velocity = r.read_f32_le()?;
        states.push(BodyState {
            id: id.to_string(),
            position,
            velocity,
            orientation,
            angular_velocity,
            timestamp: received_at,
        });
    }

    Ok(TickFrame { tick, states })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.offset + N;
        let slice = self.bytes.get(self.offset..end).ok_or(CodecError::Truncated {
            expected: end,
            actual: self.bytes.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_f32_le(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn read_f64_le(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    fn read_dvec3(&mut self) -> Result<DVec3, CodecError> {
        Ok(DVec3::new(self.read_f64_le()?, self.read_f64_le()?, self.read_f64_le()?))
    }
}
