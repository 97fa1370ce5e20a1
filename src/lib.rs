//! nbody_sync - N-body gravity with client/server state sync
//!
//! A library crate providing the authoritative gravity simulation, its
//! binary and JSON wire protocol, and client-side prediction.

pub mod collision;
pub mod math;
pub mod physics;
pub mod prediction;
pub mod protocol;
pub mod scenarios;
pub mod time;
pub mod types;

#[cfg(test)]
pub mod test_utils;
