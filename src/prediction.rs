//! Client-side prediction and server reconciliation.
//!
//! The client steps its own [`Simulation`] every local tick with the
//! player's input applied immediately, remembering what it predicted in a
//! fixed ring of [`PredictionRecord`]s. When an authoritative state for a
//! past tick arrives, the prediction for that tick is checked; a miss
//! rewinds to the server's state, replays the newer inputs, and blends the
//! correction in over several frames instead of popping.

use bevy::log::debug;
use bevy::math::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::physics::{BarnesHutTree, GravityMethod, Integrators, Simulation, SimulationError};
use crate::protocol::BodyState;
use crate::types::Body;

// =============================================================================
// Input
// =============================================================================

/// One tick of player input.
///
/// Translation axes are in [-1, 1]; rotation axes are carried for the input
/// collaborator but do not affect translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputState {
    /// Forward (+) / reverse (−) along the body's local −Z.
    pub thrust: f64,
    pub strafe_x: f64,
    pub strafe_y: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    pub boost: bool,
}

impl InputState {
    pub fn forward(amount: f64) -> Self {
        Self {
            thrust: amount,
            ..Default::default()
        }
    }
}

/// World-frame acceleration an input produces on a body with `orientation`.
///
/// Diagonal input is clamped to unit length so it is never faster than a
/// single axis.
pub fn input_acceleration(orientation: DQuat, input: &InputState, config: &PredictionConfig) -> DVec3 {
    let axis = |v: f64| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
    let local = DVec3::new(axis(input.strafe_x), axis(input.strafe_y), -axis(input.thrust)).clamp_length_max(1.0);
    if local == DVec3::ZERO {
        return DVec3::ZERO;
    }

    let boost = if input.boost { config.boost_multiplier } else { 1.0 };
    orientation * local * (config.thrust_acceleration * boost)
}

// =============================================================================
// Configuration
// =============================================================================

/// Prediction tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PredictionConfig {
    /// Ticks of history kept. Default: 60 (one second at 60 Hz).
    pub capacity: usize,
    /// Positional error (m) below which a prediction is accepted. Default: 1.0.
    pub error_threshold: f64,
    /// Fraction of the outstanding correction applied per frame. Default: 0.1.
    pub smoothing_factor: f64,
    /// When false every authoritative state is snapped to directly.
    pub enabled: bool,
    /// Acceleration at full input (m/s²). Default: 10.
    pub thrust_acceleration: f64,
    /// Multiplier while boosting. Default: 3.
    pub boost_multiplier: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            error_threshold: 1.0,
            smoothing_factor: 0.1,
            enabled: true,
            thrust_acceleration: 10.0,
            boost_multiplier: 3.0,
        }
    }
}

impl PredictionConfig {
    /// No prediction: the client mirrors the server.
    pub fn snap_only() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

// =============================================================================
// History
// =============================================================================

/// What the client predicted for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionRecord {
    /// Tick reached by the step this input drove.
    pub tick: u64,
    pub input: InputState,
    /// Orientation the input was applied in.
    pub orientation: DQuat,
    pub position: DVec3,
    pub velocity: DVec3,
}

/// Fixed-capacity history indexed by `tick % capacity`.
///
/// A newer tick silently overwrites whatever shared its slot.
#[derive(Clone, Debug)]
pub struct PredictionBuffer {
    slots: Vec<Option<PredictionRecord>>,
}

impl PredictionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, tick: u64) -> usize {
        (tick % self.slots.len() as u64) as usize
    }

    pub fn push(&mut self, record: PredictionRecord) {
        let slot = self.slot(record.tick);
        self.slots[slot] = Some(record);
    }

    pub fn get(&self, tick: u64) -> Option<&PredictionRecord> {
        self.slots[self.slot(tick)].as_ref().filter(|r| r.tick == tick)
    }

    fn get_mut(&mut self, tick: u64) -> Option<&mut PredictionRecord> {
        let slot = self.slot(tick);
        self.slots[slot].as_mut().filter(|r| r.tick == tick)
    }

    /// Ticks of every record newer than `tick`, oldest first.
    pub fn ticks_after(&self, tick: u64) -> Vec<u64> {
        let mut ticks: Vec<u64> = self.slots.iter().flatten().map(|r| r.tick).filter(|&t| t > tick).collect();
        ticks.sort_unstable();
        ticks
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
    }
}

// =============================================================================
// Predictor
// =============================================================================

/// What [`ClientPredictor::reconcile`] did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reconciliation {
    /// Prediction disabled; the body was set to the server state.
    Snapped,
    /// No record for the server tick; blending toward the server state.
    Smoothed,
    /// The prediction was within the error threshold.
    Accepted { error: f64 },
    /// The prediction missed; newer inputs were replayed from the server state.
    Replayed { error: f64, replayed: usize },
}

/// Predicts and reconciles one locally controlled body.
#[derive(Clone, Debug)]
pub struct ClientPredictor {
    body_id: String,
    config: PredictionConfig,
    history: PredictionBuffer,
    /// Outstanding correction not yet blended in.
    pending_position: DVec3,
    pending_velocity: DVec3,
}

impl ClientPredictor {
    pub fn new(body_id: impl Into<String>, config: PredictionConfig) -> Self {
        Self {
            body_id: body_id.into(),
            history: PredictionBuffer::new(config.capacity),
            config,
            pending_position: DVec3::ZERO,
            pending_velocity: DVec3::ZERO,
        }
    }

    pub fn body_id(&self) -> &str {
        &self.body_id
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn history(&self) -> &PredictionBuffer {
        &self.history
    }

    /// Outstanding `(position, velocity)` correction.
    pub fn pending_correction(&self) -> (DVec3, DVec3) {
        (self.pending_position, self.pending_velocity)
    }

    /// Drop history and any outstanding correction.
    pub fn reset(&mut self) {
        self.history.clear();
        self.pending_position = DVec3::ZERO;
        self.pending_velocity = DVec3::ZERO;
    }

    /// Apply `input` and advance the local simulation one tick.
    ///
    /// Returns the tick reached.
    pub fn predict(&mut self, simulation: &mut Simulation, input: InputState) -> Result<u64, SimulationError> {
        let orientation = simulation
            .body(&self.body_id)
            .map(|b| b.orientation)
            .ok_or_else(|| SimulationError::UnknownBody(self.body_id.clone()))?;

        // Corrections are computed against the current tick, so land them before stepping
        self.apply_smoothing(simulation)?;
        let thrust = input_acceleration(orientation, &input, &self.config);
        simulation.set_thrust(&self.body_id, thrust)?;
        let dt = simulation.config().timestep;
        simulation.step(dt)?;

        let tick = simulation.tick();
        if self.config.enabled {
            let body = self.body(simulation)?;
            // Record where the body will be once the outstanding correction lands
            self.history.push(PredictionRecord {
                tick,
                input,
                orientation,
                position: body.position + self.pending_position,
                velocity: body.velocity + self.pending_velocity,
            });
        }
        Ok(tick)
    }

    /// Check an authoritative state for `server_tick` against the prediction.
    pub fn reconcile(
        &mut self,
        simulation: &mut Simulation,
        authoritative: &BodyState,
        server_tick: u64,
    ) -> Result<Reconciliation, SimulationError> {
        if !self.config.enabled {
            simulation.apply_body_state(
                &self.body_id,
                authoritative.position,
                authoritative.velocity,
                Some(authoritative.orientation_quat()),
                Some(authoritative.angular_velocity as f64),
            )?;
            self.pending_position = DVec3::ZERO;
            self.pending_velocity = DVec3::ZERO;
            return Ok(Reconciliation::Snapped);
        }

        let Some(record) = self.history.get(server_tick).copied() else {
            let body = self.body(simulation)?;
            self.pending_position = authoritative.position - body.position;
            self.pending_velocity = authoritative.velocity - body.velocity;
            debug!(
                "No prediction for tick {server_tick}; smoothing '{}' toward server state",
                self.body_id
            );
            return Ok(Reconciliation::Smoothed);
        };

        let error = record.position.distance(authoritative.position);
        if error < self.config.error_threshold {
            return Ok(Reconciliation::Accepted { error });
        }

        let (position, velocity, replayed) = self.replay(simulation, authoritative, server_tick)?;
        let body = self.body(simulation)?;
        self.pending_position = position - body.position;
        self.pending_velocity = velocity - body.velocity;

        debug!(
            "Reconciled '{}' at tick {server_tick}: error {error:.3} m, replayed {replayed} inputs",
            self.body_id
        );
        Ok(Reconciliation::Replayed { error, replayed })
    }

    /// Re-integrate every input newer than `server_tick` from the server
    /// state, rewriting history with the corrected states.
    ///
    /// Each tick uses the engine's gravity method and the same integrator
    /// the engine would pick for the ghost's position.
    fn replay(
        &mut self,
        simulation: &Simulation,
        authoritative: &BodyState,
        server_tick: u64,
    ) -> Result<(DVec3, DVec3, usize), SimulationError> {
        let config = simulation.config();
        let field = simulation.gravity_field();
        let g = config.gravitational_constant;
        let dt = config.timestep;
        let exclude = field.index_of(&self.body_id);

        let tree = match config.gravity_method {
            GravityMethod::BarnesHut => {
                let mut tree = BarnesHutTree::new(config.theta);
                tree.build(&field)?;
                Some(tree)
            }
            GravityMethod::Direct => None,
        };
        let mut integrators = Integrators::new(config.rk45.clone());

        let mut ghost = self.body(simulation)?.clone();
        ghost.position = authoritative.position;
        ghost.velocity = authoritative.velocity;

        if let Some(record) = self.history.get_mut(server_tick) {
            record.position = ghost.position;
            record.velocity = ghost.velocity;
        }

        let ticks = self.history.ticks_after(server_tick);
        let mut time = simulation.time() - dt * ticks.len() as f64;
        for &tick in &ticks {
            let Some(record) = self.history.get_mut(tick) else {
                continue;
            };
            let thrust = input_acceleration(record.orientation, &record.input, &self.config);
            let close = config.adaptive_close_encounters
                && field.is_close_encounter(ghost.position, exclude, config.close_encounter_multiplier);
            let kind = if close {
                config.close_encounter_integrator
            } else {
                config.default_integrator
            };

            let id = self.body_id.as_str();
            let accel = |pos: DVec3, _vel: DVec3, _t: f64| -> Result<DVec3, SimulationError> {
                let gravity = match &tree {
                    Some(tree) => tree.acceleration_at(&field, id, pos, exclude, g)?,
                    None => field.direct_acceleration(id, pos, exclude, g)?,
                };
                Ok(gravity + thrust)
            };
            integrators.step(kind, &mut ghost, dt, time, accel)?;
            time += dt;

            record.position = ghost.position;
            record.velocity = ghost.velocity;
        }

        Ok((ghost.position, ghost.velocity, ticks.len()))
    }

    /// Blend one frame's share of the outstanding correction into the body.
    pub fn apply_smoothing(&mut self, simulation: &mut Simulation) -> Result<(), SimulationError> {
        if self.pending_position == DVec3::ZERO && self.pending_velocity == DVec3::ZERO {
            return Ok(());
        }

        let f = self.config.smoothing_factor.clamp(0.0, 1.0);
        let mut dp = self.pending_position * f;
        let mut dv = self.pending_velocity * f;
        // Finish off corrections too small to matter
        if (self.pending_position - dp).length_squared() < 1e-12 && (self.pending_velocity - dv).length_squared() < 1e-12 {
            dp = self.pending_position;
            dv = self.pending_velocity;
        }

        let body = self.body(simulation)?;
        let (position, velocity) = (body.position + dp, body.velocity + dv);
        simulation.apply_body_state(&self.body_id, position, velocity, None, None)?;
        self.pending_position -= dp;
        self.pending_velocity -= dv;
        Ok(())
    }

    fn body<'a>(&self, simulation: &'a Simulation) -> Result<&'a Body, SimulationError> {
        simulation
            .body(&self.body_id)
            .ok_or_else(|| SimulationError::UnknownBody(self.body_id.clone()))
    }
}
