//! The simulation engine.
//!
//! A [`Simulation`] is a plain owned value: the server keeps one as the
//! authority and a client keeps another for prediction. Each tick captures
//! the massive bodies into a [`GravityField`], optionally builds the
//! Barnes-Hut tree over it, and integrates every body against that frozen
//! snapshot before resolving collisions and sphere-of-influence changes.

use std::collections::HashMap;

use bevy::log::{debug, info};
use bevy::math::{DQuat, DVec3};
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use super::SimulationError;
use super::barnes_hut::{BarnesHutTree, DEFAULT_THETA, TreeStats};
use super::gravity::GravityField;
use super::integrator::{IntegratorKind, Integrators, Rk45Config};
use super::soi::{SoiTracker, SoiTransition};
use crate::collision::{CollisionEvent, resolve_collisions};
use crate::math::integrate_spin;
use crate::protocol::BodyState;
use crate::time::FixedTimestep;
use crate::types::{
    Body, BodyKind, BodySnapshot, DEFAULT_TIMESTEP, EnergyReport, G, SimulationState,
};

// =============================================================================
// Configuration
// =============================================================================

/// How gravitational accelerations are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GravityMethod {
    /// Octree approximation, O(N log N).
    #[default]
    BarnesHut,
    /// Exact pairwise summation, O(N²).
    Direct,
}

/// Tunables for a [`Simulation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Fixed tick length in seconds. Default: 1/60.
    pub timestep: f64,
    pub gravity_method: GravityMethod,
    /// Barnes-Hut opening angle. Default: 0.5.
    pub theta: f64,
    /// Gravitational constant. Default: 6.67430e-11 (SI).
    pub gravitational_constant: f64,
    /// Integrator for bodies far from every massive body. Default: Velocity Verlet.
    pub default_integrator: IntegratorKind,
    /// Integrator during close encounters. Default: RK45.
    pub close_encounter_integrator: IntegratorKind,
    /// A body is in close encounter within this many radii of a massive body. Default: 5.
    pub close_encounter_multiplier: f64,
    /// Switch integrators on close encounters. Default: true.
    pub adaptive_close_encounters: bool,
    pub rk45: Rk45Config,
    /// Simulated seconds per real second. Default: 1.
    pub time_scale: f64,
    /// Most ticks per `update` call. Default: 1000.
    pub max_substeps: usize,
    /// Backlog kept after an `update` call, in ticks. Default: 10.
    pub max_backlog_steps: usize,
    pub enable_collisions: bool,
    /// Coefficient of restitution in [0, 1]. Default: 0.5.
    pub elasticity: f64,
    pub enable_soi: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: DEFAULT_TIMESTEP,
            gravity_method: GravityMethod::BarnesHut,
            theta: DEFAULT_THETA,
            gravitational_constant: G,
            default_integrator: IntegratorKind::VelocityVerlet,
            close_encounter_integrator: IntegratorKind::Rk45,
            close_encounter_multiplier: 5.0,
            adaptive_close_encounters: true,
            rk45: Rk45Config::default(),
            time_scale: 1.0,
            max_substeps: 1000,
            max_backlog_steps: 10,
            enable_collisions: true,
            elasticity: 0.5,
            enable_soi: true,
        }
    }
}

impl SimulationConfig {
    /// G = 1, for scale-free test worlds and toy scenarios.
    pub fn natural_units() -> Self {
        Self {
            gravitational_constant: 1.0,
            ..Default::default()
        }
    }

    /// Exact direct summation instead of the tree.
    pub fn exact() -> Self {
        Self {
            gravity_method: GravityMethod::Direct,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let fail = |msg: String| -> Result<(), SimulationError> { Err(SimulationError::InvalidConfig(msg)) };
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return fail(format!("timestep must be positive, got {}", self.timestep));
        }
        if !self.theta.is_finite() || self.theta < 0.0 {
            return fail(format!("theta must be non-negative, got {}", self.theta));
        }
        if !self.gravitational_constant.is_finite() || self.gravitational_constant < 0.0 {
            return fail(format!(
                "gravitational constant must be non-negative, got {}",
                self.gravitational_constant
            ));
        }
        if !(0.0..=1.0).contains(&self.elasticity) {
            return fail(format!("elasticity must be in [0, 1], got {}", self.elasticity));
        }
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return fail(format!("time scale must be non-negative, got {}", self.time_scale));
        }
        if !self.close_encounter_multiplier.is_finite() || self.close_encounter_multiplier < 0.0 {
            return fail("close encounter multiplier must be non-negative".to_string());
        }
        let rk = &self.rk45;
        if !(rk.tolerance > 0.0 && rk.min_dt > 0.0 && rk.max_dt >= rk.min_dt && rk.safety > 0.0) {
            return fail("RK45 needs positive tolerance, safety and 0 < min_dt <= max_dt".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// State & events
// =============================================================================

/// Per-body integration regime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncounterState {
    #[default]
    Stable,
    CloseEncounter,
}

/// Something notable that happened during a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum SimulationEvent {
    Collision(CollisionEvent),
    SoiTransition(SoiTransition),
}

/// Authoritative N-body simulation.
#[derive(Resource, Clone, Debug)]
pub struct Simulation {
    config: SimulationConfig,
    bodies: Vec<Body>,
    index: HashMap<String, usize>,
    encounters: Vec<EncounterState>,
    integrators: Integrators,
    field: GravityField,
    /// Field index of each body, `None` for passive bodies.
    field_slots: Vec<Option<usize>>,
    tree: BarnesHutTree,
    soi: SoiTracker,
    clock: FixedTimestep,
    events: Vec<SimulationEvent>,
    rollback: Vec<(DVec3, DVec3, DQuat)>,
    time: f64,
    tick: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::build(SimulationConfig::default())
    }
}

impl Simulation {
    /// Create an empty simulation.
    ///
    /// # Errors
    /// [`SimulationError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimulationConfig) -> Self {
        let mut clock = FixedTimestep::new(config.timestep);
        clock.time_scale = config.time_scale;
        clock.max_substeps = config.max_substeps;
        clock.max_backlog_steps = config.max_backlog_steps;

        Self {
            integrators: Integrators::new(config.rk45.clone()),
            tree: BarnesHutTree::new(config.theta),
            config,
            bodies: Vec::new(),
            index: HashMap::new(),
            encounters: Vec::new(),
            field: GravityField::new(),
            field_slots: Vec::new(),
            soi: SoiTracker::new(),
            clock,
            events: Vec::new(),
            rollback: Vec::new(),
            time: 0.0,
            tick: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replace the configuration. Cached integrator state is discarded.
    pub fn set_config(&mut self, config: SimulationConfig) -> Result<(), SimulationError> {
        config.validate()?;
        self.tree.set_theta(config.theta)?;
        self.clock.dt = config.timestep;
        self.clock.time_scale = config.time_scale;
        self.clock.max_substeps = config.max_substeps;
        self.clock.max_backlog_steps = config.max_backlog_steps;
        self.integrators.rk45 = config.rk45.clone();
        self.integrators.clear_cache();
        self.config = config;
        Ok(())
    }

    pub fn set_theta(&mut self, theta: f64) -> Result<(), SimulationError> {
        self.tree.set_theta(theta)?;
        self.config.theta = theta;
        Ok(())
    }

    pub fn set_gravity_method(&mut self, method: GravityMethod) {
        self.config.gravity_method = method;
    }

    pub fn set_time_scale(&mut self, scale: f64) -> Result<(), SimulationError> {
        if !scale.is_finite() || scale < 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "time scale must be non-negative, got {scale}"
            )));
        }
        self.config.time_scale = scale;
        self.clock.time_scale = scale;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.clock.paused = true;
    }

    pub fn resume(&mut self) {
        self.clock.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.clock.paused
    }

    // -------------------------------------------------------------------------
    // Bodies
    // -------------------------------------------------------------------------

    /// Add a body.
    ///
    /// # Errors
    /// - [`SimulationError::InvalidBody`] if the body fails validation.
    /// - [`SimulationError::DuplicateBody`] if the id is taken.
    pub fn add_body(&mut self, body: Body) -> Result<(), SimulationError> {
        body.validate()?;
        if self.index.contains_key(&body.id) {
            return Err(SimulationError::DuplicateBody(body.id));
        }

        debug!("Added {:?} body '{}' (mass {:.3e} kg)", body.kind, body.id, body.mass);
        self.index.insert(body.id.clone(), self.bodies.len());
        self.bodies.push(body);
        self.encounters.push(EncounterState::Stable);
        // Every cached acceleration now misses the new body's pull
        self.integrators.clear_cache();
        Ok(())
    }

    /// Remove a body, returning it.
    ///
    /// # Errors
    /// [`SimulationError::UnknownBody`] if no body has this id.
    pub fn remove_body(&mut self, id: &str) -> Result<Body, SimulationError> {
        let slot = self
            .index
            .remove(id)
            .ok_or_else(|| SimulationError::UnknownBody(id.to_string()))?;

        let body = self.bodies.remove(slot);
        self.encounters.remove(slot);
        for (i, b) in self.bodies.iter().enumerate().skip(slot) {
            self.index.insert(b.id.clone(), i);
        }
        self.soi.remove(id);
        self.integrators.clear_cache();

        info!("Removed body '{}'", id);
        Ok(body)
    }

    /// Replace every body at once, resetting time and tick.
    ///
    /// All bodies are validated before anything changes.
    pub fn load_bodies(&mut self, bodies: Vec<Body>) -> Result<(), SimulationError> {
        let mut seen = HashMap::with_capacity(bodies.len());
        for body in &bodies {
            body.validate()?;
            if seen.insert(body.id.as_str(), ()).is_some() {
                return Err(SimulationError::DuplicateBody(body.id.clone()));
            }
        }

        self.clear();
        self.index = bodies.iter().enumerate().map(|(i, b)| (b.id.clone(), i)).collect();
        self.encounters = vec![EncounterState::Stable; bodies.len()];
        self.bodies = bodies;
        info!("Loaded {} bodies", self.bodies.len());
        Ok(())
    }

    /// Remove every body and reset the clock.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.index.clear();
        self.encounters.clear();
        self.integrators.clear_cache();
        self.soi.clear();
        self.events.clear();
        self.clock.reset();
        self.time = 0.0;
        self.tick = 0;
    }

    pub fn body(&self, id: &str) -> Option<&Body> {
        self.index.get(id).map(|&i| &self.bodies[i])
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn slot(&self, id: &str) -> Result<usize, SimulationError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| SimulationError::UnknownBody(id.to_string()))
    }

    /// Set the externally applied acceleration on a body (m/s²).
    pub fn set_thrust(&mut self, id: &str, thrust: DVec3) -> Result<(), SimulationError> {
        let slot = self.slot(id)?;
        if !thrust.is_finite() {
            return Err(SimulationError::InvalidBody {
                id: id.to_string(),
                reason: "non-finite thrust".to_string(),
            });
        }
        if self.bodies[slot].thrust != thrust {
            self.bodies[slot].thrust = thrust;
            self.integrators.invalidate(id);
        }
        Ok(())
    }

    /// Overwrite a body's kinematic state, e.g. from an authoritative snapshot.
    pub fn apply_body_state(
        &mut self,
        id: &str,
        position: DVec3,
        velocity: DVec3,
        orientation: Option<DQuat>,
        angular_velocity: Option<f64>,
    ) -> Result<(), SimulationError> {
        let slot = self.slot(id)?;
        if !position.is_finite() || !velocity.is_finite() {
            return Err(SimulationError::InvalidBody {
                id: id.to_string(),
                reason: "non-finite state".to_string(),
            });
        }
        let body = &mut self.bodies[slot];
        body.position = position;
        body.velocity = velocity;
        if let Some(q) = orientation {
            body.orientation = q;
        }
        if let Some(w) = angular_velocity {
            body.angular_velocity = w;
        }
        self.integrators.invalidate(id);
        Ok(())
    }

    /// Apply decoded wire states to every matching body except `skip`.
    ///
    /// Unknown ids are ignored. Returns how many bodies were updated.
    pub fn apply_states(&mut self, states: &[BodyState], skip: Option<&str>) -> usize {
        let mut applied = 0;
        for state in states {
            if skip == Some(state.id.as_str()) {
                continue;
            }
            let result = self.apply_body_state(
                &state.id,
                state.position,
                state.velocity,
                Some(state.orientation_quat()),
                Some(state.angular_velocity as f64),
            );
            match result {
                Ok(()) => applied += 1,
                Err(err) => debug!("Skipping snapshot state: {err}"),
            }
        }
        applied
    }

    /// Wire states for every body, stamped with `timestamp`.
    pub fn body_states(&self, timestamp: f64) -> Vec<BodyState> {
        self.bodies
            .iter()
            .map(|b| BodyState::from_body(b, timestamp))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// Simulated seconds elapsed.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Align the tick counter with a remote authority.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Align the simulated clock with a remote authority.
    pub fn set_time(&mut self, time: f64) {
        if time.is_finite() {
            self.time = time;
        }
    }

    /// Accumulate `real_delta` seconds of wall time and run the ticks it covers.
    ///
    /// Returns the number of ticks run.
    pub fn update(&mut self, real_delta: f64) -> Result<usize, SimulationError> {
        let steps = self.clock.advance(real_delta);
        let dt = self.config.timestep;
        for _ in 0..steps {
            self.step(dt)?;
        }
        Ok(steps)
    }

    /// Advance exactly one tick of `dt` seconds.
    ///
    /// A tick is atomic: if any acceleration query fails, every body is
    /// restored to its start-of-tick state and time does not advance.
    pub fn step(&mut self, dt: f64) -> Result<(), SimulationError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "step length must be positive, got {dt}"
            )));
        }

        self.capture_field()?;

        self.rollback.clear();
        self.rollback
            .extend(self.bodies.iter().map(|b| (b.position, b.velocity, b.orientation)));

        if let Err(err) = self.integrate_all(dt) {
            for (body, &(position, velocity, orientation)) in self.bodies.iter_mut().zip(&self.rollback) {
                body.position = position;
                body.velocity = velocity;
                body.orientation = orientation;
            }
            self.integrators.clear_cache();
            return Err(err);
        }

        let now = self.time + dt;

        if self.config.enable_collisions {
            for event in resolve_collisions(&mut self.bodies, self.config.elasticity, now) {
                if event.impulse > 0.0 {
                    self.integrators.invalidate(&event.body_a);
                    self.integrators.invalidate(&event.body_b);
                }
                self.events.push(SimulationEvent::Collision(event));
            }
        }

        if self.config.enable_soi && self.bodies.iter().any(|b| !b.is_massive()) {
            self.field.capture(&self.bodies);
            let transitions = self.soi.update(&self.bodies, &self.field, now);
            self.events
                .extend(transitions.into_iter().map(SimulationEvent::SoiTransition));
        }

        self.time = now;
        self.tick += 1;
        Ok(())
    }

    /// Snapshot the massive bodies and, for Barnes-Hut, rebuild the tree.
    fn capture_field(&mut self) -> Result<(), SimulationError> {
        self.field.capture(&self.bodies);

        self.field_slots.clear();
        let mut next = 0;
        for body in &self.bodies {
            if body.is_massive() {
                self.field_slots.push(Some(next));
                next += 1;
            } else {
                self.field_slots.push(None);
            }
        }

        if self.config.gravity_method == GravityMethod::BarnesHut {
            self.tree.build(&self.field)?;
        }
        Ok(())
    }

    fn integrate_all(&mut self, dt: f64) -> Result<(), SimulationError> {
        let Self {
            config,
            bodies,
            encounters,
            integrators,
            field,
            field_slots,
            tree,
            time,
            ..
        } = self;
        let method = config.gravity_method;
        let g = config.gravitational_constant;

        // Massive bodies first, then passive ones
        for pass in [BodyKind::Massive, BodyKind::Passive] {
            for (i, body) in bodies.iter_mut().enumerate() {
                if body.kind != pass {
                    continue;
                }
                let exclude = field_slots[i];

                let kind = if config.adaptive_close_encounters {
                    let close = field.is_close_encounter(body.position, exclude, config.close_encounter_multiplier);
                    let state = if close {
                        EncounterState::CloseEncounter
                    } else {
                        EncounterState::Stable
                    };
                    if state != encounters[i] {
                        debug!("'{}' integrator regime {:?} -> {:?}", body.id, encounters[i], state);
                        encounters[i] = state;
                        integrators.invalidate(&body.id);
                    }
                    if close {
                        config.close_encounter_integrator
                    } else {
                        config.default_integrator
                    }
                } else {
                    config.default_integrator
                };

                let id = body.id.clone();
                let thrust = body.thrust;
                let accel = |position: DVec3, _velocity: DVec3, _t: f64| -> Result<DVec3, SimulationError> {
                    let gravity = match method {
                        GravityMethod::BarnesHut => tree.acceleration_at(field, &id, position, exclude, g)?,
                        GravityMethod::Direct => field.direct_acceleration(&id, position, exclude, g)?,
                    };
                    Ok(gravity + thrust)
                };

                integrators.step(kind, body, dt, *time, accel)?;
                body.orientation = integrate_spin(body.orientation, body.angular_velocity, dt);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries & diagnostics
    // -------------------------------------------------------------------------

    /// Gravitational acceleration on every body at the current state, using
    /// the configured method. Thrust is not included.
    pub fn accelerations(&mut self) -> Result<Vec<DVec3>, SimulationError> {
        self.capture_field()?;
        let g = self.config.gravitational_constant;
        self.bodies
            .iter()
            .zip(&self.field_slots)
            .map(|(body, &exclude)| match self.config.gravity_method {
                GravityMethod::BarnesHut => {
                    self.tree.acceleration_at(&self.field, &body.id, body.position, exclude, g)
                }
                GravityMethod::Direct => {
                    self.field.direct_acceleration(&body.id, body.position, exclude, g)
                }
            })
            .collect()
    }

    /// Fresh copy of the current massive bodies.
    pub fn gravity_field(&self) -> GravityField {
        GravityField::from_bodies(&self.bodies)
    }

    pub fn gravitational_constant(&self) -> f64 {
        self.config.gravitational_constant
    }

    pub fn encounter_state(&self, id: &str) -> Option<EncounterState> {
        self.index.get(id).map(|&i| self.encounters[i])
    }

    /// Dominant massive body for a passive body, as of the last tick.
    pub fn dominant_body(&self, id: &str) -> Option<&str> {
        self.soi.dominant(id)
    }

    /// Shape of the tree built on the last Barnes-Hut tick.
    pub fn tree_stats(&self) -> TreeStats {
        self.tree.stats()
    }

    /// Ids of every body within `radius` of `point`, massive bodies first.
    ///
    /// Massive bodies are found through the tree under Barnes-Hut, which is
    /// rebuilt from the current positions.
    pub fn bodies_within(&mut self, point: DVec3, radius: f64) -> Result<Vec<&str>, SimulationError> {
        self.capture_field()?;
        let r2 = radius * radius;
        let massive: Vec<usize> = match self.config.gravity_method {
            GravityMethod::BarnesHut => self.tree.bodies_within(&self.field, point, radius),
            GravityMethod::Direct => (0..self.field.len())
                .filter(|&i| self.field.position(i).distance_squared(point) <= r2)
                .collect(),
        };

        let mut found: Vec<&str> = massive.into_iter().map(|i| self.field.id(i)).collect();
        found.extend(
            self.bodies
                .iter()
                .filter(|b| !b.is_massive() && b.position.distance_squared(point) <= r2)
                .map(|b| b.id.as_str()),
        );
        Ok(found)
    }

    /// Per-body integrator state: RK45 settings and the Verlet acceleration cache.
    pub fn integrators(&self) -> &Integrators {
        &self.integrators
    }

    /// Take every event queued since the last call.
    pub fn drain_events(&mut self) -> Vec<SimulationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Kinetic energy of all bodies and potential energy of massive pairs.
    pub fn energy(&self) -> EnergyReport {
        let kinetic = self.bodies.iter().map(Body::kinetic_energy).sum();
        let potential = self.gravity_field().potential_energy(self.config.gravitational_constant);
        EnergyReport { kinetic, potential }
    }

    /// Total angular momentum Σ r × m·v about the origin.
    pub fn angular_momentum(&self) -> DVec3 {
        self.bodies
            .iter()
            .map(|b| b.position.cross(b.momentum()))
            .sum()
    }

    pub fn total_momentum(&self) -> DVec3 {
        self.bodies.iter().map(Body::momentum).sum()
    }

    /// Mass-weighted mean position; the origin when total mass is zero.
    pub fn center_of_mass(&self) -> DVec3 {
        let total: f64 = self.bodies.iter().map(|b| b.mass).sum();
        if total <= 0.0 {
            return DVec3::ZERO;
        }
        self.bodies.iter().map(|b| b.position * b.mass).sum::<DVec3>() / total
    }

    pub fn state(&self) -> SimulationState {
        let energy = self.energy();
        let massive = self.bodies.iter().filter(|b| b.is_massive()).count();
        SimulationState {
            time: self.time,
            tick: self.tick,
            body_count: self.bodies.len(),
            massive_bodies: massive,
            passive_bodies: self.bodies.len() - massive,
            kinetic_energy: energy.kinetic,
            potential_energy: energy.potential,
            total_energy: energy.total(),
        }
    }

    /// Owned render copies of every body.
    pub fn snapshot(&self) -> Vec<BodySnapshot> {
        self.bodies.iter().map(Body::snapshot).collect()
    }
}
