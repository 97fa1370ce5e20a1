//! Numerical integrators for body trajectories.
//!
//! Three methods share one contract: advance a body's position and velocity
//! in place over `dt`, given a fallible acceleration function
//! `accel(position, velocity, time)`.
//!
//! - Velocity Verlet: 2nd order, symplectic, one force evaluation per step
//!   when the previous step's end acceleration is cached. The default for
//!   long-running stable orbits.
//! - RK4: classic 4th order Runge-Kutta.
//! - RK45: Dormand-Prince with embedded error estimate and adaptive
//!   substepping, used during close encounters.

use std::collections::HashMap;

use bevy::log::warn;
use bevy::math::DVec3;
use serde::{Deserialize, Serialize};

use super::SimulationError;
use crate::types::Body;

// =============================================================================
// Configuration
// =============================================================================

/// Integration method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    #[default]
    VelocityVerlet,
    Rk4,
    Rk45,
}

/// Step size control for the adaptive Dormand-Prince integrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rk45Config {
    /// Error tolerance (relative to `1 + |state|`). Default: 1e-9.
    pub tolerance: f64,
    /// Smallest substep in seconds. Default: 1e-6.
    pub min_dt: f64,
    /// Largest substep in seconds. Default: 3600.
    pub max_dt: f64,
    /// Safety factor applied to the optimal step estimate. Default: 0.9.
    pub safety: f64,
    /// Attempts allowed per call before the remaining interval is forced. Default: 1000.
    pub max_substeps: usize,
}

impl Default for Rk45Config {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            min_dt: 1e-6,
            max_dt: 3600.0, // 1 hour
            safety: 0.9,
            max_substeps: 1000,
        }
    }
}

/// Step size may shrink to a fifth or grow fivefold per attempt.
const MIN_SCALE: f64 = 0.2;
const MAX_SCALE: f64 = 5.0;

// =============================================================================
// Velocity Verlet
// =============================================================================

/// One Velocity Verlet step.
///
/// `cached` is the acceleration at the body's current state from the end of
/// the previous step, if still valid. Returns the acceleration at the new
/// position for the caller to cache.
pub fn velocity_verlet_step<F>(
    body: &mut Body,
    dt: f64,
    time: f64,
    cached: Option<DVec3>,
    accel: &mut F,
) -> Result<DVec3, SimulationError>
where
    F: FnMut(DVec3, DVec3, f64) -> Result<DVec3, SimulationError>,
{
    let a0 = match cached {
        Some(a) => a,
        None => accel(body.position, body.velocity, time)?,
    };

    // 1. x_new = x + v*dt + 0.5*a*dt²
    let position = body.position + body.velocity * dt + a0 * (0.5 * dt * dt);
    // 2. a_new = acceleration(x_new)
    let a1 = accel(position, body.velocity + a0 * dt, time + dt)?;
    // 3. v_new = v + 0.5*(a + a_new)*dt
    let velocity = body.velocity + (a0 + a1) * (0.5 * dt);

    body.position = position;
    body.velocity = velocity;
    Ok(a1)
}

// =============================================================================
// RK4
// =============================================================================

/// One classic 4th-order Runge-Kutta step on the (x, v) system.
pub fn rk4_step<F>(body: &mut Body, dt: f64, time: f64, accel: &mut F) -> Result<(), SimulationError>
where
    F: FnMut(DVec3, DVec3, f64) -> Result<DVec3, SimulationError>,
{
    let x0 = body.position;
    let v0 = body.velocity;
    let half = 0.5 * dt;

    let k1x = v0;
    let k1v = accel(x0, v0, time)?;

    let k2x = v0 + k1v * half;
    let k2v = accel(x0 + k1x * half, k2x, time + half)?;

    let k3x = v0 + k2v * half;
    let k3v = accel(x0 + k2x * half, k3x, time + half)?;

    let k4x = v0 + k3v * dt;
    let k4v = accel(x0 + k3x * dt, k4x, time + dt)?;

    body.position = x0 + (k1x + 2.0 * k2x + 2.0 * k3x + k4x) * (dt / 6.0);
    body.velocity = v0 + (k1v + 2.0 * k2v + 2.0 * k3v + k4v) * (dt / 6.0);
    Ok(())
}

// =============================================================================
// RK45 (Dormand-Prince)
// =============================================================================

const DP_C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

const DP_A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
    [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
    [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];

/// 5th-order weights.
const DP_B5: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];

/// Embedded 4th-order weights.
const DP_B4: [f64; 7] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

/// What an adaptive step did internally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rk45Report {
    /// Accepted substeps.
    pub substeps: usize,
    /// Rejected attempts that were retried with a smaller step.
    pub rejections: usize,
    /// Substeps accepted above tolerance because the step could not shrink further.
    pub fallbacks: usize,
}

struct DpAttempt {
    position: DVec3,
    velocity: DVec3,
    /// Scaled error; accept when <= 1.
    error: f64,
}

fn dormand_prince_attempt<F>(
    x: DVec3,
    v: DVec3,
    t: f64,
    h: f64,
    tolerance: f64,
    accel: &mut F,
) -> Result<DpAttempt, SimulationError>
where
    F: FnMut(DVec3, DVec3, f64) -> Result<DVec3, SimulationError>,
{
    let mut kx = [DVec3::ZERO; 7];
    let mut kv = [DVec3::ZERO; 7];

    for i in 0..7 {
        let mut xi = x;
        let mut vi = v;
        for j in 0..i {
            let a = DP_A[i][j] * h;
            xi += kx[j] * a;
            vi += kv[j] * a;
        }
        kx[i] = vi;
        kv[i] = accel(xi, vi, t + DP_C[i] * h)?;
    }

    let mut x5 = x;
    let mut v5 = v;
    let mut dx = DVec3::ZERO;
    let mut dv = DVec3::ZERO;
    for i in 0..7 {
        x5 += kx[i] * (DP_B5[i] * h);
        v5 += kv[i] * (DP_B5[i] * h);
        let db = (DP_B5[i] - DP_B4[i]) * h;
        dx += kx[i] * db;
        dv += kv[i] * db;
    }

    let err_x = dx.length() / (tolerance * (1.0 + x5.length()));
    let err_v = dv.length() / (tolerance * (1.0 + v5.length()));

    Ok(DpAttempt {
        position: x5,
        velocity: v5,
        error: err_x.max(err_v),
    })
}

#[inline]
fn step_scale(error: f64, safety: f64) -> f64 {
    if error <= 0.0 {
        return MAX_SCALE;
    }
    (safety * error.powf(-0.2)).clamp(MIN_SCALE, MAX_SCALE)
}

/// Advance `body` by exactly `dt` using adaptive Dormand-Prince substeps.
///
/// Substeps shrink until the scaled error is within tolerance. A substep
/// that is still above tolerance at `min_dt` is accepted anyway and counted
/// as a fallback; this is logged, never an error.
pub fn rk45_step<F>(
    body: &mut Body,
    dt: f64,
    time: f64,
    config: &Rk45Config,
    accel: &mut F,
) -> Result<Rk45Report, SimulationError>
where
    F: FnMut(DVec3, DVec3, f64) -> Result<DVec3, SimulationError>,
{
    let mut report = Rk45Report::default();
    let mut x = body.position;
    let mut v = body.velocity;
    let mut t = time;
    let mut remaining = dt;
    let mut h = dt.min(config.max_dt);
    let mut attempts = 0usize;

    while remaining > dt * 1e-12 {
        attempts += 1;
        let forced = attempts > config.max_substeps;
        h = if forced { remaining } else { h.min(remaining) };

        let attempt = dormand_prince_attempt(x, v, t, h, config.tolerance, accel)?;
        let at_floor = h <= config.min_dt;

        if attempt.error <= 1.0 || at_floor || forced {
            if attempt.error > 1.0 {
                report.fallbacks += 1;
            }
            x = attempt.position;
            v = attempt.velocity;
            t += h;
            remaining -= h;
            report.substeps += 1;
            h = (h * step_scale(attempt.error, config.safety)).clamp(config.min_dt, config.max_dt);
        } else {
            report.rejections += 1;
            h = (h * step_scale(attempt.error, config.safety)).max(config.min_dt);
        }
    }

    if report.fallbacks > 0 {
        warn!(
            "RK45 accepted {} substep(s) above tolerance for '{}' (min_dt = {:e})",
            report.fallbacks, body.id, config.min_dt
        );
    }

    body.position = x;
    body.velocity = v;
    Ok(report)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Integrator dispatch plus per-body Verlet acceleration cache.
#[derive(Clone, Debug, Default)]
pub struct Integrators {
    verlet_cache: HashMap<String, DVec3>,
    pub rk45: Rk45Config,
    /// Total RK45 fallbacks since creation.
    pub rk45_fallbacks: u64,
}

impl Integrators {
    pub fn new(rk45: Rk45Config) -> Self {
        Self {
            rk45,
            ..Default::default()
        }
    }

    /// Advance `body` by `dt` with the chosen method.
    pub fn step<F>(
        &mut self,
        kind: IntegratorKind,
        body: &mut Body,
        dt: f64,
        time: f64,
        mut accel: F,
    ) -> Result<(), SimulationError>
    where
        F: FnMut(DVec3, DVec3, f64) -> Result<DVec3, SimulationError>,
    {
        match kind {
            IntegratorKind::VelocityVerlet => {
                let cached = self.verlet_cache.get(&body.id).copied();
                let next = velocity_verlet_step(body, dt, time, cached, &mut accel)?;
                match self.verlet_cache.get_mut(&body.id) {
                    Some(slot) => *slot = next,
                    None => {
                        self.verlet_cache.insert(body.id.clone(), next);
                    }
                }
            }
            IntegratorKind::Rk4 => rk4_step(body, dt, time, &mut accel)?,
            IntegratorKind::Rk45 => {
                let report = rk45_step(body, dt, time, &self.rk45, &mut accel)?;
                self.rk45_fallbacks += report.fallbacks as u64;
            }
        }
        Ok(())
    }

    /// Cached Verlet acceleration for a body, if any.
    pub fn cached_acceleration(&self, id: &str) -> Option<DVec3> {
        self.verlet_cache.get(id).copied()
    }

    /// Drop one body's cached acceleration.
    pub fn invalidate(&mut self, id: &str) {
        self.verlet_cache.remove(id);
    }

    pub fn clear_cache(&mut self) {
        self.verlet_cache.clear();
    }
}
