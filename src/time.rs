//! Fixed-timestep accumulator.
//!
//! Converts variable wall-clock frame deltas into a whole number of fixed
//! physics ticks, honoring time scale and pause state.

use bevy::log::warn;

use crate::types::DEFAULT_TIMESTEP;

/// Accumulator turning real time into fixed ticks.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedTimestep {
    /// Tick length in simulated seconds.
    pub dt: f64,
    /// Simulated seconds per real second.
    pub time_scale: f64,
    /// Most ticks a single frame may run.
    pub max_substeps: usize,
    /// Largest backlog kept after a frame, in ticks.
    pub max_backlog_steps: usize,
    pub paused: bool,
    accumulator: f64,
}

impl Default for FixedTimestep {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTEP)
    }
}

impl FixedTimestep {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            time_scale: 1.0,
            max_substeps: 1000,
            max_backlog_steps: 10,
            paused: false,
            accumulator: 0.0,
        }
    }

    /// Unconsumed simulated time (seconds).
    #[inline]
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Fraction of a tick left in the accumulator, for render interpolation.
    #[inline]
    pub fn alpha(&self) -> f64 {
        if self.dt > 0.0 { (self.accumulator / self.dt).clamp(0.0, 1.0) } else { 0.0 }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    /// Add a real-time delta and return how many fixed ticks to run now.
    ///
    /// At most `max_substeps` ticks are released per call. Whatever backlog
    /// remains beyond `max_backlog_steps` ticks is discarded so a slow frame
    /// cannot trigger an ever-growing catch-up.
    pub fn advance(&mut self, real_delta: f64) -> usize {
        if self.paused || self.dt <= 0.0 || !real_delta.is_finite() || real_delta <= 0.0 {
            return 0;
        }

        self.accumulator += real_delta * self.time_scale;

        let mut steps = 0;
        while self.accumulator >= self.dt && steps < self.max_substeps {
            self.accumulator -= self.dt;
            steps += 1;
        }

        let backlog_limit = self.dt * self.max_backlog_steps as f64;
        if self.accumulator > backlog_limit {
            warn!(
                "Physics falling behind: dropping {:.3}s of backlog after {} ticks",
                self.accumulator - backlog_limit,
                steps
            );
            self.accumulator = backlog_limit;
        }

        steps
    }
}
