//! Adaptive request pacing
//!
//! The delay before every call self-tunes: it grows when the API throttles us
//! and decays back toward the floor while calls succeed. Each `Pacer` owns its
//! own estimate so independent harvests never share pacing state.

use crate::config::PacingConfig;
use std::time::Duration;

/// Rolling inter-request delay plus the retry backoff schedule
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
    delay_ms: f64,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        let delay_ms = config.initial_delay_ms as f64;
        Self { config, delay_ms }
    }

    /// Current base delay, before jitter
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.round() as u64)
    }

    /// Attempts allowed per remote call
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Jittered delay to sleep before the next call
    pub fn pause(&self) -> Duration {
        self.jittered(self.delay_ms)
    }

    /// Jittered wait after the `retry`-th failed attempt (0-based)
    ///
    /// The last schedule entry repeats once the schedule runs out.
    pub fn backoff(&self, retry: u32) -> Duration {
        let schedule = &self.config.backoff_schedule_ms;
        let index = (retry as usize).min(schedule.len().saturating_sub(1));
        let base = schedule.get(index).copied().unwrap_or(0);
        self.jittered(base as f64)
    }

    pub fn on_success(&mut self) {
        let decayed = self.delay_ms * self.config.decay_factor;
        self.delay_ms = decayed.max(self.config.min_delay_ms as f64);
    }

    pub fn on_throttled(&mut self) {
        let grown = self.delay_ms * self.config.growth_factor;
        self.delay_ms = grown.min(self.config.max_delay_ms as f64);
    }

    fn jittered(&self, base_ms: f64) -> Duration {
        if base_ms <= 0.0 {
            return Duration::ZERO;
        }
        // Uniform in [-jitter, +jitter]
        let spread = self.config.jitter * (fastrand::f64() * 2.0 - 1.0);
        let ms = (base_ms * (1.0 + spread)).max(0.0);
        Duration::from_millis(ms.round() as u64)
    }
}
