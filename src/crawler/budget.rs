//! Per-invocation execution budget
//!
//! One unit is one logical remote operation, retries included.

use crate::config::HarvestConfig;
use std::time::{Duration, Instant};

/// Per-invocation allowance: a wall-clock ceiling and an optional unit cap
///
/// Checked before every network call; a unit that has started always runs
/// to completion.
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    limit: Duration,
    max_units: Option<u64>,
    spent: u64,
}

impl Budget {
    pub fn new(limit: Duration, max_units: Option<u64>) -> Self {
        Self {
            started: Instant::now(),
            limit,
            max_units,
            spent: 0,
        }
    }

    /// Budget for one scheduled invocation
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            Duration::from_secs(config.max_execution_minutes.saturating_mul(60)),
            config.max_units,
        )
    }

    /// No time limit and no unit cap
    pub fn unlimited() -> Self {
        Self::new(Duration::MAX, None)
    }

    /// Only a unit cap
    pub fn units(max_units: u64) -> Self {
        Self::new(Duration::MAX, Some(max_units))
    }

    pub fn exhausted(&self) -> bool {
        if self.started.elapsed() >= self.limit {
            return true;
        }
        matches!(self.max_units, Some(max) if self.spent >= max)
    }

    /// Records one completed unit of work
    pub fn spend(&mut self) {
        self.spent += 1;
    }

    pub fn spent(&self) -> u64 {
        self.spent
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
