//! Per-cycle outcome signal.
//!
//! Every rotation cycle ends in exactly one [`Outcome`], which is pushed to
//! an [`OutcomeSink`]. The value is overwritten each cycle, never
//! accumulated.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of one rotation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Nothing trustworthy happened
    Error,
    /// Non-fatal anomaly; no device was changed
    Warning,
    /// No rotation was due, or a rotation fully applied
    Success,
}

impl Outcome {
    /// Gauge encoding: 0.0 error, 0.5 warning, 1.0 success
    pub fn gauge_value(self) -> f64 {
        match self {
            Outcome::Error => 0.0,
            Outcome::Warning => 0.5,
            Outcome::Success => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Error => "error",
            Outcome::Warning => "warning",
            Outcome::Success => "success",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of the per-cycle outcome.
pub trait OutcomeSink: Send + Sync {
    /// Overwrite the last recorded outcome
    fn record_outcome(&self, outcome: Outcome);
}

impl<T: OutcomeSink + ?Sized> OutcomeSink for std::sync::Arc<T> {
    fn record_outcome(&self, outcome: Outcome) {
        (**self).record_outcome(outcome)
    }
}

/// Lock-free holder of the most recent gauge value.
///
/// Safe to read from any thread while the rotation loop writes to it.
#[derive(Debug)]
pub struct LastOutcome {
    // f64 bits; NaN means nothing recorded yet
    bits: AtomicU64,
}

impl LastOutcome {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Last recorded gauge value, `None` before the first cycle
    pub fn get(&self) -> Option<f64> {
        let value = f64::from_bits(self.bits.load(Ordering::Acquire));
        (!value.is_nan()).then_some(value)
    }
}

impl Default for LastOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSink for LastOutcome {
    fn record_outcome(&self, outcome: Outcome) {
        self.bits
            .store(outcome.gauge_value().to_bits(), Ordering::Release);
    }
}
