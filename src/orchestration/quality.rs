//! Wave-scoped circuit breaker for the quality gate.

use serde::{Deserialize, Serialize};

/// Disables the quality gate for the rest of a wave after too many
/// consecutive rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCircuitBreaker {
    threshold: u32,
    consecutive: u32,
    disabled: bool,
}

impl QualityCircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
            disabled: false,
        }
    }

    /// Count a rejection. Returns `true` when this rejection trips the breaker.
    pub fn record_rejection(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        self.consecutive += 1;
        if self.threshold > 0 && self.consecutive >= self.threshold {
            self.disabled = true;
            return true;
        }
        false
    }

    pub fn record_pass(&mut self) {
        self.consecutive = 0;
    }

    /// Start a fresh evaluation window for the next wave.
    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.disabled = false;
    }

    /// Whether the gate should be skipped.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn consecutive_rejections(&self) -> u32 {
        self.consecutive
    }
}
