//! Retry backoff strategies for task group scheduling attempts.

use std::time::Duration;

/// Maps the previous retry penalty to the next one.
///
/// Stateless: all per-group state lives in the group itself.
pub trait BackoffStrategy: Send + Sync {
    fn calculate(&self, previous: Duration) -> Duration;
}

/// Doubles the penalty up to a ceiling.
#[derive(Debug, Clone)]
pub struct TruncatedBinaryBackoff {
    initial: Duration,
    max: Duration,
}

impl TruncatedBinaryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        assert!(!initial.is_zero(), "initial backoff must be positive");
        assert!(max >= initial, "max backoff must be >= initial");
        Self { initial, max }
    }
}

impl BackoffStrategy for TruncatedBinaryBackoff {
    fn calculate(&self, previous: Duration) -> Duration {
        if previous < self.initial {
            self.initial
        } else {
            (previous * 2).min(self.max)
        }
    }
}
