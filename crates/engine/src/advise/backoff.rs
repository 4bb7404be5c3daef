//! Wait policies between retry attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long the RETRY adviser waits before the next attempt.
///
/// `attempt` is zero-based: the first retry uses `delay(0)`. Every policy
/// saturates instead of overflowing and honors its `max_ms` cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// The same wait every time.
    Fixed {
        /// Wait in milliseconds.
        #[serde(default)]
        wait_ms: u64,
    },
    /// `initial_ms + attempt * increment_ms`.
    Linear {
        /// First wait.
        initial_ms: u64,
        /// Added per attempt.
        increment_ms: u64,
        /// Upper bound.
        #[serde(default = "unbounded")]
        max_ms: u64,
    },
    /// `initial_ms * multiplier^attempt`.
    Exponential {
        /// First wait.
        initial_ms: u64,
        /// Growth factor, at least 1.
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        /// Upper bound.
        #[serde(default = "unbounded")]
        max_ms: u64,
    },
}

fn unbounded() -> u64 {
    u64::MAX
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed { wait_ms: 0 }
    }
}

impl Backoff {
    /// Wait before retry number `attempt + 1`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = match *self {
            Self::Fixed { wait_ms } => wait_ms,
            Self::Linear {
                initial_ms,
                increment_ms,
                max_ms,
            } => initial_ms
                .saturating_add(increment_ms.saturating_mul(u64::from(attempt)))
                .min(max_ms),
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let factor = multiplier.max(1.0).powi(i32::try_from(attempt).unwrap_or(i32::MAX));
                let delay = initial_ms as f64 * factor;
                if delay.is_finite() && delay < max_ms as f64 {
                    delay as u64
                } else {
                    max_ms
                }
            }
        };
        Duration::from_millis(millis)
    }
}
