//! Bounded exponential backoff for rate-limited and failing requests.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on [`RetryPolicy::max_attempts`].
pub const MAX_ATTEMPTS: u32 = 10;

/// Upper bound on [`RetryPolicy::base_delay_ms`].
pub const MAX_BASE_DELAY_MS: u64 = 60_000;

/// How many times a request is attempted and how long to wait in between.
///
/// Attempt `n` (1-based) waits `base * 2^(n-1)` plus a random jitter of less
/// than half that step, so consecutive waits always grow. Attempts are capped
/// at [`MAX_ATTEMPTS`] and the base at [`MAX_BASE_DELAY_MS`], which keeps
/// every step below overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Wait after the first failed attempt, before jitter.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// A policy for tests: same attempt budget, millisecond waits.
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    /// This policy with both fields inside their caps.
    pub fn bounded(self) -> Self {
        Self {
            max_attempts: self.max_attempts.clamp(1, MAX_ATTEMPTS),
            base_delay_ms: self.base_delay_ms.clamp(1, MAX_BASE_DELAY_MS),
        }
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Wait after failed attempt `attempt`, with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.delay_with_jitter(attempt, unit)
    }

    /// Wait after failed attempt `attempt`, with jitter drawn from `unit`
    /// in `[0, 1)`.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_ATTEMPTS - 1);
        let step = self.base_delay_ms.clamp(1, MAX_BASE_DELAY_MS) << exponent;

        let unit = if unit.is_finite() { unit.clamp(0.0, 0.999_999) } else { 0.0 };
        let jitter = ((step / 2) as f64 * unit) as u64;

        Duration::from_millis(step.saturating_add(jitter))
    }
}
