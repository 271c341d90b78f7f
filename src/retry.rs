//! Bounded exponential backoff with multiplicative jitter.
//!
//! Only outcomes classified as transient by the executor are retried.
//! After the n-th failed attempt the pre-retry delay is
//! `baseDelay · 2^(n−1)` plus a uniform draw from
//! `[0, baseDelay · 2^(n−1) · jitter]`; the first attempt runs with no
//! delay.

use rand::Rng;
use std::time::Duration;

use crate::spec::RetrySpec;

/// Runtime retry policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 0.5,
            jitter: 0.1,
        }
    }
}

impl From<&RetrySpec> for RetryPolicy {
    fn from(spec: &RetrySpec) -> Self {
        Self {
            max_attempts: spec.max_attempts.max(1),
            base_delay: spec.base_delay.max(0.0),
            jitter: spec.jitter.max(0.0),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow the `attempt`-th (1-based)
    /// failed attempt.
    #[must_use]
    pub const fn attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff step after the `attempt`-th failed attempt, before jitter.
    #[must_use]
    pub fn backoff_step(&self, attempt: u32) -> f64 {
        self.base_delay * 2f64.powi(attempt.saturating_sub(1) as i32)
    }

    /// Delay to sleep before retrying after the `attempt`-th failure,
    /// jitter included.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let step = self.backoff_step(attempt);
        let jitter_cap = step * self.jitter;
        let jittered = if jitter_cap > 0.0 {
            step + rand::thread_rng().gen_range(0.0..=jitter_cap)
        } else {
            step
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Worst-case total backoff across all retries.
    #[must_use]
    pub fn max_total_backoff(&self) -> Duration {
        let total: f64 = (1..self.max_attempts)
            .map(|n| self.backoff_step(n) * (1.0 + self.jitter))
            .sum();
        Duration::from_secs_f64(total)
    }
}
