//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use crate::config::ForemanConfig;

/// Retry policy for failed provisioning / delegation attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit; the n-th failure waits `n * base_delay`.
    pub base_delay: Duration,

    /// Failures tolerated before escalation.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 3 attempts, 30 minute unit.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30 * 60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ForemanConfig) -> Self {
        Self {
            base_delay: config.retry_base_delay,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the next attempt, after `attempts` failures (1-indexed).
    ///
    /// Linear: with a 30 minute unit the schedule is 30, 60, 90 minutes.
    /// `attempts = 0` is treated as the first failure.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        self.base_delay.saturating_mul(attempts.max(1))
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
