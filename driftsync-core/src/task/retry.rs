/*
    retry.rs - Bounded retry with exponential backoff

    Transient failures (network hiccups, folder-sync races, timeouts) are
    retried up to a ceiling with exponential backoff and jitter. Anything
    non-transient aborts immediately.
*/

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration for one operation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per step (1 = no retries)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Per-attempt timeout; exceeding it counts as a transient failure
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            step_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (1-based), with jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_delay);
        // Up to 25% jitter so concurrent clients do not retry in lockstep
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        capped.mul_f64(1.0 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            step_timeout: Duration::from_secs(5),
        };

        let d1 = policy.delay_for(1);
        let d3 = policy.delay_for(3);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d3 >= Duration::from_millis(400));
        // Cap plus maximum jitter
        assert!(policy.delay_for(10) <= Duration::from_millis(1250));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        let _ = policy.delay_for(u32::MAX);
    }
}
