// src/exec/retry.rs

//! Per-task retry policy and backoff computation.

use std::time::Duration;

/// Fraction of the computed delay added as random jitter, at most.
const JITTER_FRACTION: f64 = 0.25;

/// How many times a task is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub backoff_base: Duration,
    /// Ceiling for any single delay (before jitter).
    pub backoff_max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retry_count(1, 1_000, 300_000)
    }
}

impl RetryPolicy {
    /// Build from the config vocabulary: `retries` counts attempts *after*
    /// the first one.
    pub fn from_retry_count(retries: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms.max(base_ms)),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::from_retry_count(0, 0, 0)
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait after the `failed_attempts`-th consecutive failure
    /// (1-based): `base * multiplier^(n-1)`, capped, plus jitter.
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let capped = self.capped_delay(failed_attempts);
        if self.jitter && !capped.is_zero() {
            capped.mul_f64(1.0 + JITTER_FRACTION * rand::random::<f64>())
        } else {
            capped
        }
    }

    fn capped_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let millis = self.backoff_base.as_millis() as f64 * self.multiplier.powi(exponent);
        let max = self.backoff_max.as_millis() as f64;
        Duration::from_millis(millis.min(max) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_count_excludes_first_attempt() {
        assert_eq!(RetryPolicy::from_retry_count(2, 10, 100).max_attempts, 3);
        assert_eq!(RetryPolicy::from_retry_count(0, 10, 100).max_attempts, 1);
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = RetryPolicy::from_retry_count(5, 1_000, 3_000).without_jitter();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(3_000));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::from_retry_count(3, 1_000, 60_000);
        for _ in 0..100 {
            let delay = policy.backoff_for(2);
            assert!(delay >= Duration::from_millis(2_000), "{delay:?}");
            assert!(delay <= Duration::from_millis(2_500), "{delay:?}");
        }
    }

    #[test]
    fn zero_base_never_sleeps() {
        let policy = RetryPolicy::from_retry_count(3, 0, 0);
        assert_eq!(policy.backoff_for(3), Duration::ZERO);
    }
}
