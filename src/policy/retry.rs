//! Exponential backoff for transient item failures.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for the jitter factor: at most 50% extra delay.
pub const MAX_JITTER_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            jitter_factor: MAX_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter_factor: bounded(jitter_factor, MAX_JITTER_FACTOR),
        }
    }

    /// `base * 2^attempt`, saturating instead of overflowing.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff plus `unit * jitter_factor` of extra delay, `unit` in `[0, 1]`.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.backoff(attempt);
        let extra = base.mul_f64(bounded(unit, 1.0) * bounded(self.jitter_factor, MAX_JITTER_FACTOR));
        base.saturating_add(extra)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(0.0..=1.0);
        self.delay_with_jitter(attempt, unit)
    }

    /// Whether a URL that has used `retry_count` retries may go again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Clamp into `[0, max]`; NaN and infinities collapse to 0.
fn bounded(value: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), 0.5);
        let delays: Vec<u64> = (0..4).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16]);
    }

    #[test]
    fn jitter_adds_at_most_half() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), 0.5);
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_secs(4));
        assert_eq!(policy.delay_with_jitter(1, 1.0), Duration::from_secs(6));

        for _ in 0..50 {
            let d = policy.next_delay(2);
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
        }
    }

    #[test]
    fn jitter_factor_is_clamped() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 4.0);
        assert_eq!(policy.jitter_factor, MAX_JITTER_FACTOR);
        assert_eq!(policy.delay_with_jitter(0, 1.0), Duration::from_millis(1500));
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(64) >= policy.backoff(31));
    }

    #[test]
    fn retry_allowed_below_max() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn non_finite_inputs_do_not_panic() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), f64::INFINITY);
        assert_eq!(policy.jitter_factor, 0.0);

        let raw = RetryPolicy {
            jitter_factor: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(raw.delay_with_jitter(0, 1.0), raw.backoff(0));
        assert_eq!(policy.delay_with_jitter(0, f64::NAN), Duration::from_millis(100));
    }
}
