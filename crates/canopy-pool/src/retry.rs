//! Retry policy for transient task failures.
//!
//! Exponential backoff: attempt `n` (1-based) waits
//! `base × multiplier^(n-1)`, capped at `max_delay`.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Out-of-range inputs are clamped: a base delay is at most `max_delay`
    /// and a non-finite multiplier falls back to the default.
    pub fn new(max_retries: u32, base_delay_secs: f64, multiplier: f64) -> Self {
        let d = Self::default();
        let base_delay = Duration::try_from_secs_f64(base_delay_secs.max(0.0))
            .unwrap_or(d.max_delay)
            .min(d.max_delay);
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            d.multiplier
        };
        Self {
            max_retries,
            base_delay,
            multiplier,
            ..d
        }
    }

    /// Whether a task that has already been retried `retry_count` times
    /// may be retried again.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn unrepresentable_inputs_are_clamped() {
        let policy = RetryPolicy::new(3, f64::INFINITY, 2.0);
        assert_eq!(policy.base_delay, Duration::from_secs(60));

        let policy = RetryPolicy::new(3, f64::NAN, f64::INFINITY);
        assert_eq!(policy.base_delay, Duration::ZERO);
        assert_eq!(policy.multiplier, 2.0);

        let policy = RetryPolicy::new(3, 1e300, 1e300);
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
    }

    #[test]
    fn retries_bounded() {
        let policy = RetryPolicy::new(3, 0.5, 3.0);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1500));
    }
}
