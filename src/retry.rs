//! Retry policy for rate-limited remote calls.
//!
//! The tree-listing API answers `403` with a rate-limit message when the
//! hourly quota is spent. Each wait is drawn uniformly from
//! `[min_delay, max_delay]`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay,
        }
    }

    /// Same attempt count, no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// A fresh random delay in `[min_delay, max_delay]`.
    pub fn delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let lo = self.min_delay.as_millis() as u64;
        let hi = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    /// Whether another attempt follows attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_in_window() {
        let policy = RetryPolicy::new(3, Duration::from_secs(300), Duration::from_secs(600));
        for _ in 0..200 {
            let d = policy.delay();
            assert!(d >= Duration::from_secs(300) && d <= Duration::from_secs(600));
        }
    }

    #[test]
    fn immediate_has_no_delay() {
        let policy = RetryPolicy::immediate(4);
        assert_eq!(policy.delay(), Duration::ZERO);
        assert_eq!(policy.max_attempts, 4);
    }

    #[test]
    fn attempts_never_zero() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn should_retry_counts_first_attempt() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn swapped_bounds_are_normalized() {
        let policy = RetryPolicy::new(2, Duration::from_secs(9), Duration::from_secs(1));
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(9));
    }
}
