use std::time::Duration;
use time::OffsetDateTime;

use super::subscription::RetryPolicy;

/// Default ceiling for a single backoff delay (one day)
pub const DEFAULT_MAX_DELAY_SECS: u64 = 86_400;

/// Retry strategy for webhook delivery.
///
/// Delay after a failure is `base_delay * 2^retry_count`, where
/// `retry_count` already includes the attempt that just failed. The first
/// retry therefore waits twice the base delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    enabled: bool,

    max_retries: u32,

    base_delay_secs: u64,

    max_delay_secs: u64,
}

impl RetryStrategy {
    /// Create a new retry strategy
    pub fn new(enabled: bool, max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            enabled,
            max_retries,
            base_delay_secs,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
        }
    }

    /// Strategy described by a subscription's retry settings
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.enabled, policy.max_retries, policy.delay_secs)
    }

    /// Set maximum delay cap
    pub fn with_max_delay(mut self, max_delay_secs: u64) -> Self {
        self.max_delay_secs = max_delay_secs;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt is allowed after `retry_count` attempts
    pub fn should_retry(&self, retry_count: u32) -> bool {
        self.enabled && retry_count < self.max_retries
    }

    /// Backoff delay for a post-increment `retry_count`
    pub fn delay(&self, retry_count: u32) -> Duration {
        let multiplier = 2_u64.saturating_pow(retry_count);
        let delay_secs = self
            .base_delay_secs
            .saturating_mul(multiplier)
            .min(self.max_delay_secs);
        Duration::from_secs(delay_secs)
    }

    /// When the next attempt is due, or `None` once retries are exhausted.
    ///
    /// A delay that lands past the representable calendar also yields `None`.
    pub fn next_retry_at(&self, retry_count: u32, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if !self.should_retry(retry_count) {
            return None;
        }
        let delay = time::Duration::try_from(self.delay(retry_count)).ok()?;
        now.checked_add(delay)
    }

    /// All delays a delivery would go through, for display and testing
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .take_while(|&count| self.should_retry(count))
            .map(|count| self.delay(count))
            .collect()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00:00 UTC);

    #[test]
    fn test_backoff_doubles_from_twice_the_base() {
        let strategy = RetryStrategy::new(true, 3, 5);

        assert_eq!(strategy.delay(1), Duration::from_secs(10));
        assert_eq!(strategy.delay(2), Duration::from_secs(20));
        assert_eq!(strategy.delay(3), Duration::from_secs(40));
    }

    #[test]
    fn test_next_retry_at_until_exhausted() {
        let strategy = RetryStrategy::new(true, 3, 5);

        assert_eq!(
            strategy.next_retry_at(1, NOW),
            Some(datetime!(2026-03-01 12:00:10 UTC))
        );
        assert_eq!(
            strategy.next_retry_at(2, NOW),
            Some(datetime!(2026-03-01 12:00:20 UTC))
        );
        // retry_count == max_retries: terminal
        assert_eq!(strategy.next_retry_at(3, NOW), None);
        assert_eq!(strategy.next_retry_at(4, NOW), None);
    }

    #[test]
    fn test_disabled_never_retries() {
        let strategy = RetryStrategy::new(false, 3, 5);

        assert!(!strategy.should_retry(0));
        assert!(!strategy.should_retry(1));
        assert_eq!(strategy.next_retry_at(1, NOW), None);
        assert!(strategy.schedule().is_empty());
    }

    #[test]
    fn test_zero_max_retries() {
        let strategy = RetryStrategy::new(true, 0, 5);
        assert_eq!(strategy.next_retry_at(1, NOW), None);
    }

    #[test]
    fn test_max_delay_cap() {
        let strategy = RetryStrategy::new(true, 10, 1000).with_max_delay(5000);

        assert_eq!(strategy.delay(1), Duration::from_secs(2000));
        assert_eq!(strategy.delay(2), Duration::from_secs(4000));
        assert_eq!(strategy.delay(3), Duration::from_secs(5000)); // Capped
    }

    #[test]
    fn test_overflow_protection() {
        let strategy = RetryStrategy::new(true, 100, 3600);

        // This would overflow without saturating_* operations
        assert_eq!(
            strategy.delay(90),
            Duration::from_secs(DEFAULT_MAX_DELAY_SECS)
        );
    }

    #[test]
    fn test_out_of_range_retry_time_is_terminal() {
        let strategy = RetryStrategy::new(true, 3, 1_000_000_000_000_000).with_max_delay(u64::MAX);

        assert_eq!(strategy.next_retry_at(1, NOW), None);
    }

    #[test]
    fn test_schedule() {
        let strategy = RetryStrategy::new(true, 4, 60);

        assert_eq!(
            strategy.schedule(),
            vec![
                Duration::from_secs(120),
                Duration::from_secs(240),
                Duration::from_secs(480),
            ]
        );
    }

    #[test]
    fn test_from_policy() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 5,
            delay_secs: 30,
        };
        let strategy = RetryStrategy::from_policy(&policy);

        assert_eq!(strategy.max_retries(), 5);
        assert_eq!(strategy.delay(1), Duration::from_secs(60));
    }
}
