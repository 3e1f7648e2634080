// Bounded retry policies for calls that are safe to repeat

use rand::Rng;
use std::time::Duration;

/// Attempts made against an RPC endpoint before it is reported unreachable
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Pause between attempts against an RPC endpoint
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay to wait after `failed_attempts` consecutive failures.
    /// Returns None once the attempt budget is spent.
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration>;

    /// Total number of attempts, the first one included
    fn max_attempts(&self) -> u32;

    /// Check if another attempt is allowed
    fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts()
    }
}

/// Fixed delay between a bounded number of attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Retries immediately; for tests and for callers that handle pacing themselves
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, max_attempts)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        if !self.should_retry(failed_attempts) {
            return None;
        }
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Exponential backoff with jitter
/// Sequence with defaults: 1s, 3s, 9s, ... capped at `max_delay_secs`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay in seconds (default: 1)
    base_delay_secs: u64,
    /// Maximum delay in seconds (default: 60)
    max_delay_secs: u64,
    /// Jitter factor (0.0 to 1.0, default: 0.1 = 10%)
    jitter_factor: f64,
    max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 60,
            jitter_factor: 0.1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        base_delay_secs: u64,
        max_delay_secs: u64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before jitter: base * 3^(failed_attempts - 1), capped
    fn calculate_base_delay(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(20);
        let delay = self.base_delay_secs.saturating_mul(3_u64.pow(exponent));
        delay.min(self.max_delay_secs)
    }

    /// Returns delay in milliseconds
    fn add_jitter_ms(&self, base_delay_secs: u64) -> u64 {
        let base_delay_ms = base_delay_secs * 1000;
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        if !self.should_retry(failed_attempts) {
            return None;
        }

        let base_delay_secs = self.calculate_base_delay(failed_attempts);
        Some(Duration::from_millis(self.add_jitter_ms(base_delay_secs)))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_defaults() {
        let strategy = FixedDelay::default();
        assert_eq!(strategy.max_attempts(), 4);
        assert_eq!(strategy.delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_fixed_delay_budget() {
        let strategy = FixedDelay::new(Duration::from_secs(15), 4);

        for failed in 1..4 {
            assert_eq!(
                strategy.next_delay(failed),
                Some(Duration::from_secs(15)),
                "should retry after {} failures",
                failed
            );
        }
        assert_eq!(strategy.next_delay(4), None);
        assert_eq!(strategy.next_delay(5), None);
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let strategy = FixedDelay::immediate(0);
        assert_eq!(strategy.max_attempts(), 1);
        assert_eq!(strategy.next_delay(1), None);
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 0.0, 10);

        assert_eq!(strategy.calculate_base_delay(1), 5);
        assert_eq!(strategy.calculate_base_delay(2), 15);
        assert_eq!(strategy.calculate_base_delay(3), 45);
        assert_eq!(strategy.calculate_base_delay(6), 1215);
        // 5 * 3^6 = 3645, capped
        assert_eq!(strategy.calculate_base_delay(7), 1800);
    }

    #[test]
    fn test_exponential_backoff_respects_budget() {
        let strategy = ExponentialBackoff::with_config(1, 60, 0.0, 3);
        assert_eq!(strategy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_secs(3)));
        assert_eq!(strategy.next_delay(3), None);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let strategy = ExponentialBackoff::with_config(5, 1800, 0.1, 10);

        for _ in 0..20 {
            let delay = strategy.next_delay(1).unwrap().as_millis();
            assert!(
                (5000..=5500).contains(&delay),
                "Delay {}ms should be between 5000ms and 5500ms",
                delay
            );
        }
    }

    #[test]
    fn test_jitter_factor_clamping() {
        let strategy1 = ExponentialBackoff::with_config(5, 1800, -0.5, 4);
        assert_eq!(strategy1.jitter_factor, 0.0);

        let strategy2 = ExponentialBackoff::with_config(5, 1800, 1.5, 4);
        assert_eq!(strategy2.jitter_factor, 1.0);
    }
}
