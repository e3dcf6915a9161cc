use crate::core::config::RouterConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per call, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base,
            multiplier: config.backoff_multiplier,
            max_delay: config.backoff_max,
            ..Self::default()
        }
    }

    /// No waiting between attempts. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn can_retry(&self, failed_attempt: u32) -> bool {
        failed_attempt < self.max_attempts
    }

    /// Delay before the attempt that follows failed attempt `failed_attempt`
    /// (1-based): `base * multiplier^(failed_attempt - 1)`, capped.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Adds random jitter on top of `delay`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = delay.as_millis() as f64 * self.jitter * rand::thread_rng().gen_range(0.0..1.0);
        delay + Duration::from_millis(extra as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let delay = policy.jittered(base);
            assert!(delay >= base && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn attempts_are_capped() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.can_retry(1));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }
}
