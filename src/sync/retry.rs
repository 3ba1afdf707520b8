// Exponential backoff with jitter for sync retries

use rand::Rng;
use std::time::Duration;

use crate::sync::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    #[inline]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_backoff_ms,
            max_delay_ms: config.max_backoff_ms,
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    #[inline]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Base delay plus a uniform jitter of up to `jitter_ratio` of it
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        base + base.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter_ratio: f64) -> BackoffPolicy {
        BackoffPolicy::from_config(&SyncConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            jitter_ratio,
            ..SyncConfig::default()
        })
    }

    #[test]
    fn exponential_backoff_timing() {
        let policy = policy(0.0);

        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(64), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = policy(0.5);

        for attempt in 1..=6 {
            let base = policy.base_delay(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= base);
                assert!(delay <= base + base.mul_f64(0.5));
            }
        }
    }
}
