//! Reconnection Backoff
//!
//! Capped exponential backoff for tunnel reconnection. Each retry doubles
//! the delay up to the cap, with ±25% jitter so a fleet of tunnels lost to
//! the same failure does not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for one link's reconnection attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }

    /// Delay before retry number `retry` (zero-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial.saturating_mul(factor).min(self.cap)
    }

    /// Delay with ±25% jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay(10), Duration::from_secs(5));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = BackoffPolicy::new(Duration::from_millis(400), Duration::from_secs(30));
        for retry in 0..8 {
            let base = policy.base_delay(retry);
            let jittered = policy.delay(retry);
            assert!(jittered >= base.mul_f64(0.74));
            assert!(jittered <= base.mul_f64(1.26));
        }
    }
}
