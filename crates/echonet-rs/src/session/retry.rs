// crates/echonet-rs/src/session/retry.rs
//! The exponential backoff + jitter schedule applied to every outstanding
//! request.

use crate::types::IpAndEoj;
use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;

/// Relative jitter applied to each interval.
const JITTER_FRACTION: f64 = 0.3;

/// Applies the stack-wide jitter rule to a base duration: scale by a random
/// factor in [0.7, 1.3], then floor at half the base so jitter can never
/// collapse a schedule to nothing.
pub fn jittered(base: Duration, rng: &mut StdRng) -> Duration {
    let factor = rng.random_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
    base.mul_f64(factor).max(base / 2)
}

/// Tunables for the session layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base retry interval (doubles per retry).
    pub retry_interval: Duration,
    /// Cap on the exponentially grown interval.
    pub max_retry_interval: Duration,
    /// Number of datagrams sent before a request is abandoned.
    pub max_retries: u32,
}

impl Default for SessionConfig {
    /// Defaults sized for slow responders (refrigerators, water heaters):
    /// 3s base, 7 attempts, worst case roughly two minutes.
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(3),
            max_retry_interval: Duration::from_secs(60),
            max_retries: 7,
        }
    }
}

impl SessionConfig {
    /// The interval to wait after send number `retry` (0-based):
    /// `jitter(min(base * 2^retry, cap), ±30%)`, floored at half the capped
    /// base so jitter can never collapse the schedule.
    pub fn interval(&self, retry: u32, rng: &mut StdRng) -> Duration {
        let grown = self
            .retry_interval
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_retry_interval);
        jittered(grown, rng)
    }
}

/// Emitted when a request exhausts its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimeoutEvent {
    pub device: IpAndEoj,
    pub max_retries: u32,
    pub total_duration: Duration,
    pub retry_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_interval_stays_within_jitter_bounds() {
        let config = SessionConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..4 {
            let base = Duration::from_secs(3 * (1 << retry));
            for _ in 0..200 {
                let interval = config.interval(retry, &mut rng);
                assert!(interval >= base / 2, "retry {}: {:?} too short", retry, interval);
                assert!(
                    interval <= base.mul_f64(1.3),
                    "retry {}: {:?} too long",
                    retry,
                    interval
                );
            }
        }
    }

    #[test]
    fn test_interval_caps_at_max() {
        let config = SessionConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        // 3s * 2^6 = 192s, capped at 60s before jitter.
        for _ in 0..200 {
            let interval = config.interval(6, &mut rng);
            assert!(interval <= Duration::from_secs(60).mul_f64(1.3));
            assert!(interval >= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_high_retry_count_does_not_overflow() {
        let config = SessionConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let interval = config.interval(32, &mut rng);
        assert!(interval <= Duration::from_secs(60).mul_f64(1.3));
    }
}
