//! Retry delays for failed sync operations.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base * 2^(attempts - 1)`, capped at `max`, with up to
/// `jitter` of the delay removed at random.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `attempts` failures, without jitter.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// [`Self::delay_for`] with jitter applied; never longer than the cap.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let delay = self.delay_for(attempts);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 - rand::rng().random_range(0.0..=jitter);
        delay.mul_f64(factor)
    }

    /// Unix ms of the next attempt.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn next_attempt_at(&self, now_ms: i64, attempts: u32) -> i64 {
        now_ms.saturating_add(self.jittered_delay(attempts).as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
            jitter,
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = policy(0.0);
        let delays: Vec<u128> = (1..=7)
            .map(|attempt| policy.delay_for(attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 8_000, 8_000]);
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        assert_eq!(policy(0.0).delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy(0.5);
        for _ in 0..200 {
            let delay = policy.jittered_delay(3);
            assert!(delay <= Duration::from_secs(2));
            assert!(delay >= Duration::from_secs(1));
        }
    }

    #[test]
    fn next_attempt_is_in_the_future() {
        let policy = policy(0.2);
        assert!(policy.next_attempt_at(10_000, 1) > 10_000);
    }
}
