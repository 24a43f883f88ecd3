//! Retry policy (§4.E): delay between attempt `n` and `n+1` is
//! `min(baseDelay * 2^(n-1), capDelay)` plus +/-25% uniform jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (0-indexed: `attempt=0` is
    /// the delay before the first retry, following a failed first try).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt; // attempt=0 -> base * 2^0
        let unjittered = self
            .base_delay
            .checked_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
            .unwrap_or(self.cap_delay)
            .min(self.cap_delay);

        jitter(unjittered)
    }
}

/// Apply +/-25% uniform jitter to `delay`.
fn jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.75..=1.25);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(10),
        };
        // Even with jitter, the capped delay should stay well above the
        // uncapped exponential growth for large attempts.
        let late = policy.delay_for(8);
        assert!(late <= Duration::from_secs(13));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..100 {
            let jittered = jitter(base);
            assert!(jittered >= Duration::from_millis(2900));
            assert!(jittered <= Duration::from_millis(5100));
        }
    }
}
