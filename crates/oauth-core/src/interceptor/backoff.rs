//! Exponential backoff with jitter (spec §4.3).
//!
//! `min(initial * multiplier^attempt, max_interval) ± jitter`, where jitter
//! (when enabled) is uniform in `±10%`.

use std::time::Duration;

use rand::Rng;

/// Backoff policy parameters.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Whether to apply ±10% uniform jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Compute the delay for `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        let secs = if self.jitter {
            let jitter_frac = rand::thread_rng().gen_range(-0.1..=0.1);
            (capped * (1.0 + jitter_frac)).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = BackoffPolicy { jitter: false, ..Default::default() };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), policy.max_interval);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy { jitter: true, ..Default::default() };
        for attempt in 0..5 {
            let base = policy.initial_interval.as_secs_f64() * policy.multiplier.powi(attempt as i32);
            let base = base.min(policy.max_interval.as_secs_f64());
            let got = policy.delay_for(attempt).as_secs_f64();
            assert!(got >= base * 0.9 - 1e-6 && got <= base * 1.1 + 1e-6);
        }
    }
}
