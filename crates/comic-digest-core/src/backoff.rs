//! Retry delay schedule.
//!
//! [`BackoffPolicy`] only computes delays; it never sleeps. The runtime
//! crate pairs it with a pacer so tests can observe the schedule without
//! waiting on a real clock.
//!
//! ```rust
//! use std::time::Duration;
//! use comic_digest_core::backoff::BackoffPolicy;
//!
//! let linear = BackoffPolicy::linear(Duration::from_secs(1));
//! assert_eq!(linear.delay_for(3), Duration::from_secs(3));
//!
//! let expo = BackoffPolicy::exponential(Duration::from_secs(1));
//! assert_eq!(expo.delay_for(3), Duration::from_secs(4));
//! ```

use std::time::Duration;

use serde::Deserialize;

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `attempt × base`
    #[default]
    Linear,
    /// `2^(attempt-1) × base`
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base: Duration,
    /// Upper bound applied after growth.
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn linear(base: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base,
            max: Duration::MAX,
        }
    }

    pub fn exponential(base: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base,
            max: Duration::MAX,
        }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// Non-decreasing in `attempt` for both strategies.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let grown = match self.strategy {
            BackoffStrategy::Linear => self.base.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            }
        };
        grown.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let p = BackoffPolicy::linear(Duration::from_millis(500));
        let delays: Vec<_> = (1..=4).map(|a| p.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 1500, 2000]);
    }

    #[test]
    fn test_exponential_is_capped() {
        let p = BackoffPolicy::exponential(Duration::from_secs(1)).with_max(Duration::from_secs(10));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_schedule_never_decreases() {
        for p in [
            BackoffPolicy::linear(Duration::from_millis(250)),
            BackoffPolicy::exponential(Duration::from_millis(250)).with_max(Duration::from_secs(3)),
        ] {
            let mut prev = Duration::ZERO;
            for attempt in 0..64 {
                let d = p.delay_for(attempt);
                assert!(d >= prev, "{:?} decreased at attempt {}", p.strategy, attempt);
                prev = d;
            }
        }
    }
}
