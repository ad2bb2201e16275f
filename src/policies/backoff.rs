//! # Restart delay after a crash.
//!
//! [`BackoffPolicy`] maps the number of crashes already recorded inside the
//! crash window to the delay before the next automatic start:
//!
//! ```text
//! delay(n) = clamp(first × factor^n, max)   then jitter
//! ```
//!
//! The default tiers are 5s → 30s → 2min (`first=5s`, `factor=6`, `max=120s`).
//! The base delay depends only on `n`, so jitter never compounds across crashes.
//!
//! ```rust
//! use std::time::Duration;
//! use servervisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::default();
//! assert_eq!(backoff.next(0), Duration::from_secs(5));
//! assert_eq!(backoff.next(1), Duration::from_secs(30));
//! assert_eq!(backoff.next(2), Duration::from_secs(120));
//! assert_eq!(backoff.next(9), Duration::from_secs(120));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Crash-restart delay policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before restarting after the first crash in a window.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth per additional crash (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied on top of the base delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// 5s, 30s, 2min, then capped; no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(120),
            factor: 6.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the restart that follows `prior` earlier crashes in the window.
    pub fn next(&self, prior: u32) -> Duration {
        let exp = prior.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(first: u64, factor: f64, max: u64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(first),
            max: Duration::from_secs(max),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn default_tiers() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next(0), Duration::from_secs(5));
        assert_eq!(policy.next(1), Duration::from_secs(30));
        assert_eq!(policy.next(2), Duration::from_secs(120));
        assert_eq!(policy.next(3), Duration::from_secs(120));
    }

    #[test]
    fn constant_factor_keeps_first() {
        let policy = tiers(10, 1.0, 300);
        for n in 0..8 {
            assert_eq!(policy.next(n), Duration::from_secs(10), "crash #{n}");
        }
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = tiers(600, 2.0, 60);
        assert_eq!(policy.next(0), Duration::from_secs(60));
    }

    #[test]
    fn overflow_clamps_to_max() {
        let policy = tiers(5, 6.0, 120);
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn equal_jitter_stays_within_half_and_full_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..BackoffPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.next(1);
            assert!(d >= Duration::from_secs(15), "{d:?}");
            assert!(d <= Duration::from_secs(30), "{d:?}");
        }
    }

    #[test]
    fn decorrelated_jitter_never_below_first() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Decorrelated,
            ..BackoffPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.next(2);
            assert!(d >= Duration::from_secs(5), "{d:?}");
            assert!(d <= Duration::from_secs(120), "{d:?}");
        }
    }
}
