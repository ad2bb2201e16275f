//! # Jitter for restart delays.
//!
//! Several servers supervised on one host that crash together (shared disk,
//! shared network outage) should not all relaunch in the same second.
//!
//! - [`JitterPolicy::None`]: exact delay (default);
//! - [`JitterPolicy::Full`]: random in `[0, delay]`;
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`;
//! - [`JitterPolicy::Decorrelated`]: random in `[first, delay × 3]`, capped.

use rand::Rng;
use std::time::Duration;

/// Randomization strategy applied to a base delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    #[default]
    None,
    Full,
    Equal,
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to `delay`.
    ///
    /// `Decorrelated` needs more context and returns `delay` unchanged here;
    /// use [`apply_decorrelated`](Self::apply_decorrelated).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => full(delay),
            JitterPolicy::Equal => equal(delay),
        }
    }

    /// Decorrelated jitter: random in `[floor, min(prev × 3, max)]`.
    ///
    /// Falls back to [`apply`](Self::apply) for the other variants.
    pub fn apply_decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }

        let floor_ms = floor.as_millis() as u64;
        let upper = (prev.as_millis() as u64)
            .saturating_mul(3)
            .min(max.as_millis() as u64)
            .max(floor_ms);

        if floor_ms >= upper {
            return floor;
        }
        Duration::from_millis(rand::rng().random_range(floor_ms..=upper))
    }
}

fn full(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

fn equal(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let half = ms / 2;
    if half == 0 {
        return delay;
    }
    Duration::from_millis(half + rand::rng().random_range(0..=half))
}
