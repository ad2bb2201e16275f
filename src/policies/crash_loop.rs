//! # Crash-loop detection.
//!
//! [`CrashTracker`] remembers when recent crashes happened. Each new crash
//! prunes entries older than [`CrashLoopPolicy::window`] and then either
//! schedules a restart with a [`BackoffPolicy`] delay or declares a crash loop.
//!
//! ```text
//! crash #1 in window → Restart(5s)
//! crash #2 in window → Restart(30s)
//! crash #3 in window → Restart(2min)
//! crash #4 in window → Halt            (max_restarts = 3)
//! ```
//!
//! An early crash (see [`classify`](crate::classify)) counts like any other
//! against `max_restarts`. With [`CrashLoopPolicy::escalate_early`] set it
//! also skips one backoff tier, so a server that dies right after launch
//! waits 30s instead of 5s on its first restart.
//!
//! Only an explicit user start clears the history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::BackoffPolicy;

/// Thresholds for automatic crash recovery.
#[derive(Clone, Copy, Debug)]
pub struct CrashLoopPolicy {
    /// Sliding window crashes are counted in.
    pub window: Duration,
    /// Automatic restarts allowed inside one window.
    pub max_restarts: u32,
    /// Delay schedule for the allowed restarts.
    pub backoff: BackoffPolicy,
    /// Early crashes use the next backoff tier up.
    pub escalate_early: bool,
}

impl Default for CrashLoopPolicy {
    /// 3 restarts per 5 minutes, delays 5s / 30s / 2min.
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            max_restarts: 3,
            backoff: BackoffPolicy::default(),
            escalate_early: false,
        }
    }
}

/// What to do after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// Restart after `delay`; `attempt` is the 1-based restart number inside the window.
    Restart { delay: Duration, attempt: u32 },
    /// Too many crashes; stop restarting until a user intervenes.
    Halt { crashes: usize },
}

/// Sliding-window crash history.
#[derive(Debug, Default)]
pub struct CrashTracker {
    crashes: VecDeque<Instant>,
}

impl CrashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a crash at `now` and returns the verdict under `policy`.
    ///
    /// `early` is the classifier's flag for an exit shortly after start.
    pub fn record(&mut self, policy: &CrashLoopPolicy, now: Instant, early: bool) -> CrashVerdict {
        while let Some(&oldest) = self.crashes.front() {
            if now.saturating_duration_since(oldest) > policy.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        self.crashes.push_back(now);

        let count = self.crashes.len();
        if count > policy.max_restarts as usize {
            return CrashVerdict::Halt { crashes: count };
        }
        let attempt = count as u32;
        let tier = if early && policy.escalate_early {
            attempt
        } else {
            attempt - 1
        };
        CrashVerdict::Restart {
            delay: policy.backoff.next(tier),
            attempt,
        }
    }

    /// Crashes currently inside the window (as of the last `record`).
    pub fn len(&self) -> usize {
        self.crashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crashes.is_empty()
    }

    /// Forgets all history (explicit user start).
    pub fn reset(&mut self) {
        self.crashes.clear();
    }
}
