//! # Exit classification.
//!
//! Turns an observed process exit into the decision input the supervisor acts on.
//!
//! ## Rules
//! - stop requested by the supervisor before the exit → [`ExitClass::PlannedStop`],
//!   whatever the exit code or signal;
//! - otherwise → [`ExitClass::Crash`], **including** exit code `0`;
//! - a crash within `min_uptime` of start is flagged `early`; the crash
//!   tracker uses it to pick the backoff tier
//!   ([`CrashLoopPolicy::escalate_early`](crate::CrashLoopPolicy::escalate_early)).
//!
//! [`ClassifyPolicy::zero_exit_is_clean`] is an opt-in escape hatch: when set,
//! an unrequested exit with code `0` becomes [`ExitClass::CleanStop`].

use std::time::{Duration, Instant};

use crate::process::ProcessStatus;

/// Meaning of a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// The server shut itself down cleanly and policy accepts that as a stop.
    CleanStop,
    /// The supervisor asked the process to stop.
    PlannedStop,
    /// Unrequested exit.
    Crash {
        /// Exited within the minimum uptime after start.
        early: bool,
    },
}

impl ExitClass {
    #[inline]
    pub fn is_crash(self) -> bool {
        matches!(self, ExitClass::Crash { .. })
    }
}

/// Knobs for [`classify`].
#[derive(Debug, Clone, Copy)]
pub struct ClassifyPolicy {
    /// Exits sooner than this after start are flagged as early crashes.
    pub min_uptime: Duration,
    /// Treat an unrequested exit with code `0` as a clean stop (legacy behavior).
    pub zero_exit_is_clean: bool,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            min_uptime: Duration::from_secs(10),
            zero_exit_is_clean: false,
        }
    }
}

/// Classifies one process exit.
///
/// `status` must be an exit status; [`ProcessStatus::Alive`] is treated as an
/// unrequested exit with no code, which only happens if a caller misuses this.
pub fn classify(
    policy: &ClassifyPolicy,
    status: ProcessStatus,
    stop_requested: bool,
    up_since: Instant,
    now: Instant,
) -> ExitClass {
    if stop_requested {
        return ExitClass::PlannedStop;
    }
    if policy.zero_exit_is_clean && status == ProcessStatus::ExitedWithCode(0) {
        return ExitClass::CleanStop;
    }
    let uptime = now.saturating_duration_since(up_since);
    ExitClass::Crash {
        early: uptime < policy.min_uptime,
    }
}
