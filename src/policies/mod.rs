//! Crash recovery policies.
//!
//! This module groups the knobs that control **whether** a crashed server is
//! restarted automatically and **how long** to wait first.
//!
//! ## Contents
//! - [`CrashLoopPolicy`] / [`CrashTracker`] sliding-window crash accounting
//! - [`BackoffPolicy`] how restart delays grow (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied on top of the delay
//!
//! ## Quick wiring
//! ```text
//! Config { crash_loop: CrashLoopPolicy { window, max_restarts, backoff, escalate_early } }
//!      └─► core::engine on Crash:
//!           - CrashTracker::record(now, early) → Restart{delay} | Halt
//!           - Restart → CrashRecovering, sleep(delay), Starting
//!           - Halt    → Idle + CrashLoopExceeded
//! ```

mod backoff;
mod crash_loop;
mod jitter;

pub use backoff::BackoffPolicy;
pub use crash_loop::{CrashLoopPolicy, CrashTracker, CrashVerdict};
pub use jitter::JitterPolicy;
