//! Server process control.
//!
//! [`ProcessControl`] is the seam between the decision loop and the OS: start
//! one process, ask it to stop, poll its liveness. It does not interpret exits;
//! that is [`classify`](crate::classify).
//!
//! - [`LaunchSpec`] what to run (program, args, env, required files, stop command);
//! - [`ProcessHandle`] the tokio-backed implementation;
//! - [`ProcessRecord`] / [`ProcessStatus`] values exchanged with the loop;
//! - [`stop_stale_servers`] clears a server left behind by an earlier run.

mod handle;
mod launch;
mod stale;

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;

use crate::error::LaunchError;
use crate::events::Bus;

pub use handle::ProcessHandle;
pub use launch::LaunchSpec;
pub use stale::stop_stale_servers;

/// One live server process.
///
/// Created by [`ProcessControl::start`]; the supervisor drops it once the exit
/// has been observed. At most one record is live at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// OS process id.
    pub pid: u32,
    /// Monotonic start time (uptime, early-exit detection).
    pub started_at: Instant,
    /// Wall-clock start time (display).
    pub started_wall: SystemTime,
    /// Last-known liveness.
    pub alive: bool,
}

impl ProcessRecord {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: tokio::time::Instant::now().into_std(),
            started_wall: SystemTime::now(),
            alive: true,
        }
    }

    /// Time since start, on the tokio clock (pausable in tests).
    pub fn uptime(&self) -> Duration {
        tokio::time::Instant::now()
            .into_std()
            .saturating_duration_since(self.started_at)
    }
}

/// Result of a non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Alive,
    ExitedWithCode(i32),
    ExitedWithSignal(i32),
}

impl ProcessStatus {
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessStatus::Alive)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Alive => f.write_str("alive"),
            ProcessStatus::ExitedWithCode(c) => write!(f, "exit code {c}"),
            ProcessStatus::ExitedWithSignal(s) => write!(f, "signal {s}"),
        }
    }
}

/// OS process control used by the supervisor.
///
/// Implementations must be cheap to call from the decision loop: `poll` never
/// blocks, `request_stop` may take up to `grace` and is always run on a worker.
#[async_trait]
pub trait ProcessControl: Send + Sync + 'static {
    /// Launches the server. Output lines are published on `output`.
    async fn start(&self, spec: &LaunchSpec, output: &Bus) -> Result<ProcessRecord, LaunchError>;

    /// Graceful stop, then force-terminate after `grace`.
    ///
    /// No-op for a record that has already exited.
    async fn request_stop(&self, record: &ProcessRecord, grace: Duration);

    /// Non-blocking liveness check.
    async fn poll(&self, record: &ProcessRecord) -> ProcessStatus;

    /// Writes one console line to the process stdin.
    async fn send_line(&self, record: &ProcessRecord, line: &str) -> std::io::Result<()>;
}
