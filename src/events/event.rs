//! # Lifecycle events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Lifecycle**: the six kinds delivered to notifiers (start, stop, crash,
//!   update applied, backup created/failed);
//! - **Recovery and updates**: backoff, crash-loop halt, update check outcomes;
//! - **Runtime**: state changes, server output, shutdown;
//! - **Subscriber**: fan-out diagnostics (overflow, panic).
//!
//! The [`Event`] struct carries a timestamp, a human-readable `detail`, and
//! optional structured fields depending on the kind. Events are immutable once
//! published.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use servervisor::{Event, EventKind, ServerState};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_state(ServerState::Running)
//!     .with_detail("starting -> running");
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.state, Some(ServerState::Running));
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::ServerState;
use crate::process::ProcessStatus;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Lifecycle ===
    /// Server process confirmed alive.
    ///
    /// Sets: `pid`.
    Start,

    /// Server process exited after a stop request (or a clean exit by policy).
    ///
    /// Sets: `pid`, `exit`.
    Stop,

    /// Server process exited without being asked to.
    ///
    /// Sets: `pid`, `exit`, `detail` (mentions early exits).
    Crash,

    /// A new server build was installed.
    ///
    /// Sets: `version`.
    UpdateApplied,

    /// A world snapshot was written.
    ///
    /// Sets: `path`.
    BackupCreated,

    /// The world snapshot failed.
    ///
    /// Sets: `detail` (error).
    BackupFailed,

    // === Recovery ===
    /// Launch attempt failed (binary missing, spawn refused, fatal backup).
    ///
    /// Sets: `detail` (error).
    LaunchFailed,

    /// Restart after a crash has been scheduled.
    ///
    /// Sets: `delay_ms`, `attempt`.
    BackoffScheduled,

    /// Backoff elapsed; starting again.
    ///
    /// Sets: `attempt`.
    RestartAfterCrash,

    /// Too many crashes inside the window; auto-restart halted.
    ///
    /// Sets: `attempt` (crash count), `detail`.
    CrashLoopExceeded,

    // === Updates ===
    /// Remote build is newer than the installed one.
    ///
    /// Sets: `version` (remote), `detail` (local → remote).
    UpdateAvailable,

    /// Remote version could not be determined this cycle.
    ///
    /// Sets: `detail` (error).
    UpdateCheckFailed,

    /// Installing the new build failed; the supervisor resumes its prior state.
    ///
    /// Sets: `version` (target), `detail` (error).
    UpdateFailed,

    // === Runtime ===
    /// Authoritative state changed.
    ///
    /// Sets: `state` (new state), `detail` (`from -> to`).
    StateChanged,

    /// Scheduled restart timer fired while running.
    ScheduledRestart,

    /// A feature toggle was changed through the command interface.
    ///
    /// Sets: `detail` (`name=enabled`).
    FeatureChanged,

    /// One line of server stdout/stderr.
    ///
    /// Sets: `detail` (line), `stream`.
    ServerOutput,

    /// Shutdown requested (command or OS signal).
    ShutdownRequested,

    // === Subscriber ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `detail` (subscriber + panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `detail` (subscriber + reason).
    SubscriberOverflow,
}

impl EventKind {
    /// True for the six kinds that notifiers deliver externally.
    #[inline]
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::Start
                | EventKind::Stop
                | EventKind::Crash
                | EventKind::UpdateApplied
                | EventKind::BackupCreated
                | EventKind::BackupFailed
        )
    }
}

/// Supervisor event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Human-readable detail (errors, transitions, output lines).
    pub detail: Option<Arc<str>>,
    /// New state (for `StateChanged`).
    pub state: Option<ServerState>,
    /// OS process id of the server, if applicable.
    pub pid: Option<u32>,
    /// Exit status (for `Stop`/`Crash`).
    pub exit: Option<ProcessStatus>,
    /// Delay before the next start in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Restart attempt / crash count.
    pub attempt: Option<u32>,
    /// Server version involved.
    pub version: Option<Arc<str>>,
    /// Filesystem path involved (backup archive).
    pub path: Option<PathBuf>,
    /// Output stream name (`stdout` / `stderr`).
    pub stream: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            detail: None,
            state: None,
            pid: None,
            exit: None,
            delay_ms: None,
            attempt: None,
            version: None,
            path: None,
            stream: None,
        }
    }

    #[inline]
    pub fn with_detail(mut self, detail: impl Into<Arc<str>>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[inline]
    pub fn with_state(mut self, state: ServerState) -> Self {
        self.state = Some(state);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_exit(mut self, exit: ProcessStatus) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_version(mut self, version: impl Into<Arc<str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[inline]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn with_stream(mut self, stream: &'static str) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Delay as a `Duration`, if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_detail(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_detail(format!("subscriber={subscriber} info={info}"))
    }
}
