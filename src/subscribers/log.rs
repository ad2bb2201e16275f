//! # LogWriter: events as tracing records
//!
//! Renders every event as one `tracing` record under the `servervisor::events`
//! target. Failures log at `warn`/`error`, server output at `info` with the
//! stream as a field.
//!
//! ## Example output
//! ```text
//! INFO servervisor::events: [state] idle -> starting
//! INFO servervisor::events: [start] pid=4242
//! ERROR servervisor::events: [crash] pid=4242 exit=code 1 detail="exited 2s after start"
//! WARN servervisor::events: [backoff] delay_ms=5000 attempt=1
//! INFO servervisor::events: [output] stream=stdout line="World loaded"
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "servervisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let detail = e.detail.as_deref().unwrap_or("");
        match e.kind {
            EventKind::StateChanged => info!(target: TARGET, "[state] {detail}"),
            EventKind::Start => info!(target: TARGET, pid = ?e.pid, "[start]"),
            EventKind::Stop => info!(target: TARGET, pid = ?e.pid, exit = ?e.exit, "[stop]"),
            EventKind::Crash => {
                error!(target: TARGET, pid = ?e.pid, exit = ?e.exit, detail, "[crash]")
            }
            EventKind::LaunchFailed => error!(target: TARGET, detail, "[launch-failed]"),
            EventKind::BackoffScheduled => {
                warn!(target: TARGET, delay_ms = ?e.delay_ms, attempt = ?e.attempt, "[backoff]")
            }
            EventKind::RestartAfterCrash => {
                info!(target: TARGET, attempt = ?e.attempt, "[restart-after-crash]")
            }
            EventKind::CrashLoopExceeded => {
                error!(target: TARGET, crashes = ?e.attempt, detail, "[crash-loop]")
            }
            EventKind::UpdateAvailable => {
                info!(target: TARGET, version = ?e.version, detail, "[update-available]")
            }
            EventKind::UpdateCheckFailed => warn!(target: TARGET, detail, "[update-check-failed]"),
            EventKind::UpdateApplied => info!(target: TARGET, version = ?e.version, "[update-applied]"),
            EventKind::UpdateFailed => {
                error!(target: TARGET, version = ?e.version, detail, "[update-failed]")
            }
            EventKind::BackupCreated => info!(target: TARGET, path = ?e.path, "[backup]"),
            EventKind::BackupFailed => warn!(target: TARGET, detail, "[backup-failed]"),
            EventKind::ScheduledRestart => info!(target: TARGET, "[scheduled-restart]"),
            EventKind::FeatureChanged => info!(target: TARGET, detail, "[feature]"),
            EventKind::ServerOutput => {
                info!(target: TARGET, stream = e.stream.unwrap_or("?"), line = detail, "[output]")
            }
            EventKind::ShutdownRequested => info!(target: TARGET, "[shutdown-requested]"),
            EventKind::SubscriberOverflow => warn!(target: TARGET, detail, "[subscriber-overflow]"),
            EventKind::SubscriberPanicked => error!(target: TARGET, detail, "[subscriber-panicked]"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
