//! Messages consumed by the decision loop.
//!
//! [`Command`]s come from the presentation layer through
//! [`SupervisorHandle`](crate::SupervisorHandle); everything else in [`Msg`]
//! is posted by workers and timers. Worker results carry the operation id
//! they were started under so the loop can drop results it no longer wants.

use tokio::sync::oneshot;

use crate::backup::BackupRecord;
use crate::error::{BackupError, InstallError, LaunchError, UpdateCheckError};
use crate::process::{ProcessRecord, ProcessStatus};
use crate::settings::Feature;

/// User commands.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    RestartNow,
    /// Already applied to the settings store; the loop only reacts.
    FeatureChanged {
        feature: Feature,
        enabled: bool,
    },
    SendConsole(String),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) enum Msg {
    Cmd(Command),

    /// Pre-start snapshot finished.
    BackupDone {
        op: u64,
        result: Result<BackupRecord, BackupError>,
        listing: Vec<BackupRecord>,
    },
    Launched {
        op: u64,
        result: Result<ProcessRecord, LaunchError>,
    },
    /// Observed exit of the process started under generation `run`.
    Exited {
        run: u64,
        status: ProcessStatus,
    },
    CheckDone {
        op: u64,
        result: Result<String, UpdateCheckError>,
    },
    InstallDone {
        op: u64,
        version: String,
        result: Result<(), InstallError>,
    },
    BackoffElapsed {
        op: u64,
    },

    UpdateTick,
    RestartTick {
        run: u64,
    },
}
