//! Error types used by the supervisor and its collaborators.
//!
//! Every collaborator call made by the decision loop has its own error enum:
//!
//! - [`LaunchError`]: the server process could not be started.
//! - [`BackupError`]: the pre-start world snapshot failed.
//! - [`UpdateCheckError`]: the remote version could not be determined.
//! - [`InstallError`]: fetching or placing a new server build failed.
//! - [`SettingsError`]: the persisted settings file could not be read or written.
//! - [`RuntimeError`]: errors raised by the supervisor handle itself.
//!
//! All of them provide `as_label` (a stable snake_case label for logs/metrics).
//! None of them ever escape the decision loop: they are converted to
//! [`Event`](crate::Event)s at the call site.

use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// # Errors produced while launching the server process.
///
/// Fatal to the current start attempt; never retried automatically.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The configured program does not exist.
    #[error("server binary not found: {}", path.display())]
    BinaryMissing {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The OS refused to spawn the process.
    #[error("failed to spawn server process: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pre-start backup failed and policy marks backup failures as fatal.
    #[error("start aborted, backup failed: {reason}")]
    BackupRequired {
        /// Backup failure message.
        reason: String,
    },
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::BinaryMissing { .. } => "launch_binary_missing",
            LaunchError::Spawn { .. } => "launch_spawn_failed",
            LaunchError::BackupRequired { .. } => "launch_backup_required",
        }
    }
}

/// # Errors produced by the backup manager or the archiver.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackupError {
    /// The directory to archive does not exist.
    #[error("backup source not found: {}", path.display())]
    SourceMissing {
        /// Missing source directory.
        path: PathBuf,
    },

    /// Filesystem error while writing, renaming or pruning archives.
    #[error("backup i/o error at {}: {source}", path.display())]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The archive format writer failed.
    #[error("archive error: {reason}")]
    Archive {
        /// Archiver message.
        reason: String,
    },
}

impl BackupError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackupError::SourceMissing { .. } => "backup_source_missing",
            BackupError::Io { .. } => "backup_io",
            BackupError::Archive { .. } => "backup_archive",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }
}

/// # Errors produced while querying the remote version.
///
/// Treated as "no update available this cycle"; the next timer fire retries.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UpdateCheckError {
    /// The version source could not be reached or exited unsuccessfully.
    #[error("version query failed: {reason}")]
    Unavailable {
        /// Failure message.
        reason: String,
    },

    /// The version source answered with something that is not a version.
    #[error("malformed version output: {output:?}")]
    Malformed {
        /// Raw output.
        output: String,
    },

    /// The check was preempted by a higher-priority event.
    #[error("update check cancelled")]
    Cancelled,
}

impl UpdateCheckError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            UpdateCheckError::Unavailable { .. } => "update_check_unavailable",
            UpdateCheckError::Malformed { .. } => "update_check_malformed",
            UpdateCheckError::Cancelled => "update_check_cancelled",
        }
    }
}

/// # Errors produced by the downloader/installer.
///
/// Aborts the update path; the supervisor returns to its prior state.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InstallError {
    /// The downloader reported failure.
    #[error("install failed: {reason}")]
    Failed {
        /// Failure message.
        reason: String,
    },

    /// The downloaded build does not contain a required file.
    #[error("downloaded build is missing {}", path.display())]
    MissingArtifact {
        /// Expected artifact path.
        path: PathBuf,
    },

    /// Filesystem error while staging or placing files.
    #[error("install i/o error at {}: {source}", path.display())]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The install was preempted by a higher-priority event.
    #[error("install cancelled")]
    Cancelled,
}

impl InstallError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InstallError::Failed { .. } => "install_failed",
            InstallError::MissingArtifact { .. } => "install_missing_artifact",
            InstallError::Io { .. } => "install_io",
            InstallError::Cancelled => "install_cancelled",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }
}

/// # Errors produced by the settings store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Reading or writing the settings file failed.
    #[error("settings i/o error at {}: {source}", path.display())]
    Io {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`](crate::Settings).
    #[error("settings file {} is invalid: {source}", path.display())]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl SettingsError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SettingsError::Io { .. } => "settings_io",
            SettingsError::Parse { .. } => "settings_parse",
        }
    }
}

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The decision loop has halted; commands can no longer be delivered.
    #[error("supervisor loop is not running")]
    SupervisorGone,

    /// `SetFeature` was called with a name that is not a known toggle.
    #[error("unknown feature {name:?}")]
    UnknownFeature {
        /// Name that failed to parse.
        name: String,
    },

    /// Too many crashes inside the crash window; automatic restarts are halted.
    #[error("crash loop: {crashes} crashes within {window:?}; auto-restart halted")]
    CrashLoopExceeded {
        /// Crashes recorded inside the window.
        crashes: usize,
        /// Configured window.
        window: Duration,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use servervisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::SupervisorGone.as_label(), "runtime_supervisor_gone");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::SupervisorGone => "runtime_supervisor_gone",
            RuntimeError::UnknownFeature { .. } => "runtime_unknown_feature",
            RuntimeError::CrashLoopExceeded { .. } => "runtime_crash_loop_exceeded",
        }
    }
}
