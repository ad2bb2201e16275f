//! # Server updates.
//!
//! [`Installer`] is the downloader seam: it answers "what is the newest
//! build" and installs a given build. The supervisor decides *when* to ask
//! and what to do with the answer; [`UpdateStatus`] records the last answer.
//!
//! [`DownloaderCli`] drives the vendor's downloader executable.

mod downloader;

use std::time::SystemTime;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{InstallError, UpdateCheckError};
use crate::version::{self, VersionOrdering};

pub use downloader::DownloaderCli;

/// Fetches and places server builds.
#[async_trait]
pub trait Installer: Send + Sync + 'static {
    /// Version identifier of the newest available build.
    async fn remote_version(&self) -> Result<String, UpdateCheckError>;

    /// Downloads and installs `target` into the server directory.
    ///
    /// Long-running. Must return [`InstallError::Cancelled`] promptly once
    /// `cancel` fires, leaving the installed build untouched where possible.
    async fn fetch_and_install(
        &self,
        target: &str,
        cancel: CancellationToken,
    ) -> Result<(), InstallError>;
}

/// Outcome of one update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStatus {
    pub local_version: String,
    pub remote_version: String,
    pub ordering: VersionOrdering,
    /// `true` iff `ordering` is [`VersionOrdering::RemoteNewer`].
    pub update_available: bool,
    pub checked_at: SystemTime,
}

impl UpdateStatus {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        let (local_version, remote_version) = (local.into(), remote.into());
        let ordering = version::compare(&local_version, &remote_version);
        Self {
            update_available: ordering.update_available(),
            local_version,
            remote_version,
            ordering,
            checked_at: SystemTime::now(),
        }
    }
}
