//! # World backups.
//!
//! [`BackupManager`] snapshots the world directory before every start and
//! keeps the newest `max_backups` archives.
//!
//! ## Atomicity
//! ```text
//! archiver.archive(world, ".world_backup_<ts>.zip.partial")
//!   └─► rename → "world_backup_<ts>.zip"
//! ```
//! Readers listing the backup directory only ever see complete archives:
//! partial files are dot-prefixed and never match the archive pattern.
//!
//! ## Retention
//! Archives are ordered by creation time (modification time where the
//! filesystem has no birth time). Ties keep directory order. The oldest are
//! deleted until `max` remain; `max = 0` keeps everything.

mod archive;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::BackupError;

pub use archive::ZipArchiver;

const PREFIX: &str = "world_backup_";

/// Produces one archive of a directory.
#[async_trait]
pub trait Archiver: Send + Sync + 'static {
    /// Archives `source` into the file at `dest` (created or truncated).
    async fn archive(&self, source: &Path, dest: &Path) -> Result<(), BackupError>;

    /// File extension of produced archives, without the dot.
    fn extension(&self) -> &'static str {
        "zip"
    }
}

/// One archive on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: SystemTime,
    pub size_bytes: u64,
}

/// Creates, lists and prunes world archives.
#[derive(Clone)]
pub struct BackupManager {
    archiver: Arc<dyn Archiver>,
}

impl BackupManager {
    pub fn new(archiver: Arc<dyn Archiver>) -> Self {
        Self { archiver }
    }

    /// Archives `source` into a new timestamped file under `dest`.
    pub async fn create_backup(
        &self,
        source: &Path,
        dest: &Path,
    ) -> Result<BackupRecord, BackupError> {
        if !source.is_dir() {
            return Err(BackupError::SourceMissing {
                path: source.to_path_buf(),
            });
        }
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| BackupError::io(dest, e))?;

        let target = self.next_name(dest);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = dest.join(format!(".{file_name}.partial"));

        debug!(source = %source.display(), target = %target.display(), "archiving world");
        if let Err(e) = self.archiver.archive(source, &partial).await {
            if let Err(rm) = tokio::fs::remove_file(&partial).await
                && rm.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %partial.display(), error = %rm, "failed to remove partial archive");
            }
            return Err(e);
        }
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| BackupError::io(&target, e))?;

        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| BackupError::io(&target, e))?;
        let record = BackupRecord {
            created_at: created(&meta),
            size_bytes: meta.len(),
            path: target,
        };
        info!(path = %record.path.display(), size = record.size_bytes, "backup created");
        Ok(record)
    }

    /// Deletes the oldest archives beyond `max`; returns the deleted paths.
    pub fn enforce_retention(&self, dest: &Path, max: usize) -> Result<Vec<PathBuf>, BackupError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let records = self.list(dest)?;
        let excess = records.len().saturating_sub(max);
        let mut removed = Vec::with_capacity(excess);
        for record in records.into_iter().take(excess) {
            std::fs::remove_file(&record.path).map_err(|e| BackupError::io(&record.path, e))?;
            info!(path = %record.path.display(), "old backup removed");
            removed.push(record.path);
        }
        Ok(removed)
    }

    /// Archives under `dest`, oldest first. A missing directory has none.
    pub fn list(&self, dest: &Path) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = match std::fs::read_dir(dest) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(dest, e)),
        };
        let suffix = format!(".{}", self.archiver.extension());

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(dest, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(PREFIX) || !name.ends_with(&suffix) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| BackupError::io(entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            records.push(BackupRecord {
                path: entry.path(),
                created_at: created(&meta),
                size_bytes: meta.len(),
            });
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn next_name(&self, dest: &Path) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S_%3f");
        let ext = self.archiver.extension();
        let first = dest.join(format!("{PREFIX}{stamp}.{ext}"));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| dest.join(format!("{PREFIX}{stamp}_{n}.{ext}")))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }
}

fn created(meta: &std::fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
