//! Zip archiver for world directories.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::Archiver;
use crate::error::BackupError;

/// Writes a deflated zip of a directory tree.
///
/// Entry names are relative to the archived directory and use `/`.
#[derive(Debug, Clone, Copy)]
pub struct ZipArchiver {
    compression: CompressionMethod,
}

impl Default for ZipArchiver {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ZipArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores entries uncompressed.
    pub fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn archive(&self, source: &Path, dest: &Path) -> Result<(), BackupError> {
        let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
        let method = self.compression;
        tokio::task::spawn_blocking(move || write_zip(&source, &dest, method))
            .await
            .map_err(|e| BackupError::Archive {
                reason: format!("archiver task failed: {e}"),
            })?
    }
}

fn write_zip(source: &Path, dest: &Path, method: CompressionMethod) -> Result<(), BackupError> {
    let file = File::create(dest).map_err(|e| BackupError::io(dest, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(method);

    add_dir(&mut zip, source, source, options)?;

    let file = zip.finish().map_err(archive_err)?;
    file.sync_all().map_err(|e| BackupError::io(dest, e))
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<(), BackupError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| BackupError::io(dir, e))?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<_>>()
        .map_err(|e| BackupError::io(dir, e))?;
    entries.sort();

    for path in entries {
        let name = entry_name(root, &path);
        let meta = std::fs::metadata(&path).map_err(|e| BackupError::io(&path, e))?;
        if meta.is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(archive_err)?;
            add_dir(zip, root, &path, options)?;
        } else if meta.is_file() {
            zip.start_file(name, options).map_err(archive_err)?;
            let mut input = File::open(&path).map_err(|e| BackupError::io(&path, e))?;
            io::copy(&mut input, zip).map_err(|e| BackupError::io(&path, e))?;
        }
    }
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn archive_err(e: zip::result::ZipError) -> BackupError {
    BackupError::Archive {
        reason: e.to_string(),
    }
}
