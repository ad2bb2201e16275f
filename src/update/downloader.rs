//! # Downloader-backed installer.
//!
//! ```text
//! remote_version():   <downloader> -print-version        → stdout, trimmed
//! fetch_and_install():
//!   rm -rf staging; mkdir staging
//!   <downloader> (cwd = staging)                         → output logged
//!   root = staging | staging/Server                      (first holding the jar)
//!   copy jar, aot, assets, Licenses/ → server dir        (via "<name>.new" + rename)
//!   rm -rf staging                                       (always)
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Installer;
use crate::config::Layout;
use crate::error::{InstallError, UpdateCheckError};

const LICENSES: &str = "Licenses";
const NESTED_ROOT: &str = "Server";

/// Runs an external downloader executable.
#[derive(Debug, Clone)]
pub struct DownloaderCli {
    program: PathBuf,
    args: Vec<String>,
    server_dir: PathBuf,
    staging_dir: PathBuf,
    /// Files copied from the downloaded build; the first one is mandatory.
    artifacts: Vec<String>,
    version_timeout: Duration,
}

impl DownloaderCli {
    /// Downloader at `program`, installing into `layout`.
    ///
    /// A relative path with a directory part (`./hytale-downloader`) is
    /// resolved against the current directory now, since downloads run with
    /// the staging directory as their working directory. Bare names are
    /// left to `PATH` lookup.
    pub fn new(program: impl Into<PathBuf>, layout: &Layout) -> Self {
        Self {
            program: resolve_program(program.into()),
            args: Vec::new(),
            server_dir: layout.server_dir.clone(),
            staging_dir: layout.staging_path(),
            artifacts: vec![
                layout.server_jar.clone(),
                layout.aot_cache.clone(),
                layout.assets.clone(),
                LICENSES.to_string(),
            ],
            version_timeout: Duration::from_secs(60),
        }
    }

    /// Leading argument passed on every invocation (e.g. `-jar downloader.jar`).
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn version_timeout(mut self, timeout: Duration) -> Self {
        self.version_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn download(&self, cancel: &CancellationToken) -> Result<(), InstallError> {
        let mut child = self
            .command()
            .current_dir(&self.staging_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InstallError::Failed {
                reason: format!("cannot run downloader {}: {e}", self.program.display()),
            })?;

        if let Some(out) = child.stdout.take() {
            tokio::spawn(log_lines(out));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(log_lines(err));
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| InstallError::Failed {
                reason: format!("downloader wait failed: {e}"),
            })?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill downloader");
                }
                return Err(InstallError::Cancelled);
            }
        };
        if !status.success() {
            return Err(InstallError::Failed {
                reason: format!("downloader exited with {status}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for DownloaderCli {
    async fn remote_version(&self) -> Result<String, UpdateCheckError> {
        let run = self
            .command()
            .arg("-print-version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(self.version_timeout, run)
            .await
            .map_err(|_| UpdateCheckError::Unavailable {
                reason: format!("no answer within {:?}", self.version_timeout),
            })?
            .map_err(|e| UpdateCheckError::Unavailable {
                reason: format!("cannot run downloader {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdateCheckError::Unavailable {
                reason: format!("downloader exited with {}: {}", output.status, stderr.trim()),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.trim();
        if version.is_empty() || version.contains(char::is_whitespace) {
            return Err(UpdateCheckError::Malformed {
                output: version.to_string(),
            });
        }
        Ok(version.to_string())
    }

    async fn fetch_and_install(
        &self,
        target: &str,
        cancel: CancellationToken,
    ) -> Result<(), InstallError> {
        let staging = self.staging_dir.clone();
        reset_dir(&staging).await?;
        info!(version = target, staging = %staging.display(), "downloading server build");

        let result: Result<(), InstallError> = async {
            self.download(&cancel).await?;
            if cancel.is_cancelled() {
                return Err(InstallError::Cancelled);
            }
            let root = locate_root(&staging, &self.artifacts[0])?;
            let server_dir = self.server_dir.clone();
            let artifacts = self.artifacts.clone();
            tokio::task::spawn_blocking(move || apply(&root, &server_dir, &artifacts))
                .await
                .map_err(|e| InstallError::Failed {
                    reason: format!("install task failed: {e}"),
                })?
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!(staging = %staging.display(), error = %e, "failed to clean staging");
        }
        if result.is_ok() {
            info!(version = target, "server build installed");
        }
        result
    }
}

fn resolve_program(program: PathBuf) -> PathBuf {
    if program.is_absolute() || program.components().count() < 2 {
        return program;
    }
    match std::path::absolute(&program) {
        Ok(abs) => abs,
        Err(e) => {
            warn!(program = %program.display(), error = %e, "cannot resolve downloader path");
            program
        }
    }
}

async fn reset_dir(dir: &Path) -> Result<(), InstallError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(InstallError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| InstallError::io(dir, e))
}

fn locate_root(staging: &Path, jar: &str) -> Result<PathBuf, InstallError> {
    [staging.to_path_buf(), staging.join(NESTED_ROOT)]
        .into_iter()
        .find(|root| root.join(jar).is_file())
        .ok_or_else(|| InstallError::MissingArtifact {
            path: staging.join(jar),
        })
}

fn apply(root: &Path, server_dir: &Path, artifacts: &[String]) -> Result<(), InstallError> {
    for name in artifacts {
        let src = root.join(name);
        let dest = server_dir.join(name);
        if src.is_dir() {
            if dest.exists() {
                std::fs::remove_dir_all(&dest).map_err(|e| InstallError::io(&dest, e))?;
            }
            copy_tree(&src, &dest)?;
        } else if src.is_file() {
            let tmp = server_dir.join(format!("{name}.new"));
            std::fs::copy(&src, &tmp).map_err(|e| InstallError::io(&tmp, e))?;
            std::fs::rename(&tmp, &dest).map_err(|e| InstallError::io(&dest, e))?;
        } else {
            debug!(artifact = %name, "not in downloaded build, skipped");
            continue;
        }
        info!(artifact = %name, "updated");
    }
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), InstallError> {
    std::fs::create_dir_all(dest).map_err(|e| InstallError::io(dest, e))?;
    for entry in std::fs::read_dir(src).map_err(|e| InstallError::io(src, e))? {
        let entry = entry.map_err(|e| InstallError::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| InstallError::io(&to, e))?;
        }
    }
    Ok(())
}

async fn log_lines<R: AsyncRead + Unpin>(reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "servervisor::downloader", "{line}");
    }
}
