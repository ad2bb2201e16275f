//! # ProcessHandle: tokio-backed process control.
//!
//! Owns at most one child at a time.
//!
//! ## Stop sequence
//! ```text
//! request_stop(record, grace)                 deadline = now + grace
//!   ├─ record not the live child → return (idempotent)
//!   ├─ stop_command set → write "<cmd>\n" to stdin (bounded by grace)
//!   │  otherwise, or write failed → SIGTERM (unix) / kill (other platforms)
//!   ├─ poll every 100ms until exit or deadline
//!   └─ still alive → kill, reap
//! ```
//!
//! stdin has its own lock: a server that stops reading its console can
//! stall a write, never `poll` or the kill fallback.
//!
//! ## Output
//! stdout and stderr are read line by line (lossy UTF-8) by two reader tasks
//! and published as `ServerOutput` events.
//!
//! Exit statuses observed by any path are cached per pid so `poll` reports
//! the same status regardless of who reaped the child.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LaunchSpec, ProcessControl, ProcessRecord, ProcessStatus};
use crate::error::LaunchError;
use crate::events::{Bus, Event, EventKind};

const STOP_POLL: Duration = Duration::from_millis(100);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);
const CONSOLE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedStdin = Arc<Mutex<ChildStdin>>;

struct Slot {
    pid: u32,
    child: Child,
    stdin: Option<SharedStdin>,
    stop_command: Option<String>,
}

#[derive(Default)]
struct Inner {
    live: Option<Slot>,
    finished: HashMap<u32, ProcessStatus>,
}

impl Inner {
    /// Non-blocking reap of `pid`; moves it to `finished` once exited.
    fn reap(&mut self, pid: u32) -> Option<ProcessStatus> {
        if let Some(status) = self.finished.get(&pid) {
            return Some(*status);
        }
        let slot = self.live.as_mut().filter(|s| s.pid == pid)?;
        match slot.child.try_wait() {
            Ok(Some(exit)) => {
                let status = to_status(exit);
                self.live = None;
                self.finished.insert(pid, status);
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(pid, error = %e, "try_wait failed; treating process as gone");
                let status = ProcessStatus::ExitedWithCode(-1);
                self.live = None;
                self.finished.insert(pid, status);
                Some(status)
            }
        }
    }
}

/// Real OS process control.
#[derive(Default)]
pub struct ProcessHandle {
    inner: Mutex<Inner>,
}

impl ProcessHandle {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessControl for ProcessHandle {
    async fn start(&self, spec: &LaunchSpec, output: &Bus) -> Result<ProcessRecord, LaunchError> {
        for path in &spec.requires {
            if !path.exists() {
                return Err(LaunchError::BinaryMissing { path: path.clone() });
            }
        }
        if spec.program.components().count() > 1 && !spec.program.exists() {
            return Err(LaunchError::BinaryMissing {
                path: spec.program.clone(),
            });
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LaunchError::BinaryMissing {
                    path: spec.program.clone(),
                }
            } else {
                LaunchError::Spawn { source }
            }
        })?;

        let Some(pid) = child.id() else {
            return Err(LaunchError::Spawn {
                source: std::io::Error::other("process exited before a pid was assigned"),
            });
        };
        info!(pid, command = %spec.command_line(), "server process spawned");

        if let Some(out) = child.stdout.take() {
            spawn_reader(out, "stdout", pid, output.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, "stderr", pid, output.clone());
        }
        let stdin = child.stdin.take().map(|s| Arc::new(Mutex::new(s)));

        let mut inner = self.inner.lock().await;
        if let Some(prev) = inner.live.as_ref() {
            warn!(
                pid = prev.pid,
                "replacing a live child record; previous process is no longer tracked"
            );
        }
        inner.finished.clear();
        inner.live = Some(Slot {
            pid,
            child,
            stdin,
            stop_command: spec.stop_command.clone(),
        });
        Ok(ProcessRecord::new(pid))
    }

    async fn request_stop(&self, record: &ProcessRecord, grace: Duration) {
        let pid = record.pid;
        let deadline = tokio::time::Instant::now() + grace;
        let stop = {
            let mut inner = self.inner.lock().await;
            if inner.reap(pid).is_some() {
                return;
            }
            let Some(slot) = inner.live.as_ref().filter(|s| s.pid == pid) else {
                return;
            };
            slot.stop_command.clone().zip(slot.stdin.clone())
        };

        let sent = match stop {
            Some((cmd, stdin)) => send_stop_command(pid, &cmd, &stdin, grace).await,
            None => false,
        };
        if !sent {
            let mut inner = self.inner.lock().await;
            if let Some(slot) = inner.live.as_mut().filter(|s| s.pid == pid) {
                terminate(slot);
            }
        }

        loop {
            if self.inner.lock().await.reap(pid).is_some() {
                debug!(pid, "server stopped within grace");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        warn!(pid, ?grace, "grace exceeded, killing server process");
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.live.as_mut().filter(|s| s.pid == pid) else {
            return;
        };
        if let Err(e) = slot.child.start_kill() {
            warn!(pid, error = %e, "kill failed");
        }
        match tokio::time::timeout(REAP_TIMEOUT, slot.child.wait()).await {
            Ok(Ok(exit)) => {
                inner.live = None;
                inner.finished.insert(pid, to_status(exit));
            }
            Ok(Err(e)) => warn!(pid, error = %e, "wait after kill failed"),
            Err(_) => warn!(pid, "process did not exit after kill"),
        }
    }

    async fn poll(&self, record: &ProcessRecord) -> ProcessStatus {
        let mut inner = self.inner.lock().await;
        match inner.reap(record.pid) {
            Some(status) => status,
            None if inner.live.as_ref().is_some_and(|s| s.pid == record.pid) => {
                ProcessStatus::Alive
            }
            // Unknown record: never started by this handle or history cleared.
            None => ProcessStatus::ExitedWithCode(-1),
        }
    }

    async fn send_line(&self, record: &ProcessRecord, line: &str) -> std::io::Result<()> {
        let stdin = self
            .inner
            .lock()
            .await
            .live
            .as_ref()
            .filter(|s| s.pid == record.pid)
            .and_then(|s| s.stdin.clone())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "server not running"))?;

        let line = format!("{line}\n");
        tokio::time::timeout(CONSOLE_WRITE_TIMEOUT, write_line(&stdin, &line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "server is not reading its console"))?
    }
}

async fn write_line(stdin: &Mutex<ChildStdin>, line: &str) -> std::io::Result<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Polite stop attempt; `false` when the caller should signal instead.
async fn send_stop_command(pid: u32, cmd: &str, stdin: &Mutex<ChildStdin>, limit: Duration) -> bool {
    let line = format!("{cmd}\n");
    match tokio::time::timeout(limit, write_line(stdin, &line)).await {
        Ok(Ok(())) => {
            info!(pid, command = cmd, "stop command sent");
            true
        }
        Ok(Err(e)) => {
            warn!(pid, error = %e, "stop command failed, signalling");
            false
        }
        Err(_) => {
            warn!(pid, ?limit, "stop command not accepted in time, signalling");
            false
        }
    }
}

#[cfg(unix)]
fn terminate(slot: &mut Slot) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    info!(pid = slot.pid, "sending SIGTERM");
    if let Err(e) = kill(Pid::from_raw(slot.pid as i32), Signal::SIGTERM) {
        warn!(pid = slot.pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(slot: &mut Slot) {
    info!(pid = slot.pid, "terminating process");
    if let Err(e) = slot.child.start_kill() {
        warn!(pid = slot.pid, error = %e, "terminate failed");
    }
}

fn to_status(exit: ExitStatus) -> ProcessStatus {
    if let Some(code) = exit.code() {
        return ProcessStatus::ExitedWithCode(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = exit.signal() {
            return ProcessStatus::ExitedWithSignal(sig);
        }
    }
    ProcessStatus::ExitedWithCode(-1)
}

fn spawn_reader<R>(reader: R, stream: &'static str, pid: u32, bus: Bus)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    bus.publish(
                        Event::new(EventKind::ServerOutput)
                            .with_pid(pid)
                            .with_stream(stream)
                            .with_detail(line),
                    );
                }
                Err(e) => {
                    debug!(pid, stream, error = %e, "output reader stopped");
                    break;
                }
            }
        }
    });
}
