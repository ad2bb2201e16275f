//! Leftover server processes from an earlier supervisor.
//!
//! ```text
//! stop_stale_servers(needle, grace)
//!   ├─ scan /proc/<pid>/cmdline for `needle` (own pid excluded)
//!   ├─ SIGTERM every match
//!   ├─ poll every 100ms until all gone or grace elapsed
//!   └─ SIGKILL the rest
//! ```
//!
//! Only Linux exposes command lines this way; elsewhere nothing is found.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

const STALE_POLL: Duration = Duration::from_millis(100);

/// Stops every process whose command line contains `needle`.
///
/// Returns the pids that were signalled.
pub async fn stop_stale_servers(needle: &str, grace: Duration) -> Vec<u32> {
    let owned = needle.to_string();
    let own = std::process::id();
    let pids = match tokio::task::spawn_blocking(move || scan(Path::new("/proc"), &owned, own)).await {
        Ok(pids) => pids,
        Err(e) => {
            warn!(error = %e, "stale process scan failed");
            return Vec::new();
        }
    };
    if pids.is_empty() {
        debug!(needle, "no stale server process");
        return pids;
    }

    for &pid in &pids {
        info!(pid, needle, "stopping stale server process");
        signal(pid, false);
    }
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let remaining: Vec<u32> = pids.iter().copied().filter(|&pid| alive(pid)).collect();
        if remaining.is_empty() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            for pid in remaining {
                warn!(pid, "stale server ignored SIGTERM, killing");
                signal(pid, true);
            }
            break;
        }
        tokio::time::sleep(STALE_POLL).await;
    }
    pids
}

/// Pids under `proc_root` whose NUL-separated cmdline contains `needle`.
fn scan(proc_root: &Path, needle: &str, own: u32) -> Vec<u32> {
    if needle.is_empty() {
        return Vec::new();
    }
    let entries = match std::fs::read_dir(proc_root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %proc_root.display(), error = %e, "process table unavailable");
            return Vec::new();
        }
    };
    let mut pids: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            if pid == own {
                return None;
            }
            let raw = std::fs::read(entry.path().join("cmdline")).ok()?;
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            cmdline.contains(needle).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

#[cfg(unix)]
fn signal(pid: u32, force: bool) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        debug!(pid, error = %e, "signal not delivered");
    }
}

#[cfg(unix)]
fn alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn signal(pid: u32, _force: bool) {
    debug!(pid, "stale process signalling not supported on this platform");
}

#[cfg(not(unix))]
fn alive(_pid: u32) -> bool {
    false
}
