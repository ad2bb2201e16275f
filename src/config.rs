//! # Runtime configuration.
//!
//! [`Config`] holds the code-level knobs of the supervisor: timing, crash
//! policy and on-disk [`Layout`]. It is fixed when the supervisor is built.
//! User-editable values (memory, toggles, intervals) live in
//! [`Settings`](crate::Settings) instead and are re-read on every decision.
//!
//! ## Sentinel values
//! - `update_check_interval = 0s` → periodic update checks disabled
//! - `startup_update_check = false` → no check when the loop starts

use std::path::PathBuf;
use std::time::Duration;

use crate::classify::ClassifyPolicy;
use crate::policies::CrashLoopPolicy;

/// Supervisor runtime configuration.
///
/// ## Field semantics
/// - `grace`: time a stopping server gets before it is force-terminated
/// - `poll_interval`: liveness poll period of the exit watcher
/// - `update_check_interval`: period of the update-check timer (`0s` = off)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `crash_loop`: crash window, restart budget and backoff tiers
/// - `min_uptime`: exits sooner than this are flagged as early crashes
/// - `zero_exit_is_clean`: legacy treatment of unrequested exit code 0
/// - `stop_stale_server`: stop leftover server processes before the loop starts
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for a graceful stop before force-terminating.
    pub grace: Duration,

    /// How often the exit watcher polls the live process.
    pub poll_interval: Duration,

    /// Period of the update-check timer.
    pub update_check_interval: Duration,

    /// Run one update check (from `Idle`) when the loop starts.
    pub startup_update_check: bool,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Crash window, restart budget and backoff tiers.
    pub crash_loop: CrashLoopPolicy,

    /// Exits sooner than this after start are flagged as early crashes.
    pub min_uptime: Duration,

    /// Treat an unrequested exit with code 0 as a clean stop.
    pub zero_exit_is_clean: bool,

    /// Before the loop starts, stop processes whose command line names the
    /// server jar (a server left behind by an earlier supervisor). Linux only.
    pub stop_stale_server: bool,

    /// Where the server, its world and its backups live.
    pub layout: Layout,
}

impl Config {
    /// Update-check period as an `Option` (`None` = disabled).
    #[inline]
    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_check_interval > Duration::ZERO).then_some(self.update_check_interval)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    pub(crate) fn classify_policy(&self) -> ClassifyPolicy {
        ClassifyPolicy {
            min_uptime: self.min_uptime,
            zero_exit_is_clean: self.zero_exit_is_clean,
        }
    }
}

impl Default for Config {
    /// - `grace = 30s`
    /// - `poll_interval = 1s`
    /// - `update_check_interval = 30min`
    /// - `startup_update_check = true`
    /// - `bus_capacity = 1024`
    /// - `crash_loop = CrashLoopPolicy::default()` (3 restarts / 5min; 5s, 30s, 2min)
    /// - `min_uptime = 10s`
    /// - `zero_exit_is_clean = false`
    /// - `stop_stale_server = false`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            update_check_interval: Duration::from_secs(30 * 60),
            startup_update_check: true,
            bus_capacity: 1024,
            crash_loop: CrashLoopPolicy::default(),
            min_uptime: Duration::from_secs(10),
            zero_exit_is_clean: false,
            stop_stale_server: false,
            layout: Layout::default(),
        }
    }
}

/// On-disk layout of a dedicated-server installation.
///
/// Relative entries are resolved against `server_dir`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub server_dir: PathBuf,
    /// Java executable (looked up on `PATH` when bare).
    pub java: PathBuf,
    pub server_jar: String,
    pub aot_cache: String,
    pub assets: String,
    pub world_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Staging directory for downloads.
    pub staging_dir: PathBuf,
    /// Console line that shuts the server down.
    pub stop_command: Option<String>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("."),
            java: PathBuf::from("java"),
            server_jar: "HytaleServer.jar".to_string(),
            aot_cache: "HytaleServer.aot".to_string(),
            assets: "Assets.zip".to_string(),
            world_dir: PathBuf::from("universe/worlds"),
            backup_dir: PathBuf::from("universe/backups"),
            staging_dir: PathBuf::from("updater_staging"),
            stop_command: Some("stop".to_string()),
        }
    }
}

impl Layout {
    fn resolve(&self, p: impl Into<PathBuf>) -> PathBuf {
        let p = p.into();
        if p.is_absolute() {
            p
        } else {
            self.server_dir.join(p)
        }
    }

    pub fn jar_path(&self) -> PathBuf {
        self.resolve(&self.server_jar)
    }

    pub fn aot_path(&self) -> PathBuf {
        self.resolve(&self.aot_cache)
    }

    pub fn assets_path(&self) -> PathBuf {
        self.resolve(&self.assets)
    }

    pub fn world_path(&self) -> PathBuf {
        self.resolve(&self.world_dir)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.resolve(&self.backup_dir)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.resolve(&self.staging_dir)
    }
}
