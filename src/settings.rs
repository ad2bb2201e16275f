//! # Persisted user settings.
//!
//! [`Settings`] is the durable key/value object the presentation layer edits
//! (memory, feature toggles, intervals). [`SettingsStore`] owns the live value
//! and persists it as pretty JSON; missing keys in the file fall back to
//! [`Settings::default`], unknown keys are ignored. Files written by older
//! managers (`enable_discord`, `discord_webhook`, `restart_interval`) load
//! into the current fields and are rewritten with the current names.
//!
//! The decision loop never holds a reference into the store: it calls
//! [`SettingsStore::snapshot`] once per decision and works on that copy, so a
//! concurrent edit can never tear a decision in half.
//!
//! ## Features
//! [`Feature`] names the boolean toggles reachable through the
//! `SetFeature(name, enabled)` command:
//!
//! | name           | field                 |
//! |----------------|-----------------------|
//! | `backups`      | `enable_backups`      |
//! | `webhook`      | `enable_webhook`      |
//! | `auto_restart` | `enable_auto_restart` |
//! | `schedule`     | `enable_schedule`     |
//! | `check_updates`| `check_updates`       |
//! | `auto_start`   | `auto_start`          |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RuntimeError, SettingsError};

/// User-facing persisted settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Version of the installed server build (`0.0.0` = never installed).
    pub last_server_version: String,
    /// Run periodic update checks (and one at startup).
    pub check_updates: bool,
    /// Start the server as soon as the supervisor loop starts.
    pub auto_start: bool,
    /// Snapshot the world before every start.
    pub enable_backups: bool,
    /// Archives to keep.
    pub max_backups: usize,
    /// Abort the start when the snapshot fails.
    pub backup_failure_fatal: bool,
    /// Deliver lifecycle events to `webhook_url`.
    #[serde(alias = "enable_discord")]
    pub enable_webhook: bool,
    #[serde(alias = "discord_webhook")]
    pub webhook_url: String,
    /// Restart automatically after a crash.
    pub enable_auto_restart: bool,
    /// Restart on a schedule while running.
    pub enable_schedule: bool,
    /// Hours between scheduled restarts, measured from server start.
    #[serde(alias = "restart_interval")]
    pub restart_interval_hours: f64,
    /// Daily wall-clock restart times (`HH:MM`, local); takes precedence over the interval.
    pub restart_at: Vec<String>,
    /// JVM heap size, e.g. `8G`.
    pub server_memory: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_server_version: "0.0.0".to_string(),
            check_updates: true,
            auto_start: false,
            enable_backups: true,
            max_backups: 3,
            backup_failure_fatal: false,
            enable_webhook: false,
            webhook_url: String::new(),
            enable_auto_restart: true,
            enable_schedule: false,
            restart_interval_hours: 12.0,
            restart_at: Vec::new(),
            server_memory: "8G".to_string(),
        }
    }
}

impl Settings {
    /// Scheduled-restart interval; `None` when not positive or out of range.
    pub fn restart_interval(&self) -> Option<Duration> {
        let secs = self.restart_interval_hours * 3600.0;
        if secs <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs).ok()
    }

    /// Parsed `restart_at` entries; malformed entries are skipped with a warning.
    pub fn restart_times(&self) -> Vec<NaiveTime> {
        self.restart_at
            .iter()
            .filter_map(|raw| match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(entry = %raw, error = %e, "ignoring malformed restart time");
                    None
                }
            })
            .collect()
    }

    /// Webhook URL if delivery is enabled and a URL is set.
    pub fn webhook(&self) -> Option<&str> {
        let url = self.webhook_url.trim();
        (self.enable_webhook && !url.is_empty()).then_some(url)
    }

    pub fn feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::Backups => self.enable_backups,
            Feature::Webhook => self.enable_webhook,
            Feature::AutoRestart => self.enable_auto_restart,
            Feature::Schedule => self.enable_schedule,
            Feature::CheckUpdates => self.check_updates,
            Feature::AutoStart => self.auto_start,
        }
    }

    pub fn set_feature(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::Backups => &mut self.enable_backups,
            Feature::Webhook => &mut self.enable_webhook,
            Feature::AutoRestart => &mut self.enable_auto_restart,
            Feature::Schedule => &mut self.enable_schedule,
            Feature::CheckUpdates => &mut self.check_updates,
            Feature::AutoStart => &mut self.auto_start,
        };
        *slot = enabled;
    }
}

/// Boolean toggles reachable through `SetFeature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Backups,
    Webhook,
    AutoRestart,
    Schedule,
    CheckUpdates,
    AutoStart,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Backups => "backups",
            Feature::Webhook => "webhook",
            Feature::AutoRestart => "auto_restart",
            Feature::Schedule => "schedule",
            Feature::CheckUpdates => "check_updates",
            Feature::AutoStart => "auto_start",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "backups" | "enable_backups" => Ok(Feature::Backups),
            "webhook" | "enable_webhook" | "discord" => Ok(Feature::Webhook),
            "auto_restart" | "enable_auto_restart" => Ok(Feature::AutoRestart),
            "schedule" | "enable_schedule" => Ok(Feature::Schedule),
            "check_updates" | "updates" => Ok(Feature::CheckUpdates),
            "auto_start" => Ok(Feature::AutoStart),
            _ => Err(RuntimeError::UnknownFeature {
                name: s.to_string(),
            }),
        }
    }
}

/// Shared handle to the live settings and (optionally) their file.
///
/// Cheap to clone.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
    path: Option<Arc<PathBuf>>,
}

impl SettingsStore {
    /// In-memory store; nothing is persisted.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
            path: None,
        }
    }

    /// Loads `path`, or starts from defaults when the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file missing, using defaults");
                Settings::default()
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            path: Some(Arc::new(path)),
        })
    }

    /// Point-in-time copy used for one decision.
    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Applies `f` to the live settings and persists the result.
    ///
    /// The in-memory value is updated even when persisting fails. The write
    /// lock is held until the file is replaced, so the file always reflects
    /// the last update.
    pub fn update<F>(&self, f: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut g = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut g);
        let updated = g.clone();
        self.persist(&updated)?;
        Ok(updated)
    }

    /// File backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let io_err = |source| SettingsError::Io {
            path: path.clone(),
            source,
        };
        let raw = serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Parse {
            path: path.clone(),
            source,
        })?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
        std::fs::write(&tmp, raw).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::load(dir.path().join("manager.json")).unwrap();
        assert_eq!(store.snapshot(), Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.json");
        std::fs::write(&path, r#"{"server_memory":"4G","max_backups":5,"legacy":true}"#).unwrap();

        let s = SettingsStore::load(&path).unwrap().snapshot();
        assert_eq!(s.server_memory, "4G");
        assert_eq!(s.max_backups, 5);
        assert!(s.enable_auto_restart);
        assert_eq!(s.last_server_version, "0.0.0");
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("manager.json");
        let store = SettingsStore::load(&path).unwrap();

        store
            .update(|s| {
                s.last_server_version = "1.5.0".into();
                s.set_feature(Feature::Schedule, true);
            })
            .unwrap();

        let reloaded = SettingsStore::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.last_server_version, "1.5.0");
        assert!(reloaded.feature(Feature::Schedule));
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("manager.json")]);
    }

    #[test]
    fn concurrent_updates_reach_the_file_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.json");
        let store = SettingsStore::load(&path).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .update(|s| match t {
                                0 => s.max_backups = i,
                                1 => s.last_server_version = format!("1.{i}.0"),
                                2 => s.server_memory = format!("{i}G"),
                                _ => s.enable_schedule = i % 2 == 0,
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let on_disk = SettingsStore::load(&path).unwrap().snapshot();
        assert_eq!(on_disk, store.snapshot());
        assert_eq!(on_disk.max_backups, 49);
        assert_eq!(on_disk.last_server_version, "1.49.0");
        assert_eq!(on_disk.server_memory, "49G");
    }

    #[test]
    fn legacy_keys_are_understood() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager_config.json");
        std::fs::write(
            &path,
            r#"{"enable_discord":true,"discord_webhook":"https://x/hook","restart_interval":6}"#,
        )
        .unwrap();

        let store = SettingsStore::load(&path).unwrap();
        let s = store.snapshot();
        assert!(s.enable_webhook);
        assert_eq!(s.webhook_url, "https://x/hook");
        assert_eq!(s.restart_interval_hours, 6.0);
        assert_eq!(s.webhook(), Some("https://x/hook"));

        store.update(|s| s.max_backups = 4).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"webhook_url\""));
        assert!(!raw.contains("discord_webhook"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manager.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = SettingsStore::load(&path).unwrap_err();
        assert_eq!(err.as_label(), "settings_parse");
    }

    #[test]
    fn snapshot_is_detached() {
        let store = SettingsStore::in_memory(Settings::default());
        let before = store.snapshot();
        store.update(|s| s.max_backups = 10).unwrap();
        assert_eq!(before.max_backups, 3);
        assert_eq!(store.snapshot().max_backups, 10);
    }

    #[test]
    fn feature_names_parse() {
        assert_eq!("auto-restart".parse::<Feature>().unwrap(), Feature::AutoRestart);
        assert_eq!("Backups".parse::<Feature>().unwrap(), Feature::Backups);
        assert!("turbo".parse::<Feature>().is_err());
    }

    #[test]
    fn restart_schedule_helpers() {
        let s = Settings {
            restart_at: vec!["04:30".into(), "nope".into()],
            restart_interval_hours: 0.5,
            ..Settings::default()
        };
        assert_eq!(s.restart_times(), vec![NaiveTime::from_hms_opt(4, 30, 0).unwrap()]);
        assert_eq!(s.restart_interval(), Some(Duration::from_secs(1800)));

        let off = Settings {
            restart_interval_hours: 0.0,
            ..Settings::default()
        };
        assert_eq!(off.restart_interval(), None);

        for hours in [1e16, f64::INFINITY, f64::NAN, -3.0] {
            let huge = Settings {
                restart_interval_hours: hours,
                ..Settings::default()
            };
            assert_eq!(huge.restart_interval(), None, "{hours}");
        }
    }

    #[test]
    fn webhook_requires_flag_and_url() {
        let mut s = Settings::default();
        s.webhook_url = "https://example.invalid/hook".into();
        assert_eq!(s.webhook(), None);
        s.enable_webhook = true;
        assert_eq!(s.webhook(), Some("https://example.invalid/hook"));
        s.webhook_url = "  ".into();
        assert_eq!(s.webhook(), None);
    }
}
