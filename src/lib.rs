//! # servervisor
//!
//! **Servervisor** keeps one long-running dedicated game server alive.
//!
//! It launches the server, watches it, classifies every exit, restarts it
//! after crashes with tiered backoff (halting on crash loops), snapshots the
//! world before each start, restarts on a schedule, and installs new server
//! builds when the remote version is newer. Everything it does is published
//! as an [`Event`] and fanned out to subscribers (structured logs, webhooks).
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   SupervisorHandle           timers                    exit watcher
//!  (start / stop / ...)  (update check, restart)       (polls the pid)
//!          │                     │                           │
//!          └──────────► mpsc ◄───┴───────────────────────────┘
//!                         │          ▲ results tagged with op / run
//!                         ▼          │
//! ┌──────────────────────────────────┴────────────────────────────────┐
//! │  decision loop (single owner of ServerState)                      │
//! │  - classify exits, crash tracker, backoff                         │
//! │  - spawns workers: backup, launch, stop, update check, install    │
//! │  - publishes watch views: state, update status, backups, live pid │
//! └──────────────────────────────────┬────────────────────────────────┘
//!                                    ▼ publish(Event)
//!                         Bus (broadcast channel)
//!                                    ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                         ┌─────────┼─────────┐
//!                         ▼         ▼         ▼
//!                     LogWriter  Webhook   custom
//! ```
//!
//! ### Lifecycle
//! ```text
//! Idle ─Start─► Starting ─[backup]─[launch]─► Running
//!                                               │
//!     ┌─────────────────────────────────────────┼───────────────────────────┐
//!     ▼                                         ▼                           ▼
//! Stop: StoppingRequested ─► Idle     crash: CrashRecovering      UpdateTick: CheckingUpdate
//! tick/RestartNow: Restarting ─► Starting       │ 5s / 30s / 2min          │ newer
//!                                               ▼                           ▼
//!                                  Starting, or Idle after           Updating: stop,
//!                                  3 restarts in 5 minutes           install, Starting
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                           |
//! |-------------------|---------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Decision loop, command interface, read-only views.            | [`Supervisor`], [`SupervisorHandle`]         |
//! | **Process**       | Launch, graceful stop with grace period, liveness polling.    | [`ProcessControl`], [`ProcessHandle`]        |
//! | **Policies**      | Exit classification, crash-loop window, backoff tiers.        | [`classify`], [`CrashLoopPolicy`]            |
//! | **Backups**       | Pre-start world archives with retention.                      | [`BackupManager`], [`Archiver`]              |
//! | **Updates**       | Version comparison, external downloader, staged install.      | [`Installer`], [`DownloaderCli`]             |
//! | **Subscriber API**| Hook into lifecycle events (logging, webhooks, custom).       | [`Subscribe`], [`LogWriter`]                 |
//! | **Configuration** | Code-level knobs and persisted user settings.                 | [`Config`], [`Settings`], [`SettingsStore`]  |
//! | **Errors**        | One typed error per collaborator call.                        | [`LaunchError`], [`RuntimeError`]            |
//!
//! ## Optional features
//! - `webhook` _(default)_: exports [`WebhookNotifier`], a Discord-style webhook subscriber.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use servervisor::{Config, DownloaderCli, LogWriter, SettingsStore, Subscribe, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     servervisor::logging::init("info");
//!
//!     let cfg = Config::default();
//!     let settings = SettingsStore::load(cfg.layout.server_dir.join("manager_config.json"))?;
//!     let downloader = DownloaderCli::new("./hytale-downloader", &cfg.layout);
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let sup = Supervisor::builder(cfg)
//!         .with_settings(settings)
//!         .with_installer(Arc::new(downloader))
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let handle = sup.handle();
//!     if !handle.settings().snapshot().auto_start {
//!         handle.start()?;
//!     }
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
mod backup;
mod classify;
mod config;
mod core;
mod error;
mod events;
mod policies;
mod process;
mod schedule;
mod settings;
mod subscribers;
mod update;

pub mod logging;
pub mod version;

// ---- Public re-exports ----

pub use backup::{Archiver, BackupManager, BackupRecord, ZipArchiver};
pub use classify::{ClassifyPolicy, ExitClass, classify};
pub use config::{Config, Layout};
pub use core::{LaunchFn, ServerState, Supervisor, SupervisorBuilder, SupervisorHandle};
pub use error::{
    BackupError, InstallError, LaunchError, RuntimeError, SettingsError, UpdateCheckError,
};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, CrashLoopPolicy, CrashTracker, CrashVerdict, JitterPolicy};
pub use process::{
    LaunchSpec, ProcessControl, ProcessHandle, ProcessRecord, ProcessStatus, stop_stale_servers,
};
pub use schedule::next_restart_delay;
pub use settings::{Feature, Settings, SettingsStore};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use update::{DownloaderCli, Installer, UpdateStatus};

// Webhook notifier subscriber (pulls in reqwest).
// Disable with: `--no-default-features`
#[cfg(feature = "webhook")]
pub use subscribers::{WebhookNotifier, message_for};
