//! # Supervisor: the decision loop, its inputs and its read-only exports.
//!
//! The [`Supervisor`] owns the event bus, the subscriber fan-out and the
//! decision loop. [`SupervisorHandle`] is the command interface used by the
//! presentation layer: every command only enqueues a message and returns.
//!
//! ## High-level architecture
//! ```text
//! SupervisorHandle ──Command──┐
//! exit watcher ───────────────┤
//! update / restart timers ────┼──► mpsc ──► decision loop ──► watch (state, update status, backups)
//! workers (backup, launch, ───┘                 │
//!   stop, check, install)                       └─ publish(Event) ──► Bus ──► listener ──► SubscriberSet
//! ```
//!
//! ## Startup
//! With [`Config::stop_stale_server`] set, `run()` first stops any process
//! whose command line names the server jar, then boots the loop.
//!
//! ## Shutdown path
//! ```text
//! handle.shutdown()  or  run_until_signal() + SIGINT/SIGTERM/SIGQUIT
//!   └─► ShutdownRequested → stop the server (grace, then kill) → Idle
//!   └─► loop halts → subscriber queues drained → run() returns
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use servervisor::{Config, LogWriter, SettingsStore, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SettingsStore::load("manager_config.json")?;
//!     let sup = Supervisor::builder(Config::default())
//!         .with_settings(settings)
//!         .with_subscribers(vec![Arc::new(LogWriter)])
//!         .build();
//!
//!     let handle = sup.handle();
//!     handle.start()?;
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::builder::SupervisorBuilder;
use super::command::{Command, Msg};
use super::engine::{Collaborators, Engine, Exports};
use super::shutdown;
use super::state::ServerState;
use crate::{
    backup::BackupRecord,
    config::Config,
    error::RuntimeError,
    events::{Bus, Event},
    process::{ProcessRecord, stop_stale_servers},
    settings::{Feature, SettingsStore},
    subscribers::{Subscribe, SubscriberSet},
    update::UpdateStatus,
};

/// Owns the decision loop until [`run`](Supervisor::run) consumes it.
pub struct Supervisor {
    bus: Bus,
    engine: Engine,
    rx: mpsc::UnboundedReceiver<Msg>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    handle: SupervisorHandle,
    /// Jar name and grace for the stale-server sweep, when enabled.
    stale: Option<(String, Duration)>,
}

impl Supervisor {
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        settings: SettingsStore,
        col: Collaborators,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let stale = cfg
            .stop_stale_server
            .then(|| (cfg.layout.server_jar.clone(), cfg.grace));
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ServerState::Idle);
        let (update_tx, update_rx) = watch::channel(None);
        let (backups_tx, backups_rx) = watch::channel(Vec::new());
        let (live_tx, live_rx) = watch::channel(None);

        let handle = SupervisorHandle {
            tx: tx.clone(),
            bus: bus.clone(),
            settings: settings.clone(),
            state: state_rx,
            update: update_rx,
            backups: backups_rx,
            live: live_rx,
        };
        let engine = Engine::new(
            cfg,
            settings,
            col,
            bus.clone(),
            tx,
            Exports {
                state: state_tx,
                update: update_tx,
                backups: backups_tx,
                live: live_tx,
            },
        );
        Self {
            bus,
            engine,
            rx,
            subscribers,
            handle,
            stale,
        }
    }

    /// Command interface; cheap to clone, usable before and during `run`.
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Runs the decision loop until a `Shutdown` command halts it.
    ///
    /// Subscriber queues are drained before this returns.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let Self {
            bus,
            engine,
            rx,
            subscribers,
            handle: _,
            stale,
        } = self;

        let done = CancellationToken::new();
        let listener = subscriber_listener(&bus, subscribers, done.clone());
        if let Some((jar, grace)) = stale {
            let stopped = stop_stale_servers(&jar, grace).await;
            if !stopped.is_empty() {
                info!(pids = ?stopped, "stale server processes stopped");
            }
        }
        engine.run(rx).await;

        done.cancel();
        if let Err(e) = listener.await {
            warn!(error = %e, "subscriber listener failed");
        }
        Ok(())
    }

    /// Like [`run`](Supervisor::run), and also shuts down on SIGINT / SIGTERM /
    /// SIGQUIT (Ctrl-C elsewhere).
    pub async fn run_until_signal(self) -> Result<(), RuntimeError> {
        let handle = self.handle();
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            res = &mut run => return res,
            sig = shutdown::wait_for_shutdown_signal() => match sig {
                Ok(()) => {
                    info!("termination signal received");
                    let (reply, _) = oneshot::channel();
                    let _ = handle.send(Command::Shutdown(reply));
                }
                Err(e) => warn!(error = %e, "signal registration failed; waiting for shutdown command"),
            }
        }
        run.await
    }
}

/// Subscribes to the bus and forwards events to the subscriber set.
///
/// After `done` fires, already-published events are still delivered; then the
/// set is shut down and its workers awaited.
fn subscriber_listener(
    bus: &Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    done: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers, bus.clone());
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = done.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => set.emit(&ev),
                            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
        set.shutdown().await;
    })
}

/// Command interface and read-only views of a [`Supervisor`].
///
/// Commands never block: they enqueue a message for the decision loop and
/// return [`RuntimeError::SupervisorGone`] only when the loop has halted.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Msg>,
    bus: Bus,
    settings: SettingsStore,
    state: watch::Receiver<ServerState>,
    update: watch::Receiver<Option<UpdateStatus>>,
    backups: watch::Receiver<Vec<BackupRecord>>,
    live: watch::Receiver<Option<ProcessRecord>>,
}

impl SupervisorHandle {
    fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.tx
            .send(Msg::Cmd(cmd))
            .map_err(|_| RuntimeError::SupervisorGone)
    }

    /// Starts the server (resets crash-loop history).
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.send(Command::Start)
    }

    /// Gracefully stops the server.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.send(Command::Stop)
    }

    /// Gracefully stops and starts again; starts when idle.
    pub fn restart_now(&self) -> Result<(), RuntimeError> {
        self.send(Command::RestartNow)
    }

    /// Toggles a feature by name (see [`Feature`]) and persists it.
    ///
    /// The new value is visible to the next decision. A persistence failure is
    /// logged; the in-memory value still changes.
    pub fn set_feature(&self, name: &str, enabled: bool) -> Result<(), RuntimeError> {
        let feature: Feature = name.parse()?;
        if let Err(e) = self.settings.update(|s| s.set_feature(feature, enabled)) {
            warn!(%feature, error = %e, "feature change not persisted");
        }
        self.send(Command::FeatureChanged { feature, enabled })
    }

    /// Writes one console line to the running server.
    pub fn send_console(&self, line: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(Command::SendConsole(line.into()))
    }

    /// Stops the server and halts the loop; resolves once the loop has halted.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        done.await.map_err(|_| RuntimeError::SupervisorGone)
    }

    /// Receiver of every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Change-notifying view of the state.
    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Result of the last update check, if any.
    pub fn update_status(&self) -> Option<UpdateStatus> {
        self.update.borrow().clone()
    }

    /// Backup archives, oldest first, as of the last backup run.
    pub fn backups(&self) -> Vec<BackupRecord> {
        self.backups.borrow().clone()
    }

    /// Time since the live process started; `None` when no process is live.
    pub fn uptime(&self) -> Option<Duration> {
        self.live.borrow().as_ref().map(ProcessRecord::uptime)
    }

    /// Pid of the live process.
    pub fn pid(&self) -> Option<u32> {
        self.live.borrow().as_ref().map(|r| r.pid)
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }
}
