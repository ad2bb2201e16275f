//! # Engine: the single decision loop.
//!
//! Owns the authoritative [`ServerState`] and every piece of mutable
//! supervisor state. Consumes [`Msg`]s strictly in order; never awaits a
//! collaborator. Slow work (backup, launch, stop, update check, install,
//! backoff sleep, exit polling) runs on spawned workers that post their
//! result back as a message.
//!
//! ## Stale results
//! Each worker operation is tagged with the operation id current when it was
//! spawned. Starting another operation, or preempting one, bumps the id and
//! cancels the previous token, so a late result is recognised and dropped.
//! Exit reports and restart ticks are tagged with the process run instead.
//!
//! ## Transitions
//! ```text
//! Idle ─Start─► Starting[backup → launch] ─ok─► Running
//!                                         └err─► Idle            (LaunchFailed)
//! Running ─Stop──────────► StoppingRequested ─exit─► Idle        (Stop)
//! Running ─RestartNow/tick► Restarting ─exit─► Starting          (Stop)
//! Running ─crash─► CrashRecovering ─backoff─► Starting           (Crash, BackoffScheduled)
//!                 └ too many ─► Idle                             (CrashLoopExceeded)
//! Running ─UpdateTick─► CheckingUpdate ─newer─► Updating ─exit─► install ─► Starting
//!                                      └same/err─► Running       (+ deferred restart)
//!                                      └failed before─► Running  (until the remote moves)
//! Idle ─UpdateTick─► CheckingUpdate ─newer─► Updating ─► install ─► Idle
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::LaunchFn;
use super::command::{Command, Msg};
use super::state::ServerState;
use crate::backup::{BackupManager, BackupRecord};
use crate::classify::{ExitClass, classify};
use crate::config::Config;
use crate::error::{BackupError, InstallError, LaunchError, RuntimeError, UpdateCheckError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{CrashTracker, CrashVerdict};
use crate::process::{ProcessControl, ProcessRecord, ProcessStatus};
use crate::schedule::Scheduler;
use crate::settings::{Feature, Settings, SettingsStore};
use crate::update::{Installer, UpdateStatus};
use crate::version::VersionOrdering;

/// External collaborators driven by the loop.
pub(crate) struct Collaborators {
    pub process: Arc<dyn ProcessControl>,
    pub installer: Option<Arc<dyn Installer>>,
    pub backups: BackupManager,
    pub launch: LaunchFn,
}

/// Read-only views published for the presentation layer.
pub(crate) struct Exports {
    pub state: watch::Sender<ServerState>,
    pub update: watch::Sender<Option<UpdateStatus>>,
    pub backups: watch::Sender<Vec<BackupRecord>>,
    pub live: watch::Sender<Option<ProcessRecord>>,
}

/// What follows the planned exit of the live process.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AfterStop {
    Idle,
    Restart,
    Install { version: String },
    Halt,
}

/// State an update flow returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartPhase {
    Backup,
    Launch,
}

pub(crate) struct Engine {
    cfg: Config,
    settings: SettingsStore,
    col: Collaborators,
    bus: Bus,
    tx: mpsc::UnboundedSender<Msg>,
    out: Exports,
    scheduler: Scheduler,
    root: CancellationToken,

    state: ServerState,
    record: Option<ProcessRecord>,
    run: u64,
    stop_requested: bool,
    after_stop: AfterStop,

    op: u64,
    op_token: CancellationToken,
    start_phase: StartPhase,
    stop_on_launch: Option<AfterStop>,
    origin: Origin,
    pending_restart: bool,
    pending_start: bool,
    backoff_attempt: u32,
    crashes: CrashTracker,
    /// Remote version whose install last failed; not retried while unchanged.
    failed_install: Option<String>,

    halting: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Engine {
    pub(crate) fn new(
        cfg: Config,
        settings: SettingsStore,
        col: Collaborators,
        bus: Bus,
        tx: mpsc::UnboundedSender<Msg>,
        out: Exports,
    ) -> Self {
        let root = CancellationToken::new();
        let scheduler = Scheduler::new(tx.clone(), root.clone());
        let op_token = root.child_token();
        Self {
            cfg,
            settings,
            col,
            bus,
            tx,
            out,
            scheduler,
            root,
            state: ServerState::Idle,
            record: None,
            run: 0,
            stop_requested: false,
            after_stop: AfterStop::Idle,
            op: 0,
            op_token,
            start_phase: StartPhase::Backup,
            stop_on_launch: None,
            origin: Origin::Idle,
            pending_restart: false,
            pending_start: false,
            backoff_attempt: 0,
            crashes: CrashTracker::new(),
            failed_install: None,
            halting: false,
            waiters: Vec::new(),
        }
    }

    /// Runs until a `Shutdown` command has driven the loop to `Idle`.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        self.boot();
        while !self.finished() {
            let Some(msg) = rx.recv().await else {
                break;
            };
            self.handle(msg);
        }
        self.finish();
    }

    fn boot(&mut self) {
        let settings = self.settings.snapshot();
        self.scheduler.start_update_timer(self.cfg.update_interval());
        self.publish_listing();

        let checking = self.cfg.startup_update_check
            && settings.check_updates
            && self.begin_check(Origin::Idle);
        if settings.auto_start {
            if checking {
                debug!("auto-start deferred until the startup update check resolves");
                self.pending_start = true;
            } else {
                self.begin_start();
            }
        }
    }

    fn finished(&self) -> bool {
        self.halting && self.state == ServerState::Idle && self.record.is_none()
    }

    fn finish(&mut self) {
        self.scheduler.disarm_restart();
        self.op_token.cancel();
        self.root.cancel();
        info!("supervisor loop halted");
        for w in self.waiters.drain(..) {
            let _ = w.send(());
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Cmd(cmd) => self.on_command(cmd),

            Msg::BackupDone {
                op,
                result,
                listing,
            } if self.current(op, ServerState::Starting) => self.on_backup_done(result, listing),

            Msg::Launched { op, result } if self.current(op, ServerState::Starting) => {
                self.on_launched(result)
            }
            Msg::Launched {
                result: Ok(orphan), ..
            } => {
                warn!(pid = orphan.pid, "launch result arrived after it was abandoned; stopping it");
                self.spawn_stop(orphan, u64::MAX);
            }

            Msg::Exited { run, status } if run == self.run && self.record.is_some() => {
                self.on_exit(status)
            }

            Msg::CheckDone { op, result } if self.current(op, ServerState::CheckingUpdate) => {
                self.on_check_done(result)
            }

            Msg::InstallDone {
                op,
                version,
                result,
            } if self.current(op, ServerState::Updating) => self.on_install_done(version, result),

            Msg::BackoffElapsed { op } if self.current(op, ServerState::CrashRecovering) => {
                self.publish(
                    Event::new(EventKind::RestartAfterCrash).with_attempt(self.backoff_attempt),
                );
                info!(attempt = self.backoff_attempt, "restarting after crash");
                self.begin_start();
            }

            Msg::UpdateTick => self.on_update_tick(),

            Msg::RestartTick { run } if run == self.run && self.record.is_some() => {
                self.on_restart_tick()
            }

            other => debug!(msg = ?other, state = %self.state, "stale message dropped"),
        }
    }

    // ---- commands ----

    fn on_command(&mut self, cmd: Command) {
        if let Command::Shutdown(reply) = cmd {
            self.waiters.push(reply);
            self.on_shutdown();
            return;
        }
        if self.halting {
            debug!(command = ?cmd, "shutting down, command ignored");
            return;
        }
        match cmd {
            Command::Start => self.on_start(),
            Command::Stop => self.on_stop(),
            Command::RestartNow => self.on_restart_now(),
            Command::FeatureChanged { feature, enabled } => self.on_feature(feature, enabled),
            Command::SendConsole(line) => self.on_console(line),
            Command::Shutdown(_) => {}
        }
    }

    fn on_start(&mut self) {
        use ServerState::*;
        match self.state {
            Idle => {
                self.crashes.reset();
                self.begin_start();
            }
            CheckingUpdate | Updating if self.origin == Origin::Idle => {
                debug!("start deferred until the update flow finishes");
                self.pending_start = true;
            }
            CrashRecovering => {
                self.cancel_op();
                self.crashes.reset();
                self.begin_start();
            }
            StoppingRequested => {
                self.crashes.reset();
                self.after_stop = AfterStop::Restart;
            }
            Starting => {
                if self.stop_on_launch.take().is_some() {
                    debug!("pending stop withdrawn by start");
                }
            }
            other => debug!(state = %other, "start ignored"),
        }
    }

    fn on_stop(&mut self) {
        use ServerState::*;
        self.pending_start = false;
        self.pending_restart = false;
        match self.state {
            Idle => debug!("stop ignored, server not running"),
            Starting => match self.start_phase {
                StartPhase::Backup => {
                    self.cancel_op();
                    self.set_state(Idle);
                }
                StartPhase::Launch => self.stop_on_launch = Some(AfterStop::Idle),
            },
            Running | Restarting | StoppingRequested => {
                self.request_stop(AfterStop::Idle, StoppingRequested)
            }
            CheckingUpdate => {
                self.cancel_op();
                if self.record.is_some() {
                    self.request_stop(AfterStop::Idle, StoppingRequested);
                } else {
                    self.set_state(Idle);
                }
            }
            Updating => {
                if self.record.is_some() {
                    self.request_stop(AfterStop::Idle, StoppingRequested);
                } else {
                    self.abort_install("cancelled by stop");
                }
            }
            CrashRecovering => {
                self.cancel_op();
                info!("pending crash restart cancelled");
                self.set_state(Idle);
            }
        }
    }

    fn on_restart_now(&mut self) {
        use ServerState::*;
        match self.state {
            Idle | CrashRecovering => self.on_start(),
            Running => self.request_stop(AfterStop::Restart, Restarting),
            CheckingUpdate if self.origin == Origin::Running => {
                self.cancel_op();
                self.pending_restart = false;
                self.request_stop(AfterStop::Restart, Restarting);
            }
            StoppingRequested if !self.halting => self.after_stop = AfterStop::Restart,
            other => debug!(state = %other, "restart ignored"),
        }
    }

    fn on_feature(&mut self, feature: Feature, enabled: bool) {
        info!(%feature, enabled, "feature changed");
        self.publish(Event::new(EventKind::FeatureChanged).with_detail(format!("{feature}={enabled}")));
        if feature == Feature::Schedule && self.state == ServerState::Running {
            let settings = self.settings.snapshot();
            self.scheduler.arm_restart(&settings, self.run);
        }
        if feature == Feature::CheckUpdates
            && enabled
            && let Some(version) = self.failed_install.take()
        {
            info!(%version, "failed update will be retried");
        }
    }

    fn on_console(&mut self, line: String) {
        let Some(record) = self.record.clone() else {
            warn!(%line, "console command dropped, server not running");
            return;
        };
        let process = Arc::clone(&self.col.process);
        tokio::spawn(async move {
            if let Err(e) = process.send_line(&record, &line).await {
                warn!(pid = record.pid, error = %e, "console command failed");
            }
        });
    }

    fn on_shutdown(&mut self) {
        use ServerState::*;
        if self.halting {
            return;
        }
        self.halting = true;
        self.pending_start = false;
        self.pending_restart = false;
        info!(state = %self.state, "shutdown requested");
        self.publish(Event::new(EventKind::ShutdownRequested));

        match self.state {
            Idle => {}
            Starting => match self.start_phase {
                StartPhase::Backup => {
                    self.cancel_op();
                    self.set_state(Idle);
                }
                StartPhase::Launch => self.stop_on_launch = Some(AfterStop::Halt),
            },
            Running | Restarting | StoppingRequested => {
                self.request_stop(AfterStop::Halt, StoppingRequested)
            }
            CheckingUpdate | Updating => {
                if self.record.is_some() {
                    self.cancel_op();
                    self.request_stop(AfterStop::Halt, StoppingRequested);
                } else if self.state == Updating {
                    self.abort_install("cancelled by shutdown");
                } else {
                    self.cancel_op();
                    self.set_state(Idle);
                }
            }
            CrashRecovering => {
                self.cancel_op();
                self.set_state(Idle);
            }
        }
    }

    // ---- start sequence ----

    fn begin_start(&mut self) {
        let settings = self.settings.snapshot();
        self.stop_on_launch = None;
        self.set_state(ServerState::Starting);
        if settings.enable_backups {
            self.spawn_backup(&settings);
        } else {
            self.spawn_launch(&settings);
        }
    }

    fn spawn_backup(&mut self, settings: &Settings) {
        self.start_phase = StartPhase::Backup;
        let (op, _) = self.next_op();
        let mgr = self.col.backups.clone();
        let source = self.cfg.layout.world_path();
        let dest = self.cfg.layout.backup_path();
        let max = settings.max_backups;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let result = mgr.create_backup(&source, &dest).await;
            let keep = result.is_ok();
            let listing = tokio::task::spawn_blocking(move || {
                if keep && let Err(e) = mgr.enforce_retention(&dest, max) {
                    warn!(error = %e, "backup retention failed");
                }
                mgr.list(&dest).unwrap_or_else(|e| {
                    warn!(error = %e, "cannot list backups");
                    Vec::new()
                })
            })
            .await
            .unwrap_or_default();
            let _ = tx.send(Msg::BackupDone {
                op,
                result,
                listing,
            });
        });
    }

    fn on_backup_done(&mut self, result: Result<BackupRecord, BackupError>, listing: Vec<BackupRecord>) {
        self.out.backups.send_replace(listing);
        let settings = self.settings.snapshot();
        match result {
            Ok(record) => {
                self.publish(Event::new(EventKind::BackupCreated).with_path(record.path));
            }
            Err(e) => {
                warn!(error = %e, label = e.as_label(), "backup failed");
                self.publish(Event::new(EventKind::BackupFailed).with_detail(e.to_string()));
                if settings.backup_failure_fatal {
                    self.launch_failed(LaunchError::BackupRequired {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
        self.spawn_launch(&settings);
    }

    fn spawn_launch(&mut self, settings: &Settings) {
        self.start_phase = StartPhase::Launch;
        let (op, _) = self.next_op();
        let spec = (self.col.launch)(&self.cfg.layout, settings);
        let process = Arc::clone(&self.col.process);
        let bus = self.bus.clone();
        let tx = self.tx.clone();
        debug!(command = %spec.command_line(), "launching server");

        tokio::spawn(async move {
            let result = process.start(&spec, &bus).await;
            let _ = tx.send(Msg::Launched { op, result });
        });
    }

    fn on_launched(&mut self, result: Result<ProcessRecord, LaunchError>) {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                self.launch_failed(e);
                return;
            }
        };
        self.run += 1;
        self.stop_requested = false;
        self.record = Some(record.clone());
        self.out.live.send_replace(Some(record.clone()));
        self.spawn_watcher(record.clone());

        info!(pid = record.pid, "server started");
        self.set_state(ServerState::Running);
        self.publish(Event::new(EventKind::Start).with_pid(record.pid));

        let settings = self.settings.snapshot();
        self.scheduler.arm_restart(&settings, self.run);

        if let Some(after) = self.stop_on_launch.take() {
            self.request_stop(after, ServerState::StoppingRequested);
        }
    }

    fn launch_failed(&mut self, e: LaunchError) {
        error!(error = %e, label = e.as_label(), "server launch failed");
        self.publish(Event::new(EventKind::LaunchFailed).with_detail(e.to_string()));
        self.stop_on_launch = None;
        self.set_state(ServerState::Idle);
    }

    // ---- stop and exit ----

    /// Records the intent, enters `state`, and issues at most one stop per run.
    fn request_stop(&mut self, after: AfterStop, state: ServerState) {
        self.after_stop = after;
        self.scheduler.disarm_restart();
        self.set_state(state);
        if self.stop_requested {
            return;
        }
        let Some(record) = self.record.clone() else {
            return;
        };
        self.stop_requested = true;
        info!(pid = record.pid, "stopping server");
        self.spawn_stop(record, self.run);
    }

    fn spawn_stop(&self, record: ProcessRecord, run: u64) {
        let process = Arc::clone(&self.col.process);
        let grace = self.cfg.grace;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            process.request_stop(&record, grace).await;
            let status = process.poll(&record).await;
            if !status.is_alive() {
                let _ = tx.send(Msg::Exited { run, status });
            }
        });
    }

    fn spawn_watcher(&self, record: ProcessRecord) {
        let process = Arc::clone(&self.col.process);
        let every = self.cfg.poll_interval;
        let run = self.run;
        let tx = self.tx.clone();
        let token = self.root.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        let status = process.poll(&record).await;
                        if !status.is_alive() {
                            let _ = tx.send(Msg::Exited { run, status });
                            break;
                        }
                    }
                }
            }
        });
    }

    fn on_exit(&mut self, status: ProcessStatus) {
        let Some(record) = self.record.take() else {
            return;
        };
        self.out.live.send_replace(None);
        self.scheduler.disarm_restart();

        let now = tokio::time::Instant::now().into_std();
        let class = classify(
            &self.cfg.classify_policy(),
            status,
            self.stop_requested,
            record.started_at,
            now,
        );
        self.stop_requested = false;
        debug!(pid = record.pid, %status, ?class, "server exited");

        match class {
            ExitClass::PlannedStop => {
                info!(pid = record.pid, %status, "server stopped");
                self.publish(Event::new(EventKind::Stop).with_pid(record.pid).with_exit(status));
                self.after_planned_stop();
            }
            ExitClass::CleanStop => {
                info!(pid = record.pid, "server exited cleanly on its own");
                self.abandon_check();
                self.publish(Event::new(EventKind::Stop).with_pid(record.pid).with_exit(status));
                self.set_state(ServerState::Idle);
            }
            ExitClass::Crash { early } => self.on_crash(&record, status, early),
        }
    }

    fn after_planned_stop(&mut self) {
        match std::mem::replace(&mut self.after_stop, AfterStop::Idle) {
            AfterStop::Idle | AfterStop::Halt => self.set_state(ServerState::Idle),
            AfterStop::Restart => self.begin_start(),
            AfterStop::Install { version } => self.spawn_install(version),
        }
    }

    fn on_crash(&mut self, record: &ProcessRecord, status: ProcessStatus, early: bool) {
        self.abandon_check();
        let uptime = record.uptime();
        let detail = if early {
            format!("exited with {status} after {uptime:?} (early exit)")
        } else {
            format!("exited with {status} after {uptime:?}")
        };
        warn!(pid = record.pid, %status, ?uptime, early, "server crashed");
        self.publish(
            Event::new(EventKind::Crash)
                .with_pid(record.pid)
                .with_exit(status)
                .with_detail(detail),
        );

        if self.halting {
            self.set_state(ServerState::Idle);
            return;
        }
        if !self.settings.snapshot().enable_auto_restart {
            info!("auto-restart disabled, staying idle");
            self.set_state(ServerState::Idle);
            return;
        }

        let now = tokio::time::Instant::now().into_std();
        match self.crashes.record(&self.cfg.crash_loop, now, early) {
            CrashVerdict::Restart { delay, attempt } => {
                self.backoff_attempt = attempt;
                self.set_state(ServerState::CrashRecovering);
                info!(?delay, attempt, "restart scheduled after crash");
                self.publish(
                    Event::new(EventKind::BackoffScheduled)
                        .with_delay(delay)
                        .with_attempt(attempt),
                );
                let (op, token) = self.next_op();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(Msg::BackoffElapsed { op });
                        }
                    }
                });
            }
            CrashVerdict::Halt { crashes } => {
                let err = RuntimeError::CrashLoopExceeded {
                    crashes,
                    window: self.cfg.crash_loop.window,
                };
                error!(error = %err, "automatic restarts halted");
                self.publish(
                    Event::new(EventKind::CrashLoopExceeded)
                        .with_attempt(u32::try_from(crashes).unwrap_or(u32::MAX))
                        .with_detail(err.to_string()),
                );
                self.set_state(ServerState::Idle);
            }
        }
    }

    /// An unrequested exit during a check from `Running` invalidates the check.
    fn abandon_check(&mut self) {
        if self.state == ServerState::CheckingUpdate {
            self.cancel_op();
        }
        self.pending_restart = false;
    }

    // ---- timers ----

    fn on_restart_tick(&mut self) {
        match self.state {
            ServerState::Running => {
                info!("scheduled restart");
                self.publish(Event::new(EventKind::ScheduledRestart));
                self.request_stop(AfterStop::Restart, ServerState::Restarting);
            }
            ServerState::CheckingUpdate => {
                debug!("scheduled restart deferred until the update check resolves");
                self.pending_restart = true;
            }
            other => debug!(state = %other, "scheduled restart coalesced"),
        }
    }

    fn on_update_tick(&mut self) {
        if self.halting || !self.settings.snapshot().check_updates {
            return;
        }
        match self.state {
            ServerState::Running => {
                self.begin_check(Origin::Running);
            }
            ServerState::Idle => {
                self.begin_check(Origin::Idle);
            }
            other => debug!(state = %other, "update check skipped"),
        }
    }

    // ---- update flow ----

    /// Starts a remote version query; `false` when no installer is configured.
    fn begin_check(&mut self, origin: Origin) -> bool {
        let Some(installer) = self.col.installer.clone() else {
            return false;
        };
        self.origin = origin;
        self.set_state(ServerState::CheckingUpdate);
        let (op, token) = self.next_op();
        let tx = self.tx.clone();
        debug!("checking for updates");
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(UpdateCheckError::Cancelled),
                r = installer.remote_version() => r,
            };
            let _ = tx.send(Msg::CheckDone { op, result });
        });
        true
    }

    fn on_check_done(&mut self, result: Result<String, UpdateCheckError>) {
        match result {
            Ok(remote) => {
                let local = self.settings.snapshot().last_server_version;
                let status = UpdateStatus::new(local.clone(), remote.clone());
                self.out.update.send_replace(Some(status.clone()));
                let failed_before = self.failed_install.as_deref() == Some(remote.as_str());
                if status.update_available && !failed_before {
                    info!(%local, %remote, "update available");
                    self.publish(
                        Event::new(EventKind::UpdateAvailable)
                            .with_version(remote.as_str())
                            .with_detail(format!("{local} -> {remote}")),
                    );
                    self.pending_restart = false;
                    match self.origin {
                        Origin::Running => self.request_stop(
                            AfterStop::Install { version: remote },
                            ServerState::Updating,
                        ),
                        Origin::Idle => {
                            self.set_state(ServerState::Updating);
                            self.spawn_install(remote);
                        }
                    }
                    return;
                }
                if status.update_available {
                    debug!(%remote, "install of this version failed before, skipping");
                } else if status.ordering == VersionOrdering::Unknown {
                    warn!(%local, %remote, "versions are not comparable, not updating");
                } else {
                    debug!(%local, %remote, ordering = ?status.ordering, "no update");
                }
            }
            Err(e) => {
                warn!(error = %e, label = e.as_label(), "update check failed");
                self.publish(Event::new(EventKind::UpdateCheckFailed).with_detail(e.to_string()));
            }
        }
        self.resume_origin();
    }

    fn spawn_install(&mut self, version: String) {
        let Some(installer) = self.col.installer.clone() else {
            self.on_install_done(
                version,
                Err(InstallError::Failed {
                    reason: "no installer configured".into(),
                }),
            );
            return;
        };
        self.set_state(ServerState::Updating);
        let (op, token) = self.next_op();
        let settings = self.settings.clone();
        let tx = self.tx.clone();
        info!(%version, "installing update");

        tokio::spawn(async move {
            let result = installer.fetch_and_install(&version, token).await;
            if result.is_ok()
                && let Err(e) = settings.update(|s| s.last_server_version = version.clone())
            {
                warn!(error = %e, "installed version not persisted");
            }
            let _ = tx.send(Msg::InstallDone {
                op,
                version,
                result,
            });
        });
    }

    fn on_install_done(&mut self, version: String, result: Result<(), InstallError>) {
        match result {
            Ok(()) => {
                self.failed_install = None;
                info!(%version, "update applied");
                self.out
                    .update
                    .send_replace(Some(UpdateStatus::new(version.clone(), version.clone())));
                self.publish(Event::new(EventKind::UpdateApplied).with_version(version));
            }
            Err(e) => {
                error!(%version, error = %e, label = e.as_label(), "update failed");
                if !matches!(e, InstallError::Cancelled) {
                    self.failed_install = Some(version.clone());
                }
                self.publish(
                    Event::new(EventKind::UpdateFailed)
                        .with_version(version)
                        .with_detail(e.to_string()),
                );
            }
        }
        match self.origin {
            // The server was stopped for this update: bring it back either way.
            Origin::Running => self.begin_start(),
            Origin::Idle => self.resume_origin(),
        }
    }

    fn abort_install(&mut self, why: &str) {
        self.cancel_op();
        warn!(reason = why, "update install aborted");
        self.publish(Event::new(EventKind::UpdateFailed).with_detail(why.to_string()));
        self.set_state(ServerState::Idle);
    }

    fn resume_origin(&mut self) {
        match self.origin {
            Origin::Running => {
                self.set_state(ServerState::Running);
                if std::mem::take(&mut self.pending_restart) {
                    info!("running deferred scheduled restart");
                    self.publish(Event::new(EventKind::ScheduledRestart));
                    self.request_stop(AfterStop::Restart, ServerState::Restarting);
                }
            }
            Origin::Idle => {
                self.set_state(ServerState::Idle);
                if std::mem::take(&mut self.pending_start) {
                    self.crashes.reset();
                    self.begin_start();
                }
            }
        }
    }

    // ---- plumbing ----

    fn current(&self, op: u64, state: ServerState) -> bool {
        op == self.op && self.state == state
    }

    fn next_op(&mut self) -> (u64, CancellationToken) {
        self.op_token.cancel();
        self.op += 1;
        self.op_token = self.root.child_token();
        (self.op, self.op_token.clone())
    }

    fn cancel_op(&mut self) {
        self.op_token.cancel();
        self.op += 1;
    }

    fn set_state(&mut self, to: ServerState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        debug!(%from, %to, "state changed");
        self.out.state.send_replace(to);
        self.publish(
            Event::new(EventKind::StateChanged)
                .with_state(to)
                .with_detail(format!("{from} -> {to}")),
        );
    }

    fn publish_listing(&self) {
        match self.col.backups.list(&self.cfg.layout.backup_path()) {
            Ok(listing) => {
                self.out.backups.send_replace(listing);
            }
            Err(e) => warn!(error = %e, "cannot list backups"),
        }
    }

    #[inline]
    fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }
}
