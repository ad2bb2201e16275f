//! Decision-loop scenarios against in-memory fakes.
//!
//! Time is paused: backoff delays and timers advance instantly and
//! deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::{ServerState, Supervisor, SupervisorHandle};
use crate::config::{Config, Layout};
use crate::error::{InstallError, LaunchError, RuntimeError, UpdateCheckError};
use crate::events::{Bus, Event, EventKind};
use crate::process::{LaunchSpec, ProcessControl, ProcessRecord, ProcessStatus};
use crate::settings::{Settings, SettingsStore};
use crate::update::Installer;

const WAIT: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct ProcState {
    next_pid: u32,
    status: HashMap<u32, ProcessStatus>,
    live: Option<u32>,
    starts: usize,
    stops: Vec<u32>,
    fail_next_start: bool,
    console: Vec<String>,
}

/// Process fake: exits only when told to or when stopped.
#[derive(Default)]
struct FakeProcess {
    inner: Mutex<ProcState>,
    stop_delay: Duration,
}

impl FakeProcess {
    fn with_stop_delay(stop_delay: Duration) -> Self {
        Self {
            stop_delay,
            ..Self::default()
        }
    }

    /// Makes the live process exit on its own.
    fn exit(&self, code: i32) {
        let mut g = self.inner.lock().unwrap();
        let pid = g.live.take().expect("no live process");
        g.status.insert(pid, ProcessStatus::ExitedWithCode(code));
    }

    fn fail_next_start(&self) {
        self.inner.lock().unwrap().fail_next_start = true;
    }

    fn starts(&self) -> usize {
        self.inner.lock().unwrap().starts
    }

    fn stops(&self) -> usize {
        self.inner.lock().unwrap().stops.len()
    }

    fn console(&self) -> Vec<String> {
        self.inner.lock().unwrap().console.clone()
    }
}

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn start(&self, spec: &LaunchSpec, _output: &Bus) -> Result<ProcessRecord, LaunchError> {
        let mut g = self.inner.lock().unwrap();
        if std::mem::take(&mut g.fail_next_start) {
            return Err(LaunchError::BinaryMissing {
                path: spec.program.clone(),
            });
        }
        assert!(g.live.is_none(), "second start while a process is live");
        g.next_pid += 1;
        g.starts += 1;
        let pid = 1000 + g.next_pid;
        g.status.insert(pid, ProcessStatus::Alive);
        g.live = Some(pid);
        Ok(ProcessRecord::new(pid))
    }

    async fn request_stop(&self, record: &ProcessRecord, _grace: Duration) {
        self.inner.lock().unwrap().stops.push(record.pid);
        sleep(self.stop_delay).await;
        let mut g = self.inner.lock().unwrap();
        if g.status.get(&record.pid) == Some(&ProcessStatus::Alive) {
            g.status.insert(record.pid, ProcessStatus::ExitedWithCode(0));
            g.live = None;
        }
    }

    async fn poll(&self, record: &ProcessRecord) -> ProcessStatus {
        let g = self.inner.lock().unwrap();
        g.status
            .get(&record.pid)
            .copied()
            .unwrap_or(ProcessStatus::ExitedWithCode(-1))
    }

    async fn send_line(&self, _record: &ProcessRecord, line: &str) -> std::io::Result<()> {
        self.inner.lock().unwrap().console.push(line.to_string());
        Ok(())
    }
}

/// Installer fake with a fixed remote version.
struct FakeInstaller {
    remote: Option<String>,
    check_delay: Duration,
    install_delay: Duration,
    fail_install: bool,
    installs: Mutex<Vec<String>>,
}

impl FakeInstaller {
    fn new(remote: &str) -> Self {
        Self {
            remote: Some(remote.to_string()),
            check_delay: Duration::ZERO,
            install_delay: Duration::from_secs(5),
            fail_install: false,
            installs: Mutex::new(Vec::new()),
        }
    }

    fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn remote_version(&self) -> Result<String, UpdateCheckError> {
        sleep(self.check_delay).await;
        self.remote
            .clone()
            .ok_or_else(|| UpdateCheckError::Unavailable {
                reason: "network unreachable".into(),
            })
    }

    async fn fetch_and_install(
        &self,
        target: &str,
        cancel: CancellationToken,
    ) -> Result<(), InstallError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(InstallError::Cancelled),
            _ = sleep(self.install_delay) => {}
        }
        self.installs.lock().unwrap().push(target.to_string());
        if self.fail_install {
            return Err(InstallError::MissingArtifact {
                path: "updater_staging/HytaleServer.jar".into(),
            });
        }
        Ok(())
    }
}

struct Harness {
    handle: SupervisorHandle,
    events: Recorder,
    process: Arc<FakeProcess>,
    join: JoinHandle<Result<(), RuntimeError>>,
}

struct Recorder {
    rx: broadcast::Receiver<Event>,
    seen: Vec<Event>,
}

impl Recorder {
    /// Receives until an event of `kind` arrives and returns it.
    async fn until(&mut self, kind: EventKind) -> Event {
        loop {
            let ev = timeout(WAIT, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}; seen {:?}", self.kinds()))
                .expect("bus closed");
            self.seen.push(ev.clone());
            if ev.kind == kind {
                return ev;
            }
        }
    }

    /// Receives until the `n`-th event of `kind` (counting all seen so far).
    async fn until_nth(&mut self, kind: EventKind, n: usize) -> Event {
        loop {
            if let Some(ev) = self.seen.iter().filter(|e| e.kind == kind).nth(n - 1) {
                return ev.clone();
            }
            self.until(kind).await;
        }
    }

    fn drain(&mut self) {
        while let Ok(ev) = self.rx.try_recv() {
            self.seen.push(ev);
        }
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.seen.iter().map(|e| e.kind).collect()
    }

    fn count(&self, kind: EventKind) -> usize {
        self.seen.iter().filter(|e| e.kind == kind).count()
    }

    /// Lifecycle kinds plus update announcements, in order.
    fn story(&self) -> Vec<EventKind> {
        self.seen
            .iter()
            .map(|e| e.kind)
            .filter(|k| k.is_lifecycle() || *k == EventKind::UpdateAvailable)
            .collect()
    }

    fn states(&self) -> Vec<ServerState> {
        self.seen.iter().filter_map(|e| e.state).collect()
    }
}

fn test_config() -> Config {
    Config {
        update_check_interval: Duration::ZERO,
        startup_update_check: false,
        ..Config::default()
    }
}

fn test_settings() -> Settings {
    Settings {
        last_server_version: "1.4.0".into(),
        enable_backups: false,
        ..Settings::default()
    }
}

fn spawn(
    cfg: Config,
    settings: SettingsStore,
    process: Arc<FakeProcess>,
    installer: Option<Arc<FakeInstaller>>,
) -> Harness {
    let mut builder = Supervisor::builder(cfg)
        .with_settings(settings)
        .with_process(process.clone())
        .with_launch(|_: &Layout, s: &Settings| {
            LaunchSpec::new("server").arg(format!("-Xmx{}", s.server_memory))
        });
    if let Some(installer) = installer {
        builder = builder.with_installer(installer);
    }
    let sup = builder.build();
    let handle = sup.handle();
    let events = Recorder {
        rx: handle.subscribe(),
        seen: Vec::new(),
    };
    let join = tokio::spawn(sup.run());
    Harness {
        handle,
        events,
        process,
        join,
    }
}

async fn wait_state(handle: &SupervisorHandle, want: ServerState) {
    let mut rx = handle.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}, at {}", handle.state()))
        .expect("supervisor gone");
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_is_a_planned_stop() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    let start = h.events.until(EventKind::Start).await;
    assert_eq!(start.pid, Some(1001));
    assert_eq!(h.handle.state(), ServerState::Running);
    assert_eq!(h.handle.pid(), Some(1001));

    h.handle.stop().unwrap();
    let stop = h.events.until(EventKind::Stop).await;
    assert_eq!(stop.exit, Some(ProcessStatus::ExitedWithCode(0)));
    wait_state(&h.handle, ServerState::Idle).await;
    h.events.drain();

    assert_eq!(h.events.count(EventKind::Crash), 0);
    assert_eq!(h.process.stops(), 1);
    assert_eq!(h.handle.uptime(), None);
    assert_eq!(
        h.events.states(),
        vec![
            ServerState::Starting,
            ServerState::Running,
            ServerState::StoppingRequested,
            ServerState::Idle
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn crash_restarts_after_first_backoff_tier() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    sleep(Duration::from_secs(2)).await;
    h.process.exit(1);

    let crash = h.events.until(EventKind::Crash).await;
    let crashed_at = Instant::now();
    assert_eq!(crash.exit, Some(ProcessStatus::ExitedWithCode(1)));
    assert!(crash.detail.as_deref().unwrap().contains("early"));

    let backoff = h.events.until(EventKind::BackoffScheduled).await;
    assert_eq!(backoff.delay(), Some(Duration::from_secs(5)));
    assert_eq!(backoff.attempt, Some(1));
    assert_eq!(h.handle.state(), ServerState::CrashRecovering);

    h.events.until(EventKind::RestartAfterCrash).await;
    h.events.until(EventKind::Start).await;
    let waited = crashed_at.elapsed();
    assert!(waited >= Duration::from_secs(5), "restarted after {waited:?}");
    assert!(waited < Duration::from_secs(7), "restarted after {waited:?}");
    assert_eq!(h.process.starts(), 2);
    assert_eq!(h.process.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn early_crash_escalates_backoff_when_enabled() {
    let mut cfg = test_config();
    cfg.crash_loop.escalate_early = true;
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.process.exit(1);
    let backoff = h.events.until(EventKind::BackoffScheduled).await;
    assert_eq!(backoff.delay(), Some(Duration::from_secs(30)));
    assert_eq!(backoff.attempt, Some(1));

    h.events.until_nth(EventKind::Start, 2).await;
    sleep(Duration::from_secs(60)).await;
    h.process.exit(1);
    let backoff = h.events.until_nth(EventKind::BackoffScheduled, 2).await;
    assert_eq!(backoff.delay(), Some(Duration::from_secs(30)));
    assert_eq!(backoff.attempt, Some(2));
}

#[tokio::test(start_paused = true)]
async fn zero_exit_without_stop_request_is_a_crash() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    sleep(Duration::from_secs(60)).await;
    h.process.exit(0);

    let crash = h.events.until(EventKind::Crash).await;
    assert!(!crash.detail.as_deref().unwrap().contains("early"));
    assert_eq!(h.events.count(EventKind::Stop), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_exit_is_clean_when_configured() {
    let cfg = Config {
        zero_exit_is_clean: true,
        ..test_config()
    };
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.process.exit(0);
    h.events.until(EventKind::Stop).await;
    wait_state(&h.handle, ServerState::Idle).await;
    assert_eq!(h.events.count(EventKind::Crash), 0);
}

#[tokio::test(start_paused = true)]
async fn crash_loop_halts_after_max_restarts() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    for n in 1..=4 {
        h.events.until_nth(EventKind::Start, n).await;
        h.process.exit(1);
        h.events.until_nth(EventKind::Crash, n).await;
    }

    let halt = h.events.until(EventKind::CrashLoopExceeded).await;
    assert_eq!(halt.attempt, Some(4));
    wait_state(&h.handle, ServerState::Idle).await;

    let delays: Vec<_> = h
        .events
        .seen
        .iter()
        .filter(|e| e.kind == EventKind::BackoffScheduled)
        .map(|e| e.delay().unwrap().as_secs())
        .collect();
    assert_eq!(delays, vec![5, 30, 120]);
    assert_eq!(h.process.starts(), 4);

    // No further restarts happen on their own.
    sleep(Duration::from_secs(600)).await;
    assert_eq!(h.process.starts(), 4);

    // An explicit start clears the history.
    h.handle.start().unwrap();
    h.events.until_nth(EventKind::Start, 5).await;
    h.process.exit(1);
    let backoff = h.events.until_nth(EventKind::BackoffScheduled, 4).await;
    assert_eq!(backoff.delay(), Some(Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn crash_without_auto_restart_goes_idle() {
    let settings = Settings {
        enable_auto_restart: false,
        ..test_settings()
    };
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(settings),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.process.exit(3);
    h.events.until(EventKind::Crash).await;
    wait_state(&h.handle, ServerState::Idle).await;
    sleep(Duration::from_secs(300)).await;
    h.events.drain();
    assert_eq!(h.events.count(EventKind::BackoffScheduled), 0);
    assert_eq!(h.process.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_cancels_restart() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.process.exit(1);
    h.events.until(EventKind::BackoffScheduled).await;

    h.handle.stop().unwrap();
    wait_state(&h.handle, ServerState::Idle).await;
    sleep(Duration::from_secs(60)).await;
    h.events.drain();
    assert_eq!(h.events.count(EventKind::RestartAfterCrash), 0);
    assert_eq!(h.process.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn launch_failure_goes_idle_without_retry() {
    let process = Arc::new(FakeProcess::default());
    process.fail_next_start();
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        process,
        None,
    );

    h.handle.start().unwrap();
    let failed = h.events.until(EventKind::LaunchFailed).await;
    assert!(failed.detail.as_deref().unwrap().contains("not found"));
    wait_state(&h.handle, ServerState::Idle).await;

    sleep(Duration::from_secs(120)).await;
    h.events.drain();
    assert_eq!(h.events.count(EventKind::Start), 0);
    assert_eq!(h.process.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_while_running_stops_installs_and_starts() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(30 * 60),
        ..test_config()
    };
    let store = SettingsStore::in_memory(test_settings());
    let installer = Arc::new(FakeInstaller::new("1.5.0"));
    let mut h = spawn(
        cfg,
        store.clone(),
        Arc::new(FakeProcess::default()),
        Some(installer.clone()),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.events.until(EventKind::UpdateAvailable).await;
    h.events.until_nth(EventKind::Start, 2).await;

    assert_eq!(
        h.events.story(),
        vec![
            EventKind::Start,
            EventKind::UpdateAvailable,
            EventKind::Stop,
            EventKind::UpdateApplied,
            EventKind::Start,
        ]
    );
    assert_eq!(
        h.events.states(),
        vec![
            ServerState::Starting,
            ServerState::Running,
            ServerState::CheckingUpdate,
            ServerState::Updating,
            ServerState::Starting,
            ServerState::Running,
        ]
    );
    assert_eq!(installer.installs(), vec!["1.5.0".to_string()]);
    assert_eq!(store.snapshot().last_server_version, "1.5.0");
    assert_eq!(h.process.stops(), 1);
    assert_eq!(h.process.starts(), 2);
    assert_eq!(h.handle.update_status().unwrap().remote_version, "1.5.0");
}

#[tokio::test(start_paused = true)]
async fn up_to_date_check_returns_to_running() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        Some(Arc::new(FakeInstaller::new("1.4.0"))),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    sleep(Duration::from_secs(61)).await;
    wait_state(&h.handle, ServerState::Running).await;

    let status = h.handle.update_status().expect("checked");
    assert!(!status.update_available);
    h.events.drain();
    assert_eq!(h.events.count(EventKind::UpdateAvailable), 0);
    assert_eq!(h.process.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_check_keeps_running() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let installer = FakeInstaller {
        remote: None,
        ..FakeInstaller::new("")
    };
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        Some(Arc::new(installer)),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    let failed = h.events.until(EventKind::UpdateCheckFailed).await;
    assert!(failed.detail.as_deref().unwrap().contains("unreachable"));
    wait_state(&h.handle, ServerState::Running).await;
    assert_eq!(h.process.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn install_failure_restarts_previous_build() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let store = SettingsStore::in_memory(test_settings());
    let installer = Arc::new(FakeInstaller {
        fail_install: true,
        ..FakeInstaller::new("1.5.0")
    });
    let mut h = spawn(
        cfg,
        store.clone(),
        Arc::new(FakeProcess::default()),
        Some(installer),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    let failed = h.events.until(EventKind::UpdateFailed).await;
    assert_eq!(failed.version.as_deref(), Some("1.5.0"));
    h.events.until_nth(EventKind::Start, 2).await;

    assert_eq!(store.snapshot().last_server_version, "1.4.0");
    assert_eq!(h.events.count(EventKind::UpdateApplied), 0);
    assert_eq!(h.process.starts(), 2);
    assert_eq!(h.handle.state(), ServerState::Running);
}

#[tokio::test(start_paused = true)]
async fn failed_install_is_not_retried_for_the_same_version() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let installer = Arc::new(FakeInstaller {
        fail_install: true,
        ..FakeInstaller::new("1.5.0")
    });
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        Some(installer.clone()),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.events.until(EventKind::UpdateFailed).await;
    h.events.until_nth(EventKind::Start, 2).await;

    sleep(Duration::from_secs(600)).await;
    wait_state(&h.handle, ServerState::Running).await;
    h.events.drain();
    assert_eq!(h.events.count(EventKind::UpdateFailed), 1);
    assert_eq!(h.events.count(EventKind::UpdateAvailable), 1);
    assert_eq!(installer.installs(), vec!["1.5.0".to_string()]);
    assert_eq!(h.process.stops(), 1);
    assert_eq!(h.process.starts(), 2);

    // Re-enabling update checks clears the failure.
    h.handle.set_feature("check_updates", true).unwrap();
    h.events.until_nth(EventKind::UpdateFailed, 2).await;
    h.events.until_nth(EventKind::Start, 3).await;
    assert_eq!(installer.installs().len(), 2);
    assert_eq!(h.process.stops(), 2);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_restart_and_update_issue_one_stop() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(30 * 60),
        ..test_config()
    };
    let settings = Settings {
        enable_schedule: true,
        restart_interval_hours: 0.5,
        ..test_settings()
    };
    let installer = Arc::new(FakeInstaller {
        check_delay: Duration::from_secs(10),
        ..FakeInstaller::new("1.5.0")
    });
    let process = Arc::new(FakeProcess::with_stop_delay(Duration::from_secs(3)));
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(settings),
        process,
        Some(installer),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.events.until_nth(EventKind::Start, 2).await;
    sleep(Duration::from_secs(60)).await;
    h.events.drain();

    assert_eq!(h.process.stops(), 1);
    assert_eq!(h.process.starts(), 2);
    assert_eq!(h.events.count(EventKind::Stop), 1);
    assert_eq!(h.handle.state(), ServerState::Running);
}

#[tokio::test(start_paused = true)]
async fn restart_during_check_is_deferred_until_check_resolves() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(29 * 60),
        ..test_config()
    };
    let settings = Settings {
        enable_schedule: true,
        restart_interval_hours: 0.5,
        ..test_settings()
    };
    let installer = Arc::new(FakeInstaller {
        check_delay: Duration::from_secs(120),
        ..FakeInstaller::new("1.4.0")
    });
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(settings),
        Arc::new(FakeProcess::default()),
        Some(installer),
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.events.until(EventKind::ScheduledRestart).await;
    h.events.until_nth(EventKind::Start, 2).await;

    let states = h.events.states();
    let check = states
        .iter()
        .position(|s| *s == ServerState::CheckingUpdate)
        .expect("checked");
    assert_eq!(
        states[check..check + 4],
        [
            ServerState::CheckingUpdate,
            ServerState::Running,
            ServerState::Restarting,
            ServerState::Starting,
        ]
    );
    assert_eq!(h.process.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn scheduled_restart_cycles_the_server() {
    let settings = Settings {
        enable_schedule: true,
        restart_interval_hours: 1.0,
        ..test_settings()
    };
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(settings),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    let started = Instant::now();
    h.events.until(EventKind::ScheduledRestart).await;
    assert!(started.elapsed() >= Duration::from_secs(3600));
    h.events.until(EventKind::Stop).await;
    h.events.until_nth(EventKind::Start, 2).await;
    assert_eq!(h.events.count(EventKind::Crash), 0);
}

#[tokio::test(start_paused = true)]
async fn startup_check_installs_from_idle_and_defers_auto_start() {
    let cfg = Config {
        startup_update_check: true,
        ..test_config()
    };
    let settings = Settings {
        auto_start: true,
        ..test_settings()
    };
    let store = SettingsStore::in_memory(settings);
    let installer = Arc::new(FakeInstaller {
        check_delay: Duration::from_secs(2),
        ..FakeInstaller::new("1.5.0")
    });
    let mut h = spawn(
        cfg,
        store.clone(),
        Arc::new(FakeProcess::default()),
        Some(installer),
    );

    h.events.until(EventKind::Start).await;
    assert_eq!(
        h.events.story(),
        vec![
            EventKind::UpdateAvailable,
            EventKind::UpdateApplied,
            EventKind::Start,
        ]
    );
    assert_eq!(store.snapshot().last_server_version, "1.5.0");
    assert_eq!(h.process.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn update_from_idle_stays_idle() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        Some(Arc::new(FakeInstaller::new("1.5.0"))),
    );

    h.events.until(EventKind::UpdateApplied).await;
    wait_state(&h.handle, ServerState::Idle).await;
    assert_eq!(h.process.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_update_checks_ignore_timer() {
    let cfg = Config {
        update_check_interval: Duration::from_secs(60),
        ..test_config()
    };
    let settings = Settings {
        check_updates: false,
        ..test_settings()
    };
    let mut h = spawn(
        cfg,
        SettingsStore::in_memory(settings),
        Arc::new(FakeProcess::default()),
        Some(Arc::new(FakeInstaller::new("1.5.0"))),
    );

    sleep(Duration::from_secs(600)).await;
    h.events.drain();
    assert!(h.handle.update_status().is_none());
    assert_eq!(h.events.count(EventKind::StateChanged), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_server_and_halts_loop() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::with_stop_delay(Duration::from_secs(2))),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.handle.shutdown().await.unwrap();

    assert_eq!(h.handle.state(), ServerState::Idle);
    h.join.await.unwrap().unwrap();
    h.events.drain();
    assert!(h.events.kinds().contains(&EventKind::ShutdownRequested));
    assert_eq!(h.events.count(EventKind::Stop), 1);
    assert!(matches!(h.handle.start(), Err(RuntimeError::SupervisorGone)));
}

#[tokio::test(start_paused = true)]
async fn repeated_stop_is_sent_once() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::with_stop_delay(Duration::from_secs(5))),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.handle.stop().unwrap();
    h.handle.stop().unwrap();
    h.handle.restart_now().unwrap();
    h.handle.stop().unwrap();
    h.events.until(EventKind::Stop).await;
    wait_state(&h.handle, ServerState::Idle).await;
    assert_eq!(h.process.stops(), 1);
    assert_eq!(h.process.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_now_cycles_the_server() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.handle.restart_now().unwrap();
    h.events.until_nth(EventKind::Start, 2).await;
    assert_eq!(
        h.events.story(),
        vec![EventKind::Start, EventKind::Stop, EventKind::Start]
    );
    assert!(h.events.states().contains(&ServerState::Restarting));
}

#[tokio::test(start_paused = true)]
async fn feature_toggles_and_console() {
    let store = SettingsStore::in_memory(test_settings());
    let mut h = spawn(
        test_config(),
        store.clone(),
        Arc::new(FakeProcess::default()),
        None,
    );

    assert!(matches!(
        h.handle.set_feature("turbo", true),
        Err(RuntimeError::UnknownFeature { .. })
    ));
    h.handle.set_feature("auto_restart", false).unwrap();
    let ev = h.events.until(EventKind::FeatureChanged).await;
    assert_eq!(ev.detail.as_deref(), Some("auto_restart=false"));
    assert!(!store.snapshot().enable_auto_restart);

    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    h.handle.send_console("say hello").unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.process.console(), vec!["say hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn uptime_tracks_live_process() {
    let mut h = spawn(
        test_config(),
        SettingsStore::in_memory(test_settings()),
        Arc::new(FakeProcess::default()),
        None,
    );

    assert_eq!(h.handle.uptime(), None);
    h.handle.start().unwrap();
    h.events.until(EventKind::Start).await;
    sleep(Duration::from_secs(90)).await;
    let up = h.handle.uptime().expect("running");
    assert!(up >= Duration::from_secs(90));
}

mod backups {
    use super::*;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> Layout {
        Layout {
            server_dir: dir.path().to_path_buf(),
            ..Layout::default()
        }
    }

    fn cfg(dir: &TempDir) -> Config {
        Config {
            layout: layout(dir),
            poll_interval: Duration::from_millis(20),
            ..test_config()
        }
    }

    #[tokio::test]
    async fn backup_precedes_start() {
        let dir = TempDir::new().unwrap();
        let world = layout(&dir).world_path();
        std::fs::create_dir_all(&world).unwrap();
        std::fs::write(world.join("level.dat"), b"level").unwrap();

        let settings = Settings {
            enable_backups: true,
            ..test_settings()
        };
        let mut h = spawn(
            cfg(&dir),
            SettingsStore::in_memory(settings),
            Arc::new(FakeProcess::default()),
            None,
        );

        h.handle.start().unwrap();
        let created = h.events.until(EventKind::BackupCreated).await;
        h.events.until(EventKind::Start).await;
        assert_eq!(h.events.story(), vec![EventKind::BackupCreated, EventKind::Start]);

        let path = created.path.expect("archive path");
        assert!(path.starts_with(layout(&dir).backup_path()));
        assert_eq!(h.handle.backups().len(), 1);
        assert_eq!(h.handle.backups()[0].path, path);
    }

    #[tokio::test]
    async fn failed_backup_does_not_block_start() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            enable_backups: true,
            ..test_settings()
        };
        let mut h = spawn(
            cfg(&dir),
            SettingsStore::in_memory(settings),
            Arc::new(FakeProcess::default()),
            None,
        );

        h.handle.start().unwrap();
        h.events.until(EventKind::BackupFailed).await;
        h.events.until(EventKind::Start).await;
        assert_eq!(h.process.starts(), 1);
    }

    #[tokio::test]
    async fn fatal_backup_failure_aborts_start() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            enable_backups: true,
            backup_failure_fatal: true,
            ..test_settings()
        };
        let mut h = spawn(
            cfg(&dir),
            SettingsStore::in_memory(settings),
            Arc::new(FakeProcess::default()),
            None,
        );

        h.handle.start().unwrap();
        h.events.until(EventKind::BackupFailed).await;
        let failed = h.events.until(EventKind::LaunchFailed).await;
        assert!(failed.detail.as_deref().unwrap().contains("backup"));
        wait_state(&h.handle, ServerState::Idle).await;
        assert_eq!(h.process.starts(), 0);
    }
}
