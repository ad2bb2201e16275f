use std::sync::Arc;

use crate::{
    backup::{Archiver, BackupManager, ZipArchiver},
    config::{Config, Layout},
    process::{LaunchSpec, ProcessControl, ProcessHandle},
    settings::{Settings, SettingsStore},
    subscribers::Subscribe,
    update::Installer,
};

use super::supervisor::Supervisor;

/// Builds the launch command from the layout and a settings snapshot.
pub type LaunchFn = Arc<dyn Fn(&Layout, &Settings) -> LaunchSpec + Send + Sync>;

/// Builder for constructing a [`Supervisor`] with its collaborators.
///
/// Defaults: in-memory default [`Settings`], [`ProcessHandle`],
/// [`ZipArchiver`], the Java dedicated-server command, no installer (update
/// checks disabled) and no subscribers.
pub struct SupervisorBuilder {
    cfg: Config,
    settings: Option<SettingsStore>,
    process: Option<Arc<dyn ProcessControl>>,
    installer: Option<Arc<dyn Installer>>,
    archiver: Option<Arc<dyn Archiver>>,
    launch: Option<LaunchFn>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            settings: None,
            process: None,
            installer: None,
            archiver: None,
            launch: None,
            subscribers: Vec::new(),
        }
    }

    /// Settings store read at every decision.
    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = Some(process);
        self
    }

    /// Enables update checks and installs.
    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Replaces the Java dedicated-server command.
    pub fn with_launch<F>(mut self, launch: F) -> Self
    where
        F: Fn(&Layout, &Settings) -> LaunchSpec + Send + Sync + 'static,
    {
        self.launch = Some(Arc::new(launch));
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive every published event through dedicated workers
    /// with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor. The loop does not run until [`Supervisor::run`].
    pub fn build(self) -> Supervisor {
        let settings = self
            .settings
            .unwrap_or_else(|| SettingsStore::in_memory(Settings::default()));
        let process = self
            .process
            .unwrap_or_else(|| Arc::new(ProcessHandle::new()));
        let archiver = self
            .archiver
            .unwrap_or_else(|| Arc::new(ZipArchiver::new()));
        let launch = self.launch.unwrap_or_else(|| {
            Arc::new(|layout: &Layout, s: &Settings| {
                LaunchSpec::java_server(layout, &s.server_memory)
            })
        });

        Supervisor::new_internal(
            self.cfg,
            settings,
            super::engine::Collaborators {
                process,
                installer: self.installer,
                backups: BackupManager::new(archiver),
                launch,
            },
            self.subscribers,
        )
    }
}
