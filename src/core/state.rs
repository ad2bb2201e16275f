//! Authoritative lifecycle state.

use std::fmt;

/// Lifecycle state of the managed server.
///
/// Exactly one value at a time, owned by the decision loop and exported
/// read-only through [`SupervisorHandle::state`](crate::SupervisorHandle::state).
///
/// ```text
/// Idle ──start──► Starting ──alive──► Running ──stop──► StoppingRequested ──exit──► Idle
///                    ▲                  │ │ │
///                    │        restart ──┘ │ └── crash ──► CrashRecovering ──backoff──┐
///                    │   (Restarting)     │                                          │
///                    ├────────────────────┴── update ──► CheckingUpdate ─► Updating  │
///                    └───────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    #[default]
    Idle,
    Starting,
    Running,
    StoppingRequested,
    Restarting,
    CheckingUpdate,
    Updating,
    CrashRecovering,
}

impl ServerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::StoppingRequested => "stopping",
            ServerState::Restarting => "restarting",
            ServerState::CheckingUpdate => "checking_update",
            ServerState::Updating => "updating",
            ServerState::CrashRecovering => "crash_recovering",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
