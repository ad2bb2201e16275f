//! Runtime core: the decision loop and its public surface.
//!
//! The public API from this module is [`Supervisor`] (owns and runs the loop),
//! [`SupervisorHandle`] (commands and read-only views), [`SupervisorBuilder`]
//! and [`ServerState`].
//!
//! Internal modules:
//! - [`engine`]: the single decision loop and its transition table;
//! - [`command`]: messages consumed by the loop;
//! - [`shutdown`]: cross-platform termination signals;
//! - [`state`]: the lifecycle state enum.

mod builder;
mod command;
mod engine;
mod shutdown;
mod state;
mod supervisor;

#[cfg(test)]
mod tests;

pub use builder::{LaunchFn, SupervisorBuilder};
pub(crate) use command::Msg;
pub use state::ServerState;
pub use supervisor::{Supervisor, SupervisorHandle};
