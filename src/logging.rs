//! Process-wide `tracing` setup for binaries embedding the supervisor.
//!
//! `RUST_LOG` overrides the default filter.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a human-readable fmt layer filtered by `RUST_LOG` or `default_filter`.
///
/// Returns `false` when a global subscriber is already set (tests, embedders).
pub fn init(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console = fmt::layer().with_target(true).with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .try_init()
        .is_ok()
}
