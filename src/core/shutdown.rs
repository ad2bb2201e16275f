//! Termination signals for [`Supervisor::run_until_signal`](crate::Supervisor::run_until_signal).
//!
//! Unix: `SIGINT`, `SIGTERM` (systemd, `kill`), `SIGQUIT`.
//! Elsewhere: Ctrl-C only.

use tracing::info;

/// Completes on the first termination signal; `Err` if registration fails.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    info!(signal = name, "shutdown signal");
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl-c", "shutdown signal");
    Ok(())
}
