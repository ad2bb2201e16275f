//! # Timers feeding the decision loop.
//!
//! Two independent, cancellable timers. Neither acts on the server: each fire
//! is posted into the loop as a message, and the loop decides.
//!
//! - **update check**: every `Config::update_check_interval`, posts
//!   `UpdateTick`. The loop drops ticks outside `Running` / `Idle`.
//! - **scheduled restart**: armed each time the server reaches `Running`
//!   (when `enable_schedule` is set). Fires once, at the next `restart_at`
//!   wall-clock time if any are configured, otherwise
//!   `restart_interval_hours` after the start. Posts `RestartTick { run }`
//!   tagged with the process run it was armed for.

use std::time::Duration;

use chrono::{DateTime, Days, Local, TimeZone};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::Msg;
use crate::settings::Settings;

pub(crate) struct Scheduler {
    tx: UnboundedSender<Msg>,
    root: CancellationToken,
    restart: Option<CancellationToken>,
}

impl Scheduler {
    pub(crate) fn new(tx: UnboundedSender<Msg>, root: CancellationToken) -> Self {
        Self {
            tx,
            root,
            restart: None,
        }
    }

    /// Starts the periodic update-check timer; `None` disables it.
    pub(crate) fn start_update_timer(&self, period: Option<Duration>) {
        let Some(period) = period else {
            debug!("update-check timer disabled");
            return;
        };
        let tx = self.tx.clone();
        let token = self.root.child_token();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Msg::UpdateTick).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Arms the restart timer for process run `run`, replacing any armed one.
    pub(crate) fn arm_restart(&mut self, settings: &Settings, run: u64) {
        self.disarm_restart();
        if !settings.enable_schedule {
            return;
        }
        let Some(delay) = next_restart_delay(settings, Local::now()) else {
            debug!("schedule enabled but no valid restart time or interval");
            return;
        };
        debug!(?delay, run, "scheduled restart armed");

        let tx = self.tx.clone();
        let token = self.root.child_token();
        self.restart = Some(token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => {
                    let _ = tx.send(Msg::RestartTick { run });
                }
            }
        });
    }

    pub(crate) fn disarm_restart(&mut self) {
        if let Some(token) = self.restart.take() {
            token.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disarm_restart();
    }
}

/// Delay until the next scheduled restart as seen at `now`.
///
/// Daily `restart_at` times win over the interval when at least one parses.
pub fn next_restart_delay<Tz: TimeZone>(settings: &Settings, now: DateTime<Tz>) -> Option<Duration> {
    let times = settings.restart_times();
    if times.is_empty() {
        return settings.restart_interval();
    }
    let tz = now.timezone();
    let today = now.date_naive();
    times
        .iter()
        .filter_map(|t| {
            [today, today.checked_add_days(Days::new(1))?]
                .into_iter()
                .filter_map(|day| tz.from_local_datetime(&day.and_time(*t)).earliest())
                .find(|at| *at > now)
        })
        .map(|at| at.signed_duration_since(now.clone()))
        .min()
        .and_then(|d| d.to_std().ok())
}
