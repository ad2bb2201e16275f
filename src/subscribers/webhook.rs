//! # WebhookNotifier: lifecycle events to a chat webhook
//!
//! Posts `{"content": "<message>"}` (Discord-compatible) for lifecycle
//! events. Whether to post, and where, is read from a fresh
//! [`Settings`](crate::Settings) snapshot for every event, so toggling the
//! webhook takes effect immediately.
//!
//! Delivery failures are logged and never retried.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::events::{Event, EventKind};
use crate::settings::SettingsStore;
use crate::subscribers::Subscribe;

/// Webhook notifier subscriber.
pub struct WebhookNotifier {
    settings: SettingsStore,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(settings: SettingsStore) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("servervisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "webhook client build failed, using defaults");
                reqwest::Client::new()
            });
        Self { settings, client }
    }
}

/// Human-readable message for an event, or `None` if the event is not announced.
pub fn message_for(e: &Event) -> Option<String> {
    let msg = match e.kind {
        EventKind::Start => "Server started".to_string(),
        EventKind::Stop => match e.exit {
            Some(exit) => format!("Server stopped ({exit})"),
            None => "Server stopped".to_string(),
        },
        EventKind::Crash => match e.exit {
            Some(exit) => format!("Server crashed ({exit})"),
            None => "Server crashed".to_string(),
        },
        EventKind::BackoffScheduled => {
            let secs = e.delay().unwrap_or_default().as_secs();
            format!("Crash detected. Restarting in {secs}s...")
        }
        EventKind::CrashLoopExceeded => {
            "Crash loop detected. Automatic restarts halted; manual start required".to_string()
        }
        EventKind::ScheduledRestart => "Executing scheduled restart...".to_string(),
        EventKind::UpdateApplied => format!(
            "Server updated to {}",
            e.version.as_deref().unwrap_or("a new version")
        ),
        EventKind::UpdateFailed => format!(
            "Server update failed: {}",
            e.detail.as_deref().unwrap_or("unknown error")
        ),
        EventKind::BackupCreated => "World backup created".to_string(),
        EventKind::BackupFailed => format!(
            "World backup failed: {}",
            e.detail.as_deref().unwrap_or("unknown error")
        ),
        EventKind::LaunchFailed => format!(
            "Server failed to start: {}",
            e.detail.as_deref().unwrap_or("unknown error")
        ),
        _ => return None,
    };
    Some(msg)
}

#[async_trait]
impl Subscribe for WebhookNotifier {
    async fn on_event(&self, e: &Event) {
        let Some(message) = message_for(e) else {
            return;
        };
        let snapshot = self.settings.snapshot();
        let Some(url) = snapshot.webhook() else {
            return;
        };

        let res = self
            .client
            .post(url)
            .json(&json!({ "content": message }))
            .send()
            .await;
        match res {
            Ok(resp) if resp.status().is_success() => debug!(kind = ?e.kind, "webhook delivered"),
            Ok(resp) => warn!(status = %resp.status(), "webhook rejected"),
            Err(err) => warn!(error = %err, "webhook delivery failed"),
        }
    }

    fn name(&self) -> &'static str {
        "WebhookNotifier"
    }

    fn queue_capacity(&self) -> usize {
        64
    }
}
