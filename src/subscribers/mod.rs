//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out,
//! and the built-in subscribers.
//!
//! ## Architecture
//! ```text
//! decision loop ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//!                                                                    │
//!                                          ┌─────────────┬───────────┴─────┐
//!                                          ▼             ▼                 ▼
//!                                      LogWriter  WebhookNotifier   UI / custom
//! ```
//!
//! ## Built-in
//! - [`LogWriter`] renders events as `tracing` records.
//! - [`WebhookNotifier`] posts lifecycle events to a webhook (feature `webhook`).

mod log;
mod set;
mod subscribe;
#[cfg(feature = "webhook")]
mod webhook;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
#[cfg(feature = "webhook")]
pub use webhook::{WebhookNotifier, message_for};
