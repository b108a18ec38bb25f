//! Outbound notifications about task outcomes.
//!
//! Notifications are fire-and-forget from the orchestrator's point of view:
//! delivery errors are returned to the caller, which only logs them.
//!
//! # Main types
//!
//! - [`Notifier`] — Trait for delivering a [`TaskEvent`] somewhere.
//! - [`TaskEvent`] — A finished task worth telling a human about.
//! - [`NotifierSet`] — Fans one event out to several notifiers.
//! - [`TelegramNotifier`] — Telegram Bot API delivery with action buttons.

/// Fan-out over several notifiers.
pub mod manager;
/// Notifier trait and event type.
pub mod notifier;
/// Telegram Bot API notifier.
pub mod telegram;

pub use manager::NotifierSet;
pub use notifier::{EventAction, Notifier, TaskEvent};
pub use telegram::TelegramNotifier;
