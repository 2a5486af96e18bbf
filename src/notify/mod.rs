//! Notification delivery to end-user devices.
//!
//! This module provides:
//! - The `Notifier` trait every delivery channel implements
//! - `NotificationKind`, the closed set of message kinds a device understands
//! - `PushNotifier`, which hands messages to the device push gateway over HTTP
//! - `ConnectionHub`, an in-process registry of live device links with
//!   concurrent broadcast
//!
//! # Architecture
//!
//! ```text
//! dispatch.rs / jobs/ -> Notifier -> PushNotifier -> gateway -> device
//!                                 \-> ConnectionHub -> DeviceLink
//! ```
//!
//! Delivery failures never propagate past the caller that asked for the
//! notification: they are logged, counted, and returned as `NotifyError` so
//! the caller can decide whether to care.

pub mod hub;
pub mod push;

#[cfg(test)]
pub(crate) mod mock;

pub use hub::{BroadcastSummary, ConnectionHub, DeviceLink};
pub use push::PushNotifier;

use crate::error::NotifyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// NotificationKind
// =============================================================================

/// Kind of a notification, sent on the wire as a snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
    System,
    Urgent,
    #[serde(rename = "alert_analysis_result")]
    AnalysisResult,
    InspectionResult,
    RollbackResult,
    RecoveryCheckResult,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
            Self::System => "system",
            Self::Urgent => "urgent",
            Self::AnalysisResult => "alert_analysis_result",
            Self::InspectionResult => "inspection_result",
            Self::RollbackResult => "rollback_result",
            Self::RecoveryCheckResult => "recovery_check_result",
        }
    }

    /// Spoken prefix for the generic kinds. Job results are delivered as-is.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Info => Some("Reminder: "),
            Self::Warning => Some("Notice: "),
            Self::Error => Some("Error: "),
            Self::Success => Some("Success: "),
            Self::System => Some("System: "),
            Self::Urgent => Some("Urgent: "),
            Self::AnalysisResult
            | Self::InspectionResult
            | Self::RollbackResult
            | Self::RecoveryCheckResult => None,
        }
    }

    /// Apply the kind's prefix to a message.
    pub fn format(&self, message: &str) -> String {
        match self.prefix() {
            Some(prefix) => format!("{prefix}{message}"),
            None => message.to_string(),
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Notifier trait
// =============================================================================

/// A channel that can deliver a message to one addressed recipient.
///
/// Implementations handle their own retry/backoff and must be `Send + Sync`
/// so a single instance can be shared by the dispatcher and every job.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in logs and metric labels (e.g., "push", "hub").
    fn name(&self) -> &str;

    /// Deliver `message` to `recipient`.
    ///
    /// # Errors
    ///
    /// * `RecipientNotFound` - the recipient is unknown
    /// * `ConnectionClosed` - the recipient is known but not connected
    /// * `SendFailed` / `MaxRetriesExceeded` - transport failure
    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError>;
}

impl std::fmt::Debug for dyn Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name())
            .finish()
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Calculate exponential backoff delay.
///
/// Formula: min(base * 2^attempt, max)
///
/// # Arguments
///
/// * `attempt` - Current attempt number (0-indexed)
/// * `base` - Base delay duration
/// * `max` - Maximum delay cap
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = base.saturating_mul(2_u32.saturating_pow(attempt));
    std::cmp::min(delay, max)
}
