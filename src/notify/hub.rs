//! In-process registry of live device connections.
//!
//! A `DeviceLink` is whatever transport session a device holds open
//! (WebSocket, long-poll, test double). The hub addresses links by device
//! id, delivers to one, or fans a message out to all of them concurrently.

use crate::error::NotifyError;
use crate::notify::{NotificationKind, Notifier};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Pause after aborting a device's current speech before sending new text.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// One live connection to a device.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    fn device_id(&self) -> &str;

    /// Whether the underlying transport is still open.
    fn is_open(&self) -> bool;

    /// Whether the device is currently playing back a message.
    fn is_speaking(&self) -> bool;

    /// Interrupt the message currently being played back.
    fn abort_output(&self);

    /// Send already-formatted text to the device.
    async fn deliver(&self, text: &str, kind: NotificationKind) -> Result<(), NotifyError>;
}

/// Result of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastSummary {
    pub success_count: usize,
    pub total_count: usize,
}

/// Registry of live device links.
pub struct ConnectionHub {
    links: RwLock<HashMap<String, Arc<dyn DeviceLink>>>,
    settle_delay: Duration,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl ConnectionHub {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            settle_delay,
        }
    }

    /// Register a link, replacing any previous link for the same device.
    pub async fn register(&self, link: Arc<dyn DeviceLink>) {
        let device_id = link.device_id().to_string();
        let replaced = self
            .links
            .write()
            .await
            .insert(device_id.clone(), link)
            .is_some();
        info!(device_id = %device_id, replaced, "Device link registered");
    }

    pub async fn unregister(&self, device_id: &str) -> Option<Arc<dyn DeviceLink>> {
        let removed = self.links.write().await.remove(device_id);
        if removed.is_some() {
            info!(device_id = %device_id, "Device link unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.read().await.is_empty()
    }

    /// Deliver a message to one device.
    ///
    /// # Errors
    ///
    /// `RecipientNotFound` when no link is registered for `device_id`,
    /// `ConnectionClosed` when a link exists but its transport is closed,
    /// or whatever the link's own delivery returns.
    pub async fn notify_one(
        &self,
        device_id: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        let link = self
            .links
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| NotifyError::RecipientNotFound(device_id.to_string()))?;

        if !link.is_open() {
            return Err(NotifyError::ConnectionClosed(device_id.to_string()));
        }

        self.deliver(link.as_ref(), message, kind).await
    }

    /// Deliver a message to every open link not listed in `exclude`.
    ///
    /// Deliveries run concurrently; a failing device does not affect the
    /// others. `total_count` counts the devices a delivery was attempted for.
    pub async fn broadcast(
        &self,
        message: &str,
        kind: NotificationKind,
        exclude: &[&str],
    ) -> BroadcastSummary {
        let targets: Vec<Arc<dyn DeviceLink>> = self
            .links
            .read()
            .await
            .values()
            .filter(|link| !exclude.contains(&link.device_id()))
            .filter(|link| link.is_open())
            .cloned()
            .collect();

        let total_count = targets.len();
        let results = join_all(targets.iter().map(|link| async move {
            let result = self.deliver(link.as_ref(), message, kind).await;
            if let Err(ref e) = result {
                warn!(device_id = %link.device_id(), error = %e, "Broadcast delivery failed");
            }
            result
        }))
        .await;

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        info!(success_count, total_count, kind = %kind, "Broadcast finished");
        BroadcastSummary {
            success_count,
            total_count,
        }
    }

    async fn deliver(
        &self,
        link: &dyn DeviceLink,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        if link.is_speaking() {
            debug!(device_id = %link.device_id(), "Interrupting current output");
            link.abort_output();
            tokio::time::sleep(self.settle_delay).await;
        }

        let result = link.deliver(&kind.format(message), kind).await;
        if result.is_ok() {
            metrics::counter!("alertd_notifications_sent_total", "notifier" => "hub", "kind" => kind.as_str())
                .increment(1);
        } else {
            metrics::counter!("alertd_notifications_failed_total", "notifier" => "hub", "kind" => kind.as_str())
                .increment(1);
        }
        result
    }
}

#[async_trait]
impl Notifier for ConnectionHub {
    fn name(&self) -> &str {
        "hub"
    }

    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        self.notify_one(recipient, message, kind).await
    }
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}
