//! Device push gateway notifier.
//!
//! Hands each message to the gateway that owns the live device connections.
//! The gateway answers 404 for an unknown device and 410 for a device whose
//! connection has just closed; both are reported to the caller as distinct
//! errors and never retried.

use crate::config::{PushSettings, SecretString};
use crate::error::NotifyError;
use crate::notify::{NotificationKind, Notifier, backoff_delay};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::Instrument;

/// Backoff base delay for push retries.
const PUSH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Maximum backoff delay for push retries.
const PUSH_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Maximum number of delivery attempts.
const PUSH_MAX_RETRIES: u32 = 3;

/// Body of a push request.
///
/// `bypass_llm` tells the gateway to speak the text verbatim instead of
/// routing it through the conversational model first.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    pub device_id: &'a str,
    pub message: &'a str,
    pub auth_key: &'a str,
    pub bypass_llm: bool,
    pub notification_type: NotificationKind,
}

/// Notifier that POSTs to the device push gateway.
///
/// # Retry Policy
///
/// - **5xx errors**: Retry with exponential backoff
/// - **Network errors**: Retry with exponential backoff
/// - **404 / 410**: `RecipientNotFound` / `ConnectionClosed`, no retry
/// - **Other 4xx errors**: `SendFailed`, no retry
pub struct PushNotifier {
    client: reqwest::Client,
    url: String,
    auth_key: SecretString,
}

impl PushNotifier {
    /// Build a notifier with its own HTTP client using the configured timeout.
    pub fn from_settings(settings: &PushSettings) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| NotifyError::SendFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client, settings.url.clone(), settings.auth_key.clone()))
    }

    pub fn new(client: reqwest::Client, url: String, auth_key: SecretString) -> Self {
        Self {
            client,
            url,
            auth_key,
        }
    }

    fn record_failure(kind: NotificationKind) {
        metrics::counter!(
            "alertd_notifications_failed_total",
            "notifier" => "push",
            "kind" => kind.as_str()
        )
        .increment(1);
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    fn name(&self) -> &str {
        "push"
    }

    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        let span = tracing::info_span!("send_push", recipient = %recipient, kind = %kind);

        async {
            let request = PushRequest {
                device_id: recipient,
                message,
                auth_key: self.auth_key.expose(),
                bypass_llm: true,
                notification_type: kind,
            };

            for attempt in 0..PUSH_MAX_RETRIES {
                match self.client.post(&self.url).json(&request).send().await {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!("Push notification delivered");
                        metrics::counter!(
                            "alertd_notifications_sent_total",
                            "notifier" => "push",
                            "kind" => kind.as_str()
                        )
                        .increment(1);
                        return Ok(());
                    }
                    Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                        tracing::warn!("Push gateway does not know this device");
                        Self::record_failure(kind);
                        return Err(NotifyError::RecipientNotFound(recipient.to_string()));
                    }
                    Ok(response) if response.status() == StatusCode::GONE => {
                        tracing::warn!("Device connection closed");
                        Self::record_failure(kind);
                        return Err(NotifyError::ConnectionClosed(recipient.to_string()));
                    }
                    Ok(response) if response.status().is_client_error() => {
                        let status = response.status();
                        tracing::error!(status = %status, "Push gateway returned client error, not retrying");
                        Self::record_failure(kind);
                        return Err(NotifyError::SendFailed(format!("client error: {}", status)));
                    }
                    Ok(response) => {
                        tracing::warn!(
                            attempt = attempt,
                            status = %response.status(),
                            "Push gateway returned server error, retrying"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(attempt = attempt, error = %e, "Failed to reach push gateway, retrying");
                    }
                }

                if attempt < PUSH_MAX_RETRIES - 1 {
                    let delay = backoff_delay(attempt, PUSH_BACKOFF_BASE, PUSH_BACKOFF_MAX);
                    tracing::debug!(delay_ms = delay.as_millis(), "Waiting before retry");
                    tokio::time::sleep(delay).await;
                }
            }

            tracing::error!(
                max_retries = PUSH_MAX_RETRIES,
                "Failed to deliver push notification after all retries"
            );
            Self::record_failure(kind);
            Err(NotifyError::MaxRetriesExceeded)
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for PushNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushNotifier")
            .field("url", &self.url)
            .field("auth_key", &self.auth_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_request_serializes_gateway_fields() {
        let request = PushRequest {
            device_id: "a4:cf:12:9e:00:01",
            message: "analysis done",
            auth_key: "gw-auth",
            bypass_llm: true,
            notification_type: NotificationKind::AnalysisResult,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["device_id"], "a4:cf:12:9e:00:01");
        assert_eq!(value["bypass_llm"], true);
        assert_eq!(value["notification_type"], "alert_analysis_result");
    }

    #[test]
    fn debug_redacts_auth_key() {
        let notifier = PushNotifier::new(
            reqwest::Client::new(),
            "http://localhost:8003/xiaozhi/push/message".to_string(),
            SecretString::from("gw-super-secret"),
        );

        let debug = format!("{:?}", notifier);
        assert!(!debug.contains("gw-super-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(notifier.name(), "push");
    }
}
