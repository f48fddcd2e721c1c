//! services/api/src/adapters/notifier.rs
//!
//! Delivery adapters for the `NotificationSender` port. The webhook sender
//! hands each reminder to an external delivery gateway; the log sender is
//! used when no gateway is configured.

use std::time::Duration;

use async_trait::async_trait;
use engagement_core::domain::{Channel, DeliveryResult};
use engagement_core::ports::NotificationSender;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationPayload<'a> {
    client_id: Uuid,
    channel: &'a str,
    message: &'a str,
}

//=========================================================================================
// Webhook Sender
//=========================================================================================

/// Posts `{clientId, channel, message}` to the configured gateway URL. One
/// attempt per call; the scheduler owns fallback and retry.
pub struct WebhookNotificationSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSender {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn try_send(&self, payload: &NotificationPayload<'_>) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    async fn send(&self, client_id: Uuid, channel: Channel, message: &str) -> DeliveryResult {
        let payload = NotificationPayload {
            client_id,
            channel: channel.as_str(),
            message,
        };
        match self.try_send(&payload).await {
            Ok(()) => DeliveryResult::delivered(),
            Err(e) => {
                warn!(%client_id, channel = channel.as_str(), error = %e, "Webhook delivery failed");
                DeliveryResult::failed(e.to_string())
            }
        }
    }
}

//=========================================================================================
// Log Sender
//=========================================================================================

/// Writes each reminder to the log and reports it delivered.
#[derive(Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, client_id: Uuid, channel: Channel, message: &str) -> DeliveryResult {
        info!(%client_id, channel = channel.as_str(), %message, "Reminder delivered");
        DeliveryResult::delivered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_camel_case_keys() {
        let id = Uuid::nil();
        let payload = NotificationPayload {
            client_id: id,
            channel: Channel::InApp.as_str(),
            message: "Hi",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["clientId"], id.to_string());
        assert_eq!(json["channel"], "in_app");
        assert_eq!(json["message"], "Hi");
    }

    #[test]
    fn webhook_error_display_http_status() {
        assert_eq!(
            WebhookError::HttpStatus(502).to_string(),
            "Webhook returned HTTP 502"
        );
    }

    #[tokio::test]
    async fn log_sender_always_delivers() {
        let result = LogNotificationSender
            .send(Uuid::new_v4(), Channel::Sms, "Hello")
            .await;
        assert!(result.delivered);
    }

    #[tokio::test]
    async fn unreachable_gateway_reports_failure() {
        let sender = WebhookNotificationSender::new("http://127.0.0.1:9/notify").unwrap();
        let result = sender.send(Uuid::new_v4(), Channel::Push, "Hello").await;
        assert!(!result.delivered);
        assert!(result.error.is_some());
    }
}
