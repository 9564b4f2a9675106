use crate::error::TransportError;
use crate::types::AlertRecord;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::NOTIFICATIONS;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Outbound, best-effort alert notification
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), TransportError>;

    fn name(&self) -> &'static str;
}

/// Posts `{"message": ...}` to a fixed URL
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(&self, message: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        info!(url = %self.url, status = %response.status(), "webhook notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Writes notifications to the log only
#[derive(Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn notify(&self, message: &str) -> Result<(), TransportError> {
        info!(message = %message, "notification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Human-readable notification text for a freshly activated alert
pub fn notification_message(record: &AlertRecord) -> String {
    format!("Alert! {}", record.description)
}

/// Fire-and-forget dispatch. The returned handle may be dropped; transport
/// failures are logged here and never reach the caller.
pub fn dispatch_detached(
    dispatcher: Arc<dyn NotificationDispatcher>,
    message: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match dispatcher.notify(&message).await {
            Ok(()) => {
                NOTIFICATIONS.with_label_values(&["sent"]).inc();
            }
            Err(e) => {
                NOTIFICATIONS.with_label_values(&["failed"]).inc();
                warn!(
                    dispatcher = dispatcher.name(),
                    error = %e,
                    "notification dispatch failed"
                );
            }
        }
    })
}
