//! Outbound delivery hooks for critical notifications.
//!
//! Neither channel performs real I/O yet; both log what they would send.

use super::Notification;
use crate::errors::NotificationError;
use async_trait::async_trait;
use tracing::info;

/// An outbound channel for critical notifications.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name used in logs.
    fn name(&self) -> &str;

    /// Sends one notification.
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Email delivery placeholder.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    recipients: Vec<String>,
}

impl EmailChannel {
    /// Creates a channel addressed to `recipients`.
    #[must_use]
    pub fn new(recipients: Vec<String>) -> Self {
        Self { recipients }
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            channel = "email",
            recipients = ?self.recipients,
            title = %notification.title,
            "Email delivery not configured, notification logged only"
        );
        Ok(())
    }
}

/// Webhook delivery placeholder.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    url: String,
}

impl WebhookChannel {
    /// Creates a channel posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            channel = "webhook",
            url = %self.url,
            title = %notification.title,
            "Webhook delivery not configured, notification logged only"
        );
        Ok(())
    }
}
