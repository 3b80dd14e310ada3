//! Operator notifications derived from scheduler events.
//!
//! Notifications are a convenience view, not an audit trail: they live in a
//! bounded in-memory [`NotificationLog`]. Pipeline history is the durable record.

mod delivery;
mod log;
mod service;

pub use delivery::{DeliveryChannel, EmailChannel, WebhookChannel};
pub use log::{NotificationLog, NotificationPage, NotificationQuery, NOTIFICATION_CAPACITY};
pub use service::NotificationService;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Informational.
    Info,
    /// Something finished well.
    Success,
    /// Something failed.
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id.
    pub id: Uuid,
    /// Source event type, e.g. `schedule:failed`.
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Short title.
    pub title: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    /// Severity.
    pub level: NotificationLevel,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Whether an operator has read it.
    pub is_read: bool,
}

impl Notification {
    /// Creates an unread notification.
    #[must_use]
    pub fn new(
        notification_type: impl Into<String>,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            details: HashMap::new(),
            level,
            created_at: Utc::now(),
            is_read: false,
        }
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
