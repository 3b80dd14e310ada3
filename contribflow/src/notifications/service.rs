//! Scheduler event to notification mapping.

use super::{DeliveryChannel, Notification, NotificationLevel, NotificationLog, NotificationPage, NotificationQuery};
use crate::errors::NotificationError;
use crate::events::{EventSubscriber, SchedulerEvent, SchedulerEventKind, SubscriberError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Turns scheduler events into notifications and escalates failures.
pub struct NotificationService {
    log: Arc<NotificationLog>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl NotificationService {
    /// Creates a service writing into `log`.
    #[must_use]
    pub fn new(log: Arc<NotificationLog>) -> Self {
        Self {
            log,
            channels: Vec::new(),
        }
    }

    /// Adds a channel used on the critical path.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// The underlying log.
    #[must_use]
    pub fn log(&self) -> &Arc<NotificationLog> {
        &self.log
    }

    /// Records a notification directly.
    pub fn notify(&self, notification: Notification) {
        debug!(notification_type = %notification.notification_type, level = %notification.level, "Notification recorded");
        self.log.push(notification);
    }

    /// Returns a filtered page of notifications.
    #[must_use]
    pub fn get_notifications(&self, query: &NotificationQuery) -> NotificationPage {
        self.log.query(query)
    }

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification is not retained.
    pub fn mark_as_read(&self, id: Uuid) -> Result<Notification, NotificationError> {
        self.log.mark_as_read(id)
    }

    /// Marks every notification read.
    pub fn mark_all_as_read(&self) -> usize {
        self.log.mark_all_as_read()
    }

    /// Unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.log.unread_count()
    }

    /// Builds the notification for an event.
    #[must_use]
    pub fn to_notification(event: &SchedulerEvent) -> Notification {
        let name = &event.schedule_name;
        let pipeline = event.pipeline_type;
        let (level, title, message) = match event.kind {
            SchedulerEventKind::Created => (
                NotificationLevel::Info,
                "Schedule created".to_string(),
                format!("Schedule '{name}' for {pipeline} was created"),
            ),
            SchedulerEventKind::Updated => (
                NotificationLevel::Info,
                "Schedule updated".to_string(),
                format!("Schedule '{name}' for {pipeline} was updated"),
            ),
            SchedulerEventKind::Deleted => (
                NotificationLevel::Info,
                "Schedule deleted".to_string(),
                format!("Schedule '{name}' for {pipeline} was deleted"),
            ),
            SchedulerEventKind::Executing => (
                NotificationLevel::Info,
                "Pipeline started".to_string(),
                format!("Schedule '{name}' started {pipeline}"),
            ),
            SchedulerEventKind::Completed => (
                NotificationLevel::Success,
                "Pipeline completed".to_string(),
                format!(
                    "{pipeline} completed, {} items processed",
                    event.items_processed.unwrap_or_default()
                ),
            ),
            SchedulerEventKind::Failed => (
                NotificationLevel::Error,
                "Pipeline failed".to_string(),
                format!(
                    "{pipeline} failed: {}",
                    event.error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };

        let mut notification = Notification::new(event.kind.as_str(), level, title, message)
            .with_detail("schedule_id", json!(event.schedule_id))
            .with_detail("pipeline_type", json!(pipeline))
            .with_detail("occurred_at", json!(event.occurred_at));
        if let Some(next) = event.next_run_at {
            notification = notification.with_detail("next_run_at", json!(next));
        }
        if let Some(id) = event.history_id {
            notification = notification.with_detail("history_id", json!(id));
        }
        if let Some(items) = event.items_processed {
            notification = notification.with_detail("items_processed", json!(items));
        }
        if let Some(ms) = event.duration_ms {
            notification = notification.with_detail("duration_ms", json!(ms));
        }
        if let Some(error) = &event.error {
            notification = notification.with_detail("error", json!(error));
        }
        notification
    }

    async fn escalate(&self, notification: &Notification) {
        error!(
            title = %notification.title,
            message = %notification.message,
            details = ?notification.details,
            "Critical pipeline failure"
        );
        for channel in &self.channels {
            if let Err(e) = channel.deliver(notification).await {
                warn!(channel = channel.name(), error = %e, "Critical notification delivery failed");
            }
        }
    }
}

#[async_trait]
impl EventSubscriber for NotificationService {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn handle(&self, event: &SchedulerEvent) -> Result<(), SubscriberError> {
        let notification = Self::to_notification(event);
        if event.kind == SchedulerEventKind::Failed {
            self.escalate(&notification).await;
        }
        self.notify(notification);
        Ok(())
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("retained", &self.log.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}
