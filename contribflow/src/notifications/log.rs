//! Bounded, newest-first notification storage.

use super::{Notification, NotificationLevel};
use crate::errors::NotificationError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Notifications retained before the oldest are evicted.
pub const NOTIFICATION_CAPACITY: usize = 100;

/// Filter and paging for [`NotificationLog::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationQuery {
    /// Maximum returned. Defaults to everything.
    pub limit: Option<usize>,
    /// Matching notifications to skip.
    #[serde(default)]
    pub offset: usize,
    /// Only this type.
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    /// Only this level.
    pub level: Option<NotificationLevel>,
    /// Only read or only unread.
    pub is_read: Option<bool>,
}

impl NotificationQuery {
    fn matches(&self, notification: &Notification) -> bool {
        self.notification_type
            .as_ref()
            .map_or(true, |t| *t == notification.notification_type)
            && self.level.map_or(true, |l| l == notification.level)
            && self.is_read.map_or(true, |r| r == notification.is_read)
    }
}

/// A page of notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    /// The page, newest first.
    pub data: Vec<Notification>,
    /// Matching notifications before paging.
    pub count: usize,
}

/// In-memory ring of the most recent notifications.
///
/// Constructed once and shared by reference; there is no global instance.
#[derive(Debug)]
pub struct NotificationLog {
    entries: RwLock<VecDeque<Notification>>,
    capacity: usize,
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationLog {
    /// Creates a log holding [`NOTIFICATION_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_CAPACITY)
    }

    /// Creates a log with a custom capacity (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Adds a notification at the front, evicting the oldest when full.
    pub fn push(&self, notification: Notification) {
        let mut entries = self.entries.write();
        entries.push_front(notification);
        entries.truncate(self.capacity);
    }

    /// Returns the matching page and the total match count.
    #[must_use]
    pub fn query(&self, query: &NotificationQuery) -> NotificationPage {
        let entries = self.entries.read();
        let matching = entries.iter().filter(|n| query.matches(n));
        let count = matching.clone().count();
        let data = matching
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        NotificationPage { data, count }
    }

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::NotFound`] if it was never logged or was evicted.
    pub fn mark_as_read(&self, id: Uuid) -> Result<Notification, NotificationError> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;
        entry.is_read = true;
        Ok(entry.clone())
    }

    /// Marks everything read. Returns how many changed.
    pub fn mark_all_as_read(&self) -> usize {
        let mut changed = 0;
        for entry in self.entries.write().iter_mut().filter(|n| !n.is_read) {
            entry.is_read = true;
            changed += 1;
        }
        changed
    }

    /// Unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.entries.read().iter().filter(|n| !n.is_read).count()
    }

    /// Retained notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
