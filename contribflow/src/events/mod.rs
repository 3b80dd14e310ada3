//! Typed scheduler lifecycle events and their delivery.
//!
//! The scheduler publishes [`SchedulerEvent`]s on an [`EventBus`]. Every
//! subscriber gets its own queue and dispatch task, so a slow, failing or
//! panicking subscriber never affects the publisher or its peers.

mod bus;

pub use bus::{BusMetrics, EventBus};

use crate::core::PipelineType;
use crate::scheduler::Schedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// Error a subscriber may return. It is logged and otherwise ignored.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// The schedule transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerEventKind {
    /// A schedule was created.
    Created,
    /// A schedule was edited.
    Updated,
    /// A schedule was removed.
    Deleted,
    /// A run of the schedule started.
    Executing,
    /// A run finished successfully.
    Completed,
    /// A run failed.
    Failed,
}

impl SchedulerEventKind {
    /// Returns the wire name, e.g. `schedule:completed`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "schedule:created",
            Self::Updated => "schedule:updated",
            Self::Deleted => "schedule:deleted",
            Self::Executing => "schedule:executing",
            Self::Completed => "schedule:completed",
            Self::Failed => "schedule:failed",
        }
    }
}

impl fmt::Display for SchedulerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduler lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEvent {
    /// Transition reported.
    pub kind: SchedulerEventKind,
    /// Schedule id.
    pub schedule_id: String,
    /// Schedule name.
    pub schedule_name: String,
    /// Pipeline the schedule drives.
    pub pipeline_type: PipelineType,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
    /// Next planned run, if known.
    pub next_run_at: Option<DateTime<Utc>>,
    /// History record of the run, for run events.
    pub history_id: Option<Uuid>,
    /// Records processed, for finished runs.
    pub items_processed: Option<u64>,
    /// Run duration, for finished runs.
    pub duration_ms: Option<u64>,
    /// Failure reason.
    pub error: Option<String>,
}

impl SchedulerEvent {
    /// Creates an event describing `schedule`.
    #[must_use]
    pub fn new(kind: SchedulerEventKind, schedule: &Schedule) -> Self {
        Self {
            kind,
            schedule_id: schedule.id.clone(),
            schedule_name: schedule.name.clone(),
            pipeline_type: schedule.pipeline_type,
            occurred_at: Utc::now(),
            next_run_at: schedule.next_run_at,
            history_id: None,
            items_processed: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Attaches the run's history id.
    #[must_use]
    pub fn with_history(mut self, id: Uuid) -> Self {
        self.history_id = Some(id);
        self
    }

    /// Attaches run results.
    #[must_use]
    pub fn with_result(mut self, items_processed: u64, duration_ms: u64) -> Self {
        self.items_processed = Some(items_processed);
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attaches a failure reason.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Consumer of scheduler events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &SchedulerEvent) -> Result<(), SubscriberError>;
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSubscriber;

#[async_trait]
impl EventSubscriber for LoggingSubscriber {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &SchedulerEvent) -> Result<(), SubscriberError> {
        if event.kind == SchedulerEventKind::Failed {
            warn!(
                event_type = %event.kind,
                schedule_id = %event.schedule_id,
                pipeline_type = %event.pipeline_type,
                error = event.error.as_deref().unwrap_or_default(),
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                schedule_id = %event.schedule_id,
                pipeline_type = %event.pipeline_type,
                "Event: {}", event.kind
            );
        }
        Ok(())
    }
}
