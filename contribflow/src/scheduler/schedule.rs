//! Schedule records and their repository.

use crate::core::{Parameters, PipelineType};
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of the most recent run of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResult {
    /// Whether the run completed.
    pub success: bool,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// History record of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<Uuid>,
    /// Records processed.
    #[serde(default)]
    pub items_processed: u64,
}

/// A cron-triggered binding of a pipeline type to recurring execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule id.
    pub id: String,
    /// Pipeline to run.
    pub pipeline_type: PipelineType,
    /// Human-readable name.
    pub name: String,
    /// Five-field cron expression or macro.
    pub cron_expression: String,
    /// Inactive schedules are never due.
    pub is_active: bool,
    /// Parameters passed to every run.
    #[serde(default)]
    pub parameters: Parameters,
    /// Next planned run. `None` if the expression never fires.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Start of the last run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Result of the last run.
    pub last_result: Option<ScheduleResult>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last edit or run.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Creates a schedule from a request.
    #[must_use]
    pub fn from_new(request: NewSchedule, next_run_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            pipeline_type: request.pipeline_type,
            name: request.name,
            cron_expression: request.cron_expression,
            is_active: request.is_active,
            parameters: request.parameters,
            next_run_at,
            last_run_at: None,
            last_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the schedule is active and its next run is at or before `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at.is_some_and(|next| next <= now)
    }
}

/// Request to create a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    /// Pipeline to run.
    pub pipeline_type: PipelineType,
    /// Human-readable name.
    pub name: String,
    /// Cron expression.
    pub cron_expression: String,
    /// Defaults to active.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Run parameters.
    #[serde(default)]
    pub parameters: Parameters,
}

fn default_active() -> bool {
    true
}

impl NewSchedule {
    /// Creates an active schedule request with no parameters.
    #[must_use]
    pub fn new(
        pipeline_type: PipelineType,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_type,
            name: name.into(),
            cron_expression: cron_expression.into(),
            is_active: true,
            parameters: Parameters::new(),
        }
    }

    /// Sets a run parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Sets whether the schedule starts active.
    #[must_use]
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }
}

/// Partial edit of a schedule. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New cron expression.
    pub cron_expression: Option<String>,
    /// Activate or deactivate.
    pub is_active: Option<bool>,
    /// Replace parameters.
    pub parameters: Option<Parameters>,
}

/// Persistence for schedules.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Inserts or replaces a schedule.
    async fn save(&self, schedule: &Schedule) -> Result<(), StoreError>;

    /// Gets a schedule.
    async fn get(&self, id: &str) -> Result<Option<Schedule>, StoreError>;

    /// Removes a schedule, returning it if it existed.
    async fn delete(&self, id: &str) -> Result<Option<Schedule>, StoreError>;

    /// Lists every schedule, oldest first.
    async fn list(&self) -> Result<Vec<Schedule>, StoreError>;
}

/// Process-local [`ScheduleRepository`].
#[derive(Debug, Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<String, Schedule>>,
}

impl InMemoryScheduleRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn save(&self, schedule: &Schedule) -> Result<(), StoreError> {
        self.schedules
            .write()
            .insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.read().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.write().remove(id))
    }

    async fn list(&self) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules: Vec<Schedule> = self.schedules.read().values().cloned().collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(schedules)
    }
}
