//! Durable pipeline run history.
//!
//! A record is created when a run starts and finalized exactly once. Terminal
//! records are never mutated again; a rerun always creates a new record.

mod memory;
mod sweeper;

pub use memory::InMemoryHistoryStore;
pub use sweeper::StaleRunSweeper;

use crate::core::{Parameters, PipelineType, RunStatus};
use crate::errors::HistoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHistory {
    /// Record id, time-ordered.
    pub id: Uuid,
    /// Which pipeline ran.
    pub pipeline_type: PipelineType,
    /// Current status.
    pub status: RunStatus,
    /// Run parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Records committed by the run.
    pub items_processed: u64,
    /// Failure reason.
    pub error_message: Option<String>,
}

impl PipelineHistory {
    /// Creates a running record.
    #[must_use]
    pub fn start(pipeline_type: PipelineType, parameters: Parameters, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            pipeline_type,
            status: RunStatus::Running,
            parameters,
            started_at,
            completed_at: None,
            items_processed: 0,
            error_message: None,
        }
    }

    /// Run duration, if finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Filter for [`HistoryStore::list`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Only records of this type.
    pub pipeline_type: Option<PipelineType>,
    /// Only records in this status.
    pub status: Option<RunStatus>,
    /// Maximum records returned.
    pub limit: Option<usize>,
}

/// Persistence for [`PipelineHistory`].
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Records the start of a run.
    async fn create(
        &self,
        pipeline_type: PipelineType,
        parameters: Parameters,
    ) -> Result<PipelineHistory, HistoryError>;

    /// Marks a running record completed.
    async fn complete(&self, id: Uuid, items_processed: u64) -> Result<PipelineHistory, HistoryError>;

    /// Marks a running record failed.
    async fn fail(
        &self,
        id: Uuid,
        error_message: &str,
        items_processed: u64,
    ) -> Result<PipelineHistory, HistoryError>;

    /// Gets a record.
    async fn get(&self, id: Uuid) -> Result<Option<PipelineHistory>, HistoryError>;

    /// Lists records, newest first.
    async fn list(&self, query: &HistoryQuery) -> Result<Vec<PipelineHistory>, HistoryError>;

    /// Fails every running record started before `cutoff`. Returns the swept records.
    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<PipelineHistory>, HistoryError>;

    /// Lists running records, optionally of one type, newest first.
    async fn find_running(
        &self,
        pipeline_type: Option<PipelineType>,
    ) -> Result<Vec<PipelineHistory>, HistoryError> {
        self.list(&HistoryQuery {
            pipeline_type,
            status: Some(RunStatus::Running),
            limit: None,
        })
        .await
    }
}
