//! In-memory pipeline history.

use super::{HistoryQuery, HistoryStore, PipelineHistory};
use crate::core::{Parameters, PipelineType, RunStatus};
use crate::errors::HistoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Process-local [`HistoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<Uuid, PipelineHistory>>,
}

impl InMemoryHistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is. Used to seed history, e.g. after a restart.
    pub fn insert(&self, record: PipelineHistory) {
        self.records.write().insert(record.id, record);
    }

    fn finish(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
        items_processed: u64,
    ) -> Result<PipelineHistory, HistoryError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(HistoryError::AlreadyTerminal {
                id: id.to_string(),
                status: record.status.to_string(),
            });
        }
        record.status = status;
        record.completed_at = Some(Utc::now());
        record.error_message = error_message;
        record.items_processed = items_processed;
        Ok(record.clone())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create(
        &self,
        pipeline_type: PipelineType,
        parameters: Parameters,
    ) -> Result<PipelineHistory, HistoryError> {
        let record = PipelineHistory::start(pipeline_type, parameters, Utc::now());
        self.records.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn complete(&self, id: Uuid, items_processed: u64) -> Result<PipelineHistory, HistoryError> {
        self.finish(id, RunStatus::Completed, None, items_processed)
    }

    async fn fail(
        &self,
        id: Uuid,
        error_message: &str,
        items_processed: u64,
    ) -> Result<PipelineHistory, HistoryError> {
        self.finish(id, RunStatus::Failed, Some(error_message.to_string()), items_processed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PipelineHistory>, HistoryError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn list(&self, query: &HistoryQuery) -> Result<Vec<PipelineHistory>, HistoryError> {
        let mut records: Vec<PipelineHistory> = self
            .records
            .read()
            .values()
            .filter(|r| query.pipeline_type.map_or(true, |t| r.pipeline_type == t))
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<PipelineHistory>, HistoryError> {
        let now = Utc::now();
        let mut swept = Vec::new();
        for record in self.records.write().values_mut() {
            if record.status == RunStatus::Running && record.started_at < cutoff {
                record.status = RunStatus::Failed;
                record.completed_at = Some(now);
                record.error_message = Some("Run exceeded the staleness window and was marked failed".to_string());
                swept.push(record.clone());
            }
        }
        Ok(swept)
    }
}
