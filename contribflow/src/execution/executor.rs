//! Recorded pipeline execution.

use super::PipelineRegistry;
use crate::context::{ExecutionContext, PipelineStatus};
use crate::core::{Parameters, PipelineType, RunStatus};
use crate::errors::{error_details, ExecutionError, HistoryError};
use crate::history::{HistoryStore, PipelineHistory};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// What happened to one recorded run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// History record of the run.
    pub history_id: Uuid,
    /// Completed or failed.
    pub status: RunStatus,
    /// Records committed before the run ended.
    pub items_processed: u64,
    /// Failure reason.
    pub error: Option<String>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Runs pipelines and records each run in history exactly once.
pub struct PipelineExecutor {
    registry: Arc<PipelineRegistry>,
    history: Arc<dyn HistoryStore>,
    progress: Arc<DashMap<Uuid, PipelineStatus>>,
}

impl PipelineExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(registry: Arc<PipelineRegistry>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            registry,
            history,
            progress: Arc::new(DashMap::new()),
        }
    }

    /// The registry pipelines are built from.
    #[must_use]
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// The history store runs are recorded in.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Latest reported progress of a run still in flight in this process.
    #[must_use]
    pub fn progress(&self, history_id: Uuid) -> Option<PipelineStatus> {
        self.progress.get(&history_id).map(|s| s.clone())
    }

    /// Records the start of a run without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered or history cannot be written.
    pub async fn begin(
        &self,
        pipeline_type: PipelineType,
        parameters: &Parameters,
    ) -> Result<PipelineHistory, ExecutionError> {
        if !self.registry.contains(pipeline_type) {
            return Err(ExecutionError::UnknownPipeline(pipeline_type.to_string()));
        }
        Ok(self.history.create(pipeline_type, parameters.clone()).await?)
    }

    /// Creates a history record, runs the pipeline and finalizes the record.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors. A failed run is returned as an
    /// outcome with status [`RunStatus::Failed`].
    pub async fn execute(
        &self,
        pipeline_type: PipelineType,
        parameters: &Parameters,
    ) -> Result<RunOutcome, ExecutionError> {
        let record = self.begin(pipeline_type, parameters).await?;
        self.run_recorded(&record).await
    }

    /// Runs the pipeline for a record created by [`Self::begin`].
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered or history cannot be written.
    pub async fn run_recorded(&self, record: &PipelineHistory) -> Result<RunOutcome, ExecutionError> {
        let pipeline_type = record.pipeline_type;
        let history_id = record.id;
        let start = Instant::now();

        let factory = self
            .registry
            .get(pipeline_type)
            .ok_or_else(|| ExecutionError::UnknownPipeline(pipeline_type.to_string()))?;

        let pipeline = match factory.build(&record.parameters) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(pipeline_type = %pipeline_type, history_id = %history_id, error = %e, "Pipeline could not be built");
                let message = e.to_string();
                self.finish(history_id, Err(message.as_str()), 0).await?;
                return Ok(RunOutcome {
                    history_id,
                    status: RunStatus::Failed,
                    items_processed: 0,
                    error: Some(message),
                    duration_ms: elapsed_ms(start),
                });
            }
        };

        let progress = self.progress.clone();
        let mut ctx = ExecutionContext::new(pipeline.name()).with_observer(Arc::new(
            move |status: &PipelineStatus| {
                progress.insert(history_id, status.clone());
            },
        ));
        let span = tracing::info_span!(parent: ctx.logger(), "execute", history_id = %history_id);

        info!(parent: &span, pipeline_type = %pipeline_type, "Pipeline run started");
        let result = pipeline.run(&mut ctx).instrument(span.clone()).await;
        self.progress.remove(&history_id);
        let items_processed = ctx.items_processed();

        let outcome = match result {
            Ok(summary) => {
                self.finish(history_id, Ok(()), summary.items_processed).await?;
                RunOutcome {
                    history_id,
                    status: RunStatus::Completed,
                    items_processed: summary.items_processed,
                    error: None,
                    duration_ms: elapsed_ms(start),
                }
            }
            Err(e) => {
                let details = error_details(&e);
                error!(parent: &span, error = %e, details = ?details, items_processed, "Pipeline run failed");
                let message = e.to_string();
                self.finish(history_id, Err(message.as_str()), items_processed).await?;
                RunOutcome {
                    history_id,
                    status: RunStatus::Failed,
                    items_processed,
                    error: Some(message),
                    duration_ms: elapsed_ms(start),
                }
            }
        };
        Ok(outcome)
    }

    async fn finish(
        &self,
        history_id: Uuid,
        result: Result<(), &str>,
        items_processed: u64,
    ) -> Result<(), HistoryError> {
        let written = match result {
            Ok(()) => self.history.complete(history_id, items_processed).await,
            Err(message) => self.history.fail(history_id, message, items_processed).await,
        };
        match written {
            Ok(_) => Ok(()),
            // Stopped or swept while running; the earlier terminal state stands.
            Err(HistoryError::AlreadyTerminal { status, .. }) => {
                warn!(history_id = %history_id, status = %status, "Run finished after its record was closed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("registry", &self.registry)
            .field("in_flight", &self.progress.len())
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use crate::stages::{FnStage, Stage, StageConfig};
    use crate::testing::{FailingStage, StaticPipelineFactory};
    use pretty_assertions::assert_eq;

    fn executor(factory: StaticPipelineFactory) -> (PipelineExecutor, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let registry = Arc::new(PipelineRegistry::new().with(Arc::new(factory)));
        (PipelineExecutor::new(registry, history.clone()), history)
    }

    #[tokio::test]
    async fn test_successful_run_completes_history() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FnStage::new(
            "count",
            |ctx: &mut ExecutionContext, _: &StageConfig| {
                ctx.add_items_processed(12);
                Ok(())
            },
        ))];
        let factory = StaticPipelineFactory::new(PipelineType::ContributorRanking, stages);
        let (executor, history) = executor(factory);

        let outcome = executor
            .execute(PipelineType::ContributorRanking, &Parameters::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.items_processed, 12);
        let record = history.get(outcome.history_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.items_processed, 12);
        assert!(executor.progress(outcome.history_id).is_none());
    }

    #[tokio::test]
    async fn test_failed_run_records_error_and_partial_count() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(FnStage::new("first", |ctx: &mut ExecutionContext, _: &StageConfig| {
                ctx.add_items_processed(50);
                Ok(())
            })),
            Arc::new(FailingStage::new("second", "record 37 is malformed")),
        ];
        let factory = StaticPipelineFactory::new(PipelineType::DataEnrichment, stages);
        let (executor, history) = executor(factory);

        let outcome = executor
            .execute(PipelineType::DataEnrichment, &Parameters::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        let record = history.get(outcome.history_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.items_processed, 50);
        assert!(record.error_message.unwrap().contains("record 37"));
    }

    #[tokio::test]
    async fn test_unknown_type_is_an_error() {
        let (executor, history) = executor(StaticPipelineFactory::noop(PipelineType::SitemapGeneration));
        let err = executor
            .execute(PipelineType::EntityExtraction, &Parameters::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownPipeline(_)));
        assert!(history.find_running(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_record_is_not_rewritten() {
        let (executor, history) = executor(StaticPipelineFactory::noop(PipelineType::SitemapGeneration));
        let record = executor
            .begin(PipelineType::SitemapGeneration, &Parameters::new())
            .await
            .unwrap();
        history.fail(record.id, "Stopped by operator", 0).await.unwrap();

        let outcome = executor.run_recorded(&record).await.unwrap();
        assert!(outcome.is_success());
        let stored = history.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("Stopped by operator"));
    }
}
