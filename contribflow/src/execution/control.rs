//! Operator start/stop/restart surface.

use super::PipelineExecutor;
use crate::core::{Parameters, PipelineType};
use crate::errors::ExecutionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const STOPPED_MESSAGE: &str = "Stopped by operator";

/// Result of a control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the operation took effect.
    pub success: bool,
    /// History record created or closed.
    pub history_id: Option<Uuid>,
    /// Human-readable explanation.
    pub message: String,
}

impl ControlResponse {
    fn ok(history_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            success: true,
            history_id: Some(history_id),
            message: message.into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            history_id: None,
            message: message.into(),
        }
    }
}

/// Manual pipeline control.
///
/// `start` records a run and executes it in the background. `stop` cannot
/// interrupt a run in flight; it closes the history record as failed, and the
/// run's own completion is then ignored.
#[derive(Debug, Clone)]
pub struct PipelineControl {
    executor: Arc<PipelineExecutor>,
}

impl PipelineControl {
    /// Creates a control surface over `executor`.
    #[must_use]
    pub fn new(executor: Arc<PipelineExecutor>) -> Self {
        Self { executor }
    }

    /// Starts a run unless one of the same type is already recorded as running.
    pub async fn start(&self, pipeline_type: PipelineType, parameters: Parameters) -> ControlResponse {
        match self.executor.history().find_running(Some(pipeline_type)).await {
            Ok(running) if !running.is_empty() => {
                return ControlResponse {
                    success: false,
                    history_id: Some(running[0].id),
                    message: format!("{pipeline_type} is already running"),
                };
            }
            Ok(_) => {}
            Err(e) => return ControlResponse::rejected(format!("Failed to read history: {e}")),
        }

        let record = match self.executor.begin(pipeline_type, &parameters).await {
            Ok(record) => record,
            Err(ExecutionError::UnknownPipeline(t)) => {
                return ControlResponse::rejected(format!("Unknown pipeline type '{t}'"))
            }
            Err(e) => return ControlResponse::rejected(format!("Failed to start {pipeline_type}: {e}")),
        };

        let history_id = record.id;
        let executor = self.executor.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run_recorded(&record).await {
                error!(history_id = %record.id, error = %e, "Manually started run could not be recorded");
            }
        });

        info!(pipeline_type = %pipeline_type, history_id = %history_id, "Pipeline started manually");
        ControlResponse::ok(history_id, format!("{pipeline_type} started"))
    }

    /// Marks every running record of the type as failed.
    pub async fn stop(&self, pipeline_type: PipelineType) -> ControlResponse {
        let running = match self.executor.history().find_running(Some(pipeline_type)).await {
            Ok(running) => running,
            Err(e) => return ControlResponse::rejected(format!("Failed to read history: {e}")),
        };
        let Some(latest) = running.first().map(|r| r.id) else {
            return ControlResponse::rejected(format!("{pipeline_type} is not running"));
        };

        for record in &running {
            if let Err(e) = self
                .executor
                .history()
                .fail(record.id, STOPPED_MESSAGE, record.items_processed)
                .await
            {
                warn!(history_id = %record.id, error = %e, "Could not stop run");
            }
        }

        info!(pipeline_type = %pipeline_type, history_id = %latest, stopped = running.len(), "Pipeline stopped");
        ControlResponse::ok(latest, format!("{pipeline_type} stopped"))
    }

    /// Stops any running record of the type, then starts a new run.
    pub async fn restart(&self, pipeline_type: PipelineType, parameters: Parameters) -> ControlResponse {
        let stopped = self.stop(pipeline_type).await;
        let started = self.start(pipeline_type, parameters).await;
        if started.success && stopped.success {
            ControlResponse {
                message: format!("{pipeline_type} restarted"),
                ..started
            }
        } else {
            started
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::execution::PipelineRegistry;
    use crate::history::{HistoryStore, InMemoryHistoryStore};
    use crate::stages::Stage;
    use crate::testing::{SlowStage, StaticPipelineFactory};
    use std::time::Duration;

    fn control(delay: Duration) -> (PipelineControl, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(SlowStage::new("slow", delay))];
        let factory = StaticPipelineFactory::new(PipelineType::SitemapGeneration, stages);
        let registry = Arc::new(PipelineRegistry::new().with(Arc::new(factory)));
        let executor = Arc::new(PipelineExecutor::new(registry, history.clone()));
        (PipelineControl::new(executor), history)
    }

    async fn wait_for_status(history: &InMemoryHistoryStore, id: Uuid, status: RunStatus) {
        for _ in 0..100 {
            if history.get(id).await.unwrap().unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("history {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let (control, history) = control(Duration::from_millis(10));
        let response = control.start(PipelineType::SitemapGeneration, Parameters::new()).await;

        assert!(response.success);
        let id = response.history_id.unwrap();
        wait_for_status(&history, id, RunStatus::Completed).await;
    }

    #[tokio::test]
    async fn test_start_rejects_second_run_and_unknown_type() {
        let (control, _history) = control(Duration::from_millis(200));
        let first = control.start(PipelineType::SitemapGeneration, Parameters::new()).await;
        let second = control.start(PipelineType::SitemapGeneration, Parameters::new()).await;
        assert!(first.success);
        assert!(!second.success);
        assert_eq!(second.history_id, first.history_id);

        let unknown = control.start(PipelineType::DataEnrichment, Parameters::new()).await;
        assert!(!unknown.success);
        assert!(unknown.history_id.is_none());
    }

    #[tokio::test]
    async fn test_stop_closes_record_and_ignores_late_completion() {
        let (control, history) = control(Duration::from_millis(50));
        let started = control.start(PipelineType::SitemapGeneration, Parameters::new()).await;
        let id = started.history_id.unwrap();

        let stopped = control.stop(PipelineType::SitemapGeneration).await;
        assert!(stopped.success);
        assert_eq!(stopped.history_id, Some(id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = history.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some(STOPPED_MESSAGE));
    }

    #[tokio::test]
    async fn test_stop_without_running_fails() {
        let (control, _history) = control(Duration::from_millis(1));
        let response = control.stop(PipelineType::SitemapGeneration).await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_restart_creates_new_record() {
        let (control, history) = control(Duration::from_millis(100));
        let first = control.start(PipelineType::SitemapGeneration, Parameters::new()).await;
        let restarted = control.restart(PipelineType::SitemapGeneration, Parameters::new()).await;

        assert!(restarted.success);
        assert_ne!(restarted.history_id, first.history_id);
        let old = history.get(first.history_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(old.status, RunStatus::Failed);
    }
}
