//! Sequential pipeline execution.

use crate::context::ExecutionContext;
use crate::errors::PipelineError;
use crate::stages::{Stage, StageConfig};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, Instrument};

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Stages executed, in order.
    pub stages: Vec<String>,
    /// Records committed during the run.
    pub items_processed: u64,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

/// An ordered list of stages executed one after another.
///
/// Stages never run in parallel within one pipeline: later stages may rely on
/// everything earlier stages wrote.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    config: StageConfig,
}

impl Pipeline {
    pub(super) fn new(name: String, stages: Vec<Arc<dyn Stage>>, config: StageConfig) -> Self {
        Self {
            name,
            stages,
            config,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the static configuration.
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Runs every stage in registration order against `ctx`.
    ///
    /// The context is left in whatever state the stages produced, including on
    /// failure, so callers can read `items_processed` after an error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageFailed`] for the first stage that fails;
    /// the remaining stages are not run.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<RunSummary, PipelineError> {
        let span = ctx.logger().clone();
        let start = Instant::now();
        ctx.reset_status();

        let mut executed = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let stage_name = stage.name().to_string();
            let stage_start = Instant::now();
            info!(parent: &span, stage = %stage_name, "Stage started");

            let result = stage
                .execute(ctx, &self.config)
                .instrument(tracing::info_span!(parent: &span, "stage", stage = %stage_name))
                .await;

            let stage_ms = stage_start.elapsed().as_secs_f64() * 1000.0;
            if let Err(source) = result {
                error!(
                    parent: &span,
                    stage = %stage_name,
                    duration_ms = stage_ms,
                    error = %source,
                    "Stage failed, aborting pipeline"
                );
                return Err(PipelineError::StageFailed {
                    stage: stage_name,
                    source,
                });
            }

            info!(parent: &span, stage = %stage_name, duration_ms = stage_ms, "Stage completed");
            executed.push(stage_name);
        }

        ctx.update_status(100, "Completed");
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            parent: &span,
            items_processed = ctx.items_processed(),
            duration_ms,
            "Pipeline completed"
        );

        Ok(RunSummary {
            stages: executed,
            items_processed: ctx.items_processed(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::context::ExecutionContext;
    use crate::errors::{PipelineError, StageError};
    use crate::pipeline::PipelineBuilder;
    use crate::stages::{FnStage, StageConfig};
    use crate::stages::Stage;
    use crate::testing::{FailingStage, RecordingStage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready, task};

    /// Blocks until its gate is opened.
    #[derive(Debug)]
    struct GateStage {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl Stage for GateStage {
        fn name(&self) -> &str {
            "gate"
        }

        async fn execute(&self, _ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                gate.await.map_err(|_| StageError::invalid("gate dropped"))?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_stages_in_order() {
        let log = RecordingStage::shared_log();
        let pipeline = PipelineBuilder::new("ordered")
            .stage(Arc::new(RecordingStage::new("a", log.clone())))
            .stage(Arc::new(RecordingStage::new("b", log.clone())))
            .stage(Arc::new(RecordingStage::new("c", log.clone())))
            .build()
            .unwrap();

        let mut ctx = ExecutionContext::new("ordered");
        let summary = pipeline.run(&mut ctx).await.unwrap();

        assert_eq!(summary.stages, vec!["a", "b", "c"]);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(ctx.status().progress, 100);
    }

    #[test]
    fn test_next_stage_waits_for_previous() {
        let (open, gate) = oneshot::channel();
        let log = RecordingStage::shared_log();
        let pipeline = PipelineBuilder::new("gated")
            .stage(Arc::new(GateStage {
                gate: Mutex::new(Some(gate)),
            }))
            .stage(Arc::new(RecordingStage::new("after", log.clone())))
            .build()
            .unwrap();

        let mut ctx = ExecutionContext::new("gated");
        let mut run = task::spawn(pipeline.run(&mut ctx));
        assert_pending!(run.poll());
        assert!(log.lock().is_empty());

        open.send(()).unwrap();
        assert!(run.is_woken());
        let summary = assert_ready!(run.poll()).unwrap();
        assert_eq!(summary.stages, vec!["gate", "after"]);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_aborts_on_first_failure() {
        let log = RecordingStage::shared_log();
        let pipeline = PipelineBuilder::new("abort")
            .stage(Arc::new(RecordingStage::new("a", log.clone())))
            .stage(Arc::new(FailingStage::new("b", "bad record")))
            .stage(Arc::new(RecordingStage::new("c", log.clone())))
            .build()
            .unwrap();

        let mut ctx = ExecutionContext::new("abort");
        let err = pipeline.run(&mut ctx).await.unwrap_err();

        assert_eq!(err.stage(), Some("b"));
        assert!(matches!(err, PipelineError::StageFailed { source: StageError::Invalid(_), .. }));
        assert_eq!(*log.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_context_survives_failure() {
        let pipeline = PipelineBuilder::new("partial")
            .stage(Arc::new(FnStage::new(
                "commit",
                |ctx: &mut ExecutionContext, _: &StageConfig| {
                    ctx.add_items_processed(50);
                    Ok(())
                },
            )))
            .stage(Arc::new(FailingStage::new("explode", "boom")))
            .build()
            .unwrap();

        let mut ctx = ExecutionContext::new("partial");
        assert!(pipeline.run(&mut ctx).await.is_err());
        assert_eq!(ctx.items_processed(), 50);
    }

    #[tokio::test]
    async fn test_status_reset_at_start() {
        let pipeline = PipelineBuilder::new("status")
            .stage(Arc::new(FnStage::new(
                "check",
                |ctx: &mut ExecutionContext, _: &StageConfig| {
                    assert_eq!(ctx.status().progress, 0);
                    Ok(())
                },
            )))
            .build()
            .unwrap();

        let mut ctx = ExecutionContext::new("status");
        ctx.update_status(80, "stale");
        pipeline.run(&mut ctx).await.unwrap();
    }
}
