//! Stub stages, factories and subscribers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::core::{Parameters, PipelineType};
use crate::errors::{PipelineValidationError, StageError};
use crate::events::{EventSubscriber, SchedulerEvent, SchedulerEventKind, SubscriberError};
use crate::execution::PipelineFactory;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::{NoOpStage, Stage, StageConfig};

/// Execution log shared between several [`RecordingStage`]s.
pub type SharedLog = Arc<Mutex<Vec<String>>>;

/// A stage that appends its name to a shared log when executed.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    log: SharedLog,
}

impl RecordingStage {
    /// Creates a new recording stage writing to `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: SharedLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }

    /// Creates an empty log.
    #[must_use]
    pub fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
        self.log.lock().push(self.name.clone());
        Ok(())
    }
}

/// A stage that always fails with a business error.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
        Err(StageError::invalid(self.error.clone()))
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
        tokio::time::sleep(self.delay).await;
        ctx.add_items_processed(1);
        Ok(())
    }
}

/// A factory that builds the same fixed stages for every run.
#[derive(Debug)]
pub struct StaticPipelineFactory {
    pipeline_type: PipelineType,
    stages: Vec<Arc<dyn Stage>>,
}

impl StaticPipelineFactory {
    /// Creates a factory over `stages`.
    #[must_use]
    pub fn new(pipeline_type: PipelineType, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { pipeline_type, stages }
    }

    /// Creates a factory whose pipeline does nothing.
    #[must_use]
    pub fn noop(pipeline_type: PipelineType) -> Self {
        Self::new(pipeline_type, vec![Arc::new(NoOpStage::new("noop"))])
    }
}

impl PipelineFactory for StaticPipelineFactory {
    fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError> {
        let mut config = StageConfig::new();
        config.merge(parameters);
        self.stages
            .iter()
            .fold(PipelineBuilder::new(self.pipeline_type.as_str()), |b, s| b.stage(s.clone()))
            .with_config(config)
            .build()
    }
}

/// Records every scheduler event it receives.
#[derive(Debug, Default)]
pub struct CollectingSubscriber {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CollectingSubscriber {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().clone()
    }

    /// Returns the kinds of the events received so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<SchedulerEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Returns the received events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: SchedulerEventKind) -> Vec<SchedulerEvent> {
        self.events.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    /// Waits until at least `count` events arrived. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.lock().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventSubscriber for CollectingSubscriber {
    fn name(&self) -> &str {
        "collector"
    }

    async fn handle(&self, event: &SchedulerEvent) -> Result<(), SubscriberError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
