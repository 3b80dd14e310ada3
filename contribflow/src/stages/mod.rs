//! Stage trait and implementations.
//!
//! Stages are the fundamental units of work in a contribflow pipeline.

mod config;

pub use config::StageConfig;

use crate::context::ExecutionContext;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage receives the run's mutable context and the pipeline's static
/// configuration. Stages must be safe to re-run with the same context: they
/// write to the entity store by natural key only, never with blind inserts.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline run; the remaining stages do not run.
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        config: &StageConfig,
    ) -> Result<(), StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&mut ExecutionContext, &StageConfig) -> Result<(), StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut ExecutionContext, &StageConfig) -> Result<(), StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut ExecutionContext, &StageConfig) -> Result<(), StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut ExecutionContext, &StageConfig) -> Result<(), StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        config: &StageConfig,
    ) -> Result<(), StageError> {
        (self.func)(ctx, config)
    }
}

/// A no-op stage for testing.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &mut ExecutionContext,
        _config: &StageConfig,
    ) -> Result<(), StageError> {
        Ok(())
    }
}
