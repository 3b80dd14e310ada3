//! Pipeline builder with validation.

use super::Pipeline;
use crate::errors::PipelineValidationError;
use crate::stages::{Stage, StageConfig};
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Stages can only be appended while building; the built [`Pipeline`] is
/// immutable.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    config: StageConfig,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            config: StageConfig::new(),
        }
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a stage in place.
    pub fn add_stage(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Sets a configuration value.
    #[must_use]
    pub fn config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key, value);
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or two stages share a name.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name().to_string()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage name '{}' in pipeline '{}'",
                    stage.name(),
                    self.name
                ))
                .with_stages(vec![stage.name().to_string()]));
            }
        }

        Ok(Pipeline::new(self.name, self.stages, self.config))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
