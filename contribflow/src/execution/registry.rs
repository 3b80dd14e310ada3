//! Typed pipeline factories keyed by pipeline type.

use crate::core::{Parameters, PipelineType};
use crate::errors::PipelineValidationError;
use crate::pipeline::Pipeline;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a fresh pipeline for one run.
pub trait PipelineFactory: Send + Sync {
    /// The pipeline type this factory builds.
    fn pipeline_type(&self) -> PipelineType;

    /// Builds the pipeline. `parameters` override the factory's defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters do not describe a valid pipeline.
    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError>;
}

/// Pipeline factories by type, constructed once at startup.
#[derive(Default, Clone)]
pub struct PipelineRegistry {
    factories: BTreeMap<PipelineType, Arc<dyn PipelineFactory>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same type.
    #[must_use]
    pub fn with(mut self, factory: Arc<dyn PipelineFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Registers a factory in place.
    pub fn register(&mut self, factory: Arc<dyn PipelineFactory>) {
        self.factories.insert(factory.pipeline_type(), factory);
    }

    /// Gets the factory for a type.
    #[must_use]
    pub fn get(&self, pipeline_type: PipelineType) -> Option<&Arc<dyn PipelineFactory>> {
        self.factories.get(&pipeline_type)
    }

    /// Returns true if a factory is registered for the type.
    #[must_use]
    pub fn contains(&self, pipeline_type: PipelineType) -> bool {
        self.factories.contains_key(&pipeline_type)
    }

    /// Registered types, in declaration order.
    #[must_use]
    pub fn types(&self) -> Vec<PipelineType> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("types", &self.types())
            .finish()
    }
}
