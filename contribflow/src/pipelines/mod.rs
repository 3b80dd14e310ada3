//! The record-processing pipelines.
//!
//! Every stage here follows the same batch-and-cursor loop: fetch a batch of
//! records still needing work, transform it completely, upsert it in one call
//! with the work flag set, then advance the cursor kept in the run's context.
//! A failure inside a batch leaves that batch uncommitted.

mod enrichment;
mod extraction;
mod ranking;

pub use enrichment::{ContributorEnrichmentStage, DataEnrichmentPipeline, RepositoryEnrichmentStage};
pub use extraction::{EntityExtractionPipeline, EntityExtractionStage, GitHubIngestStage};
pub use ranking::{
    contribution_score, ContributionAggregationStage, ContributorRankingPipeline, ContributorStats,
    RankingStage,
};

use crate::context::ContextBag;
use crate::core::Parameters;
use crate::errors::StageError;
use crate::stages::StageConfig;
use serde::{Deserialize, Serialize};

/// Config key: records per batch.
pub const BATCH_SIZE: &str = "batch_size";
/// Config key: external requests allowed per run.
pub const MAX_REQUESTS: &str = "max_requests";
/// Config key: batches allowed per stage per run.
pub const MAX_BATCHES: &str = "max_batches";

/// How far a stage has progressed through its record set in this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    /// Records committed.
    pub processed: u64,
    /// Batches committed.
    pub batches: u64,
    /// Offset for stages that page without a work flag.
    pub offset: usize,
}

impl BatchCursor {
    /// Loads the cursor a stage stored under `namespace`, or a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is malformed.
    pub fn load(data: &ContextBag, namespace: &str, stage: &str) -> Result<Self, StageError> {
        Ok(data
            .get_as::<Self>(namespace, &cursor_key(stage))?
            .unwrap_or_default())
    }

    /// Stores the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor cannot be serialized.
    pub fn save(&self, data: &mut ContextBag, namespace: &str, stage: &str) -> Result<(), StageError> {
        data.put(namespace, cursor_key(stage), self)?;
        Ok(())
    }

    /// Records one committed batch.
    pub fn advance(&mut self, records: usize) {
        self.processed += records as u64;
        self.batches += 1;
        self.offset += records;
    }
}

fn cursor_key(stage: &str) -> String {
    format!("{stage}.cursor")
}

/// Merges configured defaults with run parameters.
pub(crate) fn stage_config(defaults: &StageConfig, parameters: &Parameters) -> StageConfig {
    let mut config = defaults.clone();
    config.merge(parameters);
    config
}

/// Returns the batch ceiling configured for a run, if any.
pub(crate) fn max_batches(config: &StageConfig) -> Option<u64> {
    config.get(MAX_BATCHES).and_then(serde_json::Value::as_u64)
}
