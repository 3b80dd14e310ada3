//! Repository and contributor enrichment from the GitHub API.

use super::{max_batches, stage_config, BatchCursor, BATCH_SIZE, MAX_REQUESTS};
use crate::config::AppConfig;
use crate::context::{percent, ContextBag, ExecutionContext};
use crate::core::{Parameters, PipelineType};
use crate::errors::{PipelineValidationError, StageError};
use crate::execution::PipelineFactory;
use crate::github::GitHubClient;
use crate::models::{from_record, to_record, Contributor, Repository};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::{Stage, StageConfig};
use crate::store::{EntityStore, EntityType, Filter, Record};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NAMESPACE: &str = "enrichment";
const REQUESTS_USED: &str = "requests_used";

/// The per-run request budget, shared by every enrichment stage.
struct RequestBudget {
    limit: u64,
    used: u64,
}

impl RequestBudget {
    fn load(data: &ContextBag, config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self {
            limit: config.get_u64(MAX_REQUESTS, 1_000),
            used: data.get_as::<u64>(NAMESPACE, REQUESTS_USED)?.unwrap_or(0),
        })
    }

    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    fn spend(&mut self, data: &mut ContextBag, requests: usize) {
        self.used += requests as u64;
        data.set(NAMESPACE, REQUESTS_USED, json!(self.used));
    }
}

/// Runs the shared enrichment loop for one entity type.
///
/// `enrich` turns one stored record into its enriched replacement, issuing
/// exactly one GitHub request. The whole batch is enriched before anything is
/// written, so an error leaves the batch untouched.
async fn enrich_all<F, Fut>(
    stage: &str,
    entity: EntityType,
    store: &dyn EntityStore,
    ctx: &mut ExecutionContext,
    config: &StageConfig,
    mut enrich: F,
) -> Result<(), StageError>
where
    F: FnMut(Record) -> Fut,
    Fut: std::future::Future<Output = Result<Record, StageError>>,
{
    let batch_size = config.get_usize(BATCH_SIZE, 50);
    let ceiling = max_batches(config);
    let pending = Filter::flag("is_enriched", false);
    let total = store.count(entity, &pending).await? as u64;
    let mut budget = RequestBudget::load(&ctx.data, config)?;
    let mut cursor = BatchCursor::load(&ctx.data, NAMESPACE, stage)?;

    loop {
        if ceiling.is_some_and(|max| cursor.batches >= max) {
            info!(parent: ctx.logger(), entity = %entity, "Batch ceiling reached");
            break;
        }
        let allowance = usize::try_from(budget.remaining()).unwrap_or(usize::MAX);
        if allowance == 0 {
            warn!(parent: ctx.logger(), entity = %entity, used = budget.used, "Request budget exhausted");
            break;
        }

        let batch = store
            .fetch_batch(entity, batch_size.min(allowance), 0, &pending)
            .await?;
        if batch.is_empty() {
            break;
        }
        let size = batch.len();

        let mut enriched = Vec::with_capacity(size);
        for record in batch {
            enriched.push(enrich(record).await?);
        }
        budget.spend(&mut ctx.data, size);
        store.upsert(entity, enriched).await?;

        cursor.advance(size);
        cursor.save(&mut ctx.data, NAMESPACE, stage)?;
        ctx.add_items_processed(size as u64);
        ctx.update_status(
            percent(cursor.processed, total.max(cursor.processed)),
            format!("Enriched {} of {total} {entity}", cursor.processed),
        );
        debug!(parent: ctx.logger(), entity = %entity, batch = cursor.batches, size, "Committed enrichment batch");
    }

    info!(
        parent: ctx.logger(),
        entity = %entity,
        enriched = cursor.processed,
        requests = budget.used,
        "Enrichment finished"
    );
    Ok(())
}

/// Fills in description, stars, forks and language for repositories.
#[derive(Clone)]
pub struct RepositoryEnrichmentStage {
    store: Arc<dyn EntityStore>,
    github: Arc<dyn GitHubClient>,
}

impl RepositoryEnrichmentStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, github: Arc<dyn GitHubClient>) -> Self {
        Self { store, github }
    }

    async fn enrich(&self, record: Record) -> Result<Record, StageError> {
        let mut repo: Repository = from_record(&record)?;
        match self.github.fetch_repository(&repo.owner, &repo.name).await? {
            Some(details) => {
                repo.description = details.description;
                repo.stars = Some(details.stars);
                repo.forks = Some(details.forks);
                repo.language = details.language;
            }
            // Still flagged so a deleted repository is not requested on every run.
            None => debug!(repository = %repo.full_name, "Repository no longer exists"),
        }
        repo.is_enriched = true;
        Ok(to_record(&repo)?)
    }
}

impl std::fmt::Debug for RepositoryEnrichmentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryEnrichmentStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for RepositoryEnrichmentStage {
    fn name(&self) -> &str {
        "repository_enrichment"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        enrich_all(
            self.name(),
            EntityType::Repository,
            self.store.as_ref(),
            ctx,
            config,
            |record| self.enrich(record),
        )
        .await
    }
}

/// Fills in profile fields for contributors.
#[derive(Clone)]
pub struct ContributorEnrichmentStage {
    store: Arc<dyn EntityStore>,
    github: Arc<dyn GitHubClient>,
}

impl ContributorEnrichmentStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, github: Arc<dyn GitHubClient>) -> Self {
        Self { store, github }
    }

    async fn enrich(&self, record: Record) -> Result<Record, StageError> {
        let mut contributor: Contributor = from_record(&record)?;
        if let Some(user) = self.github.fetch_user(&contributor.login).await? {
            contributor.name = user.name;
            contributor.bio = user.bio;
            contributor.company = user.company;
            contributor.location = user.location;
            contributor.followers = Some(user.followers);
            contributor.public_repos = Some(user.public_repos);
        }
        contributor.is_enriched = true;
        Ok(to_record(&contributor)?)
    }
}

impl std::fmt::Debug for ContributorEnrichmentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContributorEnrichmentStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for ContributorEnrichmentStage {
    fn name(&self) -> &str {
        "contributor_enrichment"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        enrich_all(
            self.name(),
            EntityType::Contributor,
            self.store.as_ref(),
            ctx,
            config,
            |record| self.enrich(record),
        )
        .await
    }
}

/// Builds the repository then contributor enrichment pipeline.
pub struct DataEnrichmentPipeline {
    store: Arc<dyn EntityStore>,
    github: Arc<dyn GitHubClient>,
    defaults: StageConfig,
}

impl DataEnrichmentPipeline {
    /// Creates the factory with defaults taken from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, github: Arc<dyn GitHubClient>, config: &AppConfig) -> Self {
        let defaults = StageConfig::new()
            .with(BATCH_SIZE, json!(config.batch.enrichment))
            .with(MAX_REQUESTS, json!(config.enrichment.max_requests));
        Self {
            store,
            github,
            defaults,
        }
    }
}

impl PipelineFactory for DataEnrichmentPipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::DataEnrichment
    }

    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError> {
        PipelineBuilder::new(self.pipeline_type().as_str())
            .with_config(stage_config(&self.defaults, parameters))
            .stage(Arc::new(RepositoryEnrichmentStage::new(self.store.clone(), self.github.clone())))
            .stage(Arc::new(ContributorEnrichmentStage::new(self.store.clone(), self.github.clone())))
            .build()
    }
}
