//! Pull request ingestion and entity extraction.

use super::{max_batches, stage_config, BatchCursor, BATCH_SIZE, MAX_REQUESTS};
use crate::config::AppConfig;
use crate::context::{percent, ExecutionContext};
use crate::core::{Parameters, PipelineType};
use crate::errors::{PipelineValidationError, StageError};
use crate::execution::PipelineFactory;
use crate::github::GitHubClient;
use crate::models::{from_record, to_record, Commit, Contributor, MergeRequest, RawPullRequest, Repository};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::{Stage, StageConfig};
use crate::store::{EntityStore, EntityType, Filter, Record};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NAMESPACE: &str = "extraction";

/// Config key: `owner/name` repositories to ingest.
pub const REPOSITORIES: &str = "repositories";
/// Config key: pull requests per API page.
pub const PER_PAGE: &str = "per_page";
/// Config key: API pages per repository per run.
pub const MAX_PAGES: &str = "max_pages";

/// Fetches pull requests from GitHub into the raw table.
///
/// A payload is (re)written with `processed = false` only when it is new or
/// its `updated_at` changed, so unchanged pull requests are not re-extracted.
/// Without a `repositories` parameter the stage does nothing and extraction
/// works on whatever raw payloads are already stored.
#[derive(Clone)]
pub struct GitHubIngestStage {
    store: Arc<dyn EntityStore>,
    github: Arc<dyn GitHubClient>,
}

impl GitHubIngestStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, github: Arc<dyn GitHubClient>) -> Self {
        Self { store, github }
    }

    async fn changed_payloads(&self, pulls: Vec<RawPullRequest>) -> Result<Vec<Record>, StageError> {
        let mut changed = Vec::new();
        for mut pull in pulls {
            pull.processed = false;
            let record = to_record(&pull)?;
            let existing = self
                .store
                .get(EntityType::RawPullRequest, &pull.github_id.to_string())
                .await?;
            let unchanged = existing
                .as_ref()
                .is_some_and(|e| e.get("updated_at") == record.get("updated_at"));
            if !unchanged {
                changed.push(record);
            }
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for GitHubIngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubIngestStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for GitHubIngestStage {
    fn name(&self) -> &str {
        "github_ingest"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        let repositories: Vec<String> = config.get_as(REPOSITORIES).unwrap_or_default();
        if repositories.is_empty() {
            debug!(parent: ctx.logger(), "No repositories configured, skipping ingestion");
            return Ok(());
        }

        let per_page = u32::try_from(config.get_u64(PER_PAGE, 100).clamp(1, 100)).unwrap_or(100);
        let max_pages = u32::try_from(config.get_u64(MAX_PAGES, 10)).unwrap_or(u32::MAX);
        let max_requests = config.get_u64(MAX_REQUESTS, 1_000);

        let mut requests = 0u64;
        let mut ingested = 0u64;
        let total = repositories.len() as u64;

        'repos: for (index, repository) in repositories.iter().enumerate() {
            for page in 1..=max_pages {
                if requests >= max_requests {
                    warn!(parent: ctx.logger(), max_requests, "Request budget exhausted, stopping ingestion");
                    break 'repos;
                }
                let pulls = self.github.fetch_pull_requests(repository, page, per_page).await?;
                requests += 1;
                let short_page = pulls.len() < per_page as usize;

                let changed = self.changed_payloads(pulls).await?;
                if !changed.is_empty() {
                    ingested += changed.len() as u64;
                    self.store.upsert(EntityType::RawPullRequest, changed).await?;
                }
                if short_page {
                    break;
                }
            }
            ctx.update_status(
                percent(index as u64 + 1, total) / 2,
                format!("Ingested pull requests for {repository}"),
            );
        }

        info!(parent: ctx.logger(), ingested, requests, "Pull request ingestion finished");
        ctx.data.set(NAMESPACE, "ingested", json!(ingested));
        ctx.data.set(NAMESPACE, "requests", json!(requests));
        Ok(())
    }
}

/// Normalized entities derived from one batch of raw pull requests.
#[derive(Debug, Default)]
struct Extracted {
    repositories: BTreeMap<u64, Repository>,
    contributors: BTreeMap<u64, Contributor>,
    merge_requests: Vec<MergeRequest>,
    commits: Vec<Commit>,
}

impl Extracted {
    fn add(&mut self, pull: &RawPullRequest) {
        let repo = &pull.repository;
        let entry = self.repositories.entry(repo.id).or_insert_with(|| Repository {
            github_id: repo.id,
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            full_name: repo.full_name(),
            description: None,
            stars: None,
            forks: None,
            language: None,
            is_enriched: false,
            updated_at: pull.updated_at,
        });
        entry.updated_at = entry.updated_at.max(pull.updated_at);

        // Authors, mergers and committers collapse onto one record per GitHub id.
        let people = std::iter::once(&pull.user)
            .chain(pull.merged_by.iter())
            .chain(pull.commits.iter().filter_map(|c| c.author.as_ref()));
        for user in people {
            self.contributors
                .entry(user.id)
                .and_modify(|c| c.updated_at = c.updated_at.max(pull.updated_at))
                .or_insert_with(|| Contributor::from_ref(user, pull.updated_at));
        }

        self.merge_requests.push(MergeRequest {
            github_id: pull.github_id,
            number: pull.number,
            title: pull.title.clone(),
            state: pull.state.clone(),
            repository_id: repo.id,
            repo_owner: repo.owner.clone(),
            repo_name: repo.name.clone(),
            author_id: pull.user.id,
            merged_by_id: pull.merged_by.as_ref().map(|u| u.id),
            merged_at: pull.merged_at,
            additions: pull.additions,
            deletions: pull.deletions,
            created_at: pull.created_at,
            updated_at: pull.updated_at,
        });

        for commit in &pull.commits {
            self.commits.push(Commit {
                sha: commit.sha.clone(),
                merge_request_id: pull.github_id,
                author_id: commit.author.as_ref().map(|a| a.id),
                message: commit.message.clone(),
                additions: commit.additions,
                deletions: commit.deletions,
                committed_at: commit.authored_at,
                updated_at: pull.updated_at,
            });
        }
    }
}

fn records<'a, T: serde::Serialize + 'a>(items: impl IntoIterator<Item = &'a T>) -> Result<Vec<Record>, StageError> {
    items
        .into_iter()
        .map(|item| to_record(item).map_err(StageError::from))
        .collect()
}

/// Turns unprocessed raw pull requests into repositories, contributors,
/// merge requests and commits, then marks the payloads processed.
#[derive(Clone)]
pub struct EntityExtractionStage {
    store: Arc<dyn EntityStore>,
}

impl EntityExtractionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    async fn commit(&self, extracted: Extracted, processed: Vec<Record>) -> Result<(), StageError> {
        let upserts = [
            (EntityType::Repository, records(extracted.repositories.values())?),
            (EntityType::Contributor, records(extracted.contributors.values())?),
            (EntityType::MergeRequest, records(&extracted.merge_requests)?),
            (EntityType::Commit, records(&extracted.commits)?),
            (EntityType::RawPullRequest, processed),
        ];
        for (entity, batch) in upserts {
            if !batch.is_empty() {
                self.store.upsert(entity, batch).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EntityExtractionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityExtractionStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for EntityExtractionStage {
    fn name(&self) -> &str {
        "entity_extraction"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        let batch_size = config.get_usize(BATCH_SIZE, 100);
        let ceiling = max_batches(config);
        let pending = Filter::flag("processed", false);
        let total = self.store.count(EntityType::RawPullRequest, &pending).await? as u64;
        let mut cursor = BatchCursor::load(&ctx.data, NAMESPACE, self.name())?;

        loop {
            if ceiling.is_some_and(|max| cursor.batches >= max) {
                info!(parent: ctx.logger(), batches = cursor.batches, "Batch ceiling reached");
                break;
            }
            let batch = self
                .store
                .fetch_batch(EntityType::RawPullRequest, batch_size, 0, &pending)
                .await?;
            if batch.is_empty() {
                break;
            }

            let mut extracted = Extracted::default();
            let mut processed = Vec::with_capacity(batch.len());
            for record in &batch {
                let pull: RawPullRequest = from_record(record)?;
                extracted.add(&pull);
                processed.push(json!({"github_id": pull.github_id, "processed": true}));
            }
            debug!(
                parent: ctx.logger(),
                pulls = batch.len(),
                contributors = extracted.contributors.len(),
                "Extracted batch"
            );
            self.commit(extracted, processed).await?;

            cursor.advance(batch.len());
            cursor.save(&mut ctx.data, NAMESPACE, self.name())?;
            ctx.add_items_processed(batch.len() as u64);
            ctx.update_status(
                50 + percent(cursor.processed, total.max(cursor.processed)) / 2,
                format!("Extracted {} of {total} pull requests", cursor.processed),
            );
        }

        info!(parent: ctx.logger(), processed = cursor.processed, batches = cursor.batches, "Entity extraction finished");
        Ok(())
    }
}

/// Builds the ingest then extract pipeline.
pub struct EntityExtractionPipeline {
    store: Arc<dyn EntityStore>,
    github: Arc<dyn GitHubClient>,
    defaults: StageConfig,
}

impl EntityExtractionPipeline {
    /// Creates the factory with defaults taken from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, github: Arc<dyn GitHubClient>, config: &AppConfig) -> Self {
        let defaults = StageConfig::new()
            .with(BATCH_SIZE, json!(config.batch.extraction))
            .with(MAX_REQUESTS, json!(config.enrichment.max_requests));
        Self {
            store,
            github,
            defaults,
        }
    }
}

impl PipelineFactory for EntityExtractionPipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::EntityExtraction
    }

    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError> {
        PipelineBuilder::new(self.pipeline_type().as_str())
            .with_config(stage_config(&self.defaults, parameters))
            .stage(Arc::new(GitHubIngestStage::new(self.store.clone(), self.github.clone())))
            .stage(Arc::new(EntityExtractionStage::new(self.store.clone())))
            .build()
    }
}
