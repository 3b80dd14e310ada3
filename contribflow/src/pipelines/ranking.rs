//! Contributor ranking.

use super::{stage_config, BatchCursor, BATCH_SIZE};
use crate::config::AppConfig;
use crate::context::{percent, ExecutionContext};
use crate::core::{Parameters, PipelineType};
use crate::errors::{PipelineValidationError, StageError};
use crate::execution::PipelineFactory;
use crate::models::{from_record, to_record, Commit, Contributor, ContributorRanking, MergeRequest};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::stages::{Stage, StageConfig};
use crate::store::{EntityStore, EntityType, Filter, Record};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const NAMESPACE: &str = "ranking";
const STATS: &str = "stats";

/// Contribution totals for one contributor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorStats {
    /// GitHub id.
    pub contributor_id: u64,
    /// Login, when the contributor record exists.
    pub login: Option<String>,
    /// Merged pull requests authored.
    pub merged_count: u64,
    /// All pull requests authored.
    pub pr_count: u64,
    /// Commits authored.
    pub commit_count: u64,
    /// Lines added plus removed across authored pull requests.
    pub lines_changed: u64,
}

/// Weighted contribution score.
///
/// Merged pull requests weigh 10, unmerged ones 3, commits 2, and every
/// hundred changed lines 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn contribution_score(stats: &ContributorStats) -> f64 {
    let unmerged = stats.pr_count.saturating_sub(stats.merged_count);
    (10 * stats.merged_count + 3 * unmerged + 2 * stats.commit_count) as f64
        + stats.lines_changed as f64 / 100.0
}

/// Pages every record of `entity` and feeds it to `visit`.
///
/// Rankings are recomputed from full totals, so no batch ceiling applies here.
async fn scan<F>(store: &dyn EntityStore, entity: EntityType, batch_size: usize, mut visit: F) -> Result<u64, StageError>
where
    F: FnMut(&Record) -> Result<(), StageError> + Send,
{
    let mut cursor = BatchCursor::default();
    loop {
        let batch = store
            .fetch_batch(entity, batch_size, cursor.offset, &Filter::all())
            .await?;
        if batch.is_empty() {
            break;
        }
        for record in &batch {
            visit(record)?;
        }
        cursor.advance(batch.len());
    }
    Ok(cursor.processed)
}

fn entry(stats: &mut BTreeMap<u64, ContributorStats>, id: u64) -> &mut ContributorStats {
    stats.entry(id).or_insert_with(|| ContributorStats {
        contributor_id: id,
        ..ContributorStats::default()
    })
}

/// Totals pull requests, commits and changed lines per contributor.
///
/// Results land in the run context for [`RankingStage`].
#[derive(Clone)]
pub struct ContributionAggregationStage {
    store: Arc<dyn EntityStore>,
}

impl ContributionAggregationStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for ContributionAggregationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContributionAggregationStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for ContributionAggregationStage {
    fn name(&self) -> &str {
        "contribution_aggregation"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        let batch_size = config.get_usize(BATCH_SIZE, 500);
        let store = self.store.as_ref();
        let mut stats: BTreeMap<u64, ContributorStats> = BTreeMap::new();

        let merge_requests = scan(store, EntityType::MergeRequest, batch_size, |record| {
            let mr: MergeRequest = from_record(record)?;
            let s = entry(&mut stats, mr.author_id);
            s.pr_count += 1;
            if mr.merged_at.is_some() {
                s.merged_count += 1;
            }
            s.lines_changed += mr.additions + mr.deletions;
            Ok(())
        })
        .await?;
        ctx.update_status(30, format!("Aggregated {merge_requests} merge requests"));

        let commits = scan(store, EntityType::Commit, batch_size, |record| {
            let commit: Commit = from_record(record)?;
            if let Some(author) = commit.author_id {
                entry(&mut stats, author).commit_count += 1;
            }
            Ok(())
        })
        .await?;
        ctx.update_status(60, format!("Aggregated {commits} commits"));

        scan(store, EntityType::Contributor, batch_size, |record| {
            let contributor: Contributor = from_record(record)?;
            if let Some(s) = stats.get_mut(&contributor.github_id) {
                s.login = Some(contributor.login);
            }
            Ok(())
        })
        .await?;

        info!(
            parent: ctx.logger(),
            contributors = stats.len(),
            merge_requests,
            commits,
            "Contribution totals aggregated"
        );
        let stats: Vec<ContributorStats> = stats.into_values().collect();
        ctx.data.put(NAMESPACE, STATS, &stats)?;
        Ok(())
    }
}

/// Orders contributors by score and writes their rankings.
///
/// Ranks are 1-based; equal scores are ordered by contributor id.
#[derive(Clone)]
pub struct RankingStage {
    store: Arc<dyn EntityStore>,
}

impl RankingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for RankingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for RankingStage {
    fn name(&self) -> &str {
        "ranking"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        let stats: Vec<ContributorStats> = ctx
            .data
            .get_as(NAMESPACE, STATS)?
            .ok_or_else(|| StageError::MissingContext(format!("{NAMESPACE}.{STATS}")))?;
        let batch_size = config.get_usize(BATCH_SIZE, 500);

        let mut scored: Vec<(f64, ContributorStats)> =
            stats.into_iter().map(|s| (contribution_score(&s), s)).collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            b.total_cmp(a).then(sa.contributor_id.cmp(&sb.contributor_id))
        });

        let now = Utc::now();
        let total = scored.len() as u64;
        let mut cursor = BatchCursor::default();
        let rankings = scored.into_iter().zip(1u64..).map(|((score, s), rank)| ContributorRanking {
            contributor_id: s.contributor_id,
            login: s.login,
            rank,
            score,
            merged_count: s.merged_count,
            pr_count: s.pr_count,
            commit_count: s.commit_count,
            lines_changed: s.lines_changed,
            updated_at: now,
        });

        let records = rankings.map(|r| to_record(&r)).collect::<Result<Vec<Record>, _>>()?;
        for chunk in records.chunks(batch_size) {
            self.store
                .upsert(EntityType::ContributorRanking, chunk.to_vec())
                .await?;
            cursor.advance(chunk.len());
            ctx.add_items_processed(chunk.len() as u64);
            ctx.update_status(
                60 + percent(cursor.processed, total) * 2 / 5,
                format!("Ranked {} of {total} contributors", cursor.processed),
            );
            debug!(parent: ctx.logger(), batch = cursor.batches, "Rankings batch written");
        }
        ctx.data.set(NAMESPACE, "ranked", json!(cursor.processed));
        Ok(())
    }
}

/// Builds the aggregation then ranking pipeline.
pub struct ContributorRankingPipeline {
    store: Arc<dyn EntityStore>,
    defaults: StageConfig,
}

impl ContributorRankingPipeline {
    /// Creates the factory with defaults taken from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: &AppConfig) -> Self {
        Self {
            store,
            defaults: StageConfig::new().with(BATCH_SIZE, json!(config.batch.ranking)),
        }
    }
}

impl PipelineFactory for ContributorRankingPipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::ContributorRanking
    }

    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError> {
        PipelineBuilder::new(self.pipeline_type().as_str())
            .with_config(stage_config(&self.defaults, parameters))
            .stage(Arc::new(ContributionAggregationStage::new(self.store.clone())))
            .stage(Arc::new(RankingStage::new(self.store.clone())))
            .build()
    }
}
