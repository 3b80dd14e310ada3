//! Sitemap generation.
//!
//! The pipeline runs three stages in order:
//!
//! 1. [`EntityFetchStage`] counts every tracked entity type and seeds the run
//!    context with its totals and stored [`SitemapMetadata`].
//! 2. [`SitemapGenerationStage`] regenerates the `{entity}-{page}.xml` page
//!    files for each seeded type, never exceeding the per-file maximum.
//! 3. [`SitemapIndexStage`] writes `sitemap.xml` listing every page file in
//!    storage plus the static pages.

mod metadata;
mod stages;
mod storage;
mod xml;

pub use metadata::SitemapMetadata;
pub use stages::{EntityFetchStage, EntitySitemapState, SitemapGenerationStage, SitemapIndexStage};
pub use storage::{FsSitemapStorage, InMemorySitemapStorage, SitemapStorage};
pub use xml::{parse_locs, render_index, render_urlset, SitemapUrl};

use crate::config::SitemapConfig;
use crate::core::{Parameters, PipelineType};
use crate::errors::PipelineValidationError;
use crate::execution::PipelineFactory;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::pipelines::BATCH_SIZE;
use crate::stages::StageConfig;
use crate::store::{EntityStore, EntityType, Record};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;

/// Entity types that get public pages, in index order.
pub const TRACKED: [EntityType; 3] = [
    EntityType::Repository,
    EntityType::Contributor,
    EntityType::MergeRequest,
];

/// File name of the sitemap index.
pub const INDEX_FILE: &str = "sitemap.xml";

/// Config key: URLs per page file.
pub const MAX_URLS_PER_FILE: &str = "max_urls_per_file";

/// Context namespace holding per-entity generation state.
pub const NAMESPACE: &str = "sitemap";

/// Returns the page file name, `{entity}-{page}.xml`.
#[must_use]
pub fn page_file_name(entity: EntityType, page: u32) -> String {
    format!("{}-{page}.xml", entity.as_str())
}

/// Parses a page file name back into its entity type and page number.
#[must_use]
pub fn parse_page_file(name: &str) -> Option<(EntityType, u32)> {
    let stem = name.strip_suffix(".xml")?;
    let (table, page) = stem.rsplit_once('-')?;
    let entity = EntityType::from_table(table).filter(|e| TRACKED.contains(e))?;
    Some((entity, page.parse().ok()?))
}

/// Builds the public URL of one entity record.
///
/// Returns `None` when the record lacks the fields its URL needs.
#[must_use]
pub fn entity_url(base_url: &str, entity: EntityType, record: &Record) -> Option<String> {
    let field = |name: &str| record.get(name).and_then(serde_json::Value::as_str);
    let base = base_url.trim_end_matches('/');
    match entity {
        EntityType::Repository => Some(format!("{base}/{}/{}", field("owner")?, field("name")?)),
        EntityType::Contributor => Some(format!("{base}/contributors/{}", field("login")?)),
        EntityType::MergeRequest => {
            let number = record.get("number").and_then(serde_json::Value::as_u64)?;
            Some(format!(
                "{base}/{}/{}/pull/{number}",
                field("repo_owner")?,
                field("repo_name")?
            ))
        }
        _ => None,
    }
}

/// Normalizes a record's `updated_at` to a W3C datetime.
#[must_use]
pub fn lastmod(record: &Record) -> Option<String> {
    let raw = record.get("updated_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Public location of a file under the configured path.
#[must_use]
pub fn public_url(config: &SitemapConfig, file: &str) -> String {
    let base = config.base_url.trim_end_matches('/');
    match config.public_path.trim_matches('/') {
        "" => format!("{base}/{file}"),
        path => format!("{base}/{path}/{file}"),
    }
}

/// Builds the fetch, generate, index pipeline.
pub struct SitemapGenerationPipeline {
    store: Arc<dyn EntityStore>,
    storage: Arc<dyn SitemapStorage>,
    config: SitemapConfig,
}

impl SitemapGenerationPipeline {
    /// Creates the factory.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, storage: Arc<dyn SitemapStorage>, config: SitemapConfig) -> Self {
        Self { store, storage, config }
    }
}

impl PipelineFactory for SitemapGenerationPipeline {
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::SitemapGeneration
    }

    fn build(&self, parameters: &Parameters) -> Result<Pipeline, PipelineValidationError> {
        let defaults = StageConfig::new()
            .with(BATCH_SIZE, json!(self.config.batch_size))
            .with(MAX_URLS_PER_FILE, json!(self.config.max_urls_per_file));
        let config = Arc::new(self.config.clone());
        PipelineBuilder::new(self.pipeline_type().as_str())
            .with_config(crate::pipelines::stage_config(&defaults, parameters))
            .stage(Arc::new(EntityFetchStage::new(self.store.clone())))
            .stage(Arc::new(SitemapGenerationStage::new(
                self.store.clone(),
                self.storage.clone(),
                config.clone(),
            )))
            .stage(Arc::new(SitemapIndexStage::new(self.storage.clone(), config)))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_file_names() {
        assert_eq!(page_file_name(EntityType::MergeRequest, 12), "merge_requests-12.xml");
        assert_eq!(
            parse_page_file("merge_requests-12.xml"),
            Some((EntityType::MergeRequest, 12))
        );
        assert_eq!(parse_page_file(INDEX_FILE), None);
        assert_eq!(parse_page_file("commits-1.xml"), None);
        assert_eq!(parse_page_file("repositories-x.xml"), None);
    }

    #[test]
    fn test_entity_urls() {
        let base = "https://example.com/";
        assert_eq!(
            entity_url(base, EntityType::Repository, &json!({"owner": "acme", "name": "widgets"})).as_deref(),
            Some("https://example.com/acme/widgets")
        );
        assert_eq!(
            entity_url(base, EntityType::Contributor, &json!({"login": "octo"})).as_deref(),
            Some("https://example.com/contributors/octo")
        );
        assert_eq!(
            entity_url(
                base,
                EntityType::MergeRequest,
                &json!({"repo_owner": "acme", "repo_name": "widgets", "number": 7})
            )
            .as_deref(),
            Some("https://example.com/acme/widgets/pull/7")
        );
        assert_eq!(entity_url(base, EntityType::Contributor, &json!({"id": 1})), None);
    }

    #[test]
    fn test_lastmod_normalizes() {
        assert_eq!(
            lastmod(&json!({"updated_at": "2024-03-01T10:00:00.123+02:00"})).as_deref(),
            Some("2024-03-01T08:00:00Z")
        );
        assert_eq!(lastmod(&json!({"updated_at": "yesterday"})), None);
    }

    #[test]
    fn test_public_url() {
        let config = SitemapConfig {
            base_url: "https://example.com/".to_string(),
            public_path: "/sitemaps/".to_string(),
            ..SitemapConfig::default()
        };
        assert_eq!(
            public_url(&config, "repositories-1.xml"),
            "https://example.com/sitemaps/repositories-1.xml"
        );
    }
}
