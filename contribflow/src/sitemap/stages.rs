//! The three sitemap stages.

use super::{
    entity_url, lastmod, page_file_name, parse_page_file, public_url, render_index, render_urlset,
    SitemapMetadata, SitemapStorage, SitemapUrl, INDEX_FILE, MAX_URLS_PER_FILE, NAMESPACE, TRACKED,
};
use crate::config::{SitemapConfig, SITEMAP_URL_LIMIT};
use crate::context::{percent, ExecutionContext};
use crate::errors::StageError;
use crate::pipelines::BATCH_SIZE;
use crate::stages::{Stage, StageConfig};
use crate::store::{EntityStore, EntityType, Filter};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generation state for one entity type, kept in the run context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySitemapState {
    /// Entities in the store when the run started.
    pub total_count: u64,
    /// Metadata as loaded, replaced once generation finishes.
    pub metadata: SitemapMetadata,
    /// Entities read so far.
    pub processed_count: u64,
}

fn load_state(ctx: &ExecutionContext, entity: EntityType) -> Result<Option<EntitySitemapState>, StageError> {
    Ok(ctx.data.get_as(NAMESPACE, entity.as_str())?)
}

/// Seeds the context with a count and the stored metadata per entity type.
///
/// Types with no entities are left out so no empty page is ever written.
#[derive(Clone)]
pub struct EntityFetchStage {
    store: Arc<dyn EntityStore>,
}

impl EntityFetchStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for EntityFetchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityFetchStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for EntityFetchStage {
    fn name(&self) -> &str {
        "entity_fetch"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
        for entity in TRACKED {
            let total = self.store.count(entity, &Filter::all()).await? as u64;
            if total == 0 {
                debug!(parent: ctx.logger(), entity = %entity, "No entities, skipping");
                ctx.data.remove(NAMESPACE, entity.as_str());
                continue;
            }
            let metadata = SitemapMetadata::load(self.store.as_ref(), entity).await?;
            info!(
                parent: ctx.logger(),
                entity = %entity,
                total,
                previous_pages = metadata.current_page,
                "Entity count loaded"
            );
            let state = EntitySitemapState {
                total_count: total,
                metadata,
                processed_count: 0,
            };
            ctx.data.put(NAMESPACE, entity.as_str(), &state)?;
        }
        ctx.update_status(5, "Entity counts loaded");
        Ok(())
    }
}

/// Rewrites the page files of every entity type seeded by [`EntityFetchStage`].
///
/// Old pages of a type are deleted first; pages are then filled to the
/// per-file maximum in store order, with the remainder in the last page.
/// Metadata is saved once a type is complete.
#[derive(Clone)]
pub struct SitemapGenerationStage {
    store: Arc<dyn EntityStore>,
    storage: Arc<dyn SitemapStorage>,
    config: Arc<SitemapConfig>,
}

impl SitemapGenerationStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, storage: Arc<dyn SitemapStorage>, config: Arc<SitemapConfig>) -> Self {
        Self {
            store,
            storage,
            config,
        }
    }

    async fn delete_pages(&self, entity: EntityType) -> Result<usize, StageError> {
        let mut deleted = 0;
        for name in self.storage.list().await? {
            if parse_page_file(&name).is_some_and(|(e, _)| e == entity) && self.storage.delete(&name).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn flush(&self, entity: EntityType, page: u32, buffer: &mut Vec<SitemapUrl>) -> Result<u64, StageError> {
        let file = page_file_name(entity, page);
        let xml = render_urlset(&file, buffer)?;
        self.storage.write(&file, xml).await?;
        debug!(file = %file, urls = buffer.len(), "Sitemap page written");
        let written = buffer.len() as u64;
        buffer.clear();
        Ok(written)
    }
}

impl std::fmt::Debug for SitemapGenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitemapGenerationStage")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for SitemapGenerationStage {
    fn name(&self) -> &str {
        "sitemap_generation"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, config: &StageConfig) -> Result<(), StageError> {
        let max_urls = config.get_usize(MAX_URLS_PER_FILE, 49_000);
        if max_urls > SITEMAP_URL_LIMIT {
            return Err(StageError::invalid(format!(
                "{MAX_URLS_PER_FILE} is {max_urls}, the sitemap protocol allows at most {SITEMAP_URL_LIMIT}"
            )));
        }
        let batch_size = config.get_usize(BATCH_SIZE, 1_000);

        let mut states = Vec::new();
        for entity in TRACKED {
            if let Some(state) = load_state(ctx, entity)? {
                states.push((entity, state));
            }
        }
        let grand_total: u64 = states.iter().map(|(_, s)| s.total_count).sum();
        let mut done = 0u64;

        for (entity, mut state) in states {
            let deleted = self.delete_pages(entity).await?;
            debug!(parent: ctx.logger(), entity = %entity, deleted, "Previous pages removed");

            let mut buffer: Vec<SitemapUrl> = Vec::with_capacity(max_urls.min(batch_size.saturating_mul(4)));
            let mut page = 0u32;
            let mut url_count = 0u64;
            let mut offset = 0usize;

            loop {
                let batch = self
                    .store
                    .fetch_batch(entity, batch_size, offset, &Filter::all())
                    .await?;
                if batch.is_empty() {
                    break;
                }
                offset += batch.len();

                for record in &batch {
                    state.processed_count += 1;
                    let Some(loc) = entity_url(&self.config.base_url, entity, record) else {
                        warn!(parent: ctx.logger(), entity = %entity, "Entity has no public URL, skipping");
                        continue;
                    };
                    let mut url = SitemapUrl::new(loc);
                    url.lastmod = lastmod(record);
                    buffer.push(url);

                    if buffer.len() >= max_urls {
                        page += 1;
                        url_count += self.flush(entity, page, &mut buffer).await?;
                    }
                }

                done += batch.len() as u64;
                ctx.update_status(
                    5 + percent(done.saturating_mul(9), grand_total.max(done).saturating_mul(10)),
                    format!("Generated {} of {} {entity}", state.processed_count, state.total_count),
                );
            }

            if !buffer.is_empty() {
                page += 1;
                url_count += self.flush(entity, page, &mut buffer).await?;
            }

            state.metadata = SitemapMetadata {
                entity_type: entity.as_str().to_string(),
                current_page: page,
                url_count,
                last_updated: Utc::now(),
            };
            state.metadata.save(self.store.as_ref()).await?;
            ctx.data.put(NAMESPACE, entity.as_str(), &state)?;
            ctx.add_items_processed(url_count);
            info!(parent: ctx.logger(), entity = %entity, pages = page, urls = url_count, "Sitemap pages generated");
        }
        Ok(())
    }
}

/// Writes the sitemap index over every page file in storage.
///
/// Pages left from earlier runs are included, so a type that failed to
/// regenerate keeps its previous pages listed.
#[derive(Clone)]
pub struct SitemapIndexStage {
    storage: Arc<dyn SitemapStorage>,
    config: Arc<SitemapConfig>,
}

impl SitemapIndexStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(storage: Arc<dyn SitemapStorage>, config: Arc<SitemapConfig>) -> Self {
        Self { storage, config }
    }
}

impl std::fmt::Debug for SitemapIndexStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitemapIndexStage")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for SitemapIndexStage {
    fn name(&self) -> &str {
        "sitemap_index"
    }

    async fn execute(&self, ctx: &mut ExecutionContext, _config: &StageConfig) -> Result<(), StageError> {
        let mut pages: Vec<(usize, u32, String)> = self
            .storage
            .list()
            .await?
            .into_iter()
            .filter_map(|name| {
                let (entity, page) = parse_page_file(&name)?;
                let position = TRACKED.iter().position(|e| *e == entity)?;
                Some((position, page, name))
            })
            .collect();
        if pages.is_empty() {
            info!(parent: ctx.logger(), "No sitemap pages, index not written");
            return Ok(());
        }
        pages.sort();

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let base = self.config.base_url.trim_end_matches('/');
        let mut entries: Vec<SitemapUrl> = pages
            .iter()
            .map(|(_, _, name)| SitemapUrl::new(public_url(&self.config, name)).with_lastmod(now.clone()))
            .collect();
        entries.extend(
            self.config
                .static_pages
                .iter()
                .map(|path| SitemapUrl::new(format!("{base}/{}", path.trim_start_matches('/')))),
        );

        self.storage.write(INDEX_FILE, render_index(&entries)?).await?;
        ctx.data.set(NAMESPACE, "index_entries", json!(entries.len()));
        info!(parent: ctx.logger(), pages = pages.len(), entries = entries.len(), "Sitemap index written");
        Ok(())
    }
}
