//! Per-entity-type sitemap bookkeeping, persisted in the entity store.

use crate::errors::StageError;
use crate::models::{from_record, to_record};
use crate::store::{EntityStore, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the last generation run produced for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapMetadata {
    /// Table name of the entity type; the record's key.
    pub entity_type: String,
    /// Last page file written.
    pub current_page: u32,
    /// URLs across all pages.
    pub url_count: u64,
    /// When the pages were last regenerated.
    pub last_updated: DateTime<Utc>,
}

impl SitemapMetadata {
    /// Metadata for an entity type that has never been generated.
    #[must_use]
    pub fn initial(entity: EntityType) -> Self {
        Self {
            entity_type: entity.as_str().to_string(),
            current_page: 0,
            url_count: 0,
            last_updated: DateTime::<Utc>::default(),
        }
    }

    /// Loads the stored metadata, or [`Self::initial`] if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record is malformed.
    pub async fn load(store: &dyn EntityStore, entity: EntityType) -> Result<Self, StageError> {
        match store.get(EntityType::SitemapMetadata, entity.as_str()).await? {
            Some(record) => Ok(from_record(&record)?),
            None => Ok(Self::initial(entity)),
        }
    }

    /// Persists the metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn save(&self, store: &dyn EntityStore) -> Result<(), StageError> {
        store
            .upsert(EntityType::SitemapMetadata, vec![to_record(self)?])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEntityStore;

    #[tokio::test]
    async fn test_load_defaults_then_round_trips() {
        let store = InMemoryEntityStore::new();
        let initial = SitemapMetadata::load(&store, EntityType::Contributor).await.unwrap();
        assert_eq!(initial, SitemapMetadata::initial(EntityType::Contributor));

        let saved = SitemapMetadata {
            current_page: 3,
            url_count: 125_000,
            last_updated: Utc::now(),
            ..initial
        };
        saved.save(&store).await.unwrap();

        let loaded = SitemapMetadata::load(&store, EntityType::Contributor).await.unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.len(EntityType::SitemapMetadata), 1);
    }
}
