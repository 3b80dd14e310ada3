//! Entity store collaborator.
//!
//! The persistence layer is consumed through the [`EntityStore`] trait:
//! get, count, paged fetch and upsert-by-natural-key. Records are JSON
//! objects; typed views live in [`crate::models`].

mod memory;
mod retrying;

pub use memory::InMemoryEntityStore;
pub use retrying::RetryingEntityStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON record as stored.
pub type Record = serde_json::Value;

/// The entity tables known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// GitHub repositories.
    Repository,
    /// GitHub users who authored, merged or committed.
    Contributor,
    /// Pull requests, normalized.
    MergeRequest,
    /// Commits belonging to pull requests.
    Commit,
    /// Pull request payloads as fetched from GitHub.
    RawPullRequest,
    /// Computed contributor rankings.
    ContributorRanking,
    /// Per-entity-type sitemap bookkeeping.
    SitemapMetadata,
}

impl EntityType {
    /// Returns the table name, also used as the sitemap file prefix.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repositories",
            Self::Contributor => "contributors",
            Self::MergeRequest => "merge_requests",
            Self::Commit => "commits",
            Self::RawPullRequest => "raw_pull_requests",
            Self::ContributorRanking => "contributor_rankings",
            Self::SitemapMetadata => "sitemap_metadata",
        }
    }

    /// Returns the natural key field used for upserts.
    #[must_use]
    pub const fn natural_key(&self) -> &'static str {
        match self {
            Self::Repository | Self::Contributor | Self::MergeRequest | Self::RawPullRequest => {
                "github_id"
            }
            Self::Commit => "sha",
            Self::ContributorRanking => "contributor_id",
            Self::SitemapMetadata => "entity_type",
        }
    }

    /// Parses a table name.
    #[must_use]
    pub fn from_table(name: &str) -> Option<Self> {
        [
            Self::Repository,
            Self::Contributor,
            Self::MergeRequest,
            Self::Commit,
            Self::RawPullRequest,
            Self::ContributorRanking,
            Self::SitemapMetadata,
        ]
        .into_iter()
        .find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record filter. All conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Flag { field: String, value: bool },
    Equals { field: String, value: serde_json::Value },
}

impl Filter {
    /// Matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches records whose boolean `field` equals `value`. A missing field reads as `false`.
    #[must_use]
    pub fn flag(field: impl Into<String>, value: bool) -> Self {
        Self::default().and_flag(field, value)
    }

    /// Adds a flag condition.
    #[must_use]
    pub fn and_flag(mut self, field: impl Into<String>, value: bool) -> Self {
        self.conditions.push(Condition::Flag {
            field: field.into(),
            value,
        });
        self
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn and_eq(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.conditions.push(Condition::Equals {
            field: field.into(),
            value,
        });
        self
    }

    /// Returns true if `record` satisfies every condition.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Flag { field, value } => {
                record
                    .get(field)
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false)
                    == *value
            }
            Condition::Equals { field, value } => record.get(field) == Some(value),
        })
    }
}

/// Extracts the natural key of `record` as a string.
///
/// # Errors
///
/// Returns an error if the record is not an object or lacks the key.
pub fn natural_key_of(entity: EntityType, record: &Record) -> Result<String, StoreError> {
    let obj = record.as_object().ok_or_else(|| StoreError::InvalidRecord {
        entity: entity.to_string(),
    })?;
    let key = entity.natural_key();
    match obj.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(v @ serde_json::Value::Number(_)) => Ok(v.to_string()),
        _ => Err(StoreError::MissingKey {
            entity: entity.to_string(),
            key: key.to_string(),
        }),
    }
}

/// The persistence collaborator.
///
/// Implementations order fetched records by `updated_at` and then natural key
/// so offset paging is deterministic.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Gets one record by natural key.
    async fn get(&self, entity: EntityType, key: &str) -> Result<Option<Record>, StoreError>;

    /// Counts records matching `filter`.
    async fn count(&self, entity: EntityType, filter: &Filter) -> Result<usize, StoreError>;

    /// Fetches up to `limit` matching records starting at `offset`.
    async fn fetch_batch(
        &self,
        entity: EntityType,
        limit: usize,
        offset: usize,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError>;

    /// Inserts or merges records by natural key. Fields absent from a new
    /// record keep their stored values.
    async fn upsert(&self, entity: EntityType, records: Vec<Record>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_filter_treats_missing_as_false() {
        let filter = Filter::flag("is_enriched", false);
        assert!(filter.matches(&json!({"github_id": 1})));
        assert!(filter.matches(&json!({"github_id": 1, "is_enriched": false})));
        assert!(!filter.matches(&json!({"github_id": 1, "is_enriched": true})));
    }

    #[test]
    fn test_combined_filter() {
        let filter = Filter::flag("processed", false).and_eq("owner", json!("rust-lang"));
        assert!(filter.matches(&json!({"owner": "rust-lang"})));
        assert!(!filter.matches(&json!({"owner": "tokio-rs"})));
        assert!(Filter::all().matches(&json!({})));
    }

    #[test]
    fn test_natural_key_of() {
        assert_eq!(
            natural_key_of(EntityType::Repository, &json!({"github_id": 42})).unwrap(),
            "42"
        );
        assert_eq!(
            natural_key_of(EntityType::Commit, &json!({"sha": "abc"})).unwrap(),
            "abc"
        );
        assert!(matches!(
            natural_key_of(EntityType::Commit, &json!({"id": 1})),
            Err(StoreError::MissingKey { .. })
        ));
        assert!(matches!(
            natural_key_of(EntityType::Commit, &json!([1])),
            Err(StoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_entity_type_table_names() {
        assert_eq!(EntityType::MergeRequest.as_str(), "merge_requests");
        assert_eq!(EntityType::from_table("contributors"), Some(EntityType::Contributor));
        assert_eq!(EntityType::from_table("nope"), None);
    }
}
