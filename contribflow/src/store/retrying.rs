//! Entity store decorator that retries transient failures.

use super::{EntityStore, EntityType, Filter, Record};
use crate::errors::StoreError;
use crate::pipeline::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps another store and retries [`StoreError::is_transient`] errors with backoff.
pub struct RetryingEntityStore {
    inner: Arc<dyn EntityStore>,
    config: RetryConfig,
}

impl RetryingEntityStore {
    /// Creates a retrying wrapper.
    #[must_use]
    pub fn new(inner: Arc<dyn EntityStore>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl EntityStore for RetryingEntityStore {
    async fn get(&self, entity: EntityType, key: &str) -> Result<Option<Record>, StoreError> {
        with_retry_if(
            &self.config,
            "store.get",
            || self.inner.get(entity, key),
            StoreError::is_transient,
        )
        .await
    }

    async fn count(&self, entity: EntityType, filter: &Filter) -> Result<usize, StoreError> {
        with_retry_if(
            &self.config,
            "store.count",
            || self.inner.count(entity, filter),
            StoreError::is_transient,
        )
        .await
    }

    async fn fetch_batch(
        &self,
        entity: EntityType,
        limit: usize,
        offset: usize,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        with_retry_if(
            &self.config,
            "store.fetch_batch",
            || self.inner.fetch_batch(entity, limit, offset, filter),
            StoreError::is_transient,
        )
        .await
    }

    async fn upsert(&self, entity: EntityType, records: Vec<Record>) -> Result<(), StoreError> {
        with_retry_if(
            &self.config,
            "store.upsert",
            || self.inner.upsert(entity, records.clone()),
            StoreError::is_transient,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JitterStrategy;
    use crate::store::InMemoryEntityStore;
    use serde_json::json;

    fn fast(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = Arc::new(InMemoryEntityStore::new());
        inner.inject_transient_failures(2);
        let store = RetryingEntityStore::new(inner.clone(), fast(3));

        store
            .upsert(EntityType::Repository, vec![json!({"github_id": 1})])
            .await
            .unwrap();
        assert_eq!(inner.len(EntityType::Repository), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_bound() {
        let inner = Arc::new(InMemoryEntityStore::new());
        inner.inject_transient_failures(5);
        let store = RetryingEntityStore::new(inner, fast(2));

        let err = store
            .count(EntityType::Repository, &Filter::all())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let inner = Arc::new(InMemoryEntityStore::new());
        let store = RetryingEntityStore::new(inner, fast(3));
        let err = store
            .upsert(EntityType::Repository, vec![json!({"nope": 1})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
    }
}
