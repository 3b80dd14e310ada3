//! In-memory entity store.

use super::{natural_key_of, EntityStore, EntityType, Filter, Record};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, Record>,
    // (updated_at, key) gives the paging order.
    order: BTreeSet<(String, String)>,
}

impl Table {
    fn sort_key(key: &str, record: &Record) -> (String, String) {
        let updated_at = record
            .get("updated_at")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        (updated_at, key.to_string())
    }

    fn upsert(&mut self, key: String, record: Record) {
        let merged = match self.rows.remove(&key) {
            Some(mut existing) => {
                self.order.remove(&Self::sort_key(&key, &existing));
                if let (Some(target), Some(source)) = (existing.as_object_mut(), record.as_object()) {
                    for (field, value) in source {
                        target.insert(field.clone(), value.clone());
                    }
                }
                existing
            }
            None => record,
        };
        self.order.insert(Self::sort_key(&key, &merged));
        self.rows.insert(key, merged);
    }

    fn ordered(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|(_, key)| self.rows.get(key))
    }
}

/// A process-local [`EntityStore`] with the same ordering and merge
/// semantics a database-backed store provides.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: DashMap<EntityType, RwLock<Table>>,
    failures_remaining: AtomicUsize,
}

impl InMemoryEntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with [`StoreError::Unavailable`].
    pub fn inject_transient_failures(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Returns every record of a type in paging order.
    #[must_use]
    pub fn snapshot(&self, entity: EntityType) -> Vec<Record> {
        self.tables
            .get(&entity)
            .map(|t| t.read().ordered().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of records of a type.
    #[must_use]
    pub fn len(&self, entity: EntityType) -> usize {
        self.tables.get(&entity).map_or(0, |t| t.read().rows.len())
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, entity: EntityType, key: &str) -> Result<Option<Record>, StoreError> {
        self.check_failure()?;
        Ok(self
            .tables
            .get(&entity)
            .and_then(|t| t.read().rows.get(key).cloned()))
    }

    async fn count(&self, entity: EntityType, filter: &Filter) -> Result<usize, StoreError> {
        self.check_failure()?;
        Ok(self.tables.get(&entity).map_or(0, |t| {
            t.read().ordered().filter(|r| filter.matches(r)).count()
        }))
    }

    async fn fetch_batch(
        &self,
        entity: EntityType,
        limit: usize,
        offset: usize,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        self.check_failure()?;
        Ok(self
            .tables
            .get(&entity)
            .map(|t| {
                t.read()
                    .ordered()
                    .filter(|r| filter.matches(r))
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, entity: EntityType, records: Vec<Record>) -> Result<(), StoreError> {
        self.check_failure()?;
        // Validate the whole batch before touching the table.
        let keyed = records
            .into_iter()
            .map(|r| natural_key_of(entity, &r).map(|k| (k, r)))
            .collect::<Result<Vec<_>, _>>()?;

        let table = self.tables.entry(entity).or_default();
        let mut table = table.write();
        for (key, record) in keyed {
            table.upsert(key, record);
        }
        Ok(())
    }
}
