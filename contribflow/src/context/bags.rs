//! Namespaced context data bag.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Free-form data owned by one pipeline run.
///
/// Values live under a namespace (e.g. `sitemap`, `enrichment`) and a key
/// inside it. The bag is never shared between runs, so it needs no locking.
#[derive(Debug, Clone, Default)]
pub struct ContextBag {
    data: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl ContextBag {
    /// Creates a new empty context bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a raw value.
    #[must_use]
    pub fn get(&self, namespace: &str, key: &str) -> Option<&serde_json::Value> {
        self.data.get(namespace).and_then(|ns| ns.get(key))
    }

    /// Gets a value and deserializes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, serde_json::Error> {
        self.get(namespace, key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    /// Sets a raw value, replacing any previous one.
    pub fn set(&mut self, namespace: &str, key: impl Into<String>, value: serde_json::Value) {
        self.data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    /// Serializes and stores a value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn put<T: Serialize>(
        &mut self,
        namespace: &str,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(namespace, key, value);
        Ok(())
    }

    /// Removes a value.
    pub fn remove(&mut self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        self.data.get_mut(namespace).and_then(|ns| ns.remove(key))
    }

    /// Returns the keys present in a namespace, sorted.
    #[must_use]
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Returns true if the namespace holds at least one value.
    #[must_use]
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.data.get(namespace).is_some_and(|ns| !ns.is_empty())
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.values().all(serde_json::Map::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        offset: usize,
    }

    #[test]
    fn test_set_and_get() {
        let mut bag = ContextBag::new();
        assert!(bag.is_empty());

        bag.set("sitemap", "repositories", serde_json::json!({"total": 3}));
        assert_eq!(bag.get("sitemap", "repositories").unwrap()["total"], 3);
        assert!(bag.get("sitemap", "contributors").is_none());
        assert!(bag.get("ranking", "repositories").is_none());
        assert!(bag.has_namespace("sitemap"));
    }

    #[test]
    fn test_typed_round_trip() {
        let mut bag = ContextBag::new();
        bag.put("enrichment", "cursor", &Cursor { offset: 40 }).unwrap();

        let cursor: Cursor = bag.get_as("enrichment", "cursor").unwrap().unwrap();
        assert_eq!(cursor, Cursor { offset: 40 });
        assert!(bag.get_as::<Cursor>("enrichment", "missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_and_remove() {
        let mut bag = ContextBag::new();
        bag.set("ns", "k", serde_json::json!(1));
        bag.set("ns", "k", serde_json::json!(2));
        assert_eq!(bag.get("ns", "k"), Some(&serde_json::json!(2)));

        assert_eq!(bag.remove("ns", "k"), Some(serde_json::json!(2)));
        assert!(!bag.has_namespace("ns"));
    }

    #[test]
    fn test_keys_sorted() {
        let mut bag = ContextBag::new();
        bag.set("sitemap", "repositories", serde_json::json!(null));
        bag.set("sitemap", "contributors", serde_json::json!(null));
        assert_eq!(bag.keys("sitemap"), vec!["contributors", "repositories"]);
        assert!(bag.keys("other").is_empty());
    }
}
