//! Static configuration handed to every stage of a pipeline.

use crate::core::Parameters;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Key-value configuration fixed when a pipeline is built.
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    values: HashMap<String, serde_json::Value>,
}

impl StageConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Inserts a value.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Overlays run parameters on top of the defaults.
    pub fn merge(&mut self, parameters: &Parameters) {
        for (k, v) in parameters {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Gets a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Gets an unsigned integer, falling back to `default`.
    #[must_use]
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.values
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(default)
    }

    /// Gets a positive size, falling back to `default` for missing or zero values.
    #[must_use]
    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.values
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }

    /// Gets a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(serde_json::Value::as_str)
    }

    /// Gets and deserializes a value.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getters_with_defaults() {
        let config = StageConfig::new()
            .with("batch_size", serde_json::json!(25))
            .with("zero", serde_json::json!(0))
            .with("base_url", serde_json::json!("https://x.dev"))
            .with("repos", serde_json::json!(["a/b", "c/d"]));

        assert_eq!(config.get_usize("batch_size", 100), 25);
        assert_eq!(config.get_usize("zero", 100), 100);
        assert_eq!(config.get_usize("missing", 100), 100);
        assert_eq!(config.get_str("base_url"), Some("https://x.dev"));
        assert_eq!(
            config.get_as::<Vec<String>>("repos"),
            Some(vec!["a/b".to_string(), "c/d".to_string()])
        );
    }

    #[test]
    fn test_merge_parameters_override() {
        let mut config = StageConfig::new().with("batch_size", serde_json::json!(25));
        let params = Parameters::from([("batch_size".to_string(), serde_json::json!(5))]);
        config.merge(&params);
        assert_eq!(config.get_usize("batch_size", 100), 5);
    }
}
