//! Where sitemap files are written.

use crate::errors::SitemapError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A flat directory of sitemap XML files.
#[async_trait]
pub trait SitemapStorage: Send + Sync {
    /// Writes (or replaces) a file.
    async fn write(&self, name: &str, contents: String) -> Result<(), SitemapError>;

    /// Reads a file, `None` if it does not exist.
    async fn read(&self, name: &str) -> Result<Option<String>, SitemapError>;

    /// Deletes a file. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, SitemapError>;

    /// Lists the `.xml` files currently stored, sorted by name.
    async fn list(&self) -> Result<Vec<String>, SitemapError>;
}

/// Stores files in a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsSitemapStorage {
    dir: PathBuf,
}

impl FsSitemapStorage {
    /// Uses `dir`, creating it on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SitemapStorage for FsSitemapStorage {
    async fn write(&self, name: &str, contents: String) -> Result<(), SitemapError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Write then rename so readers never see a half-written file.
        let tmp = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, self.dir.join(name)).await?;
        debug!(file = name, dir = %self.dir.display(), "Sitemap file written");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<String>, SitemapError> {
        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, SitemapError> {
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, SitemapError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".xml") && !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Keeps files in memory. Used in tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemorySitemapStorage {
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemorySitemapStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SitemapStorage for InMemorySitemapStorage {
    async fn write(&self, name: &str, contents: String) -> Result<(), SitemapError> {
        self.files.write().insert(name.to_string(), contents);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<String>, SitemapError> {
        Ok(self.files.read().get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, SitemapError> {
        Ok(self.files.write().remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<String>, SitemapError> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|name| name.ends_with(".xml"))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(storage: &dyn SitemapStorage) {
        assert!(storage.list().await.unwrap().is_empty());
        storage.write("b-1.xml", "<b/>".to_string()).await.unwrap();
        storage.write("a-1.xml", "<a/>".to_string()).await.unwrap();
        storage.write("a-1.xml", "<a2/>".to_string()).await.unwrap();

        assert_eq!(storage.list().await.unwrap(), vec!["a-1.xml", "b-1.xml"]);
        assert_eq!(storage.read("a-1.xml").await.unwrap().as_deref(), Some("<a2/>"));
        assert!(storage.read("c-1.xml").await.unwrap().is_none());

        assert!(storage.delete("a-1.xml").await.unwrap());
        assert!(!storage.delete("a-1.xml").await.unwrap());
        assert_eq!(storage.list().await.unwrap(), vec!["b-1.xml"]);
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        exercise(&InMemorySitemapStorage::new()).await;
    }

    #[tokio::test]
    async fn test_fs_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsSitemapStorage::new(dir.path().join("sitemaps"));
        exercise(&storage).await;
        assert!(storage.dir().join("b-1.xml").exists());
    }
}
