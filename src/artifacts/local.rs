//! Filesystem-backed object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{CatalogError, ObjectStore};

/// Object store rooted at a local directory, used for development and tests.
/// Locations are relative keys; path traversal is rejected.
#[derive(Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, CatalogError> {
        let relative = Path::new(location.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(CatalogError::Store {
                location: location.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path traversal in object key",
                ),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, location: &str) -> Result<Vec<u8>, CatalogError> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| CatalogError::Store {
                location: location.to_string(),
                source,
            })
    }

    async fn put(&self, location: &str, body: &[u8]) -> Result<(), CatalogError> {
        let path = self.resolve(location)?;
        let store_err = |source: std::io::Error| CatalogError::Store {
            location: location.to_string(),
            source,
        };

        if path.exists() {
            return Err(store_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "artifacts are write-once",
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }
        tokio::fs::write(&path, body).await.map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{read_catalog, write_catalog};
    use crate::models::{ArtifactCatalog, CatalogItem};
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_catalogs() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let catalog =
            ArtifactCatalog::new(vec![CatalogItem::href_only("https://example.com/a.nc")]);
        write_catalog(&store, "jobs/j1/catalog.json", &catalog)
            .await
            .unwrap();

        let back = read_catalog(&store, "jobs/j1/catalog.json").await.unwrap();
        assert_eq!(back.items.len(), 1);
        assert_eq!(back.items[0].href, "https://example.com/a.nc");
    }

    #[tokio::test]
    async fn rejects_overwrite_and_traversal() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("a/b.json", b"{}").await.unwrap();
        assert!(store.put("a/b.json", b"{}").await.is_err());
        assert!(store.put("../escape.json", b"{}").await.is_err());
    }
}
