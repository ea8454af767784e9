//! Artifact catalog storage.
//!
//! Catalogs are exchanged through an external object store; the orchestrator
//! holds references only and never rewrites a catalog at a given location.

mod aggregate;
mod local;

pub use aggregate::{paginate, write_aggregated_catalog};
pub use local::LocalObjectStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ArtifactCatalog, CatalogValidationError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("object store error at {location}: {source}")]
    Store {
        location: String,
        source: std::io::Error,
    },
    #[error("catalog at {location} is not valid JSON: {source}")]
    Parse {
        location: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Validation(#[from] CatalogValidationError),
}

/// Write-once object storage for catalogs and maintenance snapshots.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, location: &str) -> Result<Vec<u8>, CatalogError>;
    /// Store an object. Implementations reject overwrites: artifacts are
    /// write-once.
    async fn put(&self, location: &str, body: &[u8]) -> Result<(), CatalogError>;
}

pub async fn read_catalog(
    store: &dyn ObjectStore,
    location: &str,
) -> Result<ArtifactCatalog, CatalogError> {
    let raw = store.get(location).await?;
    serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
        location: location.to_string(),
        source,
    })
}

pub async fn write_catalog(
    store: &dyn ObjectStore,
    location: &str,
    catalog: &ArtifactCatalog,
) -> Result<(), CatalogError> {
    let raw = serde_json::to_vec_pretty(catalog).map_err(|source| CatalogError::Parse {
        location: location.to_string(),
        source,
    })?;
    store.put(location, &raw).await
}
