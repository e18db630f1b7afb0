//! Byte-level storage backends for catalog documents and objects.
//!
//! The engine only ever talks to [`StorageBackend`]; durability and
//! consistency characteristics belong to the backend. Paths are always
//! relative to the catalog root.

pub mod fs_store;
pub mod memory_store;

pub use fs_store::FsStorage;
pub use memory_store::MemoryStorage;

use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Metadata for a stored document or object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageMeta {
    pub size: u64,
}

/// Options applied to a put.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Cache lifetime hint for backends that serve readers directly.
    pub max_age: Option<Duration>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch a document's bytes; `NotFound` if absent.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Fetch a document's metadata; `NotFound` if absent.
    async fn get_meta(&self, path: &str) -> Result<StorageMeta>;

    async fn put(&self, path: &str, data: Bytes, opts: PutOptions) -> Result<()>;

    /// List stored paths under a prefix, relative to the catalog root.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a document; deleting an absent path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// `get` that maps `NotFound` to `None`.
    async fn get_opt(&self, path: &str) -> Result<Option<Bytes>> {
        match self.get(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// `get_meta` that maps `NotFound` to `None`.
    async fn meta_opt(&self, path: &str) -> Result<Option<StorageMeta>> {
        match self.get_meta(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}
