//! Mutating catalog operations.
//!
//! Every operation here runs inside a held lease: the engine acquires the
//! catalog lease, hands the operation a [`LeaseHandle`](crate::lock::LeaseHandle)
//! for theft checks, and releases the lease on every exit path. Each
//! operation reloads the index from storage before computing its mutation.

pub mod clean;
pub mod delete_version;
pub mod distribution;
pub mod publish_bundle;

pub use clean::{CleanOperation, CleanRequest, CleanResult};
pub use delete_version::{DeleteVersionOperation, DeleteVersionRequest};
pub use distribution::{
    DeleteDistributionRequest, DistributionOperation, UpdateDistributionRequest, shadow_name,
};
pub use publish_bundle::{PublishBundleOperation, PublishBundleRequest, PublishBundleResult};

use crate::error::{CatalogError, Result};
use crate::index::CatalogIndex;
use crate::layout;
use crate::manifest::Manifest;
use crate::storage::{PutOptions, StorageBackend};
use bytes::Bytes;
use std::sync::Arc;

/// Load the catalog index, or start an empty one for a fresh catalog.
pub(crate) async fn load_index(
    storage: &Arc<dyn StorageBackend>,
    catalog_id: &str,
) -> Result<CatalogIndex> {
    match storage.get_opt(layout::INDEX_DOC).await? {
        Some(bytes) => CatalogIndex::from_json(&bytes),
        None => Ok(CatalogIndex::new(catalog_id)),
    }
}

/// Full rewrite of the index document; there are no partial patches.
pub(crate) async fn save_index(
    storage: &Arc<dyn StorageBackend>,
    index: &CatalogIndex,
) -> Result<()> {
    storage
        .put(
            layout::INDEX_DOC,
            Bytes::from(index.to_json()?),
            PutOptions::default(),
        )
        .await
}

pub(crate) async fn load_manifest(
    storage: &Arc<dyn StorageBackend>,
    bundle: &str,
    version: u64,
) -> Result<Manifest> {
    let bytes = storage.get(&layout::manifest_path(bundle, version)).await?;
    Manifest::from_json(&bytes)
}

pub(crate) async fn load_manifest_opt(
    storage: &Arc<dyn StorageBackend>,
    bundle: &str,
    version: u64,
) -> Result<Option<Manifest>> {
    match load_manifest(storage, bundle, version).await {
        Ok(manifest) => Ok(Some(manifest)),
        Err(CatalogError::NotFound(_)) => Ok(None),
        Err(error) => Err(error),
    }
}

pub(crate) async fn save_manifest(
    storage: &Arc<dyn StorageBackend>,
    manifest: &Manifest,
) -> Result<()> {
    storage
        .put(
            &layout::manifest_path(&manifest.bundle, manifest.version),
            Bytes::from(manifest.to_json()?),
            PutOptions::default(),
        )
        .await
}
