use super::{load_index, load_manifest_opt, save_index};
use crate::error::Result;
use crate::layout;
use crate::lock::LeaseHandle;
use crate::storage::StorageBackend;
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteVersionOperation {
    catalog_id: String,
    storage: Arc<dyn StorageBackend>,
}

pub struct DeleteVersionRequest {
    pub bundle: String,
    pub version: u64,
}

impl DeleteVersionOperation {
    pub fn new(catalog_id: String, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            catalog_id,
            storage,
        }
    }

    pub async fn run(&self, lease: &LeaseHandle, request: DeleteVersionRequest) -> Result<()> {
        let DeleteVersionRequest { bundle, version } = request;

        let mut index = load_index(&self.storage, &self.catalog_id).await?;
        let manifest = load_manifest_opt(&self.storage, &bundle, version).await?;

        index.delete_bundle_version(&bundle, version)?;
        lease.ensure_held()?;
        save_index(&self.storage, &index).await?;

        // The index is the durability boundary; artifact deletion below is
        // best-effort and anything left behind is swept up by clean.
        let mut orphans = vec![
            layout::manifest_path(&bundle, version),
            layout::archive_path(&bundle, version, None),
        ];
        if let Some(manifest) = &manifest {
            for flavor in &manifest.flavors {
                orphans.push(layout::archive_path(&bundle, version, Some(flavor)));
            }
        }
        for path in orphans {
            if let Err(error) = self.storage.delete(&path).await {
                tracing::warn!("failed to delete '{}' after version removal: {}", path, error);
            }
        }

        tracing::info!("deleted bundle '{}' version {}", bundle, version);
        Ok(())
    }
}
