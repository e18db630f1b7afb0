use super::{load_index, save_index};
use crate::error::{CatalogError, Result};
use crate::lock::LeaseHandle;
use crate::storage::StorageBackend;
use std::sync::Arc;

/// Reserved tag holding the previous value of a distribution, one level of
/// rollback history.
pub fn shadow_name(distribution: &str) -> String {
    format!("_{}", distribution)
}

#[derive(Clone)]
pub struct DistributionOperation {
    catalog_id: String,
    storage: Arc<dyn StorageBackend>,
}

pub struct UpdateDistributionRequest {
    pub distribution: String,
    pub bundle: String,
    pub version: u64,
    /// Copy a differing previous value to the shadow tag before overwriting.
    pub save_previous: bool,
}

pub struct DeleteDistributionRequest {
    pub distribution: String,
    pub bundle: String,
    /// Remove the shadow tag along with the distribution.
    pub delete_previous: bool,
}

impl DistributionOperation {
    pub fn new(catalog_id: String, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            catalog_id,
            storage,
        }
    }

    pub async fn update(
        &self,
        lease: &LeaseHandle,
        request: UpdateDistributionRequest,
    ) -> Result<()> {
        let UpdateDistributionRequest {
            distribution,
            bundle,
            version,
            save_previous,
        } = request;

        let mut index = load_index(&self.storage, &self.catalog_id).await?;

        if save_previous {
            if let Some(previous) = index.version_for_distribution(&bundle, &distribution) {
                if previous != version {
                    index.update_distribution(&shadow_name(&distribution), &bundle, previous)?;
                }
            }
        }
        index.update_distribution(&distribution, &bundle, version)?;

        lease.ensure_held()?;
        save_index(&self.storage, &index).await?;

        tracing::info!(
            "distribution '{}' of bundle '{}' now points at version {}",
            distribution,
            bundle,
            version
        );
        Ok(())
    }

    pub async fn delete(
        &self,
        lease: &LeaseHandle,
        request: DeleteDistributionRequest,
    ) -> Result<()> {
        let DeleteDistributionRequest {
            distribution,
            bundle,
            delete_previous,
        } = request;

        let mut index = load_index(&self.storage, &self.catalog_id).await?;

        index.delete_distribution(&distribution, &bundle)?;
        if delete_previous {
            // The shadow may legitimately be absent.
            match index.delete_distribution(&shadow_name(&distribution), &bundle) {
                Ok(()) | Err(CatalogError::UnknownDistribution { .. }) => {}
                Err(error) => return Err(error),
            }
        }

        lease.ensure_held()?;
        save_index(&self.storage, &index).await?;

        tracing::info!(
            "deleted distribution '{}' of bundle '{}'",
            distribution,
            bundle
        );
        Ok(())
    }
}
