use super::{load_index, load_manifest_opt};
use crate::error::Result;
use crate::layout;
use crate::lock::LeaseHandle;
use crate::storage::StorageBackend;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct CleanOperation {
    catalog_id: String,
    storage: Arc<dyn StorageBackend>,
}

pub struct CleanRequest {
    /// Report what would be removed without deleting anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CleanResult {
    /// Paths removed, or paths that would be removed under `dry_run`.
    pub removed: Vec<String>,
    pub dry_run: bool,
}

impl CleanOperation {
    pub fn new(catalog_id: String, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            catalog_id,
            storage,
        }
    }

    /// Sweep storage for artifacts no reachable version references.
    ///
    /// Reachability starts from the index: every listed `(bundle, version)`
    /// keeps its manifest, its archives, and every object any of its files
    /// hash to. Objects are shared across bundles, so the hash closure spans
    /// the whole catalog.
    pub async fn run(&self, lease: &LeaseHandle, request: CleanRequest) -> Result<CleanResult> {
        let index = load_index(&self.storage, &self.catalog_id).await?;

        let mut live_versions: BTreeSet<(String, u64)> = BTreeSet::new();
        for bundle in index.bundle_names() {
            for version in index.versions_for_bundle(&bundle) {
                live_versions.insert((bundle.clone(), version));
            }
        }

        let mut live_shas: BTreeSet<String> = BTreeSet::new();
        let mut live_archives: BTreeSet<(String, u64, Option<String>)> = BTreeSet::new();
        for (bundle, version) in &live_versions {
            // A reachable version whose manifest is already gone retains
            // nothing beyond its index entry.
            let Some(manifest) = load_manifest_opt(&self.storage, bundle, *version).await? else {
                continue;
            };
            live_shas.extend(manifest.file_shas());
            live_archives.insert((bundle.clone(), *version, None));
            for flavor in &manifest.flavors {
                live_archives.insert((bundle.clone(), *version, Some(flavor.clone())));
            }
        }

        let mut result = CleanResult {
            removed: Vec::new(),
            dry_run: request.dry_run,
        };

        for path in self.storage.list(layout::MANIFESTS_PREFIX).await? {
            let live = layout::parse_manifest_path(&path)
                .is_some_and(|(bundle, version)| live_versions.contains(&(bundle, version)));
            if !live {
                self.remove(lease, &path, request.dry_run, &mut result)
                    .await?;
            }
        }

        for path in self.storage.list(layout::ARCHIVES_PREFIX).await? {
            let live = layout::parse_archive_path(&path)
                .is_some_and(|descriptor| live_archives.contains(&descriptor));
            if !live {
                self.remove(lease, &path, request.dry_run, &mut result)
                    .await?;
            }
        }

        for path in self.storage.list(layout::OBJECTS_PREFIX).await? {
            let live =
                layout::parse_object_path(&path).is_some_and(|sha| live_shas.contains(&sha));
            if !live {
                self.remove(lease, &path, request.dry_run, &mut result)
                    .await?;
            }
        }

        tracing::info!(
            "clean{} removed {} paths",
            if request.dry_run { " (dry run)" } else { "" },
            result.removed.len()
        );
        Ok(result)
    }

    async fn remove(
        &self,
        lease: &LeaseHandle,
        path: &str,
        dry_run: bool,
        result: &mut CleanResult,
    ) -> Result<()> {
        if !dry_run {
            lease.ensure_held()?;
            self.storage.delete(path).await?;
        }
        result.removed.push(path.to_string());
        Ok(())
    }
}
