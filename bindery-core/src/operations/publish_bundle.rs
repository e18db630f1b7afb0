use super::{load_index, load_manifest_opt, save_index, save_manifest};
use crate::address::{ContentAddresser, compute_hash};
use crate::archive::ArchiveBuilder;
use crate::error::{CatalogError, Result};
use crate::flavor::FlavorSpec;
use crate::layout;
use crate::lock::LeaseHandle;
use crate::manifest::{FileEntry, FormatInfo, Manifest};
use crate::storage::{PutOptions, StorageBackend};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct PublishBundleOperation {
    catalog_id: String,
    storage: Arc<dyn StorageBackend>,
    addresser: Arc<ContentAddresser>,
    archives: Arc<ArchiveBuilder>,
}

pub struct PublishBundleRequest {
    pub bundle: String,
    /// The directory tree to publish, path to file bytes.
    pub files: BTreeMap<String, Bytes>,
    pub flavors: FlavorSpec,
    /// Allocate a new version even when content is unchanged.
    pub force: bool,
    /// Skip the master archive; only honored when flavors are defined.
    pub skip_master_archive: bool,
}

#[derive(Debug, Clone)]
pub struct PublishBundleResult {
    pub manifest: Manifest,
    /// False when the publish was an idempotent republish of the current
    /// highest version.
    pub created: bool,
}

impl PublishBundleOperation {
    pub fn new(
        catalog_id: String,
        storage: Arc<dyn StorageBackend>,
        addresser: Arc<ContentAddresser>,
        archives: Arc<ArchiveBuilder>,
    ) -> Self {
        Self {
            catalog_id,
            storage,
            addresser,
            archives,
        }
    }

    pub async fn run(
        &self,
        lease: &LeaseHandle,
        request: PublishBundleRequest,
    ) -> Result<PublishBundleResult> {
        let PublishBundleRequest {
            bundle,
            files,
            flavors,
            force,
            skip_master_archive,
        } = request;

        if !layout::valid_bundle_name(&bundle) {
            return Err(CatalogError::InvalidBundleName(bundle));
        }

        let mut index = load_index(&self.storage, &self.catalog_id).await?;

        let candidate: BTreeMap<String, String> = files
            .iter()
            .map(|(path, data)| (path.clone(), compute_hash(data)))
            .collect();

        // Idempotent republish guard: unchanged content republished without
        // force returns the current highest version untouched.
        if !force {
            if let Some(&latest) = index.versions_for_bundle(&bundle).last() {
                if let Some(existing) = load_manifest_opt(&self.storage, &bundle, latest).await? {
                    if existing.matches_content(&candidate) {
                        tracing::info!(
                            "bundle '{}' content unchanged, keeping version {}",
                            bundle,
                            latest
                        );
                        return Ok(PublishBundleResult {
                            manifest: existing,
                            created: false,
                        });
                    }
                }
            }
        }

        let version = index.next_version_for_bundle(&bundle);
        let mut manifest = Manifest::new(&self.catalog_id, &bundle, version);

        for (path, data) in &files {
            let imported = self.addresser.import(data).await?;
            manifest.insert_file(
                path.clone(),
                FileEntry {
                    sha: imported.sha,
                    formats: imported
                        .sizes
                        .iter()
                        .map(|(format, size)| (*format, FormatInfo { size: *size }))
                        .collect(),
                    flavors: flavors.flavors_for(path),
                },
            );
        }

        // Single-file bundles are fetched as bare objects and get no archive.
        if manifest.file_count() > 1 {
            let build_master = !(skip_master_archive && !flavors.is_empty());
            if build_master {
                self.put_archive(lease, &manifest, None).await?;
            }
            let matched = manifest.flavors.clone();
            for flavor in &matched {
                self.put_archive(lease, &manifest, Some(flavor)).await?;
            }
        }

        lease.ensure_held()?;
        save_manifest(&self.storage, &manifest).await?;

        // Manifest before index: a reader may see a manifest without its
        // index entry, never the reverse.
        index.add_version_for_bundle(&bundle, version)?;
        lease.ensure_held()?;
        save_index(&self.storage, &index).await?;

        tracing::info!(
            "published bundle '{}' version {} ({} files, {} flavors)",
            bundle,
            version,
            manifest.file_count(),
            manifest.flavors.len()
        );

        Ok(PublishBundleResult {
            manifest,
            created: true,
        })
    }

    async fn put_archive(
        &self,
        lease: &LeaseHandle,
        manifest: &Manifest,
        flavor: Option<&str>,
    ) -> Result<()> {
        let data = self.archives.build(manifest, flavor).await?;
        lease.ensure_held()?;
        self.storage
            .put(
                &layout::archive_path(&manifest.bundle, manifest.version, flavor),
                data,
                PutOptions::default(),
            )
            .await
    }
}
