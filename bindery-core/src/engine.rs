//! The catalog engine: serialized mutations under a distributed lease,
//! lease-free reads straight from storage.

use crate::address::{ContentAddresser, ObjectRecord};
use crate::archive::ArchiveBuilder;
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::index::CatalogIndex;
use crate::layout;
use crate::lock::{LeaseGuard, LockBackend, LockCoordinator};
use crate::manifest::Manifest;
use crate::operations::{
    CleanOperation, CleanRequest, CleanResult, DeleteDistributionRequest, DeleteVersionOperation,
    DeleteVersionRequest, DistributionOperation, PublishBundleOperation, PublishBundleRequest,
    PublishBundleResult, UpdateDistributionRequest, load_index, load_manifest,
};
use crate::storage::StorageBackend;
use bytes::Bytes;
use std::sync::Arc;

/// One catalog's engine: all mutating operations on the catalog are
/// serialized by a single catalog-wide lease, and every call reloads the
/// index from storage rather than trusting a cached copy.
pub struct CatalogEngine {
    catalog_id: String,
    storage: Arc<dyn StorageBackend>,
    addresser: Arc<ContentAddresser>,
    locks: LockCoordinator,
    publish: PublishBundleOperation,
    delete_version: DeleteVersionOperation,
    distributions: DistributionOperation,
    clean: CleanOperation,
}

impl CatalogEngine {
    pub fn new(
        catalog_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        lock_backend: Arc<dyn LockBackend>,
        config: CatalogConfig,
    ) -> Self {
        let catalog_id = catalog_id.into();
        let addresser = Arc::new(ContentAddresser::new(
            storage.clone(),
            config.compression_threshold,
        ));
        let archives = Arc::new(ArchiveBuilder::new(addresser.clone()));

        Self {
            publish: PublishBundleOperation::new(
                catalog_id.clone(),
                storage.clone(),
                addresser.clone(),
                archives,
            ),
            delete_version: DeleteVersionOperation::new(catalog_id.clone(), storage.clone()),
            distributions: DistributionOperation::new(catalog_id.clone(), storage.clone()),
            clean: CleanOperation::new(catalog_id.clone(), storage.clone()),
            locks: LockCoordinator::new(lock_backend, config.lock),
            catalog_id,
            storage,
            addresser,
        }
    }

    pub fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    /// Publish a directory tree as the bundle's next version.
    pub async fn publish_bundle(
        &self,
        request: PublishBundleRequest,
    ) -> Result<PublishBundleResult> {
        let guard = self.locks.acquire(&self.catalog_id).await?;
        let result = self.publish.run(&guard.handle(), request).await;
        settle(guard, result).await
    }

    /// Remove a published version and best-effort delete its artifacts.
    pub async fn delete_bundle_version(&self, bundle: &str, version: u64) -> Result<()> {
        let guard = self.locks.acquire(&self.catalog_id).await?;
        let result = self
            .delete_version
            .run(
                &guard.handle(),
                DeleteVersionRequest {
                    bundle: bundle.to_string(),
                    version,
                },
            )
            .await;
        settle(guard, result).await
    }

    /// Point a distribution tag at a version.
    pub async fn update_distribution(&self, request: UpdateDistributionRequest) -> Result<()> {
        let guard = self.locks.acquire(&self.catalog_id).await?;
        let result = self.distributions.update(&guard.handle(), request).await;
        settle(guard, result).await
    }

    /// Remove a distribution tag.
    pub async fn delete_distribution(&self, request: DeleteDistributionRequest) -> Result<()> {
        let guard = self.locks.acquire(&self.catalog_id).await?;
        let result = self.distributions.delete(&guard.handle(), request).await;
        settle(guard, result).await
    }

    /// Sweep unreachable manifests, archives, and objects from storage.
    pub async fn clean(&self, dry_run: bool) -> Result<CleanResult> {
        let guard = self.locks.acquire(&self.catalog_id).await?;
        let result = self
            .clean
            .run(&guard.handle(), CleanRequest { dry_run })
            .await;
        settle(guard, result).await
    }

    // Reads take no lease and observe whatever storage currently serves.

    pub async fn get_index(&self) -> Result<CatalogIndex> {
        load_index(&self.storage, &self.catalog_id).await
    }

    pub async fn list_bundles(&self) -> Result<Vec<String>> {
        Ok(self.get_index().await?.bundle_names())
    }

    pub async fn get_manifest(&self, bundle: &str, version: u64) -> Result<Manifest> {
        load_manifest(&self.storage, bundle, version).await
    }

    /// The version a distribution currently points at.
    pub async fn resolve_distribution(&self, bundle: &str, distribution: &str) -> Result<u64> {
        self.get_index()
            .await?
            .version_for_distribution(bundle, distribution)
            .ok_or_else(|| CatalogError::UnknownDistribution {
                bundle: bundle.to_string(),
                distribution: distribution.to_string(),
            })
    }

    /// Raw archive bytes for a version, master or flavored.
    pub async fn get_archive(
        &self,
        bundle: &str,
        version: u64,
        flavor: Option<&str>,
    ) -> Result<Bytes> {
        self.storage
            .get(&layout::archive_path(bundle, version, flavor))
            .await
    }

    /// Uncompressed bytes of a content-addressed object.
    pub async fn get_object(&self, sha: &str) -> Result<Bytes> {
        self.addresser.fetch_raw(sha).await
    }

    /// Locate an object in the store, whatever its physical format.
    pub async fn find_object(&self, sha: &str) -> Result<Option<ObjectRecord>> {
        self.addresser.find(sha).await
    }
}

/// Release the lease and merge the outcome: operation errors win over
/// release errors, and a clean operation only succeeds if the release does
/// too (a stolen lease makes the mutation's durability uncertain).
async fn settle<T>(guard: LeaseGuard, result: Result<T>) -> Result<T> {
    let released = guard.release().await;
    match result {
        Err(error) => Err(error),
        Ok(value) => released.map(|_| value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::flavor::FlavorSpec;
    use crate::lock::MemoryLockBackend;
    use crate::operations::shadow_name;
    use crate::storage::MemoryStorage;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn engine(storage: Arc<MemoryStorage>) -> CatalogEngine {
        let config = CatalogConfig {
            lock: LockConfig {
                expiry: Duration::from_secs(10),
                acquire_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(20),
            },
            ..CatalogConfig::default()
        };
        CatalogEngine::new(
            "test-catalog",
            storage,
            Arc::new(MemoryLockBackend::new()),
            config,
        )
    }

    fn tree(entries: &[(&str, &[u8])]) -> BTreeMap<String, Bytes> {
        entries
            .iter()
            .map(|(path, data)| (path.to_string(), Bytes::copy_from_slice(data)))
            .collect()
    }

    fn publish_request(bundle: &str, files: BTreeMap<String, Bytes>) -> PublishBundleRequest {
        PublishBundleRequest {
            bundle: bundle.to_string(),
            files,
            flavors: FlavorSpec::empty(),
            force: false,
            skip_master_archive: false,
        }
    }

    fn image_flavors() -> FlavorSpec {
        let rules = BTreeMap::from([
            (
                "small".to_string(),
                vec!["+ */100/*".to_string(), "- *".to_string()],
            ),
            (
                "large".to_string(),
                vec!["+ */640/*".to_string(), "- *".to_string()],
            ),
        ]);
        FlavorSpec::from_rules(&rules).unwrap()
    }

    #[tokio::test]
    async fn test_publish_is_idempotent_without_force() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage.clone());
        let files = tree(&[("a.txt", b"alpha"), ("b.txt", b"beta")]);

        let first = engine
            .publish_bundle(publish_request("art", files.clone()))
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.manifest.version, 1);

        // same content, no force: same version, no new writes
        let writes = storage.put_count();
        let again = engine
            .publish_bundle(publish_request("art", files.clone()))
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.manifest.version, 1);
        assert_eq!(storage.put_count(), writes);

        // force always allocates a new version
        let mut request = publish_request("art", files);
        request.force = true;
        let forced = engine.publish_bundle(request).await.unwrap();
        assert!(forced.created);
        assert_eq!(forced.manifest.version, 2);

        assert_eq!(
            engine.get_index().await.unwrap().versions_for_bundle("art"),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_single_file_bundle_gets_no_archive() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        engine
            .publish_bundle(publish_request("solo", tree(&[("only.txt", b"data")])))
            .await
            .unwrap();

        assert!(matches!(
            engine.get_archive("solo", 1, None).await,
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(
            engine.get_object(&compute_sha(b"data")).await.unwrap().as_ref(),
            b"data"
        );
    }

    #[tokio::test]
    async fn test_multi_file_bundle_gets_master_and_flavor_archives() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        let mut request = publish_request(
            "art",
            tree(&[("covers/100/a.png", b"small-a"), ("covers/640/a.png", b"large-a")]),
        );
        request.flavors = image_flavors();
        let published = engine.publish_bundle(request).await.unwrap();
        assert_eq!(
            published.manifest.flavors.iter().collect::<Vec<_>>(),
            vec!["large", "small"]
        );

        assert!(engine.get_archive("art", 1, None).await.is_ok());
        assert!(engine.get_archive("art", 1, Some("small")).await.is_ok());
        assert!(engine.get_archive("art", 1, Some("large")).await.is_ok());
    }

    #[tokio::test]
    async fn test_skip_master_archive_requires_flavors() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        let mut request = publish_request(
            "art",
            tree(&[("covers/100/a.png", b"small-a"), ("covers/640/a.png", b"large-a")]),
        );
        request.flavors = image_flavors();
        request.skip_master_archive = true;
        engine.publish_bundle(request).await.unwrap();

        assert!(matches!(
            engine.get_archive("art", 1, None).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(engine.get_archive("art", 1, Some("small")).await.is_ok());

        // without a flavor spec, skip_master_archive is ignored
        let mut request = publish_request("plain", tree(&[("a", b"1"), ("b", b"2")]));
        request.skip_master_archive = true;
        engine.publish_bundle(request).await.unwrap();
        assert!(engine.get_archive("plain", 1, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_version_guards_distributions() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        engine
            .publish_bundle(publish_request("art", tree(&[("a", b"1"), ("b", b"2")])))
            .await
            .unwrap();
        engine
            .update_distribution(UpdateDistributionRequest {
                distribution: "stable".to_string(),
                bundle: "art".to_string(),
                version: 1,
                save_previous: true,
            })
            .await
            .unwrap();

        let err = engine.delete_bundle_version("art", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::ReferencedVersionDelete { .. }));

        engine
            .delete_distribution(DeleteDistributionRequest {
                distribution: "stable".to_string(),
                bundle: "art".to_string(),
                delete_previous: true,
            })
            .await
            .unwrap();
        engine.delete_bundle_version("art", 1).await.unwrap();

        assert!(matches!(
            engine.get_manifest("art", 1).await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(engine.get_index().await.unwrap().bundle_names().is_empty());
    }

    #[tokio::test]
    async fn test_distribution_shadow_keeps_previous_value() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        engine
            .publish_bundle(publish_request("art", tree(&[("a", b"v1")])))
            .await
            .unwrap();
        let mut request = publish_request("art", tree(&[("a", b"v2")]));
        request.force = true;
        engine.publish_bundle(request).await.unwrap();

        for version in [1, 2] {
            engine
                .update_distribution(UpdateDistributionRequest {
                    distribution: "stable".to_string(),
                    bundle: "art".to_string(),
                    version,
                    save_previous: true,
                })
                .await
                .unwrap();
        }

        assert_eq!(engine.resolve_distribution("art", "stable").await.unwrap(), 2);
        assert_eq!(
            engine
                .resolve_distribution("art", &shadow_name("stable"))
                .await
                .unwrap(),
            1
        );

        assert!(matches!(
            engine.resolve_distribution("art", "ghost").await,
            Err(CatalogError::UnknownDistribution { .. })
        ));
    }

    #[tokio::test]
    async fn test_clean_removes_only_unreachable_artifacts() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage.clone());

        engine
            .publish_bundle(publish_request("art", tree(&[("a", b"keep-a"), ("b", b"keep-b")])))
            .await
            .unwrap();

        // plant orphans a crashed publisher could have left behind
        for path in [
            "manifests/ghost-9.json",
            "archives/ghost-9.tar",
            "objects/aa/bb/aabbccdd",
        ] {
            storage
                .put(path, Bytes::from_static(b"orphan"), Default::default())
                .await
                .unwrap();
        }

        let report = engine.clean(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.removed.len(), 3);
        // dry run deletes nothing
        assert!(storage.get("archives/ghost-9.tar").await.is_ok());

        let swept = engine.clean(false).await.unwrap();
        assert_eq!(swept.removed.len(), 3);
        assert!(storage.get("archives/ghost-9.tar").await.is_err());

        // live artifacts survive
        assert!(engine.get_manifest("art", 1).await.is_ok());
        assert!(engine.get_archive("art", 1, None).await.is_ok());
        assert_eq!(
            engine.get_object(&compute_sha(b"keep-a")).await.unwrap().as_ref(),
            b"keep-a"
        );
    }

    #[tokio::test]
    async fn test_malformed_object_hash_is_not_found() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        assert!(matches!(
            engine.get_object("ab").await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(engine.find_object("not-a-hash").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_rejects_unusable_bundle_names() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = engine(storage);

        // '~' collides with the flavor separator in archive names, '/' with
        // the path layout
        for name in ["art~nouveau", "a/b", ""] {
            let err = engine
                .publish_bundle(publish_request(name, tree(&[("a", b"1"), ("b", b"2")])))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::InvalidBundleName(_)));
        }
        assert!(engine.get_index().await.unwrap().bundle_names().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_publishers_serialize() {
        let storage = Arc::new(MemoryStorage::new());
        let engine = Arc::new(engine(storage));

        let mut tasks = Vec::new();
        for i in 0..4u8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .publish_bundle(PublishBundleRequest {
                        bundle: "art".to_string(),
                        files: tree(&[("a", &[i])]),
                        flavors: FlavorSpec::empty(),
                        force: true,
                        skip_master_archive: false,
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // one completed mutation per publisher, no interleaved partial writes
        assert_eq!(
            engine.get_index().await.unwrap().versions_for_bundle("art"),
            vec![1, 2, 3, 4]
        );
    }

    fn compute_sha(data: &[u8]) -> String {
        crate::address::compute_hash(data)
    }
}
