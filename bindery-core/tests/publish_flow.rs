//! End-to-end publish/tag/fetch flow against the filesystem backend.

use bindery_core::{
    CatalogConfig, CatalogEngine, FlavorSpec, FsStorage, MemoryLockBackend, PublishBundleRequest,
    UpdateDistributionRequest,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

fn engine(root: &std::path::Path) -> CatalogEngine {
    CatalogEngine::new(
        "books",
        Arc::new(FsStorage::new(root.to_path_buf()).unwrap()),
        Arc::new(MemoryLockBackend::new()),
        CatalogConfig::default(),
    )
}

fn cover_tree() -> BTreeMap<String, Bytes> {
    BTreeMap::from([
        (
            "covers/100/front.png".to_string(),
            Bytes::from(vec![b'1'; 2048]),
        ),
        (
            "covers/640/front.png".to_string(),
            Bytes::from(vec![b'6'; 2048]),
        ),
        ("metadata.json".to_string(), Bytes::from_static(b"{}")),
    ])
}

fn cover_flavors() -> FlavorSpec {
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
async fn test_publish_tag_and_fetch_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let published = engine
        .publish_bundle(PublishBundleRequest {
            bundle: "moby-dick".to_string(),
            files: cover_tree(),
            flavors: cover_flavors(),
            force: false,
            skip_master_archive: false,
        })
        .await
        .unwrap();
    assert!(published.created);
    assert_eq!(published.manifest.version, 1);

    engine
        .update_distribution(UpdateDistributionRequest {
            distribution: "stable".to_string(),
            bundle: "moby-dick".to_string(),
            version: 1,
            save_previous: true,
        })
        .await
        .unwrap();

    // a consumer resolves the tag, fetches the manifest, and pulls a
    // flavored archive
    let version = engine
        .resolve_distribution("moby-dick", "stable")
        .await
        .unwrap();
    let manifest = engine.get_manifest("moby-dick", version).await.unwrap();
    assert_eq!(manifest.file_count(), 3);

    let archive = engine
        .get_archive("moby-dick", version, Some("small"))
        .await
        .unwrap();
    let mut reader = tar::Archive::new(archive.as_ref());
    let mut names = Vec::new();
    for entry in reader.entries().unwrap() {
        let mut entry = entry.unwrap();
        names.push(entry.path().unwrap().to_string_lossy().into_owned());
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![b'1'; 2048]);
    }
    assert_eq!(names, vec![manifest.files["covers/100/front.png"].sha.clone()]);

    // objects come back uncompressed whatever their stored format
    let object = engine
        .get_object(&manifest.files["covers/640/front.png"].sha)
        .await
        .unwrap();
    assert_eq!(object.as_ref(), vec![b'6'; 2048].as_slice());

    // the engine state survives a restart over the same root
    drop(engine);
    let reopened = self::engine(dir.path());
    assert_eq!(reopened.list_bundles().await.unwrap(), vec!["moby-dick"]);
    assert_eq!(
        reopened
            .resolve_distribution("moby-dick", "stable")
            .await
            .unwrap(),
        1
    );
}
