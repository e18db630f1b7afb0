use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current on-disk schema version of `catalog.json`.
pub const INDEX_FORMAT: u32 = 1;

/// Per-bundle version and distribution registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Published versions, strictly increasing, append-only except for
    /// explicit deletion.
    pub versions: Vec<u64>,

    /// The next version to allocate, always greater than `max(versions)`.
    pub next_version: u64,

    /// Named tags pointing at members of `versions`.
    #[serde(default)]
    pub distributions: BTreeMap<String, u64>,
}

impl BundleInfo {
    fn zero_state() -> Self {
        Self {
            versions: Vec::new(),
            next_version: 1,
            distributions: BTreeMap::new(),
        }
    }
}

/// The bundle/version/distribution registry for one catalog.
///
/// Pure in-memory structure; every mutation is followed by a full rewrite of
/// the serialized document by the engine. All operations here are I/O-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub id: String,
    pub format: u32,
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleInfo>,
}

impl CatalogIndex {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            format: INDEX_FORMAT,
            bundles: BTreeMap::new(),
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let index: CatalogIndex = serde_json::from_slice(data)?;
        if index.format > INDEX_FORMAT {
            return Err(CatalogError::Config(format!(
                "catalog index format {} is newer than supported format {}",
                index.format, INDEX_FORMAT
            )));
        }
        Ok(index)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn bundle_names(&self) -> Vec<String> {
        self.bundles.keys().cloned().collect()
    }

    /// Versions of a bundle, ascending. Unknown bundles yield an empty list
    /// without materializing an entry.
    pub fn versions_for_bundle(&self, name: &str) -> Vec<u64> {
        match self.bundles.get(name) {
            Some(info) => {
                let mut versions = info.versions.clone();
                versions.sort_unstable();
                versions
            }
            None => Vec::new(),
        }
    }

    /// The version the next publish will receive, materializing a zero-state
    /// entry for unknown bundles.
    pub fn next_version_for_bundle(&mut self, name: &str) -> u64 {
        self.bundles
            .entry(name.to_string())
            .or_insert_with(BundleInfo::zero_state)
            .next_version
    }

    /// Record a newly published version.
    ///
    /// Only the exact `next_version` value is accepted; re-adding an already
    /// present version is a no-op.
    pub fn add_version_for_bundle(&mut self, name: &str, version: u64) -> Result<()> {
        let expected = self.next_version_for_bundle(name);
        let info = self
            .bundles
            .get_mut(name)
            .expect("entry materialized by next_version_for_bundle");

        if info.versions.contains(&version) {
            return Ok(());
        }

        if version != expected {
            return Err(CatalogError::VersionConflict {
                bundle: name.to_string(),
                expected,
                requested: version,
            });
        }

        info.versions.push(version);
        info.versions.sort_unstable();
        info.next_version = version + 1;
        Ok(())
    }

    /// Remove a version; the bundle entry is dropped entirely once no
    /// versions remain, so the next allocation starts again at 1.
    pub fn delete_bundle_version(&mut self, name: &str, version: u64) -> Result<()> {
        let info = self
            .bundles
            .get_mut(name)
            .ok_or_else(|| CatalogError::UnknownBundle(name.to_string()))?;

        if !info.versions.contains(&version) {
            return Err(CatalogError::UnknownVersion {
                bundle: name.to_string(),
                version,
            });
        }

        if let Some((distro, _)) = info.distributions.iter().find(|(_, v)| **v == version) {
            return Err(CatalogError::ReferencedVersionDelete {
                bundle: name.to_string(),
                version,
                distribution: distro.clone(),
            });
        }

        info.versions.retain(|&v| v != version);
        if info.versions.is_empty() {
            self.bundles.remove(name);
        }
        Ok(())
    }

    pub fn distributions_for_bundle(&self, name: &str) -> BTreeMap<String, u64> {
        self.bundles
            .get(name)
            .map(|info| info.distributions.clone())
            .unwrap_or_default()
    }

    /// Distribution names grouped by the version they point to.
    pub fn distributions_for_bundle_by_version(&self, name: &str) -> BTreeMap<u64, Vec<String>> {
        let mut grouped: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (distro, &version) in self.distributions_for_bundle(name).iter() {
            grouped.entry(version).or_default().push(distro.clone());
        }
        grouped
    }

    pub fn version_for_distribution(&self, name: &str, distro: &str) -> Option<u64> {
        self.bundles
            .get(name)
            .and_then(|info| info.distributions.get(distro))
            .copied()
    }

    /// Point a distribution at a version, last-write-wins.
    pub fn update_distribution(&mut self, distro: &str, bundle: &str, version: u64) -> Result<()> {
        if !self.versions_for_bundle(bundle).contains(&version) {
            return Err(CatalogError::UnknownVersion {
                bundle: bundle.to_string(),
                version,
            });
        }
        let info = self
            .bundles
            .get_mut(bundle)
            .expect("bundle exists when a version does");
        info.distributions.insert(distro.to_string(), version);
        Ok(())
    }

    pub fn delete_distribution(&mut self, distro: &str, bundle: &str) -> Result<()> {
        let info = self
            .bundles
            .get_mut(bundle)
            .ok_or_else(|| CatalogError::UnknownDistribution {
                bundle: bundle.to_string(),
                distribution: distro.to_string(),
            })?;
        if info.distributions.remove(distro).is_none() {
            return Err(CatalogError::UnknownDistribution {
                bundle: bundle.to_string(),
                distribution: distro.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_versions(name: &str, count: u64) -> CatalogIndex {
        let mut index = CatalogIndex::new("test");
        for _ in 0..count {
            let version = index.next_version_for_bundle(name);
            index.add_version_for_bundle(name, version).unwrap();
        }
        index
    }

    #[test]
    fn test_versions_start_at_one_and_increase() {
        let mut index = CatalogIndex::new("test");
        assert_eq!(index.versions_for_bundle("art"), Vec::<u64>::new());
        assert_eq!(index.next_version_for_bundle("art"), 1);

        index.add_version_for_bundle("art", 1).unwrap();
        assert_eq!(index.next_version_for_bundle("art"), 2);
        index.add_version_for_bundle("art", 2).unwrap();
        assert_eq!(index.versions_for_bundle("art"), vec![1, 2]);
    }

    #[test]
    fn test_read_only_query_has_no_side_effect() {
        let index = CatalogIndex::new("test");
        assert!(index.versions_for_bundle("ghost").is_empty());
        assert!(index.bundles.is_empty());
    }

    #[test]
    fn test_add_version_rejects_out_of_order() {
        let mut index = index_with_versions("art", 2);

        let err = index.add_version_for_bundle("art", 5).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::VersionConflict {
                expected: 3,
                requested: 5,
                ..
            }
        ));

        // re-adding an existing version is idempotent
        index.add_version_for_bundle("art", 2).unwrap();
        assert_eq!(index.versions_for_bundle("art"), vec![1, 2]);
        assert_eq!(index.next_version_for_bundle("art"), 3);
    }

    #[test]
    fn test_next_version_is_always_max_plus_one() {
        let mut index = index_with_versions("art", 3);
        index.delete_bundle_version("art", 2).unwrap();
        assert_eq!(index.versions_for_bundle("art"), vec![1, 3]);
        assert_eq!(index.next_version_for_bundle("art"), 4);
    }

    #[test]
    fn test_delete_referenced_version_fails_without_mutation() {
        let mut index = index_with_versions("art", 2);
        index.update_distribution("stable", "art", 2).unwrap();

        let before = index.clone();
        let err = index.delete_bundle_version("art", 2).unwrap_err();
        assert!(matches!(err, CatalogError::ReferencedVersionDelete { .. }));
        assert_eq!(index, before);
    }

    #[test]
    fn test_deleting_last_version_drops_bundle_entry() {
        let mut index = index_with_versions("art", 1);
        index.delete_bundle_version("art", 1).unwrap();
        assert!(!index.bundles.contains_key("art"));
        // allocation starts over at 1
        assert_eq!(index.next_version_for_bundle("art"), 1);
    }

    #[test]
    fn test_delete_unknown_version_and_bundle() {
        let mut index = index_with_versions("art", 1);
        assert!(matches!(
            index.delete_bundle_version("ghost", 1),
            Err(CatalogError::UnknownBundle(_))
        ));
        assert!(matches!(
            index.delete_bundle_version("art", 9),
            Err(CatalogError::UnknownVersion { .. })
        ));
    }

    #[test]
    fn test_distribution_update_and_delete() {
        let mut index = index_with_versions("art", 2);

        assert!(matches!(
            index.update_distribution("stable", "art", 9),
            Err(CatalogError::UnknownVersion { .. })
        ));

        index.update_distribution("stable", "art", 1).unwrap();
        index.update_distribution("stable", "art", 2).unwrap();
        assert_eq!(index.version_for_distribution("art", "stable"), Some(2));

        index.update_distribution("beta", "art", 2).unwrap();
        let by_version = index.distributions_for_bundle_by_version("art");
        assert_eq!(by_version[&2], vec!["beta".to_string(), "stable".to_string()]);

        index.delete_distribution("beta", "art").unwrap();
        assert!(matches!(
            index.delete_distribution("beta", "art"),
            Err(CatalogError::UnknownDistribution { .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let mut index = index_with_versions("my-bundle", 3);
        index.update_distribution("stable", "my-bundle", 3).unwrap();

        let restored = CatalogIndex::from_json(&index.to_json().unwrap()).unwrap();
        assert_eq!(restored, index);
    }

    #[test]
    fn test_newer_format_is_rejected() {
        let mut index = CatalogIndex::new("test");
        index.format = INDEX_FORMAT + 1;
        let err = CatalogIndex::from_json(&serde_json::to_vec(&index).unwrap()).unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
