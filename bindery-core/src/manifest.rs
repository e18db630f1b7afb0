use crate::address::ObjectFormat;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Size record for one physical representation of a file's object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub size: u64,
}

/// One file in a published bundle version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Lowercase hex content hash of the raw bytes.
    pub sha: String,

    /// Size per stored representation.
    pub formats: BTreeMap<ObjectFormat, FormatInfo>,

    /// Flavors this file belongs to.
    #[serde(default)]
    pub flavors: BTreeSet<String>,
}

/// The immutable per-version record of a bundle's files.
///
/// Created once during publish and never mutated after it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub catalog: String,
    pub bundle: String,
    pub version: u64,

    /// Union of the flavor memberships of all files, derived on insert.
    #[serde(default)]
    pub flavors: BTreeSet<String>,

    pub files: BTreeMap<String, FileEntry>,
}

impl Manifest {
    pub fn new(catalog: impl Into<String>, bundle: impl Into<String>, version: u64) -> Self {
        Self {
            catalog: catalog.into(),
            bundle: bundle.into(),
            version,
            flavors: BTreeSet::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn insert_file(&mut self, path: impl Into<String>, entry: FileEntry) {
        self.flavors.extend(entry.flavors.iter().cloned());
        self.files.insert(path.into(), entry);
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Distinct content hashes referenced by this manifest.
    pub fn file_shas(&self) -> BTreeSet<String> {
        self.files.values().map(|entry| entry.sha.clone()).collect()
    }

    /// Files belonging to `flavor`, or all files for `None` (master).
    pub fn files_for_flavor<'a>(
        &'a self,
        flavor: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a String, &'a FileEntry)> {
        self.files.iter().filter(move |(_, entry)| match flavor {
            None => true,
            Some(flavor) => entry.flavors.contains(flavor),
        })
    }

    /// Content equivalence: identical path sets with identical hash per path.
    /// Flavor membership and format choice are excluded from the comparison.
    pub fn content_equivalent(&self, other: &Manifest) -> bool {
        self.files.len() == other.files.len()
            && self.files.iter().all(|(path, entry)| {
                other
                    .files
                    .get(path)
                    .is_some_and(|peer| peer.sha == entry.sha)
            })
    }

    /// Content equivalence against a bare path → hash candidate map.
    pub fn matches_content(&self, hashes: &BTreeMap<String, String>) -> bool {
        self.files.len() == hashes.len()
            && self
                .files
                .iter()
                .all(|(path, entry)| hashes.get(path) == Some(&entry.sha))
    }

    /// Raw (uncompressed) size of a file, when the raw representation is the
    /// one stored.
    pub fn raw_size(&self, path: &str) -> Option<u64> {
        self.files
            .get(path)
            .and_then(|entry| entry.formats.get(&ObjectFormat::Raw))
            .map(|info| info.size)
    }
}
