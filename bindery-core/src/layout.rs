//! Persisted layout of a catalog, relative to its storage root.
//!
//! ```text
//! catalog.json
//! manifests/<bundle>-<version>.json
//! archives/<bundle>-<version>[~<flavor>].tar
//! objects/<sha[0:2]>/<sha[2:4]>/<sha>[.gz]
//! ```

use crate::address::ObjectFormat;

pub const INDEX_DOC: &str = "catalog.json";
pub const MANIFESTS_PREFIX: &str = "manifests/";
pub const ARCHIVES_PREFIX: &str = "archives/";
pub const OBJECTS_PREFIX: &str = "objects/";

/// Bundle names become path components and sit left of the `~` flavor
/// separator in archive names, so those characters cannot appear in them.
pub fn valid_bundle_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['~', '/'])
}

pub fn manifest_path(bundle: &str, version: u64) -> String {
    format!("{}{}-{}.json", MANIFESTS_PREFIX, bundle, version)
}

pub fn archive_path(bundle: &str, version: u64, flavor: Option<&str>) -> String {
    match flavor {
        Some(flavor) => format!("{}{}-{}~{}.tar", ARCHIVES_PREFIX, bundle, version, flavor),
        None => format!("{}{}-{}.tar", ARCHIVES_PREFIX, bundle, version),
    }
}

pub fn object_path(sha: &str, format: ObjectFormat) -> String {
    format!(
        "{}{}/{}/{}{}",
        OBJECTS_PREFIX,
        &sha[0..2],
        &sha[2..4],
        sha,
        format.extension()
    )
}

/// Inverse of [`manifest_path`]. Bundle names may contain `-`, so the version
/// is taken from the last dash-separated component.
pub fn parse_manifest_path(path: &str) -> Option<(String, u64)> {
    let stem = path.strip_prefix(MANIFESTS_PREFIX)?.strip_suffix(".json")?;
    let (bundle, version) = stem.rsplit_once('-')?;
    Some((bundle.to_string(), version.parse().ok()?))
}

/// Inverse of [`archive_path`].
pub fn parse_archive_path(path: &str) -> Option<(String, u64, Option<String>)> {
    let stem = path.strip_prefix(ARCHIVES_PREFIX)?.strip_suffix(".tar")?;
    let (stem, flavor) = match stem.split_once('~') {
        Some((stem, flavor)) => (stem, Some(flavor.to_string())),
        None => (stem, None),
    };
    let (bundle, version) = stem.rsplit_once('-')?;
    Some((bundle.to_string(), version.parse().ok()?, flavor))
}

/// Extract the content hash from an object path, whatever its format.
pub fn parse_object_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix(OBJECTS_PREFIX)?;
    let name = rest.rsplit('/').next()?;
    let sha = name.strip_suffix(".gz").unwrap_or(name);
    if sha.len() >= 4 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(sha.to_string())
    } else {
        None
    }
}
