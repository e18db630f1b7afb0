use crate::error::Result;
use crate::layout;
use crate::storage::{PutOptions, StorageBackend};
use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// Ratio below which the gzipped form is stored instead of the raw bytes.
pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.9;

/// Physical representation an object is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFormat {
    Raw,
    Gz,
}

impl ObjectFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectFormat::Raw => "raw",
            ObjectFormat::Gz => "gz",
        }
    }

    /// Filename extension appended to the object key, empty for raw.
    pub fn extension(&self) -> &'static str {
        match self {
            ObjectFormat::Raw => "",
            ObjectFormat::Gz => ".gz",
        }
    }
}

/// An object as discovered in the store: hash, stored format, stored size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub sha: String,
    pub format: ObjectFormat,
    pub size: u64,
}

/// Result of importing a file's bytes into the object store.
#[derive(Debug, Clone)]
pub struct ImportedObject {
    pub sha: String,
    pub format: ObjectFormat,
    /// Size of each physical representation that ended up stored.
    pub sizes: BTreeMap<ObjectFormat, u64>,
    /// False when the object already existed and no bytes were written.
    pub stored: bool,
}

/// Compute the lowercase hex SHA-256 of a byte slice.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Whether `sha` has the shape of a stored content hash. Lookups with
/// anything else must miss instead of building a malformed object path.
fn is_object_sha(sha: &str) -> bool {
    sha.len() == 64 && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Hashes imported files and picks their stored representation.
///
/// Import is content-addressed and deduplicating: when the hash already
/// exists in the store under any format, no bytes are written and the
/// compression probe is skipped entirely.
pub struct ContentAddresser {
    storage: Arc<dyn StorageBackend>,
    threshold: f64,
}

impl ContentAddresser {
    pub fn new(storage: Arc<dyn StorageBackend>, threshold: f64) -> Self {
        Self { storage, threshold }
    }

    pub async fn import(&self, data: &[u8]) -> Result<ImportedObject> {
        let sha = compute_hash(data);

        if let Some(existing) = self.find(&sha).await? {
            tracing::debug!("object {} already stored as {}", sha, existing.format.as_str());
            let mut sizes = BTreeMap::new();
            sizes.insert(existing.format, existing.size);
            return Ok(ImportedObject {
                sha,
                format: existing.format,
                sizes,
                stored: false,
            });
        }

        let raw_size = data.len() as u64;
        let compressed = gzip_bytes(data)?;
        let ratio = if raw_size > 0 {
            compressed.len() as f64 / raw_size as f64
        } else {
            1.0
        };

        let (format, payload, size) = if raw_size > 0 && ratio <= self.threshold {
            let size = compressed.len() as u64;
            (ObjectFormat::Gz, Bytes::from(compressed), size)
        } else {
            (ObjectFormat::Raw, Bytes::copy_from_slice(data), raw_size)
        };

        let path = layout::object_path(&sha, format);
        self.storage.put(&path, payload, PutOptions::default()).await?;
        tracing::debug!("imported object {} as {} ({} bytes)", sha, format.as_str(), size);

        let mut sizes = BTreeMap::new();
        sizes.insert(format, size);
        Ok(ImportedObject {
            sha,
            format,
            sizes,
            stored: true,
        })
    }

    /// Look the hash up under each candidate format extension.
    pub async fn find(&self, sha: &str) -> Result<Option<ObjectRecord>> {
        if !is_object_sha(sha) {
            return Ok(None);
        }
        for format in [ObjectFormat::Gz, ObjectFormat::Raw] {
            let path = layout::object_path(sha, format);
            if let Some(meta) = self.storage.meta_opt(&path).await? {
                return Ok(Some(ObjectRecord {
                    sha: sha.to_string(),
                    format,
                    size: meta.size,
                }));
            }
        }
        Ok(None)
    }

    /// Fetch an object's raw bytes, gunzipping the stored form if needed.
    pub async fn fetch_raw(&self, sha: &str) -> Result<Bytes> {
        let record = self
            .find(sha)
            .await?
            .ok_or_else(|| crate::error::CatalogError::NotFound(format!("object {}", sha)))?;

        let stored = self
            .storage
            .get(&layout::object_path(sha, record.format))
            .await?;

        match record.format {
            ObjectFormat::Raw => Ok(stored),
            ObjectFormat::Gz => Ok(Bytes::from(gunzip_bytes(&stored)?)),
        }
    }
}

pub(crate) fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn gunzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    Ok(raw)
}
