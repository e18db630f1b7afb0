use crate::address::ContentAddresser;
use crate::error::Result;
use crate::manifest::Manifest;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use tar::{Builder, Header};

/// Packs a manifest's flavor subset into a tar container.
///
/// Entries are named by content hash and always carry the uncompressed
/// bytes: tar needs the entry length before the data, so gzipped objects are
/// decompressed while being appended rather than streamed through.
pub struct ArchiveBuilder {
    addresser: Arc<ContentAddresser>,
}

impl ArchiveBuilder {
    pub fn new(addresser: Arc<ContentAddresser>) -> Self {
        Self { addresser }
    }

    /// Build the archive for `flavor`, or the master archive for `None`.
    pub async fn build(&self, manifest: &Manifest, flavor: Option<&str>) -> Result<Bytes> {
        let mut builder = Builder::new(Vec::new());
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for (_, entry) in manifest.files_for_flavor(flavor) {
            // paths sharing content collapse into one member
            if !seen.insert(entry.sha.as_str()) {
                continue;
            }

            let raw = self.addresser.fetch_raw(&entry.sha).await?;

            let mut header = Header::new_gnu();
            header.set_size(raw.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            builder.append_data(&mut header, &entry.sha, raw.as_ref())?;
        }

        Ok(Bytes::from(builder.into_inner()?))
    }
}
