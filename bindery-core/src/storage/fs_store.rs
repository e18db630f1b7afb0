use super::{PutOptions, StorageBackend, StorageMeta};
use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Filesystem-backed storage rooted at one directory per catalog.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        // Relative catalog paths only; reject traversal outside the root.
        for component in path.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(CatalogError::Internal(format!(
                    "invalid storage path: {}",
                    path
                )));
            }
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn get_meta(&self, path: &str) -> Result<StorageMeta> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(StorageMeta { size: meta.len() }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(path.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn put(&self, path: &str, data: Bytes, _opts: PutOptions) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temporary file first, then rename for atomicity.
        let temp = full.with_extension("tmp");
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &full).await?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let relative = entry
                        .path()
                        .strip_prefix(&self.root)
                        .map_err(|e| CatalogError::Internal(e.to_string()))?
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    if relative.starts_with(prefix) {
                        found.push(relative);
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().to_path_buf()).unwrap();

        storage
            .put("manifests/a-1.json", Bytes::from_static(b"{}"), PutOptions::default())
            .await
            .unwrap();
        storage
            .put("objects/ab/cd/abcd", Bytes::from_static(b"data"), PutOptions::default())
            .await
            .unwrap();

        assert_eq!(storage.get("manifests/a-1.json").await.unwrap().as_ref(), b"{}");
        assert_eq!(storage.get_meta("objects/ab/cd/abcd").await.unwrap().size, 4);

        let manifests = storage.list("manifests/").await.unwrap();
        assert_eq!(manifests, vec!["manifests/a-1.json"]);

        storage.delete("manifests/a-1.json").await.unwrap();
        assert!(matches!(
            storage.get("manifests/a-1.json").await,
            Err(CatalogError::NotFound(_))
        ));

        // idempotent delete
        storage.delete("manifests/a-1.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(storage.get("../outside").await.is_err());
    }
}
