use super::{PutOptions, StorageBackend, StorageMeta};
use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory storage backend for tests.
#[derive(Default)]
pub struct MemoryStorage {
    documents: Mutex<BTreeMap<String, Bytes>>,
    puts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of put calls observed, for write-count assertions.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.documents.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.documents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(path.to_string()))
    }

    async fn get_meta(&self, path: &str) -> Result<StorageMeta> {
        self.documents
            .lock()
            .unwrap()
            .get(path)
            .map(|data| StorageMeta {
                size: data.len() as u64,
            })
            .ok_or_else(|| CatalogError::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, data: Bytes, _opts: PutOptions) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.documents.lock().unwrap().insert(path.to_string(), data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.documents.lock().unwrap().remove(path);
        Ok(())
    }
}
