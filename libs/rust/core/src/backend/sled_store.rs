use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::StorageBackend;
use crate::error::BackendError;

/// Local directory bucket backed by sled. Keys are stored verbatim.
#[derive(Clone)]
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), objects = db.len(), "opened local bucket");
        Ok(Self { db })
    }
}

#[async_trait]
impl StorageBackend for SledStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        match self.db.get(key)? {
            Some(v) => Ok(v.to_vec()),
            None => Err(BackendError::NotFound(key.to_string())),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BackendError> {
        self.db.insert(key, data)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.db.remove(key)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError> {
        let mut batch = sled::Batch::default();
        for key in keys { batch.remove(key.as_bytes()); }
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        for kv in self.db.scan_prefix(prefix) {
            let (k, _) = kv?;
            let key = std::str::from_utf8(&k).map_err(|e| BackendError::other(format!("non-utf8 key: {e}")))?;
            keys.push(key.to_string());
        }
        Ok(keys)
    }
}
