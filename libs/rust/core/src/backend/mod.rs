//! Storage and CDN backend interfaces.
//!
//! The cloud SDK bindings live outside this crate; implementations here are
//! an in-memory pair for tests, a sled-backed local bucket and a read-only
//! HTTP source for the public CDN.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

mod http;
mod memory;
mod sled_store;

pub use http::HttpSource;
pub use memory::{MemoryCdn, MemoryStorage};
pub use sled_store::SledStorage;

/// Key-value object storage (bucket semantics, `/`-separated keys).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BackendError>;
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationStatus { InProgress, Completed }

/// One invalidation request. `caller_reference` makes the request idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationBatch {
    pub caller_reference: String,
    pub paths: Vec<String>,
}

/// CDN edge cache control.
#[async_trait]
pub trait CdnBackend: Send + Sync {
    async fn create_invalidation(&self, distribution_id: &str, batch: InvalidationBatch) -> Result<String, BackendError>;
    async fn invalidation_status(&self, distribution_id: &str, invalidation_id: &str) -> Result<InvalidationStatus, BackendError>;
}

/// Read-only object source used by the verifying fetcher.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn read(&self, key: &str) -> Result<Vec<u8>, BackendError>;
}

/// Reads straight from a storage backend.
#[derive(Clone)]
pub struct StorageSource(pub Arc<dyn StorageBackend>);

#[async_trait]
impl ObjectSource for StorageSource {
    async fn read(&self, key: &str) -> Result<Vec<u8>, BackendError> { self.0.get(key).await }
}
