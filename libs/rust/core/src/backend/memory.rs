use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{CdnBackend, InvalidationBatch, InvalidationStatus, StorageBackend};
use crate::error::BackendError;

/// In-memory bucket. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryStorageInner>,
}

#[derive(Default)]
struct MemoryStorageInner {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_put_containing: Mutex<Option<String>>,
    fail_reads: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    /// Makes every put whose key contains `needle` fail until cleared.
    pub fn fail_puts_containing(&self, needle: impl Into<String>) { *self.inner.fail_put_containing.lock() = Some(needle.into()); }

    pub fn fail_reads(&self, fail: bool) { self.inner.fail_reads.store(fail, Ordering::SeqCst); }

    pub fn clear_faults(&self) {
        *self.inner.fail_put_containing.lock() = None;
        self.inner.fail_reads.store(false, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> { self.inner.objects.read().keys().cloned().collect() }

    pub fn contains(&self, key: &str) -> bool { self.inner.objects.read().contains_key(key) }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> { self.inner.objects.read().get(key).cloned() }

    pub fn insert_raw(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) { self.inner.objects.write().insert(key.into(), data.into()); }

    pub fn put_count(&self) -> usize { self.inner.puts.load(Ordering::SeqCst) }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) { return Err(BackendError::other("injected read failure")); }
        self.inner.objects.read().get(key).cloned().ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BackendError> {
        if let Some(needle) = self.inner.fail_put_containing.lock().as_deref() {
            if key.contains(needle) { return Err(BackendError::other(format!("injected put failure for {key}"))); }
        }
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        // object stores treat deleting a missing key as success
        self.inner.objects.write().remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError> {
        let mut objects = self.inner.objects.write();
        for key in keys { objects.remove(key); }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) { return Err(BackendError::other("injected list failure")); }
        Ok(self.inner.objects.read().range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect())
    }
}

/// In-memory CDN. Invalidations report completion after a configurable number of status polls.
#[derive(Clone, Default)]
pub struct MemoryCdn {
    inner: Arc<MemoryCdnInner>,
}

#[derive(Default)]
struct MemoryCdnInner {
    state: Mutex<CdnState>,
    polls_until_complete: AtomicUsize,
    fail_create: AtomicBool,
    fail_status: AtomicBool,
}

#[derive(Default)]
struct CdnState {
    next_id: u64,
    batches: Vec<(String, InvalidationBatch)>,
    polls: HashMap<String, usize>,
}

impl MemoryCdn {
    /// Invalidations complete on the first status poll.
    pub fn new() -> Self { Self::default() }

    pub fn with_polls_until_complete(polls: usize) -> Self {
        let cdn = Self::default();
        cdn.inner.polls_until_complete.store(polls, Ordering::SeqCst);
        cdn
    }

    /// `usize::MAX` keeps every invalidation in progress forever.
    pub fn set_polls_until_complete(&self, polls: usize) { self.inner.polls_until_complete.store(polls, Ordering::SeqCst); }

    pub fn fail_create(&self, fail: bool) { self.inner.fail_create.store(fail, Ordering::SeqCst); }

    pub fn fail_status(&self, fail: bool) { self.inner.fail_status.store(fail, Ordering::SeqCst); }

    pub fn create_calls(&self) -> usize { self.inner.state.lock().batches.len() }

    pub fn batches(&self) -> Vec<InvalidationBatch> { self.inner.state.lock().batches.iter().map(|(_, b)| b.clone()).collect() }

    /// All invalidated paths in request order.
    pub fn invalidated_paths(&self) -> Vec<String> {
        self.inner.state.lock().batches.iter().flat_map(|(_, b)| b.paths.clone()).collect()
    }
}

#[async_trait]
impl CdnBackend for MemoryCdn {
    async fn create_invalidation(&self, _distribution_id: &str, batch: InvalidationBatch) -> Result<String, BackendError> {
        if self.inner.fail_create.load(Ordering::SeqCst) { return Err(BackendError::other("injected invalidation failure")); }
        let mut st = self.inner.state.lock();
        st.next_id += 1;
        let id = format!("invalidation-{}", st.next_id);
        st.batches.push((id.clone(), batch));
        st.polls.insert(id.clone(), 0);
        Ok(id)
    }

    async fn invalidation_status(&self, _distribution_id: &str, invalidation_id: &str) -> Result<InvalidationStatus, BackendError> {
        if self.inner.fail_status.load(Ordering::SeqCst) { return Err(BackendError::other("injected status failure")); }
        let required = self.inner.polls_until_complete.load(Ordering::SeqCst);
        let mut st = self.inner.state.lock();
        let polls = st.polls.get_mut(invalidation_id).ok_or_else(|| BackendError::NotFound(invalidation_id.to_string()))?;
        *polls += 1;
        if *polls > required { Ok(InvalidationStatus::Completed) } else { Ok(InvalidationStatus::InProgress) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_prefix_scoped() {
        let s = MemoryStorage::new();
        s.put("a/b/1.json", b"1".to_vec()).await.unwrap();
        s.put("a/b/2.json", b"2".to_vec()).await.unwrap();
        s.put("a/c/1.json", b"3".to_vec()).await.unwrap();
        assert_eq!(s.list("a/b/").await.unwrap(), vec!["a/b/1.json".to_string(), "a/b/2.json".to_string()]);
        assert!(matches!(s.get("missing").await, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn cdn_completes_after_polls() {
        let cdn = MemoryCdn::with_polls_until_complete(1);
        let id = cdn.create_invalidation("d", InvalidationBatch { caller_reference: "r".into(), paths: vec!["/x".into()] }).await.unwrap();
        assert_eq!(cdn.invalidation_status("d", &id).await.unwrap(), InvalidationStatus::InProgress);
        assert_eq!(cdn.invalidation_status("d", &id).await.unwrap(), InvalidationStatus::Completed);
    }
}
