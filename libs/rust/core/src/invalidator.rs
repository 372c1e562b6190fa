//! CDN cache invalidation.
//!
//! Keys written through the object store are either invalidated right away
//! (eager) or collected and sent as one batch on `flush` (batch-on-flush).
//! A failed eager request does not fail the write; its paths are kept as
//! dirty and retried by the next `flush`, which reports the error if it
//! persists. `flush` then waits for every invalidation issued so far. Bookkeeping sits
//! behind a short-lived lock that is never held across an await; concurrent
//! flushes queue on a separate async mutex.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use attcfg_resilience::{poll_until, PollError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{CdnBackend, InvalidationBatch, InvalidationStatus};
use crate::config::{InvalidationConfig, InvalidationStrategy};
use crate::error::{ApiError, BackendError};
use crate::metrics::API_METRICS;

/// Maximum number of paths in one invalidation request.
pub const MAX_INVALIDATION_PATHS: usize = 3000;

#[derive(Default)]
struct InvalidationState {
    dirty_keys: Vec<String>,
    invalidation_ids: Vec<String>,
}

pub struct CacheInvalidator {
    cdn: Arc<dyn CdnBackend>,
    distribution_id: String,
    strategy: InvalidationStrategy,
    wait_timeout: Duration,
    poll_interval: Duration,
    state: Mutex<InvalidationState>,
    flush_guard: tokio::sync::Mutex<()>,
}

impl CacheInvalidator {
    pub fn new(cdn: Arc<dyn CdnBackend>, distribution_id: impl Into<String>, cfg: &InvalidationConfig) -> Self {
        Self {
            cdn,
            distribution_id: distribution_id.into(),
            strategy: cfg.strategy,
            wait_timeout: cfg.wait_timeout(),
            poll_interval: cfg.poll_interval(),
            state: Mutex::new(InvalidationState::default()),
            flush_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn strategy(&self) -> InvalidationStrategy { self.strategy }

    /// Registers written or deleted keys.
    pub async fn invalidate(&self, keys: &[String]) -> Result<(), ApiError> {
        match self.strategy {
            InvalidationStrategy::BatchOnFlush => {
                self.state.lock().dirty_keys.extend(keys.iter().cloned());
                Ok(())
            }
            InvalidationStrategy::Eager => {
                let paths = normalize(keys);
                if paths.is_empty() { return Ok(()); }
                check_batch_size(paths.len())?;
                if let Err(e) = self.issue(paths.clone()).await {
                    warn!(error = %e, paths = paths.len(), "eager invalidation failed, deferring to flush");
                    self.state.lock().dirty_keys.extend(paths);
                }
                Ok(())
            }
        }
    }

    /// Sends pending dirty keys and waits for all outstanding invalidations.
    pub async fn flush(&self) -> Result<(), ApiError> {
        let _guard = self.flush_guard.lock().await;

        let snapshot = {
            let mut st = self.state.lock();
            let paths = normalize(&st.dirty_keys);
            check_batch_size(paths.len())?;
            st.dirty_keys.clear();
            paths
        };
        if !snapshot.is_empty() {
            if let Err(e) = self.issue(snapshot.clone()).await {
                // keys written meanwhile stay after the restored ones
                let mut st = self.state.lock();
                let newer = std::mem::take(&mut st.dirty_keys);
                st.dirty_keys = snapshot.into_iter().chain(newer).collect();
                return Err(e);
            }
        }
        self.wait_for_invalidations().await
    }

    pub fn dirty_keys(&self) -> Vec<String> { self.state.lock().dirty_keys.clone() }

    pub fn pending_invalidations(&self) -> Vec<String> { self.state.lock().invalidation_ids.clone() }

    async fn issue(&self, paths: Vec<String>) -> Result<String, ApiError> {
        let count = paths.len();
        let batch = InvalidationBatch { caller_reference: uuid::Uuid::new_v4().to_string(), paths };
        debug!(distribution = %self.distribution_id, paths = count, caller_reference = %batch.caller_reference, "creating invalidation");
        match self.cdn.create_invalidation(&self.distribution_id, batch).await {
            Ok(id) => {
                API_METRICS.invalidations_total.add(1, &[]);
                info!(invalidation_id = %id, paths = count, "invalidation created");
                self.state.lock().invalidation_ids.push(id.clone());
                Ok(id)
            }
            Err(e) => {
                API_METRICS.invalidation_failures_total.add(1, &[]);
                Err(ApiError::Invalidation(format!("creating invalidation for {count} paths: {e}")))
            }
        }
    }

    async fn wait_for_invalidations(&self) -> Result<(), ApiError> {
        let ids = self.pending_invalidations();
        if ids.is_empty() { return Ok(()); }
        if self.wait_timeout.is_zero() {
            warn!(pending = ids.len(), "invalidation wait timeout is 0, not waiting for completion");
            return Ok(());
        }

        let started = Instant::now();
        let completed: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let cdn = &self.cdn;
        let distribution = self.distribution_id.as_str();
        let ids_ref = &ids;
        let completed_ref = &completed;
        let res = poll_until(self.poll_interval, self.wait_timeout, || async move {
            for id in ids_ref {
                if completed_ref.lock().contains(id) { continue; }
                match cdn.invalidation_status(distribution, id).await? {
                    InvalidationStatus::Completed => { completed_ref.lock().insert(id.clone()); }
                    InvalidationStatus::InProgress => return Ok(false),
                }
            }
            Ok::<bool, BackendError>(true)
        })
        .await;
        API_METRICS.invalidation_wait_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        match res {
            Ok(()) => {
                self.state.lock().invalidation_ids.retain(|id| !ids.contains(id));
                info!(count = ids.len(), "invalidations completed");
                Ok(())
            }
            Err(e) => {
                API_METRICS.invalidation_failures_total.add(1, &[]);
                let msg = match e {
                    PollError::Timeout(t) => format!("waiting for {} invalidations timed out after {t:?}", ids.len()),
                    PollError::Probe(err) => format!("checking invalidation status: {err}"),
                };
                Err(ApiError::Invalidation(msg))
            }
        }
    }
}

fn check_batch_size(len: usize) -> Result<(), ApiError> {
    if len > MAX_INVALIDATION_PATHS {
        return Err(ApiError::Invalidation(format!("{len} paths exceed the limit of {MAX_INVALIDATION_PATHS} per invalidation")));
    }
    Ok(())
}

/// Prefixes each key with `/` and drops duplicates, keeping first occurrence order.
fn normalize(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .map(|k| if k.starts_with('/') { k.clone() } else { format!("/{k}") })
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCdn;

    fn invalidator(cdn: &MemoryCdn, strategy: InvalidationStrategy, wait_timeout_secs: u64) -> CacheInvalidator {
        let cfg = InvalidationConfig { strategy, wait_timeout_secs, poll_interval_ms: 10 };
        CacheInvalidator::new(Arc::new(cdn.clone()), "dist", &cfg)
    }

    fn keys(n: usize) -> Vec<String> { (0..n).map(|i| format!("p/azure-sev-snp/{i}.json")).collect() }

    #[test]
    fn normalize_prefixes_and_dedups() {
        let out = normalize(&["a/b".into(), "/a/b".into(), "c".into()]);
        assert_eq!(out, vec!["/a/b".to_string(), "/c".to_string()]);
    }

    #[tokio::test]
    async fn over_limit_flush_fails_without_side_effects() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 5);
        inv.invalidate(&keys(MAX_INVALIDATION_PATHS + 1)).await.unwrap();
        let err = inv.flush().await.unwrap_err();
        assert!(err.is_invalidation());
        assert_eq!(cdn.create_calls(), 0);
        assert_eq!(inv.dirty_keys().len(), MAX_INVALIDATION_PATHS + 1);
    }

    #[tokio::test]
    async fn flush_at_limit_uses_one_request() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 5);
        inv.invalidate(&keys(MAX_INVALIDATION_PATHS)).await.unwrap();
        inv.flush().await.unwrap();
        assert_eq!(cdn.create_calls(), 1);
        assert_eq!(cdn.batches()[0].paths.len(), MAX_INVALIDATION_PATHS);
        assert!(inv.dirty_keys().is_empty());
        assert!(inv.pending_invalidations().is_empty());
    }

    #[tokio::test]
    async fn eager_issues_per_write() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::Eager, 5);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        inv.invalidate(&["a/2.json".into()]).await.unwrap();
        assert_eq!(cdn.create_calls(), 2);
        assert_eq!(inv.pending_invalidations().len(), 2);
        inv.flush().await.unwrap();
        assert_eq!(cdn.create_calls(), 2);
        assert!(inv.pending_invalidations().is_empty());
        assert_eq!(cdn.invalidated_paths(), vec!["/a/1.json".to_string(), "/a/2.json".to_string()]);
    }

    #[tokio::test]
    async fn failed_request_restores_keys() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 5);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        cdn.fail_create(true);
        assert!(inv.flush().await.unwrap_err().is_invalidation());
        assert_eq!(inv.dirty_keys(), vec!["/a/1.json".to_string()]);
        cdn.fail_create(false);
        inv.flush().await.unwrap();
        assert_eq!(cdn.invalidated_paths(), vec!["/a/1.json".to_string()]);
    }

    #[tokio::test]
    async fn failed_eager_request_defers_keys_to_flush() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::Eager, 5);
        cdn.fail_create(true);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        assert_eq!(inv.dirty_keys(), vec!["/a/1.json".to_string()]);
        assert!(inv.pending_invalidations().is_empty());

        assert!(inv.flush().await.unwrap_err().is_invalidation());
        assert_eq!(inv.dirty_keys(), vec!["/a/1.json".to_string()]);

        cdn.fail_create(false);
        inv.flush().await.unwrap();
        assert_eq!(cdn.invalidated_paths(), vec!["/a/1.json".to_string()]);
        assert!(inv.dirty_keys().is_empty());
    }

    #[tokio::test]
    async fn status_error_keeps_pending_ids() {
        let cdn = MemoryCdn::new();
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 5);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        cdn.fail_status(true);
        let err = inv.flush().await.unwrap_err();
        assert!(err.is_invalidation());
        assert_eq!(inv.pending_invalidations().len(), 1);
        assert!(inv.dirty_keys().is_empty());

        cdn.fail_status(false);
        inv.flush().await.unwrap();
        assert!(inv.pending_invalidations().is_empty());
        assert_eq!(cdn.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_keeps_pending_ids() {
        let cdn = MemoryCdn::with_polls_until_complete(usize::MAX);
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 1);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        assert!(inv.flush().await.unwrap_err().is_invalidation());
        assert_eq!(inv.pending_invalidations().len(), 1);
        assert!(inv.dirty_keys().is_empty());

        cdn.set_polls_until_complete(0);
        inv.flush().await.unwrap();
        assert!(inv.pending_invalidations().is_empty());
        assert_eq!(cdn.create_calls(), 1);
    }

    #[tokio::test]
    async fn zero_timeout_does_not_wait() {
        let cdn = MemoryCdn::with_polls_until_complete(usize::MAX);
        let inv = invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 0);
        inv.invalidate(&["a/1.json".into()]).await.unwrap();
        inv.flush().await.unwrap();
        assert_eq!(inv.pending_invalidations().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_and_flushes() {
        let cdn = MemoryCdn::new();
        let inv = Arc::new(invalidator(&cdn, InvalidationStrategy::BatchOnFlush, 5));
        let mut handles = Vec::new();
        for t in 0..8 {
            let inv = inv.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    inv.invalidate(&[format!("t{t}/{i}.json")]).await.unwrap();
                    if i % 10 == 0 { inv.flush().await.unwrap(); }
                }
            }));
        }
        for h in handles { h.await.unwrap(); }
        inv.flush().await.unwrap();

        let mut paths = cdn.invalidated_paths();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8 * 25);
        assert!(inv.dirty_keys().is_empty());
        assert!(inv.pending_invalidations().is_empty());
    }
}
