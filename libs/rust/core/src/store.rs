//! Typed fetch/update/delete of API objects against a storage backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use attcfg_resilience::{retry_async, RetryPolicy};
use tracing::{debug, info};

use crate::backend::StorageBackend;
use crate::config::ApiConfig;
use crate::error::{ApiError, BackendError};
use crate::invalidator::CacheInvalidator;
use crate::objects::ApiObject;

pub struct VersionedObjectStore {
    backend: Arc<dyn StorageBackend>,
    invalidator: Arc<CacheInvalidator>,
    prefix: String,
    dry_run: bool,
    retry: RetryPolicy,
    op_timeout: Duration,
}

impl VersionedObjectStore {
    pub fn new(backend: Arc<dyn StorageBackend>, invalidator: Arc<CacheInvalidator>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            invalidator,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            dry_run: false,
            retry: RetryPolicy::default(),
            op_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(backend: Arc<dyn StorageBackend>, invalidator: Arc<CacheInvalidator>, cfg: &ApiConfig) -> Self {
        Self::new(backend, invalidator, cfg.api_prefix.clone())
            .with_dry_run(cfg.dry_run)
            .with_retry(cfg.retry.policy())
            .with_op_timeout(cfg.op_timeout())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self { self.dry_run = dry_run; self }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self { self.retry = retry; self }
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self { self.op_timeout = timeout; self }

    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn is_dry_run(&self) -> bool { self.dry_run }
    pub fn invalidator(&self) -> &Arc<CacheInvalidator> { &self.invalidator }

    pub fn key_for<T: ApiObject>(&self, obj: &T) -> String { obj.path(&self.prefix) }

    pub async fn fetch<T: ApiObject>(&self, req: &T) -> Result<T, ApiError> {
        req.validate_request()?;
        let key = self.key_for(req);
        debug!(%key, kind = T::KIND, "fetching object");
        let data = self.call("getting", &key, || self.backend.get(&key)).await?;
        let obj = req.decode(&data).map_err(|source| ApiError::Decode { kind: T::KIND, key: key.clone(), source })?;
        obj.validate()?;
        Ok(obj)
    }

    /// Writes `obj` and registers its key for invalidation.
    pub async fn update<T: ApiObject>(&self, obj: &T) -> Result<(), ApiError> {
        obj.validate()?;
        let key = self.key_for(obj);
        let data = obj.encode().map_err(|source| ApiError::Encode { kind: T::KIND, source })?;
        if self.dry_run {
            debug!(%key, body = %String::from_utf8_lossy(&data), "dry run, skipping write");
            return Ok(());
        }
        self.call("putting", &key, || self.backend.put(&key, data.clone())).await?;
        info!(%key, kind = T::KIND, "object written");
        self.invalidator.invalidate(&[key]).await
    }

    pub async fn delete<T: ApiObject>(&self, req: &T) -> Result<(), ApiError> {
        req.validate_request()?;
        let key = self.key_for(req);
        if self.dry_run {
            debug!(%key, "dry run, skipping delete");
            return Ok(());
        }
        self.call("deleting", &key, || self.backend.delete(&key)).await?;
        info!(%key, kind = T::KIND, "object deleted");
        self.invalidator.invalidate(&[key]).await
    }

    /// Deletes every object under `path` and invalidates `path/*`. Returns the number of objects.
    pub async fn delete_path(&self, path: &str) -> Result<usize, ApiError> {
        let path = path.trim_end_matches('/');
        let keys = self.list_keys(&format!("{path}/")).await?;
        if keys.is_empty() {
            debug!(%path, "nothing to delete");
            return Ok(0);
        }
        if self.dry_run {
            debug!(%path, ?keys, "dry run, skipping recursive delete");
            return Ok(keys.len());
        }
        self.call("deleting objects under", path, || self.backend.delete_many(&keys)).await?;
        info!(%path, count = keys.len(), "objects deleted");
        self.invalidator.invalidate(&[format!("{path}/*")]).await?;
        Ok(keys.len())
    }

    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, ApiError> {
        self.call("listing", prefix, || self.backend.list(prefix)).await
    }

    /// Flushes pending invalidations and waits for them.
    pub async fn close(&self) -> Result<(), ApiError> { self.invalidator.flush().await }

    /// Runs a backend call under the operation timeout, retrying transient failures.
    async fn call<T, F, Fut>(&self, op: &'static str, key: &str, mut f: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.op_timeout;
        retry_async(&self.retry, |e: &BackendError| !matches!(e, BackendError::NotFound(_)), |_| {
            let fut = f();
            async move { tokio::time::timeout(timeout, fut).await.unwrap_or(Err(BackendError::Timeout(timeout))) }
        })
        .await
        .map_err(|e| ApiError::backend(op, key, e))
    }
}
