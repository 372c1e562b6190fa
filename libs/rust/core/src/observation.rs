//! Per-date cache of versions reported by attestation, input to consensus.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics::{variant_attr, API_METRICS};
use crate::objects::{variant_dir, VersionObject, CACHED_VERSIONS_DIR};
use crate::store::VersionedObjectStore;
use crate::variant::{Variant, VersionDate};
use crate::version::VersionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub variant: Variant,
    pub date: VersionDate,
    pub record: VersionRecord,
}

impl From<VersionObject> for Observation {
    fn from(o: VersionObject) -> Self { Self { variant: o.variant, date: o.date, record: o.record } }
}

#[derive(Clone)]
pub struct ObservationCache {
    store: Arc<VersionedObjectStore>,
}

impl ObservationCache {
    pub fn new(store: Arc<VersionedObjectStore>) -> Self { Self { store } }

    fn cache_dir(&self, variant: Variant) -> String { format!("{}/{CACHED_VERSIONS_DIR}", variant_dir(self.store.prefix(), variant)) }

    /// Stores `record` as observed at `date`, replacing an earlier observation with the same date.
    pub async fn ingest(&self, variant: Variant, date: VersionDate, record: VersionRecord) -> Result<Observation, ApiError> {
        self.store.update(&VersionObject::cached(variant, date, record)).await?;
        API_METRICS.observations_total.add(1, &variant_attr(variant));
        info!(%variant, %date, %record, "observation cached");
        Ok(Observation { variant, date, record })
    }

    pub async fn list_dates(&self, variant: Variant) -> Result<BTreeSet<VersionDate>, ApiError> {
        let dir = self.cache_dir(variant);
        let keys = self.store.list_keys(&format!("{dir}/")).await?;
        let mut dates = BTreeSet::new();
        for key in keys {
            let Some(name) = key.strip_prefix(&dir).map(|n| n.trim_start_matches('/')) else { continue };
            if name.contains('/') || !name.ends_with(".json") { continue; }
            match VersionDate::from_file_name(name) {
                Ok(d) => { dates.insert(d); }
                Err(e) => warn!(%key, error = %e, "ignoring cached object with unexpected name"),
            }
        }
        Ok(dates)
    }

    pub async fn get(&self, variant: Variant, date: VersionDate) -> Result<Observation, ApiError> {
        self.store.fetch(&VersionObject::request(variant, date, true)).await.map(Observation::from)
    }

    /// Removes every cached observation of `variant`.
    pub async fn delete_all(&self, variant: Variant) -> Result<usize, ApiError> {
        let n = self.store.delete_path(&self.cache_dir(variant)).await?;
        info!(%variant, count = n, "observation cache cleared");
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryCdn, MemoryStorage};
    use crate::config::InvalidationConfig;
    use crate::invalidator::CacheInvalidator;
    use crate::version::{SnpVersion, TdxVersion};

    fn cache(storage: &MemoryStorage) -> ObservationCache {
        let inv = Arc::new(CacheInvalidator::new(Arc::new(MemoryCdn::new()), "dist", &InvalidationConfig::default()));
        ObservationCache::new(Arc::new(VersionedObjectStore::new(Arc::new(storage.clone()), inv, "p")))
    }

    fn d(s: &str) -> VersionDate { VersionDate::parse(s).unwrap() }

    #[tokio::test]
    async fn ingest_list_get() {
        let storage = MemoryStorage::new();
        let c = cache(&storage);
        let rec: VersionRecord = SnpVersion { bootloader: 1, tee: 0, snp: 1, microcode: 1 }.into();
        c.ingest(Variant::GcpSevSnp, d("2021-01-01"), rec).await.unwrap();
        c.ingest(Variant::GcpSevSnp, d("2019-01-01"), rec).await.unwrap();
        c.ingest(Variant::GcpSevSnp, d("2019-01-01"), rec).await.unwrap();
        storage.insert_raw("p/gcp-sev-snp/cached-versions/readme.txt", "x");
        storage.insert_raw("p/gcp-sev-snp/2020-01-01-00-00.json", "{}");

        let dates: Vec<_> = c.list_dates(Variant::GcpSevSnp).await.unwrap().into_iter().collect();
        assert_eq!(dates, vec![d("2019-01-01"), d("2021-01-01")]);
        assert_eq!(c.get(Variant::GcpSevSnp, d("2021-01-01")).await.unwrap().record, rec);
        assert!(c.get(Variant::GcpSevSnp, d("2022-01-01")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn wrong_family_rejected_before_write() {
        let storage = MemoryStorage::new();
        let c = cache(&storage);
        let err = c.ingest(Variant::AwsSevSnp, d("2021-01-01"), TdxVersion::default().into()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn delete_all_clears_only_cache() {
        let storage = MemoryStorage::new();
        let c = cache(&storage);
        c.ingest(Variant::AzureSevSnp, d("2021-01-01"), SnpVersion::default().into()).await.unwrap();
        storage.insert_raw("p/azure-sev-snp/list", "[]");
        assert_eq!(c.delete_all(Variant::AzureSevSnp).await.unwrap(), 1);
        assert!(c.list_dates(Variant::AzureSevSnp).await.unwrap().is_empty());
        assert!(storage.contains("p/azure-sev-snp/list"));
    }
}
