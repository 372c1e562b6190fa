//! Windowed-minimum consensus over observed versions.
//!
//! Every upload is cached first. Once at least `window` observations exist,
//! the minimum of the `window` most recent ones becomes the publication
//! candidate; it is published only if it is newer than the current latest.
//! A single outlier report therefore cannot move the published threshold.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics::{variant_attr, API_METRICS};
use crate::observation::{Observation, ObservationCache};
use crate::publisher::SignedPublisher;
use crate::variant::{Variant, VersionDate};
use crate::version::VersionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusOutcome {
    /// `record` was published as latest under `date`.
    Published { record: VersionRecord, date: VersionDate },
    /// The window minimum does not replace the current latest.
    NoNewerVersion { candidate: VersionRecord, latest: VersionRecord },
    /// Not enough observations cached yet.
    InsufficientObservations { found: usize, required: usize },
}

impl ConsensusOutcome {
    pub fn is_published(&self) -> bool { matches!(self, ConsensusOutcome::Published { .. }) }
}

/// Minimum of `window`, which must be ordered by ascending date.
///
/// The running minimum is replaced only by a strictly older record, so ties
/// and incomparable records keep the earliest date.
pub fn find_min_version(window: &[Observation]) -> Option<Observation> {
    let (first, rest) = window.split_first()?;
    let mut min = *first;
    for o in rest {
        if min.record.is_newer_than(&o.record) { min = *o; }
    }
    Some(min)
}

pub struct ConsensusEngine {
    cache: ObservationCache,
    publisher: Arc<SignedPublisher>,
    window: usize,
}

impl ConsensusEngine {
    pub fn new(cache: ObservationCache, publisher: Arc<SignedPublisher>, window: usize) -> Result<Self, ApiError> {
        if window == 0 {
            return Err(ApiError::validation("cache window size", "must be at least 1"));
        }
        Ok(Self { cache, publisher, window })
    }

    pub fn window(&self) -> usize { self.window }

    /// Caches the observation, then decides whether to advance the published latest.
    ///
    /// `latest` is the currently published record; `None` means nothing was
    /// published yet. `force` publishes `record` without any comparison.
    pub async fn run(
        &self,
        variant: Variant,
        date: VersionDate,
        record: VersionRecord,
        latest: Option<VersionRecord>,
        force: bool,
    ) -> Result<ConsensusOutcome, ApiError> {
        if record.family() != variant.family() {
            return Err(ApiError::validation("observation", format!("{} record reported for {variant}", record.family())));
        }
        let latest = latest.unwrap_or_else(|| VersionRecord::zero(variant.family()));
        if latest.family() != variant.family() {
            return Err(ApiError::validation("latest version", format!("{} record published for {variant}", latest.family())));
        }

        self.cache.ingest(variant, date, record).await?;

        if force {
            warn!(%variant, %date, %record, "force flag set, publishing without comparison");
            self.publisher.publish_latest(variant, record, date).await?;
            return Ok(ConsensusOutcome::Published { record, date });
        }

        let outcome = match self.window_minimum(variant).await? {
            Err(found) => ConsensusOutcome::InsufficientObservations { found, required: self.window },
            Ok(min) if !min.record.is_newer_than(&latest) => ConsensusOutcome::NoNewerVersion { candidate: min.record, latest },
            Ok(min) => {
                self.publisher.publish_latest(variant, min.record, min.date).await?;
                ConsensusOutcome::Published { record: min.record, date: min.date }
            }
        };
        match &outcome {
            ConsensusOutcome::Published { record, date } => info!(%variant, %date, %record, "consensus advanced latest version"),
            ConsensusOutcome::NoNewerVersion { candidate, latest } => {
                API_METRICS.consensus_skipped_total.add(1, &variant_attr(variant));
                info!(%variant, %candidate, %latest, "window minimum is not newer than latest, skipping publish");
            }
            ConsensusOutcome::InsufficientObservations { found, required } => {
                API_METRICS.consensus_skipped_total.add(1, &variant_attr(variant));
                info!(%variant, found, required, "not enough cached observations, skipping publish");
            }
        }
        Ok(outcome)
    }

    /// Minimum of the most recent `window` observations, or the number found if too few.
    async fn window_minimum(&self, variant: Variant) -> Result<Result<Observation, usize>, ApiError> {
        let dates = self.cache.list_dates(variant).await?;
        if dates.len() < self.window { return Ok(Err(dates.len())); }

        let mut recent: Vec<VersionDate> = dates.into_iter().rev().take(self.window).collect();
        recent.reverse();
        let mut window = Vec::with_capacity(recent.len());
        for date in recent {
            window.push(self.cache.get(variant, date).await?);
        }
        Ok(find_min_version(&window).ok_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryCdn, MemoryStorage};
    use crate::config::InvalidationConfig;
    use crate::invalidator::CacheInvalidator;
    use crate::signing::Ed25519Signer;
    use crate::store::VersionedObjectStore;
    use crate::version::SnpVersion;

    fn engine(window: usize) -> (MemoryStorage, ConsensusEngine, Arc<SignedPublisher>) {
        let storage = MemoryStorage::new();
        let inv = Arc::new(CacheInvalidator::new(Arc::new(MemoryCdn::new()), "dist", &InvalidationConfig::default()));
        let store = Arc::new(VersionedObjectStore::new(Arc::new(storage.clone()), inv, "p"));
        let publisher = Arc::new(SignedPublisher::new(store.clone(), Arc::new(Ed25519Signer::generate())));
        let engine = ConsensusEngine::new(ObservationCache::new(store), publisher.clone(), window).unwrap();
        (storage, engine, publisher)
    }

    fn snp(bootloader: u8, tee: u8, snp: u8, microcode: u8) -> VersionRecord { SnpVersion { bootloader, tee, snp, microcode }.into() }

    fn d(s: &str) -> VersionDate { VersionDate::parse(s).unwrap() }

    fn obs(date: &str, record: VersionRecord) -> Observation { Observation { variant: Variant::AzureSevSnp, date: d(date), record } }

    #[test]
    fn minimum_keeps_earliest_on_tie() {
        let window = [obs("2019-01-01", snp(1, 0, 1, 1)), obs("2021-01-01", snp(1, 0, 1, 1)), obs("2023-06-11", snp(93, 0, 6, 2))];
        let min = find_min_version(&window).unwrap();
        assert_eq!(min.date, d("2019-01-01"));
        assert_eq!(min.record, snp(1, 0, 1, 1));
        assert!(find_min_version(&[]).is_none());
    }

    #[test]
    fn minimum_replaced_by_strictly_older() {
        let window = [obs("2021-01-01", snp(3, 0, 8, 115)), obs("2022-01-01", snp(2, 0, 8, 115)), obs("2023-01-01", snp(3, 0, 8, 115))];
        assert_eq!(find_min_version(&window).unwrap().date, d("2022-01-01"));
    }

    #[test]
    fn zero_window_rejected() {
        let storage = MemoryStorage::new();
        let inv = Arc::new(CacheInvalidator::new(Arc::new(MemoryCdn::new()), "dist", &InvalidationConfig::default()));
        let store = Arc::new(VersionedObjectStore::new(Arc::new(storage), inv, "p"));
        let publisher = Arc::new(SignedPublisher::new(store.clone(), Arc::new(Ed25519Signer::generate())));
        assert!(ConsensusEngine::new(ObservationCache::new(store), publisher, 0).is_err());
    }

    #[tokio::test]
    async fn window_gates_publication() {
        let (_, engine, publisher) = engine(3);
        let rec = snp(2, 0, 6, 93);
        let first = engine.run(Variant::AzureSevSnp, d("2023-01-01"), rec, None, false).await.unwrap();
        assert_eq!(first, ConsensusOutcome::InsufficientObservations { found: 1, required: 3 });
        let second = engine.run(Variant::AzureSevSnp, d("2023-01-02"), rec, None, false).await.unwrap();
        assert_eq!(second, ConsensusOutcome::InsufficientObservations { found: 2, required: 3 });
        let third = engine.run(Variant::AzureSevSnp, d("2023-01-03"), rec, None, false).await.unwrap();
        assert_eq!(third, ConsensusOutcome::Published { record: rec, date: d("2023-01-01") });
        assert_eq!(publisher.list(Variant::AzureSevSnp).await.unwrap().versions, vec!["2023-01-01-00-00.json"]);
    }

    #[tokio::test]
    async fn scenario_publishes_oldest_minimum() {
        let (storage, engine, _) = engine(3);
        engine.run(Variant::AzureSevSnp, d("2019-01-01"), snp(1, 0, 1, 1), None, false).await.unwrap();
        engine.run(Variant::AzureSevSnp, d("2021-01-01"), snp(1, 0, 1, 1), None, false).await.unwrap();
        let out = engine.run(Variant::AzureSevSnp, d("2023-06-11"), snp(93, 0, 6, 2), None, false).await.unwrap();
        assert_eq!(out, ConsensusOutcome::Published { record: snp(1, 0, 1, 1), date: d("2019-01-01") });
        assert!(storage.contains("p/azure-sev-snp/2019-01-01-00-00.json"));
        assert!(storage.contains("p/azure-sev-snp/2019-01-01-00-00.json.sig"));
    }

    #[tokio::test]
    async fn equal_minimum_is_not_newer() {
        let (_, engine, _) = engine(1);
        let rec = snp(2, 0, 6, 93);
        let out = engine.run(Variant::AwsSevSnp, d("2023-01-01"), rec, Some(rec), false).await.unwrap();
        assert_eq!(out, ConsensusOutcome::NoNewerVersion { candidate: rec, latest: rec });
    }

    #[tokio::test]
    async fn force_publishes_older_record() {
        let (_, engine, publisher) = engine(3);
        let older = snp(1, 0, 1, 1);
        let out = engine.run(Variant::GcpSevSnp, d("2023-01-01"), older, Some(snp(2, 0, 6, 93)), true).await.unwrap();
        assert_eq!(out, ConsensusOutcome::Published { record: older, date: d("2023-01-01") });
        assert_eq!(publisher.list(Variant::GcpSevSnp).await.unwrap().versions.len(), 1);
    }

    #[tokio::test]
    async fn wrong_family_rejected_before_ingest() {
        let (storage, engine, _) = engine(1);
        let err = engine.run(Variant::AzureTdx, d("2023-01-01"), snp(1, 0, 1, 1), None, false).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
        assert!(storage.keys().is_empty());
    }
}
