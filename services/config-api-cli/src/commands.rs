//! Upload and delete commands against the configured bucket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use attcfg_core::config::public_key_from_env;
use attcfg_core::objects::variant_dir;
use attcfg_core::{
    ApiConfig, CacheInvalidator, ConsensusEngine, ConsensusOutcome, Ed25519Signer, Ed25519Verifier, HttpSource, MemoryCdn, ObjectSource,
    ObservationCache, SignedPublisher, SigningConfig, SledStorage, StorageBackend, StorageSource, Variant, Verifier, VerifyingFetcher,
    VersionDate, VersionRecord, VersionedObjectStore,
};

use crate::report::parse_report;

/// Everything a command needs, wired from configuration.
pub struct Api {
    cfg: ApiConfig,
    store: Arc<VersionedObjectStore>,
    publisher: Arc<SignedPublisher>,
    fetcher: VerifyingFetcher,
}

impl Api {
    pub fn connect(cfg: ApiConfig, verify_from_cdn: bool) -> Result<Self> {
        let signing = SigningConfig::from_env().context("write commands need signing credentials")?;
        let signer = Ed25519Signer::from_pkcs8_pem(&signing.private_key_pem, &signing.passphrase).context("loading signing key")?;
        let verifier: Arc<dyn Verifier> = match public_key_from_env() {
            Some(pem) => Arc::new(Ed25519Verifier::from_public_key_pem(&pem).context("loading ATTCFG_PUBLIC_KEY")?),
            None => Arc::new(signer.verifier()),
        };

        let backend: Arc<dyn StorageBackend> = Arc::new(SledStorage::open(&cfg.storage_path).context("opening bucket")?);
        // CDN SDK bindings are not part of this binary; invalidations are tracked locally.
        let invalidator = Arc::new(CacheInvalidator::new(Arc::new(MemoryCdn::new()), cfg.distribution_id.clone(), &cfg.invalidation));
        let store = Arc::new(VersionedObjectStore::from_config(backend.clone(), invalidator, &cfg));

        let source: Arc<dyn ObjectSource> = if verify_from_cdn {
            Arc::new(HttpSource::new(cfg.cdn_url.clone(), Duration::from_secs(cfg.op_timeout_secs)).context("building CDN client")?)
        } else {
            Arc::new(StorageSource(backend))
        };
        let fetcher = VerifyingFetcher::new(source, verifier, cfg.api_prefix.clone());
        let publisher = Arc::new(SignedPublisher::new(store.clone(), Arc::new(signer)));
        info!(region = %cfg.region, bucket = %cfg.bucket, dry_run = cfg.dry_run, "attestation config API client ready");
        Ok(Self { cfg, store, publisher, fetcher })
    }

    pub async fn upload(&self, variant: Variant, report: &Path, force: bool, window: Option<usize>, date: Option<VersionDate>) -> Result<ConsensusOutcome> {
        let data = tokio::fs::read(report).await.with_context(|| format!("reading report {}", report.display()))?;
        let record = parse_report(variant, &data)?;
        info!(%variant, %record, "input report");

        let latest = self.latest(variant).await?;
        let window = window.unwrap_or(self.cfg.cache_window_size);
        let engine = ConsensusEngine::new(ObservationCache::new(self.store.clone()), self.publisher.clone(), window)?;
        let date = date.unwrap_or_else(VersionDate::now);
        let outcome = engine.run(variant, date, record, latest, force).await.context("updating latest version")?;
        match &outcome {
            ConsensusOutcome::Published { record, date } => info!(%variant, %record, %date, "uploaded new latest version"),
            ConsensusOutcome::NoNewerVersion { candidate, latest } => info!(%variant, %candidate, %latest, "input is not newer than the latest API version"),
            ConsensusOutcome::InsufficientObservations { found, required } => info!(%variant, found, required, "cached the report, waiting for more observations"),
        }
        Ok(outcome)
    }

    async fn latest(&self, variant: Variant) -> Result<Option<VersionRecord>> {
        match self.fetcher.fetch_latest(variant).await {
            Ok(Some((date, record))) => {
                info!(%variant, %date, %record, "current latest version");
                Ok(Some(record))
            }
            Ok(None) => {
                info!(%variant, "no versions published yet, uploading the first version");
                Ok(None)
            }
            // a listed version without its object or signature is not a first upload
            Err(e) => Err(e).context("fetching latest version"),
        }
    }

    pub async fn delete(&self, variant: Variant, version: &str) -> Result<()> {
        self.publisher.delete_version(variant, version).await.with_context(|| format!("deleting {variant} version {version}"))
    }

    pub async fn delete_recursive(&self, variant: Variant) -> Result<usize> {
        let dir = variant_dir(self.store.prefix(), variant);
        let n = self.store.delete_path(&dir).await.with_context(|| format!("deleting everything under {dir}"))?;
        info!(%variant, count = n, "deleted variant tree");
        Ok(n)
    }

    /// Sends pending invalidations and waits for them.
    pub async fn close(&self) -> Result<()> { self.store.close().await.context("invalidating CDN cache") }
}
