//! Core of the attestation config API: version records, consensus over
//! observed versions, signed publication and CDN cache invalidation.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod backend;
pub mod config;
pub mod consensus;
pub mod error;
pub mod fetcher;
pub mod invalidator;
pub mod metrics;
pub mod objects;
pub mod observation;
pub mod publisher;
pub mod signing;
pub mod store;
pub mod variant;
pub mod version;

pub use backend::{CdnBackend, HttpSource, MemoryCdn, MemoryStorage, ObjectSource, SledStorage, StorageBackend, StorageSource};
pub use config::{ApiConfig, ConfigError, InvalidationStrategy, SigningConfig};
pub use consensus::{find_min_version, ConsensusEngine, ConsensusOutcome};
pub use error::{ApiError, BackendError, PublishStep, SigningError, VerificationError};
pub use fetcher::VerifyingFetcher;
pub use invalidator::CacheInvalidator;
pub use metrics::{ApiMetrics, API_METRICS};
pub use objects::{ApiObject, SignatureObject, VersionList, VersionObject};
pub use observation::{Observation, ObservationCache};
pub use publisher::SignedPublisher;
pub use signing::{Ed25519Signer, Ed25519Verifier, Signer, Verifier};
pub use store::VersionedObjectStore;
pub use variant::{Variant, VariantFamily, VersionDate};
pub use version::{compare, SnpVersion, TcbVersion, TdxVersion, VersionRecord};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global fmt subscriber. `ATTCFG_JSON_LOG=1` switches to JSON lines;
/// `RUST_LOG` filters (default `info`).
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let json = std::env::var("ATTCFG_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr);
        let res = if json {
            builder.json().flatten_event(true).with_current_span(true).with_span_list(false).try_init()
        } else {
            builder.with_target(true).with_line_number(true).try_init()
        };
        res.map_err(|e| anyhow!("installing tracing subscriber: {e}"))
    })?;
    info!(target: "attcfg", service, "tracing initialized");
    Ok(())
}
