//! Metric instruments for ingestion, publication and CDN invalidation.
//!
//! Instruments come from the global meter; they record nothing unless the
//! host process installs a meter provider.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::variant::Variant;

pub struct ApiMetrics {
    pub observations_total: Counter<u64>,
    pub publishes_total: Counter<u64>,
    pub consensus_skipped_total: Counter<u64>,
    pub invalidations_total: Counter<u64>,
    pub invalidation_failures_total: Counter<u64>,
    pub invalidation_wait_ms: Histogram<f64>,
}

static API_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("attcfg_api"));

pub static API_METRICS: Lazy<ApiMetrics> = Lazy::new(|| ApiMetrics {
    observations_total: API_METER.u64_counter("attcfg_observations_total").with_description("Observed versions written to the cache").build(),
    publishes_total: API_METER.u64_counter("attcfg_publishes_total").with_description("Versions published as latest").build(),
    consensus_skipped_total: API_METER.u64_counter("attcfg_consensus_skipped_total").with_description("Consensus runs that did not publish").build(),
    invalidations_total: API_METER.u64_counter("attcfg_invalidations_total").with_description("CDN invalidation requests issued").build(),
    invalidation_failures_total: API_METER.u64_counter("attcfg_invalidation_failures_total").with_description("CDN invalidation requests or waits that failed").build(),
    invalidation_wait_ms: API_METER.f64_histogram("attcfg_invalidation_wait_ms").with_description("Time spent waiting for invalidations ms").with_unit("ms").build(),
});

pub(crate) fn variant_attr(variant: Variant) -> [KeyValue; 1] { [KeyValue::new("variant", variant.as_str())] }
