//! Prometheus metrics for the cache engine.
//!
//! Metrics are registered in a registry owned by [`CacheMetrics`] rather than
//! the global default one, so independent engines (and tests) never collide
//! on registration.

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Upstream fetch latency buckets (seconds).
const FETCH_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,

    /// Cache lookups - labels: category, outcome (hit/miss/stale)
    pub lookups_total: IntCounterVec,

    /// Upstream fetches - labels: category, status (ok/empty/error)
    pub upstream_fetches_total: IntCounterVec,

    /// Upstream fetch latency - labels: category
    pub upstream_fetch_seconds: HistogramVec,

    /// Chunks promised by metadata but absent on read - labels: category
    pub missing_chunks_total: IntCounterVec,

    /// Store failures - labels: operation (read/write)
    pub store_errors_total: IntCounterVec,

    /// Chunk documents removed by the maintenance sweep
    pub sweep_deleted_total: IntCounter,
}

impl CacheMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lookups_total = IntCounterVec::new(
            Opts::new("top100_cache_lookups_total", "Cache lookups by outcome"),
            &["category", "outcome"],
        )?;
        let upstream_fetches_total = IntCounterVec::new(
            Opts::new("top100_upstream_fetches_total", "Upstream fetches by status"),
            &["category", "status"],
        )?;
        let upstream_fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "top100_upstream_fetch_seconds",
                "Upstream fetch duration in seconds",
            )
            .buckets(FETCH_LATENCY_BUCKETS.to_vec()),
            &["category"],
        )?;
        let missing_chunks_total = IntCounterVec::new(
            Opts::new(
                "top100_missing_chunks_total",
                "Chunks listed in metadata but missing from the store",
            ),
            &["category"],
        )?;
        let store_errors_total = IntCounterVec::new(
            Opts::new("top100_store_errors_total", "Chunk store failures"),
            &["operation"],
        )?;
        let sweep_deleted_total = IntCounter::new(
            "top100_sweep_deleted_total",
            "Legacy chunk documents removed by the maintenance sweep",
        )?;

        registry.register(Box::new(lookups_total.clone()))?;
        registry.register(Box::new(upstream_fetches_total.clone()))?;
        registry.register(Box::new(upstream_fetch_seconds.clone()))?;
        registry.register(Box::new(missing_chunks_total.clone()))?;
        registry.register(Box::new(store_errors_total.clone()))?;
        registry.register(Box::new(sweep_deleted_total.clone()))?;

        Ok(Self {
            registry,
            lookups_total,
            upstream_fetches_total,
            upstream_fetch_seconds,
            missing_chunks_total,
            store_errors_total,
            sweep_deleted_total,
        })
    }

    pub fn record_lookup(&self, category: &str, outcome: &str) {
        self.lookups_total
            .with_label_values(&[category, outcome])
            .inc();
    }

    pub fn record_fetch(&self, category: &str, status: &str, duration_secs: f64) {
        self.upstream_fetches_total
            .with_label_values(&[category, status])
            .inc();
        self.upstream_fetch_seconds
            .with_label_values(&[category])
            .observe(duration_secs);
    }

    /// Number of upstream fetches recorded for `category`, any status.
    ///
    /// Reads collected samples only, so querying never creates a series.
    pub fn fetch_count(&self, category: &str) -> u64 {
        self.upstream_fetches_total
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .filter(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.name() == "category" && label.value() == category)
            })
            .map(|metric| metric.get_counter().value() as u64)
            .sum()
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
