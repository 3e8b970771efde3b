//! Cache-aside engine: the single read path for every category.
//!
//! For each `get` the engine:
//! 1. Resolves the category's adapter (unknown categories fail before any I/O)
//! 2. Normalizes the qualifier and derives the cache key
//! 3. Reads the metadata record; if fresh, reassembles chunks `0..chunk_count`
//! 4. Otherwise fetches upstream, normalizes, chunks and writes the whole
//!    dataset in one atomic batch, then returns the fresh records
//!
//! Upstream and store failures propagate to the caller. The engine never
//! serves stale data when a refresh fails, and never retries internally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::chunk::{reassemble, split, Metadata, Record};
use crate::cache::clock::{Clock, SystemClock};
use crate::cache::key::{build_key, CacheKey, Qualifier, QualifierKind};
use crate::cache::sweep::{run_sweep, SweepReport};
use crate::config::CacheConfig;
use crate::metrics::CacheMetrics;
use crate::provider::{FetchError, ProviderAdapter, ProviderRegistry, UpstreamFetcher};
use crate::store::{ChunkStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    #[error("upstream fetch for {category} failed: {source}")]
    UpstreamFetchFailed { category: String, source: FetchError },

    #[error("chunk store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Vec<Record>, CacheError>>>;

/// Everything a refill needs, cheap to clone into a detached future.
#[derive(Clone)]
struct Refresher {
    store: Arc<dyn ChunkStore>,
    fetcher: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
    max_chunk_size: usize,
}

impl Refresher {
    async fn refresh(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        key: CacheKey,
        qualifier: Qualifier,
        deadline: Duration,
    ) -> Result<Vec<Record>, CacheError> {
        let category = adapter.category().to_string();
        let request = adapter.build_request(&qualifier);
        info!(category = %category, key = %key, "Fetching fresh data from upstream");

        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, self.fetcher.fetch(&request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(deadline)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let raw = match outcome {
            Ok(raw) => raw,
            // Undecodable 2xx bodies are cached as an empty result.
            Err(FetchError::InvalidBody(reason)) => {
                warn!(
                    category = %category,
                    key = %key,
                    reason = %reason,
                    "Upstream body is not JSON, caching empty result"
                );
                serde_json::Value::Null
            }
            Err(source) => {
                self.metrics.record_fetch(&category, "error", elapsed);
                warn!(category = %category, key = %key, error = %source, "Upstream fetch failed");
                return Err(CacheError::UpstreamFetchFailed { category, source });
            }
        };

        let records = adapter.normalize(raw);
        let status = if records.is_empty() { "empty" } else { "ok" };
        self.metrics.record_fetch(&category, status, elapsed);

        let set = split(
            &records,
            self.max_chunk_size,
            adapter.chunking_mode(),
            self.clock.now_millis(),
        );
        if let Err(e) = self.store.write_all(&key, &set.metadata, &set.chunks).await {
            self.metrics
                .store_errors_total
                .with_label_values(&["write"])
                .inc();
            warn!(key = %key, error = %e, "Failed to store fresh data");
            return Err(e.into());
        }

        info!(
            category = %category,
            key = %key,
            items = set.metadata.total_items,
            chunks = set.metadata.chunk_count,
            "Stored fresh data"
        );
        Ok(records)
    }
}

/// The cache-aside engine. Cheap to share behind an `Arc`.
pub struct CacheEngine {
    registry: Arc<ProviderRegistry>,
    refresher: Refresher,
    ttl_ms: i64,
    upstream_timeout: Duration,
    single_flight: bool,
    inflight: Arc<Mutex<HashMap<CacheKey, SharedRefresh>>>,
}

impl CacheEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ChunkStore>,
        fetcher: Arc<dyn UpstreamFetcher>,
        metrics: CacheMetrics,
        config: &CacheConfig,
    ) -> Self {
        Self {
            registry,
            refresher: Refresher {
                store,
                fetcher,
                clock: Arc::new(SystemClock),
                metrics,
                max_chunk_size: config.max_chunk_size.max(1),
            },
            ttl_ms: config.ttl_millis(),
            upstream_timeout: Duration::from_secs(config.upstream_timeout_secs),
            single_flight: config.single_flight,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the wall clock, e.g. with a [`crate::cache::clock::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.refresher.clock = clock;
        self
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.refresher.metrics
    }

    pub fn categories(&self) -> Vec<String> {
        self.registry.categories()
    }

    /// How `category` interprets its qualifier.
    pub fn qualifier_kind(&self, category: &str) -> Result<QualifierKind, CacheError> {
        self.adapter(category).map(|a| a.qualifier_kind())
    }

    /// Front-end entry point; same as [`CacheEngine::get`].
    pub async fn fetch_category(
        &self,
        category: &str,
        qualifier: Option<&str>,
    ) -> Result<Vec<Record>, CacheError> {
        self.get(category, qualifier).await
    }

    /// Return the records for `(category, qualifier)`, from cache when fresh.
    pub async fn get(
        &self,
        category: &str,
        qualifier: Option<&str>,
    ) -> Result<Vec<Record>, CacheError> {
        self.get_with_deadline(category, qualifier, self.upstream_timeout)
            .await
    }

    /// Like [`CacheEngine::get`], bounding the upstream fetch by `deadline`.
    ///
    /// When the deadline passes the fetch is abandoned and nothing is written.
    pub async fn get_with_deadline(
        &self,
        category: &str,
        qualifier: Option<&str>,
        deadline: Duration,
    ) -> Result<Vec<Record>, CacheError> {
        let adapter = self.adapter(category)?;
        let qualifier = Qualifier::normalize(&adapter.qualifier_kind(), qualifier);
        let key = build_key(category, &qualifier);

        let metrics = &self.refresher.metrics;
        let metadata = self
            .refresher
            .store
            .read_metadata(&key)
            .await
            .map_err(|e| self.read_failure(&key, e))?;
        let now = self.refresher.clock.now_millis();

        match metadata {
            Some(meta) if !meta.is_consistent() => {
                metrics.record_lookup(category, "stale");
                warn!(
                    category,
                    key = %key,
                    chunk_count = meta.chunk_count,
                    total_items = meta.total_items,
                    "Metadata inconsistent, refreshing"
                );
            }
            Some(meta) if meta.is_fresh(now, self.ttl_ms) => {
                metrics.record_lookup(category, "hit");
                info!(
                    category,
                    key = %key,
                    age_minutes = meta.age_minutes(now),
                    "Serving cached data"
                );
                return self.reassemble(category, &key, &meta).await;
            }
            Some(meta) => {
                metrics.record_lookup(category, "stale");
                info!(
                    category,
                    key = %key,
                    age_minutes = meta.age_minutes(now),
                    "Cache expired"
                );
            }
            None => {
                metrics.record_lookup(category, "miss");
                info!(category, key = %key, "No cache found");
            }
        }

        if self.single_flight {
            self.refresh_shared(adapter, key, qualifier, deadline).await
        } else {
            self.refresher
                .refresh(adapter, key, qualifier, deadline)
                .await
        }
    }

    /// Run the legacy chunk sweep against this engine's store.
    pub async fn run_maintenance(&self, legacy_keys: &[String]) -> Result<SweepReport, CacheError> {
        let report = run_sweep(self.refresher.store.as_ref(), legacy_keys).await?;
        self.refresher
            .metrics
            .sweep_deleted_total
            .inc_by(report.deleted as u64);
        Ok(report)
    }

    fn adapter(&self, category: &str) -> Result<Arc<dyn ProviderAdapter>, CacheError> {
        self.registry
            .get(category)
            .ok_or_else(|| CacheError::UnknownCategory(category.to_string()))
    }

    fn read_failure(&self, key: &CacheKey, err: StoreError) -> CacheError {
        self.refresher
            .metrics
            .store_errors_total
            .with_label_values(&["read"])
            .inc();
        warn!(key = %key, error = %err, "Chunk store read failed");
        CacheError::StoreUnavailable(err)
    }

    /// Read chunks `0..chunk_count` in order and concatenate them.
    ///
    /// A chunk the metadata promises but the store lacks is skipped with a
    /// warning; the remaining chunks are still served.
    async fn reassemble(
        &self,
        category: &str,
        key: &CacheKey,
        meta: &Metadata,
    ) -> Result<Vec<Record>, CacheError> {
        let mut chunks = Vec::new();
        for index in 0..meta.chunk_count {
            let chunk = self
                .refresher
                .store
                .read_chunk(key, index)
                .await
                .map_err(|e| self.read_failure(key, e))?;
            chunks.push((index, chunk));
        }

        let (records, missing) = reassemble(chunks);
        if !missing.is_empty() {
            self.refresher
                .metrics
                .missing_chunks_total
                .with_label_values(&[category])
                .inc_by(missing.len() as u64);
            warn!(
                key = %key,
                missing = ?missing,
                chunk_count = meta.chunk_count,
                "Chunk store inconsistent: skipping missing chunks"
            );
        }
        if records.len() as u64 != meta.total_items {
            debug!(
                key = %key,
                expected = meta.total_items,
                actual = records.len(),
                "Reassembled item count differs from metadata"
            );
        }

        info!(key = %key, items = records.len(), "Retrieved items from cache");
        Ok(records)
    }

    /// Join an in-flight refresh of `key`, or start one others can join.
    ///
    /// The refresh runs on its own task, so it completes (and is written)
    /// even if every waiting caller goes away. Each caller waits at most its
    /// own `deadline`; the task itself is bounded by the deadline of the
    /// caller that started it.
    async fn refresh_shared(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        key: CacheKey,
        qualifier: Qualifier,
        deadline: Duration,
    ) -> Result<Vec<Record>, CacheError> {
        let category = adapter.category().to_string();
        let shared = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(existing) => {
                    debug!(key = %key, "Joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let refresher = self.refresher.clone();
                    let registry = Arc::clone(&self.inflight);
                    let owned_key = key.clone();
                    let task = tokio::spawn(async move {
                        let result = refresher
                            .refresh(adapter, owned_key.clone(), qualifier, deadline)
                            .await;
                        registry.lock().await.remove(&owned_key);
                        result
                    });
                    let task_category = category.clone();
                    let refresh = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(CacheError::UpstreamFetchFailed {
                                category: task_category,
                                source: FetchError::Network(format!("refresh task failed: {e}")),
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, refresh.clone());
                    refresh
                }
            }
        };

        match tokio::time::timeout(deadline, shared).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::UpstreamFetchFailed {
                category,
                source: FetchError::Timeout(deadline),
            }),
        }
    }
}
