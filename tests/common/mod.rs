//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use top100_cache::cache::clock::ManualClock;
use top100_cache::cache::CacheEngine;
use top100_cache::config::{CacheConfig, ProviderConfig};
use top100_cache::metrics::CacheMetrics;
use top100_cache::provider::catalog::builtin_registry;
use top100_cache::provider::{FetchError, ProviderRequest, UpstreamFetcher};
use top100_cache::store::MemoryStore;

/// Four hours, in milliseconds.
pub const TTL_MS: i64 = 4 * 60 * 60 * 1000;

/// Fixed starting point for the manual clock.
pub const T0: i64 = 1_700_000_000_000;

/// Upstream stand-in that answers every request with the same scripted
/// response and counts the calls it receives.
pub struct FakeUpstream {
    response: Mutex<Result<Value, FetchError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FakeUpstream {
    pub fn returning(body: Value) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(body)),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(err: FetchError) -> Arc<Self> {
        let fake = Self::returning(Value::Null);
        fake.fail_with(err);
        fake
    }

    pub fn respond_with(&self, body: Value) {
        *self.response.lock().unwrap() = Ok(body);
    }

    pub fn fail_with(&self, err: FetchError) {
        *self.response.lock().unwrap() = Err(err);
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl UpstreamFetcher for FakeUpstream {
    async fn fetch(&self, request: &ProviderRequest) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().unwrap().clone()
    }
}

/// `n` distinct records shaped like a typical upstream row.
pub fn records(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "rank": i + 1, "name": format!("item-{i}") }))
        .collect()
}

pub struct Harness {
    pub engine: Arc<CacheEngine>,
    pub store: Arc<MemoryStore>,
    pub upstream: Arc<FakeUpstream>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(upstream: Arc<FakeUpstream>) -> Harness {
    harness_with(upstream, CacheConfig::default())
}

pub fn harness_with(upstream: Arc<FakeUpstream>, config: CacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let registry = Arc::new(builtin_registry(&ProviderConfig::default()).unwrap());
    let engine = CacheEngine::new(
        registry,
        store.clone(),
        upstream.clone(),
        CacheMetrics::new().unwrap(),
        &config,
    )
    .with_clock(clock.clone());

    Harness {
        engine: Arc::new(engine),
        store,
        upstream,
        clock,
    }
}
