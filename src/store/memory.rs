//! In-process chunk store.
//!
//! Documents live in a `BTreeMap` behind a single `RwLock`. A batch is staged
//! outside the map first and then applied under one write-lock acquisition,
//! so readers observe either the whole batch or none of it.
//!
//! Fault injection hooks (`fail_writes_after`, `set_unavailable`) exist so the
//! engine's failure paths can be exercised without a real backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::chunk::{Metadata, Record};
use crate::cache::key::CacheKey;
use crate::store::{
    decode_chunk, decode_metadata, encode_batch, sort_chunk_ids, surplus_chunk_ids, ChunkStore,
    StoreError,
};

enum Op {
    Put(String, Value),
    Delete(String),
}

#[derive(Debug)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Value>>,
    /// Staged operations allowed per batch before it fails; `usize::MAX` disables.
    write_budget: AtomicUsize,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            write_budget: AtomicUsize::new(usize::MAX),
            unavailable: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every following batch fail after staging `ops` operations.
    pub fn fail_writes_after(&self, ops: usize) {
        self.write_budget.store(ops, Ordering::SeqCst);
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of committed batches.
    pub fn committed_batches(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Ids of every stored document, sorted.
    pub async fn document_ids(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }

    /// Insert a raw document, bypassing the batch path.
    pub async fn put_raw(&self, id: impl Into<String>, body: Value) {
        self.docs.write().await.insert(id.into(), body);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("memory store unavailable".to_string()));
        }
        Ok(())
    }

    /// Stage operations, then apply them all to `docs`.
    ///
    /// The caller holds the write lock for the whole call.
    fn apply(&self, docs: &mut BTreeMap<String, Value>, ops: Vec<Op>) -> Result<(), StoreError> {
        let budget = self.write_budget.load(Ordering::SeqCst);
        let mut staged = Vec::with_capacity(ops.len());
        for op in ops {
            if staged.len() >= budget {
                return Err(StoreError::Backend(format!(
                    "injected failure after {budget} staged writes"
                )));
            }
            staged.push(op);
        }

        for op in staged {
            match op {
                Op::Put(id, body) => {
                    docs.insert(id, body);
                }
                Op::Delete(id) => {
                    docs.remove(&id);
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn chunk_ids_in(docs: &BTreeMap<String, Value>, key: &CacheKey) -> Vec<String> {
        let prefix = key.chunk_prefix();
        let mut ids: Vec<String> = docs
            .range(prefix.clone()..)
            .take_while(|(id, _)| id.starts_with(&prefix))
            .filter(|(id, _)| key.parse_chunk_index(id).is_some())
            .map(|(id, _)| id.clone())
            .collect();
        sort_chunk_ids(key, &mut ids);
        ids
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn read_metadata(&self, key: &CacheKey) -> Result<Option<Metadata>, StoreError> {
        self.check_available()?;
        let id = key.metadata_id();
        let body = self.docs.read().await.get(&id).cloned();
        body.map(|b| decode_metadata(&id, b)).transpose()
    }

    async fn read_chunk(
        &self,
        key: &CacheKey,
        index: u32,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        self.check_available()?;
        let id = key.chunk_id(index);
        let body = self.docs.read().await.get(&id).cloned();
        body.map(|b| decode_chunk(&id, b)).transpose()
    }

    async fn write_all(
        &self,
        key: &CacheKey,
        metadata: &Metadata,
        chunks: &[Vec<Record>],
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut ops: Vec<Op> = encode_batch(key, metadata, chunks)?
            .into_iter()
            .map(|(id, body)| Op::Put(id, body))
            .collect();

        let mut docs = self.docs.write().await;
        let surplus = surplus_chunk_ids(key, &Self::chunk_ids_in(&docs, key), chunks.len());
        ops.extend(surplus.iter().cloned().map(Op::Delete));

        self.apply(&mut docs, ops)?;
        debug!(key = %key, chunks = chunks.len(), surplus = surplus.len(), "Committed dataset");
        Ok(())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), StoreError> {
        self.check_available()?;
        let ops = ids.iter().cloned().map(Op::Delete).collect();
        let mut docs = self.docs.write().await;
        self.apply(&mut docs, ops)
    }

    async fn list_chunk_ids(&self, key: &CacheKey) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let docs = self.docs.read().await;
        Ok(Self::chunk_ids_in(&docs, key))
    }
}
