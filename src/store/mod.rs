//! Chunk store: persistence over a document-oriented key/value store.
//!
//! - [`memory`]: in-process map, used for tests and ephemeral deployments
//! - [`sqlite`]: JSON documents in a SQLite table, one row per document
//!
//! Every key owns one metadata document and `chunk_count` chunk documents
//! (see [`crate::cache::key`] for the id scheme). [`ChunkStore::write_all`]
//! is the only way to publish a dataset and must be atomic: a reader must
//! never see a `chunk_count` that promises a chunk not yet written.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::chunk::{Metadata, Record};
use crate::cache::key::CacheKey;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Body of a chunk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub items: Vec<Record>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Read the metadata document for `key`.
    async fn read_metadata(&self, key: &CacheKey) -> Result<Option<Metadata>, StoreError>;

    /// Read the records of chunk `index`.
    async fn read_chunk(
        &self,
        key: &CacheKey,
        index: u32,
    ) -> Result<Option<Vec<Record>>, StoreError>;

    /// Atomically replace the dataset stored under `key`.
    ///
    /// Writes the metadata and every chunk, and removes chunks with an index
    /// at or beyond `chunks.len()`, as one batch: either all of it becomes
    /// visible or none of it does.
    async fn write_all(
        &self,
        key: &CacheKey,
        metadata: &Metadata,
        chunks: &[Vec<Record>],
    ) -> Result<(), StoreError>;

    /// Atomically delete the given documents by id.
    async fn delete_documents(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Ids of every chunk document present for `key`, ordered by index.
    ///
    /// Includes ids with a non-canonical index such as `-chunk-01`; those
    /// never belong to a current dataset.
    async fn list_chunk_ids(&self, key: &CacheKey) -> Result<Vec<String>, StoreError>;

    /// Indices of every chunk document present for `key`, ascending.
    async fn list_chunk_indices(&self, key: &CacheKey) -> Result<Vec<u32>, StoreError> {
        let mut indices: Vec<u32> = self
            .list_chunk_ids(key)
            .await?
            .iter()
            .filter_map(|id| key.parse_chunk_index(id))
            .collect();
        indices.dedup();
        Ok(indices)
    }

    /// Atomically delete the given chunk documents. Metadata is untouched.
    async fn delete_chunks(&self, key: &CacheKey, indices: &[u32]) -> Result<(), StoreError> {
        let ids: Vec<String> = indices.iter().map(|&i| key.chunk_id(i)).collect();
        self.delete_documents(&ids).await
    }

    async fn delete_chunk(&self, key: &CacheKey, index: u32) -> Result<(), StoreError> {
        self.delete_chunks(key, &[index]).await
    }
}

/// Sort chunk document ids by their parsed index, then by id.
pub(crate) fn sort_chunk_ids(key: &CacheKey, ids: &mut [String]) {
    ids.sort_by(|a, b| {
        key.parse_chunk_index(a)
            .cmp(&key.parse_chunk_index(b))
            .then_with(|| a.cmp(b))
    });
}

/// Chunk ids that must go when `key` is rewritten with `chunk_count` chunks:
/// every index at or past the new count, and every non-canonical id.
pub(crate) fn surplus_chunk_ids(key: &CacheKey, ids: &[String], chunk_count: usize) -> Vec<String> {
    ids.iter()
        .filter(|id| match key.parse_chunk_index(id) {
            Some(index) => index as usize >= chunk_count || **id != key.chunk_id(index),
            None => false,
        })
        .cloned()
        .collect()
}

pub(crate) fn decode_metadata(id: &str, body: serde_json::Value) -> Result<Metadata, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn decode_chunk(id: &str, body: serde_json::Value) -> Result<Vec<Record>, StoreError> {
    serde_json::from_value::<ChunkDocument>(body)
        .map(|doc| doc.items)
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize a dataset into `(document id, body)` pairs, metadata last.
pub(crate) fn encode_batch(
    key: &CacheKey,
    metadata: &Metadata,
    chunks: &[Vec<Record>],
) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
    let mut docs = Vec::with_capacity(chunks.len() + 1);
    for (index, items) in chunks.iter().enumerate() {
        let body = serde_json::json!({ "items": items });
        docs.push((key.chunk_id(index as u32), body));
    }
    let meta = serde_json::to_value(metadata).map_err(|e| StoreError::Corrupt {
        id: key.metadata_id(),
        reason: e.to_string(),
    })?;
    docs.push((key.metadata_id(), meta));
    Ok(docs)
}
