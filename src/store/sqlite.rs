//! SQLite-backed chunk store.
//!
//! Each collection is one table of JSON documents keyed by document id, so
//! the persisted layout mirrors a document database:
//!
//! ```text
//! top100(id TEXT PRIMARY KEY, body TEXT)
//!   cars-2020-metadata  {"timestamp":..,"chunkCount":3,"totalItems":250}
//!   cars-2020-chunk-0   {"items":[...]}
//! ```
//!
//! Batches (`write_all`, `delete_documents`) run inside a single transaction.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::cache::chunk::{Metadata, Record};
use crate::cache::key::CacheKey;
use crate::store::{
    decode_chunk, decode_metadata, encode_batch, sort_chunk_ids, surplus_chunk_ids, ChunkStore,
    StoreError,
};

pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the collection table exists.
    ///
    /// `collection` must be a plain identifier; configuration validation
    /// guarantees this for values coming from the config file.
    pub async fn open(path: &Path, collection: &str) -> Result<Self, StoreError> {
        if !collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || collection.is_empty()
        {
            return Err(StoreError::Backend(format!(
                "invalid collection name {collection:?}"
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table: format!("\"{collection}\""),
        };
        store.ensure_schema().await?;

        info!(path = %path.display(), collection, "SQLite chunk store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id   TEXT PRIMARY KEY NOT NULL,
                body TEXT NOT NULL
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn read_document(&self, id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let sql = format!("SELECT body FROM {} WHERE id = ?1", self.table);
        let body: Option<String> = sqlx::query_scalar::<Sqlite, String>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        body.map(|text| {
            serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    async fn chunk_ids_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        key: &CacheKey,
    ) -> Result<Vec<String>, StoreError> {
        let prefix = key.chunk_prefix();
        let sql = format!(
            "SELECT id FROM {} WHERE substr(id, 1, ?1) = ?2",
            self.table
        );
        let ids: Vec<String> = sqlx::query_scalar::<Sqlite, String>(&sql)
            .bind(prefix.chars().count() as i64)
            .bind(prefix.as_str())
            .fetch_all(&mut **tx)
            .await?;

        let mut ids: Vec<String> = ids
            .into_iter()
            .filter(|id| key.parse_chunk_index(id).is_some())
            .collect();
        sort_chunk_ids(key, &mut ids);
        Ok(ids)
    }

    async fn delete_ids(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        ids: &[String],
    ) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        for id in ids {
            sqlx::query(&sql).bind(id.as_str()).execute(&mut **tx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn read_metadata(&self, key: &CacheKey) -> Result<Option<Metadata>, StoreError> {
        let id = key.metadata_id();
        self.read_document(&id)
            .await?
            .map(|body| decode_metadata(&id, body))
            .transpose()
    }

    async fn read_chunk(
        &self,
        key: &CacheKey,
        index: u32,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let id = key.chunk_id(index);
        self.read_document(&id)
            .await?
            .map(|body| decode_chunk(&id, body))
            .transpose()
    }

    async fn write_all(
        &self,
        key: &CacheKey,
        metadata: &Metadata,
        chunks: &[Vec<Record>],
    ) -> Result<(), StoreError> {
        let docs = encode_batch(key, metadata, chunks)?;
        let upsert = format!(
            "INSERT INTO {} (id, body) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            self.table
        );

        let mut tx = self.pool.begin().await?;

        let present = self.chunk_ids_in(&mut tx, key).await?;
        let surplus = surplus_chunk_ids(key, &present, chunks.len());
        self.delete_ids(&mut tx, &surplus).await?;

        for (id, body) in &docs {
            sqlx::query(&upsert)
                .bind(id.as_str())
                .bind(body.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            key = %key,
            chunks = chunks.len(),
            surplus = surplus.len(),
            "Committed dataset"
        );
        Ok(())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        self.delete_ids(&mut tx, ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_chunk_ids(&self, key: &CacheKey) -> Result<Vec<String>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let ids = self.chunk_ids_in(&mut tx, key).await?;
        tx.commit().await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::chunk::{split, ChunkingMode};
    use serde_json::json;
    use tempfile::TempDir;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| json!({ "symbol": format!("S{i}") })).collect()
    }

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        SqliteStore::open(&tmp.path().join("cache.db"), "top100")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read_dataset() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let key = CacheKey::from_raw("cars-2020");
        let set = split(&records(250), 100, ChunkingMode::Chunked, 42);

        store.write_all(&key, &set.metadata, &set.chunks).await.unwrap();

        let meta = store.read_metadata(&key).await.unwrap().unwrap();
        assert_eq!(meta.chunk_count, 3);
        assert_eq!(meta.total_items, 250);
        assert_eq!(meta.timestamp, 42);

        let last = store.read_chunk(&key, 2).await.unwrap().unwrap();
        assert_eq!(last.len(), 50);
        assert_eq!(last[0], json!({ "symbol": "S200" }));
        assert!(store.read_chunk(&key, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let key = CacheKey::from_raw("news-");

        let big = split(&records(250), 100, ChunkingMode::Chunked, 1);
        store.write_all(&key, &big.metadata, &big.chunks).await.unwrap();

        let small = split(&records(10), 100, ChunkingMode::Chunked, 2);
        store.write_all(&key, &small.metadata, &small.chunks).await.unwrap();

        assert_eq!(store.list_chunk_indices(&key).await.unwrap(), vec![0]);
        let meta = store.read_metadata(&key).await.unwrap().unwrap();
        assert_eq!(meta.total_items, 10);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let key = CacheKey::from_raw("crypto-");
        {
            let store = open_store(&tmp).await;
            let set = split(&records(3), 100, ChunkingMode::Chunked, 9);
            store.write_all(&key, &set.metadata, &set.chunks).await.unwrap();
        }

        let store = open_store(&tmp).await;
        assert_eq!(store.read_chunk(&key, 0).await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_chunks_leaves_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let key = CacheKey::from_raw("stocks");
        let set = split(&records(300), 100, ChunkingMode::Chunked, 1);
        store.write_all(&key, &set.metadata, &set.chunks).await.unwrap();

        store.delete_chunks(&key, &[1, 2]).await.unwrap();

        assert_eq!(store.list_chunk_indices(&key).await.unwrap(), vec![0]);
        assert!(store.read_metadata(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_transaction_keeps_previous_dataset() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let key = CacheKey::from_raw("cars-2020");
        let old = split(&records(40), 100, ChunkingMode::Chunked, 1);
        store.write_all(&key, &old.metadata, &old.chunks).await.unwrap();

        // Abort the batch when it reaches the second chunk, after chunk 0
        // has already been rewritten inside the transaction.
        sqlx::query(
            "CREATE TRIGGER reject_chunk BEFORE INSERT ON \"top100\"
             WHEN NEW.id = 'cars-2020-chunk-1'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let new = split(&records(250), 100, ChunkingMode::Chunked, 2);
        let err = store.write_all(&key, &new.metadata, &new.chunks).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        assert_eq!(store.read_metadata(&key).await.unwrap().unwrap(), old.metadata);
        assert_eq!(store.read_chunk(&key, 0).await.unwrap().unwrap(), old.chunks[0]);
        assert_eq!(store.list_chunk_indices(&key).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_non_canonical_chunk_ids_are_listed_and_removed() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let key = CacheKey::from_raw("stocks");
        for id in ["stocks-chunk-0", "stocks-chunk-01"] {
            sqlx::query("INSERT INTO \"top100\" (id, body) VALUES (?1, '{\"items\":[]}')")
                .bind(id)
                .execute(&store.pool)
                .await
                .unwrap();
        }

        assert_eq!(
            store.list_chunk_ids(&key).await.unwrap(),
            vec!["stocks-chunk-0", "stocks-chunk-01"]
        );
        store
            .delete_documents(&["stocks-chunk-01".to_string()])
            .await
            .unwrap();
        assert_eq!(store.list_chunk_ids(&key).await.unwrap(), vec!["stocks-chunk-0"]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_collection_name() {
        let tmp = TempDir::new().unwrap();
        let result = SqliteStore::open(&tmp.path().join("x.db"), "top100; DROP").await;
        assert!(result.is_err());
    }
}
