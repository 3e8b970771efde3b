//! Chunk layout: metadata records, the chunking policy and reassembly.
//!
//! A dataset is stored as one metadata document plus `chunk_count` chunk
//! documents. Chunks are the unit of persistence: each one holds at most
//! `max_chunk_size` records so no single document outgrows the store's
//! per-record ceiling.

use serde::{Deserialize, Serialize};

/// An opaque, provider-specific record. Only adapters understand its shape.
pub type Record = serde_json::Value;

/// How a category lays out its records in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkingMode {
    /// `ceil(N / max_chunk_size)` chunks of at most `max_chunk_size` records.
    Chunked,
    /// Exactly one chunk holding every record, regardless of size.
    SingleDocument,
}

/// Per-key metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Epoch milliseconds of the last successful refresh.
    pub timestamp: i64,

    /// Number of chunk documents persisted for the key.
    #[serde(alias = "chunks")]
    pub chunk_count: u32,

    /// Sum of records across all chunks.
    #[serde(default)]
    pub total_items: u64,
}

impl Metadata {
    /// Whether this entry is still fresh at `now_ms`.
    ///
    /// An entry exactly `ttl_ms` old is stale.
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) < ttl_ms
    }

    /// Whether the counts can describe a real dataset: every chunk but a
    /// single empty document holds at least one record.
    pub fn is_consistent(&self) -> bool {
        u64::from(self.chunk_count) <= self.total_items.max(1)
    }

    /// Age of the entry in whole minutes, for logging.
    pub fn age_minutes(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp) / 60_000
    }
}

/// A dataset split into its persisted form.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSet {
    pub metadata: Metadata,
    pub chunks: Vec<Vec<Record>>,
}

/// Split `records` into chunks according to `mode`, stamping the metadata
/// with `timestamp`.
///
/// With [`ChunkingMode::Chunked`], chunk `i` holds records
/// `[i * max, min(N, (i + 1) * max))` and an empty input produces no chunks.
pub fn split(
    records: &[Record],
    max_chunk_size: usize,
    mode: ChunkingMode,
    timestamp: i64,
) -> ChunkSet {
    let chunks: Vec<Vec<Record>> = match mode {
        ChunkingMode::Chunked => records
            .chunks(max_chunk_size.max(1))
            .map(<[Record]>::to_vec)
            .collect(),
        ChunkingMode::SingleDocument => vec![records.to_vec()],
    };

    ChunkSet {
        metadata: Metadata {
            timestamp,
            chunk_count: chunks.len() as u32,
            total_items: records.len() as u64,
        },
        chunks,
    }
}

/// Number of chunks `total_items` records occupy under the chunked policy.
pub fn expected_chunk_count(total_items: u64, max_chunk_size: usize) -> u32 {
    total_items.div_ceil(max_chunk_size.max(1) as u64) as u32
}

/// Concatenate chunks in index order. `None` marks a chunk that could not be read.
///
/// Returns the records and the indices that were missing.
pub fn reassemble<I>(chunks: I) -> (Vec<Record>, Vec<u32>)
where
    I: IntoIterator<Item = (u32, Option<Vec<Record>>)>,
{
    let mut records = Vec::new();
    let mut missing = Vec::new();
    for (index, chunk) in chunks {
        match chunk {
            Some(items) => records.extend(items),
            None => missing.push(index),
        }
    }
    (records, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| json!({ "rank": i })).collect()
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let max = 10;
        for n in [0, 1, max, max + 1, 10 * max] {
            let input = records(n);
            let set = split(&input, max, ChunkingMode::Chunked, 0);

            assert_eq!(set.metadata.total_items, n as u64);
            assert_eq!(
                set.metadata.chunk_count,
                expected_chunk_count(n as u64, max),
                "n = {n}"
            );
            assert!(set.chunks.iter().all(|c| c.len() <= max));

            let (output, missing) = reassemble(
                set.chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (i as u32, Some(c))),
            );
            assert!(missing.is_empty());
            assert_eq!(output, input, "n = {n}");
        }
    }

    #[test]
    fn test_split_250_into_three_chunks() {
        let set = split(&records(250), 100, ChunkingMode::Chunked, 7);
        let sizes: Vec<usize> = set.chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(set.chunks[2][0], json!({ "rank": 200 }));
        assert_eq!(set.metadata.timestamp, 7);
    }

    #[test]
    fn test_empty_input_writes_no_chunks() {
        let set = split(&[], 100, ChunkingMode::Chunked, 0);
        assert_eq!(set.metadata.chunk_count, 0);
        assert_eq!(set.metadata.total_items, 0);
        assert!(set.chunks.is_empty());
    }

    #[test]
    fn test_single_document_mode() {
        let set = split(&records(250), 100, ChunkingMode::SingleDocument, 0);
        assert_eq!(set.metadata.chunk_count, 1);
        assert_eq!(set.chunks[0].len(), 250);

        let empty = split(&[], 100, ChunkingMode::SingleDocument, 0);
        assert_eq!(empty.metadata.chunk_count, 1);
        assert!(empty.chunks[0].is_empty());
    }

    #[test]
    fn test_freshness_boundary() {
        let ttl = 4 * 60 * 60 * 1000;
        let now = 1_000_000_000_000;

        let at_ttl = Metadata {
            timestamp: now - ttl,
            chunk_count: 0,
            total_items: 0,
        };
        assert!(!at_ttl.is_fresh(now, ttl));

        let just_inside = Metadata {
            timestamp: now - ttl + 1,
            ..at_ttl
        };
        assert!(just_inside.is_fresh(now, ttl));
    }

    #[test]
    fn test_metadata_consistency() {
        let written = split(&records(250), 100, ChunkingMode::Chunked, 0).metadata;
        assert!(written.is_consistent());
        assert!(split(&[], 100, ChunkingMode::Chunked, 0).metadata.is_consistent());
        assert!(split(&[], 100, ChunkingMode::SingleDocument, 0)
            .metadata
            .is_consistent());

        let corrupt = Metadata {
            timestamp: 0,
            chunk_count: u32::MAX,
            total_items: 5,
        };
        assert!(!corrupt.is_consistent());
    }

    #[test]
    fn test_reassemble_skips_missing() {
        let (out, missing) = reassemble(vec![
            (0, Some(records(2))),
            (1, None),
            (2, Some(records(1))),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(missing, vec![1]);
    }

    #[test]
    fn test_metadata_accepts_legacy_field_name() {
        let meta: Metadata =
            serde_json::from_value(json!({ "timestamp": 5, "chunks": 2, "totalItems": 150 }))
                .unwrap();
        assert_eq!(meta.chunk_count, 2);
        assert_eq!(meta.total_items, 150);

        let encoded = serde_json::to_value(meta).unwrap();
        assert_eq!(encoded["chunkCount"], 2);
    }
}
