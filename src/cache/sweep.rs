//! Maintenance sweep for keys that moved from multi-chunk storage to a single
//! chunk.
//!
//! Such keys may still carry chunk documents `1..n` from the old layout. The
//! sweep deletes every chunk of a legacy key except the canonical chunk 0. It
//! is idempotent and only ever touches chunk documents of the listed keys.

use tracing::{debug, info};

use crate::cache::key::CacheKey;
use crate::store::{ChunkStore, StoreError};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub keys_scanned: usize,
    pub deleted: usize,
}

/// Chunk documents to remove from a legacy key: everything but the canonical
/// chunk 0. Non-canonical ids such as `-chunk-00` are removed too.
pub fn orphaned_ids(key: &CacheKey, present: &[String]) -> Vec<String> {
    let keep = key.chunk_id(0);
    present.iter().filter(|id| **id != keep).cloned().collect()
}

/// Prune orphaned chunks of each key in `legacy_keys`.
pub async fn run_sweep(
    store: &dyn ChunkStore,
    legacy_keys: &[String],
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();

    for raw in legacy_keys {
        let key = CacheKey::from_raw(raw.as_str());
        let present = store.list_chunk_ids(&key).await?;
        let orphans = orphaned_ids(&key, &present);
        report.keys_scanned += 1;

        if orphans.is_empty() {
            debug!(key = %key, "No legacy chunks to prune");
            continue;
        }

        store.delete_documents(&orphans).await?;
        report.deleted += orphans.len();
        info!(key = %key, deleted = orphans.len(), "Pruned legacy chunks");
    }

    Ok(report)
}
