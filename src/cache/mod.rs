//! Chunked cache-aside core.
//!
//! - [`key`]: qualifier normalization and cache key / document id derivation
//! - [`chunk`]: metadata records, the chunking policy and reassembly
//! - [`clock`]: time source for freshness checks
//! - [`engine`]: the read-through engine (freshness → hit or refill)
//! - [`sweep`]: startup pruning of chunks left by an old storage layout

pub mod chunk;
pub mod clock;
pub mod engine;
pub mod key;
pub mod sweep;

pub use engine::{CacheEngine, CacheError};
