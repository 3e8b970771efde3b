//! top100-cache: read-through chunked cache for top-100 style datasets.
//!
//! Sits between clients and a set of external data providers. Each category
//! (cars, stocks, crypto, ...) has its own upstream, response shape and cache
//! key. Fresh data is served from a document store; stale or missing data is
//! fetched, normalized, split into bounded chunks and written back atomically.
//!
//! Exposes a small HTTP API for drop-in use by a web front end.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod provider;
pub mod server;
pub mod store;
