//! HTTP front end.
//!
//! - [`api`]: routes, query parsing and error → status mapping

pub mod api;
