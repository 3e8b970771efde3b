//! Upstream data providers.
//!
//! - [`catalog`]: the built-in categories and their data-driven adapter
//! - [`fetch`]: the outbound HTTP call, behind the [`UpstreamFetcher`] trait
//!
//! An adapter knows how to address its provider and how to turn the raw
//! response into an ordered list of records. The engine never looks inside a
//! record; it only chunks and stores what `normalize` returns.

pub mod catalog;
pub mod fetch;

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;

use crate::cache::chunk::{ChunkingMode, Record};
use crate::cache::key::{Qualifier, QualifierKind};

pub use fetch::{FetchError, HttpFetcher, UpstreamFetcher};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("invalid category name {0:?}: use lowercase letters, digits and '_'")]
    InvalidCategory(String),

    #[error("category {0} registered twice")]
    Duplicate(String),

    #[error("invalid endpoint for {category}: {reason}")]
    InvalidEndpoint { category: String, reason: String },
}

/// An outbound request, ready for the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub target: Url,
    pub headers: Vec<(String, String)>,
}

/// Per-category description of an upstream source.
pub trait ProviderAdapter: Send + Sync {
    fn category(&self) -> &str;

    fn qualifier_kind(&self) -> QualifierKind;

    fn chunking_mode(&self) -> ChunkingMode {
        ChunkingMode::Chunked
    }

    /// Address the provider for one qualifier.
    fn build_request(&self, qualifier: &Qualifier) -> ProviderRequest;

    /// Extract the ordered records from a raw response.
    ///
    /// Must not fail: a response without the expected shape yields an empty
    /// list (and a warning), never an error.
    fn normalize(&self, raw: serde_json::Value) -> Vec<Record>;
}

/// Whether `name` is usable as a category. The first `-` of a cache key
/// must always end the category.
pub fn is_valid_category(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Category name → adapter. Built once at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<(), ProviderError> {
        let name = adapter.category().to_string();
        if !is_valid_category(&name) {
            return Err(ProviderError::InvalidCategory(name));
        }
        if self.adapters.contains_key(&name) {
            return Err(ProviderError::Duplicate(name));
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, category: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(category).cloned()
    }

    /// Registered category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl ProviderAdapter for Named {
        fn category(&self) -> &str {
            self.0
        }
        fn qualifier_kind(&self) -> QualifierKind {
            QualifierKind::None
        }
        fn build_request(&self, _: &Qualifier) -> ProviderRequest {
            ProviderRequest {
                target: Url::parse("http://localhost/").unwrap(),
                headers: vec![],
            }
        }
        fn normalize(&self, _: serde_json::Value) -> Vec<Record> {
            vec![]
        }
    }

    #[test]
    fn test_registry_rejects_dashes_and_duplicates() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Named("crypto"))).unwrap();

        assert!(matches!(
            registry.register(Arc::new(Named("crypto"))),
            Err(ProviderError::Duplicate(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(Named("top-cars"))),
            Err(ProviderError::InvalidCategory(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(Named("Cars"))),
            Err(ProviderError::InvalidCategory(_))
        ));

        assert_eq!(registry.categories(), vec!["crypto"]);
        assert!(registry.get("crypto").is_some());
        assert!(registry.get("stocks").is_none());
    }
}
