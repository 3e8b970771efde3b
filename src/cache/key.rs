//! Cache key derivation.
//!
//! A cache key is `"{category}-{qualifier}"`. Category names never contain a
//! `-` (the registry enforces `[a-z0-9_]`), so the first dash always ends the
//! category and two categories can never produce the same key. Every document
//! belonging to a key is named after it:
//!
//! ```text
//! cars-2020-metadata
//! cars-2020-chunk-0
//! cars-2020-chunk-1
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// How a category interprets the qualifier part of its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualifierKind {
    /// The category has a single dataset; any qualifier is ignored.
    None,
    /// A year such as `2020`.
    Year,
    /// A calendar date, stored as ISO `YYYY-MM-DD`.
    Date,
    /// Free text search; blank input falls back to `default`.
    Query { default: String },
}

/// A qualifier after category-specific normalization.
///
/// Equivalent inputs (`" 2020 "` and `"2020"`, `"Tech  News"` and
/// `"tech news"`) normalize to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Qualifier(String);

impl Qualifier {
    /// Normalize raw caller input according to `kind`. Never fails.
    pub fn normalize(kind: &QualifierKind, raw: Option<&str>) -> Self {
        let raw = raw.map(str::trim).unwrap_or_default();
        let value = match kind {
            QualifierKind::None => String::new(),
            QualifierKind::Year => raw.to_string(),
            QualifierKind::Date => normalize_date(raw),
            QualifierKind::Query { default } => {
                let collapsed = raw
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                if collapsed.is_empty() {
                    default.clone()
                } else {
                    collapsed
                }
            }
        };
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_date(raw: &str) -> String {
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return instant.date_naive().format("%Y-%m-%d").to_string();
    }
    raw.to_string()
}

/// Storage key for one (category, qualifier) dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-built key, e.g. a legacy key named in configuration.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the metadata document.
    pub fn metadata_id(&self) -> String {
        format!("{}-metadata", self.0)
    }

    /// Id of the chunk document at `index`.
    pub fn chunk_id(&self, index: u32) -> String {
        format!("{}-chunk-{index}", self.0)
    }

    /// Common prefix of every chunk document id.
    pub fn chunk_prefix(&self) -> String {
        format!("{}-chunk-", self.0)
    }

    /// Parse the chunk index out of a document id belonging to this key.
    ///
    /// Leading zeros are accepted, so the result does not always round-trip
    /// through [`CacheKey::chunk_id`]; compare ids when that matters.
    pub fn parse_chunk_index(&self, document_id: &str) -> Option<u32> {
        let suffix = document_id.strip_prefix(&self.chunk_prefix())?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the cache key for a category and a normalized qualifier.
pub fn build_key(category: &str, qualifier: &Qualifier) -> CacheKey {
    CacheKey(format!("{category}-{qualifier}"))
}
