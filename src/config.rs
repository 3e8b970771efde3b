//! Runtime configuration for top100-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically,
//! then adjusted from environment variables. Cache tuning (TTL, chunk size),
//! store selection, startup maintenance and provider credentials live here.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "top100-cache", about = "Chunked cache-aside server for top-100 datasets")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, env = "TOP100_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long, env = "TOP100_LISTEN")]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Cache engine tuning.
    pub cache: CacheConfig,

    /// Document store selection.
    pub store: StoreConfig,

    /// Startup maintenance.
    pub maintenance: MaintenanceConfig,

    /// Upstream provider credentials and endpoint overrides.
    pub providers: ProviderConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:3001").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3001".to_string(),
        }
    }
}

/// Cache-aside engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time after which cached data is stale, in seconds.
    pub ttl_secs: u64,

    /// Maximum number of records per stored chunk.
    pub max_chunk_size: usize,

    /// Deadline for a single upstream fetch, in seconds.
    pub upstream_timeout_secs: u64,

    /// Collapse concurrent misses on the same key into one upstream fetch.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 4 * 60 * 60, // 4 hours
            max_chunk_size: 100,
            upstream_timeout_secs: 30,
            single_flight: false,
        }
    }
}

impl CacheConfig {
    /// TTL in milliseconds, the resolution metadata timestamps are stored at.
    pub fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Which document store backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local map, lost on restart.
    Memory,
    /// SQLite file holding JSON documents.
    Sqlite,
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file for the SQLite backend.
    pub sqlite_path: PathBuf,

    /// Collection (table) holding metadata and chunk documents.
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("top100-cache.db"),
            collection: "top100".to_string(),
        }
    }
}

/// Startup maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Run the legacy chunk sweep once before serving.
    pub sweep_on_start: bool,

    /// Keys whose storage moved to a single chunk; every chunk but 0 is pruned.
    pub legacy_single_chunk_keys: Vec<String>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_on_start: true,
            legacy_single_chunk_keys: vec!["stocks".to_string()],
        }
    }
}

/// Provider credentials. Opaque to the engine; only adapters read them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_ninjas_key: Option<String>,
    pub finnhub_token: Option<String>,
    pub rapidapi_key: Option<String>,
    pub newsdata_api_key: Option<String>,
    pub gnews_api_key: Option<String>,

    /// Base URL overrides keyed by category.
    pub endpoints: HashMap<String, String>,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_with(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ttl) = parse_env(&lookup, "TOP100_CACHE_TTL_SECS") {
            self.cache.ttl_secs = ttl;
        }
        if let Some(size) = parse_env(&lookup, "TOP100_MAX_CHUNK_SIZE") {
            self.cache.max_chunk_size = size;
        }
        if let Some(path) = lookup("TOP100_SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(path);
        }

        let creds = &mut self.providers;
        for (var, slot) in [
            ("API_NINJAS_KEY", &mut creds.api_ninjas_key),
            ("FINNHUB_TOKEN", &mut creds.finnhub_token),
            ("RAPIDAPI_KEY", &mut creds.rapidapi_key),
            ("NEWSDATA_API_KEY", &mut creds.newsdata_api_key),
            ("NEWS_API_KEY", &mut creds.gnews_api_key),
        ] {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }
    }

    /// Reject settings the engine cannot operate with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.max_chunk_size == 0 {
            anyhow::bail!("cache.max_chunk_size must be at least 1");
        }
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be at least 1");
        }
        if self.store.collection.is_empty()
            || !self
                .store
                .collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("store.collection must be a plain identifier");
        }
        Ok(())
    }
}

/// Read and parse a numeric override. Unparseable values are ignored with a warning.
fn parse_env<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {name}={raw:?}: {e}");
            None
        }
    }
}
