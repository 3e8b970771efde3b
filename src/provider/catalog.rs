//! Built-in provider catalog.
//!
//! Every built-in category is a [`JsonProvider`]: a base URL, fixed query
//! parameters, an optional qualifier parameter, credentials, and the path to
//! the record array inside the response. Credentials come from
//! [`ProviderConfig`]; a missing credential is sent as an empty value and the
//! provider's own error status surfaces as a fetch failure.

use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use tracing::warn;

use crate::cache::chunk::{ChunkingMode, Record};
use crate::cache::key::{Qualifier, QualifierKind};
use crate::config::ProviderConfig;
use crate::provider::{ProviderAdapter, ProviderError, ProviderRegistry, ProviderRequest};

/// Where a credential is attached to the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    None,
    Header { name: String, value: String },
    QueryParam { name: String, value: String },
}

/// A data-driven adapter for providers that answer with a JSON array,
/// optionally nested under one field.
#[derive(Debug, Clone)]
pub struct JsonProvider {
    pub category: String,
    pub base: Url,
    pub params: Vec<(String, String)>,
    /// Query parameter carrying the qualifier, if the category has one.
    pub qualifier_param: Option<String>,
    pub qualifier_kind: QualifierKind,
    pub headers: Vec<(String, String)>,
    pub credential: Credential,
    /// Field holding the record array; `None` means the body is the array.
    pub records_field: Option<String>,
    /// Keep at most this many records.
    pub limit: Option<usize>,
    pub chunking: ChunkingMode,
}

impl JsonProvider {
    pub fn new(category: &str, base: &str) -> Result<Self, ProviderError> {
        let base = Url::parse(base).map_err(|e| ProviderError::InvalidEndpoint {
            category: category.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            category: category.to_string(),
            base,
            params: Vec::new(),
            qualifier_param: None,
            qualifier_kind: QualifierKind::None,
            headers: Vec::new(),
            credential: Credential::None,
            records_field: None,
            limit: None,
            chunking: ChunkingMode::Chunked,
        })
    }

    fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn qualified_by(mut self, param: &str, kind: QualifierKind) -> Self {
        self.qualifier_param = Some(param.to_string());
        self.qualifier_kind = kind;
        self
    }

    fn credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    fn records_at(mut self, field: &str) -> Self {
        self.records_field = Some(field.to_string());
        self
    }

    fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn chunking(mut self, mode: ChunkingMode) -> Self {
        self.chunking = mode;
        self
    }
}

impl ProviderAdapter for JsonProvider {
    fn category(&self) -> &str {
        &self.category
    }

    fn qualifier_kind(&self) -> QualifierKind {
        self.qualifier_kind.clone()
    }

    fn chunking_mode(&self) -> ChunkingMode {
        self.chunking
    }

    fn build_request(&self, qualifier: &Qualifier) -> ProviderRequest {
        let mut pairs: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(param) = &self.qualifier_param {
            if !qualifier.is_empty() {
                pairs.push((param.as_str(), qualifier.as_str()));
            }
        }

        let mut headers = self.headers.clone();
        match &self.credential {
            Credential::None => {}
            Credential::QueryParam { name, value } => pairs.push((name.as_str(), value.as_str())),
            Credential::Header { name, value } => headers.push((name.clone(), value.clone())),
        }

        let mut target = self.base.clone();
        if !pairs.is_empty() {
            target.query_pairs_mut().extend_pairs(pairs);
        }
        ProviderRequest { target, headers }
    }

    fn normalize(&self, raw: Value) -> Vec<Record> {
        let array = match &self.records_field {
            None => raw,
            Some(field) => match raw {
                Value::Object(mut map) => map.remove(field).unwrap_or(Value::Null),
                _ => Value::Null,
            },
        };

        let mut records = match array {
            Value::Array(items) => items,
            other => {
                warn!(
                    category = %self.category,
                    field = self.records_field.as_deref().unwrap_or("<root>"),
                    found = json_kind(&other),
                    "Upstream response missing record array, treating as empty"
                );
                return Vec::new();
            }
        };

        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn secret(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// The seven built-in categories.
pub fn builtin_providers(config: &ProviderConfig) -> Result<Vec<JsonProvider>, ProviderError> {
    let endpoint = |category: &str, default: &str| -> String {
        config
            .endpoints
            .get(category)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    Ok(vec![
        JsonProvider::new("cars", &endpoint("cars", "https://api.api-ninjas.com/v1/cars"))?
            .param("limit", "100")
            .qualified_by("year", QualifierKind::Year)
            .credential(Credential::Header {
                name: "X-Api-Key".to_string(),
                value: secret(&config.api_ninjas_key),
            }),
        JsonProvider::new(
            "stocks",
            &endpoint("stocks", "https://finnhub.io/api/v1/stock/symbol"),
        )?
        .param("exchange", "US")
        .header("Content-Type", "application/json")
        .credential(Credential::QueryParam {
            name: "token".to_string(),
            value: secret(&config.finnhub_token),
        })
        .limit(100)
        .chunking(ChunkingMode::SingleDocument),
        JsonProvider::new(
            "crypto",
            &endpoint("crypto", "https://api.coingecko.com/api/v3/coins/markets"),
        )?
        .param("vs_currency", "usd")
        .param("order", "market_cap_desc")
        .param("per_page", "100"),
        JsonProvider::new(
            "billionaires",
            &endpoint("billionaires", "https://forbes400.onrender.com/api/forbes400"),
        )?
        .param("limit", "100")
        .qualified_by("year", QualifierKind::Year),
        JsonProvider::new(
            "movies",
            &endpoint("movies", "https://imdb-top-100-movies.p.rapidapi.com/"),
        )?
        .header("x-rapidapi-host", "imdb-top-100-movies.p.rapidapi.com")
        .credential(Credential::Header {
            name: "x-rapidapi-key".to_string(),
            value: secret(&config.rapidapi_key),
        }),
        JsonProvider::new("news", &endpoint("news", "https://newsdata.io/api/1/news"))?
            .param("country", "in")
            .param("language", "en")
            .header("Content-Type", "application/json")
            .credential(Credential::QueryParam {
                name: "apikey".to_string(),
                value: secret(&config.newsdata_api_key),
            })
            .records_at("results"),
        JsonProvider::new(
            "gnews",
            &endpoint("gnews", "https://gnews.io/api/v4/top-headlines"),
        )?
        .qualified_by(
            "q",
            QualifierKind::Query {
                default: "general".to_string(),
            },
        )
        .header("Content-Type", "application/json")
        .credential(Credential::QueryParam {
            name: "apikey".to_string(),
            value: secret(&config.gnews_api_key),
        })
        .records_at("articles"),
    ])
}

/// Build a registry holding every built-in category.
pub fn builtin_registry(config: &ProviderConfig) -> Result<ProviderRegistry, ProviderError> {
    let mut registry = ProviderRegistry::new();
    for provider in builtin_providers(config)? {
        registry.register(Arc::new(provider))?;
    }
    Ok(registry)
}
