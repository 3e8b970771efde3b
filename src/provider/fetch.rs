//! Outbound upstream calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::debug;

use crate::provider::ProviderRequest;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("upstream responded with status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("response body is not valid JSON: {0}")]
    InvalidBody(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Perform the request and decode the body as JSON. No retries.
    async fn fetch(&self, request: &ProviderRequest) -> Result<serde_json::Value, FetchError>;
}

/// `reqwest`-based fetcher sharing one connection pool across requests.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("top100-cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::Network(format!("bad header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::Network(format!("bad header value for {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch(&self, request: &ProviderRequest) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(request.target.clone())
            .headers(header_map(&request.headers)?)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        let status = response.status();
        debug!(host = request.target.host_str(), status = status.as_u16(), "Upstream responded");
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::InvalidBody(e.without_url().to_string()))
    }
}
