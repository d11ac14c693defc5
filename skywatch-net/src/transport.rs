//! HTTP transport for the aircraft feed
//!
//! The fetcher only needs "GET a URL, give me JSON", so the transport sits
//! behind a trait and tests swap in scripted implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use skywatch_core::DEFAULT_FEED_BASE;

use crate::RateLimitError;

/// Feed access configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// API root, e.g. `https://opendata.adsb.fi/api/v2`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Linear backoff unit: attempt `n` waits `backoff_base * n`
    pub backoff_base: Duration,
    /// User-Agent header sent upstream
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_BASE.to_string(),
            timeout_secs: 15,
            max_retries: 2,
            backoff_base: Duration::from_secs(2),
            user_agent: format!("skywatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Errors from network operations
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Malformed response body: {0}")]
    Body(String),

    #[error("Rate limiter failed: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Source of JSON documents
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// GET a URL and parse the body as JSON.
    ///
    /// Non-2xx statuses and unparsable bodies are errors.
    async fn get_json(&self, url: &str) -> Result<Value, NetError>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn FeedTransport>;

/// Build the HTTP client used for both the feed and notifications
pub fn create_client(config: &FeedConfig) -> Result<Client, NetError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| NetError::ClientBuild(e.to_string()))
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, NetError> {
        Ok(Self::new(create_client(config)?))
    }

    pub fn shared(self) -> SharedTransport {
        Arc::new(self)
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<Value, NetError> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| NetError::Body(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.base_url, DEFAULT_FEED_BASE);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.backoff_base, Duration::from_secs(2));
        assert!(config.user_agent.starts_with("skywatch/"));
    }

    #[test]
    fn test_create_client() {
        assert!(create_client(&FeedConfig::default()).is_ok());
    }
}
