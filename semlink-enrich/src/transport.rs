//! HTTP transport seam
//!
//! Fetch stages talk to the external services through [`Transport`] so
//! tests can script responses without a network. [`HttpTransport`] is the
//! reqwest-backed implementation used by the binary.

use async_trait::async_trait;
use semlink_common::config::HttpConfig;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("semlink/", env!("CARGO_PKG_VERSION"));

/// Transport-level fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Worth another attempt: connection trouble, timeouts and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Decode(_) => false,
        }
    }
}

/// A GET request: URL, query parameters and optional per-call timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Drop every query parameter named `key`
    pub fn without_query(mut self, key: &str) -> Self {
        self.query.retain(|(k, _)| k != key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Issues GET requests and returns the response body
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<String, FetchError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            default_timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &HttpRequest) -> Result<String, FetchError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        tracing::debug!(url = %request.url, timeout_ms = timeout.as_millis() as u64, "HTTP GET");

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        };

        let response = self
            .http_client
            .get(&request.url)
            .query(&request.query)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Decode(e.to_string())
            }
        })
    }
}
