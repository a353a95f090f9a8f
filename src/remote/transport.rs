//! HTTP transport seam
//!
//! [`CatalogTransport`] performs one GET and hands back status + body. All
//! paging, retry and decoding lives above it, so tests can script responses
//! without a network.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// One outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub url: String,
    pub bearer_token: Option<String>,
    /// Per-request deadline; overrides the transport's default
    pub timeout: Option<Duration>,
}

impl CatalogRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Raw HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First 200 chars of the body, for error messages
    pub fn snippet(&self) -> String {
        self.body.chars().take(200).collect()
    }
}

/// Failure below the HTTP status level
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get(&self, request: CatalogRequest) -> Result<RawResponse, TransportError>;
}

// =============================================================================
// reqwest implementation
// =============================================================================

/// Production transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geolookup/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    async fn get(&self, request: CatalogRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest)?;

        Ok(RawResponse { status, body })
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
