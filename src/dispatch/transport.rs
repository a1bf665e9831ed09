// src/dispatch/transport.rs
//! Network seam for dispatching wire requests
//!
//! The dispatcher frames requests; a [`Transport`] only moves bytes and
//! reports the HTTP status. Swapping the transport is how tests observe
//! exactly what would go over the wire.

use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// A fully framed POST request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WireRequest {
    /// Value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Trait for sending wire requests to an ingestion endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a request and return the response status code
    ///
    /// Connection-level failures are errors; any HTTP status, including
    /// non-2xx, is returned as `Ok`.
    async fn post(&self, request: WireRequest) -> Result<u16>;

    /// Get a human-readable name for this transport (for logging)
    fn name(&self) -> &str;
}

/// HTTP transport using reqwest
///
/// Timeouts are the client defaults; nothing is retried.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("capreplay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: WireRequest) -> Result<u16> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {e}", request.url)))?;

        let status = response.status().as_u16();
        debug!("POST {} -> {}", request.url, status);
        Ok(status)
    }

    fn name(&self) -> &str {
        "http"
    }
}
