// src/dispatch/mod.rs
//! Wire framing and dispatch of replayed traffic
//!
//! Snapshot streams go to the recording endpoint as one gzip body. Application
//! events go either as a single historical batch or as one gzip body each.
//! Every request is built in full before the dry-run check, so a dry run
//! exercises the same framing as a live one.

mod transport;

pub use transport::{HttpTransport, Transport, WireRequest};

use crate::compression::gzip;
use crate::config::{EventMode, RunOptions};
use crate::error::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Client library version reported when the capture carried none
pub const DEFAULT_CLIENT_VERSION: &str = "1.130.0";

const RECORDING_PATH: &str = "/s/";
const SINGLE_EVENT_PATH: &str = "/e/";
const BATCH_PATH: &str = "/batch/";

/// What happened to one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted with the given 2xx status
    Sent(u16),
    /// Framed but not sent
    Skipped,
}

/// Frames and sends requests for one ingestion host
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    host: String,
    project_key: String,
    options: RunOptions,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        host: impl Into<String>,
        project_key: impl Into<String>,
        options: RunOptions,
    ) -> Self {
        Self {
            transport,
            host: host.into().trim_end_matches('/').to_string(),
            project_key: project_key.into(),
            options,
        }
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = format!("{}{}", self.host, path);
        Url::parse(&base).map_err(|e| Error::ConfigError(format!("Invalid target URL {base}: {e}")))
    }

    fn compressed_request(&self, path: &str, body: &Value, ver: &str, now_ms: i64) -> Result<WireRequest> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("compression", "gzip-js")
            .append_pair("ver", ver)
            .append_pair("_", &now_ms.to_string());

        let json = serde_json::to_vec(body)?;
        Ok(WireRequest {
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: gzip(&json)?,
        })
    }

    /// Frame a snapshot stream for the recording endpoint
    pub fn recording_request(&self, events: &[Value], ver: &str, now_ms: i64) -> Result<WireRequest> {
        self.compressed_request(RECORDING_PATH, &Value::Array(events.to_vec()), ver, now_ms)
    }

    /// Frame one application event for the single-event endpoint
    pub fn single_event_request(&self, event: &Value, ver: &str, now_ms: i64) -> Result<WireRequest> {
        self.compressed_request(SINGLE_EVENT_PATH, event, ver, now_ms)
    }

    /// Frame application events as one historical batch
    pub fn batch_request(&self, events: &[Value]) -> Result<WireRequest> {
        let url = self.endpoint(BATCH_PATH)?;
        let body = json!({
            "apiKey": self.project_key,
            "historicalMigration": true,
            "batch": events,
        });

        Ok(WireRequest {
            url: url.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(&body)?,
        })
    }

    /// Send a framed request, or log it and skip in dry-run mode
    pub async fn dispatch(&self, request: WireRequest) -> Result<Delivery> {
        if self.options.dry_run {
            info!("[dry run] POST {} ({} bytes)", request.url, request.body.len());
            return Ok(Delivery::Skipped);
        }

        let url = request.url.clone();
        debug!("POST {} via {} ({} bytes)", url, self.transport.name(), request.body.len());
        let status = self.transport.post(request).await?;
        if !(200..300).contains(&status) {
            return Err(Error::Dispatch { status, url });
        }
        Ok(Delivery::Sent(status))
    }

    /// Send the snapshot stream of one recording
    pub async fn send_recording(&self, events: &[Value], ver: &str, now_ms: i64) -> Result<Delivery> {
        let request = self.recording_request(events, ver, now_ms)?;
        self.dispatch(request).await
    }

    /// Send application events according to the run's event mode
    ///
    /// Returns one delivery per request made. In single mode the first
    /// failure stops the remaining events.
    pub async fn send_events(&self, events: &[Value], ver: &str, now_ms: i64) -> Result<Vec<Delivery>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        match self.options.event_mode {
            EventMode::Batch => {
                let request = self.batch_request(events)?;
                Ok(vec![self.dispatch(request).await?])
            }
            EventMode::Single => {
                let mut deliveries = Vec::with_capacity(events.len());
                for event in events {
                    let request = self.single_event_request(event, ver, now_ms)?;
                    deliveries.push(self.dispatch(request).await?);
                }
                Ok(deliveries)
            }
        }
    }
}
