// src/capture/mod.rs
//! Capture and decompression of ingestion requests
//!
//! A captured request keeps its raw body byte-for-byte next to a fully
//! expanded JSON tree. Expansion happens in three steps:
//!
//! 1. Body decompression, when any one signal says the body is gzip:
//!    `Content-Encoding` header, gzip magic bytes, or `?compression=gzip-js`
//! 2. Form unwrapping for `data=<base64>` bodies (`?compression=base64`)
//! 3. A [`visitor`] walk that expands compressed snapshot blobs in place
//!
//! Nothing in this module fails the capture: a body that cannot be decoded
//! is still recorded, just without a decompressed tree.

pub mod snapshot;
pub mod visitor;

pub use snapshot::{BlobExpander, COMPRESSED_MARKER, ERROR_MARKER, SnapshotKind};
pub use visitor::{Flow, PayloadVisitor, walk_mut};

use crate::compression::{CompressionFormat, decompress};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which ingestion stream a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Application events (`/e/`, `/batch/`, ...)
    Event,
    /// Session recording snapshots (`/s/`)
    Recording,
}

impl RecordKind {
    /// Classify a request by its path
    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        if trimmed == "s" || trimmed.starts_with("s/") {
            Self::Recording
        } else {
            Self::Event
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Event => write!(f, "event"),
            RecordKind::Recording => write!(f, "recording"),
        }
    }
}

/// One captured ingestion request, as stored in the capture log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRecord {
    /// When the request was captured
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,

    /// Client send time from the `_` cache-buster, if present
    pub original_timestamp: Option<DateTime<Utc>>,

    pub kind: RecordKind,

    /// Request body exactly as received
    #[serde(rename = "data", with = "base64_bytes")]
    pub raw: Vec<u8>,

    /// Expanded payload tree, absent when the body could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompressed: Option<Value>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

impl CapturedRecord {
    /// Top-level events in the expanded payload
    ///
    /// Accepts the three batch framings clients send: a bare array, an
    /// object with a `batch` array, or a single event object.
    pub fn events(&self) -> Vec<&Value> {
        match &self.decompressed {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(object)) => match object.get("batch") {
                Some(Value::Array(items)) => items.iter().collect(),
                _ if object.contains_key("event") => vec![single],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Client library version reported in the `ver` query parameter
    pub fn client_version(&self) -> Option<&str> {
        self.query.get("ver").map(String::as_str)
    }
}

/// Capture a request: keep the raw body and expand it
///
/// Header names are stored lowercased.
pub fn capture(
    kind: RecordKind,
    body: Vec<u8>,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
) -> CapturedRecord {
    let headers: BTreeMap<String, String> = headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect();

    let decompressed = expand_body(&body, &headers, &query);

    let original_timestamp = query
        .get("_")
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    CapturedRecord {
        captured_at: Utc::now(),
        original_timestamp,
        kind,
        raw: body,
        decompressed,
        headers,
        query,
    }
}

/// Decide whether the body is compressed; any one signal is enough
pub fn detect_compression(
    headers: &BTreeMap<String, String>,
    query: &BTreeMap<String, String>,
    body: &[u8],
) -> CompressionFormat {
    let signals = [
        headers
            .get("content-encoding")
            .map(|v| CompressionFormat::from_content_encoding(v)),
        Some(CompressionFormat::from_magic_bytes(body)),
        query
            .get("compression")
            .map(|v| CompressionFormat::from_query_flag(v)),
    ];

    signals
        .into_iter()
        .flatten()
        .find(|format| *format != CompressionFormat::None)
        .unwrap_or(CompressionFormat::None)
}

/// Parse a query string into a map (last value wins)
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

fn expand_body(
    body: &[u8],
    headers: &BTreeMap<String, String>,
    query: &BTreeMap<String, String>,
) -> Option<Value> {
    if body.is_empty() {
        return None;
    }

    let format = detect_compression(headers, query, body);
    let bytes = match decompress(body, format) {
        Ok(bytes) => bytes,
        Err(e) => {
            // A stray flag on an uncompressed body should not lose the payload
            warn!("Body flagged as {} but failed to decompress: {}", format, e);
            body.to_vec()
        }
    };

    let json_bytes = match unwrap_form(&bytes, query) {
        Some(decoded) => decoded,
        None => bytes,
    };

    let mut payload: Value = match serde_json::from_slice(&json_bytes) {
        Ok(value) => value,
        Err(e) => {
            warn!("Captured body is not JSON, storing raw bytes only: {}", e);
            return None;
        }
    };

    let mut expander = BlobExpander::new();
    match walk_mut(&mut payload, &mut expander) {
        Ok(()) => {}
        Err(never) => match never {},
    }
    debug!(
        "Expanded payload ({} bytes): {} nested blobs decoded, {} failed",
        body.len(),
        expander.expanded,
        expander.failed
    );

    Some(payload)
}

/// Decode `data=<base64>` form bodies
fn unwrap_form(bytes: &[u8], query: &BTreeMap<String, String>) -> Option<Vec<u8>> {
    let flagged = query.get("compression").is_some_and(|v| v == "base64");
    if !flagged && !bytes.starts_with(b"data=") {
        return None;
    }

    let data = url::form_urlencoded::parse(bytes)
        .find(|(key, _)| key == "data")
        .map(|(_, value)| value.into_owned())?;

    STANDARD
        .decode(data.as_bytes())
        .or_else(|_| URL_SAFE.decode(data.as_bytes()))
        .map_err(|e| warn!("Form body has undecodable base64 data: {}", e))
        .ok()
}

/// Serde adapter storing byte vectors as standard base64
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
