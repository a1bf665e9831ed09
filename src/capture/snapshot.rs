// src/capture/snapshot.rs
//! Snapshot event shapes and nested blob expansion
//!
//! A recording batch carries rrweb-style snapshot events
//! (`{type, data, timestamp}`). The web client gzips the bulky parts of some
//! of them and ships them as latin1 byte strings:
//!
//! | Snapshot | Compressed fields |
//! |----------|-------------------|
//! | full (type 2) | `data` |
//! | incremental mutation (type 3, source 0) | `data.adds`, `data.removes`, `data.texts`, `data.attributes` |
//!
//! Expansion replaces each such string with its decoded JSON and records the
//! field in a `$compressed` marker on the owning object so the remapper can
//! restore it. Some clients ship the same fields as plain JSON text instead;
//! those are parsed too and marked `json` so they go back out as text. A
//! string that is neither stays as it is and gets a `$compression_error`
//! entry instead.

use super::visitor::{Flow, PayloadVisitor};
use crate::compression::{BLOB_ENCODING, CompressionError, decode_blob};
use serde_json::{Map, Value};
use std::convert::Infallible;
use tracing::{debug, warn};

/// rrweb event type for a full DOM snapshot
pub const FULL_SNAPSHOT: i64 = 2;

/// rrweb event type for an incremental snapshot
pub const INCREMENTAL_SNAPSHOT: i64 = 3;

/// Incremental source for DOM mutations
pub const MUTATION_SOURCE: i64 = 0;

/// Marker map listing fields that were decompressed at capture time
pub const COMPRESSED_MARKER: &str = "$compressed";

/// `$compressed` encoding for fields that arrived as JSON text
pub const JSON_ENCODING: &str = "json";

/// Marker map listing fields whose decompression failed
pub const ERROR_MARKER: &str = "$compression_error";

/// Mutation fields that may be shipped compressed
pub const MUTATION_FIELDS: [&str; 4] = ["adds", "removes", "texts", "attributes"];

/// Recognized snapshot event shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Full,
    Incremental { source: Option<i64> },
    Other(i64),
}

impl SnapshotKind {
    /// Classify an object as a snapshot event
    ///
    /// Requires an integer `type`, an integer `timestamp` and a `data` field;
    /// anything else is not a snapshot.
    pub fn classify(object: &Map<String, Value>) -> Option<Self> {
        let kind = object.get("type")?.as_i64()?;
        object.get("timestamp")?.as_i64()?;
        let data = object.get("data")?;

        Some(match kind {
            FULL_SNAPSHOT => Self::Full,
            INCREMENTAL_SNAPSHOT => Self::Incremental {
                source: data.get("source").and_then(Value::as_i64),
            },
            other => Self::Other(other),
        })
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Incremental { source: Some(MUTATION_SOURCE) })
    }
}

/// Event property keys that carry snapshot lists
pub const SNAPSHOT_PROPERTIES: [&str; 2] = ["$snapshot_data", "$snapshot_items"];

/// Whether an ingestion event is a recording snapshot carrier
pub fn is_snapshot_event(event: &Value) -> bool {
    event.get("event").and_then(Value::as_str) == Some("$snapshot")
}

/// Snapshot objects carried by an event, in order
///
/// `$snapshot_data` may be a list or a single snapshot.
pub fn snapshot_items(event: &Value) -> Vec<&Map<String, Value>> {
    let Some(properties) = event.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for key in SNAPSHOT_PROPERTIES {
        match properties.get(key) {
            Some(Value::Array(list)) => items.extend(list.iter().filter_map(Value::as_object)),
            Some(Value::Object(single)) => items.push(single),
            _ => {}
        }
    }
    items
}

/// Mutable counterpart of [`snapshot_items`]
pub fn snapshot_items_mut(event: &mut Value) -> Vec<&mut Map<String, Value>> {
    let Some(properties) = event.get_mut("properties").and_then(Value::as_object_mut) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for (key, value) in properties.iter_mut() {
        if !SNAPSHOT_PROPERTIES.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Array(list) => items.extend(list.iter_mut().filter_map(Value::as_object_mut)),
            Value::Object(single) => items.push(single),
            _ => {}
        }
    }
    items
}

/// Insert `field -> value` into the marker map stored under `marker`
pub(crate) fn mark(object: &mut Map<String, Value>, marker: &str, field: &str, value: Value) {
    let entry = object
        .entry(marker.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(map) = entry {
        map.insert(field.to_string(), value);
    }
}

/// Visitor that expands compressed snapshot blobs in place
#[derive(Debug, Default)]
pub struct BlobExpander {
    /// Blobs decoded successfully
    pub expanded: usize,
    /// Blobs annotated with an error
    pub failed: usize,
}

impl BlobExpander {
    pub fn new() -> Self {
        Self::default()
    }

    fn expand_field(&mut self, owner: &mut Map<String, Value>, field: &str) {
        let Some(Value::String(blob)) = owner.get(field) else {
            return;
        };

        let decoded = match decode_blob(blob) {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .map(|value| (value, BLOB_ENCODING))
                .map_err(|e| e.to_string()),
            // Not a gzip byte string at all
            Err(e @ (CompressionError::UnsupportedFormat(_)
            | CompressionError::InvalidByteString { .. })) => match parse_json_text(blob) {
                Some(value) => Ok((value, JSON_ENCODING)),
                None => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match decoded {
            Ok((value, encoding)) => {
                owner.insert(field.to_string(), value);
                mark(owner, COMPRESSED_MARKER, field, Value::String(encoding.to_string()));
                self.expanded += 1;
            }
            Err(reason) => {
                warn!("Nested blob '{}' failed to decompress: {}", field, reason);
                mark(owner, ERROR_MARKER, field, Value::String(reason));
                self.failed += 1;
            }
        }
    }
}

/// Parse a field shipped as JSON text; only containers count
fn parse_json_text(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() || value.is_array() => Some(value),
        _ => None,
    }
}

impl PayloadVisitor for BlobExpander {
    type Error = Infallible;

    fn visit_object(&mut self, object: &mut Map<String, Value>) -> Result<Flow, Infallible> {
        let Some(kind) = SnapshotKind::classify(object) else {
            return Ok(Flow::Descend);
        };

        match kind {
            SnapshotKind::Full => self.expand_field(object, "data"),
            kind if kind.is_mutation() => {
                if let Some(Value::Object(data)) = object.get_mut("data") {
                    for field in MUTATION_FIELDS {
                        self.expand_field(data, field);
                    }
                }
            }
            _ => {}
        }

        debug!("Visited snapshot of kind {:?}", kind);
        // Snapshot contents are DOM data, never further snapshots
        Ok(Flow::Skip)
    }
}
