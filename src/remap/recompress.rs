// src/remap/recompress.rs
//! Restore nested blobs to their wire encoding

use crate::capture::snapshot::{COMPRESSED_MARKER, ERROR_MARKER, JSON_ENCODING};
use crate::capture::visitor::{Flow, PayloadVisitor, walk_mut};
use crate::compression::{BLOB_ENCODING, encode_blob};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Visitor that re-encodes every field listed in a `$compressed` marker
///
/// Markers are removed as fields are restored: gzip blobs are gzipped again,
/// fields that arrived as JSON text go back out as text. `$compression_error` markers
/// are dropped too: those blobs were never decoded, so the original string
/// is already in wire form.
#[derive(Debug, Default)]
pub struct BlobCompressor {
    pub recompressed: usize,
    pub passed_through: usize,
}

impl BlobCompressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadVisitor for BlobCompressor {
    type Error = Error;

    fn visit_object(&mut self, object: &mut Map<String, Value>) -> Result<Flow> {
        if let Some(Value::Object(failed)) = object.remove(ERROR_MARKER) {
            self.passed_through += failed.len();
        }

        let Some(marker) = object.remove(COMPRESSED_MARKER) else {
            return Ok(Flow::Descend);
        };
        let Value::Object(fields) = marker else {
            return Err(Error::Recompression {
                field: COMPRESSED_MARKER.to_string(),
                reason: "marker is not a map".to_string(),
            });
        };

        for (field, encoding) in fields {
            let encoding = match encoding.as_str() {
                Some(name @ (BLOB_ENCODING | JSON_ENCODING)) => name.to_string(),
                _ => {
                    return Err(Error::Recompression {
                        field,
                        reason: format!("unsupported encoding {encoding}"),
                    });
                }
            };

            let Some(decoded) = object.get(&field) else {
                return Err(Error::Recompression {
                    field,
                    reason: "field disappeared after capture".to_string(),
                });
            };

            let text = serde_json::to_string(decoded).map_err(|e| Error::Recompression {
                field: field.clone(),
                reason: e.to_string(),
            })?;
            if encoding == JSON_ENCODING {
                debug!("Restored '{}' as JSON text", field);
                object.insert(field, Value::String(text));
                self.recompressed += 1;
                continue;
            }

            let blob = encode_blob(&text).map_err(|e| Error::Recompression {
                field: field.clone(),
                reason: e.to_string(),
            })?;

            debug!("Recompressed '{}' ({} -> {} chars)", field, text.len(), blob.chars().count());
            object.insert(field, Value::String(blob));
            self.recompressed += 1;
        }

        Ok(Flow::Skip)
    }
}

/// Recompress every flagged blob in a payload
pub fn recompress(payload: &mut Value) -> Result<usize> {
    let mut compressor = BlobCompressor::new();
    walk_mut(payload, &mut compressor)?;
    Ok(compressor.recompressed)
}
