// src/compression/mod.rs
//! Gzip helpers for ingestion wire bodies and nested snapshot blobs
//!
//! Two layers use gzip:
//! - Whole request bodies (`Content-Encoding: gzip`, `?compression=gzip-js`)
//! - Individual snapshot fields, which the web client gzips and then packs into
//!   a JSON string with one char per byte (latin1 "binary string")
//!
//! The second convention is what [`encode_blob`] and [`decode_blob`] speak.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Name of the nested blob encoding recorded in `$compressed` markers
pub const BLOB_ENCODING: &str = "gzip-latin1";

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to compress {format} data: {source}")]
    Compression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Byte string has non-latin1 char U+{code:04X} at offset {offset}")]
    InvalidByteString { offset: usize, code: u32 },

    #[error("Decompressed blob is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

/// Supported body compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// No compression (raw data)
    None,
    /// Gzip compression
    Gzip,
}

impl CompressionFormat {
    /// Detect compression format from magic bytes
    ///
    /// Gzip: `1f 8b`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// Detect compression format from a `Content-Encoding` header value
    pub fn from_content_encoding(value: &str) -> Self {
        if value
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("gzip"))
        {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// Detect compression format from the `compression` query flag
    ///
    /// The web client sends `gzip-js`; plain `gzip` is accepted as well.
    pub fn from_query_flag(value: &str) -> Self {
        match value {
            "gzip" | "gzip-js" => Self::Gzip,
            _ => Self::None,
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decompress a byte slice using the specified format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>, CompressionError> {
    match format {
        CompressionFormat::None => Ok(data.to_vec()),
        CompressionFormat::Gzip => {
            let mut output = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut output)
                .map_err(|e| CompressionError::Decompression {
                    format: format.name(),
                    source: e,
                })?;
            Ok(output)
        }
    }
}

/// Decompress a byte slice, detecting the format from magic bytes
pub fn decompress_auto(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    decompress(data, CompressionFormat::from_magic_bytes(data))
}

/// Gzip a byte slice
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let to_err = |e: io::Error| CompressionError::Compression {
        format: "gzip",
        source: e,
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(to_err)?;
    encoder.finish().map_err(to_err)
}

/// Pack bytes into a string with one char per byte (U+0000..=U+00FF)
pub fn bytes_to_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`bytes_to_latin1`]
pub fn latin1_to_bytes(s: &str) -> Result<Vec<u8>, CompressionError> {
    s.chars()
        .enumerate()
        .map(|(offset, c)| {
            u8::try_from(u32::from(c)).map_err(|_| CompressionError::InvalidByteString {
                offset,
                code: u32::from(c),
            })
        })
        .collect()
}

/// Gzip a UTF-8 string and pack it as a latin1 byte string
pub fn encode_blob(text: &str) -> Result<String, CompressionError> {
    Ok(bytes_to_latin1(&gzip(text.as_bytes())?))
}

/// Unpack a latin1 byte string and gunzip it back to UTF-8
pub fn decode_blob(blob: &str) -> Result<String, CompressionError> {
    let bytes = latin1_to_bytes(blob)?;
    if CompressionFormat::from_magic_bytes(&bytes) != CompressionFormat::Gzip {
        return Err(CompressionError::UnsupportedFormat(
            "blob is missing the gzip signature".to_string(),
        ));
    }
    let raw = decompress(&bytes, CompressionFormat::Gzip)?;
    Ok(String::from_utf8(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal gzip of "hello"
    const GZIP_HELLO: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9, 0xc9,
        0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x1f, 0x8b, 0x08, 0x00]),
            CompressionFormat::Gzip
        );
        assert_eq!(CompressionFormat::from_magic_bytes(b"[{}]"), CompressionFormat::None);

        // Too short for any magic
        assert_eq!(CompressionFormat::from_magic_bytes(&[0x1f]), CompressionFormat::None);
    }

    #[test]
    fn test_format_from_headers_and_query() {
        assert_eq!(CompressionFormat::from_content_encoding("gzip"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_content_encoding("br, GZIP"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_content_encoding("identity"), CompressionFormat::None);
        assert_eq!(CompressionFormat::from_query_flag("gzip-js"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_query_flag("base64"), CompressionFormat::None);
    }

    #[test]
    fn test_decompress_gzip() {
        assert_eq!(decompress(GZIP_HELLO, CompressionFormat::Gzip).unwrap(), b"hello");
        assert_eq!(decompress_auto(GZIP_HELLO).unwrap(), b"hello");
        assert_eq!(decompress_auto(b"plain").unwrap(), b"plain");
    }

    #[test]
    fn test_decompress_truncated_gzip_fails() {
        let truncated = &GZIP_HELLO[..12];
        assert!(decompress(truncated, CompressionFormat::Gzip).is_err());
    }

    #[test]
    fn test_latin1_preserves_every_byte() {
        let all: Vec<u8> = (0..=255u8).collect();
        let packed = bytes_to_latin1(&all);
        assert_eq!(packed.chars().count(), 256);
        assert_eq!(latin1_to_bytes(&packed).unwrap(), all);
    }

    #[test]
    fn test_latin1_rejects_wide_chars() {
        let err = latin1_to_bytes("ab\u{20ac}").unwrap_err();
        assert!(matches!(err, CompressionError::InvalidByteString { offset: 2, code: 0x20ac }));
    }

    #[test]
    fn test_blob_round_trip() {
        let text = r#"{"node":{"type":0,"childNodes":[]},"initialOffset":{"left":0,"top":0}}"#;
        let blob = encode_blob(text).unwrap();
        assert!(blob.starts_with('\u{1f}'));
        assert_eq!(decode_blob(&blob).unwrap(), text);
    }

    #[test]
    fn test_decode_blob_rejects_plain_text() {
        assert!(matches!(
            decode_blob("{\"not\":\"compressed\"}"),
            Err(CompressionError::UnsupportedFormat(_))
        ));
    }
}
