// src/error.rs

//! Crate-wide error type

use crate::compression::CompressionError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by capture, remapping and replay
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    /// Capture log missing or unreadable; aborts a replay run
    #[error("Cannot read capture log {}: {source}", path.display())]
    SourceIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("Failed to recompress field '{field}': {reason}")]
    Recompression { field: String, reason: String },

    #[error("Identity {original} already maps to {existing}, refusing to remap to {attempted}")]
    IdentityConflict {
        original: String,
        existing: String,
        attempted: String,
    },

    /// No snapshot events for a requested recording in the capture log
    #[error("Recording {0} not found in capture log")]
    RecordingNotFound(String),

    #[error("HTTP {status} from {url}")]
    Dispatch { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
