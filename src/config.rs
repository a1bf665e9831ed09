// src/config.rs
//! Replay run configuration
//!
//! A run is described by a TOML file:
//!
//! ```toml
//! project_key = "phc_demo"
//! target_host = "https://ingest.example.com"
//! log = "capture.ndjson"
//! dry_run = false
//! event_mode = "batch"
//!
//! [[recording]]
//! recording_id = "018f2c1e-0000-7000-8000-000000000001"
//! target_user_id = "demo@example.com"
//! target_timestamp = "2026-10-01T12:00:00Z"
//! # target_session_id = "..."   (generated when omitted)
//! ```
//!
//! The file is turned into one immutable [`ReplayConfig`] per recording plus
//! run-wide [`RunOptions`]; components take those by value and never see the
//! file again.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Everything needed to replay one recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Original session id of the recording in the capture log
    pub recording_id: String,
    /// Identity substituted for identified visitors
    pub target_user_id: String,
    /// Session id the replayed recording and its events converge on
    pub target_session_id: String,
    /// Where the earliest snapshot lands after the time shift
    pub target_timestamp: DateTime<Utc>,
    /// Project API key sent with every payload
    pub project_key: String,
    /// Ingestion base URL
    pub target_host: String,
}

/// How application events are framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMode {
    /// One JSON body to the batch endpoint, flagged as historical
    #[default]
    Batch,
    /// One gzip body per event to the single-event endpoint
    Single,
}

impl std::str::FromStr for EventMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "batch" => Ok(Self::Batch),
            "single" => Ok(Self::Single),
            other => Err(format!("unknown event mode '{other}' (expected batch or single)")),
        }
    }
}

/// Run-wide switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Transform and frame everything but skip the network call
    pub dry_run: bool,
    pub event_mode: EventMode,
}

/// One `[[recording]]` entry of a run file
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingTarget {
    pub recording_id: String,
    pub target_user_id: String,
    #[serde(default)]
    pub target_session_id: Option<String>,
    pub target_timestamp: DateTime<Utc>,
}

/// TOML run file
#[derive(Debug, Clone, Deserialize)]
pub struct RunFile {
    pub project_key: String,
    pub target_host: String,

    /// Capture log to read
    #[serde(default = "default_log")]
    pub log: PathBuf,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub event_mode: EventMode,

    #[serde(default, rename = "recording")]
    pub recordings: Vec<RecordingTarget>,
}

fn default_log() -> PathBuf {
    PathBuf::from("capture.ndjson")
}

impl RunFile {
    /// Load and validate a run file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let run = Self::parse(&content)?;

        // Relative log paths are relative to the run file
        let run = match path.parent() {
            Some(dir) if run.log.is_relative() => Self {
                log: dir.join(&run.log),
                ..run
            },
            _ => run,
        };
        Ok(run)
    }

    /// Parse and validate run file contents
    pub fn parse(content: &str) -> Result<Self> {
        let run: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid run file: {e}")))?;
        run.validate()?;
        Ok(run)
    }

    fn validate(&self) -> Result<()> {
        if self.project_key.trim().is_empty() {
            return Err(Error::ConfigError("project_key must not be empty".to_string()));
        }

        let host = url::Url::parse(&self.target_host)
            .map_err(|e| Error::ConfigError(format!("Invalid target_host '{}': {e}", self.target_host)))?;
        if !matches!(host.scheme(), "http" | "https") {
            return Err(Error::ConfigError(format!(
                "target_host must be http or https, got {}",
                host.scheme()
            )));
        }

        if self.recordings.is_empty() {
            return Err(Error::ConfigError("no [[recording]] entries".to_string()));
        }
        for target in &self.recordings {
            if target.recording_id.trim().is_empty() {
                return Err(Error::ConfigError("recording_id must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Run-wide options from the file
    pub fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            event_mode: self.event_mode,
        }
    }

    /// One config per recording; missing session ids are generated here
    pub fn replay_configs(&self) -> Vec<ReplayConfig> {
        self.recordings
            .iter()
            .map(|target| ReplayConfig {
                recording_id: target.recording_id.clone(),
                target_user_id: target.target_user_id.clone(),
                target_session_id: target
                    .target_session_id
                    .clone()
                    .unwrap_or_else(|| Uuid::now_v7().to_string()),
                target_timestamp: target.target_timestamp,
                project_key: self.project_key.clone(),
                target_host: self.target_host.trim_end_matches('/').to_string(),
            })
            .collect()
    }
}
