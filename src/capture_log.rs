// src/capture_log.rs

//! Append-only capture log
//!
//! One [`CapturedRecord`] per line, serialized as JSON (NDJSON). Records are
//! only ever appended; nothing rewrites or truncates the file.
//!
//! Readers are tolerant of a torn final line (a crash mid-append) and of
//! malformed lines in general: those are skipped with a warning. A missing or
//! unreadable file is a [`Error::SourceIo`], which aborts a replay run.

use crate::capture::{CapturedRecord, RecordKind};
use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append handle on a capture log file
pub struct CaptureLog {
    path: PathBuf,
    file: File,
    appended: u64,
}

impl CaptureLog {
    /// Open (or create) a log for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;

        Ok(Self {
            path,
            file,
            appended: 0,
        })
    }

    /// Get the log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Append a record and flush it to the OS
    pub fn append(&mut self, record: &CapturedRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::IoError(format!("Failed to serialize capture record: {e}")))?;
        // One write per record keeps concurrent appenders line-atomic
        let mut line = json.into_bytes();
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        self.appended += 1;
        debug!("Appended {} record to {}", record.kind, self.path.display());
        Ok(())
    }
}

/// Read every valid record from a log file
pub fn read_all(path: &Path) -> Result<Vec<CapturedRecord>> {
    let file = File::open(path).map_err(|source| Error::SourceIo {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for (line_num, line_result) in BufReader::new(file).lines().enumerate() {
        let line = line_result.map_err(|source| Error::SourceIo {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<CapturedRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    e
                );
            }
        }
    }

    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Summary of one session found in a capture log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub recording_events: usize,
    pub app_events: usize,
}

/// List sessions present in a set of records, most snapshot events first
pub fn summarize_sessions(records: &[CapturedRecord]) -> Vec<SessionSummary> {
    let mut sessions: Vec<SessionSummary> = Vec::new();

    for record in records {
        for event in record.events() {
            let Some(session_id) = event
                .get("properties")
                .and_then(|p| p.get("$session_id"))
                .and_then(|s| s.as_str())
            else {
                continue;
            };

            let index = match sessions.iter().position(|s| s.session_id == session_id) {
                Some(index) => index,
                None => {
                    sessions.push(SessionSummary {
                        session_id: session_id.to_string(),
                        recording_events: 0,
                        app_events: 0,
                    });
                    sessions.len() - 1
                }
            };

            match record.kind {
                RecordKind::Recording => sessions[index].recording_events += 1,
                RecordKind::Event => sessions[index].app_events += 1,
            }
        }
    }

    sessions.sort_by(|a, b| b.recording_events.cmp(&a.recording_events));
    sessions
}
