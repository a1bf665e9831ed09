// src/lib.rs

//! capreplay: capture and replay of analytics ingestion traffic
//!
//! Captures the event and session-recording requests a web client sends,
//! stores them in an append-only log, and later replays transformed copies
//! under new session/user identities and shifted timestamps to build
//! realistic demo datasets.
//!
//! # Pipeline
//!
//! - Capture: raw request bytes kept wire-exact, payload decompressed and
//!   nested snapshot blobs expanded in place ([`capture`])
//! - Storage: newline-delimited JSON capture log ([`capture_log`])
//! - Repair: element nodes missing `attributes` are fixed ([`repair`])
//! - Remap: identities, timestamps, recompression ([`remap`])
//! - Dispatch: wire framing and transport ([`dispatch`]), orchestrated per
//!   run by [`replay::ReplayRun`]

pub mod capture;
pub mod capture_log;
pub mod compression;
pub mod config;
pub mod dispatch;
mod error;
pub mod remap;
pub mod repair;
pub mod replay;

#[cfg(feature = "server")]
pub mod server;

pub use capture::{CapturedRecord, RecordKind};
pub use config::{EventMode, ReplayConfig, RunFile, RunOptions};
pub use error::{Error, Result};
pub use remap::IdentityMapping;
pub use replay::{RecordingOutcome, RecordingReport, ReplayRun, RunReport};
