// src/commands.rs
//! Command handlers for the capreplay CLI

use anyhow::{Context, Result, bail};
use capreplay::capture::{RecordKind, capture, parse_query};
use capreplay::capture_log::{self, CaptureLog};
use capreplay::config::{EventMode, RunFile};
use capreplay::dispatch::HttpTransport;
use capreplay::replay::{RecordingOutcome, ReplayRun};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Run the capture server until interrupted
#[cfg(feature = "server")]
pub fn cmd_serve(bind: &str, log: &Path) -> Result<()> {
    use capreplay::server::{ServerConfig, run_server};

    let bind_addr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {bind}"))?;
    let config = ServerConfig {
        bind_addr,
        log_path: log.to_path_buf(),
    };

    runtime()?.block_on(run_server(config))
}

#[cfg(not(feature = "server"))]
pub fn cmd_serve(_bind: &str, _log: &Path) -> Result<()> {
    bail!("capreplay was built without the `server` feature")
}

/// Append one request body from disk to the capture log
pub fn cmd_capture(path: &str, file: &Path, query: &str, headers: &[String], log: &Path) -> Result<()> {
    let body = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let mut header_map = BTreeMap::new();
    for header in headers {
        let Some((name, value)) = header.split_once('=') else {
            bail!("Invalid header '{header}', expected NAME=VALUE");
        };
        header_map.insert(name.trim().to_string(), value.trim().to_string());
    }

    let kind = RecordKind::from_path(path);
    let record = capture(kind, body, header_map, parse_query(query));
    let events = record.events().len();

    let mut writer = CaptureLog::open(log)?;
    writer.append(&record)?;

    println!(
        "Captured {} request ({} events, {} bytes) to {}",
        kind,
        events,
        record.raw.len(),
        log.display()
    );
    Ok(())
}

/// Replay the recordings named in a run file
pub fn cmd_replay(
    config: &Path,
    log: Option<&Path>,
    dry_run: bool,
    event_mode: Option<EventMode>,
) -> Result<()> {
    let run_file = RunFile::load(config)
        .with_context(|| format!("Failed to load run file {}", config.display()))?;

    let mut options = run_file.options();
    options.dry_run |= dry_run;
    if let Some(mode) = event_mode {
        options.event_mode = mode;
    }
    let log_path = log.map_or_else(|| run_file.log.clone(), Path::to_path_buf);

    info!(
        "Replaying {} recordings from {} to {}{}",
        run_file.recordings.len(),
        log_path.display(),
        run_file.target_host,
        if options.dry_run { " (dry run)" } else { "" }
    );

    let transport = Arc::new(HttpTransport::new()?);
    let run = ReplayRun::new(run_file.replay_configs(), options, transport);
    let report = runtime()?.block_on(run.run_from_log(&log_path))?;

    for recording in &report.recordings {
        let status = match &recording.outcome {
            RecordingOutcome::Dispatched => "dispatched".to_string(),
            RecordingOutcome::DryRun => "dry run".to_string(),
            RecordingOutcome::Failed(reason) => format!("FAILED: {reason}"),
        };
        println!(
            "{} -> {}: {} ({} snapshot events, {} app events, {} requests)",
            recording.recording_id,
            recording.target_session_id,
            status,
            recording.snapshot_events,
            recording.app_events,
            recording.requests
        );
        for failure in &recording.event_failures {
            println!("  dropped {} event #{}: {}", failure.stream, failure.index, failure.reason);
        }
    }

    let failed = report.failed_count();
    if failed > 0 {
        bail!("{} of {} recordings failed", failed, report.recordings.len());
    }
    Ok(())
}

/// Print the sessions present in a capture log
pub fn cmd_sessions(log: &Path) -> Result<()> {
    let records = capture_log::read_all(log)?;
    let sessions = capture_log::summarize_sessions(&records);

    if sessions.is_empty() {
        println!("No sessions in {}", log.display());
        return Ok(());
    }

    println!("{:<40} {:>10} {:>10}", "SESSION", "SNAPSHOTS", "EVENTS");
    for session in sessions {
        println!(
            "{:<40} {:>10} {:>10}",
            session.session_id, session.recording_events, session.app_events
        );
    }
    Ok(())
}
