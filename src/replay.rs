// src/replay.rs
//! Replay runs
//!
//! A run replays any number of recordings from one capture log. Each
//! recording goes through two stages:
//!
//! 1. **Prepare** (synchronous): select the recording's snapshot events and
//!    its correlated application events, repair snapshot DOM trees, resolve
//!    identities through the run-wide [`IdentityMapping`], shift times and
//!    recompress blobs.
//! 2. **Dispatch** (async): send the snapshot stream, then the application
//!    events.
//!
//! All recordings are driven concurrently on one task. The identity mapping
//! is only borrowed inside the prepare stage, so no borrow is ever held
//! across an await point.

use crate::capture::snapshot::{is_snapshot_event, snapshot_items_mut};
use crate::capture::{CapturedRecord, RecordKind};
use crate::capture_log;
use crate::config::{ReplayConfig, RunOptions};
use crate::dispatch::{DEFAULT_CLIENT_VERSION, Dispatcher, Transport};
use crate::error::{Error, Result};
use crate::remap::{IdentityMapping, Remapper, TimeShift, earliest_timestamp, resolve_offset};
use crate::repair::repair_snapshot;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Final state of one recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    /// Every request was accepted
    Dispatched,
    /// Transformed and framed, nothing sent
    DryRun,
    /// The recording stopped at the given error
    Failed(String),
}

/// An event dropped from the replay because it could not be transformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    /// Stream the event belonged to
    pub stream: RecordKind,
    /// Position within that stream, in capture order
    pub index: usize,
    pub reason: String,
}

/// Outcome and counts for one recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingReport {
    pub recording_id: String,
    pub target_session_id: String,
    pub outcome: RecordingOutcome,
    /// Snapshot events framed for dispatch
    pub snapshot_events: usize,
    /// Application events framed for dispatch
    pub app_events: usize,
    /// Requests accepted by the transport
    pub requests: usize,
    /// Applied time shift in milliseconds
    pub delta_ms: i64,
    pub event_failures: Vec<EventFailure>,
}

impl RecordingReport {
    fn new(config: &ReplayConfig) -> Self {
        Self {
            recording_id: config.recording_id.clone(),
            target_session_id: config.target_session_id.clone(),
            outcome: RecordingOutcome::DryRun,
            snapshot_events: 0,
            app_events: 0,
            requests: 0,
            delta_ms: 0,
            event_failures: Vec::new(),
        }
    }

    fn failed(mut self, error: &Error) -> Self {
        warn!("Recording {} failed: {}", self.recording_id, error);
        self.outcome = RecordingOutcome::Failed(error.to_string());
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RecordingOutcome::Failed(_))
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// One report per configured recording, in configuration order
    pub recordings: Vec<RecordingReport>,
    /// Distinct original ids mapped during the run
    pub identities: usize,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &RecordingReport> {
        self.recordings.iter().filter(|r| r.is_failed())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// True when no recording failed and no event was dropped
    pub fn is_clean(&self) -> bool {
        self.recordings
            .iter()
            .all(|r| !r.is_failed() && r.event_failures.is_empty())
    }
}

/// A recording after the synchronous transform stage
struct Prepared {
    snapshots: Vec<Value>,
    events: Vec<Value>,
    ver: String,
}

/// One replay run over a set of recordings
pub struct ReplayRun {
    configs: Vec<ReplayConfig>,
    options: RunOptions,
    transport: Arc<dyn Transport>,
    anonymous_id: String,
}

impl ReplayRun {
    pub fn new(configs: Vec<ReplayConfig>, options: RunOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            configs,
            options,
            transport,
            anonymous_id: Uuid::now_v7().to_string(),
        }
    }

    /// Use a fixed anonymous identity instead of a generated one
    pub fn with_anonymous_id(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = anonymous_id.into();
        self
    }

    /// Identity given to every unidentified visitor in this run
    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    /// Read a capture log and replay from it
    ///
    /// A missing or unreadable log aborts the run.
    pub async fn run_from_log(&self, path: &Path) -> Result<RunReport> {
        let records = capture_log::read_all(path)?;
        info!("Loaded {} captured requests from {}", records.len(), path.display());
        Ok(self.run(&records).await)
    }

    /// Replay every configured recording from `records`
    pub async fn run(&self, records: &[CapturedRecord]) -> RunReport {
        let mapping = RefCell::new(IdentityMapping::new());

        let recordings = join_all(
            self.configs
                .iter()
                .map(|config| self.replay_recording(config, records, &mapping)),
        )
        .await;

        let report = RunReport {
            recordings,
            identities: mapping.borrow().len(),
        };
        info!(
            "Replay finished: {} recordings, {} failed, {} identities mapped",
            report.recordings.len(),
            report.failed_count(),
            report.identities
        );
        report
    }

    async fn replay_recording(
        &self,
        config: &ReplayConfig,
        records: &[CapturedRecord],
        mapping: &RefCell<IdentityMapping>,
    ) -> RecordingReport {
        let mut report = RecordingReport::new(config);

        let prepared = {
            let mut mapping = mapping.borrow_mut();
            match self.prepare(config, records, &mut mapping, &mut report) {
                Ok(prepared) => prepared,
                Err(e) => return report.failed(&e),
            }
        };

        report.snapshot_events = prepared.snapshots.len();
        report.app_events = prepared.events.len();

        let dispatcher = Dispatcher::new(
            self.transport.clone(),
            config.target_host.clone(),
            config.project_key.clone(),
            self.options,
        );
        let now_ms = Utc::now().timestamp_millis();

        if let Err(e) = dispatcher
            .send_recording(&prepared.snapshots, &prepared.ver, now_ms)
            .await
        {
            return report.failed(&e);
        }
        if !self.options.dry_run {
            report.requests += 1;
        }

        match dispatcher
            .send_events(&prepared.events, &prepared.ver, now_ms)
            .await
        {
            Ok(deliveries) if !self.options.dry_run => report.requests += deliveries.len(),
            Ok(_) => {}
            Err(e) => return report.failed(&e),
        }

        report.outcome = if self.options.dry_run {
            RecordingOutcome::DryRun
        } else {
            RecordingOutcome::Dispatched
        };
        info!(
            "Recording {} -> {}: {} snapshot events, {} app events, {} requests",
            report.recording_id,
            report.target_session_id,
            report.snapshot_events,
            report.app_events,
            report.requests
        );
        report
    }

    fn prepare(
        &self,
        config: &ReplayConfig,
        records: &[CapturedRecord],
        mapping: &mut IdentityMapping,
        report: &mut RecordingReport,
    ) -> Result<Prepared> {
        let mut snapshots: Vec<Value> = Vec::new();
        let mut events: Vec<Value> = Vec::new();
        let mut ver: Option<&str> = None;

        for record in records {
            // Offsets count back from when the client sent the request
            let sent_at = record.original_timestamp.unwrap_or(record.captured_at);
            for event in record.events() {
                if session_of(event) != Some(config.recording_id.as_str()) {
                    continue;
                }
                let mut event = event.clone();
                resolve_offset(&mut event, sent_at);
                if is_snapshot_event(&event) {
                    snapshots.push(event);
                    if ver.is_none() && record.kind == RecordKind::Recording {
                        ver = record.client_version();
                    }
                } else {
                    events.push(event);
                }
            }
        }

        if snapshots.is_empty() {
            return Err(Error::RecordingNotFound(config.recording_id.clone()));
        }
        debug!(
            "Recording {}: {} snapshot events, {} correlated events",
            config.recording_id,
            snapshots.len(),
            events.len()
        );

        mapping.assign(&config.recording_id, &config.target_session_id)?;

        let mut repaired = 0;
        for snapshot in &mut snapshots {
            for item in snapshot_items_mut(snapshot) {
                repaired += repair_snapshot(item);
            }
        }
        if repaired > 0 {
            debug!("Recording {}: repaired {} DOM nodes", config.recording_id, repaired);
        }

        let earliest = earliest_timestamp(snapshots.iter().chain(events.iter()));
        let shift = match earliest.and_then(|ms| TimeShift::between(ms, config.target_timestamp)) {
            Some(shift) => shift,
            None => {
                warn!("Recording {} has no usable timestamps, not shifting", config.recording_id);
                TimeShift::new(0)
            }
        };
        report.delta_ms = shift.delta_ms();

        let remapper = Remapper::new(config.clone(), self.anonymous_id.clone(), shift);
        let snapshots = remap_stream(&remapper, &snapshots, RecordKind::Recording, mapping, report);
        let events = remap_stream(&remapper, &events, RecordKind::Event, mapping, report);

        Ok(Prepared {
            snapshots,
            events,
            ver: ver.unwrap_or(DEFAULT_CLIENT_VERSION).to_string(),
        })
    }
}

/// Remap a stream, dropping and reporting events that fail
fn remap_stream(
    remapper: &Remapper,
    events: &[Value],
    stream: RecordKind,
    mapping: &mut IdentityMapping,
    report: &mut RecordingReport,
) -> Vec<Value> {
    let mut remapped = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        match remapper.remap_event(event, mapping) {
            Ok(event) => remapped.push(event),
            Err(e) => {
                warn!(
                    "Dropping {} event {} of recording {}: {}",
                    stream, index, report.recording_id, e
                );
                report.event_failures.push(EventFailure {
                    stream,
                    index,
                    reason: e.to_string(),
                });
            }
        }
    }
    remapped
}

fn session_of(event: &Value) -> Option<&str> {
    event
        .get("properties")
        .and_then(|p| p.get("$session_id"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture;
    use crate::compression::gzip;
    use crate::dispatch::WireRequest;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        requests: Mutex<Vec<WireRequest>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(&self, request: WireRequest) -> Result<u16> {
            self.requests.lock().unwrap().push(request);
            Ok(200)
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn config(recording_id: &str, target_session_id: &str) -> ReplayConfig {
        ReplayConfig {
            recording_id: recording_id.to_string(),
            target_user_id: "demo@example.com".to_string(),
            target_session_id: target_session_id.to_string(),
            target_timestamp: DateTime::from_timestamp_millis(1_800_000_000_000).unwrap(),
            project_key: "phc_demo".to_string(),
            target_host: "http://ingest.local".to_string(),
        }
    }

    fn record(path: &str, body: Value) -> CapturedRecord {
        let mut query = BTreeMap::new();
        query.insert("compression".to_string(), "gzip-js".to_string());
        query.insert("ver".to_string(), "1.99.0".to_string());
        capture(
            RecordKind::from_path(path),
            gzip(body.to_string().as_bytes()).unwrap(),
            BTreeMap::new(),
            query,
        )
    }

    fn snapshot(session: &str, timestamp: i64) -> Value {
        json!({
            "event": "$snapshot",
            "properties": {
                "$session_id": session,
                "$window_id": "W",
                "$snapshot_data": [{"type": 2, "timestamp": timestamp, "data": {"node": {"type": 2, "tagName": "div"}}}]
            }
        })
    }

    #[tokio::test]
    async fn test_prepare_repairs_and_shifts() {
        let records = vec![record("/s/", json!([snapshot("A", 1_000), snapshot("A", 4_000)]))];
        let transport = Arc::new(MockTransport::default());
        let run = ReplayRun::new(vec![config("A", "B")], RunOptions::default(), transport.clone());

        let report = run.run(&records).await;

        let recording = &report.recordings[0];
        assert_eq!(recording.outcome, RecordingOutcome::Dispatched);
        assert_eq!(recording.snapshot_events, 2);
        assert_eq!(recording.delta_ms, 1_800_000_000_000 - 1_000);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("ver=1.99.0"));
    }

    #[tokio::test]
    async fn test_missing_recording_fails_alone() {
        let records = vec![record("/s/", json!([snapshot("A", 1_000)]))];
        let transport = Arc::new(MockTransport::default());
        let run = ReplayRun::new(
            vec![config("A", "B"), config("missing", "M")],
            RunOptions::default(),
            transport,
        );

        let report = run.run(&records).await;

        assert_eq!(report.recordings[0].outcome, RecordingOutcome::Dispatched);
        assert!(report.recordings[1].is_failed());
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_target_session_fails_recording() {
        let records = vec![record("/s/", json!([snapshot("A", 1_000), snapshot("C", 2_000)]))];
        let transport = Arc::new(MockTransport::default());
        let run = ReplayRun::new(
            vec![config("A", "B"), config("C", "B")],
            RunOptions::default(),
            transport,
        );

        let report = run.run(&records).await;

        assert_eq!(report.recordings[0].outcome, RecordingOutcome::Dispatched);
        assert!(matches!(
            &report.recordings[1].outcome,
            RecordingOutcome::Failed(reason) if reason.contains("already")
        ));
    }

    #[tokio::test]
    async fn test_unrecompressable_event_is_dropped_and_reported() {
        let mut bad = json!({"event": "$pageview", "properties": {"$session_id": "A"}});
        bad["properties"]["$compressed"] = json!({"missing": "gzip-latin1"});
        let records = vec![
            record("/s/", json!([snapshot("A", 1_000)])),
            record("/e/", json!([bad, {"event": "$pageleave", "properties": {"$session_id": "A"}}])),
        ];
        let transport = Arc::new(MockTransport::default());
        let run = ReplayRun::new(vec![config("A", "B")], RunOptions::default(), transport);

        let report = run.run(&records).await;

        let recording = &report.recordings[0];
        assert_eq!(recording.outcome, RecordingOutcome::Dispatched);
        assert_eq!(recording.app_events, 1);
        assert_eq!(recording.event_failures.len(), 1);
        assert_eq!(recording.event_failures[0].stream, RecordKind::Event);
        assert_eq!(recording.event_failures[0].index, 0);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_anonymous_id_shared_across_recordings() {
        let records = vec![
            record("/s/", json!([snapshot("A", 1_000), snapshot("C", 2_000)])),
            record(
                "/e/",
                json!([
                    {"event": "$pageview", "distinct_id": "anon-1", "properties": {"$session_id": "A", "$is_identified": false}},
                    {"event": "$pageview", "distinct_id": "anon-2", "properties": {"$session_id": "C", "$is_identified": false}}
                ]),
            ),
        ];
        let transport = Arc::new(MockTransport::default());
        let run = ReplayRun::new(
            vec![config("A", "B"), config("C", "D")],
            RunOptions::default(),
            transport.clone(),
        )
        .with_anonymous_id("anon-run");

        run.run(&records).await;

        let requests = transport.requests.lock().unwrap();
        let batches: Vec<Value> = requests
            .iter()
            .filter(|r| r.url.ends_with("/batch/"))
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();
        assert_eq!(batches.len(), 2);
        for batch in batches {
            assert_eq!(batch["batch"][0]["distinct_id"], "anon-run");
        }
    }
}
