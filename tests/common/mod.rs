// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use capreplay::capture::{CapturedRecord, RecordKind, capture};
use capreplay::compression::{CompressionFormat, decompress, encode_blob, gzip};
use capreplay::dispatch::{Transport, WireRequest};
use capreplay::{ReplayConfig, Result};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Epoch ms of the first snapshot in [`recording_events`]
pub const FIRST_SNAPSHOT_MS: i64 = 1_700_000_000_000;

/// Transport that records every request and answers with a fixed status,
/// or a per-host override
#[derive(Default)]
pub struct MockTransport {
    overrides: Vec<(String, u16)>,
    requests: Mutex<Vec<WireRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `status` for every URL containing `host`
    pub fn failing(host: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            overrides: vec![(host.to_string(), status)],
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<WireRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: WireRequest) -> Result<u16> {
        let status = self
            .overrides
            .iter()
            .find(|(host, _)| request.url.contains(host.as_str()))
            .map_or(200, |(_, status)| *status);
        self.requests.lock().unwrap().push(request);
        Ok(status)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn target_timestamp() -> DateTime<Utc> {
    "2026-10-01T12:00:00Z".parse().unwrap()
}

pub fn replay_config(recording_id: &str, target_session_id: &str, host: &str) -> ReplayConfig {
    ReplayConfig {
        recording_id: recording_id.to_string(),
        target_user_id: "demo-user@example.com".to_string(),
        target_session_id: target_session_id.to_string(),
        target_timestamp: target_timestamp(),
        project_key: "phc_demo".to_string(),
        target_host: host.to_string(),
    }
}

/// Full DOM snapshot whose `<html>` element lacks `attributes`
pub fn dom_tree() -> Value {
    json!({
        "node": {
            "type": 0,
            "id": 1,
            "childNodes": [
                {"type": 1, "id": 2, "name": "html"},
                {"type": 2, "id": 3, "tagName": "html", "childNodes": [
                    {"type": 2, "id": 4, "tagName": "body", "attributes": {"class": "demo"}, "childNodes": [
                        {"type": 3, "id": 5, "textContent": "Welcome back"}
                    ]}
                ]}
            ]
        },
        "initialOffset": {"left": 0, "top": 0}
    })
}

pub fn mutation_adds() -> Value {
    json!([{"parentId": 4, "nextId": null, "node": {"type": 2, "id": 6, "tagName": "div"}}])
}

/// A `$snapshot` event for `session` carrying one snapshot `item`
pub fn recording_event_with(session: &str, item: Value) -> Value {
    json!({
        "event": "$snapshot",
        "properties": {
            "$session_id": session,
            "$window_id": format!("{session}-window"),
            "distinct_id": "device-123",
            "$device_id": "device-123",
            "$snapshot_data": [item]
        }
    })
}

/// Three snapshot events: compressed full snapshot, compressed mutation,
/// and a mouse move
pub fn recording_events(session: &str) -> Vec<Value> {
    vec![
        recording_event_with(
            session,
            json!({"type": 2, "timestamp": FIRST_SNAPSHOT_MS, "data": encode_blob(&dom_tree().to_string()).unwrap()}),
        ),
        recording_event_with(
            session,
            json!({"type": 3, "timestamp": FIRST_SNAPSHOT_MS + 500, "data": {
                "source": 0,
                "adds": encode_blob(&mutation_adds().to_string()).unwrap(),
                "removes": [],
                "texts": [],
                "attributes": []
            }}),
        ),
        recording_event_with(
            session,
            json!({"type": 3, "timestamp": FIRST_SNAPSHOT_MS + 2_500, "data": {"source": 1, "positions": [{"x": 10, "y": 20, "id": 4, "timeOffset": 0}]}}),
        ),
    ]
}

/// Two application events: one identified, one not
pub fn app_events(session: &str) -> Vec<Value> {
    vec![
        json!({
            "event": "$pageview",
            "uuid": "0190-pageview",
            "timestamp": "2023-11-14T22:13:21.000Z",
            "distinct_id": "person@real.com",
            "properties": {
                "$session_id": session,
                "$window_id": format!("{session}-window"),
                "distinct_id": "person@real.com",
                "$device_id": "device-123",
                "$is_identified": true,
                "$current_url": "https://demo.example.com/",
                "token": "phc_original"
            }
        }),
        json!({
            "event": "$autocapture",
            "uuid": "0190-click",
            "timestamp": "2023-11-14T22:13:22.250Z",
            "properties": {
                "$session_id": session,
                "$window_id": format!("{session}-window"),
                "distinct_id": "device-123",
                "$device_id": "device-123",
                "$is_identified": false,
                "$event_type": "click"
            }
        }),
    ]
}

fn gzip_query() -> BTreeMap<String, String> {
    let mut query = BTreeMap::new();
    query.insert("compression".to_string(), "gzip-js".to_string());
    query.insert("ver".to_string(), "1.130.2".to_string());
    query.insert("_".to_string(), FIRST_SNAPSHOT_MS.to_string());
    query
}

/// A captured `/s/` request carrying `events`
pub fn recording_record(events: &[Value]) -> CapturedRecord {
    let body = Value::Array(events.to_vec()).to_string();
    capture(
        RecordKind::Recording,
        gzip(body.as_bytes()).unwrap(),
        BTreeMap::new(),
        gzip_query(),
    )
}

/// A captured `/e/` request carrying `events`
pub fn event_record(events: &[Value]) -> CapturedRecord {
    let body = Value::Array(events.to_vec()).to_string();
    capture(
        RecordKind::Event,
        gzip(body.as_bytes()).unwrap(),
        BTreeMap::new(),
        gzip_query(),
    )
}

/// The three recording events and two app events for `session`
pub fn session_records(session: &str) -> Vec<CapturedRecord> {
    vec![
        recording_record(&recording_events(session)),
        event_record(&app_events(session)),
    ]
}

pub fn gunzip_json(body: &[u8]) -> Value {
    let bytes = decompress(body, CompressionFormat::Gzip).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
