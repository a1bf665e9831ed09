// src/server/handlers.rs
//! Capture request handler

use crate::capture::{RecordKind, capture, parse_query};
use crate::server::SharedState;
use axum::{
    Json,
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::BTreeMap;

/// POST to any ingestion path
///
/// The request is recorded whether or not its body can be decoded. Only a
/// failure to write the log is reported to the client.
pub async fn capture_request(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let kind = RecordKind::from_path(uri.path());
    let query = query.as_deref().map(parse_query).unwrap_or_default();
    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();

    let record = capture(kind, body.to_vec(), headers, query);
    let events = record.events().len();

    let mut state = state.write().await;
    if let Err(e) = state.log.append(&record) {
        tracing::error!("Failed to append {} request to capture log: {}", kind, e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    tracing::debug!("Captured {} request to {} ({} events)", kind, uri.path(), events);
    Json(json!({"status": 1})).into_response()
}
