// src/server/routes.rs
//! Axum router for the capture server

use crate::server::handlers::capture_request;
use crate::server::{MAX_BODY_BYTES, SharedState};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

/// Ingestion paths clients post to
const CAPTURE_PATHS: [&str; 8] = ["/e/", "/e", "/i/v0/e/", "/batch/", "/batch", "/s/", "/s", "/capture/"];

/// Create the capture router
pub fn create_router(state: SharedState) -> Router {
    // Browsers post cross-origin from the demo site
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new().route("/health", get(health_check));
    for path in CAPTURE_PATHS {
        router = router.route(path, post(capture_request));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
