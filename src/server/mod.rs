// src/server/mod.rs
//! Capture endpoint server
//!
//! Accepts the ingestion POSTs a web client sends (`/e/`, `/batch/`, `/s/`
//! and friends), records each one to the capture log and answers the way an
//! ingestion endpoint would. Nothing is forwarded anywhere.

mod handlers;
mod routes;

pub use routes::create_router;

use crate::capture_log::CaptureLog;
use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Capture log to append to
    pub log_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8010)),
            log_path: PathBuf::from("capture.ndjson"),
        }
    }
}

/// Shared server state
pub struct ServerState {
    pub config: ServerConfig,
    pub log: CaptureLog,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> crate::Result<Self> {
        let log = CaptureLog::open(&config.log_path)?;
        Ok(Self { config, log })
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

/// Start the capture server
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting capture server on {}", config.bind_addr);
    tracing::info!("Capture log: {:?}", config.log_path);

    let state = Arc::new(RwLock::new(ServerState::new(config.clone())?));
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Capture server is ready");

    axum::serve(listener, app).await?;

    let appended = state.read().await.log.appended();
    tracing::info!("Capture server stopped after {} requests", appended);
    Ok(())
}
