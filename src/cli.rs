// src/cli.rs
//! CLI definitions for capreplay
//!
//! Argument parsing only; the command implementations live in `commands`.

use capreplay::config::EventMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "capreplay")]
#[command(version)]
#[command(about = "Capture analytics ingestion traffic and replay it under new identities", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the capture endpoint and record every ingestion request
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8010")]
        bind: String,

        /// Capture log to append to
        #[arg(short, long, default_value = "capture.ndjson")]
        log: PathBuf,
    },

    /// Record a request body from a file, as if it had been posted
    Capture {
        /// Request path the body was posted to (e.g. /s/ or /batch/)
        path: String,

        /// File holding the raw request body
        file: PathBuf,

        /// Query string sent with the request
        #[arg(short, long, default_value = "")]
        query: String,

        /// Extra request headers as NAME=VALUE
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Capture log to append to
        #[arg(short, long, default_value = "capture.ndjson")]
        log: PathBuf,
    },

    /// Replay recordings described by a run file
    Replay {
        /// TOML run file
        config: PathBuf,

        /// Capture log to read instead of the one named in the run file
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Transform and frame everything without sending
        #[arg(long)]
        dry_run: bool,

        /// How application events are sent: batch or single
        #[arg(long)]
        event_mode: Option<EventMode>,
    },

    /// List sessions found in a capture log
    Sessions {
        /// Capture log to read
        #[arg(short, long, default_value = "capture.ndjson")]
        log: PathBuf,
    },
}
