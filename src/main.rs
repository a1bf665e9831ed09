// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { bind, log }) => commands::cmd_serve(&bind, &log),
        Some(Commands::Capture {
            path,
            file,
            query,
            headers,
            log,
        }) => commands::cmd_capture(&path, &file, &query, &headers, &log),
        Some(Commands::Replay {
            config,
            log,
            dry_run,
            event_mode,
        }) => commands::cmd_replay(&config, log.as_deref(), dry_run, event_mode),
        Some(Commands::Sessions { log }) => commands::cmd_sessions(&log),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
