// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # mcptap CLI
//!
//! Entry point for the tool-protocol interceptor.
//!
//! ## Commands
//!
//! - `mcptap proxy --target <cmd>` — transparent stdio proxy with optional
//!   chaos injection; stdin/stdout carry the protocol, diagnostics go to
//!   stderr
//! - `mcptap stress --target <cmd>` — schema-driven stress sweep with a
//!   reliability score
//! - `mcptap serve` — HTTP API + websocket subscription transport
//! - `mcptap diff <baseline> <current>` — behavioral/latency drift between
//!   two recorded runs
//!
//! Exits zero on clean shutdown; nonzero on spawn failure, unparseable
//! chaos config, or missing required arguments.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{DiffArgs, ProxyArgs, ServeArgs, StressArgs};

/// Transparent interceptor for stdio tool servers
#[derive(Parser)]
#[command(name = "mcptap")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Journal database path
    #[arg(long, global = true, env = "MCPTAP_DB", default_value = "mcptap.db")]
    db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MCPTAP_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the transparent stdio proxy
    Proxy(ProxyArgs),

    /// Run a stress sweep against a tool server
    Stress(StressArgs),

    /// Serve the HTTP API and websocket transport
    Serve(ServeArgs),

    /// Compare two recorded runs
    Diff(DiffArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Proxy(args) => commands::proxy::execute(args, &cli.db).await,
        Commands::Stress(args) => commands::stress::execute(args, &cli.db).await,
        Commands::Serve(args) => commands::serve::execute(args, &cli.db).await,
        Commands::Diff(args) => commands::diff::execute(args, &cli.db).await,
    }
}

/// Initialize tracing on stderr; stdout belongs to the proxied protocol.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
