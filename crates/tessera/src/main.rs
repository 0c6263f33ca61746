//! Tessera - session manager host
//!
//! Main entry point for the Tessera CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, dump, run, store};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tessera - session manager with persistent stores and idle expiration
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery (also read from TESSERA_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session manager until interrupted
    Run(run::RunArgs),

    /// Inspect or maintain the configured session store
    Store(store::StoreArgs),

    /// Decode a bulk persistence file
    Dump(dump::DumpArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = tessera_config::discover(cli.config.as_deref())?;
    let logging = loaded.config.logging_section();

    // Console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "tessera=debug,tessera_session=debug,tessera_config=debug,info"
    } else {
        "tessera=info,tessera_session=info,warn"
    };
    let file_filter = logging
        .file_filter
        .clone()
        .unwrap_or_else(|| "tessera=trace,tessera_session=trace,info".to_string());

    let log_dir = logging
        .directory
        .clone()
        .or_else(|| tessera_config::xdg_config_dir().map(|d| d.join("logs")))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tessera.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(file_filter)),
        )
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Store(args) => store::run(args, &ctx).await,
        Commands::Dump(args) => dump::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
