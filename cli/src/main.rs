// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # LIFT Copilot CLI
//!
//! The `lift` binary runs the experiment copilot.
//!
//! ## Architecture
//!
//! This CLI follows a **CLI-first** design with daemon capabilities:
//!
//! - **Default mode**: CLI commands delegate to a running daemon over HTTP
//! - **Daemon mode**: `lift --daemon` runs the intake/monitor workers and API
//! - **Detection**: Check PID file + HTTP health check
//!
//! ## Commands
//!
//! - `lift daemon start|stop|status` - Manage daemon lifecycle
//! - `lift experiment submit|list|status|stop|watch|template` - Experiment operations
//! - `lift config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

mod commands;
mod daemon;

use commands::{ConfigCommand, DaemonCommand, ExperimentCommand};

/// LIFT Experiment Copilot - automated A/B test decisions
#[derive(Parser)]
#[command(name = "lift")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as background daemon service
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "LIFT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API host (overrides api.host from config)
    #[arg(long, global = true, env = "LIFT_HOST")]
    host: Option<String>,

    /// HTTP API port (overrides api.port from config)
    #[arg(long, global = true, env = "LIFT_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LIFT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Experiment operations
    #[command(name = "experiment")]
    Experiment {
        #[command(subcommand)]
        command: ExperimentCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap resolves env-backed flags
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    // Handle daemon mode (background service)
    if cli.daemon {
        info!("Starting LIFT copilot in daemon mode");
        return daemon::start_daemon(cli.config, cli.host, cli.port).await;
    }

    // Handle commands in CLI mode
    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, cli.config, cli.host, cli.port).await
        }
        Some(Commands::Experiment { command }) => {
            commands::experiment::handle_command(command, cli.config, cli.host, cli.port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
