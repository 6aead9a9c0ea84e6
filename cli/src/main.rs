// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Cadence CLI
//!
//! The `cadence` binary runs workflow executions in-process against an
//! OpenAI-compatible reasoning endpoint.
//!
//! ## Commands
//!
//! - `cadence run --template FILE --organization FILE` - Run a workflow, answering approvals on stdin
//! - `cadence validate FILE...` - Parse and validate manifests
//! - `cadence config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cadence_core::domain::node_config::NodeConfig;
use cadence_orchestrator::commands::{self, ConfigCommand, RunArgs};

/// Cadence - Dependency-aware multi-agent workflow orchestration
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CADENCE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: from config, else info]
    #[arg(long, global = true, env = "CADENCE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json) [default: from config, else text]
    #[arg(long, global = true, env = "CADENCE_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow template with an organization of agents
    #[command(name = "run")]
    Run(RunArgs),

    /// Validate workflow template and organization manifests
    #[command(name = "validate")]
    Validate {
        /// Manifest files to check
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
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
    let cli = Cli::parse();

    let (level, format) = logging_settings(&cli);
    init_logging(&level, &format)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Validate { files } => commands::validate::execute(&files),
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Flags win over the node config's `observability.logging` section. A config
/// that fails to load is ignored here; the command reports it.
fn logging_settings(cli: &Cli) -> (String, String) {
    let configured = NodeConfig::load_or_default(cli.config.clone())
        .ok()
        .and_then(|config| config.spec.observability)
        .and_then(|observability| observability.logging);
    let level = cli
        .log_level
        .clone()
        .or_else(|| configured.as_ref().map(|logging| logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured.map(|logging| logging.format))
        .unwrap_or_else(|| "text".to_string());
    (level, format)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        "text" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Use 'text' or 'json'", other),
    }

    Ok(())
}
