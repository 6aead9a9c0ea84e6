// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use cadence_core::domain::node_config::NodeConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./cadence-config.yaml)
        #[arg(short, long, default_value = "./cadence-config.yaml")]
        output: PathBuf,

        /// Include every setting with comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CADENCE_CONFIG_PATH: {}",
            std::env::var("CADENCE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./cadence-config.yaml");
        println!("  4. ~/.cadence/config.yaml");
        println!("  5. /etc/cadence/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let orchestration = &config.spec.orchestration;
    println!("{}", "Orchestration:".bold());
    println!("  Poll interval: {:?}", orchestration.poll_interval);
    println!("  Human timeout: {:?}", orchestration.human_timeout);
    println!(
        "  Max execution time: {:?}",
        orchestration.max_execution_time
    );
    println!(
        "  Reasoning timeout: {:?}",
        orchestration.reasoning_timeout
    );
    println!(
        "  Assignment retry budget: {}",
        orchestration.assignment_retry_budget
    );
    println!("  Max task attempts: {}", orchestration.max_task_attempts);
    println!(
        "  Max handoffs per task: {}",
        orchestration.max_handoffs_per_task
    );
    println!();

    let reasoning = &config.spec.reasoning;
    println!("{}", "Reasoning engine:".bold());
    println!("  Endpoint: {}", reasoning.endpoint);
    println!("  Model: {}", reasoning.model);
    let key = match (&reasoning.api_key, reasoning.resolve_api_key()) {
        (None, _) => "(none)".dimmed().to_string(),
        (Some(_), Some(_)) => "set".green().to_string(),
        (Some(reference), None) => format!("{} (unresolved)", reference).yellow().to_string(),
    };
    println!("  API key: {}", key);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
