// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `cadence run` - execute a workflow in-process
//!
//! Streams orchestration events to stdout and reads operator commands from
//! stdin until the execution reaches a terminal status. Ctrl-C cancels the
//! execution.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use cadence_core::application::{Orchestrator, OrchestratorPorts};
use cadence_core::domain::events::OrchestrationEvent;
use cadence_core::domain::execution::{ExecutionId, ExecutionStatus, WorkflowExecution};
use cadence_core::domain::node_config::NodeConfig;
use cadence_core::infrastructure::event_bus::EventBusError;
use cadence_core::infrastructure::llm::OpenAiCompatibleEngine;
use cadence_core::infrastructure::manifest_parser::ManifestParser;
use cadence_core::infrastructure::repositories::{
    InMemoryExecutionStore, InMemoryOrganizationProvider, InMemoryTemplateProvider,
};

use crate::console::{parse_operator_input, ConsoleDeliveryChannel, OperatorInput, HELP};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Workflow template manifest
    #[arg(short, long, value_name = "FILE")]
    pub template: PathBuf,

    /// Organization manifest
    #[arg(short, long, value_name = "FILE")]
    pub organization: PathBuf,

    /// User that receives approval and clarification requests
    #[arg(long, env = "USER", default_value = "operator")]
    pub initiator: String,

    /// Initial execution context as a JSON object
    #[arg(long, value_name = "JSON")]
    pub context: Option<String>,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = NodeConfig::load_or_default(config_path)?;
    config.validate().context("Invalid node configuration")?;

    let template = ManifestParser::parse_template_file(&args.template)
        .with_context(|| format!("Failed to load template {}", args.template.display()))?;
    let organization = ManifestParser::parse_organization_file(&args.organization).with_context(|| {
        format!("Failed to load organization {}", args.organization.display())
    })?;
    let context = parse_context(args.context.as_deref())?;

    let templates = Arc::new(InMemoryTemplateProvider::new());
    templates.insert(template.clone());
    let organizations = Arc::new(InMemoryOrganizationProvider::new());
    organizations.insert(organization.clone());

    debug!(
        endpoint = %config.spec.reasoning.endpoint,
        model = %config.spec.reasoning.model,
        "Using reasoning engine"
    );
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorPorts {
            templates,
            organizations,
            store: Arc::new(InMemoryExecutionStore::new()),
            engine: Arc::new(OpenAiCompatibleEngine::from_config(&config.spec.reasoning)),
            delivery: Arc::new(ConsoleDeliveryChannel),
        },
        config.spec.orchestration.clone(),
    ));

    // Subscribe before starting so ExecutionStarted is not missed
    let mut events = orchestrator.events().subscribe();
    let execution_id = orchestrator
        .start(&template.id, &organization.id, &args.initiator, context)
        .await?;

    println!(
        "{} {} with {} ({})",
        "▶ Running".cyan().bold(),
        template.name.bold(),
        organization.name.bold(),
        execution_id.to_string().dimmed()
    );
    println!("{}", "Type 'help' for operator commands.".dimmed());

    let operator = tokio::spawn(operator_loop(
        Arc::clone(&orchestrator),
        execution_id,
        args.initiator.clone(),
    ));

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.execution_id() == execution_id => {
                    print_event(&event);
                    if matches!(event, OrchestrationEvent::ExecutionFinished { .. }) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(EventBusError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream fell behind; some events were not shown");
                }
                Err(e) => {
                    warn!(error = %e, "Event stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Interrupted, cancelling execution...".yellow());
                orchestrator.cancel(execution_id).await;
            }
        }
    }

    operator.abort();
    let execution = orchestrator.wait_for_completion(execution_id).await?;
    print_summary(&execution);
    orchestrator.shutdown().await;

    if execution.status != ExecutionStatus::Completed {
        bail!("Execution {} finished with status {}", execution_id, execution.status);
    }
    Ok(())
}

fn parse_context(raw: Option<&str>) -> Result<HashMap<String, Value>> {
    match raw {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(raw).context("--context must be a JSON object"),
    }
}

async fn operator_loop(orchestrator: Arc<Orchestrator>, execution_id: ExecutionId, operator: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read operator input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_operator_input(&line, &operator) {
            Ok(input) => handle_input(&orchestrator, execution_id, &operator, input).await,
            Err(message) => println!("{}", message.yellow()),
        }
    }
}

async fn handle_input(
    orchestrator: &Orchestrator,
    execution_id: ExecutionId,
    operator: &str,
    input: OperatorInput,
) {
    let coordinator = orchestrator.coordinator();
    match input {
        OperatorInput::Respond {
            request_id: Some(request_id),
            response,
        } => match coordinator.try_submit_response(request_id, response).await {
            Ok(()) => println!("{} response recorded for {}", "✓".green(), request_id),
            Err(e) => println!("{} {}", "✗".red(), e),
        },
        OperatorInput::Respond {
            request_id: None,
            response,
        } => match coordinator.submit_response_for_user(operator, response).await {
            Ok(request_id) => println!("{} response recorded for {}", "✓".green(), request_id),
            Err(e) => println!("{} {}", "✗".red(), e),
        },
        OperatorInput::Pending => {
            let pending = coordinator.list_pending(operator).await;
            if pending.is_empty() {
                println!("No pending requests.");
            }
            for request in pending {
                println!(
                    "  {} {:?} task {} - {}",
                    request.id.to_string().dimmed(),
                    request.kind,
                    request.task_id,
                    request.message.lines().next().unwrap_or_default()
                );
            }
        }
        OperatorInput::Status => match orchestrator.get_status(execution_id).await {
            Ok(status) => println!(
                "  {}: {}/{} completed, {} running, {} waiting, {} failed, {} escalated",
                status.status,
                status.completed,
                status.total,
                status.in_progress,
                status.waiting_approval,
                status.failed,
                status.escalated
            ),
            Err(e) => println!("{} {}", "✗".red(), e),
        },
        OperatorInput::Pause => report(orchestrator.pause(execution_id), "paused", "not running"),
        OperatorInput::Resume => report(orchestrator.resume(execution_id), "resumed", "not paused"),
        OperatorInput::Cancel => report(
            orchestrator.cancel(execution_id).await,
            "cancelling",
            "already finished",
        ),
        OperatorInput::Help => println!("{}", HELP),
    }
}

fn report(changed: bool, done: &str, refused: &str) {
    if changed {
        println!("{} Execution {}", "✓".green(), done);
    } else {
        println!("{} Execution {}", "✗".red(), refused);
    }
}

fn print_event(event: &OrchestrationEvent) {
    match event {
        OrchestrationEvent::ExecutionStarted { task_count, .. } => {
            println!("  {} execution started, {} task(s)", "•".cyan(), task_count);
        }
        OrchestrationEvent::TaskAssigned {
            task_id,
            agent_id,
            score,
            ..
        } => {
            println!("  {} {} → {} (score {:.2})", "•".cyan(), task_id, agent_id, score);
        }
        OrchestrationEvent::TaskStarted { task_id, agent_id, .. } => {
            println!("  {} {} started by {}", "▶".blue(), task_id, agent_id);
        }
        OrchestrationEvent::TaskCompleted { task_id, .. } => {
            println!("  {} {} completed", "✓".green(), task_id);
        }
        OrchestrationEvent::TaskFailed { task_id, reason, .. } => {
            println!("  {} {} failed: {}", "✗".red(), task_id, reason);
        }
        OrchestrationEvent::TaskEscalated { task_id, reason, .. } => {
            println!("  {} {} escalated: {}", "!".yellow().bold(), task_id, reason);
        }
        OrchestrationEvent::TaskHandedOff {
            task_id,
            from,
            to,
            reason,
            ..
        } => {
            println!("  {} {} handed off {} → {}: {}", "↪".cyan(), task_id, from, to, reason);
        }
        OrchestrationEvent::TaskRequeued { task_id, reason, .. } => {
            println!("  {} {} requeued: {}", "↺".yellow(), task_id, reason);
        }
        // The delivery channel prints the request itself
        OrchestrationEvent::HumanInputRequested { .. } => {}
        OrchestrationEvent::HumanInputResolved {
            task_id, status, ..
        } => {
            println!("  {} input for {} {:?}", "•".cyan(), task_id, status);
        }
        OrchestrationEvent::ExecutionPaused { .. } => {
            println!("  {} execution paused", "⏸".yellow());
        }
        OrchestrationEvent::ExecutionResumed { .. } => {
            println!("  {} execution resumed", "▶".cyan());
        }
        OrchestrationEvent::ExecutionFinished { status, .. } => {
            println!("  {} execution finished: {}", "■".bold(), status);
        }
    }
}

fn print_summary(execution: &WorkflowExecution) {
    println!();
    let status = execution.status.to_string();
    let status = match execution.status {
        ExecutionStatus::Completed => status.green().bold(),
        ExecutionStatus::Cancelled => status.yellow().bold(),
        _ => status.red().bold(),
    };
    println!("{} {}", "Execution".bold(), status);

    for task in &execution.tasks {
        let agent = task
            .assigned_agent
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {:<16} {}", task.id.to_string(), task.status.to_string(), agent);
    }

    if !execution.error_log.is_empty() {
        println!();
        println!("{}", "Errors".red().bold());
        for entry in &execution.error_log {
            let task = entry
                .task_id
                .as_ref()
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default();
            println!("  {}{} {}", entry.kind, task, entry.message);
        }
    }
}
