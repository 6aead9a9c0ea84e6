// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Executor
//!
//! Runs one attempt of one task on one agent and reports what happened. The
//! executor never touches execution or registry state; the scheduler applies
//! its [`ExecutorOutcome`].
//!
//! ```text
//! Started ─► strategy iterations ─┬─► Completed
//!                                 ├─► AwaitingHuman (approval gate or clarification)
//!                                 ├─► Handoff
//!                                 ├─► Failed
//!                                 └─► Cancelled
//! ```
//!
//! A parked interaction is resolved later by [`TaskExecutor::await_resolution`],
//! which the scheduler runs outside the tick batch.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::strategies::{render_briefing, strategy_for, StrategyContext, StrategyOutcome};
use crate::domain::agent::{AgentId, AgentNode};
use crate::domain::execution::ExecutionId;
use crate::domain::human_interaction::{
    InteractionKind, InteractionResolution, RequestId, ResponseDecision,
};
use crate::domain::reasoning::{ReasoningEngine, ReasoningError};
use crate::domain::workflow::{TaskId, WorkflowTask};
use crate::infrastructure::human_interaction::{
    HumanInteractionCoordinator, NewInteraction, PendingInteraction,
};

// ============================================================================
// Failures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    IterationsExhausted,
    Reasoning,
    Timeout,
    HandoffRejected,
    ExplicitFailure,
    HumanInteraction,
    Internal,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::IterationsExhausted => "iterations exhausted",
            FailureKind::Reasoning => "reasoning error",
            FailureKind::Timeout => "reasoning timeout",
            FailureKind::HandoffRejected => "handoff rejected",
            FailureKind::ExplicitFailure => "agent reported failure",
            FailureKind::HumanInteraction => "human interaction unavailable",
            FailureKind::Internal => "internal error",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why an attempt ended without a result. Retryable failures send the task
/// back to `Pending`; the rest fail it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl ExecutionFailure {
    fn new(kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "execution cancelled", false)
    }

    pub fn reasoning(error: ReasoningError) -> Self {
        Self::new(FailureKind::Reasoning, error.to_string(), false)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no reply within {}ms", limit.as_millis()),
            true,
        )
    }

    pub fn iterations_exhausted(max: u32) -> Self {
        Self::new(
            FailureKind::IterationsExhausted,
            format!("no terminal action within {} iterations", max),
            false,
        )
    }

    pub fn explicit(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::ExplicitFailure, reason, false)
    }

    pub fn handoff_rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::HandoffRejected, message, true)
    }

    pub fn human_interaction(message: impl Into<String>) -> Self {
        Self::new(FailureKind::HumanInteraction, message, false)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message, false)
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// One attempt of one task on one agent. Carries copies, never references
/// into scheduler state.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: ExecutionId,
    pub initiator: String,
    pub task: WorkflowTask,
    pub agent: AgentNode,
    pub workflow_context: HashMap<String, Value>,
    /// Results of the task's dependencies.
    pub upstream: BTreeMap<TaskId, HashMap<String, Value>>,
    /// Route the result through approval regardless of confidence.
    pub force_approval: bool,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub output: String,
    pub confidence: f64,
    pub produced_by: AgentId,
    pub data: HashMap<String, Value>,
}

impl TaskResult {
    /// Flattens into the task's result map.
    pub fn into_map(self) -> HashMap<String, Value> {
        let mut map = self.data;
        map.insert("output".to_string(), Value::String(self.output));
        map.insert("confidence".to_string(), json!(self.confidence));
        map.insert("agent".to_string(), Value::String(self.produced_by.0));
        map
    }
}

#[derive(Debug)]
pub enum ParkedKind {
    Approval { candidate: TaskResult },
    Clarification { question: String },
}

/// A task waiting on a human.
#[derive(Debug)]
pub struct ParkedInteraction {
    pub pending: PendingInteraction,
    pub kind: ParkedKind,
}

impl ParkedInteraction {
    pub fn request_id(&self) -> RequestId {
        self.pending.request_id
    }

    pub fn interaction_kind(&self) -> InteractionKind {
        match self.kind {
            ParkedKind::Approval { .. } => InteractionKind::Approval,
            ParkedKind::Clarification { .. } => InteractionKind::Clarification,
        }
    }
}

#[derive(Debug)]
pub enum ExecutorOutcome {
    Completed(TaskResult),
    AwaitingHuman(ParkedInteraction),
    Handoff { target: AgentId, reason: String },
    Failed(ExecutionFailure),
    Cancelled,
}

/// What a resolved human interaction means for its task.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOutcome {
    Completed(TaskResult),
    Escalated {
        reason: String,
        feedback: Option<String>,
        timed_out: bool,
    },
    /// The clarification was answered; run the task again with the answer.
    Requeue { answer: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct HumanResolution {
    pub request_id: RequestId,
    pub kind: InteractionKind,
    pub resolution: InteractionResolution,
    pub outcome: ResolvedOutcome,
}

// ============================================================================
// Executor
// ============================================================================

pub struct TaskExecutor {
    engine: Arc<dyn ReasoningEngine>,
    coordinator: Arc<HumanInteractionCoordinator>,
    reasoning_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        coordinator: Arc<HumanInteractionCoordinator>,
        reasoning_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            coordinator,
            reasoning_timeout,
        }
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutorOutcome {
        if request.cancel.is_cancelled() {
            return ExecutorOutcome::Cancelled;
        }

        let strategy = strategy_for(request.agent.strategy);
        let ctx = StrategyContext {
            engine: self.engine.as_ref(),
            agent: &request.agent,
            task: &request.task,
            briefing: render_briefing(&request.task, &request.workflow_context, &request.upstream),
            cancel: &request.cancel,
            reasoning_timeout: self.reasoning_timeout,
        };
        let run = strategy.execute(&ctx).await;

        info!(
            execution_id = %request.execution_id,
            task_id = %request.task.id,
            agent_id = %request.agent.id,
            strategy = %strategy.kind(),
            iterations = run.iterations,
            "Task attempt finished"
        );

        match run.outcome {
            StrategyOutcome::Complete { output, confidence } => {
                let mut data = HashMap::new();
                data.insert("strategy".to_string(), json!(strategy.kind().to_string()));
                data.insert("iterations".to_string(), json!(run.iterations));
                data.insert(
                    "steps".to_string(),
                    serde_json::to_value(&run.steps).unwrap_or(Value::Null),
                );
                let candidate = TaskResult {
                    output,
                    confidence,
                    produced_by: request.agent.id.clone(),
                    data,
                };

                let agent = &request.agent;
                let gated = request.force_approval
                    || agent.requires_human_approval
                    || confidence < agent.human_escalation_threshold;
                if !gated {
                    return ExecutorOutcome::Completed(candidate);
                }

                let message = format!(
                    "{} finished '{}' with confidence {:.2}. Approve the result?\n\n{}",
                    agent.name, request.task.name, candidate.confidence, candidate.output
                );
                let mut context = HashMap::new();
                context.insert("output".to_string(), json!(candidate.output));
                context.insert("confidence".to_string(), json!(candidate.confidence));
                let new = NewInteraction {
                    execution_id: request.execution_id,
                    task_id: request.task.id.clone(),
                    agent_id: Some(agent.id.clone()),
                    user_id: request.initiator.clone(),
                    kind: InteractionKind::Approval,
                    message,
                    context,
                    options: vec!["approve".to_string(), "reject".to_string()],
                    timeout: None,
                };
                self.park(new, ParkedKind::Approval { candidate }).await
            }
            StrategyOutcome::AskHuman { question, options } => {
                let new = NewInteraction {
                    execution_id: request.execution_id,
                    task_id: request.task.id.clone(),
                    agent_id: Some(request.agent.id.clone()),
                    user_id: request.initiator.clone(),
                    kind: InteractionKind::Clarification,
                    message: question.clone(),
                    context: HashMap::new(),
                    options,
                    timeout: None,
                };
                self.park(new, ParkedKind::Clarification { question }).await
            }
            StrategyOutcome::Handoff { target, reason } => {
                ExecutorOutcome::Handoff { target, reason }
            }
            StrategyOutcome::Failed(failure) if failure.kind == FailureKind::Cancelled => {
                ExecutorOutcome::Cancelled
            }
            StrategyOutcome::Failed(failure) => ExecutorOutcome::Failed(failure),
        }
    }

    async fn park(&self, new: NewInteraction, kind: ParkedKind) -> ExecutorOutcome {
        match self.coordinator.open_request(new).await {
            Ok(pending) => ExecutorOutcome::AwaitingHuman(ParkedInteraction { pending, kind }),
            Err(e) => {
                warn!(error = %e, "Could not open human interaction request");
                ExecutorOutcome::Failed(ExecutionFailure::human_interaction(e.to_string()))
            }
        }
    }

    /// Waits for a parked interaction and maps its resolution onto the task.
    pub async fn await_resolution(parked: ParkedInteraction) -> HumanResolution {
        let request_id = parked.request_id();
        let kind = parked.interaction_kind();
        let resolution = parked.pending.wait().await;

        let outcome = match (parked.kind, &resolution) {
            (_, InteractionResolution::Cancelled) => ResolvedOutcome::Cancelled,
            (ParkedKind::Approval { mut candidate }, InteractionResolution::Responded(response)) => {
                match response.decision {
                    ResponseDecision::Approve => {
                        let feedback = response
                            .comment
                            .clone()
                            .unwrap_or_else(|| "approved".to_string());
                        candidate
                            .data
                            .insert("human_feedback".to_string(), Value::String(feedback));
                        if let Some(by) = &response.responded_by {
                            candidate
                                .data
                                .insert("approved_by".to_string(), Value::String(by.clone()));
                        }
                        ResolvedOutcome::Completed(candidate)
                    }
                    _ => ResolvedOutcome::Escalated {
                        reason: "result rejected by reviewer".to_string(),
                        feedback: response.comment.clone(),
                        timed_out: false,
                    },
                }
            }
            (ParkedKind::Approval { .. }, InteractionResolution::TimedOut) => {
                ResolvedOutcome::Escalated {
                    reason: "approval request timed out".to_string(),
                    feedback: None,
                    timed_out: true,
                }
            }
            (ParkedKind::Clarification { question }, InteractionResolution::Responded(response)) => {
                match &response.decision {
                    ResponseDecision::Answer(answer) => ResolvedOutcome::Requeue {
                        answer: answer.clone(),
                    },
                    // The coordinator only accepts answers for clarifications.
                    other => ResolvedOutcome::Escalated {
                        reason: format!("unexpected response '{}' to '{}'", other, question),
                        feedback: response.comment.clone(),
                        timed_out: false,
                    },
                }
            }
            (ParkedKind::Clarification { question }, InteractionResolution::TimedOut) => {
                ResolvedOutcome::Escalated {
                    reason: format!("clarification '{}' timed out", question),
                    feedback: None,
                    timed_out: true,
                }
            }
        };

        HumanResolution {
            request_id,
            kind,
            resolution,
            outcome,
        }
    }
}
