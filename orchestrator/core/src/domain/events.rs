// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events published while executions run.
//!
//! Events are observational. Nothing in the engine reads them back, so
//! subscribers may lag or drop events without affecting execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::execution::{ExecutionId, ExecutionStatus};
use crate::domain::human_interaction::{InteractionKind, RequestId, RequestStatus};
use crate::domain::workflow::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        task_count: usize,
        started_at: DateTime<Utc>,
    },
    TaskAssigned {
        execution_id: ExecutionId,
        task_id: TaskId,
        agent_id: AgentId,
        score: f64,
    },
    TaskStarted {
        execution_id: ExecutionId,
        task_id: TaskId,
        agent_id: AgentId,
        started_at: DateTime<Utc>,
    },
    TaskCompleted {
        execution_id: ExecutionId,
        task_id: TaskId,
        agent_id: Option<AgentId>,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        execution_id: ExecutionId,
        task_id: TaskId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    TaskEscalated {
        execution_id: ExecutionId,
        task_id: TaskId,
        reason: String,
        escalated_at: DateTime<Utc>,
    },
    TaskHandedOff {
        execution_id: ExecutionId,
        task_id: TaskId,
        from: AgentId,
        to: AgentId,
        reason: String,
    },
    TaskRequeued {
        execution_id: ExecutionId,
        task_id: TaskId,
        reason: String,
    },
    HumanInputRequested {
        execution_id: ExecutionId,
        task_id: TaskId,
        request_id: RequestId,
        kind: InteractionKind,
        deadline: DateTime<Utc>,
    },
    HumanInputResolved {
        execution_id: ExecutionId,
        task_id: TaskId,
        request_id: RequestId,
        status: RequestStatus,
    },
    ExecutionPaused {
        execution_id: ExecutionId,
        paused_at: DateTime<Utc>,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
        resumed_at: DateTime<Utc>,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    },
}

impl OrchestrationEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            OrchestrationEvent::ExecutionStarted { execution_id, .. }
            | OrchestrationEvent::TaskAssigned { execution_id, .. }
            | OrchestrationEvent::TaskStarted { execution_id, .. }
            | OrchestrationEvent::TaskCompleted { execution_id, .. }
            | OrchestrationEvent::TaskFailed { execution_id, .. }
            | OrchestrationEvent::TaskEscalated { execution_id, .. }
            | OrchestrationEvent::TaskHandedOff { execution_id, .. }
            | OrchestrationEvent::TaskRequeued { execution_id, .. }
            | OrchestrationEvent::HumanInputRequested { execution_id, .. }
            | OrchestrationEvent::HumanInputResolved { execution_id, .. }
            | OrchestrationEvent::ExecutionPaused { execution_id, .. }
            | OrchestrationEvent::ExecutionResumed { execution_id, .. }
            | OrchestrationEvent::ExecutionFinished { execution_id, .. } => *execution_id,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            OrchestrationEvent::TaskAssigned { task_id, .. }
            | OrchestrationEvent::TaskStarted { task_id, .. }
            | OrchestrationEvent::TaskCompleted { task_id, .. }
            | OrchestrationEvent::TaskFailed { task_id, .. }
            | OrchestrationEvent::TaskEscalated { task_id, .. }
            | OrchestrationEvent::TaskHandedOff { task_id, .. }
            | OrchestrationEvent::TaskRequeued { task_id, .. }
            | OrchestrationEvent::HumanInputRequested { task_id, .. }
            | OrchestrationEvent::HumanInputResolved { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
