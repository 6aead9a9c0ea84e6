// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Execution Aggregate
//!
//! [`WorkflowExecution`] is the aggregate root for one run of a template against
//! an organization. It owns its tasks and keeps three disjoint id sets:
//!
//! - `current`: tasks that are `InProgress` or `WaitingApproval`
//! - `completed`: tasks that are `Completed`
//! - `failed`: tasks that ended `Failed` or `Escalated`
//!
//! All task transitions go through methods on the aggregate so that a task id
//! never sits in two sets. The only caller that mutates an execution is the
//! scheduler's result-application step.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::human_interaction::{RequestId, ResponseDecision};
use crate::domain::organization::OrganizationId;
use crate::domain::workflow::{TaskId, TaskStatus, TemplateId, WorkflowTask, WorkflowTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ExecutionStarted,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskEscalated,
    TaskRequeued,
    HandoffAccepted,
    HumanInputRequested,
    HumanInputResolved,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionFinished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub agent_id: Option<AgentId>,
    pub action: ActionKind,
    pub detail: String,
}

impl ActionLogEntry {
    pub fn new(action: ActionKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: None,
            agent_id: None,
            action,
            detail: detail.into(),
        }
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.clone());
        self
    }

    pub fn by_agent(mut self, agent_id: &AgentId) -> Self {
        self.agent_id = Some(agent_id.clone());
        self
    }
}

/// Error taxonomy tag carried by every error log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AssignmentFailure,
    Execution,
    HumanTimeout,
    Deadlock,
    UpstreamFailure,
    ExecutionTimeout,
    Persistence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::AssignmentFailure => "AssignmentFailure",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::HumanTimeout => "HumanTimeoutError",
            ErrorKind::Deadlock => "DeadlockError",
            ErrorKind::UpstreamFailure => "UpstreamFailure",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::Persistence => "PersistenceError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.clone());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanFeedbackEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub responder: Option<String>,
    pub decision: ResponseDecision,
    pub comment: Option<String>,
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("task {0} is not part of this execution")]
    UnknownTask(TaskId),

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub template_id: TemplateId,
    pub organization_id: OrganizationId,
    pub status: ExecutionStatus,
    pub tasks: Vec<WorkflowTask>,
    pub current: BTreeSet<TaskId>,
    pub completed: BTreeSet<TaskId>,
    pub failed: BTreeSet<TaskId>,
    pub context: HashMap<String, serde_json::Value>,
    pub pending_approvals: Vec<RequestId>,
    pub human_feedback: Vec<HumanFeedbackEntry>,
    pub initiator: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub action_log: Vec<ActionLogEntry>,
    pub error_log: Vec<ErrorLogEntry>,
}

impl WorkflowExecution {
    pub fn new(
        id: ExecutionId,
        template: &WorkflowTemplate,
        organization_id: OrganizationId,
        initiator: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id,
            template_id: template.id.clone(),
            organization_id,
            status: ExecutionStatus::Pending,
            tasks: template.instantiate_tasks(),
            current: BTreeSet::new(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            context,
            pending_approvals: Vec::new(),
            human_feedback: Vec::new(),
            initiator: initiator.into(),
            created_at: Utc::now(),
            started_at: None,
            estimated_completion: None,
            completed_at: None,
            action_log: Vec::new(),
            error_log: Vec::new(),
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut WorkflowTask, TransitionError> {
        self.tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| TransitionError::UnknownTask(id.clone()))
    }

    fn transition(
        &mut self,
        id: &TaskId,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<&mut WorkflowTask, TransitionError> {
        let task = self.task_mut(id)?;
        if !allowed_from.contains(&task.status) {
            return Err(TransitionError::InvalidTransition {
                task: id.clone(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        Ok(task)
    }

    pub fn start(&mut self, now: DateTime<Utc>, max_duration: std::time::Duration) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
        self.estimated_completion = ChronoDuration::from_std(max_duration)
            .ok()
            .map(|duration| now + duration);
    }

    pub fn begin_task(
        &mut self,
        id: &TaskId,
        agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let task = self.transition(id, &[TaskStatus::Pending], TaskStatus::InProgress)?;
        task.assigned_agent = Some(agent.clone());
        task.started_at.get_or_insert(now);
        self.current.insert(id.clone());
        Ok(())
    }

    /// Moves an in-progress task to another agent without leaving `current`.
    pub fn reassign_task(&mut self, id: &TaskId, agent: &AgentId) -> Result<(), TransitionError> {
        let task = self.transition(id, &[TaskStatus::InProgress], TaskStatus::InProgress)?;
        task.assigned_agent = Some(agent.clone());
        task.handoffs += 1;
        Ok(())
    }

    pub fn await_human(&mut self, id: &TaskId, request: RequestId) -> Result<(), TransitionError> {
        self.transition(id, &[TaskStatus::InProgress], TaskStatus::WaitingApproval)?;
        self.pending_approvals.push(request);
        Ok(())
    }

    pub fn clear_pending_approval(&mut self, request: &RequestId) {
        self.pending_approvals.retain(|r| r != request);
    }

    pub fn complete_task(
        &mut self,
        id: &TaskId,
        result: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let task = self.transition(
            id,
            &[TaskStatus::InProgress, TaskStatus::WaitingApproval],
            TaskStatus::Completed,
        )?;
        task.result.extend(result);
        task.completed_at = Some(now);
        self.current.remove(id);
        self.completed.insert(id.clone());
        Ok(())
    }

    pub fn fail_task(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let task = self.transition(
            id,
            &[
                TaskStatus::Pending,
                TaskStatus::InProgress,
                TaskStatus::WaitingApproval,
            ],
            TaskStatus::Failed,
        )?;
        task.completed_at = Some(now);
        self.current.remove(id);
        self.failed.insert(id.clone());
        Ok(())
    }

    pub fn escalate_task(
        &mut self,
        id: &TaskId,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let task = self.transition(
            id,
            &[TaskStatus::InProgress, TaskStatus::WaitingApproval],
            TaskStatus::Escalated,
        )?;
        if feedback.is_some() {
            task.human_feedback = feedback;
        }
        task.completed_at = Some(now);
        self.current.remove(id);
        self.failed.insert(id.clone());
        Ok(())
    }

    /// Returns an in-flight task to `Pending` so a later tick reassigns it.
    pub fn requeue_task(&mut self, id: &TaskId) -> Result<(), TransitionError> {
        let task = self.transition(
            id,
            &[TaskStatus::InProgress, TaskStatus::WaitingApproval],
            TaskStatus::Pending,
        )?;
        task.assigned_agent = None;
        self.current.remove(id);
        Ok(())
    }

    pub fn set_task_feedback(&mut self, id: &TaskId, feedback: String) -> Result<(), TransitionError> {
        self.task_mut(id)?.human_feedback = Some(feedback);
        Ok(())
    }

    pub fn set_task_context(
        &mut self,
        id: &TaskId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), TransitionError> {
        self.task_mut(id)?.context.insert(key.into(), value);
        Ok(())
    }

    pub fn bump_attempts(&mut self, id: &TaskId) -> Result<u32, TransitionError> {
        let task = self.task_mut(id)?;
        task.attempts += 1;
        Ok(task.attempts)
    }

    pub fn bump_assignment_retries(&mut self, id: &TaskId) -> Result<u32, TransitionError> {
        let task = self.task_mut(id)?;
        task.assignment_retries += 1;
        Ok(task.assignment_retries)
    }

    pub fn record_feedback(&mut self, entry: HumanFeedbackEntry) {
        self.human_feedback.push(entry);
    }

    pub fn log_action(&mut self, entry: ActionLogEntry) {
        self.action_log.push(entry);
    }

    pub fn log_error(&mut self, entry: ErrorLogEntry) {
        self.error_log.push(entry);
    }

    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }

    /// Every task has completed or ended without completing.
    pub fn is_settled(&self) -> bool {
        self.completed.len() + self.failed.len() == self.tasks.len()
    }

    pub fn all_completed(&self) -> bool {
        self.completed.len() == self.tasks.len()
    }

    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn status_report(&self) -> ExecutionStatusReport {
        ExecutionStatusReport {
            execution_id: self.id,
            status: self.status,
            total: self.tasks.len(),
            pending: self.count_status(TaskStatus::Pending),
            in_progress: self.count_status(TaskStatus::InProgress),
            waiting_approval: self.count_status(TaskStatus::WaitingApproval),
            completed: self.count_status(TaskStatus::Completed),
            failed: self.count_status(TaskStatus::Failed),
            escalated: self.count_status(TaskStatus::Escalated),
            pending_approvals: self.pending_approvals.len(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Aggregate progress for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub waiting_approval: usize,
    pub completed: usize,
    pub failed: usize,
    pub escalated: usize,
    pub pending_approvals: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
