// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution Scheduler
//!
//! Drives one [`WorkflowExecution`] from `Pending` to a terminal status. The
//! scheduler task is the only writer of the execution, its [`TaskGraph`] and
//! its [`AgentRegistry`]; everyone else reads snapshots published on a
//! `watch` channel or the persisted record.
//!
//! # Tick
//!
//! 1. Honor control state: cancellation, deadline, pause.
//! 2. Apply human interactions that resolved since the last tick.
//! 3. Stop when every task has settled.
//! 4. Collect ready tasks (all dependencies completed, status `Pending`).
//! 5. Assign each ready task to its best eligible agent and launch the batch.
//! 6. Wait for the whole batch, then apply outcomes one at a time.
//! 7. Flush state to the [`ExecutionStore`] and publish a snapshot.
//!
//! Tasks parked on a human keep their agent slot and are awaited in a separate
//! set, so one slow reviewer never blocks unrelated branches.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{Id as JoinId, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::executor::{
    ExecutionFailure, ExecutionRequest, ExecutorOutcome, HumanResolution, ResolvedOutcome,
    TaskExecutor,
};
use crate::application::registry::AgentRegistry;
use crate::domain::agent::AgentId;
use crate::domain::events::OrchestrationEvent;
use crate::domain::execution::{
    ActionKind, ActionLogEntry, ErrorKind, ErrorLogEntry, ExecutionStatus, HumanFeedbackEntry,
    TransitionError, WorkflowExecution,
};
use crate::domain::human_interaction::{InteractionResolution, RequestStatus};
use crate::domain::node_config::OrchestrationSettings;
use crate::domain::organization::{ExecutionPolicy, Organization};
use crate::domain::repository::ExecutionStore;
use crate::domain::task_graph::TaskGraph;
use crate::domain::workflow::{TaskId, TaskStatus};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::human_interaction::HumanInteractionCoordinator;

/// Thirty years; stands in for "no deadline" when the configured time overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

// ============================================================================
// Settings and control
// ============================================================================

/// Limits for one execution, merged from node settings and the organization policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub max_execution_time: Duration,
    pub assignment_retry_budget: u32,
    pub max_task_attempts: u32,
    pub max_handoffs_per_task: u32,
    pub parallel_execution: bool,
    pub force_approval: bool,
}

impl SchedulerSettings {
    pub fn resolve(settings: &OrchestrationSettings, policy: &ExecutionPolicy) -> Self {
        let max_execution_time = policy
            .max_execution_time
            .map_or(settings.max_execution_time, |cap| {
                cap.min(settings.max_execution_time)
            });
        Self {
            poll_interval: settings.poll_interval,
            max_execution_time,
            assignment_retry_budget: settings.assignment_retry_budget,
            max_task_attempts: settings.max_task_attempts,
            max_handoffs_per_task: settings.max_handoffs_per_task,
            parallel_execution: policy.parallel_execution,
            force_approval: policy.human_supervision,
        }
    }
}

/// Requested run state, written by the control surface and read by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Shared services a scheduler runs against.
#[derive(Clone)]
pub struct SchedulerServices {
    pub executor: Arc<TaskExecutor>,
    pub coordinator: Arc<HumanInteractionCoordinator>,
    pub store: Arc<dyn ExecutionStore>,
    pub events: EventBus,
}

type Resolved = (TaskId, AgentId, HumanResolution);

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    execution: WorkflowExecution,
    graph: TaskGraph,
    registry: AgentRegistry,
    settings: SchedulerSettings,
    services: SchedulerServices,
    control: watch::Receiver<ControlState>,
    cancel: CancellationToken,
    snapshot: watch::Sender<WorkflowExecution>,
    approvals: JoinSet<Resolved>,
    deadline: Instant,
    dirty: BTreeSet<TaskId>,
    flushed_actions: usize,
    flushed_errors: usize,
    flushed_status: ExecutionStatus,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution: WorkflowExecution,
        graph: TaskGraph,
        organization: &Organization,
        settings: SchedulerSettings,
        services: SchedulerServices,
        control: watch::Receiver<ControlState>,
        cancel: CancellationToken,
        snapshot: watch::Sender<WorkflowExecution>,
    ) -> Self {
        let flushed_status = execution.status;
        let flushed_actions = execution.action_log.len();
        let flushed_errors = execution.error_log.len();
        Self {
            execution,
            graph,
            registry: AgentRegistry::from_organization(organization),
            settings,
            services,
            control,
            cancel,
            snapshot,
            approvals: JoinSet::new(),
            deadline: Instant::now(),
            dirty: BTreeSet::new(),
            flushed_actions,
            flushed_errors,
            flushed_status,
        }
    }

    /// Runs the execution to a terminal status and returns the final record.
    pub async fn run(mut self) -> WorkflowExecution {
        let now = Utc::now();
        let started = Instant::now();
        self.deadline = started
            .checked_add(self.settings.max_execution_time)
            .unwrap_or_else(|| started + FAR_FUTURE);
        self.execution.start(now, self.settings.max_execution_time);

        let task_count = self.execution.tasks.len();
        info!(
            execution_id = %self.execution.id,
            template_id = %self.execution.template_id,
            tasks = task_count,
            "Execution started"
        );
        self.execution.log_action(ActionLogEntry::new(
            ActionKind::ExecutionStarted,
            format!("{} tasks", task_count),
        ));
        self.publish(OrchestrationEvent::ExecutionStarted {
            execution_id: self.execution.id,
            task_count,
            started_at: now,
        });
        self.flush().await;

        let status = loop {
            if let Some(status) = self.tick().await {
                break status;
            }
        };

        self.finish(status).await;
        self.execution
    }

    /// One pass of the loop. `Some` carries the terminal status.
    async fn tick(&mut self) -> Option<ExecutionStatus> {
        let control = *self.control.borrow_and_update();
        if control == ControlState::Cancelled || self.cancel.is_cancelled() {
            self.abandon_in_flight().await;
            return Some(ExecutionStatus::Cancelled);
        }
        if Instant::now() >= self.deadline {
            let message = format!(
                "execution exceeded its maximum time of {}s",
                self.settings.max_execution_time.as_secs()
            );
            warn!(execution_id = %self.execution.id, "{}", message);
            self.execution
                .log_error(ErrorLogEntry::new(ErrorKind::ExecutionTimeout, message));
            self.abandon_in_flight().await;
            return Some(ExecutionStatus::Failed);
        }
        match control {
            ControlState::Paused => {
                self.enter_pause().await;
                self.wait_for_control().await;
                return None;
            }
            ControlState::Running if self.execution.status == ExecutionStatus::Paused => {
                self.leave_pause();
            }
            _ => {}
        }

        while let Some(joined) = self.approvals.try_join_next() {
            self.apply_joined_resolution(joined);
        }

        if self.execution.is_settled() {
            self.flush().await;
            return Some(if self.execution.all_completed() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            });
        }

        let ready: Vec<TaskId> = self
            .graph
            .unblocked()
            .filter(|id| {
                self.execution
                    .task(id)
                    .is_some_and(|task| task.status == TaskStatus::Pending)
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            if self.approvals.is_empty() {
                let unfinished = self.execution.tasks.len()
                    - self.execution.completed.len()
                    - self.execution.failed.len();
                let message = format!(
                    "no task can run: {} unfinished and nothing in flight",
                    unfinished
                );
                error!(execution_id = %self.execution.id, "{}", message);
                self.execution
                    .log_error(ErrorLogEntry::new(ErrorKind::Deadlock, message));
                return Some(ExecutionStatus::Failed);
            }
            self.wait_for_progress().await;
            self.flush().await;
            return None;
        }

        let launches = self.assign(&ready);
        if launches.is_empty() {
            self.flush().await;
            self.wait_for_progress().await;
            self.flush().await;
            return None;
        }

        self.run_batch(launches).await;
        self.flush().await;
        None
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    async fn enter_pause(&mut self) {
        if self.execution.status != ExecutionStatus::Running {
            return;
        }
        let now = Utc::now();
        self.execution.status = ExecutionStatus::Paused;
        info!(execution_id = %self.execution.id, "Execution paused");
        self.execution
            .log_action(ActionLogEntry::new(ActionKind::ExecutionPaused, "paused"));
        self.publish(OrchestrationEvent::ExecutionPaused {
            execution_id: self.execution.id,
            paused_at: now,
        });
        self.flush().await;
    }

    fn leave_pause(&mut self) {
        self.execution.status = ExecutionStatus::Running;
        info!(execution_id = %self.execution.id, "Execution resumed");
        self.execution
            .log_action(ActionLogEntry::new(ActionKind::ExecutionResumed, "resumed"));
        self.publish(OrchestrationEvent::ExecutionResumed {
            execution_id: self.execution.id,
            resumed_at: Utc::now(),
        });
    }

    /// Parks until the control state changes or the run must end.
    /// A dropped control handle cancels the run.
    async fn wait_for_control(&mut self) {
        let deadline = self.deadline;
        tokio::select! {
            changed = self.control.changed() => {
                if changed.is_err() {
                    warn!(execution_id = %self.execution.id, "Control handle dropped; cancelling");
                    self.cancel.cancel();
                }
            }
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    /// Sleeps one poll interval, returning early when an interaction
    /// resolves or the control state changes.
    async fn wait_for_progress(&mut self) {
        let deadline = self.deadline;
        let poll = tokio::time::sleep(self.settings.poll_interval);
        tokio::select! {
            Some(joined) = self.approvals.join_next(), if !self.approvals.is_empty() => {
                self.apply_joined_resolution(joined);
            }
            _ = poll => {}
            Ok(()) = self.control.changed() => {}
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    /// Returns in-flight tasks to `Pending` and closes their interactions.
    async fn abandon_in_flight(&mut self) {
        let cancelled = self
            .services
            .coordinator
            .cancel_for_execution(self.execution.id)
            .await;
        if cancelled > 0 {
            debug!(
                execution_id = %self.execution.id,
                requests = cancelled,
                "Cancelled open interaction requests"
            );
        }
        self.approvals.abort_all();
        while self.approvals.join_next().await.is_some() {}

        let in_flight: Vec<TaskId> = self.execution.current.iter().cloned().collect();
        for task_id in in_flight {
            if let Err(e) = self.execution.requeue_task(&task_id) {
                warn!(task_id = %task_id, error = %e, "Could not requeue in-flight task");
                continue;
            }
            self.dirty.insert(task_id);
        }
        self.execution.pending_approvals.clear();
        self.registry.release_all();
    }

    async fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.execution.finish(status, now);

        let report = self.execution.status_report();
        let detail = format!(
            "{}: {} completed, {} failed, {} escalated of {}",
            status, report.completed, report.failed, report.escalated, report.total
        );
        info!(execution_id = %self.execution.id, status = %status, "Execution finished: {}", detail);
        self.execution
            .log_action(ActionLogEntry::new(ActionKind::ExecutionFinished, detail));
        self.publish(OrchestrationEvent::ExecutionFinished {
            execution_id: self.execution.id,
            status,
            finished_at: now,
        });
        metrics::counter!("cadence_executions_finished_total", "status" => status.to_string())
            .increment(1);

        self.flush().await;
        if let Err(e) = self.services.store.save(&self.execution).await {
            warn!(execution_id = %self.execution.id, error = %e, "Failed to persist final execution record");
            self.execution.log_error(ErrorLogEntry::new(
                ErrorKind::Persistence,
                format!("final save failed: {}", e),
            ));
            self.snapshot.send_replace(self.execution.clone());
        }
    }

    // ------------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------------

    fn assign(&mut self, ready: &[TaskId]) -> Vec<ExecutionRequest> {
        let mut launches = Vec::new();
        let mut unassigned = Vec::new();

        for task_id in ready {
            if !self.settings.parallel_execution && !launches.is_empty() {
                break;
            }
            let Some(task) = self.execution.task(task_id) else {
                continue;
            };
            let Some(candidate) = self.registry.best_candidate(task) else {
                unassigned.push(task_id.clone());
                continue;
            };
            if let Err(e) = self.registry.acquire(&candidate.agent_id) {
                warn!(task_id = %task_id, error = %e, "Candidate agent could not be acquired");
                unassigned.push(task_id.clone());
                continue;
            }

            let now = Utc::now();
            if let Err(e) = self.execution.begin_task(task_id, &candidate.agent_id, now) {
                self.registry.release(&candidate.agent_id);
                self.log_transition_error(&e);
                continue;
            }
            info!(
                execution_id = %self.execution.id,
                task_id = %task_id,
                agent_id = %candidate.agent_id,
                score = candidate.score,
                "Task assigned"
            );
            self.execution.log_action(
                ActionLogEntry::new(
                    ActionKind::TaskAssigned,
                    format!("score {:.2}", candidate.score),
                )
                .for_task(task_id)
                .by_agent(&candidate.agent_id),
            );
            self.publish(OrchestrationEvent::TaskAssigned {
                execution_id: self.execution.id,
                task_id: task_id.clone(),
                agent_id: candidate.agent_id.clone(),
                score: candidate.score,
            });
            self.task_started(task_id, &candidate.agent_id, now);

            if let Some(request) = self.build_request(task_id, &candidate.agent_id) {
                launches.push(request);
            }
        }

        // Busy agents will free up; only an idle organization proves nobody fits.
        if !unassigned.is_empty() && self.registry.total_load() == 0 {
            for task_id in unassigned {
                self.charge_assignment_retry(&task_id);
            }
        }

        launches
    }

    fn task_started(&mut self, task_id: &TaskId, agent_id: &AgentId, now: chrono::DateTime<Utc>) {
        self.execution.log_action(
            ActionLogEntry::new(ActionKind::TaskStarted, "attempt started")
                .for_task(task_id)
                .by_agent(agent_id),
        );
        self.publish(OrchestrationEvent::TaskStarted {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            started_at: now,
        });
        self.dirty.insert(task_id.clone());
    }

    fn charge_assignment_retry(&mut self, task_id: &TaskId) {
        let retries = match self.execution.bump_assignment_retries(task_id) {
            Ok(retries) => retries,
            Err(e) => {
                self.log_transition_error(&e);
                return;
            }
        };
        metrics::counter!("cadence_assignment_retries_total").increment(1);
        self.dirty.insert(task_id.clone());

        if retries < self.settings.assignment_retry_budget {
            debug!(
                task_id = %task_id,
                retries,
                budget = self.settings.assignment_retry_budget,
                "No eligible agent for ready task"
            );
            return;
        }

        let message = format!("no eligible agent after {} attempts", retries);
        warn!(execution_id = %self.execution.id, task_id = %task_id, "{}", message);
        self.execution.log_error(
            ErrorLogEntry::new(ErrorKind::AssignmentFailure, message.clone()).for_task(task_id),
        );
        self.fail(task_id, message);
    }

    fn build_request(&self, task_id: &TaskId, agent_id: &AgentId) -> Option<ExecutionRequest> {
        let task = self.execution.task(task_id)?.clone();
        let agent = self.registry.get(agent_id)?.clone();
        let upstream: BTreeMap<TaskId, HashMap<String, serde_json::Value>> = task
            .dependencies
            .iter()
            .filter_map(|dep| {
                self.execution
                    .task(dep)
                    .map(|upstream| (dep.clone(), upstream.result.clone()))
            })
            .collect();
        Some(ExecutionRequest {
            execution_id: self.execution.id,
            initiator: self.execution.initiator.clone(),
            task,
            agent,
            workflow_context: self.execution.context.clone(),
            upstream,
            force_approval: self.settings.force_approval,
            cancel: self.cancel.clone(),
        })
    }

    // ------------------------------------------------------------------------
    // Batch
    // ------------------------------------------------------------------------

    /// Gathers a batch concurrently and applies its outcomes serially. Accepted
    /// handoffs run again in a further round of the same batch.
    async fn run_batch(&mut self, launches: Vec<ExecutionRequest>) {
        let batch = self.cancel.child_token();
        let mut round = launches;

        loop {
            let mut running: JoinSet<ExecutorOutcome> = JoinSet::new();
            let mut attempts: HashMap<JoinId, (TaskId, AgentId)> = HashMap::new();
            for mut request in round {
                request.cancel = batch.clone();
                let key = (request.task.id.clone(), request.agent.id.clone());
                let executor = Arc::clone(&self.services.executor);
                let handle = running.spawn(async move { executor.execute(request).await });
                attempts.insert(handle.id(), key);
            }

            let mut results = Vec::with_capacity(attempts.len());
            let deadline = self.deadline;
            let mut expired = false;
            while !running.is_empty() {
                tokio::select! {
                    joined = running.join_next_with_id() => {
                        match joined {
                            Some(Ok((id, outcome))) => {
                                if let Some((task_id, agent_id)) = attempts.remove(&id) {
                                    results.push((task_id, agent_id, outcome));
                                }
                            }
                            Some(Err(e)) => {
                                if let Some((task_id, agent_id)) = attempts.remove(&e.id()) {
                                    error!(task_id = %task_id, error = %e, "Task attempt aborted");
                                    let failure = ExecutionFailure::internal(format!("attempt aborted: {}", e));
                                    results.push((task_id, agent_id, ExecutorOutcome::Failed(failure)));
                                }
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep_until(deadline), if !expired => {
                        expired = true;
                        batch.cancel();
                    }
                }
            }

            let mut next = Vec::new();
            for (task_id, agent_id, outcome) in results {
                if let Some(request) = self.apply_outcome(&task_id, &agent_id, outcome) {
                    next.push(request);
                }
            }

            if next.is_empty() {
                break;
            }
            if batch.is_cancelled() {
                for request in next {
                    self.registry.release(&request.agent.id);
                    self.requeue(&request.task.id, "execution interrupted before handoff ran");
                }
                break;
            }
            round = next;
        }
    }

    fn apply_outcome(
        &mut self,
        task_id: &TaskId,
        agent_id: &AgentId,
        outcome: ExecutorOutcome,
    ) -> Option<ExecutionRequest> {
        match outcome {
            ExecutorOutcome::Completed(result) => {
                self.registry.release(agent_id);
                self.complete(task_id, Some(agent_id), result.into_map());
                None
            }
            ExecutorOutcome::AwaitingHuman(parked) => {
                let request_id = parked.request_id();
                let kind = parked.interaction_kind();
                let deadline = parked.pending.deadline;
                if let Err(e) = self.execution.await_human(task_id, request_id) {
                    self.log_transition_error(&e);
                    self.registry.release(agent_id);
                    return None;
                }
                info!(
                    execution_id = %self.execution.id,
                    task_id = %task_id,
                    request_id = %request_id,
                    kind = ?kind,
                    "Task waiting on human input"
                );
                self.execution.log_action(
                    ActionLogEntry::new(
                        ActionKind::HumanInputRequested,
                        format!("{:?} request {}", kind, request_id),
                    )
                    .for_task(task_id)
                    .by_agent(agent_id),
                );
                self.publish(OrchestrationEvent::HumanInputRequested {
                    execution_id: self.execution.id,
                    task_id: task_id.clone(),
                    request_id,
                    kind,
                    deadline,
                });
                self.dirty.insert(task_id.clone());

                let task_id = task_id.clone();
                let agent_id = agent_id.clone();
                self.approvals.spawn(async move {
                    let resolution = TaskExecutor::await_resolution(parked).await;
                    (task_id, agent_id, resolution)
                });
                None
            }
            ExecutorOutcome::Handoff { target, reason } => {
                self.handoff(task_id, agent_id, target, reason)
            }
            ExecutorOutcome::Failed(failure) => {
                self.registry.release(agent_id);
                self.fail_attempt(task_id, agent_id, failure);
                None
            }
            ExecutorOutcome::Cancelled => {
                self.registry.release(agent_id);
                self.requeue(task_id, "attempt cancelled");
                None
            }
        }
    }

    fn handoff(
        &mut self,
        task_id: &TaskId,
        from: &AgentId,
        target: AgentId,
        reason: String,
    ) -> Option<ExecutionRequest> {
        let handoffs = self.execution.task(task_id).map_or(0, |task| task.handoffs);
        let rejection = if self.registry.get(&target).is_none() {
            Some(format!("unknown agent {}", target))
        } else if !self
            .registry
            .get(from)
            .is_some_and(|agent| agent.can_handoff(&target))
        {
            Some(format!("{} may not hand off to {}", from, target))
        } else if handoffs >= self.settings.max_handoffs_per_task {
            Some(format!("handoff limit of {} reached", self.settings.max_handoffs_per_task))
        } else if !self.registry.has_capacity(&target) {
            Some(format!("{} is at capacity", target))
        } else {
            None
        };

        self.registry.release(from);
        if let Some(message) = rejection {
            self.fail_attempt(task_id, from, ExecutionFailure::handoff_rejected(message));
            return None;
        }
        if let Err(e) = self.registry.acquire(&target) {
            self.fail_attempt(task_id, from, ExecutionFailure::handoff_rejected(e.to_string()));
            return None;
        }
        if let Err(e) = self.execution.reassign_task(task_id, &target) {
            self.registry.release(&target);
            self.log_transition_error(&e);
            return None;
        }

        let annotated = self
            .execution
            .set_task_context(task_id, "handoff_reason", serde_json::Value::String(reason.clone()))
            .and_then(|_| {
                self.execution.set_task_context(
                    task_id,
                    "handoff_from",
                    serde_json::Value::String(from.to_string()),
                )
            });
        if let Err(e) = annotated {
            self.log_transition_error(&e);
        }

        info!(
            execution_id = %self.execution.id,
            task_id = %task_id,
            from = %from,
            to = %target,
            "Handoff accepted"
        );
        self.execution.log_action(
            ActionLogEntry::new(
                ActionKind::HandoffAccepted,
                format!("from {}: {}", from, reason),
            )
            .for_task(task_id)
            .by_agent(&target),
        );
        self.publish(OrchestrationEvent::TaskHandedOff {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            from: from.clone(),
            to: target.clone(),
            reason,
        });
        metrics::counter!("cadence_handoffs_total").increment(1);
        self.task_started(task_id, &target, Utc::now());

        self.build_request(task_id, &target)
    }

    // ------------------------------------------------------------------------
    // Human interaction resolutions
    // ------------------------------------------------------------------------

    fn apply_joined_resolution(&mut self, joined: Result<Resolved, JoinError>) {
        match joined {
            Ok((task_id, agent_id, resolution)) => {
                self.apply_resolution(&task_id, &agent_id, resolution)
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(execution_id = %self.execution.id, error = %e, "Interaction waiter panicked"),
        }
    }

    fn apply_resolution(&mut self, task_id: &TaskId, agent_id: &AgentId, resolution: HumanResolution) {
        self.execution.clear_pending_approval(&resolution.request_id);
        let waiting = self
            .execution
            .task(task_id)
            .is_some_and(|task| task.status == TaskStatus::WaitingApproval);
        if !waiting {
            debug!(
                task_id = %task_id,
                request_id = %resolution.request_id,
                "Ignoring resolution for a task no longer waiting"
            );
            return;
        }
        self.registry.release(agent_id);

        let status = match &resolution.resolution {
            InteractionResolution::Responded(response) => {
                self.execution.record_feedback(HumanFeedbackEntry {
                    timestamp: Utc::now(),
                    task_id: task_id.clone(),
                    request_id: resolution.request_id,
                    responder: response.responded_by.clone(),
                    decision: response.decision.clone(),
                    comment: response.comment.clone(),
                });
                if let Some(comment) = &response.comment {
                    if let Err(e) = self.execution.set_task_feedback(task_id, comment.clone()) {
                        self.log_transition_error(&e);
                    }
                }
                RequestStatus::Responded
            }
            InteractionResolution::TimedOut => RequestStatus::TimedOut,
            InteractionResolution::Cancelled => RequestStatus::Cancelled,
        };
        info!(
            execution_id = %self.execution.id,
            task_id = %task_id,
            request_id = %resolution.request_id,
            status = ?status,
            "Human input resolved"
        );
        self.execution.log_action(
            ActionLogEntry::new(
                ActionKind::HumanInputResolved,
                format!("request {} {:?}", resolution.request_id, status),
            )
            .for_task(task_id),
        );
        self.publish(OrchestrationEvent::HumanInputResolved {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            request_id: resolution.request_id,
            status,
        });
        self.dirty.insert(task_id.clone());

        match resolution.outcome {
            ResolvedOutcome::Completed(result) => {
                self.complete(task_id, Some(agent_id), result.into_map());
            }
            ResolvedOutcome::Escalated {
                reason,
                feedback,
                timed_out,
            } => {
                if timed_out {
                    self.execution.log_error(
                        ErrorLogEntry::new(ErrorKind::HumanTimeout, reason.clone()).for_task(task_id),
                    );
                }
                self.escalate(task_id, reason, feedback);
            }
            ResolvedOutcome::Requeue { answer } => {
                if let Err(e) = self.execution.set_task_context(
                    task_id,
                    "human_clarification",
                    serde_json::Value::String(answer),
                ) {
                    self.log_transition_error(&e);
                }
                self.requeue(task_id, "clarification answered");
            }
            ResolvedOutcome::Cancelled => self.requeue(task_id, "interaction cancelled"),
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn complete(
        &mut self,
        task_id: &TaskId,
        agent_id: Option<&AgentId>,
        result: HashMap<String, serde_json::Value>,
    ) {
        let now = Utc::now();
        if let Err(e) = self.execution.complete_task(task_id, result, now) {
            self.log_transition_error(&e);
            return;
        }
        let unblocked = self.graph.mark_completed(task_id);
        info!(
            execution_id = %self.execution.id,
            task_id = %task_id,
            unblocked = unblocked.len(),
            "Task completed"
        );

        let mut entry = ActionLogEntry::new(ActionKind::TaskCompleted, "completed").for_task(task_id);
        if let Some(agent_id) = agent_id {
            entry = entry.by_agent(agent_id);
        }
        self.execution.log_action(entry);
        self.publish(OrchestrationEvent::TaskCompleted {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            agent_id: agent_id.cloned(),
            completed_at: now,
        });
        metrics::counter!("cadence_tasks_completed_total").increment(1);
        self.dirty.insert(task_id.clone());
    }

    /// Retryable failures go back to `Pending` until the attempt limit.
    fn fail_attempt(&mut self, task_id: &TaskId, agent_id: &AgentId, failure: ExecutionFailure) {
        warn!(
            execution_id = %self.execution.id,
            task_id = %task_id,
            agent_id = %agent_id,
            error = %failure,
            "Task attempt failed"
        );
        self.execution.log_error(
            ErrorLogEntry::new(ErrorKind::Execution, format!("{} (agent {})", failure, agent_id))
                .for_task(task_id),
        );

        if failure.retryable {
            match self.execution.bump_attempts(task_id) {
                Ok(attempts) if attempts < self.settings.max_task_attempts => {
                    self.requeue(
                        task_id,
                        format!(
                            "{} (attempt {} of {})",
                            failure.kind, attempts, self.settings.max_task_attempts
                        ),
                    );
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    self.log_transition_error(&e);
                    return;
                }
            }
        }

        self.fail(task_id, failure.to_string());
    }

    fn requeue(&mut self, task_id: &TaskId, reason: impl Into<String>) {
        let reason = reason.into();
        if let Err(e) = self.execution.requeue_task(task_id) {
            self.log_transition_error(&e);
            return;
        }
        debug!(task_id = %task_id, reason = %reason, "Task requeued");
        self.execution.log_action(
            ActionLogEntry::new(ActionKind::TaskRequeued, reason.clone()).for_task(task_id),
        );
        self.publish(OrchestrationEvent::TaskRequeued {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            reason,
        });
        self.dirty.insert(task_id.clone());
    }

    fn fail(&mut self, task_id: &TaskId, reason: String) {
        let now = Utc::now();
        if let Err(e) = self.execution.fail_task(task_id, now) {
            self.log_transition_error(&e);
            return;
        }
        self.graph.retire(task_id);
        self.record_failure(task_id, reason, now);
        self.cascade(task_id);
    }

    fn escalate(&mut self, task_id: &TaskId, reason: String, feedback: Option<String>) {
        let now = Utc::now();
        if let Err(e) = self.execution.escalate_task(task_id, feedback, now) {
            self.log_transition_error(&e);
            return;
        }
        self.graph.retire(task_id);
        warn!(execution_id = %self.execution.id, task_id = %task_id, reason = %reason, "Task escalated");
        self.execution.log_action(
            ActionLogEntry::new(ActionKind::TaskEscalated, reason.clone()).for_task(task_id),
        );
        self.publish(OrchestrationEvent::TaskEscalated {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            reason,
            escalated_at: now,
        });
        metrics::counter!("cadence_tasks_escalated_total").increment(1);
        self.dirty.insert(task_id.clone());
        self.cascade(task_id);
    }

    /// Fails every pending task downstream of `task_id`.
    fn cascade(&mut self, task_id: &TaskId) {
        for dependent in self.graph.transitive_dependents(task_id) {
            let pending = self
                .execution
                .task(&dependent)
                .is_some_and(|task| task.status == TaskStatus::Pending);
            if !pending {
                continue;
            }
            let now = Utc::now();
            if let Err(e) = self.execution.fail_task(&dependent, now) {
                self.log_transition_error(&e);
                continue;
            }
            self.graph.retire(&dependent);
            let reason = format!("upstream task {} did not complete", task_id);
            self.execution.log_error(
                ErrorLogEntry::new(ErrorKind::UpstreamFailure, reason.clone()).for_task(&dependent),
            );
            self.record_failure(&dependent, reason, now);
        }
    }

    fn record_failure(&mut self, task_id: &TaskId, reason: String, now: chrono::DateTime<Utc>) {
        warn!(execution_id = %self.execution.id, task_id = %task_id, reason = %reason, "Task failed");
        self.execution.log_action(
            ActionLogEntry::new(ActionKind::TaskFailed, reason.clone()).for_task(task_id),
        );
        self.publish(OrchestrationEvent::TaskFailed {
            execution_id: self.execution.id,
            task_id: task_id.clone(),
            reason,
            failed_at: now,
        });
        metrics::counter!("cadence_tasks_failed_total").increment(1);
        self.dirty.insert(task_id.clone());
    }

    fn log_transition_error(&mut self, error: &TransitionError) {
        error!(execution_id = %self.execution.id, error = %error, "Rejected task transition");
        self.execution
            .log_error(ErrorLogEntry::new(ErrorKind::Execution, error.to_string()));
    }

    // ------------------------------------------------------------------------
    // Persistence and observation
    // ------------------------------------------------------------------------

    fn publish(&self, event: OrchestrationEvent) {
        self.services.events.publish(event);
    }

    /// Writes what changed since the last flush and publishes a snapshot.
    /// Store failures are logged and never stop the run.
    async fn flush(&mut self) {
        let id = self.execution.id;
        let store = Arc::clone(&self.services.store);
        let mut failures = Vec::new();

        for task_id in std::mem::take(&mut self.dirty) {
            if let Some(task) = self.execution.task(&task_id) {
                if let Err(e) = store.update_task(id, task).await {
                    failures.push(format!("task {}: {}", task_id, e));
                }
            }
        }
        for entry in &self.execution.action_log[self.flushed_actions..] {
            if let Err(e) = store.append_action(id, entry).await {
                failures.push(format!("action log: {}", e));
            }
        }
        self.flushed_actions = self.execution.action_log.len();
        for entry in &self.execution.error_log[self.flushed_errors..] {
            if let Err(e) = store.append_error(id, entry).await {
                failures.push(format!("error log: {}", e));
            }
        }
        self.flushed_errors = self.execution.error_log.len();

        // One write per status change; a failed write is not retried.
        if self.execution.status != self.flushed_status {
            let at = self
                .execution
                .completed_at
                .filter(|_| self.execution.status.is_terminal())
                .unwrap_or_else(Utc::now);
            if let Err(e) = store.update_status(id, self.execution.status, at).await {
                failures.push(format!("status: {}", e));
            }
            self.flushed_status = self.execution.status;
        }

        for failure in failures {
            warn!(execution_id = %id, "Failed to persist execution state: {}", failure);
            self.execution
                .log_error(ErrorLogEntry::new(ErrorKind::Persistence, failure));
        }
        // Persistence entries stay in memory and in the final record only,
        // so a failing store cannot feed its own error log.
        self.flushed_errors = self.execution.error_log.len();
        self.snapshot.send_replace(self.execution.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentNode, AgentRole};
    use crate::domain::execution::ExecutionId;
    use crate::domain::reasoning::{ReasoningEngine, ReasoningError, ReasoningReply, ReasoningRequest};
    use crate::domain::repository::RepositoryError;
    use crate::domain::workflow::{TemplateNode, WorkflowTask, WorkflowTemplate};
    use crate::infrastructure::delivery::{MessageDispatcher, TracingDeliveryChannel};
    use crate::infrastructure::repositories::InMemoryExecutionStore;
    use async_trait::async_trait;
    use chrono::DateTime;

    struct DoneEngine;

    #[async_trait]
    impl ReasoningEngine for DoneEngine {
        async fn reason(&self, _request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
            Ok(ReasoningReply::text("FINAL: done\nCONFIDENCE: 0.9"))
        }
    }

    /// Accepts nothing.
    struct UnavailableStore;

    fn unavailable() -> RepositoryError {
        RepositoryError::Storage("disk unavailable".to_string())
    }

    #[async_trait]
    impl ExecutionStore for UnavailableStore {
        async fn create(&self, _execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
        async fn save(&self, _execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
        async fn find_by_id(&self, _id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError> {
            Err(unavailable())
        }
        async fn list(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            Err(unavailable())
        }
        async fn update_status(
            &self,
            _id: ExecutionId,
            _status: ExecutionStatus,
            _at: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
        async fn update_task(&self, _id: ExecutionId, _task: &WorkflowTask) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
        async fn append_action(&self, _id: ExecutionId, _entry: &ActionLogEntry) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
        async fn append_error(&self, _id: ExecutionId, _entry: &ErrorLogEntry) -> Result<(), RepositoryError> {
            Err(unavailable())
        }
    }

    fn solo_organization() -> Organization {
        Organization::new("org", "Org").with_agent(AgentNode::new("solo", "Solo", AgentRole::Specialist))
    }

    fn scheduler(
        organization: &Organization,
        store: Arc<dyn ExecutionStore>,
        control: watch::Receiver<ControlState>,
    ) -> Scheduler {
        let template = WorkflowTemplate::new("pair", "Pair")
            .with_node(TemplateNode::new("draft", "Draft"))
            .with_node(TemplateNode::new("review", "Review"));
        let execution = WorkflowExecution::new(
            ExecutionId::new(),
            &template,
            organization.id.clone(),
            "alice",
            HashMap::new(),
        );
        let graph = TaskGraph::build(&execution.tasks).unwrap();

        let (dispatcher, _handle) = MessageDispatcher::spawn(Arc::new(TracingDeliveryChannel));
        let coordinator = Arc::new(HumanInteractionCoordinator::new(
            Arc::new(dispatcher),
            Duration::from_secs(5),
        ));
        let executor = Arc::new(TaskExecutor::new(
            Arc::new(DoneEngine),
            Arc::clone(&coordinator),
            Duration::from_secs(5),
        ));
        let settings = SchedulerSettings::resolve(
            &OrchestrationSettings {
                poll_interval: Duration::from_millis(10),
                max_execution_time: Duration::from_secs(60),
                ..Default::default()
            },
            &ExecutionPolicy::default(),
        );
        let (snapshot, _) = watch::channel(execution.clone());

        Scheduler::new(
            execution,
            graph,
            organization,
            settings,
            SchedulerServices {
                executor,
                coordinator,
                store,
                events: EventBus::new(64),
            },
            control,
            CancellationToken::new(),
            snapshot,
        )
    }

    fn persistence_entries(scheduler: &Scheduler) -> usize {
        scheduler
            .execution
            .error_log
            .iter()
            .filter(|entry| entry.kind == ErrorKind::Persistence)
            .count()
    }

    #[tokio::test]
    async fn test_failing_store_does_not_feed_its_own_error_log() {
        let (_control, receiver) = watch::channel(ControlState::Running);
        let mut scheduler = scheduler(&solo_organization(), Arc::new(UnavailableStore), receiver);

        scheduler.dirty.insert(TaskId::from("draft"));
        scheduler.flush().await;
        assert_eq!(persistence_entries(&scheduler), 1);

        // Idle polls while a task waits on a human
        for _ in 0..10 {
            scheduler.flush().await;
        }
        assert_eq!(persistence_entries(&scheduler), 1);

        scheduler.execution.start(Utc::now(), Duration::from_secs(60));
        scheduler
            .execution
            .log_error(ErrorLogEntry::new(ErrorKind::Execution, "agent crashed"));
        scheduler.flush().await;
        // One failed status write and one failed append of the new entry
        assert_eq!(persistence_entries(&scheduler), 3);

        for _ in 0..10 {
            scheduler.flush().await;
        }
        assert_eq!(persistence_entries(&scheduler), 3);
        assert_eq!(scheduler.snapshot.borrow().error_log.len(), 4);
    }

    #[tokio::test]
    async fn test_busy_agent_does_not_spend_assignment_budget() {
        let (_control, receiver) = watch::channel(ControlState::Running);
        let store = Arc::new(InMemoryExecutionStore::new());
        let mut scheduler = scheduler(&solo_organization(), store, receiver);
        scheduler.registry.acquire(&AgentId::from("solo")).unwrap();

        let review = TaskId::from("review");
        for _ in 0..50 {
            assert!(scheduler.assign(std::slice::from_ref(&review)).is_empty());
        }
        let task = scheduler.execution.task(&review).unwrap();
        assert_eq!(task.assignment_retries, 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(scheduler.registry.load(&AgentId::from("solo")), 1);

        scheduler.registry.release(&AgentId::from("solo"));
        let launches = scheduler.assign(std::slice::from_ref(&review));
        assert_eq!(launches.len(), 1);
        assert_eq!(scheduler.registry.load(&AgentId::from("solo")), 1);
    }

    #[tokio::test]
    async fn test_idle_organization_spends_assignment_budget() {
        let (_control, receiver) = watch::channel(ControlState::Running);
        let store = Arc::new(InMemoryExecutionStore::new());
        let mut scheduler = scheduler(&Organization::new("empty", "Empty"), store, receiver);
        let budget = scheduler.settings.assignment_retry_budget;

        let draft = TaskId::from("draft");
        for _ in 0..budget {
            assert!(scheduler.assign(std::slice::from_ref(&draft)).is_empty());
        }
        let task = scheduler.execution.task(&draft).unwrap();
        assert_eq!(task.assignment_retries, budget);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(scheduler
            .execution
            .error_log
            .iter()
            .any(|entry| entry.kind == ErrorKind::AssignmentFailure));
    }

    #[tokio::test]
    async fn test_dropped_control_handle_cancels_paused_run() {
        let (control, receiver) = watch::channel(ControlState::Paused);
        let store = Arc::new(InMemoryExecutionStore::new());
        let scheduler = scheduler(&solo_organization(), store.clone(), receiver);
        store.create(&scheduler.execution).await.unwrap();
        drop(control);

        let execution = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("a paused run without a control handle must end");
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.completed.is_empty());
        assert!(execution.current.is_empty());
    }

    #[test]
    fn test_policy_caps_execution_time() {
        let settings = OrchestrationSettings {
            max_execution_time: Duration::from_secs(600),
            ..Default::default()
        };
        let policy = ExecutionPolicy {
            max_execution_time: Some(Duration::from_secs(60)),
            human_supervision: true,
            parallel_execution: false,
        };

        let resolved = SchedulerSettings::resolve(&settings, &policy);
        assert_eq!(resolved.max_execution_time, Duration::from_secs(60));
        assert!(resolved.force_approval);
        assert!(!resolved.parallel_execution);
        assert_eq!(resolved.assignment_retry_budget, 20);
    }

    #[test]
    fn test_policy_cannot_extend_execution_time() {
        let settings = OrchestrationSettings {
            max_execution_time: Duration::from_secs(60),
            ..Default::default()
        };
        let policy = ExecutionPolicy {
            max_execution_time: Some(Duration::from_secs(3600)),
            ..Default::default()
        };

        let resolved = SchedulerSettings::resolve(&settings, &policy);
        assert_eq!(resolved.max_execution_time, Duration::from_secs(60));
        assert!(resolved.parallel_execution);
    }
}
