// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the end-to-end orchestration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::application::{Orchestrator, OrchestratorPorts};
use cadence_core::domain::agent::{AgentNode, AgentRole};
use cadence_core::domain::events::OrchestrationEvent;
use cadence_core::domain::execution::{
    ActionLogEntry, ErrorKind, ErrorLogEntry, ExecutionId, ExecutionStatus, WorkflowExecution,
};
use cadence_core::domain::human_interaction::RequestId;
use cadence_core::domain::node_config::OrchestrationSettings;
use cadence_core::domain::organization::{Organization, OrganizationId};
use cadence_core::domain::reasoning::{
    ReasoningEngine, ReasoningError, ReasoningReply, ReasoningRequest,
};
use cadence_core::domain::repository::{ExecutionStore, RepositoryError};
use cadence_core::domain::workflow::{TaskId, TemplateId, WorkflowTask, WorkflowTemplate};
use cadence_core::infrastructure::delivery::TracingDeliveryChannel;
use cadence_core::infrastructure::event_bus::EventReceiver;
use cadence_core::infrastructure::repositories::{
    InMemoryExecutionStore, InMemoryOrganizationProvider, InMemoryTemplateProvider,
};

enum Matcher {
    Agent(String),
    Prompt(String),
}

impl Matcher {
    fn matches(&self, request: &ReasoningRequest) -> bool {
        match self {
            Matcher::Agent(agent) => request.agent_id.as_str() == agent,
            Matcher::Prompt(needle) => request.prompt.contains(needle.as_str()),
        }
    }
}

/// Replies from per-agent or per-task queues, falling back to an immediate
/// `FINAL` answer. Tracks how many calls overlap.
pub struct ScriptedEngine {
    scripts: Mutex<Vec<(Matcher, VecDeque<String>)>>,
    fallback: String,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            fallback: "FINAL: done\nCONFIDENCE: 0.95".to_string(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn for_agent(self, agent: &str, replies: &[&str]) -> Self {
        self.push(Matcher::Agent(agent.to_string()), replies);
        self
    }

    /// Matches requests whose briefing names the task.
    pub fn for_task(self, task_name: &str, replies: &[&str]) -> Self {
        self.push(Matcher::Prompt(format!("# Task: {}\n", task_name)), replies);
        self
    }

    fn push(&self, matcher: Matcher, replies: &[&str]) {
        self.scripts.lock().push((
            matcher,
            replies.iter().map(|reply| reply.to_string()).collect(),
        ));
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls_by(&self, agent: &str) -> usize {
        self.calls.lock().iter().filter(|id| id.as_str() == agent).count()
    }

    fn next_reply(&self, request: &ReasoningRequest) -> String {
        let mut scripts = self.scripts.lock();
        scripts
            .iter_mut()
            .filter(|(matcher, queue)| !queue.is_empty() && matcher.matches(request))
            .find_map(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(request.agent_id.as_str().to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ReasoningReply::text(self.next_reply(request)))
    }
}

/// Millisecond polling and a one second human timeout.
pub fn fast_settings() -> OrchestrationSettings {
    OrchestrationSettings {
        poll_interval: Duration::from_millis(10),
        human_timeout: Duration::from_secs(1),
        max_execution_time: Duration::from_secs(20),
        reasoning_timeout: Duration::from_secs(5),
        assignment_retry_budget: 5,
        max_task_attempts: 3,
        max_handoffs_per_task: 3,
        event_bus_capacity: 1000,
    }
}

/// In-memory store whose writes after `create` fail.
pub struct UnreliableStore {
    inner: InMemoryExecutionStore,
}

impl UnreliableStore {
    pub fn failing() -> Self {
        Self {
            inner: InMemoryExecutionStore::new(),
        }
    }

    fn check(&self) -> Result<(), RepositoryError> {
        Err(RepositoryError::Storage("connection refused".to_string()))
    }
}

#[async_trait]
impl ExecutionStore for UnreliableStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.inner.create(execution).await
    }

    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.save(execution).await
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        self.inner.list().await
    }

    async fn update_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.update_status(id, status, at).await
    }

    async fn update_task(&self, id: ExecutionId, task: &WorkflowTask) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.update_task(id, task).await
    }

    async fn append_action(&self, id: ExecutionId, entry: &ActionLogEntry) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.append_action(id, entry).await
    }

    async fn append_error(&self, id: ExecutionId, entry: &ErrorLogEntry) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.append_error(id, entry).await
    }
}

pub fn persistence_errors(execution: &WorkflowExecution) -> usize {
    execution
        .error_log
        .iter()
        .filter(|entry| entry.kind == ErrorKind::Persistence)
        .count()
}

pub fn agent(id: &str) -> AgentNode {
    AgentNode::new(id, id, AgentRole::Specialist)
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<dyn ExecutionStore>,
    template_id: TemplateId,
    organization_id: OrganizationId,
}

impl Harness {
    pub fn new(
        template: WorkflowTemplate,
        organization: Organization,
        engine: ScriptedEngine,
        settings: OrchestrationSettings,
    ) -> Self {
        Self::with_store(
            template,
            organization,
            engine,
            settings,
            Arc::new(InMemoryExecutionStore::new()),
        )
    }

    pub fn with_store(
        template: WorkflowTemplate,
        organization: Organization,
        engine: ScriptedEngine,
        settings: OrchestrationSettings,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        let template_id = template.id.clone();
        let organization_id = organization.id.clone();
        let templates = InMemoryTemplateProvider::new();
        templates.insert(template);
        let organizations = InMemoryOrganizationProvider::new();
        organizations.insert(organization);

        let engine = Arc::new(engine);
        let orchestrator = Orchestrator::new(
            OrchestratorPorts {
                templates: Arc::new(templates),
                organizations: Arc::new(organizations),
                store: store.clone(),
                engine: engine.clone(),
                delivery: Arc::new(TracingDeliveryChannel),
            },
            settings,
        );
        Self {
            orchestrator,
            engine,
            store,
            template_id,
            organization_id,
        }
    }

    pub async fn start(&self) -> ExecutionId {
        self.orchestrator
            .start(&self.template_id, &self.organization_id, "alice", HashMap::new())
            .await
            .expect("execution should start")
    }

    pub async fn finish(&self, execution_id: ExecutionId) -> WorkflowExecution {
        tokio::time::timeout(
            Duration::from_secs(15),
            self.orchestrator.wait_for_completion(execution_id),
        )
        .await
        .expect("execution should finish in time")
        .expect("execution should be known")
    }
}

pub fn drain(receiver: &mut EventReceiver) -> Vec<OrchestrationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Waits for the next human interaction request published on the bus.
pub async fn next_human_request(receiver: &mut EventReceiver) -> (TaskId, RequestId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let OrchestrationEvent::HumanInputRequested {
                task_id, request_id, ..
            } = receiver.recv().await.expect("event bus open")
            {
                return (task_id, request_id);
            }
        }
    })
    .await
    .expect("a human request should be published")
}

pub fn position(
    events: &[OrchestrationEvent],
    predicate: impl Fn(&OrchestrationEvent) -> bool,
) -> usize {
    events
        .iter()
        .position(predicate)
        .expect("expected event was not published")
}

pub fn started(task: &str) -> impl Fn(&OrchestrationEvent) -> bool + '_ {
    move |event| matches!(event, OrchestrationEvent::TaskStarted { task_id, .. } if task_id.as_str() == task)
}

pub fn completed(task: &str) -> impl Fn(&OrchestrationEvent) -> bool + '_ {
    move |event| matches!(event, OrchestrationEvent::TaskCompleted { task_id, .. } if task_id.as_str() == task)
}
