// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator
//!
//! The control surface API layers talk to. One instance owns the shared
//! services (executor, interaction coordinator, event bus) and a handle for
//! every execution it is running. Each execution runs on its own scheduler
//! task; the orchestrator only signals it through the control channel and
//! reads the snapshots it publishes.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::executor::TaskExecutor;
use crate::application::scheduler::{ControlState, Scheduler, SchedulerServices, SchedulerSettings};
use crate::domain::execution::{
    ActionLogEntry, ErrorLogEntry, ExecutionId, ExecutionStatusReport, WorkflowExecution,
};
use crate::domain::node_config::OrchestrationSettings;
use crate::domain::organization::OrganizationId;
use crate::domain::reasoning::ReasoningEngine;
use crate::domain::repository::{
    ExecutionStore, OrganizationProvider, RepositoryError, TemplateProvider,
};
use crate::domain::task_graph::{TaskGraph, ValidationError};
use crate::domain::workflow::TemplateId;
use crate::infrastructure::delivery::{DeliveryChannel, MessageDispatcher};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::human_interaction::HumanInteractionCoordinator;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow template {0} not found")]
    TemplateNotFound(TemplateId),

    #[error("organization {0} not found")]
    OrganizationNotFound(OrganizationId),

    #[error("execution {0} not found")]
    ExecutionNotFound(ExecutionId),

    #[error("invalid workflow: {0}")]
    Validation(#[from] ValidationError),

    #[error("execution store error: {0}")]
    Repository(#[from] RepositoryError),
}

/// External collaborators an orchestrator is built from.
pub struct OrchestratorPorts {
    pub templates: Arc<dyn TemplateProvider>,
    pub organizations: Arc<dyn OrganizationProvider>,
    pub store: Arc<dyn ExecutionStore>,
    pub engine: Arc<dyn ReasoningEngine>,
    pub delivery: Arc<dyn DeliveryChannel>,
}

struct ExecutionHandle {
    control: watch::Sender<ControlState>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<WorkflowExecution>,
}

type ActiveExecutions = Arc<RwLock<HashMap<ExecutionId, ExecutionHandle>>>;

pub struct Orchestrator {
    templates: Arc<dyn TemplateProvider>,
    organizations: Arc<dyn OrganizationProvider>,
    settings: OrchestrationSettings,
    services: SchedulerServices,
    active: ActiveExecutions,
}

impl Orchestrator {
    /// Must be called inside a tokio runtime; starts the delivery dispatcher.
    pub fn new(ports: OrchestratorPorts, settings: OrchestrationSettings) -> Self {
        let (dispatcher, _dispatcher_task) = MessageDispatcher::spawn(ports.delivery);
        let coordinator = Arc::new(HumanInteractionCoordinator::new(
            Arc::new(dispatcher),
            settings.human_timeout,
        ));
        let executor = Arc::new(TaskExecutor::new(
            ports.engine,
            Arc::clone(&coordinator),
            settings.reasoning_timeout,
        ));
        let services = SchedulerServices {
            executor,
            coordinator,
            store: ports.store,
            events: EventBus::new(settings.event_bus_capacity),
        };
        Self {
            templates: ports.templates,
            organizations: ports.organizations,
            settings,
            services,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn coordinator(&self) -> &Arc<HumanInteractionCoordinator> {
        &self.services.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn settings(&self) -> &OrchestrationSettings {
        &self.settings
    }

    /// Validates and launches a new execution.
    ///
    /// Invalid templates (cycles, dangling dependencies, duplicate ids) and
    /// invalid agent definitions are rejected here; nothing is persisted and
    /// no scheduler starts.
    pub async fn start(
        &self,
        template_id: &TemplateId,
        organization_id: &OrganizationId,
        initiator: &str,
        context: HashMap<String, Value>,
    ) -> Result<ExecutionId, OrchestratorError> {
        let template = self
            .templates
            .get_template(template_id)
            .await?
            .ok_or_else(|| OrchestratorError::TemplateNotFound(template_id.clone()))?;
        let organization = self
            .organizations
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| OrchestratorError::OrganizationNotFound(organization_id.clone()))?;
        organization
            .validate()
            .map_err(|e| ValidationError::Organization(e.to_string()))?;

        let execution = WorkflowExecution::new(
            ExecutionId::new(),
            &template,
            organization.id.clone(),
            initiator,
            context,
        );
        let graph = TaskGraph::build(&execution.tasks).inspect_err(|e| {
            warn!(template_id = %template_id, error = %e, "Rejected workflow template");
        })?;
        let execution_id = execution.id;

        self.services.store.create(&execution).await?;
        self.services
            .coordinator
            .register_execution(execution_id, initiator)
            .await;

        let (control_tx, control_rx) = watch::channel(ControlState::Running);
        let (snapshot_tx, snapshot_rx) = watch::channel(execution.clone());
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            execution,
            graph,
            &organization,
            SchedulerSettings::resolve(&self.settings, &organization.policy),
            self.services.clone(),
            control_rx,
            cancel.clone(),
            snapshot_tx,
        );

        self.active.write().insert(
            execution_id,
            ExecutionHandle {
                control: control_tx,
                cancel,
                snapshot: snapshot_rx,
            },
        );

        let active = Arc::clone(&self.active);
        let coordinator = Arc::clone(&self.services.coordinator);
        tokio::spawn(async move {
            let finished = scheduler.run().await;
            coordinator.forget_execution(finished.id).await;
            active.write().remove(&finished.id);
        });

        info!(
            execution_id = %execution_id,
            template_id = %template_id,
            organization_id = %organization_id,
            initiator = %initiator,
            "Execution launched"
        );
        Ok(execution_id)
    }

    /// Latest known state: the live snapshot while running, the store after.
    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let live = self
            .active
            .read()
            .get(&execution_id)
            .map(|handle| handle.snapshot.borrow().clone());
        if let Some(execution) = live {
            return Ok(execution);
        }
        self.services
            .store
            .find_by_id(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    pub async fn get_status(
        &self,
        execution_id: ExecutionId,
    ) -> Result<ExecutionStatusReport, OrchestratorError> {
        Ok(self.get_execution(execution_id).await?.status_report())
    }

    pub async fn action_log(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ActionLogEntry>, OrchestratorError> {
        Ok(self.get_execution(execution_id).await?.action_log)
    }

    pub async fn error_log(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ErrorLogEntry>, OrchestratorError> {
        Ok(self.get_execution(execution_id).await?.error_log)
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionStatusReport>, OrchestratorError> {
        let stored = self.services.store.list().await?;
        let active = self.active.read();
        Ok(stored
            .into_iter()
            .map(|execution| match active.get(&execution.id) {
                Some(handle) => handle.snapshot.borrow().status_report(),
                None => execution.status_report(),
            })
            .collect())
    }

    /// Stops new launches. True only if the execution was running.
    pub fn pause(&self, execution_id: ExecutionId) -> bool {
        let paused = self.transition_control(execution_id, |state| match state {
            ControlState::Running => Some(ControlState::Paused),
            _ => None,
        });
        if paused {
            info!(execution_id = %execution_id, "Pause requested");
        }
        paused
    }

    /// True only if the execution was paused.
    pub fn resume(&self, execution_id: ExecutionId) -> bool {
        let resumed = self.transition_control(execution_id, |state| match state {
            ControlState::Paused => Some(ControlState::Running),
            _ => None,
        });
        if resumed {
            info!(execution_id = %execution_id, "Resume requested");
        }
        resumed
    }

    /// Cancels a non-terminal execution and closes its open interaction requests.
    pub async fn cancel(&self, execution_id: ExecutionId) -> bool {
        let cancelled = self.transition_control(execution_id, |state| match state {
            ControlState::Running | ControlState::Paused => Some(ControlState::Cancelled),
            ControlState::Cancelled => None,
        });
        if !cancelled {
            return false;
        }

        if let Some(handle) = self.active.read().get(&execution_id) {
            handle.cancel.cancel();
        }
        let closed = self
            .services
            .coordinator
            .cancel_for_execution(execution_id)
            .await;
        info!(execution_id = %execution_id, closed_requests = closed, "Execution cancelled");
        true
    }

    /// Waits until the execution reaches a terminal status.
    pub async fn wait_for_completion(
        &self,
        execution_id: ExecutionId,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let receiver = self
            .active
            .read()
            .get(&execution_id)
            .map(|handle| handle.snapshot.clone());

        if let Some(mut receiver) = receiver {
            let finished = receiver
                .wait_for(|execution| execution.status.is_terminal())
                .await
                .map(|execution| execution.clone());
            if let Ok(execution) = finished {
                return Ok(execution);
            }
        }

        self.services
            .store
            .find_by_id(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    /// Cancels every running execution and waits for each to settle.
    pub async fn shutdown(&self) {
        let running: Vec<ExecutionId> = self.active.read().keys().copied().collect();
        for execution_id in &running {
            self.cancel(*execution_id).await;
        }
        for execution_id in running {
            if let Err(e) = self.wait_for_completion(execution_id).await {
                warn!(execution_id = %execution_id, error = %e, "Execution did not settle during shutdown");
            }
        }
    }

    /// Applies `next` to the control state of a non-terminal execution.
    fn transition_control(
        &self,
        execution_id: ExecutionId,
        next: impl Fn(ControlState) -> Option<ControlState>,
    ) -> bool {
        let active = self.active.read();
        let Some(handle) = active.get(&execution_id) else {
            return false;
        };
        if handle.snapshot.borrow().status.is_terminal() {
            return false;
        }
        handle.control.send_if_modified(|state| match next(*state) {
            Some(updated) => {
                *state = updated;
                true
            }
            None => false,
        })
    }
}
