// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory implementations of the repository ports.
//!
//! Each store keeps its records behind one `parking_lot::RwLock`, so every
//! call is atomic for the record it touches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::execution::{
    ActionLogEntry, ErrorLogEntry, ExecutionId, ExecutionStatus, WorkflowExecution,
};
use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::repository::{
    ExecutionStore, OrganizationProvider, RepositoryError, TemplateProvider,
};
use crate::domain::workflow::{TaskStatus, TemplateId, WorkflowTask, WorkflowTemplate};

#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<HashMap<ExecutionId, WorkflowExecution>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_execution<T>(
        &self,
        id: ExecutionId,
        f: impl FnOnce(&mut WorkflowExecution) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("execution {}", id)))?;
        f(execution)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!("execution {}", execution.id)));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions.write().insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut all: Vec<WorkflowExecution> = self.executions.read().values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        Ok(all)
    }

    async fn update_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.with_execution(id, |execution| {
            execution.status = status;
            match status {
                ExecutionStatus::Running if execution.started_at.is_none() => {
                    execution.started_at = Some(at);
                }
                s if s.is_terminal() => execution.completed_at = Some(at),
                _ => {}
            }
            Ok(())
        })
    }

    async fn update_task(&self, id: ExecutionId, task: &WorkflowTask) -> Result<(), RepositoryError> {
        self.with_execution(id, |execution| {
            let slot = execution
                .tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| RepositoryError::NotFound(format!("task {} in {}", task.id, id)))?;
            *slot = task.clone();

            execution.current.remove(&task.id);
            execution.completed.remove(&task.id);
            execution.failed.remove(&task.id);
            match task.status {
                TaskStatus::InProgress | TaskStatus::WaitingApproval => {
                    execution.current.insert(task.id.clone());
                }
                TaskStatus::Completed => {
                    execution.completed.insert(task.id.clone());
                }
                TaskStatus::Failed | TaskStatus::Escalated => {
                    execution.failed.insert(task.id.clone());
                }
                TaskStatus::Pending => {}
            }
            Ok(())
        })
    }

    async fn append_action(&self, id: ExecutionId, entry: &ActionLogEntry) -> Result<(), RepositoryError> {
        self.with_execution(id, |execution| {
            execution.action_log.push(entry.clone());
            Ok(())
        })
    }

    async fn append_error(&self, id: ExecutionId, entry: &ErrorLogEntry) -> Result<(), RepositoryError> {
        self.with_execution(id, |execution| {
            execution.error_log.push(entry.clone());
            Ok(())
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTemplateProvider {
    templates: Arc<RwLock<HashMap<TemplateId, WorkflowTemplate>>>,
}

impl InMemoryTemplateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a template.
    pub fn insert(&self, template: WorkflowTemplate) {
        self.templates.write().insert(template.id.clone(), template);
    }
}

#[async_trait]
impl TemplateProvider for InMemoryTemplateProvider {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        Ok(self.templates.read().get(id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOrganizationProvider {
    organizations: Arc<RwLock<HashMap<OrganizationId, Organization>>>,
}

impl InMemoryOrganizationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, organization: Organization) {
        self.organizations
            .write()
            .insert(organization.id.clone(), organization);
    }
}

#[async_trait]
impl OrganizationProvider for InMemoryOrganizationProvider {
    async fn get_organization(&self, id: &OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.organizations.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::workflow::{TaskId, TemplateNode};

    fn execution() -> WorkflowExecution {
        let template = WorkflowTemplate::new("tpl", "Template")
            .with_node(TemplateNode::new("a", "A"))
            .with_node(TemplateNode::new("b", "B"));
        WorkflowExecution::new(
            ExecutionId::new(),
            &template,
            OrganizationId::new("org"),
            "alice",
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryExecutionStore::new();
        let execution = execution();
        store.create(&execution).await.unwrap();
        assert!(matches!(
            store.create(&execution).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_task_moves_between_sets() {
        let store = InMemoryExecutionStore::new();
        let mut execution = execution();
        store.create(&execution).await.unwrap();

        let a = TaskId::from("a");
        execution.begin_task(&a, &AgentId::from("w"), Utc::now()).unwrap();
        store
            .update_task(execution.id, execution.task(&a).unwrap())
            .await
            .unwrap();
        let stored = store.find_by_id(execution.id).await.unwrap().unwrap();
        assert!(stored.current.contains(&a));

        execution.complete_task(&a, HashMap::new(), Utc::now()).unwrap();
        store
            .update_task(execution.id, execution.task(&a).unwrap())
            .await
            .unwrap();
        let stored = store.find_by_id(execution.id).await.unwrap().unwrap();
        assert!(!stored.current.contains(&a));
        assert!(stored.completed.contains(&a));
    }

    #[tokio::test]
    async fn test_status_and_logs() {
        let store = InMemoryExecutionStore::new();
        let execution = execution();
        store.create(&execution).await.unwrap();

        let now = Utc::now();
        store
            .update_status(execution.id, ExecutionStatus::Completed, now)
            .await
            .unwrap();
        store
            .append_error(
                execution.id,
                &ErrorLogEntry::new(crate::domain::execution::ErrorKind::Execution, "boom"),
            )
            .await
            .unwrap();

        let stored = store.find_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.completed_at, Some(now));
        assert_eq!(stored.error_log.len(), 1);

        assert!(matches!(
            store
                .update_status(ExecutionId::new(), ExecutionStatus::Failed, now)
                .await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_providers() {
        let templates = InMemoryTemplateProvider::new();
        templates.insert(WorkflowTemplate::new("tpl", "T"));
        assert!(templates
            .get_template(&TemplateId::new("tpl"))
            .await
            .unwrap()
            .is_some());
        assert!(templates
            .get_template(&TemplateId::new("nope"))
            .await
            .unwrap()
            .is_none());

        let orgs = InMemoryOrganizationProvider::new();
        orgs.insert(Organization::new("org", "Org"));
        assert!(orgs
            .get_organization(&OrganizationId::new("org"))
            .await
            .unwrap()
            .is_some());
    }
}
