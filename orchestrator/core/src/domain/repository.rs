// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Contracts for the collaborators the engine consumes but does not own.
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|-----------------|
//! | `ExecutionStore` | `WorkflowExecution` records and their logs | `InMemoryExecutionStore` |
//! | `TemplateProvider` | Workflow templates by id | `InMemoryTemplateProvider` |
//! | `OrganizationProvider` | Agent catalogs and policy by id | `InMemoryOrganizationProvider` |
//!
//! Serialization and durability are the implementation's concern; the engine
//! only relies on each call being atomic for the record it touches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::execution::{
    ActionLogEntry, ErrorLogEntry, ExecutionId, ExecutionStatus, WorkflowExecution,
};
use crate::domain::organization::{Organization, OrganizationId};
use crate::domain::workflow::{TemplateId, WorkflowTask, WorkflowTemplate};

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution record. Fails if the id already exists.
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    /// Replace the whole record.
    async fn save(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError>;

    async fn list(&self) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    /// Status and its timestamp move together.
    async fn update_status(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Replace one task of an execution, keeping the id sets in step with its status.
    async fn update_task(&self, id: ExecutionId, task: &WorkflowTask) -> Result<(), RepositoryError>;

    async fn append_action(&self, id: ExecutionId, entry: &ActionLogEntry) -> Result<(), RepositoryError>;

    async fn append_error(&self, id: ExecutionId, entry: &ErrorLogEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn get_template(&self, id: &TemplateId) -> Result<Option<WorkflowTemplate>, RepositoryError>;
}

#[async_trait]
pub trait OrganizationProvider: Send + Sync {
    async fn get_organization(&self, id: &OrganizationId) -> Result<Option<Organization>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
