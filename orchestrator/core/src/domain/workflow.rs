// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Domain Model
//!
//! A [`WorkflowTemplate`] is the operator's declaration: task nodes with an
//! objective and completion criteria, and edges expressing dependencies. Every
//! execution instantiates the template into its own [`WorkflowTask`] list.
//!
//! # Architectural Context
//!
//! - **Layer:** Domain Layer
//! - **Aggregate Root:** `WorkflowExecution` (see `execution.rs`) owns the tasks
//! - **Invariants:** dependency edges are checked by `TaskGraph::build` when an
//!   execution is created, never afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::domain::agent::AgentId;

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task identifier, taken from the template node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Template
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub completion_criteria: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl TemplateNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            name: name.into(),
            description: String::new(),
            objective: String::new(),
            completion_criteria: String::new(),
            context: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = objective.into();
        self
    }

    pub fn with_completion_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.completion_criteria = criteria.into();
        self
    }
}

/// `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateEdge {
    pub from: TaskId,
    pub to: TaskId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<TemplateNode>,
    #[serde(default)]
    pub edges: Vec<TemplateEdge>,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TemplateId::new(id),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: TemplateNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge meaning `to` depends on `from`.
    pub fn with_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(TemplateEdge {
            from: TaskId::new(from),
            to: TaskId::new(to),
        });
        self
    }

    /// Builds one pending task per node, with dependencies mirroring the edges.
    ///
    /// Edges pointing at unknown nodes are kept on the task so that graph
    /// validation can report them.
    pub fn instantiate_tasks(&self) -> Vec<WorkflowTask> {
        self.nodes
            .iter()
            .map(|node| {
                let dependencies = self
                    .edges
                    .iter()
                    .filter(|edge| edge.to == node.id)
                    .map(|edge| edge.from.clone())
                    .collect();
                WorkflowTask::from_node(node, dependencies)
            })
            .collect()
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    WaitingApproval,
    /// Human rejection or human-response timeout. Terminal, distinct from failure.
    Escalated,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Escalated
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::WaitingApproval => "waiting_approval",
            TaskStatus::Escalated => "escalated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub objective: String,
    pub completion_criteria: String,
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub dependencies: BTreeSet<TaskId>,
    pub context: HashMap<String, serde_json::Value>,
    pub result: HashMap<String, serde_json::Value>,
    pub human_feedback: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Retryable execution failures so far (rejected handoffs).
    #[serde(default)]
    pub attempts: u32,
    /// Successful handoffs so far.
    #[serde(default)]
    pub handoffs: u32,
    /// Charged ticks without an eligible agent.
    #[serde(default)]
    pub assignment_retries: u32,
}

impl WorkflowTask {
    pub fn from_node(node: &TemplateNode, dependencies: BTreeSet<TaskId>) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            objective: node.objective.clone(),
            completion_criteria: node.completion_criteria.clone(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            dependencies,
            context: node.context.clone(),
            result: HashMap::new(),
            human_feedback: None,
            started_at: None,
            completed_at: None,
            attempts: 0,
            handoffs: 0,
            assignment_retries: 0,
        }
    }

    /// Name and description, the text assignment scoring matches against.
    pub fn scoring_text(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate_mirrors_edges() {
        let template = WorkflowTemplate::new("diamond", "Diamond")
            .with_node(TemplateNode::new("a", "A"))
            .with_node(TemplateNode::new("b", "B"))
            .with_node(TemplateNode::new("c", "C"))
            .with_node(TemplateNode::new("d", "D"))
            .with_edge("a", "b")
            .with_edge("a", "c")
            .with_edge("b", "d")
            .with_edge("c", "d");

        let tasks = template.instantiate_tasks();
        let deps = |id: &str| {
            tasks
                .iter()
                .find(|t| t.id.as_str() == id)
                .map(|t| t.dependencies.clone())
                .unwrap()
        };

        assert!(deps("a").is_empty());
        assert_eq!(deps("b"), BTreeSet::from([TaskId::from("a")]));
        assert_eq!(deps("c"), BTreeSet::from([TaskId::from("a")]));
        assert_eq!(deps("d"), BTreeSet::from([TaskId::from("b"), TaskId::from("c")]));

        // Every edge shows up as exactly one dependency and nothing else does.
        let edge_count: usize = tasks.iter().map(|t| t.dependencies.len()).sum();
        assert_eq!(edge_count, template.edges.len());
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Escalated.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::WaitingApproval.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}
