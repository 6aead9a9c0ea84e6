// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Domain Model
//!
//! An [`AgentNode`] is a declared worker in an organization: what it is good at
//! (capabilities with a confidence), how it reasons (strategy), how much work it
//! accepts at once, and when its output must pass a human gate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent identity, role/strategy enums and definition checks
//! - **Mutability:** Read-mostly. Live load lives in the application-layer
//!   `AgentRegistry`, never on the node itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Operator-authored agent identifier (e.g. `"researcher"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coordinator,
    Specialist,
    Validator,
    ToolExecutor,
    Researcher,
    Reviewer,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Specialist => "specialist",
            AgentRole::Validator => "validator",
            AgentRole::ToolExecutor => "tool_executor",
            AgentRole::Researcher => "researcher",
            AgentRole::Reviewer => "reviewer",
        };
        f.write_str(name)
    }
}

/// Reasoning strategy an agent runs its tasks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    PlanThenAct,
    #[default]
    ActObserve,
    Hybrid,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::PlanThenAct => "plan_then_act",
            StrategyKind::ActObserve => "act_observe",
            StrategyKind::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Self-declared proficiency in `[0, 1]`.
    pub confidence: f64,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    pub max_concurrent_tasks: usize,
    #[serde(default)]
    pub requires_human_approval: bool,
    /// Results whose confidence falls below this go through human approval.
    pub human_escalation_threshold: f64,
    #[serde(default)]
    pub can_handoff_to: BTreeSet<AgentId>,
    pub max_iterations: u32,
    /// Optional model hint forwarded to the reasoning engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AgentNode {
    /// Agent with conservative defaults: one task at a time, no approval gate,
    /// act-observe strategy and ten iterations.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            role,
            capabilities: Vec::new(),
            tools: Vec::new(),
            strategy: StrategyKind::default(),
            max_concurrent_tasks: 1,
            requires_human_approval: false,
            human_escalation_threshold: 0.0,
            can_handoff_to: BTreeSet::new(),
            max_iterations: 10,
            model: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_human_approval(mut self, required: bool) -> Self {
        self.requires_human_approval = required;
        self
    }

    pub fn with_escalation_threshold(mut self, threshold: f64) -> Self {
        self.human_escalation_threshold = threshold;
        self
    }

    pub fn with_handoff_target(mut self, target: impl Into<String>) -> Self {
        self.can_handoff_to.insert(AgentId::new(target));
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn can_handoff(&self, target: &AgentId) -> bool {
        self.can_handoff_to.contains(target)
    }

    /// Checks the numeric ranges of a definition.
    pub fn validate(&self) -> Result<(), AgentDefinitionError> {
        if self.id.0.trim().is_empty() {
            return Err(AgentDefinitionError::EmptyId);
        }
        for capability in &self.capabilities {
            if !(0.0..=1.0).contains(&capability.confidence) {
                return Err(AgentDefinitionError::ConfidenceOutOfRange {
                    agent: self.id.clone(),
                    capability: capability.name.clone(),
                    value: capability.confidence,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.human_escalation_threshold) {
            return Err(AgentDefinitionError::ThresholdOutOfRange {
                agent: self.id.clone(),
                value: self.human_escalation_threshold,
            });
        }
        if self.max_iterations == 0 {
            return Err(AgentDefinitionError::ZeroIterations(self.id.clone()));
        }
        if self.can_handoff_to.contains(&self.id) {
            return Err(AgentDefinitionError::SelfHandoff(self.id.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentDefinitionError {
    #[error("agent id cannot be empty")]
    EmptyId,

    #[error("capability '{capability}' of agent {agent} has confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange {
        agent: AgentId,
        capability: String,
        value: f64,
    },

    #[error("agent {agent} has human_escalation_threshold {value} outside [0, 1]")]
    ThresholdOutOfRange { agent: AgentId, value: f64 },

    #[error("agent {0} must allow at least one reasoning iteration")]
    ZeroIterations(AgentId),

    #[error("agent {0} lists itself as a handoff target")]
    SelfHandoff(AgentId),

    #[error("agent id {0} is declared more than once")]
    DuplicateId(AgentId),
}
