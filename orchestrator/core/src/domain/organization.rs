// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Organization: the agent catalog a workflow runs against, plus the execution
//! policy that applies to every execution started for it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::domain::agent::{AgentDefinitionError, AgentId, AgentNode};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub String);

impl OrganizationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Caps the node-wide maximum execution time when shorter.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<Duration>,
    /// Forces every task through the approval gate.
    #[serde(default)]
    pub human_supervision: bool,
    /// When false, at most one task is launched per scheduler tick.
    #[serde(default = "default_parallel")]
    pub parallel_execution: bool,
}

fn default_parallel() -> bool {
    true
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_execution_time: None,
            human_supervision: false,
            parallel_execution: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub agents: Vec<AgentNode>,
    #[serde(default)]
    pub entry_points: Vec<AgentId>,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

impl Organization {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: OrganizationId::new(id),
            name: name.into(),
            agents: Vec::new(),
            entry_points: Vec::new(),
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_agent(mut self, agent: AgentNode) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentNode> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Validates every agent definition and rejects duplicate ids.
    pub fn validate(&self) -> Result<(), AgentDefinitionError> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !seen.insert(&agent.id) {
                return Err(AgentDefinitionError::DuplicateId(agent.id.clone()));
            }
        }
        Ok(())
    }

    /// Handoff targets that do not name an agent of this organization.
    pub fn unknown_handoff_targets(&self) -> Vec<(AgentId, AgentId)> {
        let known: HashSet<&AgentId> = self.agents.iter().map(|a| &a.id).collect();
        self.agents
            .iter()
            .flat_map(|agent| {
                agent
                    .can_handoff_to
                    .iter()
                    .filter(|target| !known.contains(target))
                    .map(|target| (agent.id.clone(), target.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
