// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Registry
//!
//! One registry per execution, owned by that execution's scheduler. Agent
//! definitions are read-only; the per-agent load counter is the only mutable
//! state and is changed through [`AgentRegistry::acquire`] and
//! [`AgentRegistry::release`] only. `acquire` refuses to go past
//! `max_concurrent_tasks`, so no agent ever holds more tasks than it allows.

use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

use crate::domain::agent::{AgentId, AgentNode};
use crate::domain::organization::Organization;
use crate::domain::scoring::{self, Candidate};
use crate::domain::workflow::WorkflowTask;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent {0} is not part of the organization")]
    UnknownAgent(AgentId),

    #[error("agent {agent} is at capacity ({max} concurrent tasks)")]
    AtCapacity { agent: AgentId, max: usize },
}

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<AgentNode>,
    index: HashMap<AgentId, usize>,
    loads: Vec<usize>,
    entry_points: Vec<AgentId>,
}

impl AgentRegistry {
    pub fn from_organization(organization: &Organization) -> Self {
        let agents = organization.agents.clone();
        let index = agents
            .iter()
            .enumerate()
            .map(|(i, agent)| (agent.id.clone(), i))
            .collect();
        Self {
            loads: vec![0; agents.len()],
            agents,
            index,
            entry_points: organization.entry_points.clone(),
        }
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentNode> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentNode> {
        self.agents.iter()
    }

    pub fn load(&self, id: &AgentId) -> usize {
        self.index.get(id).map_or(0, |&i| self.loads[i])
    }

    pub fn total_load(&self) -> usize {
        self.loads.iter().sum()
    }

    pub fn has_capacity(&self, id: &AgentId) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.loads[i] < self.agents[i].max_concurrent_tasks)
    }

    /// Takes one slot of `id`. Returns the new load.
    pub fn acquire(&mut self, id: &AgentId) -> Result<usize, RegistryError> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| RegistryError::UnknownAgent(id.clone()))?;
        let max = self.agents[i].max_concurrent_tasks;
        if self.loads[i] >= max {
            return Err(RegistryError::AtCapacity {
                agent: id.clone(),
                max,
            });
        }
        self.loads[i] += 1;
        Ok(self.loads[i])
    }

    pub fn release(&mut self, id: &AgentId) {
        match self.index.get(id) {
            Some(&i) if self.loads[i] > 0 => self.loads[i] -= 1,
            Some(_) => warn!(agent_id = %id, "Released an agent that holds no load"),
            None => warn!(agent_id = %id, "Released an unknown agent"),
        }
    }

    pub fn release_all(&mut self) {
        self.loads.iter_mut().for_each(|load| *load = 0);
    }

    /// Eligible agents for `task`, best first.
    pub fn rank(&self, task: &WorkflowTask) -> Vec<Candidate> {
        scoring::rank_candidates(
            task,
            self.agents.iter().zip(self.loads.iter().copied()),
            &self.entry_points,
        )
    }

    pub fn best_candidate(&self, task: &WorkflowTask) -> Option<Candidate> {
        self.rank(task).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentRole, Capability};
    use crate::domain::workflow::TemplateNode;
    use std::collections::BTreeSet;

    fn organization() -> Organization {
        Organization::new("org", "Org")
            .with_agent(
                AgentNode::new("writer", "Writer", AgentRole::Specialist)
                    .with_capability(Capability::new("writing", "drafting documents", 0.9)),
            )
            .with_agent(
                AgentNode::new("helper", "Helper", AgentRole::Specialist)
                    .with_max_concurrent_tasks(2),
            )
    }

    #[test]
    fn test_acquire_respects_capacity() {
        let mut registry = AgentRegistry::from_organization(&organization());
        let writer = AgentId::from("writer");

        assert_eq!(registry.acquire(&writer), Ok(1));
        assert_eq!(
            registry.acquire(&writer),
            Err(RegistryError::AtCapacity {
                agent: writer.clone(),
                max: 1
            })
        );
        assert!(!registry.has_capacity(&writer));
        assert_eq!(registry.total_load(), 1);

        registry.release(&writer);
        assert_eq!(registry.load(&writer), 0);
        assert!(matches!(
            registry.acquire(&AgentId::from("ghost")),
            Err(RegistryError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_best_candidate_skips_busy_agents() {
        let mut registry = AgentRegistry::from_organization(&organization());
        let task = WorkflowTask::from_node(
            &TemplateNode::new("t", "Write draft").with_description("drafting the documents"),
            BTreeSet::new(),
        );

        assert_eq!(
            registry.best_candidate(&task).unwrap().agent_id,
            AgentId::from("writer")
        );

        registry.acquire(&AgentId::from("writer")).unwrap();
        assert_eq!(
            registry.best_candidate(&task).unwrap().agent_id,
            AgentId::from("helper")
        );

        registry.acquire(&AgentId::from("helper")).unwrap();
        registry.acquire(&AgentId::from("helper")).unwrap();
        assert!(registry.best_candidate(&task).is_none());

        registry.release_all();
        assert_eq!(registry.total_load(), 0);
    }
}
