// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Graph
//!
//! Arena + index representation of an execution's dependency DAG. Tasks are
//! addressed by position; edges are stored as index lists in both directions.
//! Acyclicity is checked once, at build time, with Kahn's algorithm.
//!
//! Readiness is tracked incrementally: every task carries a count of completed
//! dependencies, bumped when a dependency completes. A task is unblocked when
//! that count equals its dependency count, so the check is O(1) and no tick
//! re-walks the graph.

use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

use crate::domain::workflow::{TaskId, WorkflowTask};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow has no tasks")]
    EmptyGraph,

    #[error("task id {0} is declared more than once")]
    DuplicateTask(TaskId),

    #[error("task {task} depends on unknown task {dependency}")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    #[error("dependency cycle among tasks: {}", format_ids(.0))]
    Cycle(Vec<TaskId>),

    #[error("invalid organization: {0}")]
    Organization(String),
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct TaskGraph {
    ids: Vec<TaskId>,
    index: HashMap<TaskId, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    /// Position of each task in the topological order.
    rank: Vec<usize>,
    order: Vec<usize>,
    completed_deps: Vec<usize>,
    completed: Vec<bool>,
    /// Unblocked, not yet retired tasks keyed by topological rank.
    unblocked: BTreeSet<usize>,
}

impl TaskGraph {
    /// Validates the dependency sets of `tasks` and builds the graph.
    pub fn build(tasks: &[WorkflowTask]) -> Result<Self, ValidationError> {
        if tasks.is_empty() {
            return Err(ValidationError::EmptyGraph);
        }

        let mut index = HashMap::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), position).is_some() {
                return Err(ValidationError::DuplicateTask(task.id.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (position, task) in tasks.iter().enumerate() {
            for dependency in &task.dependencies {
                let Some(&dep) = index.get(dependency) else {
                    return Err(ValidationError::DanglingDependency {
                        task: task.id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                dependencies[position].push(dep);
                dependents[dep].push(position);
            }
        }

        // Kahn's algorithm, seeded in declaration order so the result is stable.
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(tasks.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != tasks.len() {
            let cycle = (0..tasks.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| tasks[i].id.clone())
                .collect();
            return Err(ValidationError::Cycle(cycle));
        }

        let mut rank = vec![0; tasks.len()];
        for (position, &node) in order.iter().enumerate() {
            rank[node] = position;
        }

        let unblocked = (0..tasks.len())
            .filter(|&i| dependencies[i].is_empty())
            .map(|i| rank[i])
            .collect();

        Ok(Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            index,
            dependencies,
            dependents,
            rank,
            order,
            completed_deps: vec![0; tasks.len()],
            completed: vec![false; tasks.len()],
            unblocked,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn topological_order(&self) -> impl Iterator<Item = &TaskId> {
        self.order.iter().map(|&i| &self.ids[i])
    }

    /// All `(dependency, dependent)` pairs.
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(task, deps)| {
                deps.iter()
                    .map(move |&dep| (self.ids[dep].clone(), self.ids[task].clone()))
            })
            .collect()
    }

    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.index
            .get(id)
            .map(|&i| self.dependencies[i].iter().map(|&d| &self.ids[d]).collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&d| &self.ids[d]).collect())
            .unwrap_or_default()
    }

    /// True when every dependency of `id` has completed.
    pub fn is_unblocked(&self, id: &TaskId) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.completed_deps[i] == self.dependencies[i].len())
    }

    /// Unblocked tasks that have not been completed or retired, in
    /// topological order. Callers still filter on task status.
    pub fn unblocked(&self) -> impl Iterator<Item = &TaskId> {
        self.unblocked.iter().map(|&rank| &self.ids[self.order[rank]])
    }

    /// Records completion of `id` and returns the dependents it unblocked.
    /// Completing the same task twice is a no-op.
    pub fn mark_completed(&mut self, id: &TaskId) -> Vec<TaskId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        if self.completed[node] {
            return Vec::new();
        }
        self.completed[node] = true;
        self.unblocked.remove(&self.rank[node]);

        let mut newly_unblocked = Vec::new();
        for &next in &self.dependents[node] {
            self.completed_deps[next] += 1;
            if self.completed_deps[next] == self.dependencies[next].len() {
                self.unblocked.insert(self.rank[next]);
                newly_unblocked.push(self.ids[next].clone());
            }
        }
        newly_unblocked
    }

    /// Drops a task that ended without completing from the unblocked set.
    pub fn retire(&mut self, id: &TaskId) {
        if let Some(&node) = self.index.get(id) {
            self.unblocked.remove(&self.rank[node]);
        }
    }

    /// Every task reachable through dependent edges, in topological order.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.ids.len()];
        let mut stack = self.dependents[start].clone();
        while let Some(node) = stack.pop() {
            if !seen[node] {
                seen[node] = true;
                stack.extend(self.dependents[node].iter().copied());
            }
        }
        self.order
            .iter()
            .filter(|&&node| seen[node])
            .map(|&node| self.ids[node].clone())
            .collect()
    }
}
