// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Types, rules and ports of the orchestration engine. Nothing here performs
//! I/O or spawns tasks.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates (`WorkflowExecution`), value objects, the task
//!   graph, the capability scorer and the collaborator traits

pub mod agent;
pub mod events;
pub mod execution;
pub mod human_interaction;
pub mod node_config;
pub mod organization;
pub mod reasoning;
pub mod repository;
pub mod scoring;
pub mod task_graph;
pub mod workflow;
