// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod strategies;

// Re-export the control surface for convenience
pub use executor::{ExecutionFailure, FailureKind, TaskExecutor, TaskResult};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorPorts};
pub use registry::{AgentRegistry, RegistryError};
pub use scheduler::{ControlState, SchedulerSettings};
pub use strategies::{parse_action, AgentAction};
