// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cadence Core
//!
//! Workflow orchestration engine: dependency-aware scheduling of tasks onto a
//! pool of reasoning agents, with handoffs and human-in-the-loop approvals.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` holds types and ports, `application` the scheduler
//!   and executor, `infrastructure` the adapters (stores, delivery, manifests,
//!   reasoning engines)

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
