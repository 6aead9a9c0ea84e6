// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reasoning Engine Port
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Interface the task executor's strategies call for each
//!   reasoning step. Adapters live in `infrastructure/llm/`.
//!
//! The engine only turns a prompt into text. Parsing that text into an action,
//! bounding it with a timeout and cancelling it are the executor's concerns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentRole};

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError>;
}

/// Which half of a strategy issued the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPhase {
    Plan,
    Act,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub role: AgentRole,
    /// Model hint from the agent definition, if any.
    pub model: Option<String>,
    pub phase: ReasoningPhase,
    /// 1-based iteration within the current attempt.
    pub iteration: u32,
    pub system_prompt: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningReply {
    pub text: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub model: String,
}

impl ReasoningReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),
}
