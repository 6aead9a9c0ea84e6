// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human Interaction Domain Model
//!
//! Requests raised by a task executor when a human must approve a result or
//! answer a clarifying question. A request is resolved exactly once: by the
//! first accepted response, by its deadline passing, or by its execution being
//! cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::execution::ExecutionId;
use crate::domain::workflow::TaskId;

/// Correlation id binding a request to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Approval,
    Clarification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Responded,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDecision {
    Approve,
    Reject,
    Answer(String),
}

impl fmt::Display for ResponseDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseDecision::Approve => f.write_str("approve"),
            ResponseDecision::Reject => f.write_str("reject"),
            ResponseDecision::Answer(text) => write!(f, "answer: {}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanResponse {
    pub decision: ResponseDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<String>,
}

impl HumanResponse {
    pub fn approve(comment: Option<String>) -> Self {
        Self {
            decision: ResponseDecision::Approve,
            comment,
            responded_by: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            decision: ResponseDecision::Reject,
            comment: Some(reason.into()),
            responded_by: None,
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            decision: ResponseDecision::Answer(text.into()),
            comment: None,
            responded_by: None,
        }
    }

    pub fn by(mut self, responder: impl Into<String>) -> Self {
        self.responded_by = Some(responder.into());
        self
    }
}

/// How a request ended, as seen by whoever waits on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionResolution {
    Responded(HumanResponse),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInteractionRequest {
    pub id: RequestId,
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    /// Addressee, the initiating user of the execution.
    pub user_id: String,
    pub kind: InteractionKind,
    pub message: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: RequestStatus,
    pub response: Option<HumanResponse>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl HumanInteractionRequest {
    /// Checks that `response` is a legal answer to this request.
    pub fn accepts(&self, response: &HumanResponse) -> Result<(), InteractionError> {
        let invalid = |reason: &str| InteractionError::InvalidResponse {
            request: self.id,
            reason: reason.to_string(),
        };
        match (&self.kind, &response.decision) {
            (InteractionKind::Approval, ResponseDecision::Approve | ResponseDecision::Reject) => Ok(()),
            (InteractionKind::Approval, ResponseDecision::Answer(_)) => {
                Err(invalid("approval requests take approve or reject"))
            }
            (InteractionKind::Clarification, ResponseDecision::Answer(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(invalid("answer cannot be empty"));
                }
                if !self.options.is_empty()
                    && !self.options.iter().any(|o| o.trim().eq_ignore_ascii_case(text))
                {
                    return Err(invalid("answer is not one of the allowed options"));
                }
                Ok(())
            }
            (InteractionKind::Clarification, _) => Err(invalid("clarification requests take an answer")),
        }
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            id: self.id,
            execution_id: self.execution_id,
            task_id: self.task_id.clone(),
            agent_id: self.agent_id.clone(),
            kind: self.kind,
            message: self.message.clone(),
            options: self.options.clone(),
            created_at: self.created_at,
            deadline: self.deadline,
        }
    }
}

/// Pending request as listed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: RequestId,
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub kind: InteractionKind,
    pub message: String,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InteractionError {
    #[error("human interaction request {0} not found")]
    NotFound(RequestId),

    #[error("human interaction request {0} was already resolved")]
    AlreadyResolved(RequestId),

    #[error("invalid response to request {request}: {reason}")]
    InvalidResponse { request: RequestId, reason: String },

    #[error("no pending request for user {0}")]
    NoPendingRequest(String),

    #[error("user {user} has {pending} pending requests; a correlation id is required")]
    AmbiguousResponse { user: String, pending: usize },

    #[error("execution {0} has no registered initiator")]
    UnknownExecution(ExecutionId),

    #[error("outbound delivery failed: {0}")]
    Delivery(String),
}
