// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Outbound delivery of human interaction requests.
//!
//! Every request is pushed onto one unbounded mpsc queue that a single
//! dispatcher task drains, handing messages to a [`DeliveryChannel`] one at a
//! time. One queue and one consumer means delivery order equals enqueue order,
//! for every user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::human_interaction::RequestSummary;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    /// Monotonic per dispatcher, assigned at enqueue time.
    pub sequence: u64,
    pub user_id: String,
    pub request: RequestSummary,
    pub enqueued_at: DateTime<Utc>,
}

/// Transport that shows a request to a human (chat, e-mail, console, ...).
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery channel unavailable: {0}")]
    Unavailable(String),

    #[error("dispatcher has stopped")]
    DispatcherStopped,
}

struct Enqueue {
    next_sequence: u64,
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

/// Producer side of the delivery queue.
pub struct MessageDispatcher {
    // Sequence assignment and send happen under one lock so sequence order and
    // queue order cannot diverge.
    inner: Mutex<Enqueue>,
}

impl MessageDispatcher {
    /// Starts the consumer task on the current runtime.
    pub fn spawn(channel: Arc<dyn DeliveryChannel>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatcher(receiver, channel));
        let dispatcher = Self {
            inner: Mutex::new(Enqueue {
                next_sequence: 1,
                sender,
            }),
        };
        (dispatcher, handle)
    }

    /// Queues a request for `user_id` and returns its sequence number.
    pub fn enqueue(&self, user_id: &str, request: RequestSummary) -> Result<u64, DeliveryError> {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        let message = OutboundMessage {
            sequence,
            user_id: user_id.to_string(),
            request,
            enqueued_at: Utc::now(),
        };
        inner
            .sender
            .send(message)
            .map_err(|_| DeliveryError::DispatcherStopped)?;
        inner.next_sequence += 1;
        Ok(sequence)
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<OutboundMessage>,
    channel: Arc<dyn DeliveryChannel>,
) {
    while let Some(message) = receiver.recv().await {
        if let Err(e) = channel.deliver(&message).await {
            // The request stays pending and still times out; only the notice is lost.
            warn!(
                sequence = message.sequence,
                user_id = %message.user_id,
                request_id = %message.request.id,
                error = %e,
                "Failed to deliver human interaction request"
            );
        }
    }
    debug!("Message dispatcher stopped");
}

/// Delivery channel that only writes to the log.
pub struct TracingDeliveryChannel;

#[async_trait]
impl DeliveryChannel for TracingDeliveryChannel {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        info!(
            sequence = message.sequence,
            user_id = %message.user_id,
            request_id = %message.request.id,
            execution_id = %message.request.execution_id,
            task_id = %message.request.task_id,
            kind = ?message.request.kind,
            deadline = %message.request.deadline,
            "Human input requested: {}",
            message.request.message
        );
        Ok(())
    }
}
