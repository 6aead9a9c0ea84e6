// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human Interaction Coordinator - Infrastructure for human-in-the-loop tasks
//!
//! Stores pending approval and clarification requests, hands them to the
//! outbound dispatcher, and resolves each one exactly once: first accepted
//! response, deadline, or execution cancellation, whichever comes first.
//! Resolution moves the entry from the pending map to the resolved history
//! while holding both write locks, so any later attempt sees it resolved and
//! is rejected.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::execution::ExecutionId;
use crate::domain::human_interaction::{
    HumanInteractionRequest, HumanResponse, InteractionError, InteractionKind,
    InteractionResolution, RequestId, RequestStatus, RequestSummary,
};
use crate::domain::workflow::TaskId;
use crate::infrastructure::delivery::MessageDispatcher;

/// Everything needed to open a request.
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub user_id: String,
    pub kind: InteractionKind,
    pub message: String,
    pub context: HashMap<String, serde_json::Value>,
    pub options: Vec<String>,
    /// Falls back to the coordinator default.
    pub timeout: Option<Duration>,
}

/// Waiting side of an open request.
#[derive(Debug)]
pub struct PendingInteraction {
    pub request_id: RequestId,
    pub deadline: DateTime<Utc>,
    receiver: oneshot::Receiver<InteractionResolution>,
}

impl PendingInteraction {
    /// Resolves when the request does. A dropped coordinator counts as cancellation.
    pub async fn wait(self) -> InteractionResolution {
        self.receiver.await.unwrap_or(InteractionResolution::Cancelled)
    }
}

#[derive(Debug)]
struct PendingEntry {
    request: HumanInteractionRequest,
    responder: oneshot::Sender<InteractionResolution>,
    deadline_timer: Option<AbortHandle>,
}

type PendingMap = Arc<RwLock<HashMap<RequestId, PendingEntry>>>;
type ResolvedMap = Arc<RwLock<HashMap<RequestId, HumanInteractionRequest>>>;

pub struct HumanInteractionCoordinator {
    pending: PendingMap,
    resolved: ResolvedMap,
    initiators: RwLock<HashMap<ExecutionId, String>>,
    dispatcher: Arc<MessageDispatcher>,
    default_timeout: Duration,
}

impl HumanInteractionCoordinator {
    pub fn new(dispatcher: Arc<MessageDispatcher>, default_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            resolved: Arc::new(RwLock::new(HashMap::new())),
            initiators: RwLock::new(HashMap::new()),
            dispatcher,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Records who started an execution so transport-created requests can be addressed.
    pub async fn register_execution(&self, execution_id: ExecutionId, initiator: &str) {
        self.initiators
            .write()
            .await
            .insert(execution_id, initiator.to_string());
    }

    /// Drops resolved history and the initiator mapping of a finished execution.
    pub async fn forget_execution(&self, execution_id: ExecutionId) {
        self.initiators.write().await.remove(&execution_id);
        self.resolved
            .write()
            .await
            .retain(|_, request| request.execution_id != execution_id);
    }

    /// Opens a request, queues it for delivery and arms its deadline.
    pub async fn open_request(
        &self,
        new: NewInteraction,
    ) -> Result<PendingInteraction, InteractionError> {
        let request_id = RequestId::new();
        let timeout = new.timeout.unwrap_or(self.default_timeout);
        let created_at = Utc::now();
        let deadline = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));

        let request = HumanInteractionRequest {
            id: request_id,
            execution_id: new.execution_id,
            task_id: new.task_id,
            agent_id: new.agent_id,
            user_id: new.user_id,
            kind: new.kind,
            message: new.message,
            context: new.context,
            options: new.options,
            created_at,
            deadline,
            status: RequestStatus::Pending,
            response: None,
            responded_at: None,
        };
        let summary = request.summary();
        let user_id = request.user_id.clone();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.write().await;
            pending.insert(
                request_id,
                PendingEntry {
                    request,
                    responder: tx,
                    deadline_timer: None,
                },
            );
        }

        if let Err(e) = self.dispatcher.enqueue(&user_id, summary) {
            self.pending.write().await.remove(&request_id);
            return Err(InteractionError::Delivery(e.to_string()));
        }

        info!(
            request_id = %request_id,
            execution_id = %new.execution_id,
            user_id = %user_id,
            timeout_ms = timeout.as_millis() as u64,
            "Human input requested"
        );

        let pending = self.pending.clone();
        let resolved = self.resolved.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if resolve_entry(&pending, &resolved, request_id, Resolution::TimedOut)
                .await
                .is_ok()
            {
                warn!(request_id = %request_id, "Human input request timed out");
            }
        });
        match self.pending.write().await.get_mut(&request_id) {
            Some(entry) => entry.deadline_timer = Some(timer.abort_handle()),
            // Already answered while the timer was being armed
            None => timer.abort(),
        }

        Ok(PendingInteraction {
            request_id,
            deadline,
            receiver: rx,
        })
    }

    /// Transport-facing creation of a clarification request addressed to the
    /// execution's initiator. Nobody waits on it; its outcome is visible via
    /// [`get_request`](Self::get_request).
    pub async fn create_request(
        &self,
        execution_id: ExecutionId,
        task_id: TaskId,
        question: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<RequestId, InteractionError> {
        let user_id = self
            .initiators
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .ok_or(InteractionError::UnknownExecution(execution_id))?;

        let pending = self
            .open_request(NewInteraction {
                execution_id,
                task_id,
                agent_id: None,
                user_id,
                kind: InteractionKind::Clarification,
                message: question.into(),
                context: HashMap::new(),
                options: Vec::new(),
                timeout,
            })
            .await?;
        Ok(pending.request_id)
    }

    /// Submits a response. Returns whether it was accepted; only the first
    /// valid response for an id is.
    pub async fn submit_response(&self, request_id: RequestId, response: HumanResponse) -> bool {
        match self.try_submit_response(request_id, response).await {
            Ok(()) => true,
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Human response rejected");
                false
            }
        }
    }

    pub async fn try_submit_response(
        &self,
        request_id: RequestId,
        response: HumanResponse,
    ) -> Result<(), InteractionError> {
        {
            let pending = self.pending.read().await;
            if let Some(entry) = pending.get(&request_id) {
                entry.request.accepts(&response)?;
            }
        }

        let responder = response.responded_by.clone();
        resolve_entry(
            &self.pending,
            &self.resolved,
            request_id,
            Resolution::Responded(response),
        )
        .await?;

        info!(
            request_id = %request_id,
            responded_by = ?responder,
            "Human input received"
        );
        Ok(())
    }

    /// Best-effort correlation for transports that cannot carry a request id.
    ///
    /// Deprecated: resolves the user's only pending request and refuses when
    /// there is more than one.
    pub async fn submit_response_for_user(
        &self,
        user_id: &str,
        response: HumanResponse,
    ) -> Result<RequestId, InteractionError> {
        let candidates = self.list_pending(user_id).await;
        let request_id = match candidates.as_slice() {
            [] => return Err(InteractionError::NoPendingRequest(user_id.to_string())),
            [only] => only.id,
            many => {
                warn!(
                    user_id = %user_id,
                    pending = many.len(),
                    "Uncorrelated human response is ambiguous"
                );
                return Err(InteractionError::AmbiguousResponse {
                    user: user_id.to_string(),
                    pending: many.len(),
                });
            }
        };
        self.try_submit_response(request_id, response).await?;
        Ok(request_id)
    }

    /// Pending requests addressed to `user_id`, oldest first.
    pub async fn list_pending(&self, user_id: &str) -> Vec<RequestSummary> {
        let pending = self.pending.read().await;
        let mut summaries: Vec<RequestSummary> = pending
            .values()
            .filter(|entry| entry.request.user_id == user_id)
            .map(|entry| entry.request.summary())
            .collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }

    pub async fn list_all_pending(&self) -> Vec<RequestSummary> {
        let pending = self.pending.read().await;
        let mut summaries: Vec<RequestSummary> =
            pending.values().map(|entry| entry.request.summary()).collect();
        summaries.sort_by_key(|s| (s.created_at, s.id));
        summaries
    }

    /// A pending or resolved request.
    pub async fn get_request(&self, request_id: RequestId) -> Option<HumanInteractionRequest> {
        if let Some(entry) = self.pending.read().await.get(&request_id) {
            return Some(entry.request.clone());
        }
        self.resolved.read().await.get(&request_id).cloned()
    }

    /// Resolves every pending request of an execution as cancelled.
    pub async fn cancel_for_execution(&self, execution_id: ExecutionId) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .read()
            .await
            .values()
            .filter(|entry| entry.request.execution_id == execution_id)
            .map(|entry| entry.request.id)
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if resolve_entry(&self.pending, &self.resolved, id, Resolution::Cancelled)
                .await
                .is_ok()
            {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(execution_id = %execution_id, cancelled, "Cancelled pending human requests");
        }
        cancelled
    }
}

enum Resolution {
    Responded(HumanResponse),
    TimedOut,
    Cancelled,
}

/// Single resolution point: whoever removes the entry wins.
async fn resolve_entry(
    pending: &PendingMap,
    resolved: &ResolvedMap,
    request_id: RequestId,
    resolution: Resolution,
) -> Result<(), InteractionError> {
    // Lock order: pending, then resolved.
    let mut pending = pending.write().await;
    let mut resolved = resolved.write().await;
    let Some(PendingEntry {
        mut request,
        responder,
        deadline_timer,
    }) = pending.remove(&request_id)
    else {
        return if resolved.contains_key(&request_id) {
            Err(InteractionError::AlreadyResolved(request_id))
        } else {
            Err(InteractionError::NotFound(request_id))
        };
    };

    let timed_out = matches!(resolution, Resolution::TimedOut);
    let outcome = match resolution {
        Resolution::Responded(response) => {
            request.status = RequestStatus::Responded;
            request.response = Some(response.clone());
            request.responded_at = Some(Utc::now());
            InteractionResolution::Responded(response)
        }
        Resolution::TimedOut => {
            request.status = RequestStatus::TimedOut;
            InteractionResolution::TimedOut
        }
        Resolution::Cancelled => {
            request.status = RequestStatus::Cancelled;
            InteractionResolution::Cancelled
        }
    };

    resolved.insert(request_id, request);
    // The waiter may be gone (transport-created requests); that is fine.
    let _ = responder.send(outcome);
    if !timed_out {
        if let Some(timer) = deadline_timer {
            timer.abort();
        }
    }
    Ok(())
}
