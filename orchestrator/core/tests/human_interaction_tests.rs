// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human-in-the-loop integration tests
//!
//! Approval gates, clarification questions, response timeouts and the
//! pause/resume/cancel control surface while tasks wait on people.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cadence_core::domain::events::OrchestrationEvent;
use cadence_core::domain::execution::{ErrorKind, ExecutionStatus};
use cadence_core::domain::human_interaction::{HumanResponse, RequestStatus};
use cadence_core::domain::organization::Organization;
use cadence_core::domain::workflow::{TaskId, TaskStatus, TemplateNode, WorkflowTemplate};
use common::{
    agent, drain, fast_settings, next_human_request, persistence_errors, Harness, ScriptedEngine,
    UnreliableStore,
};

fn review_then_ship() -> WorkflowTemplate {
    WorkflowTemplate::new("release", "Release")
        .with_node(TemplateNode::new("review", "Review"))
        .with_node(TemplateNode::new("ship", "Ship"))
        .with_edge("review", "ship")
}

fn gated_organization() -> Organization {
    Organization::new("org", "Org").with_agent(agent("careful").with_human_approval(true))
}

#[tokio::test]
async fn test_rejected_approval_escalates_and_terminates() {
    let harness = Harness::new(review_then_ship(), gated_organization(), ScriptedEngine::new(), fast_settings());
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (task_id, request_id) = next_human_request(&mut events).await;
    assert_eq!(task_id, TaskId::from("review"));

    let status = harness.orchestrator.get_status(execution_id).await.unwrap();
    assert_eq!(status.waiting_approval, 1);
    assert_eq!(status.pending_approvals, 1);

    let coordinator = harness.orchestrator.coordinator();
    assert!(coordinator.submit_response(request_id, HumanResponse::reject("numbers are off").by("bob")).await);
    assert!(!coordinator.submit_response(request_id, HumanResponse::approve(None)).await);

    let execution = harness.finish(execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let review = execution.task(&TaskId::from("review")).unwrap();
    assert_eq!(review.status, TaskStatus::Escalated);
    assert_eq!(review.human_feedback.as_deref(), Some("numbers are off"));
    assert_eq!(
        execution.task(&TaskId::from("ship")).unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(execution.human_feedback.len(), 1);
    assert_eq!(execution.human_feedback[0].responder.as_deref(), Some("bob"));
    assert!(execution.pending_approvals.is_empty());
}

#[tokio::test]
async fn test_approved_result_completes_with_feedback() {
    let template = WorkflowTemplate::new("single", "Single").with_node(TemplateNode::new("review", "Review"));
    let harness = Harness::new(template, gated_organization(), ScriptedEngine::new(), fast_settings());
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (_, request_id) = next_human_request(&mut events).await;

    let pending = harness.orchestrator.coordinator().list_pending("alice").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, request_id);

    assert!(harness
        .orchestrator
        .coordinator()
        .submit_response(request_id, HumanResponse::approve(Some("ship it".into())))
        .await);

    let execution = harness.finish(execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = &execution.task(&TaskId::from("review")).unwrap().result;
    assert_eq!(result["human_feedback"], "ship it");
    assert_eq!(result["output"], "done");
}

#[tokio::test]
async fn test_unanswered_request_times_out_and_escalates() {
    let harness = Harness::new(review_then_ship(), gated_organization(), ScriptedEngine::new(), fast_settings());
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let execution = harness.finish(execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.task(&TaskId::from("review")).unwrap().status,
        TaskStatus::Escalated
    );
    assert!(execution
        .error_log
        .iter()
        .any(|entry| entry.kind == ErrorKind::HumanTimeout));

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        OrchestrationEvent::HumanInputResolved {
            status: RequestStatus::TimedOut,
            ..
        }
    )));
}

#[tokio::test]
async fn test_answered_clarification_reruns_the_task() {
    let template = WorkflowTemplate::new("deploy", "Deploy").with_node(TemplateNode::new("deploy", "Deploy"));
    let engine = ScriptedEngine::new().for_agent(
        "ops",
        &["ASK_HUMAN: Which region should we deploy to?\nOPTIONS: eu-west, us-east"],
    );
    let harness = Harness::new(
        template,
        Organization::new("org", "Org").with_agent(agent("ops")),
        engine,
        fast_settings(),
    );
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (_, request_id) = next_human_request(&mut events).await;

    let coordinator = harness.orchestrator.coordinator();
    assert!(!coordinator.submit_response(request_id, HumanResponse::answer("mars")).await);
    assert!(coordinator.submit_response(request_id, HumanResponse::answer("eu-west")).await);

    let execution = harness.finish(execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let task = execution.task(&TaskId::from("deploy")).unwrap();
    assert_eq!(task.context["human_clarification"], "eu-west");
    assert_eq!(harness.engine.calls_by("ops"), 2);
}

#[tokio::test]
async fn test_pause_holds_launches_until_resume() {
    let harness = Harness::new(
        review_then_ship(),
        Organization::new("org", "Org").with_agent(agent("worker")),
        ScriptedEngine::new(),
        fast_settings(),
    );
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    assert!(harness.orchestrator.pause(execution_id));
    assert!(!harness.orchestrator.pause(execution_id));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = harness.orchestrator.get_status(execution_id).await.unwrap();
    assert_eq!(status.status, ExecutionStatus::Paused);
    assert_eq!(status.completed, 0);
    assert_eq!(harness.engine.calls_by("worker"), 0);

    assert!(harness.orchestrator.resume(execution_id));
    assert!(!harness.orchestrator.resume(execution_id));

    let execution = harness.finish(execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, OrchestrationEvent::ExecutionPaused { .. })));
    assert!(events
        .iter()
        .any(|event| matches!(event, OrchestrationEvent::ExecutionResumed { .. })));
}

#[tokio::test]
async fn test_cancel_while_waiting_on_human() {
    let harness = Harness::new(review_then_ship(), gated_organization(), ScriptedEngine::new(), fast_settings());
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (_, request_id) = next_human_request(&mut events).await;

    assert!(harness.orchestrator.cancel(execution_id).await);
    let execution = harness.finish(execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.current.is_empty());
    assert!(execution.pending_approvals.is_empty());
    assert_eq!(
        execution.task(&TaskId::from("review")).unwrap().status,
        TaskStatus::Pending
    );

    // Late responses and repeated cancels are refused
    assert!(!harness
        .orchestrator
        .coordinator()
        .submit_response(request_id, HumanResponse::approve(None))
        .await);
    assert!(!harness.orchestrator.cancel(execution_id).await);
    assert!(!harness.orchestrator.pause(execution_id));
}

#[tokio::test]
async fn test_waiting_task_keeps_its_agent_slot() {
    let template = WorkflowTemplate::new("pair", "Pair")
        .with_node(TemplateNode::new("draft", "Draft"))
        .with_node(TemplateNode::new("summary", "Summary"));
    let organization = Organization::new("org", "Org").with_agent(
        agent("careful")
            .with_human_approval(true)
            .with_max_concurrent_tasks(1),
    );
    let settings = fast_settings();
    let harness = Harness::new(template, organization, ScriptedEngine::new(), settings);
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (first, first_request) = next_human_request(&mut events).await;
    let other = if first.as_str() == "draft" {
        TaskId::from("summary")
    } else {
        TaskId::from("draft")
    };

    // Well past the assignment budget's worth of polls
    tokio::time::sleep(Duration::from_millis(200)).await;
    let execution = harness.orchestrator.get_execution(execution_id).await.unwrap();
    let waiting = execution.task(&other).unwrap();
    assert_eq!(waiting.status, TaskStatus::Pending);
    assert_eq!(waiting.assignment_retries, 0);
    assert!(waiting.assigned_agent.is_none());
    let status = execution.status_report();
    assert_eq!(status.waiting_approval, 1);
    assert_eq!(status.in_progress, 0);
    assert_eq!(harness.engine.calls_by("careful"), 1);

    let coordinator = harness.orchestrator.coordinator();
    assert!(coordinator.submit_response(first_request, HumanResponse::approve(None)).await);
    let (second, second_request) = next_human_request(&mut events).await;
    assert_eq!(second, other);
    assert!(coordinator.submit_response(second_request, HumanResponse::approve(None)).await);

    let execution = harness.finish(execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(harness.engine.peak_concurrency(), 1);
    assert_eq!(harness.engine.calls_by("careful"), 2);
}

#[tokio::test]
async fn test_store_outage_while_waiting_does_not_grow_error_log() {
    let template = WorkflowTemplate::new("single", "Single").with_node(TemplateNode::new("review", "Review"));
    let harness = Harness::with_store(
        template,
        gated_organization(),
        ScriptedEngine::new(),
        fast_settings(),
        Arc::new(UnreliableStore::failing()),
    );
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let (_, request_id) = next_human_request(&mut events).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = harness.orchestrator.get_execution(execution_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = harness.orchestrator.get_execution(execution_id).await.unwrap();

    assert!(persistence_errors(&before) > 0);
    assert_eq!(persistence_errors(&after), persistence_errors(&before));

    assert!(harness
        .orchestrator
        .coordinator()
        .submit_response(request_id, HumanResponse::approve(None))
        .await);
    let execution = harness.finish(execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution
        .error_log
        .iter()
        .all(|entry| entry.kind == ErrorKind::Persistence));
    assert!(persistence_errors(&execution) < 20);
}
