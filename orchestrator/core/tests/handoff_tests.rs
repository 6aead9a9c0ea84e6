// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Handoff integration tests

mod common;

use cadence_core::domain::agent::AgentId;
use cadence_core::domain::events::OrchestrationEvent;
use cadence_core::domain::execution::{ErrorKind, ExecutionStatus};
use cadence_core::domain::organization::Organization;
use cadence_core::domain::workflow::{TaskId, TaskStatus, TemplateNode, WorkflowTemplate};
use common::{agent, drain, fast_settings, Harness, ScriptedEngine};

fn single_task() -> WorkflowTemplate {
    WorkflowTemplate::new("triage", "Triage").with_node(TemplateNode::new("ticket", "Ticket"))
}

fn organization(triage_can_reach_expert: bool) -> Organization {
    let mut triage = agent("triage");
    if triage_can_reach_expert {
        triage = triage.with_handoff_target("expert");
    }
    let mut organization = Organization::new("org", "Org")
        .with_agent(triage)
        .with_agent(agent("expert"));
    organization.entry_points.push(AgentId::from("triage"));
    organization
}

#[tokio::test]
async fn test_valid_handoff_reruns_on_target() {
    let engine = ScriptedEngine::new().for_agent("triage", &["HANDOFF: expert | needs a database specialist"]);
    let harness = Harness::new(single_task(), organization(true), engine, fast_settings());
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let execution = harness.finish(execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let task = execution.task(&TaskId::from("ticket")).unwrap();
    assert_eq!(task.handoffs, 1);
    assert_eq!(task.assigned_agent, Some(AgentId::from("expert")));
    assert_eq!(task.result["agent"], "expert");
    assert_eq!(task.context["handoff_from"], "triage");
    assert_eq!(task.context["handoff_reason"], "needs a database specialist");
    assert_eq!(harness.engine.calls_by("triage"), 1);
    assert_eq!(harness.engine.calls_by("expert"), 1);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        OrchestrationEvent::TaskHandedOff { from, to, .. }
            if from.as_str() == "triage" && to.as_str() == "expert"
    )));
    // Re-executed within the same tick, without going back to Pending
    assert!(!events
        .iter()
        .any(|event| matches!(event, OrchestrationEvent::TaskRequeued { .. })));
}

#[tokio::test]
async fn test_rejected_handoff_retries_then_fails() {
    let handoff = "HANDOFF: expert | out of my depth";
    let engine = ScriptedEngine::new().for_agent("triage", &[handoff, handoff, handoff]);
    let settings = fast_settings();
    let max_attempts = settings.max_task_attempts;
    let harness = Harness::new(single_task(), organization(false), engine, settings);
    let mut events = harness.orchestrator.events().subscribe();

    let execution_id = harness.start().await;
    let execution = harness.finish(execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let task = execution.task(&TaskId::from("ticket")).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, max_attempts);
    assert_eq!(task.handoffs, 0);
    assert_eq!(harness.engine.calls_by("expert"), 0);

    let rejections = execution
        .error_log
        .iter()
        .filter(|entry| entry.kind == ErrorKind::Execution && entry.message.contains("handoff rejected"))
        .count();
    assert_eq!(rejections, max_attempts as usize);

    let requeues = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, OrchestrationEvent::TaskRequeued { .. }))
        .count();
    assert_eq!(requeues, max_attempts as usize - 1);
}
