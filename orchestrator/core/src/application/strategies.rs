// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reasoning Strategies
//!
//! Every agent runs its tasks through one [`ReasoningStrategy`]. Strategies
//! issue reasoning calls through [`StrategyContext::reason`], which bounds
//! each call by the reasoning timeout and aborts it when the execution is
//! cancelled, then parse each reply into an [`AgentAction`].
//!
//! | Strategy | Calls |
//! |----------|-------|
//! | `PlanThenAct` | one plan call, then one act call per plan step |
//! | `ActObserve` | act calls carrying the running transcript |
//! | `Hybrid` | one plan call, then an act-observe loop seeded with the plan |
//!
//! Act calls are capped by the agent's `max_iterations`; running out of
//! iterations without a terminal action fails the attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::executor::ExecutionFailure;
use crate::domain::agent::{AgentId, AgentNode, StrategyKind};
use crate::domain::reasoning::{ReasoningEngine, ReasoningPhase, ReasoningRequest};
use crate::domain::workflow::{TaskId, WorkflowTask};

// ============================================================================
// Actions
// ============================================================================

/// What a single reasoning reply asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Complete { output: String, confidence: f64 },
    Continue {
        thought: String,
        action: String,
        observation: String,
    },
    AskHuman { question: String, options: Vec<String> },
    Handoff { target: AgentId, reason: String },
    Fail { reason: String },
}

const DEFAULT_CONFIDENCE: f64 = 1.0;

const PREFIXES: &[&str] = &[
    "THOUGHT",
    "ACTION",
    "OBSERVATION",
    "FINAL",
    "CONFIDENCE",
    "HANDOFF",
    "ASK_HUMAN",
    "OPTIONS",
    "FAIL",
];

/// Parses a reply. A JSON object with an `action` field wins; otherwise the
/// line-prefix protocol is used. Text that follows neither counts as a thought.
pub fn parse_action(text: &str) -> AgentAction {
    let trimmed = text.trim();
    parse_json_action(trimmed).unwrap_or_else(|| parse_line_action(trimmed))
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_confidence(raw: &str) -> f64 {
    let token = raw.split_whitespace().next().unwrap_or_default();
    let parsed = match token.strip_suffix('%') {
        Some(percent) => percent.parse::<f64>().map(|p| p / 100.0),
        None => token.parse::<f64>(),
    };
    match parsed {
        Ok(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

fn split_options(raw: &str) -> Vec<String> {
    raw.split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_json_action(text: &str) -> Option<AgentAction> {
    let body = strip_fence(text);
    if !body.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(body).ok()?;
    let kind = value.get("action")?.as_str()?.to_ascii_lowercase();
    let field = |name: &str| value.get(name).map(value_text).unwrap_or_default();

    let action = match kind.as_str() {
        "complete" | "final" | "finish" => AgentAction::Complete {
            output: value
                .get("output")
                .or_else(|| value.get("result"))
                .map(value_text)
                .unwrap_or_default(),
            confidence: match value.get("confidence") {
                Some(Value::Number(n)) => n
                    .as_f64()
                    .filter(|c| c.is_finite())
                    .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0)),
                Some(Value::String(s)) => parse_confidence(s),
                _ => DEFAULT_CONFIDENCE,
            },
        },
        "continue" | "act" => AgentAction::Continue {
            thought: field("thought"),
            action: field("step"),
            observation: field("observation"),
        },
        "ask_human" | "ask" => AgentAction::AskHuman {
            question: field("question"),
            options: match value.get("options") {
                Some(Value::Array(items)) => items.iter().map(value_text).collect(),
                Some(Value::String(s)) => split_options(s),
                _ => Vec::new(),
            },
        },
        "handoff" => AgentAction::Handoff {
            target: AgentId::new(field("target").trim()),
            reason: field("reason"),
        },
        "fail" => AgentAction::Fail {
            reason: field("reason"),
        },
        _ => return None,
    };
    Some(action)
}

fn split_prefix(line: &str) -> Option<(&'static str, &str)> {
    let (head, rest) = line.trim_start().split_once(':')?;
    let head = head.trim();
    PREFIXES
        .iter()
        .find(|prefix| head.eq_ignore_ascii_case(prefix))
        .map(|prefix| (*prefix, rest.trim()))
}

fn parse_line_action(text: &str) -> AgentAction {
    let mut fields: HashMap<&'static str, String> = HashMap::new();
    let mut current: Option<&'static str> = None;

    for line in text.lines() {
        if let Some((prefix, rest)) = split_prefix(line) {
            fields.insert(prefix, rest.to_string());
            current = Some(prefix);
        } else if let Some(field) = current.and_then(|key| fields.get_mut(key)) {
            field.push('\n');
            field.push_str(line);
        }
    }

    let take = |fields: &mut HashMap<&'static str, String>, key: &str| {
        fields.remove(key).map(|v| v.trim().to_string()).unwrap_or_default()
    };

    if fields.contains_key("FAIL") {
        return AgentAction::Fail {
            reason: take(&mut fields, "FAIL"),
        };
    }
    if fields.contains_key("HANDOFF") {
        let raw = take(&mut fields, "HANDOFF");
        let (target, reason) = match raw.split_once('|') {
            Some((target, reason)) => (target.trim(), reason.trim()),
            None => raw
                .split_once(char::is_whitespace)
                .map_or((raw.as_str(), ""), |(t, r)| (t, r.trim())),
        };
        return AgentAction::Handoff {
            target: AgentId::new(target),
            reason: reason.to_string(),
        };
    }
    if fields.contains_key("ASK_HUMAN") {
        return AgentAction::AskHuman {
            question: take(&mut fields, "ASK_HUMAN"),
            options: split_options(&take(&mut fields, "OPTIONS")),
        };
    }
    if fields.contains_key("FINAL") {
        let confidence = fields
            .get("CONFIDENCE")
            .map_or(DEFAULT_CONFIDENCE, |raw| parse_confidence(raw));
        return AgentAction::Complete {
            output: take(&mut fields, "FINAL"),
            confidence,
        };
    }
    if fields.is_empty() {
        return AgentAction::Continue {
            thought: text.to_string(),
            action: String::new(),
            observation: String::new(),
        };
    }
    AgentAction::Continue {
        thought: take(&mut fields, "THOUGHT"),
        action: take(&mut fields, "ACTION"),
        observation: take(&mut fields, "OBSERVATION"),
    }
}

// ============================================================================
// Strategy contract
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub iteration: u32,
    pub thought: String,
    pub action: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Complete { output: String, confidence: f64 },
    AskHuman { question: String, options: Vec<String> },
    Handoff { target: AgentId, reason: String },
    Failed(ExecutionFailure),
}

/// Result of one strategy run.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub outcome: StrategyOutcome,
    pub steps: Vec<ReasoningStep>,
    /// Act calls issued, not counting plan calls.
    pub iterations: u32,
}

/// Everything a strategy needs for one attempt.
pub struct StrategyContext<'a> {
    pub engine: &'a dyn ReasoningEngine,
    pub agent: &'a AgentNode,
    pub task: &'a WorkflowTask,
    /// Rendered objective, context and upstream results.
    pub briefing: String,
    pub cancel: &'a CancellationToken,
    pub reasoning_timeout: Duration,
}

impl StrategyContext<'_> {
    /// One bounded, cancellable reasoning call. Returns the reply text.
    pub async fn reason(
        &self,
        phase: ReasoningPhase,
        iteration: u32,
        prompt: String,
    ) -> Result<String, ExecutionFailure> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionFailure::cancelled());
        }

        let request = ReasoningRequest {
            agent_id: self.agent.id.clone(),
            agent_name: self.agent.name.clone(),
            role: self.agent.role,
            model: self.agent.model.clone(),
            phase,
            iteration,
            system_prompt: self.system_prompt(),
            prompt,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecutionFailure::cancelled()),
            result = tokio::time::timeout(self.reasoning_timeout, self.engine.reason(&request)) => {
                match result {
                    Ok(Ok(reply)) => {
                        debug!(
                            agent_id = %self.agent.id,
                            task_id = %self.task.id,
                            ?phase,
                            iteration,
                            tokens = reply.usage.total_tokens,
                            "Reasoning reply received"
                        );
                        Ok(reply.text)
                    }
                    Ok(Err(e)) => Err(ExecutionFailure::reasoning(e)),
                    Err(_) => Err(ExecutionFailure::timeout(self.reasoning_timeout)),
                }
            }
        }
    }

    fn system_prompt(&self) -> String {
        let agent = self.agent;
        let mut prompt = format!("You are {}, a {} agent.", agent.name, agent.role);
        if !agent.capabilities.is_empty() {
            let names: Vec<&str> = agent.capabilities.iter().map(|c| c.name.as_str()).collect();
            let _ = write!(prompt, " Capabilities: {}.", names.join(", "));
        }
        if !agent.tools.is_empty() {
            let _ = write!(prompt, " Tools: {}.", agent.tools.join(", "));
        }
        prompt.push_str(
            "\n\nReply with one of:\n\
             THOUGHT: / ACTION: / OBSERVATION: lines to keep working\n\
             FINAL: <result> and optionally CONFIDENCE: <0-1> when the objective is met\n\
             ASK_HUMAN: <question> and optionally OPTIONS: a, b to ask the requesting user\n\
             FAIL: <reason> when the task cannot be done",
        );
        if !agent.can_handoff_to.is_empty() {
            let targets: Vec<&str> = agent.can_handoff_to.iter().map(|a| a.as_str()).collect();
            let _ = write!(
                prompt,
                "\nHANDOFF: <agent id> | <reason> to pass the task to one of: {}",
                targets.join(", ")
            );
        }
        prompt
    }
}

#[async_trait]
pub trait ReasoningStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, ctx: &StrategyContext<'_>) -> StrategyRun;
}

pub fn strategy_for(kind: StrategyKind) -> &'static dyn ReasoningStrategy {
    static PLAN_THEN_ACT: PlanThenAct = PlanThenAct;
    static ACT_OBSERVE: ActObserve = ActObserve;
    static HYBRID: Hybrid = Hybrid;
    match kind {
        StrategyKind::PlanThenAct => &PLAN_THEN_ACT,
        StrategyKind::ActObserve => &ACT_OBSERVE,
        StrategyKind::Hybrid => &HYBRID,
    }
}

/// Maps every action except `Continue` to the outcome it ends the run with.
fn terminal_outcome(action: AgentAction) -> Result<StrategyOutcome, ReasoningStep> {
    match action {
        AgentAction::Complete { output, confidence } => {
            Ok(StrategyOutcome::Complete { output, confidence })
        }
        AgentAction::AskHuman { question, options } => {
            Ok(StrategyOutcome::AskHuman { question, options })
        }
        AgentAction::Handoff { target, reason } => Ok(StrategyOutcome::Handoff { target, reason }),
        AgentAction::Fail { reason } => Ok(StrategyOutcome::Failed(ExecutionFailure::explicit(reason))),
        AgentAction::Continue {
            thought,
            action,
            observation,
        } => Err(ReasoningStep {
            iteration: 0,
            thought,
            action,
            observation,
        }),
    }
}

fn exhausted(agent: &AgentNode, steps: Vec<ReasoningStep>, iterations: u32) -> StrategyRun {
    StrategyRun {
        outcome: StrategyOutcome::Failed(ExecutionFailure::iterations_exhausted(
            agent.max_iterations,
        )),
        steps,
        iterations,
    }
}

fn failed(failure: ExecutionFailure, steps: Vec<ReasoningStep>, iterations: u32) -> StrategyRun {
    StrategyRun {
        outcome: StrategyOutcome::Failed(failure),
        steps,
        iterations,
    }
}

fn render_transcript(prompt: &mut String, steps: &[ReasoningStep]) {
    if steps.is_empty() {
        return;
    }
    prompt.push_str("\n\n## Progress so far\n");
    for step in steps {
        let _ = writeln!(prompt, "[{}] THOUGHT: {}", step.iteration, step.thought);
        if !step.action.is_empty() {
            let _ = writeln!(prompt, "[{}] ACTION: {}", step.iteration, step.action);
        }
        if !step.observation.is_empty() {
            let _ = writeln!(prompt, "[{}] OBSERVATION: {}", step.iteration, step.observation);
        }
    }
}

/// Plan lines with list markers ("1.", "2)", "-", "*") removed.
fn plan_steps(plan: &str) -> Vec<String> {
    plan.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')', '-', '*'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Runs the plan call. `Err` carries a run that already ended.
async fn make_plan(ctx: &StrategyContext<'_>) -> Result<Vec<String>, StrategyRun> {
    let prompt = format!(
        "{}\n\nBreak the objective into a short numbered plan of concrete steps. Reply with the plan only.",
        ctx.briefing
    );
    let reply = ctx
        .reason(ReasoningPhase::Plan, 0, prompt)
        .await
        .map_err(|failure| failed(failure, Vec::new(), 0))?;

    match terminal_outcome(parse_action(&reply)) {
        Ok(outcome) => Err(StrategyRun {
            outcome,
            steps: Vec::new(),
            iterations: 0,
        }),
        Err(_) => Ok(plan_steps(&reply)),
    }
}

/// Act-observe loop shared by `ActObserve` and `Hybrid`.
async fn act_observe_loop(ctx: &StrategyContext<'_>, plan: Option<&[String]>) -> StrategyRun {
    let mut steps: Vec<ReasoningStep> = Vec::new();

    for iteration in 1..=ctx.agent.max_iterations {
        let mut prompt = ctx.briefing.clone();
        if let Some(plan) = plan.filter(|p| !p.is_empty()) {
            prompt.push_str("\n\n## Plan\n");
            for (i, step) in plan.iter().enumerate() {
                let _ = writeln!(prompt, "{}. {}", i + 1, step);
            }
        }
        render_transcript(&mut prompt, &steps);
        prompt.push_str("\n\nContinue with the next step.");

        let reply = match ctx.reason(ReasoningPhase::Act, iteration, prompt).await {
            Ok(reply) => reply,
            Err(failure) => return failed(failure, steps, iteration),
        };

        match terminal_outcome(parse_action(&reply)) {
            Ok(outcome) => {
                return StrategyRun {
                    outcome,
                    steps,
                    iterations: iteration,
                }
            }
            Err(mut step) => {
                step.iteration = iteration;
                steps.push(step);
            }
        }
    }

    let iterations = ctx.agent.max_iterations;
    exhausted(ctx.agent, steps, iterations)
}

// ============================================================================
// Strategies
// ============================================================================

pub struct PlanThenAct;

#[async_trait]
impl ReasoningStrategy for PlanThenAct {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PlanThenAct
    }

    async fn execute(&self, ctx: &StrategyContext<'_>) -> StrategyRun {
        let plan = match make_plan(ctx).await {
            Ok(plan) => plan,
            Err(run) => return run,
        };
        let mut steps: Vec<ReasoningStep> = Vec::new();

        for iteration in 1..=ctx.agent.max_iterations {
            let mut prompt = ctx.briefing.clone();
            render_transcript(&mut prompt, &steps);
            match plan.get(iteration as usize - 1) {
                Some(step) => {
                    let _ = write!(
                        prompt,
                        "\n\nExecute step {} of {} of the plan: {}",
                        iteration,
                        plan.len(),
                        step
                    );
                }
                None => prompt.push_str(
                    "\n\nFinalize the objective. Reply with FINAL: and the result when it is met.",
                ),
            }

            let reply = match ctx.reason(ReasoningPhase::Act, iteration, prompt).await {
                Ok(reply) => reply,
                Err(failure) => return failed(failure, steps, iteration),
            };

            match terminal_outcome(parse_action(&reply)) {
                Ok(outcome) => {
                    return StrategyRun {
                        outcome,
                        steps,
                        iterations: iteration,
                    }
                }
                Err(mut step) => {
                    step.iteration = iteration;
                    if step.action.is_empty() {
                        if let Some(planned) = plan.get(iteration as usize - 1) {
                            step.action = planned.clone();
                        }
                    }
                    steps.push(step);
                }
            }
        }

        let iterations = ctx.agent.max_iterations;
        exhausted(ctx.agent, steps, iterations)
    }
}

pub struct ActObserve;

#[async_trait]
impl ReasoningStrategy for ActObserve {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ActObserve
    }

    async fn execute(&self, ctx: &StrategyContext<'_>) -> StrategyRun {
        act_observe_loop(ctx, None).await
    }
}

pub struct Hybrid;

#[async_trait]
impl ReasoningStrategy for Hybrid {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    async fn execute(&self, ctx: &StrategyContext<'_>) -> StrategyRun {
        match make_plan(ctx).await {
            Ok(plan) => act_observe_loop(ctx, Some(&plan)).await,
            Err(run) => run,
        }
    }
}

// ============================================================================
// Briefing
// ============================================================================

/// Renders the task, its context and the results of the tasks it depends on.
pub fn render_briefing(
    task: &WorkflowTask,
    workflow_context: &HashMap<String, Value>,
    upstream: &BTreeMap<TaskId, HashMap<String, Value>>,
) -> String {
    let mut briefing = format!("# Task: {}\n", task.name);
    if !task.description.is_empty() {
        let _ = writeln!(briefing, "{}", task.description);
    }
    if !task.objective.is_empty() {
        let _ = write!(briefing, "\n## Objective\n{}\n", task.objective);
    }
    if !task.completion_criteria.is_empty() {
        let _ = write!(briefing, "\n## Completion criteria\n{}\n", task.completion_criteria);
    }

    let mut context: BTreeMap<&str, &Value> = workflow_context
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    context.extend(task.context.iter().map(|(k, v)| (k.as_str(), v)));
    if !context.is_empty() {
        briefing.push_str("\n## Context\n");
        for (key, value) in context {
            let _ = writeln!(briefing, "- {}: {}", key, value_text(value));
        }
    }

    if !upstream.is_empty() {
        briefing.push_str("\n## Results of prerequisite tasks\n");
        for (task_id, result) in upstream {
            let output = result.get("output").map(value_text).unwrap_or_default();
            let _ = writeln!(briefing, "- {}: {}", task_id, output);
        }
    }

    if let Some(feedback) = &task.human_feedback {
        let _ = write!(briefing, "\n## Human feedback\n{}\n", feedback);
    }
    briefing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::executor::FailureKind;
    use crate::domain::agent::AgentRole;
    use crate::domain::reasoning::{ReasoningError, ReasoningReply};
    use crate::domain::workflow::TemplateNode;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, VecDeque};

    struct Scripted {
        replies: Mutex<VecDeque<String>>,
        phases: Mutex<Vec<ReasoningPhase>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                phases: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReasoningEngine for Scripted {
        async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
            self.phases.lock().push(request.phase);
            self.replies
                .lock()
                .pop_front()
                .map(ReasoningReply::text)
                .ok_or_else(|| ReasoningError::Provider("script exhausted".into()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningEngine for Stalled {
        async fn reason(&self, _request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ReasoningReply::text("FINAL: too late"))
        }
    }

    fn task() -> WorkflowTask {
        WorkflowTask::from_node(&TemplateNode::new("t", "Draft notes"), BTreeSet::new())
    }

    async fn run(
        engine: &dyn ReasoningEngine,
        agent: &AgentNode,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> StrategyRun {
        let task = task();
        let ctx = StrategyContext {
            engine,
            agent,
            task: &task,
            briefing: render_briefing(&task, &HashMap::new(), &BTreeMap::new()),
            cancel,
            reasoning_timeout: timeout,
        };
        strategy_for(agent.strategy).execute(&ctx).await
    }

    #[test]
    fn test_parse_line_protocol() {
        assert_eq!(
            parse_action("THOUGHT: check sources\nACTION: search\nOBSERVATION: 3 hits"),
            AgentAction::Continue {
                thought: "check sources".into(),
                action: "search".into(),
                observation: "3 hits".into(),
            }
        );
        assert_eq!(
            parse_action("THOUGHT: done\nFINAL: line one\nline two\nCONFIDENCE: 0.4"),
            AgentAction::Complete {
                output: "line one\nline two".into(),
                confidence: 0.4,
            }
        );
        assert_eq!(
            parse_action("FINAL: ok"),
            AgentAction::Complete {
                output: "ok".into(),
                confidence: 1.0,
            }
        );
        assert_eq!(
            parse_action("HANDOFF: reviewer | needs a second look"),
            AgentAction::Handoff {
                target: AgentId::from("reviewer"),
                reason: "needs a second look".into(),
            }
        );
        assert_eq!(
            parse_action("ASK_HUMAN: Which region?\nOPTIONS: eu, us"),
            AgentAction::AskHuman {
                question: "Which region?".into(),
                options: vec!["eu".into(), "us".into()],
            }
        );
        assert_eq!(
            parse_action("FAIL: source repository is gone"),
            AgentAction::Fail {
                reason: "source repository is gone".into()
            }
        );
        assert!(matches!(
            parse_action("just musing"),
            AgentAction::Continue { ref thought, .. } if thought == "just musing"
        ));
    }

    #[test]
    fn test_parse_json_protocol() {
        assert_eq!(
            parse_action("```json\n{\"action\": \"complete\", \"output\": \"done\", \"confidence\": 0.7}\n```"),
            AgentAction::Complete {
                output: "done".into(),
                confidence: 0.7,
            }
        );
        assert_eq!(
            parse_action(r#"{"action": "handoff", "target": "ops", "reason": "deploy"}"#),
            AgentAction::Handoff {
                target: AgentId::from("ops"),
                reason: "deploy".into(),
            }
        );
        assert_eq!(
            parse_action(r#"{"action": "complete", "output": "x", "confidence": 7}"#),
            AgentAction::Complete {
                output: "x".into(),
                confidence: 1.0,
            }
        );
    }

    #[test]
    fn test_plan_steps_strip_markers() {
        assert_eq!(
            plan_steps("1. Gather\n2) Draft\n- Review\n\n"),
            vec!["Gather", "Draft", "Review"]
        );
    }

    #[tokio::test]
    async fn test_act_observe_runs_until_final() {
        let engine = Scripted::new(&["THOUGHT: look", "THOUGHT: write", "FINAL: notes\nCONFIDENCE: 0.9"]);
        let agent = AgentNode::new("w", "Writer", AgentRole::Specialist);
        let run = run(&engine, &agent, &CancellationToken::new(), Duration::from_secs(1)).await;

        assert_eq!(
            run.outcome,
            StrategyOutcome::Complete {
                output: "notes".into(),
                confidence: 0.9
            }
        );
        assert_eq!(run.iterations, 3);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[1].iteration, 2);
    }

    #[tokio::test]
    async fn test_iterations_exhausted() {
        let engine = Scripted::new(&["THOUGHT: a", "THOUGHT: b"]);
        let agent = AgentNode::new("w", "Writer", AgentRole::Specialist).with_max_iterations(2);
        let run = run(&engine, &agent, &CancellationToken::new(), Duration::from_secs(1)).await;

        match run.outcome {
            StrategyOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::IterationsExhausted);
                assert!(!failure.retryable);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_then_act_uses_one_plan_call() {
        let engine = Scripted::new(&["1. Gather\n2. Draft", "THOUGHT: gathered", "FINAL: drafted"]);
        let agent = AgentNode::new("w", "Writer", AgentRole::Specialist)
            .with_strategy(StrategyKind::PlanThenAct);
        let run = run(&engine, &agent, &CancellationToken::new(), Duration::from_secs(1)).await;

        assert!(matches!(run.outcome, StrategyOutcome::Complete { .. }));
        assert_eq!(run.steps[0].action, "Gather");
        assert_eq!(
            *engine.phases.lock(),
            vec![ReasoningPhase::Plan, ReasoningPhase::Act, ReasoningPhase::Act]
        );
    }

    #[tokio::test]
    async fn test_hybrid_plans_then_loops() {
        let engine = Scripted::new(&["1. Gather", "HANDOFF: reviewer | check tone"]);
        let agent = AgentNode::new("w", "Writer", AgentRole::Specialist)
            .with_strategy(StrategyKind::Hybrid)
            .with_handoff_target("reviewer");
        let run = run(&engine, &agent, &CancellationToken::new(), Duration::from_secs(1)).await;

        assert_eq!(
            run.outcome,
            StrategyOutcome::Handoff {
                target: AgentId::from("reviewer"),
                reason: "check tone".into()
            }
        );
    }

    #[tokio::test]
    async fn test_reasoning_call_timeout_and_cancel() {
        let agent = AgentNode::new("w", "Writer", AgentRole::Specialist);

        let run1 = run(&Stalled, &agent, &CancellationToken::new(), Duration::from_millis(20)).await;
        match run1.outcome {
            StrategyOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
            other => panic!("expected timeout, got {:?}", other),
        }

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let run2 = run(&Stalled, &agent, &cancel, Duration::from_secs(60)).await;
        match run2.outcome {
            StrategyOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Cancelled),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }
}
