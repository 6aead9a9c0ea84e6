// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability Scorer
//!
//! Pure functions mapping (task, agent) to a suitability score:
//!
//! ```text
//! score = 0.5
//!       + 0.3 * confidence   for every capability sharing a keyword with the task
//!       + role bonus         when the task is phrased for the agent's role
//! ```
//!
//! Ranking excludes agents at capacity and orders the rest by
//! `(score desc, load asc, agent id asc)`, so the same inputs always produce the
//! same assignment.

use std::collections::BTreeSet;

use crate::domain::agent::{AgentId, AgentNode, AgentRole};
use crate::domain::workflow::WorkflowTask;

pub const BASE_SCORE: f64 = 0.5;
pub const CAPABILITY_WEIGHT: f64 = 0.3;
pub const ROLE_BONUS: f64 = 0.2;
pub const ENTRY_POINT_BONUS: f64 = 0.05;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "that", "this", "then", "all", "any", "are",
    "its", "our", "per", "via", "task", "using",
];

const COORDINATION_STEMS: &[&str] = &["coordinat", "orchestrat", "plan", "manag", "delegat", "assign"];
const VALIDATION_STEMS: &[&str] = &["valid", "verif", "review", "check", "test", "audit", "approv"];
const RESEARCH_STEMS: &[&str] = &["research", "investigat", "analy", "gather", "survey", "explor"];

/// Lowercased alphanumeric words of at least three characters, minus stopwords.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(|word| word.to_lowercase())
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}

/// Equal words, or one a prefix of the other when the shorter has four or more
/// characters ("review" / "reviewing").
fn words_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.len() >= 4 && long.starts_with(short)
}

fn overlaps(left: &BTreeSet<String>, right: &BTreeSet<String>) -> bool {
    left.iter().any(|l| right.iter().any(|r| words_match(l, r)))
}

fn mentions_any(task_words: &BTreeSet<String>, stems: &[&str]) -> bool {
    task_words
        .iter()
        .any(|word| stems.iter().any(|stem| word.starts_with(stem)))
}

fn role_bonus(agent: &AgentNode, task_words: &BTreeSet<String>) -> f64 {
    let favored = match agent.role {
        AgentRole::Coordinator => mentions_any(task_words, COORDINATION_STEMS),
        AgentRole::Validator | AgentRole::Reviewer => mentions_any(task_words, VALIDATION_STEMS),
        AgentRole::Researcher => mentions_any(task_words, RESEARCH_STEMS),
        AgentRole::ToolExecutor => agent
            .tools
            .iter()
            .any(|tool| overlaps(&keywords(tool), task_words)),
        AgentRole::Specialist => false,
    };
    if favored {
        ROLE_BONUS
    } else {
        0.0
    }
}

/// Suitability of `agent` for `task`, ignoring load.
pub fn score(task: &WorkflowTask, agent: &AgentNode) -> f64 {
    let task_words = keywords(&task.scoring_text());
    let capability_score: f64 = agent
        .capabilities
        .iter()
        .filter(|capability| {
            let capability_words = keywords(&format!("{} {}", capability.name, capability.description));
            overlaps(&capability_words, &task_words)
        })
        .map(|capability| CAPABILITY_WEIGHT * capability.confidence)
        .sum();

    BASE_SCORE + capability_score + role_bonus(agent, &task_words)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub agent_id: AgentId,
    pub score: f64,
    pub load: usize,
}

/// Eligible agents for `task`, best first.
///
/// `agents` yields each agent with its current load. Agents whose load is at or
/// above `max_concurrent_tasks` are left out. Entry-point agents get a small
/// bonus on tasks without dependencies.
pub fn rank_candidates<'a>(
    task: &WorkflowTask,
    agents: impl IntoIterator<Item = (&'a AgentNode, usize)>,
    entry_points: &[AgentId],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = agents
        .into_iter()
        .filter(|(agent, load)| *load < agent.max_concurrent_tasks)
        .map(|(agent, load)| {
            let mut value = score(task, agent);
            if task.dependencies.is_empty() && entry_points.contains(&agent.id) {
                value += ENTRY_POINT_BONUS;
            }
            Candidate {
                agent_id: agent.id.clone(),
                score: value,
                load,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.load.cmp(&b.load))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::Capability;
    use crate::domain::workflow::{TaskId, TemplateNode};
    use std::collections::BTreeSet;

    fn task(name: &str, description: &str) -> WorkflowTask {
        WorkflowTask::from_node(
            &TemplateNode::new("t", name).with_description(description),
            BTreeSet::new(),
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_base_score_without_overlap() {
        let agent = AgentNode::new("x", "X", AgentRole::Specialist)
            .with_capability(Capability::new("cooking", "recipes", 0.9));
        assert!(approx(score(&task("Write report", "quarterly numbers"), &agent), 0.5));
    }

    #[test]
    fn test_each_overlapping_capability_adds_weighted_confidence() {
        let agent = AgentNode::new("x", "X", AgentRole::Specialist)
            .with_capability(Capability::new("writing", "drafting reports", 0.8))
            .with_capability(Capability::new("finance", "quarterly numbers", 0.5))
            .with_capability(Capability::new("design", "logos", 1.0));
        let value = score(&task("Write report", "quarterly numbers"), &agent);
        assert!(approx(value, 0.5 + 0.3 * 0.8 + 0.3 * 0.5), "got {}", value);
    }

    #[test]
    fn test_role_bonus() {
        let validator = AgentNode::new("v", "V", AgentRole::Validator);
        let coordinator = AgentNode::new("c", "C", AgentRole::Coordinator);
        let review = task("Review draft", "verify the claims");
        assert!(approx(score(&review, &validator), 0.7));
        assert!(approx(score(&review, &coordinator), 0.5));

        let planning = task("Coordinate launch", "plan the rollout");
        assert!(approx(score(&planning, &coordinator), 0.7));

        let mut tool_agent = AgentNode::new("t", "T", AgentRole::ToolExecutor);
        tool_agent.tools.push("spreadsheet".into());
        assert!(approx(score(&task("Fill spreadsheet", ""), &tool_agent), 0.7));
    }

    #[test]
    fn test_ranking_excludes_full_agents_and_breaks_ties() {
        let a = AgentNode::new("a", "A", AgentRole::Specialist).with_max_concurrent_tasks(2);
        let b = AgentNode::new("b", "B", AgentRole::Specialist).with_max_concurrent_tasks(2);
        let c = AgentNode::new("c", "C", AgentRole::Specialist).with_max_concurrent_tasks(1);
        let t = task("Anything", "");

        // Equal scores: lower load first, then id.
        let ranked = rank_candidates(&t, vec![(&b, 1), (&a, 1), (&c, 1)], &[]);
        let ids: Vec<_> = ranked.iter().map(|c| c.agent_id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let ranked = rank_candidates(&t, vec![(&b, 0), (&a, 1)], &[]);
        assert_eq!(ranked[0].agent_id, AgentId::from("b"));

        let zero = AgentNode::new("z", "Z", AgentRole::Specialist).with_max_concurrent_tasks(0);
        assert!(rank_candidates(&t, vec![(&zero, 0)], &[]).is_empty());
    }

    #[test]
    fn test_higher_score_beats_lower_load() {
        let expert = AgentNode::new("expert", "E", AgentRole::Specialist)
            .with_max_concurrent_tasks(3)
            .with_capability(Capability::new("translation", "", 1.0));
        let idle = AgentNode::new("idle", "I", AgentRole::Specialist).with_max_concurrent_tasks(3);
        let t = task("Translation", "into French");
        let ranked = rank_candidates(&t, vec![(&idle, 0), (&expert, 2)], &[]);
        assert_eq!(ranked[0].agent_id, AgentId::from("expert"));
    }

    #[test]
    fn test_entry_point_bonus_only_for_root_tasks() {
        let a = AgentNode::new("a", "A", AgentRole::Specialist);
        let b = AgentNode::new("b", "B", AgentRole::Specialist);
        let root = task("Start", "");
        let ranked = rank_candidates(&root, vec![(&a, 0), (&b, 0)], &[AgentId::from("b")]);
        assert_eq!(ranked[0].agent_id, AgentId::from("b"));

        let mut child = task("Continue", "");
        child.dependencies.insert(TaskId::from("start"));
        let ranked = rank_candidates(&child, vec![(&a, 0), (&b, 0)], &[AgentId::from("b")]);
        assert_eq!(ranked[0].agent_id, AgentId::from("a"));
    }

    #[test]
    fn test_keywords() {
        let words = keywords("Review the Q3-report, and VERIFY it");
        assert!(words.contains("review"));
        assert!(words.contains("report"));
        assert!(words.contains("verify"));
        assert!(!words.contains("the"));
        assert!(!words.contains("q3"));
    }
}
