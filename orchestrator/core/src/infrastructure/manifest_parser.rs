// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Manifest YAML Parser
//!
//! Parses workflow template and organization manifests into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates the manifest schema to the domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: cadence.dev/v1
//! kind: WorkflowTemplate
//! metadata:
//!   name: release-notes
//!   description: Draft and review release notes
//! spec:
//!   nodes:
//!     - id: research
//!       name: Research changes
//!       objective: Collect merged changes since the last tag
//!     - id: draft
//!       name: Draft notes
//!       depends_on: [research]
//!   edges: []
//! ```
//!
//! ```yaml
//! apiVersion: cadence.dev/v1
//! kind: Organization
//! metadata:
//!   name: docs-team
//! spec:
//!   entry_points: [researcher]
//!   policy:
//!     max_execution_time: 30m
//!   agents:
//!     - id: researcher
//!       name: Researcher
//!       role: researcher
//!       capabilities:
//!         - name: research
//!           confidence: 0.9
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::domain::agent::{AgentId, AgentNode, AgentRole, Capability, StrategyKind};
use crate::domain::organization::{ExecutionPolicy, Organization, OrganizationId};
use crate::domain::task_graph::TaskGraph;
use crate::domain::workflow::{
    TaskId, TemplateEdge, TemplateId, TemplateNode, WorkflowTemplate,
};

pub const API_VERSION: &str = "cadence.dev/v1";
pub const TEMPLATE_KIND: &str = "WorkflowTemplate";
pub const ORGANIZATION_KIND: &str = "Organization";

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEnvelope<S> {
    api_version: String,
    kind: String,
    metadata: ManifestMetadataYaml,
    spec: S,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestMetadataYaml {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KindProbe {
    api_version: String,
    kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateSpecYaml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    nodes: Vec<TemplateNodeYaml>,
    #[serde(default)]
    edges: Vec<TemplateEdgeYaml>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateNodeYaml {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    objective: String,
    #[serde(default)]
    completion_criteria: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateEdgeYaml {
    from: String,
    to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrganizationSpecYaml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    agents: Vec<AgentYaml>,
    #[serde(default)]
    entry_points: Vec<String>,
    #[serde(default)]
    policy: ExecutionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentYaml {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    role: AgentRole,
    #[serde(default)]
    capabilities: Vec<Capability>,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    strategy: StrategyKind,
    #[serde(default = "default_max_concurrent")]
    max_concurrent_tasks: usize,
    #[serde(default)]
    requires_human_approval: bool,
    #[serde(default)]
    human_escalation_threshold: f64,
    #[serde(default)]
    can_handoff_to: Vec<String>,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_iterations() -> u32 {
    10
}

/// A parsed manifest of either kind.
#[derive(Debug, Clone)]
pub enum Manifest {
    Template(WorkflowTemplate),
    Organization(Organization),
}

// ============================================================================
// Parser
// ============================================================================

/// Manifest parser (Infrastructure service)
pub struct ManifestParser;

impl ManifestParser {
    /// Parse a manifest of any supported kind from a YAML file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Manifest, ManifestError> {
        Self::parse_yaml(&read(path.as_ref())?)
    }

    /// Parse a manifest of any supported kind, dispatching on `kind`
    pub fn parse_yaml(yaml: &str) -> Result<Manifest, ManifestError> {
        let header = probe(yaml)?;
        check_api_version(&header.api_version)?;
        match header.kind.as_str() {
            TEMPLATE_KIND => Self::parse_template_yaml(yaml).map(Manifest::Template),
            ORGANIZATION_KIND => Self::parse_organization_yaml(yaml).map(Manifest::Organization),
            other => Err(ManifestError::InvalidKind {
                expected: format!("{} or {}", TEMPLATE_KIND, ORGANIZATION_KIND),
                got: other.to_string(),
            }),
        }
    }

    pub fn parse_template_file<P: AsRef<Path>>(path: P) -> Result<WorkflowTemplate, ManifestError> {
        Self::parse_template_yaml(&read(path.as_ref())?)
    }

    pub fn parse_template_yaml(yaml: &str) -> Result<WorkflowTemplate, ManifestError> {
        check_envelope(yaml, TEMPLATE_KIND)?;
        let manifest: ManifestEnvelope<TemplateSpecYaml> =
            serde_yaml::from_str(yaml).map_err(|e| ManifestError::YamlError(e.to_string()))?;
        Self::convert_template(manifest)
    }

    pub fn parse_organization_file<P: AsRef<Path>>(path: P) -> Result<Organization, ManifestError> {
        Self::parse_organization_yaml(&read(path.as_ref())?)
    }

    pub fn parse_organization_yaml(yaml: &str) -> Result<Organization, ManifestError> {
        check_envelope(yaml, ORGANIZATION_KIND)?;
        let manifest: ManifestEnvelope<OrganizationSpecYaml> =
            serde_yaml::from_str(yaml).map_err(|e| ManifestError::YamlError(e.to_string()))?;
        Self::convert_organization(manifest)
    }

    fn convert_template(
        manifest: ManifestEnvelope<TemplateSpecYaml>,
    ) -> Result<WorkflowTemplate, ManifestError> {
        let metadata = manifest.metadata;
        let spec = manifest.spec;

        let mut edges: Vec<TemplateEdge> = spec
            .edges
            .into_iter()
            .map(|e| TemplateEdge {
                from: TaskId::new(e.from),
                to: TaskId::new(e.to),
            })
            .collect();

        let mut nodes = Vec::with_capacity(spec.nodes.len());
        for node in spec.nodes {
            for dependency in &node.depends_on {
                let edge = TemplateEdge {
                    from: TaskId::new(dependency.clone()),
                    to: TaskId::new(node.id.clone()),
                };
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
            let name = node.name.unwrap_or_else(|| node.id.clone());
            let mut domain_node = TemplateNode::new(node.id, name)
                .with_description(node.description)
                .with_objective(node.objective)
                .with_completion_criteria(node.completion_criteria);
            domain_node.context = node.context;
            nodes.push(domain_node);
        }

        let template = WorkflowTemplate {
            id: TemplateId::new(metadata.name.clone()),
            name: spec.display_name.unwrap_or(metadata.name),
            description: metadata.description.unwrap_or_default(),
            nodes,
            edges,
        };

        // Graph problems surface here rather than at start time.
        TaskGraph::build(&template.instantiate_tasks())
            .map_err(|e| ManifestError::ValidationError(e.to_string()))?;

        Ok(template)
    }

    fn convert_organization(
        manifest: ManifestEnvelope<OrganizationSpecYaml>,
    ) -> Result<Organization, ManifestError> {
        let metadata = manifest.metadata;
        let spec = manifest.spec;

        let agents: Vec<AgentNode> = spec
            .agents
            .into_iter()
            .map(|agent| {
                let name = agent.name.unwrap_or_else(|| agent.id.clone());
                AgentNode {
                    id: AgentId::new(agent.id),
                    name,
                    role: agent.role,
                    capabilities: agent.capabilities,
                    tools: agent.tools,
                    strategy: agent.strategy,
                    max_concurrent_tasks: agent.max_concurrent_tasks,
                    requires_human_approval: agent.requires_human_approval,
                    human_escalation_threshold: agent.human_escalation_threshold,
                    can_handoff_to: agent
                        .can_handoff_to
                        .into_iter()
                        .map(AgentId::new)
                        .collect::<BTreeSet<_>>(),
                    max_iterations: agent.max_iterations,
                    model: agent.model,
                }
            })
            .collect();

        let organization = Organization {
            id: OrganizationId::new(metadata.name.clone()),
            name: spec.display_name.unwrap_or(metadata.name),
            agents,
            entry_points: spec.entry_points.into_iter().map(AgentId::new).collect(),
            policy: spec.policy,
        };

        organization
            .validate()
            .map_err(|e| ManifestError::ValidationError(e.to_string()))?;

        if let Some(unknown) = organization
            .entry_points
            .iter()
            .find(|id| organization.agent(id).is_none())
        {
            return Err(ManifestError::ValidationError(format!(
                "entry point {} is not an agent of organization {}",
                unknown, organization.id
            )));
        }

        // An unknown target only fails the handoff that names it.
        for (agent, target) in organization.unknown_handoff_targets() {
            warn!(
                organization = %organization.id,
                agent = %agent,
                target = %target,
                "Handoff target is not an agent of this organization"
            );
        }

        Ok(organization)
    }

    /// Serialize a template back to manifest YAML
    pub fn template_to_yaml(template: &WorkflowTemplate) -> Result<String, ManifestError> {
        let manifest = ManifestEnvelope {
            api_version: API_VERSION.to_string(),
            kind: TEMPLATE_KIND.to_string(),
            metadata: ManifestMetadataYaml {
                name: template.id.0.clone(),
                description: (!template.description.is_empty())
                    .then(|| template.description.clone()),
                labels: HashMap::new(),
            },
            spec: TemplateSpecYaml {
                display_name: (template.name != template.id.0).then(|| template.name.clone()),
                nodes: template
                    .nodes
                    .iter()
                    .map(|node| TemplateNodeYaml {
                        id: node.id.0.clone(),
                        name: Some(node.name.clone()),
                        description: node.description.clone(),
                        objective: node.objective.clone(),
                        completion_criteria: node.completion_criteria.clone(),
                        depends_on: Vec::new(),
                        context: node.context.clone(),
                    })
                    .collect(),
                edges: template
                    .edges
                    .iter()
                    .map(|edge| TemplateEdgeYaml {
                        from: edge.from.0.clone(),
                        to: edge.to.0.clone(),
                    })
                    .collect(),
            },
        };
        serde_yaml::to_string(&manifest).map_err(|e| ManifestError::YamlError(e.to_string()))
    }
}

fn read(path: &Path) -> Result<String, ManifestError> {
    fs::read_to_string(path).map_err(|e| ManifestError::IoError {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

fn check_api_version(api_version: &str) -> Result<(), ManifestError> {
    if api_version != API_VERSION {
        return Err(ManifestError::InvalidApiVersion {
            expected: API_VERSION.to_string(),
            got: api_version.to_string(),
        });
    }
    Ok(())
}

fn probe(yaml: &str) -> Result<KindProbe, ManifestError> {
    serde_yaml::from_str(yaml).map_err(|e| ManifestError::YamlError(e.to_string()))
}

/// Checks `apiVersion` and `kind` before the spec is deserialized, so a
/// manifest of the wrong kind reports that rather than a missing field.
fn check_envelope(yaml: &str, expected_kind: &str) -> Result<(), ManifestError> {
    let header = probe(yaml)?;
    check_api_version(&header.api_version)?;
    if header.kind != expected_kind {
        return Err(ManifestError::InvalidKind {
            expected: expected_kind.to_string(),
            got: header.kind,
        });
    }
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error reading {path}: {error}")]
    IoError { path: String, error: String },

    #[error("YAML parse error: {0}")]
    YamlError(String),

    #[error("Invalid API version: expected '{expected}', got '{got}'")]
    InvalidApiVersion { expected: String, got: String },

    #[error("Invalid kind: expected '{expected}', got '{got}'")]
    InvalidKind { expected: String, got: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEMPLATE: &str = r#"
apiVersion: cadence.dev/v1
kind: WorkflowTemplate
metadata:
  name: release-notes
  description: Draft and review release notes
spec:
  nodes:
    - id: research
      name: Research changes
      objective: Collect merged changes
    - id: draft
      name: Draft notes
      depends_on: [research]
    - id: review
      name: Review notes
  edges:
    - from: draft
      to: review
"#;

    const ORGANIZATION: &str = r#"
apiVersion: cadence.dev/v1
kind: Organization
metadata:
  name: docs-team
spec:
  entry_points: [researcher]
  policy:
    max_execution_time: 30m
    human_supervision: false
  agents:
    - id: researcher
      name: Researcher
      role: researcher
      capabilities:
        - name: research
          description: Finds and summarizes sources
          confidence: 0.9
      can_handoff_to: [writer]
    - id: writer
      role: specialist
      strategy: plan_then_act
      max_concurrent_tasks: 2
      human_escalation_threshold: 0.6
"#;

    #[test]
    fn test_parse_template_with_depends_on_and_edges() {
        let template = ManifestParser::parse_template_yaml(TEMPLATE).unwrap();
        assert_eq!(template.id, TemplateId::new("release-notes"));
        assert_eq!(template.nodes.len(), 3);
        assert_eq!(template.edges.len(), 2);

        let tasks = template.instantiate_tasks();
        let review = tasks.iter().find(|t| t.id == TaskId::from("review")).unwrap();
        assert!(review.dependencies.contains(&TaskId::from("draft")));
    }

    #[test]
    fn test_parse_organization_applies_defaults() {
        let organization = ManifestParser::parse_organization_yaml(ORGANIZATION).unwrap();
        assert_eq!(organization.agents.len(), 2);
        assert_eq!(
            organization.policy.max_execution_time,
            Some(std::time::Duration::from_secs(1800))
        );
        let writer = organization.agent(&AgentId::from("writer")).unwrap();
        assert_eq!(writer.name, "writer");
        assert_eq!(writer.strategy, StrategyKind::PlanThenAct);
        assert_eq!(writer.max_iterations, 10);
        assert!(organization.policy.parallel_execution);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let yaml = r#"
apiVersion: cadence.dev/v1
kind: WorkflowTemplate
metadata:
  name: loop
spec:
  nodes:
    - id: a
      depends_on: [b]
    - id: b
      depends_on: [a]
"#;
        assert!(matches!(
            ManifestParser::parse_template_yaml(yaml),
            Err(ManifestError::ValidationError(_))
        ));
    }

    #[test]
    fn test_out_of_range_confidence_is_rejected() {
        let yaml = ORGANIZATION.replace("confidence: 0.9", "confidence: 1.5");
        assert!(matches!(
            ManifestParser::parse_organization_yaml(&yaml),
            Err(ManifestError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_entry_point_is_rejected() {
        let yaml = ORGANIZATION.replace("entry_points: [researcher]", "entry_points: [ghost]");
        assert!(matches!(
            ManifestParser::parse_organization_yaml(&yaml),
            Err(ManifestError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_api_version_and_kind() {
        let yaml = TEMPLATE.replace("cadence.dev/v1", "invalid/v1");
        assert!(matches!(
            ManifestParser::parse_yaml(&yaml),
            Err(ManifestError::InvalidApiVersion { .. })
        ));

        let yaml = TEMPLATE.replace("kind: WorkflowTemplate", "kind: Agent");
        assert!(matches!(
            ManifestParser::parse_yaml(&yaml),
            Err(ManifestError::InvalidKind { .. })
        ));
        assert!(matches!(
            ManifestParser::parse_organization_yaml(TEMPLATE),
            Err(ManifestError::InvalidKind { .. })
        ));
    }

    #[test]
    fn test_parse_file_dispatches_on_kind() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ORGANIZATION.as_bytes()).unwrap();
        assert!(matches!(
            ManifestParser::parse_file(file.path()).unwrap(),
            Manifest::Organization(_)
        ));
        assert!(matches!(
            ManifestParser::parse_file("/nonexistent/cadence.yaml"),
            Err(ManifestError::IoError { .. })
        ));
    }

    #[test]
    fn test_template_round_trip() {
        let template = ManifestParser::parse_template_yaml(TEMPLATE).unwrap();
        let yaml = ManifestParser::template_to_yaml(&template).unwrap();
        let again = ManifestParser::parse_template_yaml(&yaml).unwrap();
        assert_eq!(template.nodes, again.nodes);
        assert_eq!(template.edges, again.edges);
    }
}
