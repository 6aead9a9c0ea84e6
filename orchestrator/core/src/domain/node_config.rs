// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Cadence orchestrator node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Scheduler, human-interaction and timeout settings
// - Reasoning engine endpoint (any OpenAI-compatible API)
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "cadence.dev/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "cadence.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

/// Shorter name used by callers that only care about the content.
pub type NodeConfig = NodeConfigManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Scheduler and human-interaction tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationSettings {
    /// Sleep between ticks when nothing can be launched.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Default deadline for human interaction requests.
    #[serde(default = "default_human_timeout", with = "humantime_serde")]
    pub human_timeout: Duration,

    /// Executions still running after this are failed.
    #[serde(default = "default_max_execution_time", with = "humantime_serde")]
    pub max_execution_time: Duration,

    /// Bound on a single reasoning call.
    #[serde(default = "default_reasoning_timeout", with = "humantime_serde")]
    pub reasoning_timeout: Duration,

    /// Charged ticks a ready task may go without an eligible agent.
    #[serde(default = "default_assignment_retry_budget")]
    pub assignment_retry_budget: u32,

    /// Retryable execution failures (rejected handoffs) before a task fails.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    #[serde(default = "default_max_handoffs")]
    pub max_handoffs_per_task: u32,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_human_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_execution_time() -> Duration {
    Duration::from_secs(120 * 60)
}

fn default_reasoning_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_assignment_retry_budget() -> u32 {
    20
}

fn default_max_task_attempts() -> u32 {
    3
}

fn default_max_handoffs() -> u32 {
    3
}

fn default_event_bus_capacity() -> usize {
    1000
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            human_timeout: default_human_timeout(),
            max_execution_time: default_max_execution_time(),
            reasoning_timeout: default_reasoning_timeout(),
            assignment_retry_budget: default_assignment_retry_budget(),
            max_task_attempts: default_max_task_attempts(),
            max_handoffs_per_task: default_max_handoffs(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint (OpenAI, vLLM, LM Studio, Ollama `/v1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub endpoint: String,

    pub model: String,

    /// API key, or "env:VAR_NAME" to read it from the environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "llama3.2:latest".to_string(),
            api_key: None,
            temperature: Some(0.2),
            max_tokens: Some(2048),
        }
    }
}

impl ReasoningConfig {
    /// Resolves `env:VAR` references. A missing variable yields `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        match self.api_key.as_deref() {
            Some(value) => match value.strip_prefix("env:") {
                Some(var) => std::env::var(var).ok(),
                None => Some(value.to_string()),
            },
            None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "cadence-node".to_string(),
                version: None,
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CADENCE_CONFIG_PATH environment variable
    /// 2. ./cadence-config.yaml (working directory)
    /// 3. ~/.cadence/config.yaml (user home)
    /// 4. /etc/cadence/config.yaml (system, Unix) or C:\ProgramData\Cadence\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CADENCE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./cadence-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cadence").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/cadence/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Cadence\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows container deployments to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        let orchestration = &mut self.spec.orchestration;
        override_duration("CADENCE_HUMAN_TIMEOUT", &mut orchestration.human_timeout);
        override_duration("CADENCE_MAX_EXECUTION_TIME", &mut orchestration.max_execution_time);
        override_duration("CADENCE_POLL_INTERVAL", &mut orchestration.poll_interval);

        if let Ok(endpoint) = std::env::var("CADENCE_REASONING_ENDPOINT") {
            tracing::info!("Environment override: CADENCE_REASONING_ENDPOINT={}", endpoint);
            self.spec.reasoning.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("CADENCE_REASONING_MODEL") {
            tracing::info!("Environment override: CADENCE_REASONING_MODEL={}", model);
            self.spec.reasoning.model = model;
        }
        if let Ok(key) = std::env::var("CADENCE_REASONING_API_KEY") {
            tracing::info!("Environment override: CADENCE_REASONING_API_KEY=<redacted>");
            self.spec.reasoning.api_key = Some(key);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let orchestration = &self.spec.orchestration;
        for (name, value) in [
            ("poll_interval", orchestration.poll_interval),
            ("human_timeout", orchestration.human_timeout),
            ("max_execution_time", orchestration.max_execution_time),
            ("reasoning_timeout", orchestration.reasoning_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("spec.orchestration.{} must be greater than zero", name);
            }
        }

        if orchestration.max_task_attempts == 0 {
            anyhow::bail!("spec.orchestration.max_task_attempts must be at least 1");
        }

        if orchestration.event_bus_capacity == 0 {
            anyhow::bail!("spec.orchestration.event_bus_capacity must be at least 1");
        }

        if self.spec.reasoning.endpoint.is_empty() {
            anyhow::bail!("spec.reasoning.endpoint cannot be empty");
        }

        if self.spec.reasoning.model.is_empty() {
            anyhow::bail!("spec.reasoning.model cannot be empty");
        }

        Ok(())
    }
}

fn override_duration(var: &str, target: &mut Duration) {
    if let Ok(val) = std::env::var(var) {
        match humantime_serde::re::humantime::parse_duration(&val) {
            Ok(duration) => {
                tracing::info!("Environment override: {}={}", var, val);
                *target = duration;
            }
            Err(_) => {
                tracing::warn!(
                    "Invalid value for {}: '{}'. Expected a duration like '30s' or '5m'. Ignoring.",
                    var,
                    val
                );
            }
        }
    }
}
