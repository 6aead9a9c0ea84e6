// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenAI-Compatible Reasoning Engine Adapter
//
// Anti-Corruption Layer for chat-completions APIs. Works against OpenAI and
// the compatible `/v1` endpoints of vLLM, LM Studio and Ollama.

use crate::domain::node_config::ReasoningConfig;
use crate::domain::reasoning::{
    ReasoningEngine, ReasoningError, ReasoningReply, ReasoningRequest, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct OpenAiCompatibleEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl OpenAiCompatibleEngine {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_config(config: &ReasoningConfig) -> Self {
        let mut engine = Self::new(
            config.endpoint.clone(),
            config.resolve_api_key(),
            config.model.clone(),
        );
        engine.temperature = config.temperature;
        engine.max_tokens = config.max_tokens;
        engine
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ReasoningRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: request.system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiCompatibleEngine {
    async fn reason(&self, request: &ReasoningRequest) -> Result<ReasoningReply, ReasoningError> {
        let body = self.build_request(request);
        let model = body.model.clone();

        debug!(
            agent_id = %request.agent_id,
            phase = ?request.phase,
            iteration = request.iteration,
            model = %model,
            "Sending reasoning request"
        );

        let mut http = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| ReasoningError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 401 || status == 403 {
                ReasoningError::Authentication(error_text)
            } else if status == 429 {
                ReasoningError::RateLimit
            } else if status == 404 {
                ReasoningError::ModelNotFound(model)
            } else {
                ReasoningError::Provider(format!("HTTP {}: {}", status, error_text))
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Provider(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::Provider("No response from model".into()))?;

        Ok(ReasoningReply {
            text: choice.message.content,
            usage: parsed
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            model: parsed.model.unwrap_or(model),
        })
    }
}
