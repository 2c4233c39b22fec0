// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ollama adapter. Local inference endpoint, so it also backs the registry's
//! model discovery (`/api/tags`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::llm::{ChatReply, ChatRequest, ChatRole, LLMError, LLMProvider};

pub struct OllamaAdapter {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaTag>,
}

#[derive(Deserialize)]
struct OllamaTag {
    name: String,
}

impl OllamaAdapter {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }

    /// Models installed on the local endpoint. The supervisor uses this to
    /// validate a requested model before launching a monitor.
    pub async fn list_models(&self) -> Result<Vec<String>, LLMError> {
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LLMError::Provider(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("failed to parse tags: {e}")))?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }
}

fn to_ollama_messages(request: &ChatRequest) -> Vec<OllamaMessage> {
    let mut messages = Vec::with_capacity(request.turns.len() + 1);
    if let Some(system) = &request.system {
        messages.push(OllamaMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    for turn in &request.turns {
        messages.push(OllamaMessage {
            role: match turn.role {
                ChatRole::User => "user".to_string(),
                ChatRole::Assistant => "assistant".to_string(),
            },
            content: turn.content.clone(),
        });
    }
    messages
}

#[async_trait]
impl LLMProvider for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LLMError> {
        let body = OllamaChatRequest {
            model: self.model.clone(),
            messages: to_ollama_messages(request),
            stream: false,
            options: Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens.map(|t| t as i32),
            }),
        };

        let url = format!("{}/api/chat", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(if status == 404 {
                LLMError::ModelNotFound(self.model.clone())
            } else {
                LLMError::Provider(format!("HTTP {status}: {error_text}"))
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("failed to parse response: {e}")))?;

        Ok(ChatReply {
            text: parsed.message.content,
            provider: "ollama".to_string(),
            model: self.model.clone(),
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        self.list_models().await.map(|_| ())
    }
}
