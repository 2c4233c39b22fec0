// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OpenAI chat-completions adapter. Also works against OpenAI-compatible
//! endpoints via `OPENAI_BASE_URL`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::llm::{ChatReply, ChatRequest, ChatRole, LLMError, LLMProvider};

pub struct OpenAIAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

impl OpenAIAdapter {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LLMError> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for turn in &request.turns {
            messages.push(OpenAIMessage {
                role: match turn.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                },
                content: turn.content.clone(),
            });
        }

        let body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LLMError::Authentication(error_text),
                429 => LLMError::RateLimit,
                404 => LLMError::ModelNotFound(self.model.clone()),
                _ => LLMError::Provider(format!("HTTP {status}: {error_text}")),
            });
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("failed to parse response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(ChatReply {
            text,
            provider: "openai".to_string(),
            model: self.model.clone(),
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        if self.api_key.is_empty() {
            return Err(LLMError::Authentication("empty API key".to_string()));
        }
        Ok(())
    }
}
