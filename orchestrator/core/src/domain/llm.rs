// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # LLM Provider Interface (Anti-Corruption Layer)
//!
//! Chat-shaped domain interface over external inference APIs. Handlers build
//! a [`ChatRequest`] from the trigger, batch and conversation history; the
//! adapters in `infrastructure/llm/` translate it to each vendor's wire
//! format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn of the conversation as the model should see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// System prompt, when the agent was deployed with one.
    pub system: Option<String>,
    /// Conversation turns, oldest first. The last turn is the trigger.
    pub turns: Vec<ChatTurn>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub provider: String,
    pub model: String,
}

/// Errors that can occur during LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited")]
    RateLimit,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider error: {0}")]
    Provider(String),
}

/// Domain interface for LLM providers. Isolates handlers from vendor APIs;
/// implementations live in `infrastructure/llm/`.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name as used in the framework registry ("ollama", "openai", …).
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LLMError>;

    /// Check that the provider is reachable and configured.
    async fn health_check(&self) -> Result<(), LLMError>;
}
