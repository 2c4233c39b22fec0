// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # LLM Provider Adapters
//!
//! Anti-corruption layer between the chat-shaped domain interface and the
//! vendor APIs. Endpoints and credentials come from the environment; secret
//! handling beyond that is outside the kernel.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::domain::llm::{LLMError, LLMProvider};

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;

/// Build a provider by registry name. `model` is already validated against
/// the framework registry by the supervisor.
pub fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, LLMError> {
    match name {
        "ollama" => {
            let endpoint = std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaAdapter::new(endpoint, model.to_string())))
        }
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                LLMError::Authentication("ANTHROPIC_API_KEY is not set".to_string())
            })?;
            Ok(Arc::new(AnthropicAdapter::new(api_key, model.to_string())))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| LLMError::Authentication("OPENAI_API_KEY is not set".to_string()))?;
            let endpoint = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            Ok(Arc::new(OpenAIAdapter::new(
                endpoint,
                api_key,
                model.to_string(),
            )))
        }
        other => Err(LLMError::Provider(format!("unknown provider: {other}"))),
    }
}
