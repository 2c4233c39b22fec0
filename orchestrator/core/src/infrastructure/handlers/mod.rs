// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Handler Implementations
//!
//! The closed set of handler variants from the framework registry, plus the
//! factory that wires one up for a launched monitor. The kernel treats the
//! result opaquely through [`MessageHandler`].

pub mod chat;
pub mod echo;

use std::sync::Arc;

use anyhow::Context;

use crate::domain::handler::MessageHandler;
use crate::domain::registry::{spec_for, HandlerKind};
use crate::infrastructure::llm::create_provider;

pub use chat::ChatHandler;
pub use echo::EchoHandler;

/// Launch-time handler settings, already validated against the registry.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub agent: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

pub fn build_handler(
    kind: HandlerKind,
    settings: &HandlerSettings,
) -> anyhow::Result<Arc<dyn MessageHandler>> {
    match kind {
        HandlerKind::Echo => Ok(Arc::new(EchoHandler::new(settings.agent.clone()))),
        HandlerKind::Ollama | HandlerKind::Anthropic | HandlerKind::OpenAi => {
            let provider_name = spec_for(kind)
                .implicit_provider
                .expect("fixed-provider frameworks carry an implicit provider");
            let model = settings
                .model
                .as_deref()
                .context("model is required for LLM handlers")?;
            let provider = create_provider(provider_name, model)
                .with_context(|| format!("failed to build provider '{provider_name}'"))?;
            Ok(Arc::new(ChatHandler::new(
                settings.agent.clone(),
                provider,
                settings.system_prompt.clone(),
            )))
        }
        HandlerKind::Graph => {
            let provider_name = settings
                .provider
                .as_deref()
                .context("provider is required for graph handlers")?;
            let model = settings
                .model
                .as_deref()
                .context("model is required for graph handlers")?;
            let provider = create_provider(provider_name, model)
                .with_context(|| format!("failed to build provider '{provider_name}'"))?;
            Ok(Arc::new(ChatHandler::new(
                settings.agent.clone(),
                provider,
                settings.system_prompt.clone(),
            )))
        }
    }
}
