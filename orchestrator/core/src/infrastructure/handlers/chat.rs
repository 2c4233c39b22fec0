// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Provider-backed conversational handler. Formats the trigger, the drained
//! batch and the conversation history into one prompt and routes it through
//! an [`LLMProvider`]. Backs the `ollama`, `anthropic`, `openai` and `graph`
//! framework kinds; only the wiring of the provider differs between them.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::domain::handler::{HandlerError, MessageHandler};
use crate::domain::llm::{ChatRequest, ChatTurn, LLMProvider};
use crate::domain::message::Message;

const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct ChatHandler {
    agent: String,
    provider: Arc<dyn LLMProvider>,
    system_prompt: Option<String>,
}

impl ChatHandler {
    pub fn new(
        agent: String,
        provider: Arc<dyn LLMProvider>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            agent,
            provider,
            system_prompt,
        }
    }

    /// One transcript-style prompt. History and batch are folded into the
    /// text rather than into chat turns so every provider sees the same
    /// thing regardless of its role-alternation rules.
    fn build_prompt(&self, trigger: &Message, batch: &[Message], history: &[Message]) -> String {
        let mut prompt = String::new();

        if !history.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for message in history {
                let _ = writeln!(prompt, "{}: {}", message.sender, message.mention_body());
            }
            prompt.push('\n');
        }

        if !batch.is_empty() {
            prompt.push_str("Also waiting in your queue (answered by this same reply):\n");
            for message in batch {
                let _ = writeln!(prompt, "{}: {}", message.sender, message.mention_body());
            }
            prompt.push('\n');
        }

        let _ = writeln!(prompt, "{} says: {}", trigger.sender, trigger.mention_body());
        let _ = write!(
            prompt,
            "\nReply as @{} with the message text only.",
            self.agent
        );
        prompt
    }

    fn system(&self) -> String {
        match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => format!(
                "You are the agent @{} in a multi-agent chat. Be concise.",
                self.agent
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for ChatHandler {
    async fn handle(
        &self,
        trigger: &Message,
        batch: &[Message],
        history: &[Message],
    ) -> Result<Option<String>, HandlerError> {
        let request = ChatRequest {
            system: Some(self.system()),
            turns: vec![ChatTurn::user(self.build_prompt(trigger, batch, history))],
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: None,
        };

        let reply = self
            .provider
            .chat(&request)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        let text = reply.text.trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.to_string()))
        }
    }
}
