// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Echo handler. Replies with the trigger content verbatim; the simplest
//! way to smoke-test a deployment end to end. The runtime's self-mention
//! stripping turns `@alpha hello` into the reply `hello`.

use async_trait::async_trait;

use crate::domain::handler::{HandlerError, MessageHandler};
use crate::domain::message::Message;

/// Marker of legacy wrapped echo replies still circulating on a bus. Seeing
/// it in a trigger means we are echoing an echo; abstain instead of
/// bouncing forever.
const ECHO_MARKER: &str = "Echo received at";

pub struct EchoHandler {
    agent: String,
}

impl EchoHandler {
    pub fn new(agent: String) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(
        &self,
        trigger: &Message,
        _batch: &[Message],
        _history: &[Message],
    ) -> Result<Option<String>, HandlerError> {
        if trigger.content.contains(ECHO_MARKER) {
            tracing::debug!(agent = %self.agent, "ignoring echo of an echo");
            return Ok(None);
        }

        Ok(Some(trigger.content.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::domain::message::MessageState;

    fn mention(content: &str) -> Message {
        Message {
            id: "0a1b2c3d4e5f".into(),
            agent: "alpha".into(),
            sender: "bob".into(),
            content: content.into(),
            arrived_at: Utc::now(),
            state: MessageState::Processing,
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn echoes_the_trigger_verbatim() {
        let handler = EchoHandler::new("alpha".into());
        let reply = handler
            .handle(&mention("@alpha hello"), &[], &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, "@alpha hello");
    }

    #[tokio::test]
    async fn abstains_on_an_echo_of_an_echo() {
        let handler = EchoHandler::new("alpha".into());
        let reply = handler
            .handle(
                &mention("@alpha Echo received at 10:00:00 from @alpha: hi"),
                &[],
                &[],
            )
            .await
            .unwrap();
        assert!(reply.is_none());
    }
}
