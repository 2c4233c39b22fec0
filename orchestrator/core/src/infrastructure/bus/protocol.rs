// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MCP Wire Protocol
//!
//! JSON-RPC 2.0 envelopes and the text-payload conventions of the upstream
//! message bus. The bus's `messages` tool returns human-oriented text; the
//! shapes the kernel relies on are:
//!
//! * status lines — `WAIT SUCCESS: Found 1 mentions`, `No mentions found`
//! * mention bullets — `• sender: @agent some text [id:<uuid>]`
//!
//! Anything this module cannot positively identify as a mention is dropped,
//! never guessed at.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::bus::IncomingMessage;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// JSON-RPC 2.0 request. A request without an `id` is a notification.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[allow(dead_code)]
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[allow(dead_code)]
    pub data: Option<Value>,
}

/// Concatenate the text parts of a `tools/call` result.
pub fn tool_result_text(result: &Value) -> String {
    let Some(parts) = result.get("content").and_then(Value::as_array) else {
        return String::new();
    };
    parts
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

static ID_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[id:([0-9a-fA-F-]+)\]").expect("valid id-tag regex"));

static MENTION_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*•\s*([^:\n]+):\s*(.+)$").expect("valid bullet regex"));

static FOUND_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Found\s+(\d+)\s+mention").expect("valid count regex"));

/// Extract the first `[id:…]` tag, used to learn the id of a message the
/// kernel just published.
pub fn extract_message_id(text: &str) -> Option<String> {
    ID_TAG
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// Parse `@agent`-directed mentions out of a `messages` tool payload.
///
/// Self-mentions are dropped here so an agent can never feed on its own
/// output even if the bus surfaces it.
pub fn parse_mentions(agent: &str, text: &str) -> Vec<IncomingMessage> {
    let text = text.trim();
    if text.is_empty() || text.contains("No mentions found") {
        return Vec::new();
    }

    let needle = format!("@{agent}");
    let mut mentions = Vec::new();

    for captures in MENTION_BULLET.captures_iter(text) {
        let sender = captures[1].trim().to_string();
        let body = captures[2].trim();

        let Some(id) = extract_message_id(body) else {
            continue;
        };
        let content = ID_TAG.replace_all(body, "").trim().to_string();

        if !content.contains(&needle) {
            continue;
        }
        if sender == agent {
            tracing::debug!(agent, "skipping self-mention surfaced by the bus");
            continue;
        }

        mentions.push(IncomingMessage {
            id,
            sender,
            content,
        });
    }

    // Some bus builds return a single mention without the bullet framing.
    if mentions.is_empty() && text.contains(&needle) && !text.contains("WAIT SUCCESS") {
        if let Some(id) = extract_message_id(text) {
            let content = ID_TAG.replace_all(text, "").trim().to_string();
            mentions.push(IncomingMessage {
                id,
                sender: "unknown".to_string(),
                content,
            });
        }
    }

    mentions
}

/// How many mentions a `messages` payload reports, used by the backlog drain
/// to decide when the remote side is empty.
pub fn count_mentions(text: &str) -> usize {
    let text = text.trim();
    if text.is_empty() || text.contains("No mentions found") {
        return 0;
    }
    if let Some(captures) = FOUND_COUNT.captures(text) {
        if let Ok(count) = captures[1].parse::<usize>() {
            return count;
        }
    }
    let bullets = text.matches("• ").count();
    if bullets > 0 {
        bullets
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYLOAD: &str = "WAIT SUCCESS: Found 1 mentions\n\
        • bob: @alpha hello there [id:0a1b2c3d-0000-1111-2222-333344445555]";

    #[test]
    fn parses_a_bullet_mention() {
        let mentions = parse_mentions("alpha", PAYLOAD);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].id, "0a1b2c3d-0000-1111-2222-333344445555");
        assert_eq!(mentions[0].sender, "bob");
        assert_eq!(mentions[0].content, "@alpha hello there");
    }

    #[test]
    fn parses_several_bullets_in_one_payload() {
        let payload = "Found 2 mentions\n\
            • bob: @alpha first [id:00000000-0000-0000-0000-000000000001]\n\
            • carol: @alpha second [id:00000000-0000-0000-0000-000000000002]";
        let mentions = parse_mentions("alpha", payload);
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].sender, "bob");
        assert_eq!(mentions[1].sender, "carol");
    }

    #[test]
    fn skips_status_only_payloads() {
        assert!(parse_mentions("alpha", "No mentions found").is_empty());
        assert!(parse_mentions("alpha", "WAIT SUCCESS: Found 0 mentions").is_empty());
        assert!(parse_mentions("alpha", "").is_empty());
    }

    #[test]
    fn skips_mentions_of_other_agents_and_self() {
        let other = "• bob: @beta not for us [id:00000000-0000-0000-0000-00000000000a]";
        assert!(parse_mentions("alpha", other).is_empty());

        let own = "• alpha: @alpha talking to myself [id:00000000-0000-0000-0000-00000000000b]";
        assert!(parse_mentions("alpha", own).is_empty());
    }

    #[test]
    fn counts_mentions_for_the_drain_loop() {
        assert_eq!(count_mentions("No mentions found"), 0);
        assert_eq!(count_mentions("WAIT SUCCESS: Found 3 mentions\n• a: x\n• b: y\n• c: z"), 3);
        assert_eq!(count_mentions("• bob: @alpha hi [id:1234]"), 1);
        assert_eq!(count_mentions(""), 0);
    }

    #[test]
    fn tool_result_text_joins_text_parts() {
        let result = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "…"},
                {"type": "text", "text": "line two"}
            ]
        });
        assert_eq!(tool_result_text(&result), "line one\nline two");
        assert_eq!(tool_result_text(&json!({})), "");
    }

    #[test]
    fn notification_has_no_id() {
        let request = JsonRpcRequest::notification("notifications/initialized", None);
        let encoded = serde_json::to_value(&request).unwrap();
        assert!(encoded.get("id").is_none());
        assert_eq!(encoded["jsonrpc"], "2.0");
    }
}
