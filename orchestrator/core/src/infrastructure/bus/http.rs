// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP Bus Client
//!
//! [`BusClient`] over MCP streamable HTTP. One client per agent, pointed at
//! the agent's channel (`…/mcp/agents/<name>`). Every operation is its own
//! HTTP request on a shared connection pool, which is what makes `ping`
//! independent of a long-poll `receive` by construction, and makes dropping
//! a `receive` future abort the poll without consuming anything.
//!
//! Backoff policy: exponential with jitter from a 700 ms floor, `Retry-After`
//! honoured, at most `max_attempts` tries. The kernel requeues triggers on
//! exhausted-transient send failures, so exhaustion preserves the transient
//! kind; only genuinely unrecoverable responses (auth, bad request) surface
//! as fatal.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::bus::{BusClient, BusClientFactory, BusError, IncomingMessage};
use crate::infrastructure::agent_config::AgentConfig;
use crate::infrastructure::bus::protocol::{
    self, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};

/// Rate-limit floor between retried or iterating calls on one agent channel.
/// ~85 requests/minute, under the bus's ~100/minute ceiling.
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_millis(700);

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Upstream long-poll windows run ~5 minutes; allow slack before treating
/// the poll as quietly expired.
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(330);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff with ±20% jitter, floored at the rate limit and
/// never shorter than the server's `Retry-After` hint.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let base = RATE_LIMIT_FLOOR.saturating_mul(1u32 << exponent).min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    let delay = base.mul_f64(jitter).max(RATE_LIMIT_FLOOR);
    match retry_after {
        Some(hint) => delay.max(hint),
        None => delay,
    }
}

/// Serialises iterating operations (backlog drain, startup sweep) onto the
/// rate-limit floor.
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn rate_limited() -> Self {
        Self::new(RATE_LIMIT_FLOOR)
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// `pace` call.
    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let next = previous + self.min_interval;
            let now = Instant::now();
            if next > now {
                tokio::time::sleep(next - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Default)]
struct SessionState {
    initialized: bool,
    session_id: Option<String>,
    next_request_id: u64,
}

pub struct HttpBusClient {
    agent: String,
    endpoint: String,
    client: reqwest::Client,
    session: Mutex<SessionState>,
    /// Paces iterating (non-blocking) fetches on this channel.
    pacer: Pacer,
    max_attempts: u32,
    receive_timeout: Duration,
    call_timeout: Duration,
}

impl HttpBusClient {
    pub fn new(agent: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            agent: agent.into(),
            endpoint: endpoint.into(),
            client,
            session: Mutex::new(SessionState::default()),
            pacer: Pacer::rate_limited(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, call: Duration, receive: Duration) -> Self {
        self.call_timeout = call;
        self.receive_timeout = receive;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// One JSON-RPC round trip. Returns the parsed `result` and the
    /// `Mcp-Session-Id` response header when the server issued one.
    async fn post_rpc(
        &self,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<(Option<Value>, Option<String>), BusError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Accept", "application/json")
            .json(request);
        if let Some(session_id) = session_id {
            builder = builder.header("Mcp-Session-Id", session_id);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(BusError::Transient {
                reason: "rate limited by the bus".to_string(),
                retry_after,
            });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BusError::Fatal(format!(
                "bus rejected credentials for @{} ({status})",
                self.agent
            )));
        }
        if status.is_server_error() {
            return Err(BusError::transient(format!("bus returned {status}")));
        }
        if !status.is_success() {
            return Err(BusError::Fatal(format!("bus returned {status}")));
        }

        let new_session = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // Notifications get no body worth parsing.
        if request.id.is_none() {
            return Ok((None, new_session));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| BusError::transient(format!("bad bus response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(BusError::Fatal(format!(
                "bus error {}: {}",
                error.code, error.message
            )));
        }

        Ok((parsed.result, new_session))
    }

    /// Initialize the MCP session if this client has not yet, storing the
    /// server-issued session id.
    async fn ensure_session(&self) -> Result<(), BusError> {
        let mut session = self.session.lock().await;
        if session.initialized {
            return Ok(());
        }

        session.next_request_id += 1;
        let request = JsonRpcRequest::new(
            session.next_request_id,
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "aviary", "version": env!("CARGO_PKG_VERSION")},
            })),
        );

        let (_, session_id) = self
            .post_rpc(&request, None, self.call_timeout)
            .await
            .map_err(|e| match e {
                // A channel that cannot even initialize is misconfigured.
                BusError::Transient { reason, .. } => BusError::Transient {
                    reason: format!("initialize failed: {reason}"),
                    retry_after: None,
                },
                fatal => fatal,
            })?;

        session.session_id = session_id;
        session.initialized = true;

        let initialized = JsonRpcRequest::notification("notifications/initialized", None);
        // Best effort; some servers do not require it.
        let _ = self
            .post_rpc(&initialized, session.session_id.as_deref(), self.call_timeout)
            .await;

        tracing::debug!(agent = %self.agent, "bus session initialized");
        Ok(())
    }

    /// Invoke the bus's `messages` tool. Transient failures are retried with
    /// backoff up to `max_attempts` when `retry` is set; the last error is
    /// surfaced with its kind preserved.
    async fn call_messages_tool(
        &self,
        arguments: Value,
        timeout: Duration,
        retry: bool,
    ) -> Result<Value, BusError> {
        let attempts = if retry { self.max_attempts } else { 1 };
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let retry_after = match &last_error {
                    Some(BusError::Transient { retry_after, .. }) => *retry_after,
                    _ => None,
                };
                tokio::time::sleep(backoff_delay(attempt, retry_after)).await;
            }

            if let Err(e) = self.ensure_session().await {
                if e.is_transient() {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }

            let (request, session_id) = {
                let mut session = self.session.lock().await;
                session.next_request_id += 1;
                (
                    JsonRpcRequest::new(
                        session.next_request_id,
                        "tools/call",
                        Some(json!({"name": "messages", "arguments": arguments.clone()})),
                    ),
                    session.session_id.clone(),
                )
            };

            match self.post_rpc(&request, session_id.as_deref(), timeout).await {
                Ok((result, _)) => return Ok(result.unwrap_or(Value::Null)),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        agent = %self.agent,
                        attempt,
                        error = %e,
                        "transient bus failure"
                    );
                    last_error = Some(e);
                }
                Err(fatal) => return Err(fatal),
            }
        }

        Err(last_error
            .unwrap_or_else(|| BusError::transient("bus call failed with no attempts made")))
    }
}

#[async_trait]
impl BusClient for HttpBusClient {
    fn agent(&self) -> &str {
        &self.agent
    }

    async fn send(
        &self,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Option<String>, BusError> {
        let mut arguments = json!({"action": "send", "content": content});
        if let Some(parent) = parent_id {
            arguments["parent_message_id"] = Value::from(parent);
        }

        let result = self
            .call_messages_tool(arguments, self.call_timeout, true)
            .await?;
        let text = protocol::tool_result_text(&result);
        Ok(protocol::extract_message_id(&text))
    }

    async fn receive(
        &self,
        wait: bool,
        limit: Option<u32>,
        mark_read: bool,
    ) -> Result<Vec<IncomingMessage>, BusError> {
        let mut arguments = json!({
            "action": "check",
            "filter_agent": self.agent,
            "wait": wait,
            "mark_read": mark_read,
        });
        if !wait {
            arguments["mode"] = Value::from("unread");
            // Iterating fetches (sweeps, drains) stay under the bus's rate
            // limit even if the caller forgets to pace.
            self.pacer.pace().await;
        }
        if let Some(limit) = limit {
            arguments["limit"] = Value::from(limit);
        }

        // A blocking poll is a single attempt: its own expiry is normal, and
        // the poller loop is the retry.
        let timeout = if wait {
            self.receive_timeout
        } else {
            self.call_timeout
        };
        match self.call_messages_tool(arguments, timeout, !wait).await {
            Ok(result) => {
                let text = protocol::tool_result_text(&result);
                Ok(protocol::parse_mentions(&self.agent, &text))
            }
            Err(BusError::Transient { reason, .. })
                if wait && reason.contains("timed out") =>
            {
                // Long poll expired with nothing to deliver.
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> Result<(), BusError> {
        self.ensure_session().await?;
        let (request, session_id) = {
            let mut session = self.session.lock().await;
            session.next_request_id += 1;
            (
                JsonRpcRequest::new(session.next_request_id, "ping", None),
                session.session_id.clone(),
            )
        };
        self.post_rpc(&request, session_id.as_deref(), self.call_timeout)
            .await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BusError> {
        {
            let mut session = self.session.lock().await;
            *session = SessionState::default();
        }
        self.ensure_session().await
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> BusError {
    if error.is_timeout() {
        BusError::transient("bus request timed out")
    } else if error.is_connect() {
        BusError::transient(format!("bus connection failed: {error}"))
    } else if error.is_builder() || error.is_request() {
        BusError::Fatal(format!("malformed bus request: {error}"))
    } else {
        BusError::transient(error.to_string())
    }
}

/// Builds per-agent clients from the agent config directory, for supervisor
/// operations that act on agents that are not running.
pub struct HttpBusClientFactory {
    configs_dir: PathBuf,
    default_server_url: String,
    max_attempts: u32,
}

impl HttpBusClientFactory {
    pub fn new(configs_dir: PathBuf, default_server_url: String) -> Self {
        Self {
            configs_dir,
            default_server_url,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BusClientFactory for HttpBusClientFactory {
    fn client_for(&self, agent: &str) -> Result<Arc<dyn BusClient>, BusError> {
        let endpoint = match AgentConfig::load(&self.configs_dir, agent) {
            Ok(config) => config
                .bus_endpoint(agent, &self.default_server_url)
                .url,
            Err(e) => {
                tracing::debug!(agent, error = %e, "no agent config, using default endpoint");
                format!(
                    "{}/mcp/agents/{agent}",
                    self.default_server_url.trim_end_matches('/')
                )
            }
        };

        Ok(Arc::new(
            HttpBusClient::new(agent, endpoint).with_max_attempts(self.max_attempts),
        ))
    }
}
