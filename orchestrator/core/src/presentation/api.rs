// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Control Plane API
//!
//! Thin REST surface over the supervisor plus the `/logs` WebSocket. No
//! control logic lives here: every route delegates to the supervisor or the
//! store and translates the result to JSON.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::application::supervisor::{Supervisor, SupervisorError, StartRequest};
use crate::domain::agent::MonitorId;
use crate::domain::deployment::DeploymentCatalog;
use crate::domain::registry::{framework_registry, HandlerKind, ModelCatalog};
use crate::domain::store::MessageStore;
use crate::infrastructure::log_stream::LogMultiplexer;
use crate::presentation::logs_ws;

pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<dyn MessageStore>,
    pub catalog: Arc<dyn DeploymentCatalog>,
    pub logs: LogMultiplexer,
    pub started_at: std::time::Instant,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/monitors", get(list_monitors))
        .route("/monitors/start", post(start_monitor))
        .route("/monitors/stop", post(stop_monitor))
        .route("/monitors/kill", post(kill_monitor))
        .route("/monitors/restart", post(restart_monitor))
        .route("/monitors/delete", post(delete_monitor))
        .route("/monitors/delete-stopped", post(delete_stopped_monitors))
        .route("/monitors/stop-all", post(stop_all))
        .route("/kill-switch/deactivate", post(deactivate_kill_switch))
        .route("/kill-switch/status", get(kill_switch_status))
        .route("/agents/reset", post(reset_agents))
        .route("/agents/:name/reset", post(reset_agent))
        .route("/agents/:name/stats", get(agent_stats))
        .route("/frameworks", get(frameworks))
        .route("/deployments", get(list_deployments))
        .route("/deployments/:id/start", post(start_deployment))
        .route("/deployments/:id/stop", post(stop_deployment))
        .route("/messages/test", post(send_test_message))
        .route("/logs", get(logs_ws::logs_stream))
        .with_state(state)
}

fn error_response(error: SupervisorError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        SupervisorError::Conflict(_) | SupervisorError::AgentRunning(_) => StatusCode::CONFLICT,
        SupervisorError::NotFound(_) | SupervisorError::GroupNotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::Registry(_)
        | SupervisorError::Config(_)
        | SupervisorError::GroupUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SupervisorError::StartupTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SupervisorError::Launch(_) | SupervisorError::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string()})))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "kill_switch_active": state.supervisor.kill_switch_active(),
    }))
}

async fn list_monitors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let monitors = state.supervisor.snapshot().await;
    Json(json!({
        "monitors": monitors,
        "kill_switch_active": state.supervisor.kill_switch_active(),
    }))
}

#[derive(Deserialize)]
struct StartMonitorRequest {
    agent: String,
    handler_kind: String,
    provider: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    #[serde(default = "default_true")]
    process_backlog: bool,
}

fn default_true() -> bool {
    true
}

async fn start_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartMonitorRequest>,
) -> impl IntoResponse {
    let handler_kind: HandlerKind = match payload.handler_kind.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(SupervisorError::Registry(e)).into_response(),
    };

    let request = StartRequest {
        agent: payload.agent,
        handler_kind,
        provider: payload.provider,
        model: payload.model,
        system_prompt: payload.system_prompt,
        deployment_group: None,
        process_backlog: payload.process_backlog,
    };

    match state.supervisor.start(request).await {
        Ok(monitor_id) => Json(json!({"runtime_id": monitor_id.as_str()})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct MonitorIdRequest {
    #[serde(alias = "runtime_id")]
    monitor_id: String,
    #[serde(default = "default_true")]
    process_backlog: bool,
}

async fn stop_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MonitorIdRequest>,
) -> impl IntoResponse {
    let monitor_id = MonitorId::from_string(payload.monitor_id);
    match state.supervisor.stop(&monitor_id).await {
        Ok(stopped) => Json(json!({"ok": stopped})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn kill_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MonitorIdRequest>,
) -> impl IntoResponse {
    let monitor_id = MonitorId::from_string(payload.monitor_id);
    match state.supervisor.kill(&monitor_id).await {
        Ok(killed) => Json(json!({"ok": killed})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn restart_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MonitorIdRequest>,
) -> impl IntoResponse {
    let monitor_id = MonitorId::from_string(payload.monitor_id);
    match state
        .supervisor
        .restart(&monitor_id, payload.process_backlog)
        .await
    {
        Ok(new_id) => Json(json!({"runtime_id": new_id.as_str()})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn delete_monitor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MonitorIdRequest>,
) -> impl IntoResponse {
    let monitor_id = MonitorId::from_string(payload.monitor_id);
    match state.supervisor.delete(&monitor_id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn delete_stopped_monitors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let deleted = state.supervisor.delete_stopped().await;
    Json(json!({"deleted": deleted}))
}

/// Fleet-wide pause. Runtimes observe the flag within two seconds and stop
/// polling and processing while staying alive.
async fn stop_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.supervisor.activate_kill_switch() {
        Ok(()) => Json(json!({"ok": true, "kill_switch_active": true})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn deactivate_kill_switch(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.supervisor.deactivate_kill_switch() {
        Ok(()) => Json(json!({"ok": true, "kill_switch_active": false})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn kill_switch_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"active": state.supervisor.kill_switch_active()}))
}

async fn reset_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.supervisor.reset_agent(&name).await {
        Ok(summary) => Json(json!(summary)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct EnvironmentQuery {
    environment: Option<String>,
}

async fn reset_agents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnvironmentQuery>,
) -> impl IntoResponse {
    let summary = state
        .supervisor
        .reset_agents(query.environment.as_deref())
        .await;
    Json(json!(summary))
}

async fn agent_stats(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.stats(&name).await {
        Ok(stats) => Json(json!({"agent": name, "stats": stats})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Registry dump for UI hints: which kinds need a provider/model and what
/// models are valid.
async fn frameworks() -> impl IntoResponse {
    let frameworks: Vec<Value> = framework_registry()
        .iter()
        .map(|spec| {
            let models = match spec.models {
                ModelCatalog::None => Value::Null,
                ModelCatalog::Fixed(models) => json!(models),
                ModelCatalog::Discovered => json!("discovered"),
            };
            json!({
                "kind": spec.kind.as_str(),
                "display_name": spec.display_name,
                "requires_provider": spec.requires_provider,
                "requires_model": spec.requires_model,
                "implicit_provider": spec.implicit_provider,
                "default_model": spec.default_model,
                "models": models,
            })
        })
        .collect();
    Json(json!({"frameworks": frameworks}))
}

async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnvironmentQuery>,
) -> impl IntoResponse {
    let groups = state.catalog.list(query.environment.as_deref());
    Json(json!({"groups": groups}))
}

async fn start_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EnvironmentQuery>,
) -> impl IntoResponse {
    match state
        .supervisor
        .deploy_group(&id, query.environment.as_deref())
        .await
    {
        Ok(results) => {
            let results: Vec<Value> = results
                .iter()
                .map(|result| match &result.result {
                    Ok(monitor_id) => json!({
                        "agent": result.agent,
                        "ok": true,
                        "runtime_id": monitor_id.as_str(),
                    }),
                    Err(error) => json!({
                        "agent": result.agent,
                        "ok": false,
                        "error": error,
                    }),
                })
                .collect();
            Json(json!({"group_id": id, "results": results})).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn stop_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.supervisor.stop_group(&id).await {
        Ok(stopped) => Json(json!({"group_id": id, "stopped": stopped})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct TestMessageRequest {
    from: String,
    to: String,
    content: String,
}

async fn send_test_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TestMessageRequest>,
) -> impl IntoResponse {
    match state
        .supervisor
        .send_test_message(&payload.from, &payload.to, &payload.content)
        .await
    {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
