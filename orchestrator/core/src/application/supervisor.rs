// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fleet Supervisor
//!
//! Owns the fleet: one [`MonitorRecord`] per launched monitor, the
//! kill-switch writes, deployment groups, backlog resets and the watchdog.
//! Monitors are held at arm's length through the [`MonitorLauncher`] seam
//! and typed lifecycle events; the supervisor never calls into a runtime
//! directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::backlog::{BacklogService, ResetSummary};
use crate::domain::agent::{MonitorId, MonitorRecord, MonitorStatus};
use crate::domain::bus::BusClientFactory;
use crate::domain::control::KillSwitch;
use crate::domain::deployment::DeploymentCatalog;
use crate::domain::launcher::{LaunchError, LaunchSpec, MonitorEvent, MonitorLauncher};
use crate::domain::registry::{validate_launch, HandlerKind, RegistryError};
use crate::domain::store::MessageStore;
use crate::infrastructure::agent_config::{list_configured_agents, AgentConfig};
use crate::infrastructure::llm::OllamaAdapter;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("agent '{0}' already has an active monitor")]
    Conflict(String),

    #[error("monitor not found: {0}")]
    NotFound(String),

    #[error("agent '{0}' has an active monitor; stop it before resetting")]
    AgentRunning(String),

    #[error("deployment group not found: {0}")]
    GroupNotFound(String),

    #[error("deployment group '{group}' is not available in environment '{environment}'")]
    GroupUnavailable { group: String, environment: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("monitor '{0}' did not become ready within the startup grace")]
    StartupTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bus error: {0}")]
    Bus(String),
}

/// Launch parameters as they arrive from the control plane or a deployment
/// group.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub agent: String,
    pub handler_kind: HandlerKind,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub deployment_group: Option<String>,
    pub process_backlog: bool,
}

impl StartRequest {
    pub fn new(agent: impl Into<String>, handler_kind: HandlerKind) -> Self {
        Self {
            agent: agent.into(),
            handler_kind,
            provider: None,
            model: None,
            system_prompt: None,
            deployment_group: None,
            process_backlog: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub configs_dir: PathBuf,
    pub log_dir: PathBuf,
    pub default_server_url: String,
    pub startup_grace: Duration,
    pub stop_grace: Duration,
    pub handler_timeout: Duration,
    pub max_drain_iterations: u32,
}

/// Per-agent outcome of a group operation.
#[derive(Debug)]
pub struct GroupStartResult {
    pub agent: String,
    pub result: Result<MonitorId, String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkResetSummary {
    pub results: Vec<ResetSummary>,
    pub skipped_running: Vec<String>,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    launcher: Arc<dyn MonitorLauncher>,
    store: Arc<dyn MessageStore>,
    kill_switch: Arc<dyn KillSwitch>,
    catalog: Arc<dyn DeploymentCatalog>,
    bus_factory: Arc<dyn BusClientFactory>,
    backlog: BacklogService,
    records: Arc<RwLock<HashMap<MonitorId, MonitorRecord>>>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        launcher: Arc<dyn MonitorLauncher>,
        store: Arc<dyn MessageStore>,
        kill_switch: Arc<dyn KillSwitch>,
        catalog: Arc<dyn DeploymentCatalog>,
        bus_factory: Arc<dyn BusClientFactory>,
    ) -> Self {
        let backlog = BacklogService::new(
            Arc::clone(&store),
            Arc::clone(&bus_factory),
            settings.max_drain_iterations,
        );
        Self {
            settings,
            launcher,
            store,
            kill_switch,
            catalog,
            bus_factory,
            backlog,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Launch a monitor for an agent. Validates against the framework
    /// registry, rejects duplicates, spawns the process and waits for its
    /// ready line within the startup grace.
    pub async fn start(&self, request: StartRequest) -> Result<MonitorId, SupervisorError> {
        validate_launch(
            request.handler_kind,
            request.provider.as_deref(),
            request.model.as_deref(),
        )?;

        if request.handler_kind == HandlerKind::Ollama {
            self.check_ollama_model(request.model.as_deref()).await?;
        }

        if let Some(active) = self.active_monitor_for(&request.agent).await {
            warn!(agent = %request.agent, monitor = %active, "duplicate start rejected");
            return Err(SupervisorError::Conflict(request.agent));
        }

        let config_path = AgentConfig::path_for(&self.settings.configs_dir, &request.agent);
        let config = AgentConfig::load(&self.settings.configs_dir, &request.agent)
            .map_err(|e| SupervisorError::Config(e.to_string()))?;
        let environment = config.environment(&request.agent, &self.settings.default_server_url);

        let (system_prompt, system_prompt_name) =
            resolve_system_prompt(&self.settings.configs_dir, request.system_prompt.as_deref())?;

        if !request.process_backlog {
            let summary = self.backlog.reset_agent(&request.agent).await;
            info!(
                agent = %request.agent,
                local = summary.local_cleared,
                remote = summary.remote_cleared,
                "backlog cleared before start"
            );
        }

        let monitor_id = MonitorId::generate(&request.agent, request.handler_kind);
        let log_file = self
            .settings
            .log_dir
            .join(format!("{}.log", monitor_id.as_str()));

        let launched = self
            .launcher
            .launch(LaunchSpec {
                monitor_id: monitor_id.clone(),
                agent: request.agent.clone(),
                handler_kind: request.handler_kind,
                config_path,
                provider: request.provider.clone(),
                model: request.model.clone(),
                system_prompt: system_prompt.clone(),
                process_backlog: request.process_backlog,
                log_file: log_file.clone(),
            })
            .await?;

        let record = MonitorRecord {
            id: monitor_id.clone(),
            agent: request.agent.clone(),
            handler_kind: request.handler_kind,
            provider: request.provider,
            model: request.model,
            system_prompt_name,
            system_prompt,
            status: MonitorStatus::Starting,
            started_at: chrono::Utc::now(),
            pid: Some(launched.pid),
            deployment_group: request.deployment_group,
            environment,
            log_file,
            last_error: None,
        };
        self.records
            .write()
            .await
            .insert(monitor_id.clone(), record);

        let (ready_tx, ready_rx) = oneshot::channel();
        self.spawn_event_pump(monitor_id.clone(), launched.events, ready_tx);

        match tokio::time::timeout(self.settings.startup_grace, ready_rx).await {
            Ok(Ok(())) => {
                info!(monitor = %monitor_id, pid = launched.pid, "monitor running");
                Ok(monitor_id)
            }
            _ => {
                error!(monitor = %monitor_id, "startup grace expired, killing");
                let _ = self.launcher.kill(&monitor_id).await;
                self.update_record(&monitor_id, |record| {
                    record.status = MonitorStatus::Crashed;
                    record.last_error =
                        Some("did not become ready within the startup grace".to_string());
                })
                .await;
                Err(SupervisorError::StartupTimeout(
                    monitor_id.as_str().to_string(),
                ))
            }
        }
    }

    /// Consume the launcher's event stream: flip to Running on the ready
    /// line, remember the last output line, classify the exit.
    fn spawn_event_pump(
        &self,
        monitor_id: MonitorId,
        mut events: tokio::sync::mpsc::Receiver<MonitorEvent>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let records = Arc::clone(&self.records);
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut last_line = None;

            while let Some(event) = events.recv().await {
                match event {
                    MonitorEvent::Ready => {
                        {
                            let mut records = records.write().await;
                            if let Some(record) = records.get_mut(&monitor_id) {
                                if record.status == MonitorStatus::Starting {
                                    record.status = MonitorStatus::Running;
                                }
                            }
                        }
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    MonitorEvent::Log { line, .. } => {
                        if !line.trim().is_empty() {
                            last_line = Some(line);
                        }
                    }
                    MonitorEvent::Exited { code } => {
                        let mut records = records.write().await;
                        if let Some(record) = records.get_mut(&monitor_id) {
                            record.pid = None;
                            match code {
                                Some(0) | Some(130) => {
                                    record.status = MonitorStatus::Stopped;
                                    info!(monitor = %monitor_id, ?code, "monitor stopped");
                                }
                                _ if record.status == MonitorStatus::Stopped => {
                                    // killed on request; not a crash
                                }
                                _ => {
                                    record.status = MonitorStatus::Crashed;
                                    if let Some(line) = last_line.take() {
                                        record.last_error = Some(line);
                                    }
                                    error!(
                                        monitor = %monitor_id,
                                        ?code,
                                        last = record.last_error.as_deref().unwrap_or(""),
                                        "monitor crashed"
                                    );
                                }
                            }
                        }
                        break;
                    }
                }
            }
        });
    }

    /// Cooperative stop with the configured grace, then forced termination.
    pub async fn stop(&self, monitor_id: &MonitorId) -> Result<bool, SupervisorError> {
        self.require_record(monitor_id).await?;
        self.update_record(monitor_id, |record| {
            record.status = MonitorStatus::Stopped;
        })
        .await;
        let stopped = self
            .launcher
            .stop(monitor_id, self.settings.stop_grace)
            .await?;
        Ok(stopped)
    }

    /// Forcible termination, no grace.
    pub async fn kill(&self, monitor_id: &MonitorId) -> Result<bool, SupervisorError> {
        self.require_record(monitor_id).await?;
        self.update_record(monitor_id, |record| {
            record.status = MonitorStatus::Stopped;
        })
        .await;
        let killed = self.launcher.kill(monitor_id).await?;
        Ok(killed)
    }

    /// Restart with the same configuration. The old record is replaced by
    /// the new monitor's.
    pub async fn restart(
        &self,
        monitor_id: &MonitorId,
        process_backlog: bool,
    ) -> Result<MonitorId, SupervisorError> {
        let record = self.require_record(monitor_id).await?;
        if record.status.is_active() {
            self.stop(monitor_id).await?;
        }
        self.records.write().await.remove(monitor_id);

        // File-based prompts re-resolve by name; inline ones carry the text.
        let system_prompt = match record.system_prompt_name.as_deref() {
            Some("custom") | None => record.system_prompt,
            Some(name) => Some(name.to_string()),
        };

        self.start(StartRequest {
            agent: record.agent,
            handler_kind: record.handler_kind,
            provider: record.provider,
            model: record.model,
            system_prompt,
            deployment_group: record.deployment_group,
            process_backlog,
        })
        .await
    }

    /// Remove a record. Only stopped or crashed monitors can be deleted.
    pub async fn delete(&self, monitor_id: &MonitorId) -> Result<(), SupervisorError> {
        let record = self.require_record(monitor_id).await?;
        if record.status.is_active() {
            return Err(SupervisorError::Conflict(record.agent));
        }
        self.records.write().await.remove(monitor_id);
        Ok(())
    }

    pub async fn delete_stopped(&self) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.status.is_active());
        before - records.len()
    }

    /// Fleet snapshot for the control plane, newest first. While the kill
    /// switch is active every Running monitor reports Paused; the
    /// underlying records keep their lifecycle status and revert on
    /// deactivation.
    pub async fn snapshot(&self) -> Vec<MonitorRecord> {
        let paused = self.kill_switch.is_active();
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        if paused {
            for record in &mut records {
                if record.status == MonitorStatus::Running {
                    record.status = MonitorStatus::Paused;
                }
            }
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    pub fn activate_kill_switch(&self) -> Result<(), SupervisorError> {
        self.kill_switch
            .activate()
            .map_err(|e| SupervisorError::Config(e.to_string()))
    }

    pub fn deactivate_kill_switch(&self) -> Result<(), SupervisorError> {
        self.kill_switch
            .deactivate()
            .map_err(|e| SupervisorError::Config(e.to_string()))
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.is_active()
    }

    /// Reset one agent's backlog, local and remote. Rejected while the agent
    /// has an active monitor.
    pub async fn reset_agent(&self, agent: &str) -> Result<ResetSummary, SupervisorError> {
        if self.active_monitor_for(agent).await.is_some() {
            return Err(SupervisorError::AgentRunning(agent.to_string()));
        }
        Ok(self.backlog.reset_agent(agent).await)
    }

    /// Bulk reset for every configured agent in scope that has no active
    /// monitor; the ones that do are reported as skipped.
    pub async fn reset_agents(&self, environment: Option<&str>) -> BulkResetSummary {
        let mut results = Vec::new();
        let mut skipped_running = Vec::new();

        let agents =
            list_configured_agents(&self.settings.configs_dir, &self.settings.default_server_url);
        for (agent, agent_environment) in agents {
            if let Some(environment) = environment {
                if agent_environment != environment && environment != "any" {
                    continue;
                }
            }
            if self.active_monitor_for(&agent).await.is_some() {
                skipped_running.push(agent);
                continue;
            }
            results.push(self.backlog.reset_agent(&agent).await);
        }

        BulkResetSummary {
            results,
            skipped_running,
        }
    }

    /// Start every member of a deployment group, tolerating individual
    /// failures.
    pub async fn deploy_group(
        &self,
        group_id: &str,
        environment: Option<&str>,
    ) -> Result<Vec<GroupStartResult>, SupervisorError> {
        let group = self
            .catalog
            .get(group_id)
            .ok_or_else(|| SupervisorError::GroupNotFound(group_id.to_string()))?;

        if let Some(environment) = environment {
            if !group.available_in(environment) {
                return Err(SupervisorError::GroupUnavailable {
                    group: group_id.to_string(),
                    environment: environment.to_string(),
                });
            }
        }

        let mut results = Vec::with_capacity(group.agents.len());
        for member in &group.agents {
            let resolved = group.resolve(member);
            let request = StartRequest {
                agent: resolved.agent.clone(),
                handler_kind: resolved.handler_kind,
                provider: resolved.provider,
                model: resolved.model,
                system_prompt: resolved.system_prompt,
                deployment_group: Some(group.id.clone()),
                process_backlog: resolved.process_backlog,
            };

            let result = match self.start(request).await {
                Ok(monitor_id) => Ok(monitor_id),
                Err(e) => {
                    warn!(group = group_id, agent = %resolved.agent, error = %e, "member start failed");
                    Err(e.to_string())
                }
            };
            results.push(GroupStartResult {
                agent: resolved.agent,
                result,
            });

            if let Some(delay_ms) = resolved.start_delay_ms {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Ok(results)
    }

    /// Stop every active monitor that was started as part of the group.
    pub async fn stop_group(&self, group_id: &str) -> Result<usize, SupervisorError> {
        let members: Vec<MonitorId> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|record| {
                    record.deployment_group.as_deref() == Some(group_id)
                        && record.status.is_active()
                })
                .map(|record| record.id.clone())
                .collect()
        };

        let mut stopped = 0;
        for monitor_id in members {
            if self.stop(&monitor_id).await.unwrap_or(false) {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Publish a test `@mention` from one agent to another.
    pub async fn send_test_message(
        &self,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<(), SupervisorError> {
        let client = self
            .bus_factory
            .client_for(from)
            .map_err(|e| SupervisorError::Bus(e.to_string()))?;
        client
            .send(&format!("@{to} {content}"), None)
            .await
            .map_err(|e| SupervisorError::Bus(e.to_string()))?;
        Ok(())
    }

    /// Watchdog: a Running monitor whose claimed message has shown no
    /// progress for `handler_timeout` is killed and recorded as crashed.
    pub fn spawn_watchdog(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }

                let running: Vec<(MonitorId, String)> = {
                    let records = supervisor.records.read().await;
                    records
                        .values()
                        .filter(|record| record.status == MonitorStatus::Running)
                        .map(|record| (record.id.clone(), record.agent.clone()))
                        .collect()
                };

                for (monitor_id, agent) in running {
                    match supervisor.store.processing_age(&agent).await {
                        Ok(Some(age)) if age > supervisor.settings.handler_timeout => {
                            error!(
                                monitor = %monitor_id,
                                agent,
                                age_secs = age.as_secs(),
                                "handler stalled past the watchdog timeout, killing"
                            );
                            let _ = supervisor.launcher.kill(&monitor_id).await;
                            supervisor
                                .update_record(&monitor_id, |record| {
                                    record.status = MonitorStatus::Crashed;
                                    record.last_error =
                                        Some("killed by watchdog: handler made no progress".into());
                                })
                                .await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(agent, error = %e, "watchdog could not read processing age")
                        }
                    }
                }
            }
        })
    }

    /// Local models are discovered, not fixed: ask the endpoint what it has
    /// installed. An unreachable endpoint only warns; the monitor itself
    /// will surface the failure if the model really is missing.
    async fn check_ollama_model(&self, model: Option<&str>) -> Result<(), SupervisorError> {
        let Some(model) = model else {
            return Ok(());
        };
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string());
        let adapter = OllamaAdapter::new(endpoint, model.to_string());
        match adapter.list_models().await {
            Ok(models) => {
                let tag_prefix = format!("{model}:");
                let known = models
                    .iter()
                    .any(|installed| installed == model || installed.starts_with(&tag_prefix));
                if !known {
                    return Err(SupervisorError::Registry(RegistryError::InvalidModel {
                        kind: HandlerKind::Ollama,
                        model: model.to_string(),
                    }));
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "could not enumerate local models, deferring to the monitor");
                Ok(())
            }
        }
    }

    async fn active_monitor_for(&self, agent: &str) -> Option<MonitorId> {
        let records = self.records.read().await;
        records
            .values()
            .find(|record| record.agent == agent && record.status.is_active())
            .map(|record| record.id.clone())
    }

    async fn require_record(&self, monitor_id: &MonitorId) -> Result<MonitorRecord, SupervisorError> {
        self.records
            .read()
            .await
            .get(monitor_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(monitor_id.as_str().to_string()))
    }

    async fn update_record(&self, monitor_id: &MonitorId, apply: impl FnOnce(&mut MonitorRecord)) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(monitor_id) {
            apply(record);
        }
    }
}

/// Resolve a system-prompt reference to its text and a display name.
///
/// Accepted forms: inline text (anything containing a newline), a path
/// relative to `configs/` or `configs/prompts/` (YAML files must carry a
/// `prompt:` key), or, as a last resort, the literal string itself.
pub fn resolve_system_prompt(
    configs_dir: &std::path::Path,
    reference: Option<&str>,
) -> Result<(Option<String>, Option<String>), SupervisorError> {
    let Some(reference) = reference else {
        return Ok((None, None));
    };
    let reference = reference.trim();
    if reference.is_empty() {
        return Ok((None, None));
    }

    if reference.contains('\n') {
        return Ok((Some(reference.to_string()), Some("custom".to_string())));
    }

    let reference_path = std::path::Path::new(reference);
    let mut candidates = Vec::new();
    if reference_path.is_absolute() {
        candidates.push(reference_path.to_path_buf());
    } else {
        candidates.push(configs_dir.join(reference));
        candidates.push(configs_dir.join("prompts").join(reference));
    }

    for candidate in candidates {
        if !candidate.exists() {
            continue;
        }
        let raw = std::fs::read_to_string(&candidate)
            .map_err(|e| SupervisorError::Config(format!("{}: {e}", candidate.display())))?;

        let is_yaml = matches!(
            candidate.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let text = if is_yaml {
            let value: serde_yaml::Value = serde_yaml::from_str(&raw)
                .map_err(|e| SupervisorError::Config(format!("{}: {e}", candidate.display())))?;
            value
                .get("prompt")
                .and_then(|prompt| prompt.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    SupervisorError::Config(format!(
                        "no 'prompt' key in {}",
                        candidate.display()
                    ))
                })?
        } else {
            raw
        };
        return Ok((Some(text), Some(reference.to_string())));
    }

    // Not a known file: treat as literal prompt text but keep the name.
    Ok((Some(reference.to_string()), Some(reference.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_text_is_custom() {
        let dir = tempfile::tempdir().unwrap();
        let (text, name) =
            resolve_system_prompt(dir.path(), Some("line one\nline two")).unwrap();
        assert_eq!(text.as_deref(), Some("line one\nline two"));
        assert_eq!(name.as_deref(), Some("custom"));
    }

    #[test]
    fn yaml_prompt_files_need_a_prompt_key() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();
        std::fs::write(prompts.join("po.yaml"), "prompt: You are the PO.\n").unwrap();
        std::fs::write(prompts.join("bad.yaml"), "persona: nope\n").unwrap();

        let (text, name) = resolve_system_prompt(dir.path(), Some("po.yaml")).unwrap();
        assert_eq!(text.as_deref(), Some("You are the PO."));
        assert_eq!(name.as_deref(), Some("po.yaml"));

        assert!(resolve_system_prompt(dir.path(), Some("bad.yaml")).is_err());
    }

    #[test]
    fn unknown_reference_falls_back_to_literal() {
        let dir = tempfile::tempdir().unwrap();
        let (text, name) = resolve_system_prompt(dir.path(), Some("be terse")).unwrap();
        assert_eq!(text.as_deref(), Some("be terse"));
        assert_eq!(name.as_deref(), Some("be terse"));
    }

    #[test]
    fn none_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_system_prompt(dir.path(), None).unwrap(), (None, None));
    }
}
