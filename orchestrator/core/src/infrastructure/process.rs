// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Local Process Launcher
//!
//! Runs each monitor as an `aviary monitor <agent> …` subprocess. Stdout and
//! stderr are captured line by line, written to the monitor's log file and
//! published on the log multiplexer; the line `monitor ready` is the startup
//! signal the supervisor waits on.
//!
//! Stop is cooperative: SIGTERM, a grace period, then SIGKILL. The monitor
//! exits 130 when cancelled by signal, which the supervisor records as a
//! stop rather than a crash.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::domain::agent::{sanitize_agent_name, MonitorId};
use crate::domain::launcher::{
    LaunchError, LaunchSpec, LaunchedMonitor, MonitorEvent, MonitorLauncher,
};
use crate::infrastructure::log_stream::{LogLine, LogMultiplexer};

/// Printed by the runtime when startup is complete; the launcher watches
/// captured output for it.
pub const READY_LINE: &str = "monitor ready";

pub struct LocalProcessLauncher {
    binary: PathBuf,
    log_dir: PathBuf,
    studio_config: Option<PathBuf>,
    logs: LogMultiplexer,
    children: Arc<Mutex<HashMap<MonitorId, u32>>>,
}

impl LocalProcessLauncher {
    pub fn new(binary: PathBuf, log_dir: PathBuf, logs: LogMultiplexer) -> Self {
        Self {
            binary,
            log_dir,
            studio_config: None,
            logs,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Propagate the supervisor's `--config` to launched monitors.
    pub fn with_studio_config(mut self, path: Option<PathBuf>) -> Self {
        self.studio_config = path;
        self
    }

    fn is_tracked(&self, id: &MonitorId) -> bool {
        lock(&self.children).contains_key(id)
    }

    fn pid_of(&self, id: &MonitorId) -> Option<u32> {
        lock(&self.children).get(id).copied()
    }

    /// Stale log files from previous generations of the same agent/handler
    /// pair confuse the dashboard's tail view.
    fn remove_old_logs(&self, spec: &LaunchSpec) {
        let prefix = format!(
            "{}_{}_",
            sanitize_agent_name(&spec.agent),
            spec.handler_kind.as_str()
        );
        let Ok(entries) = std::fs::read_dir(&self.log_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix)
                && name.ends_with(".log")
                && entry.path() != spec.log_file
            {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    tracing::warn!(file = name, error = %e, "failed to remove old log file");
                }
            }
        }
    }

    fn write_log_header(&self, spec: &LaunchSpec) -> Result<(), LaunchError> {
        if let Some(parent) = spec.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&spec.log_file)?;
        writeln!(
            file,
            "=== Monitor started at {} ===",
            chrono::Utc::now().to_rfc3339()
        )?;
        writeln!(file, "Agent: {}", spec.agent)?;
        writeln!(file, "Handler: {}", spec.handler_kind)?;
        if let Some(model) = &spec.model {
            writeln!(file, "Model: {model}")?;
        }
        if let Some(provider) = &spec.provider {
            writeln!(file, "Provider: {provider}")?;
        }
        writeln!(file, "{}", "=".repeat(50))?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl MonitorLauncher for LocalProcessLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedMonitor, LaunchError> {
        self.remove_old_logs(&spec);
        self.write_log_header(&spec)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("monitor")
            .arg(&spec.agent)
            .arg("--handler")
            .arg(spec.handler_kind.as_str())
            .arg("--agent-config")
            .arg(&spec.config_path);
        if let Some(model) = &spec.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(provider) = &spec.provider {
            cmd.arg("--provider").arg(provider);
        }
        if !spec.process_backlog {
            cmd.arg("--no-backlog");
        }
        if let Some(config) = &self.studio_config {
            cmd.arg("--config").arg(config);
        }
        if let Some(prompt) = &spec.system_prompt {
            cmd.env("AVIARY_SYSTEM_PROMPT", prompt);
        }
        cmd.env("AVIARY_MONITOR_ID", spec.monitor_id.as_str());
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{}: {e}", self.binary.display())))?;
        let pid = child
            .id()
            .ok_or_else(|| LaunchError::Spawn("child exited before a pid was known".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Spawn("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LaunchError::Spawn("stderr was not captured".into()))?;

        lock(&self.children).insert(spec.monitor_id.clone(), pid);

        let (events_tx, events_rx) = mpsc::channel(256);
        let children = Arc::clone(&self.children);
        let logs = self.logs.clone();
        let monitor_id = spec.monitor_id.clone();
        let log_file = spec.log_file.clone();

        tokio::spawn(async move {
            let mut file = match tokio::fs::OpenOptions::new()
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(error = %e, "monitor log file not writable");
                    None
                }
            };

            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_open = true;
            let mut err_open = true;
            let mut ready_sent = false;

            while out_open || err_open {
                let line = tokio::select! {
                    line = out_lines.next_line(), if out_open => {
                        match line {
                            Ok(Some(line)) => Some(line),
                            _ => { out_open = false; None }
                        }
                    }
                    line = err_lines.next_line(), if err_open => {
                        match line {
                            Ok(Some(line)) => Some(line),
                            _ => { err_open = false; None }
                        }
                    }
                };
                let Some(line) = line else { continue };

                if let Some(file) = file.as_mut() {
                    use tokio::io::AsyncWriteExt;
                    let _ = file.write_all(line.as_bytes()).await;
                    let _ = file.write_all(b"\n").await;
                }

                let log_line = LogLine::new(monitor_id.as_str(), line.clone());
                let is_verbose = log_line.is_verbose;
                logs.publish(log_line);

                if !ready_sent && line.contains(READY_LINE) {
                    ready_sent = true;
                    let _ = events_tx.send(MonitorEvent::Ready).await;
                }
                let _ = events_tx
                    .send(MonitorEvent::Log { line, is_verbose })
                    .await;
            }

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(monitor = %monitor_id, error = %e, "wait() failed");
                    None
                }
            };

            if let Some(file) = file.as_mut() {
                use tokio::io::AsyncWriteExt;
                let footer = format!(
                    "\n=== Monitor exited (code {:?}) at {} ===\n",
                    code,
                    chrono::Utc::now().to_rfc3339()
                );
                let _ = file.write_all(footer.as_bytes()).await;
            }

            lock(&children).remove(&monitor_id);
            let _ = events_tx.send(MonitorEvent::Exited { code }).await;
        });

        Ok(LaunchedMonitor {
            pid,
            events: events_rx,
        })
    }

    async fn stop(&self, id: &MonitorId, grace: Duration) -> Result<bool, LaunchError> {
        let Some(pid) = self.pid_of(id) else {
            return Ok(false);
        };

        tracing::info!(monitor = %id, pid, "sending SIGTERM");
        send_signal(pid, TERM_SIGNAL)?;

        let deadline = tokio::time::Instant::now() + grace;
        while self.is_tracked(id) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if self.is_tracked(id) {
            tracing::warn!(monitor = %id, pid, "grace expired, sending SIGKILL");
            send_signal(pid, KILL_SIGNAL)?;
            // give the exit watcher a moment to reap it
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while self.is_tracked(id) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(true)
    }

    async fn kill(&self, id: &MonitorId) -> Result<bool, LaunchError> {
        let Some(pid) = self.pid_of(id) else {
            return Ok(false);
        };
        tracing::info!(monitor = %id, pid, "sending SIGKILL");
        send_signal(pid, KILL_SIGNAL)?;
        Ok(true)
    }
}

#[cfg(unix)]
const TERM_SIGNAL: i32 = libc::SIGTERM;
#[cfg(unix)]
const KILL_SIGNAL: i32 = libc::SIGKILL;

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> Result<(), LaunchError> {
    let result = unsafe { libc::kill(pid as i32, signal) };
    if result != 0 {
        let error = std::io::Error::last_os_error();
        // ESRCH: already gone, which is what we wanted anyway.
        if error.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(LaunchError::Signal(error.to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
const TERM_SIGNAL: i32 = 0;
#[cfg(not(unix))]
const KILL_SIGNAL: i32 = 1;

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: i32) -> Result<(), LaunchError> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| LaunchError::Signal(e.to_string()))?;
    if !output.status.success() {
        return Err(LaunchError::Signal(format!(
            "taskkill exited with {:?}",
            output.status.code()
        )));
    }
    Ok(())
}
