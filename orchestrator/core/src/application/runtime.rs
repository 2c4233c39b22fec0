// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Runtime
//!
//! One runtime per agent, composed of three cooperating tasks on the shared
//! tokio runtime:
//!
//! * **poller** — long-polls the bus and enqueues every directed mention
//!   into the durable store. Its only job is to never miss a message while
//!   the processor is busy; its latency to enqueue is one bus round trip.
//! * **processor** — claims the FIFO head, drains up to N-1 more Pending
//!   mentions as batch context, applies `#commands`, invokes the handler and
//!   publishes the reply threaded under the trigger.
//! * **heartbeat** — periodic pings that keep the HTTP streaming connection
//!   alive across upstream idle timeouts and detect dead connections during
//!   quiet periods.
//!
//! The tasks communicate only through the store and small pieces of shared
//! state (pause, kill switch, cancellation token). The kill switch pauses
//! everything; the per-agent pause from `#pause`/`#done` gates only the
//! processor, so mentions arriving during a `#done` cool-down still land in
//! the store and are purged when the pause expires. That is the loop break.

use anyhow::{bail, Context};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::bus::BusClient;
use crate::domain::command::{
    parse_commands, strip_done_tokens, strip_leading_self_mentions, strip_mentions,
};
use crate::domain::control::KillSwitch;
use crate::domain::handler::MessageHandler;
use crate::domain::message::{EnqueueOutcome, Message};
use crate::domain::store::MessageStore;

/// Pacing between iterating bus calls (startup sweep), under the bus's rate
/// limit.
const SWEEP_PACING: Duration = Duration::from_millis(700);
const SWEEP_MAX_ITERATIONS: u32 = 200;
/// Pause after a bus error before the poller tries again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);
const HEARTBEAT_FAILURE_LIMIT: u32 = 3;
/// Retention sweep cadence and per-pass bound.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const SWEEP_MAX_ROWS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Max messages consumed per processing cycle (trigger + drained batch).
    pub batch_size: usize,
    /// Completed messages supplied as conversation history.
    pub history_limit: usize,
    /// Idle sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Re-check cadence while blocked on the kill switch or a pause.
    pub blocked_check: Duration,
    /// Zero disables the heartbeat task.
    pub heartbeat_interval: Duration,
    /// Cool-down entered by `#done`.
    pub done_pause: Duration,
    pub startup_sweep: bool,
    /// Zero means unlimited.
    pub startup_sweep_limit: usize,
    /// Claims older than this are requeued at startup.
    pub stale_claim: Duration,
    /// Terminal tombstones older than this are deleted by the sweep.
    pub retention: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            history_limit: 25,
            poll_interval: Duration::from_millis(100),
            blocked_check: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(240),
            done_pause: Duration::from_secs(60),
            startup_sweep: true,
            startup_sweep_limit: 10,
            stale_claim: Duration::from_secs(300),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Control messages the supervisor (or an operator surface) may write.
/// Pause state is owned by the runtime; nothing mutates it directly.
#[derive(Debug, Clone, Copy)]
pub enum RuntimeControl {
    Pause,
    Resume,
}

#[derive(Clone)]
pub struct RuntimeController {
    tx: mpsc::Sender<RuntimeControl>,
}

impl RuntimeController {
    pub async fn send(&self, control: RuntimeControl) {
        let _ = self.tx.send(control).await;
    }
}

enum PauseKind {
    Running,
    Indefinite,
    Until {
        deadline: Instant,
        purge_on_resume: bool,
    },
}

enum PauseCheck {
    Running,
    Paused,
    Resumed { purge: bool },
}

struct PauseState(Mutex<PauseKind>);

impl PauseState {
    fn new() -> Self {
        Self(Mutex::new(PauseKind::Running))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PauseKind> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pause_indefinite(&self) {
        *self.lock() = PauseKind::Indefinite;
    }

    fn pause_for(&self, duration: Duration, purge_on_resume: bool) {
        *self.lock() = PauseKind::Until {
            deadline: Instant::now() + duration,
            purge_on_resume,
        };
    }

    fn resume(&self) {
        *self.lock() = PauseKind::Running;
    }

    /// Observe the state, performing the auto-resume transition when a timed
    /// pause has expired.
    fn check(&self) -> PauseCheck {
        let mut kind = self.lock();
        match *kind {
            PauseKind::Running => PauseCheck::Running,
            PauseKind::Indefinite => PauseCheck::Paused,
            PauseKind::Until {
                deadline,
                purge_on_resume,
            } => {
                if Instant::now() >= deadline {
                    *kind = PauseKind::Running;
                    PauseCheck::Resumed {
                        purge: purge_on_resume,
                    }
                } else {
                    PauseCheck::Paused
                }
            }
        }
    }
}

pub struct AgentRuntime {
    agent: String,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn BusClient>,
    handler: Arc<dyn MessageHandler>,
    kill_switch: Arc<dyn KillSwitch>,
    options: RuntimeOptions,
    cancel: CancellationToken,
    pause: PauseState,
    /// Triggers that have consumed their one requeue after a handler
    /// failure. A second failure completes them with a failure marker.
    requeued_once: Mutex<HashSet<String>>,
    control_tx: mpsc::Sender<RuntimeControl>,
    control_rx: Mutex<mpsc::Receiver<RuntimeControl>>,
}

impl AgentRuntime {
    pub fn new(
        agent: impl Into<String>,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn BusClient>,
        handler: Arc<dyn MessageHandler>,
        kill_switch: Arc<dyn KillSwitch>,
        options: RuntimeOptions,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        Self {
            agent: agent.into(),
            store,
            bus,
            handler,
            kill_switch,
            options,
            cancel: CancellationToken::new(),
            pause: PauseState::new(),
            requeued_once: Mutex::new(HashSet::new()),
            control_tx,
            control_rx: Mutex::new(control_rx),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn controller(&self) -> RuntimeController {
        RuntimeController {
            tx: self.control_tx.clone(),
        }
    }

    /// Run until cancelled. Startup: recover stale claims from a previous
    /// generation, sweep the unread backlog, then start the three tasks.
    pub async fn run(&self) -> anyhow::Result<()> {
        let recovered = self
            .store
            .recover_stale(&self.agent, self.options.stale_claim)
            .await
            .context("stale-claim recovery failed")?;
        if recovered > 0 {
            warn!(
                agent = %self.agent,
                recovered,
                "requeued messages stuck in processing from a previous run"
            );
        }

        match self.store.stats(&self.agent).await {
            Ok(stats) => info!(
                agent = %self.agent,
                pending = stats.pending,
                completed_last_24h = stats.completed_last_24h,
                "queue state at startup"
            ),
            Err(e) => warn!(agent = %self.agent, error = %e, "could not read queue stats"),
        }

        if self.options.startup_sweep {
            self.startup_sweep().await;
        }

        info!(agent = %self.agent, "monitor ready");

        let result = tokio::try_join!(
            self.poll_loop(),
            self.process_loop(),
            self.heartbeat_loop(),
            self.retention_loop(),
        );

        if let Ok(stats) = self.store.stats(&self.agent).await {
            info!(
                agent = %self.agent,
                pending = stats.pending,
                "runtime stopped"
            );
        }

        result.map(|_| ())
    }

    /// Catch up on mentions that arrived while no monitor was running.
    /// Non-blocking fetches, marked read immediately, paced under the bus
    /// rate limit. Best effort: a failing sweep degrades to normal polling.
    async fn startup_sweep(&self) {
        let limit = self.options.startup_sweep_limit;
        let mut fetched = 0usize;

        for _ in 0..SWEEP_MAX_ITERATIONS {
            if self.cancel.is_cancelled() || (limit > 0 && fetched >= limit) {
                break;
            }

            match self.bus.receive(false, Some(1), true).await {
                Ok(messages) if messages.is_empty() => break,
                Ok(messages) => {
                    for message in messages {
                        if message.sender == self.agent {
                            continue;
                        }
                        match self
                            .store
                            .enqueue(&message.id, &self.agent, &message.sender, &message.content)
                            .await
                        {
                            Ok(EnqueueOutcome::Accepted) => fetched += 1,
                            Ok(EnqueueOutcome::Duplicate) => {}
                            Err(e) => {
                                warn!(agent = %self.agent, error = %e, "sweep enqueue failed")
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(agent = %self.agent, error = %e, "startup sweep aborted");
                    break;
                }
            }

            self.sleep_or_cancelled(SWEEP_PACING).await;
        }

        info!(agent = %self.agent, fetched, "startup sweep complete");
    }

    /// Poller task. Blocks in the bus long-poll; every returned mention goes
    /// straight into the store. Never processes, never replies.
    async fn poll_loop(&self) -> anyhow::Result<()> {
        info!(agent = %self.agent, "poller task started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.kill_switch.is_active() {
                self.sleep_or_cancelled(self.options.blocked_check).await;
                continue;
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.bus.receive(true, None, false) => received,
            };

            match received {
                Ok(messages) => {
                    for message in messages {
                        if message.sender == self.agent {
                            debug!(agent = %self.agent, "skipping self-mention");
                            continue;
                        }
                        match self
                            .store
                            .enqueue(&message.id, &self.agent, &message.sender, &message.content)
                            .await
                        {
                            Ok(EnqueueOutcome::Accepted) => {
                                info!(
                                    agent = %self.agent,
                                    id = %message.id,
                                    sender = %message.sender,
                                    "stored mention"
                                );
                            }
                            Ok(EnqueueOutcome::Duplicate) => {
                                debug!(agent = %self.agent, id = %message.id, "duplicate mention")
                            }
                            Err(e) if e.is_transient() => {
                                warn!(agent = %self.agent, error = %e, "store busy, retrying");
                                self.sleep_or_cancelled(Duration::from_millis(250)).await;
                            }
                            Err(e) => bail!("message store failure in poller: {e}"),
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(agent = %self.agent, error = %e, "poll failed, backing off");
                    self.sleep_or_cancelled(POLL_ERROR_PAUSE).await;
                }
                Err(e) => {
                    error!(agent = %self.agent, error = %e, "fatal bus error in poller");
                    bail!("fatal bus error: {e}");
                }
            }
        }

        info!(agent = %self.agent, "poller task stopped");
        Ok(())
    }

    /// Processor task. One claim at a time, FIFO, batch-draining; all
    /// replies threaded under their trigger.
    async fn process_loop(&self) -> anyhow::Result<()> {
        info!(agent = %self.agent, "processor task started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.drain_control();

            if self.kill_switch.is_active() {
                self.sleep_or_cancelled(self.options.blocked_check).await;
                continue;
            }

            match self.pause.check() {
                PauseCheck::Paused => {
                    self.sleep_or_cancelled(self.options.blocked_check).await;
                    continue;
                }
                PauseCheck::Resumed { purge: true } => {
                    match self.store.purge_pending(&self.agent).await {
                        Ok(purged) if purged > 0 => info!(
                            agent = %self.agent,
                            purged,
                            "discarded mentions queued during the cool-down"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(agent = %self.agent, error = %e, "resume purge failed"),
                    }
                }
                PauseCheck::Running | PauseCheck::Resumed { purge: false } => {}
            }

            let trigger = match self.store.claim(&self.agent).await {
                Ok(Some(trigger)) => trigger,
                Ok(None) => {
                    self.sleep_or_cancelled(self.options.poll_interval).await;
                    continue;
                }
                Err(e) if e.is_transient() => {
                    warn!(agent = %self.agent, error = %e, "claim failed, retrying");
                    self.sleep_or_cancelled(Duration::from_millis(500)).await;
                    continue;
                }
                Err(e) => bail!("message store failure in processor: {e}"),
            };

            // Invariant: never more than one claim in flight per agent.
            if let Ok(stats) = self.store.stats(&self.agent).await {
                if stats.processing > 1 {
                    error!(
                        agent = %self.agent,
                        processing = stats.processing,
                        "invariant violated: multiple processing rows"
                    );
                    bail!("multiple processing rows for agent {}", self.agent);
                }
            }

            self.process_one(trigger).await?;
        }

        info!(agent = %self.agent, "processor task stopped");
        Ok(())
    }

    async fn process_one(&self, trigger: Message) -> anyhow::Result<()> {
        // Belt and braces: the poller and the bus parser both drop
        // self-mentions already.
        if trigger.sender == self.agent {
            warn!(agent = %self.agent, id = %trigger.id, "refusing to process own message");
            self.store
                .complete(&trigger.id, &self.agent)
                .await
                .map_err(|e| anyhow::anyhow!("complete failed: {e}"))?;
            return Ok(());
        }

        // Commands in the trigger apply before the handler runs.
        let trigger_commands = parse_commands(&trigger.content);
        let mut batch = match self
            .store
            .peek_batch(&self.agent, self.options.batch_size.saturating_sub(1))
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(agent = %self.agent, error = %e, "batch drain failed, processing solo");
                Vec::new()
            }
        };

        if trigger_commands.done {
            self.pause.pause_for(self.options.done_pause, true);
            match self.store.purge_pending(&self.agent).await {
                Ok(purged) => {
                    info!(agent = %self.agent, purged, "#done: backlog cleared, pausing");
                }
                Err(e) => warn!(agent = %self.agent, error = %e, "#done purge failed"),
            }
            // The drained rows are gone with the purge.
            batch.clear();
        } else if trigger_commands.pause {
            info!(agent = %self.agent, "#pause: pausing indefinitely");
            self.pause.pause_indefinite();
        }

        let history = match self.store.history(&self.agent, self.options.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                warn!(agent = %self.agent, error = %e, "history fetch failed, continuing without");
                Vec::new()
            }
        };

        debug!(
            agent = %self.agent,
            id = %trigger.id,
            batch = batch.len(),
            history = history.len(),
            "invoking handler"
        );

        match self.handler.handle(&trigger, &batch, &history).await {
            Ok(response) => self.publish_and_complete(&trigger, &batch, response).await,
            Err(e) => {
                self.handle_handler_failure(&trigger, &e.to_string()).await;
                Ok(())
            }
        }
    }

    /// Publish the handler's reply threaded under the trigger, then mark the
    /// trigger and its drained batch Completed. Drained context is never
    /// re-processed: that is the rule that prevents the quadratic catch-up
    /// loop.
    async fn publish_and_complete(
        &self,
        trigger: &Message,
        batch: &[Message],
        response: Option<String>,
    ) -> anyhow::Result<()> {
        let mut purge_after = false;
        let outgoing = response.and_then(|text| self.prepare_outgoing(text, &mut purge_after));

        if let Some(text) = &outgoing {
            match self.bus.send(text, Some(&trigger.id)).await {
                Ok(message_id) => {
                    info!(
                        agent = %self.agent,
                        trigger = %trigger.id,
                        sent = message_id.as_deref().unwrap_or("?"),
                        "reply published"
                    );
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        agent = %self.agent,
                        trigger = %trigger.id,
                        error = %e,
                        "transient send failure, requeueing trigger"
                    );
                    if let Err(store_err) =
                        self.store.fail(&trigger.id, &self.agent, true).await
                    {
                        error!(agent = %self.agent, error = %store_err, "requeue failed");
                    }
                    self.sleep_or_cancelled(self.options.blocked_check).await;
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        agent = %self.agent,
                        trigger = %trigger.id,
                        error = %e,
                        "fatal send failure, completing with failure marker"
                    );
                    if let Err(store_err) =
                        self.store.fail(&trigger.id, &self.agent, false).await
                    {
                        error!(agent = %self.agent, error = %store_err, "fail() failed");
                    }
                    return Ok(());
                }
            }
        } else {
            debug!(agent = %self.agent, trigger = %trigger.id, "handler abstained");
        }

        self.store
            .complete(&trigger.id, &self.agent)
            .await
            .map_err(|e| anyhow::anyhow!("complete failed: {e}"))?;
        for message in batch {
            // Subsumed by the batch reply above.
            if let Err(e) = self.store.complete(&message.id, &self.agent).await {
                warn!(agent = %self.agent, id = %message.id, error = %e, "batch complete failed");
            }
        }

        self.requeued_once
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&trigger.id);

        if purge_after {
            match self.store.purge_pending(&self.agent).await {
                Ok(purged) => info!(agent = %self.agent, purged, "#done reply: backlog cleared"),
                Err(e) => warn!(agent = %self.agent, error = %e, "#done purge failed"),
            }
        }

        Ok(())
    }

    /// Apply response-side commands and the self-reference guards to an
    /// outgoing reply. Returns `None` when nothing is left worth sending.
    fn prepare_outgoing(&self, response: String, purge_after: &mut bool) -> Option<String> {
        let commands = parse_commands(&response);
        let mut text = response;

        if commands.done {
            // The handler is winding the agent down: cool-down, clear the
            // backlog once the cycle completes, and strip mentions so the
            // goodbye does not summon anyone back.
            self.pause.pause_for(self.options.done_pause, true);
            *purge_after = true;
            text = strip_done_tokens(&text);
            text = strip_mentions(&text);
            info!(agent = %self.agent, "#done in reply: pausing after this cycle");
        } else if commands.pause {
            self.pause.pause_indefinite();
            info!(agent = %self.agent, "#pause in reply: pausing indefinitely");
        }

        let text = strip_leading_self_mentions(&text, &self.agent);
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// First handler failure requeues the trigger (it keeps its place at the
    /// head of the queue); the second completes it with a failure marker so
    /// the queue keeps moving.
    async fn handle_handler_failure(&self, trigger: &Message, reason: &str) {
        let first_failure = {
            let mut requeued = self
                .requeued_once
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            requeued.insert(trigger.id.clone())
        };

        if first_failure {
            warn!(
                agent = %self.agent,
                id = %trigger.id,
                reason,
                "handler failed, requeueing once"
            );
            if let Err(e) = self.store.fail(&trigger.id, &self.agent, true).await {
                error!(agent = %self.agent, error = %e, "requeue after handler failure failed");
            }
        } else {
            error!(
                agent = %self.agent,
                id = %trigger.id,
                reason,
                "handler failed twice, completing with failure marker"
            );
            if let Err(e) = self.store.fail(&trigger.id, &self.agent, false).await {
                error!(agent = %self.agent, error = %e, "fail() after handler failure failed");
            }
            self.requeued_once
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&trigger.id);
        }
    }

    /// Heartbeat task. Keeps the bus connection alive past upstream idle
    /// timeouts; three consecutive failures trigger a reconnect.
    async fn heartbeat_loop(&self) -> anyhow::Result<()> {
        if self.options.heartbeat_interval.is_zero() {
            debug!(agent = %self.agent, "heartbeat disabled");
            self.cancel.cancelled().await;
            return Ok(());
        }

        info!(
            agent = %self.agent,
            interval_secs = self.options.heartbeat_interval.as_secs(),
            "heartbeat task started"
        );

        let mut pings = 0u64;
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.heartbeat_interval) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.bus.ping() => result,
            };

            match result {
                Ok(()) => {
                    pings += 1;
                    consecutive_failures = 0;
                    debug!(agent = %self.agent, pings, "ping ok");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        agent = %self.agent,
                        consecutive_failures,
                        error = %e,
                        "ping failed"
                    );
                    if consecutive_failures >= HEARTBEAT_FAILURE_LIMIT {
                        warn!(agent = %self.agent, "reconnecting bus client");
                        if let Err(e) = self.bus.reconnect().await {
                            warn!(agent = %self.agent, error = %e, "reconnect failed");
                        }
                        consecutive_failures = 0;
                    }
                }
            }
        }

        info!(agent = %self.agent, pings, "heartbeat task stopped");
        Ok(())
    }

    /// Housekeeping: delete terminal tombstones past retention, bounded per
    /// pass.
    async fn retention_loop(&self) -> anyhow::Result<()> {
        loop {
            match self
                .store
                .sweep_completed(self.options.retention, SWEEP_MAX_ROWS)
                .await
            {
                Ok(swept) if swept > 0 => {
                    info!(agent = %self.agent, swept, "retention sweep removed tombstones")
                }
                Ok(_) => {}
                Err(e) => warn!(agent = %self.agent, error = %e, "retention sweep failed"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }
        }
        Ok(())
    }

    fn drain_control(&self) {
        let mut rx = self
            .control_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Ok(control) = rx.try_recv() {
            match control {
                RuntimeControl::Pause => {
                    info!(agent = %self.agent, "paused by supervisor");
                    self.pause.pause_indefinite();
                }
                RuntimeControl::Resume => {
                    info!(agent = %self.agent, "resumed by supervisor");
                    self.pause.resume();
                }
            }
        }
    }

    async fn sleep_or_cancelled(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
