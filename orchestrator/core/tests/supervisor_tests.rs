// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet-supervisor behaviour against a fake launcher: lifecycle records,
//! duplicate prevention, registry validation, crash classification, backlog
//! resets and deployment groups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use aviary_core::application::supervisor::{
    StartRequest, Supervisor, SupervisorError, SupervisorSettings,
};
use aviary_core::domain::agent::{MonitorId, MonitorStatus};
use aviary_core::domain::bus::{BusClient, BusClientFactory, BusError, IncomingMessage};
use aviary_core::domain::deployment::{
    DeploymentCatalog, DeploymentGroup, GroupMember, MemberSettings,
};
use aviary_core::domain::launcher::{
    LaunchError, LaunchSpec, LaunchedMonitor, MonitorEvent, MonitorLauncher,
};
use aviary_core::domain::registry::HandlerKind;
use aviary_core::domain::store::MessageStore;
use aviary_core::infrastructure::db::Database;
use aviary_core::infrastructure::kill_switch::FileKillSwitch;
use aviary_core::infrastructure::message_store::SqliteMessageStore;

/// Launcher that fakes monitor processes and lets tests script their
/// lifecycle events.
struct FakeLauncher {
    ready_immediately: bool,
    next_pid: AtomicU32,
    specs: Mutex<Vec<LaunchSpec>>,
    handles: Mutex<HashMap<MonitorId, mpsc::Sender<MonitorEvent>>>,
}

impl FakeLauncher {
    fn new(ready_immediately: bool) -> Arc<Self> {
        Arc::new(Self {
            ready_immediately,
            next_pid: AtomicU32::new(4000),
            specs: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn launched_agents(&self) -> Vec<String> {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.agent.clone())
            .collect()
    }

    async fn crash(&self, id: &MonitorId, code: i32, last_line: &str) {
        let tx = self.handles.lock().unwrap().remove(id).unwrap();
        let _ = tx
            .send(MonitorEvent::Log {
                line: last_line.to_string(),
                is_verbose: false,
            })
            .await;
        let _ = tx.send(MonitorEvent::Exited { code: Some(code) }).await;
    }
}

#[async_trait]
impl MonitorLauncher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedMonitor, LaunchError> {
        let (tx, rx) = mpsc::channel(16);
        if self.ready_immediately {
            let _ = tx.send(MonitorEvent::Ready).await;
        }
        self.handles
            .lock()
            .unwrap()
            .insert(spec.monitor_id.clone(), tx);
        self.specs.lock().unwrap().push(spec);
        Ok(LaunchedMonitor {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            events: rx,
        })
    }

    async fn stop(&self, id: &MonitorId, _grace: Duration) -> Result<bool, LaunchError> {
        let Some(tx) = self.handles.lock().unwrap().remove(id) else {
            return Ok(false);
        };
        let _ = tx.send(MonitorEvent::Exited { code: Some(130) }).await;
        Ok(true)
    }

    async fn kill(&self, id: &MonitorId) -> Result<bool, LaunchError> {
        let Some(tx) = self.handles.lock().unwrap().remove(id) else {
            return Ok(false);
        };
        let _ = tx.send(MonitorEvent::Exited { code: None }).await;
        Ok(true)
    }
}

/// Bus whose unread queue only the drain can empty.
struct DrainableBus {
    agent: String,
    unread: AtomicUsize,
}

#[async_trait]
impl BusClient for DrainableBus {
    fn agent(&self) -> &str {
        &self.agent
    }

    async fn send(&self, _: &str, _: Option<&str>) -> Result<Option<String>, BusError> {
        Ok(Some("sent".into()))
    }

    async fn receive(
        &self,
        wait: bool,
        _limit: Option<u32>,
        mark_read: bool,
    ) -> Result<Vec<IncomingMessage>, BusError> {
        assert!(!wait, "drains must not block");
        assert!(mark_read, "drains must consume");
        if self.unread.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Ok(vec![IncomingMessage {
                id: uuid::Uuid::new_v4().to_string(),
                sender: "bob".into(),
                content: format!("@{} backlog", self.agent),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    async fn ping(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BusError> {
        Ok(())
    }
}

struct FakeBusFactory {
    unread: usize,
}

impl BusClientFactory for FakeBusFactory {
    fn client_for(&self, agent: &str) -> Result<Arc<dyn BusClient>, BusError> {
        Ok(Arc::new(DrainableBus {
            agent: agent.to_string(),
            unread: AtomicUsize::new(self.unread),
        }))
    }
}

struct StaticCatalog {
    groups: Vec<DeploymentGroup>,
}

impl DeploymentCatalog for StaticCatalog {
    fn get(&self, id: &str) -> Option<DeploymentGroup> {
        self.groups.iter().find(|group| group.id == id).cloned()
    }

    fn list(&self, _environment: Option<&str>) -> Vec<DeploymentGroup> {
        self.groups.clone()
    }

    fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Fixture {
    supervisor: Arc<Supervisor>,
    launcher: Arc<FakeLauncher>,
    store: Arc<SqliteMessageStore>,
    _dir: tempfile::TempDir,
}

async fn fixture_with(
    launcher: Arc<FakeLauncher>,
    groups: Vec<DeploymentGroup>,
    unread: usize,
    startup_grace: Duration,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let configs_dir = dir.path().join("configs");
    let agents_dir = configs_dir.join("agents");
    std::fs::create_dir_all(&agents_dir).unwrap();
    for agent in ["alpha", "beta"] {
        std::fs::write(
            agents_dir.join(format!("{agent}.json")),
            r#"{"mcpServers": {}, "environment": "local"}"#,
        )
        .unwrap();
    }

    let db = Database::open_in_memory().await.unwrap();
    let store = Arc::new(SqliteMessageStore::new(db).await.unwrap());
    let kill_switch = Arc::new(FileKillSwitch::new(dir.path()));

    let supervisor = Arc::new(Supervisor::new(
        SupervisorSettings {
            configs_dir,
            log_dir: dir.path().join("logs"),
            default_server_url: "http://localhost:8002".into(),
            startup_grace,
            stop_grace: Duration::from_millis(200),
            handler_timeout: Duration::from_secs(600),
            max_drain_iterations: 20,
        },
        Arc::clone(&launcher) as Arc<dyn MonitorLauncher>,
        Arc::clone(&store) as Arc<dyn MessageStore>,
        kill_switch as _,
        Arc::new(StaticCatalog { groups }) as _,
        Arc::new(FakeBusFactory { unread }) as _,
    ));

    Fixture {
        supervisor,
        launcher,
        store,
        _dir: dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(
        FakeLauncher::new(true),
        Vec::new(),
        0,
        Duration::from_secs(5),
    )
    .await
}

async fn wait_for_status(fixture: &Fixture, monitor_id: &MonitorId, status: MonitorStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = fixture.supervisor.snapshot().await;
        if snapshot
            .iter()
            .any(|record| &record.id == monitor_id && record.status == status)
        {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("monitor {monitor_id} never reached {status:?}; snapshot: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn start_runs_the_monitor_and_rejects_duplicates() {
    let fixture = fixture().await;

    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    let snapshot = fixture.supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].agent, "alpha");
    assert_eq!(snapshot[0].environment, "local");
    assert!(snapshot[0].pid.is_some());

    let error = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap_err();
    assert!(matches!(error, SupervisorError::Conflict(_)));
}

#[tokio::test]
async fn registry_validation_happens_before_any_launch() {
    let fixture = fixture().await;

    let error = fixture
        .supervisor
        .start(StartRequest {
            model: Some("gpt-4o".into()),
            ..StartRequest::new("alpha", HandlerKind::Graph)
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SupervisorError::Registry(_)));
    assert!(fixture.launcher.launched_agents().is_empty());
}

#[tokio::test]
async fn missing_agent_config_is_a_config_error() {
    let fixture = fixture().await;

    let error = fixture
        .supervisor
        .start(StartRequest::new("ghost", HandlerKind::Echo))
        .await
        .unwrap_err();
    assert!(matches!(error, SupervisorError::Config(_)));
}

#[tokio::test]
async fn startup_timeout_kills_and_records_crashed() {
    let fixture = fixture_with(
        FakeLauncher::new(false),
        Vec::new(),
        0,
        Duration::from_millis(150),
    )
    .await;

    let error = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap_err();
    assert!(matches!(error, SupervisorError::StartupTimeout(_)));

    let snapshot = fixture.supervisor.snapshot().await;
    assert_eq!(snapshot[0].status, MonitorStatus::Crashed);
}

#[tokio::test]
async fn crash_is_recorded_with_the_last_log_line() {
    let fixture = fixture().await;
    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();

    fixture
        .launcher
        .crash(&monitor_id, 1, "fatal bus error: credentials rejected")
        .await;
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Crashed).await;

    let snapshot = fixture.supervisor.snapshot().await;
    assert!(snapshot[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("credentials rejected"));
}

#[tokio::test]
async fn stop_is_a_stop_not_a_crash() {
    let fixture = fixture().await;
    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();

    assert!(fixture.supervisor.stop(&monitor_id).await.unwrap());
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Stopped).await;
    let snapshot = fixture.supervisor.snapshot().await;
    assert!(snapshot[0].last_error.is_none());
}

#[tokio::test]
async fn delete_requires_an_inactive_monitor() {
    let fixture = fixture().await;
    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    assert!(matches!(
        fixture.supervisor.delete(&monitor_id).await.unwrap_err(),
        SupervisorError::Conflict(_)
    ));

    fixture.supervisor.stop(&monitor_id).await.unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Stopped).await;
    fixture.supervisor.delete(&monitor_id).await.unwrap();
    assert!(fixture.supervisor.snapshot().await.is_empty());
}

#[tokio::test]
async fn reset_is_refused_while_running_and_drains_when_stopped() {
    let fixture = fixture_with(
        FakeLauncher::new(true),
        Vec::new(),
        2,
        Duration::from_secs(5),
    )
    .await;

    // Two stale local rows to purge.
    fixture
        .store
        .enqueue("old1", "alpha", "bob", "@alpha stale")
        .await
        .unwrap();
    fixture
        .store
        .enqueue("old2", "alpha", "bob", "@alpha staler")
        .await
        .unwrap();

    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    assert!(matches!(
        fixture.supervisor.reset_agent("alpha").await.unwrap_err(),
        SupervisorError::AgentRunning(_)
    ));

    fixture.supervisor.stop(&monitor_id).await.unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Stopped).await;

    let summary = fixture.supervisor.reset_agent("alpha").await.unwrap();
    assert_eq!(summary.local_cleared, 2);
    assert_eq!(summary.remote_cleared, 2);
    assert!(summary.errors.is_empty());
    assert_eq!(fixture.store.stats("alpha").await.unwrap().pending, 0);
}

#[tokio::test]
async fn deploy_group_tolerates_member_failures() {
    let group = DeploymentGroup {
        id: "pair".into(),
        name: "Working pair".into(),
        description: String::new(),
        environment: "any".into(),
        tags: vec![],
        defaults: MemberSettings {
            handler: Some(HandlerKind::Echo),
            ..Default::default()
        },
        agents: vec![
            GroupMember {
                id: "alpha".into(),
                overrides: MemberSettings::default(),
            },
            GroupMember {
                // No config file exists for this one.
                id: "ghost".into(),
                overrides: MemberSettings::default(),
            },
            GroupMember {
                id: "beta".into(),
                overrides: MemberSettings::default(),
            },
        ],
    };
    let fixture = fixture_with(
        FakeLauncher::new(true),
        vec![group],
        0,
        Duration::from_secs(5),
    )
    .await;

    let results = fixture.supervisor.deploy_group("pair", None).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].result.is_ok());
    assert!(results[1].result.is_err());
    assert!(results[2].result.is_ok());
    assert_eq!(fixture.launcher.launched_agents(), vec!["alpha", "beta"]);

    let stopped = fixture.supervisor.stop_group("pair").await.unwrap();
    assert_eq!(stopped, 2);

    assert!(matches!(
        fixture.supervisor.deploy_group("nope", None).await.unwrap_err(),
        SupervisorError::GroupNotFound(_)
    ));
}

#[tokio::test]
async fn kill_switch_projects_paused_onto_running_monitors() {
    let fixture = fixture().await;
    assert!(!fixture.supervisor.kill_switch_active());

    let monitor_id = fixture
        .supervisor
        .start(StartRequest::new("alpha", HandlerKind::Echo))
        .await
        .unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    fixture.supervisor.activate_kill_switch().unwrap();
    assert!(fixture.supervisor.kill_switch_active());
    let snapshot = fixture.supervisor.snapshot().await;
    assert_eq!(
        snapshot[0].status,
        MonitorStatus::Paused,
        "running monitors report Paused while the switch is active"
    );

    // The projection is a view, not a state change: deactivating restores
    // Running without any lifecycle event.
    fixture.supervisor.deactivate_kill_switch().unwrap();
    assert!(!fixture.supervisor.kill_switch_active());
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    // Only Running monitors are projected; a stopped one stays Stopped.
    fixture.supervisor.stop(&monitor_id).await.unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Stopped).await;
    fixture.supervisor.activate_kill_switch().unwrap();
    let snapshot = fixture.supervisor.snapshot().await;
    assert_eq!(snapshot[0].status, MonitorStatus::Stopped);
    fixture.supervisor.deactivate_kill_switch().unwrap();
}

#[tokio::test]
async fn restart_preserves_the_monitor_configuration() {
    let fixture = fixture().await;
    let monitor_id = fixture
        .supervisor
        .start(StartRequest {
            model: Some("gpt-4o-mini".into()),
            ..StartRequest::new("alpha", HandlerKind::OpenAi)
        })
        .await
        .unwrap();
    wait_for_status(&fixture, &monitor_id, MonitorStatus::Running).await;

    let new_id = fixture.supervisor.restart(&monitor_id, true).await.unwrap();
    assert_ne!(new_id, monitor_id);
    wait_for_status(&fixture, &new_id, MonitorStatus::Running).await;

    let snapshot = fixture.supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1, "old record replaced");
    assert_eq!(snapshot[0].handler_kind, HandlerKind::OpenAi);
    assert_eq!(snapshot[0].model.as_deref(), Some("gpt-4o-mini"));
}
