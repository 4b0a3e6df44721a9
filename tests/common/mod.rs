//! Shared fakes and constructors for the integration suite.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use gangway::batch::store::{CoordinatorStore, SqliteStore};
use gangway::errors::{OrchestratorError, Result};
use gangway::host::{
    AgentBuild, HookScript, HostDescriptor, IdentityToken, JumpServer, NodeType, Operation, OsType, ServerLists,
    ServerPorts,
};
use gangway::report::FactUpdate;
use gangway::solution::{BuildContext, Content};
use gangway::transport::{
    CacheStore, FactSink, JobBackend, JobPayload, JobTargetStatus, RemoteCommand, RemoteShell, ReportSource,
    ShellSession, TargetStatus,
};
use tempfile::TempDir;

/// Opt-in test logging: `RUST_LOG=gangway=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn host(os: OsType) -> HostDescriptor {
    HostDescriptor {
        host_id: "host-1".into(),
        os,
        node: NodeType::Agent,
        inner_ip: "10.0.0.1".into(),
        outer_ip: Some("203.0.113.1".into()),
        login_ip: None,
        port: 22,
        cloud_id: "7".into(),
        account: "ops".into(),
        auth_type: "key".into(),
        dest_dir: match os {
            OsType::Windows => r"C:\tmp\agent_setup".into(),
            _ => "/tmp/agent_setup".into(),
        },
        install_path: match os {
            OsType::Windows => r"C:\gse\agent".into(),
            _ => "/usr/local/agent".into(),
        },
        manual_install: false,
        needs_jump_server: false,
        service_credentials: None,
    }
}

pub fn jump_server() -> JumpServer {
    JumpServer {
        address: "192.0.2.10".into(),
        port: 8443,
        download_path: "/data/relay".into(),
        http_proxy_url: "http://192.0.2.10:3128".into(),
        download_via_proxy: true,
        command_via_proxy: false,
    }
}

pub fn build_context(os: OsType) -> BuildContext {
    BuildContext {
        host: host(os),
        jump: None,
        build: AgentBuild {
            name: "monitor-agent".into(),
            version: "2.4.1".into(),
            legacy: false,
            force_update: false,
        },
        operation: Operation::Install,
        hooks: Vec::new(),
        ports: ServerPorts {
            io: 48668,
            file: 58925,
            data: 58625,
            bt: 10020,
            tracker: 10030,
            proc: 50000,
            db_proxy: 58859,
            api: 50002,
        },
        lists: ServerLists {
            file_servers: vec!["10.1.0.1".into(), "10.1.0.2".into()],
            data_servers: vec!["10.1.0.3".into()],
            task_servers: vec!["10.1.0.4".into()],
        },
        package_url: "https://pkg.example.com/agent".into(),
        callback_url: "https://orch.example.com/report".into(),
        run_id: "run-42".into(),
        token: IdentityToken("tok-fixed".into()),
        combine_cmd_steps: false,
        execute_on_target: false,
        no_sudo_account: "root".into(),
    }
}

pub fn inline_hook(name: &str, command: &str) -> HookScript {
    HookScript {
        name: name.into(),
        command: command.into(),
        inline: true,
    }
}

pub fn download_hook(name: &str, file: &str) -> HookScript {
    HookScript {
        name: name.into(),
        command: file.into(),
        inline: false,
    }
}

/// In-memory cache with real TTL expiry and atomic set-if-absent.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.live_value(key).await.is_some()
    }

    async fn live_value(&self, key: &str) -> Option<String> {
        let mut g = self.entries.lock().await;
        match g.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                g.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|t| Instant::now() + t);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if self.live_value(key).await.is_some() {
            return Ok(false);
        }
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(true)
    }

    async fn delete_if(&self, key: &str, owner: &str) -> Result<bool> {
        let mut g = self.entries.lock().await;
        match g.get(key) {
            Some((value, _)) if value == owner => {
                g.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Recording shell transport. Every command and push lands in one shared
/// log as `(host_id, entry)`.
#[derive(Default)]
pub struct FakeShell {
    pub log: Arc<Mutex<Vec<(String, String)>>>,
    /// Hosts whose session open fails with a permanent transport error.
    pub refuse: Vec<String>,
}

pub struct FakeSession {
    host_id: String,
    log: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn open(&self, host: &HostDescriptor) -> Result<Box<dyn ShellSession>> {
        if self.refuse.contains(&host.host_id) {
            return Err(OrchestratorError::transport_permanent("open", "connection refused"));
        }
        Ok(Box::new(FakeSession {
            host_id: host.host_id.clone(),
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl ShellSession for FakeSession {
    async fn run(&mut self, command: &str) -> Result<String> {
        self.log.lock().await.push((self.host_id.clone(), format!("run:{command}")));
        Ok(String::new())
    }

    async fn push(&mut self, content: &Content) -> Result<()> {
        self.log
            .lock()
            .await
            .push((self.host_id.clone(), format!("push:{}", content.name)));
        Ok(())
    }
}

/// Recording Windows command transport.
#[derive(Default)]
pub struct FakeRemoteCommand {
    pub log: Arc<Mutex<Vec<(String, String)>>>,
    pub probe_failures: Vec<String>,
}

#[async_trait]
impl RemoteCommand for FakeRemoteCommand {
    async fn probe(&self, host: &HostDescriptor) -> Result<()> {
        if self.probe_failures.contains(&host.host_id) {
            return Err(OrchestratorError::transport_permanent("probe", "host unreachable"));
        }
        self.log.lock().await.push((host.host_id.clone(), "probe".into()));
        Ok(())
    }

    async fn execute(&self, host: &HostDescriptor, command: &str) -> Result<String> {
        self.log
            .lock()
            .await
            .push((host.host_id.clone(), format!("exec:{command}")));
        Ok(String::new())
    }

    async fn push(&self, host: &HostDescriptor, content: &Content) -> Result<()> {
        self.log
            .lock()
            .await
            .push((host.host_id.clone(), format!("push:{}", content.name)));
        Ok(())
    }
}

/// Recording job backend with scriptable per-target statuses.
#[derive(Default)]
pub struct FakeJobBackend {
    pub submissions: Mutex<Vec<(JobPayload, Vec<String>)>>,
    pub statuses: Mutex<HashMap<String, Vec<TargetStatus>>>,
    pub status_calls: Mutex<Vec<String>>,
}

impl FakeJobBackend {
    pub fn new() -> Self {
        FakeJobBackend::default()
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.lock().await.len()
    }

    pub async fn set_status(&self, job_id: &str, statuses: Vec<(&str, JobTargetStatus)>) {
        self.statuses.lock().await.insert(
            job_id.to_string(),
            statuses
                .into_iter()
                .map(|(target, status)| TargetStatus {
                    target: target.to_string(),
                    status,
                })
                .collect(),
        );
    }
}

#[async_trait]
impl JobBackend for FakeJobBackend {
    async fn submit(&self, payload: &JobPayload, targets: &[String], _timeout: Duration) -> Result<String> {
        let mut subs = self.submissions.lock().await;
        subs.push((payload.clone(), targets.to_vec()));
        let job_id = format!("job-{}", subs.len());
        // Targets default to pending until a test scripts an outcome.
        self.statuses.lock().await.entry(job_id.clone()).or_insert_with(|| {
            targets
                .iter()
                .map(|t| TargetStatus {
                    target: t.clone(),
                    status: JobTargetStatus::Pending,
                })
                .collect()
        });
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<Vec<TargetStatus>> {
        self.status_calls.lock().await.push(job_id.to_string());
        Ok(self.statuses.lock().await.get(job_id).cloned().unwrap_or_default())
    }
}

/// Per-instance report queues tests append to.
#[derive(Default)]
pub struct MemoryReports {
    queues: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryReports {
    pub fn new() -> Self {
        MemoryReports::default()
    }

    pub async fn append(&self, instance_id: &str, line: impl Into<String>) {
        self.queues
            .lock()
            .await
            .entry(instance_id.to_string())
            .or_default()
            .push(line.into());
    }

    pub async fn append_record(&self, instance_id: &str, step: &str, status: &str, log: &str) {
        self.append(
            instance_id,
            format!(
                r#"{{"timestamp":"2026-02-11T08:30:00Z","level":"INFO","step":"{step}","log":"{log}","status":"{status}"}}"#
            ),
        )
        .await;
    }
}

#[async_trait]
impl ReportSource for MemoryReports {
    async fn drain(&self, instance_id: &str) -> Result<Vec<String>> {
        Ok(self.queues.lock().await.remove(instance_id).unwrap_or_default())
    }
}

/// Fact sink recording every flush call.
#[derive(Default)]
pub struct RecordingFacts {
    pub flushes: Mutex<Vec<Vec<FactUpdate>>>,
}

#[async_trait]
impl FactSink for RecordingFacts {
    async fn flush(&self, updates: Vec<FactUpdate>) -> Result<()> {
        self.flushes.lock().await.push(updates);
        Ok(())
    }
}

pub async fn create_sqlite_store_disk() -> (Arc<dyn CoordinatorStore>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("coordinator.db");
    std::fs::File::create(&db_path).unwrap();
    let db_url = format!("sqlite:{}", db_path.display());
    let store = Arc::new(SqliteStore::new(&db_url).await.unwrap()) as Arc<dyn CoordinatorStore>;
    (store, td)
}
