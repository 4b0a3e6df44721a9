//! Client for the external process-management backend.
//!
//! The backend registers agent processes under its supervision, runs
//! control operations against them and reports per-host outcomes as
//! numeric codes. The code table below is fixed by the backend's wire
//! contract; a couple of codes that look like failures ("already
//! registered", "already not running") are remapped to success because
//! the desired end state already holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Backend code: operation applied cleanly.
pub const CODE_SUCCESS: i64 = 0;
/// Backend code: operation still executing.
pub const CODE_EXECUTING: i64 = 104;
/// Backend code: operation queued, not yet started.
pub const CODE_QUEUED: i64 = 115;
/// Backend code: process was already registered.
pub const CODE_ALREADY_REGISTERED: i64 = 117;
/// Backend code: process was already not running.
pub const CODE_ALREADY_NOT_RUNNING: i64 = 118;

/// Control operation against registered processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessOp {
    Start,
    Stop,
    Restart,
    Reload,
    Unregister,
}

/// Classified per-host outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcOutcome {
    Success,
    Pending,
    Failed,
}

/// Map a backend code onto an outcome.
pub fn classify_code(code: i64) -> ProcOutcome {
    match code {
        CODE_SUCCESS | CODE_ALREADY_REGISTERED | CODE_ALREADY_NOT_RUNNING => ProcOutcome::Success,
        CODE_EXECUTING | CODE_QUEUED => ProcOutcome::Pending,
        _ => ProcOutcome::Failed,
    }
}

/// Commands the backend uses to control the agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommands {
    pub start: String,
    pub stop: String,
    pub restart: String,
    pub reload: String,
}

/// Identity of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub user: String,
    pub proc_name: String,
    pub setup_path: String,
}

/// Resource ceilings the backend enforces on the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Raw per-host result as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHostResult {
    pub host: String,
    pub code: i64,
    pub message: String,
}

/// Classified per-host result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host: String,
    pub outcome: ProcOutcome,
    pub code: i64,
    pub message: String,
}

impl From<RawHostResult> for HostResult {
    fn from(raw: RawHostResult) -> Self {
        HostResult {
            outcome: classify_code(raw.code),
            host: raw.host,
            code: raw.code,
            message: raw.message,
        }
    }
}

/// Raw wire API of the process-management backend.
#[async_trait]
pub trait ProcessApi: Send + Sync {
    async fn register(
        &self,
        hosts: &[String],
        control: &ControlCommands,
        identity: &ProcessIdentity,
        limits: &ResourceLimits,
    ) -> Result<Vec<RawHostResult>>;
    /// Kick off an async control operation; returns a backend task id.
    async fn operate(&self, op: ProcessOp, hosts: &[String]) -> Result<String>;
    async fn poll(&self, task_id: &str) -> Result<Vec<RawHostResult>>;
}

/// Thin classifying wrapper over the raw API.
pub struct ProcessManagerClient {
    api: Arc<dyn ProcessApi>,
}

impl ProcessManagerClient {
    pub fn new(api: Arc<dyn ProcessApi>) -> Self {
        ProcessManagerClient { api }
    }

    pub async fn register(
        &self,
        hosts: &[String],
        control: &ControlCommands,
        identity: &ProcessIdentity,
        limits: &ResourceLimits,
    ) -> Result<Vec<HostResult>> {
        let raw = self.api.register(hosts, control, identity, limits).await?;
        Ok(raw.into_iter().map(HostResult::from).collect())
    }

    pub async fn operate(&self, op: ProcessOp, hosts: &[String]) -> Result<String> {
        self.api.operate(op, hosts).await
    }

    pub async fn poll(&self, task_id: &str) -> Result<Vec<HostResult>> {
        let raw = self.api.poll(task_id).await?;
        Ok(raw.into_iter().map(HostResult::from).collect())
    }
}
