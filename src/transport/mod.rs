//! External-collaborator contracts.
//!
//! Everything outside the orchestrator core (remote shells, the Windows
//! remote-command transport, the job-execution backend, the shared cache,
//! the fact store) is reached through the narrow ports in this
//! module. Implementations live in the embedding application; tests use
//! in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::host::HostDescriptor;
use crate::report::FactUpdate;
use crate::solution::Content;

pub mod process;
pub mod retry;

/// Interactive remote-shell transport for direct Unix-like hosts.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn open(&self, host: &HostDescriptor) -> Result<Box<dyn ShellSession>>;
}

/// One open shell session. Commands run in order; `push` materializes a
/// dependency artifact on the host before later commands use it.
#[async_trait]
pub trait ShellSession: Send + Sync {
    async fn run(&mut self, command: &str) -> Result<String>;
    async fn push(&mut self, content: &Content) -> Result<()>;
}

/// Windows remote-command transport: a connectivity probe plus one-shot
/// command execution.
#[async_trait]
pub trait RemoteCommand: Send + Sync {
    async fn probe(&self, host: &HostDescriptor) -> Result<()>;
    async fn execute(&self, host: &HostDescriptor, command: &str) -> Result<String>;
    /// Materialize a dependency artifact on the host through the command
    /// transport (Windows hosts have no HTTPS fetcher until the bundled
    /// curl lands).
    async fn push(&self, host: &HostDescriptor, content: &Content) -> Result<()>;
}

/// Payload of a downstream job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPayload {
    PushFiles { files: Vec<String> },
    RunScript { script: String, params: Vec<String> },
}

/// Per-target status reported by the job backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobTargetStatus {
    Pending,
    Succeeded,
    Failed { message: String },
}

impl JobTargetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobTargetStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target: String,
    pub status: JobTargetStatus,
}

/// Job-execution backend used for relay dispatch and batched pushes.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit(&self, payload: &JobPayload, targets: &[String], timeout: Duration) -> Result<String>;
    async fn get_status(&self, job_id: &str) -> Result<Vec<TargetStatus>>;
}

/// Shared cache with atomic set-if-absent, the substrate for named locks
/// and cached config payloads.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Atomic set-if-absent with TTL. Returns true when this call created
    /// the entry.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    /// Owner-checked compare-and-delete. Returns true when the entry
    /// existed with exactly this value and was removed.
    async fn delete_if(&self, key: &str, owner: &str) -> Result<bool>;
}

/// Batched sink for side-channel facts (cpu arch, agent id, os version,
/// health). One flush call carries one write per distinct new value.
#[async_trait]
pub trait FactSink: Send + Sync {
    async fn flush(&self, updates: Vec<FactUpdate>) -> Result<()>;
}

/// Out-of-band report queues, one per instance, populated by the running
/// setup script. `drain` removes and returns all pending raw lines.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn drain(&self, instance_id: &str) -> Result<Vec<String>>;
}
