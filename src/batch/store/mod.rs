//! Coordinator storage: two substrates, one protocol.
//!
//! The durable relational store and the fast shared-cache store implement
//! the identical contract; only persistence differs. Protocol logic lives
//! entirely in the coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::signature::Signature;
use crate::errors::Result;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Status of one member host within a batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostJobStatus {
    /// Registered, not yet covered by a downstream job.
    Waiting,
    /// Covered by the downstream job `job_id`, outcome unknown.
    Pending { job_id: String },
    Succeeded,
    Failed { message: String },
}

impl HostJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostJobStatus::Succeeded | HostJobStatus::Failed { .. })
    }
}

/// Storage contract shared by both substrates.
///
/// All mutation happens under the coordinator's named locks except
/// `register_waiting`, which must be idempotent and safe to race.
#[async_trait]
pub trait CoordinatorStore: Send + Sync {
    /// Add a host to the waiting set of (task, signature). Idempotent; a
    /// host already past Waiting keeps its current status.
    async fn register_waiting(&self, task: &str, signature: &Signature, host: &str) -> Result<()>;

    /// Hosts currently waiting under (task, signature), sorted.
    async fn waiting_hosts(&self, task: &str, signature: &Signature) -> Result<Vec<String>>;

    /// Attach the submitted job to the drained hosts, flipping them
    /// Waiting → Pending in one batched write.
    async fn mark_pending(&self, task: &str, signature: &Signature, hosts: &[String], job_id: &str) -> Result<()>;

    async fn host_status(&self, task: &str, signature: &Signature, host: &str) -> Result<Option<HostJobStatus>>;

    /// Fan-write terminal statuses for members of `job_id` in one batched
    /// update. Entries whose backend status is still pending are left
    /// untouched.
    async fn apply_terminal(&self, job_id: &str, statuses: &[(String, HostJobStatus)]) -> Result<()>;

    async fn last_polled(&self, job_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn touch_last_polled(&self, job_id: &str, at: DateTime<Utc>) -> Result<()>;
}
