//! Batched job coordinator.
//!
//! Many per-host requests sharing one payload signature coalesce into one
//! downstream job. Each request is a resumable state machine driven by an
//! external scheduler tick; cross-request coordination happens only
//! through the store and the named TTL locks, so any number of
//! coordinator processes can run the protocol concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::transport::{JobBackend, JobPayload};

pub mod lock;
pub mod signature;
pub mod store;

pub use lock::{lock_key, LockGuard, LockManager};
pub use signature::Signature;
pub use store::{CoordinatorStore, HostJobStatus};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Interval the external scheduler ticks requests at.
    pub tick_interval: Duration,
    /// Skip a poll when another poller polled within this window. Kept
    /// configurable; defaults to one tick interval.
    pub freshness_window: Duration,
    /// Global budget for one request; exceeding it fails the request
    /// locally without touching the shared job.
    pub global_timeout: Duration,
    /// Fraction of the global timeout after which a leader election is
    /// forced regardless of waiting-set size.
    pub election_fraction: f64,
    /// Waiting-set size that forces a leader election immediately.
    pub coalesce_threshold: usize,
    pub trigger_lock_ttl: Duration,
    pub poll_lock_ttl: Duration,
    /// Timeout handed to the downstream job backend.
    pub job_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        let tick_interval = Duration::from_secs(5);
        CoordinatorOptions {
            tick_interval,
            freshness_window: tick_interval,
            global_timeout: Duration::from_secs(600),
            election_fraction: 0.1,
            coalesce_threshold: 20,
            trigger_lock_ttl: Duration::from_secs(30),
            poll_lock_ttl: Duration::from_secs(30),
            job_timeout: Duration::from_secs(600),
        }
    }
}

impl CoordinatorOptions {
    /// Wait beyond this and the request must try to lead even alone.
    fn election_deadline(&self) -> Duration {
        self.global_timeout.mul_f64(self.election_fraction)
    }
}

/// Phase of one request within the coalescing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    TriggerJob,
    PollStatus,
}

/// Resumable per-request state, persisted between ticks by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub task: String,
    pub host: String,
    pub payload: JobPayload,
    pub phase: BatchPhase,
    /// Ticks observed; wall-clock elapsed is `ticks × tick_interval`.
    pub ticks: u32,
    registered: bool,
    job_id: Option<String>,
}

impl BatchRequest {
    pub fn signature(&self) -> Signature {
        Signature::of_payload(&self.payload)
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

/// Outcome of one request tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchProgress {
    InProgress,
    Succeeded,
    Failed { message: String },
}

pub struct BatchCoordinator {
    options: CoordinatorOptions,
    store: Arc<dyn CoordinatorStore>,
    locks: LockManager,
    jobs: Arc<dyn JobBackend>,
}

impl BatchCoordinator {
    pub fn new(
        options: CoordinatorOptions,
        store: Arc<dyn CoordinatorStore>,
        locks: LockManager,
        jobs: Arc<dyn JobBackend>,
    ) -> Self {
        BatchCoordinator {
            options,
            store,
            locks,
            jobs,
        }
    }

    /// Create the resumable state for one (task, host, payload) request.
    pub fn request(&self, task: impl Into<String>, host: impl Into<String>, payload: JobPayload) -> BatchRequest {
        BatchRequest {
            task: task.into(),
            host: host.into(),
            payload,
            phase: BatchPhase::TriggerJob,
            ticks: 0,
            registered: false,
            job_id: None,
        }
    }

    /// Drive one request one step. The external scheduler re-invokes
    /// until a terminal `BatchProgress` is returned.
    pub async fn tick(&self, req: &mut BatchRequest) -> Result<BatchProgress> {
        req.ticks += 1;
        let signature = req.signature();

        if !req.registered {
            self.store.register_waiting(&req.task, &signature, &req.host).await?;
            req.registered = true;
            debug!(
                target: "gangway::batch",
                task = %req.task,
                host = %req.host,
                signature = %signature,
                "registered in waiting set"
            );
        }

        if self.elapsed(req) >= self.options.global_timeout {
            info!(
                target: "gangway::batch",
                task = %req.task,
                host = %req.host,
                ticks = req.ticks,
                "request exceeded global timeout, failing locally"
            );
            return Ok(BatchProgress::Failed {
                message: "global timeout exceeded before the downstream job finished".to_string(),
            });
        }

        match req.phase {
            BatchPhase::TriggerJob => self.tick_trigger(req, &signature).await,
            BatchPhase::PollStatus => self.tick_poll(req, &signature).await,
        }
    }

    fn elapsed(&self, req: &BatchRequest) -> Duration {
        self.options.tick_interval * req.ticks
    }

    async fn tick_trigger(&self, req: &mut BatchRequest, signature: &Signature) -> Result<BatchProgress> {
        // Another leader may already have dispatched us.
        match self.store.host_status(&req.task, signature, &req.host).await? {
            Some(HostJobStatus::Pending { job_id }) => {
                req.job_id = Some(job_id);
                req.phase = BatchPhase::PollStatus;
                return Ok(BatchProgress::InProgress);
            }
            Some(HostJobStatus::Succeeded) => return Ok(BatchProgress::Succeeded),
            Some(HostJobStatus::Failed { message }) => return Ok(BatchProgress::Failed { message }),
            Some(HostJobStatus::Waiting) | None => {}
        }

        let waiting = self.store.waiting_hosts(&req.task, signature).await?;
        let force_election =
            self.elapsed(req) >= self.options.election_deadline() || waiting.len() >= self.options.coalesce_threshold;
        if !force_election {
            return Ok(BatchProgress::InProgress);
        }

        let key = lock_key("batch", &format!("{}:{signature}", req.task), "trigger");
        let Some(guard) = self.locks.try_acquire(&key, self.options.trigger_lock_ttl).await? else {
            // Held by another leader; it will dispatch us.
            return Ok(BatchProgress::InProgress);
        };

        // Leader: drain the entire waiting set and cover it with one job.
        let outcome = self.lead_trigger(req, signature).await;
        if let Err(err) = self.locks.release(guard).await {
            warn!(target: "gangway::batch", error = %err, "trigger lock release failed");
        }
        outcome?;
        req.phase = BatchPhase::PollStatus;
        Ok(BatchProgress::InProgress)
    }

    async fn lead_trigger(&self, req: &mut BatchRequest, signature: &Signature) -> Result<()> {
        let hosts = self.store.waiting_hosts(&req.task, signature).await?;
        if hosts.is_empty() {
            return Ok(());
        }
        let job_id = self
            .jobs
            .submit(&req.payload, &hosts, self.options.job_timeout)
            .await?;
        self.store.mark_pending(&req.task, signature, &hosts, &job_id).await?;
        info!(
            target: "gangway::batch",
            task = %req.task,
            signature = %signature,
            job_id = %job_id,
            hosts = hosts.len(),
            "coalesced waiting set into one downstream job"
        );
        req.job_id = Some(job_id);
        Ok(())
    }

    async fn tick_poll(&self, req: &mut BatchRequest, signature: &Signature) -> Result<BatchProgress> {
        match self.store.host_status(&req.task, signature, &req.host).await? {
            Some(HostJobStatus::Succeeded) => return Ok(BatchProgress::Succeeded),
            Some(HostJobStatus::Failed { message }) => return Ok(BatchProgress::Failed { message }),
            Some(HostJobStatus::Pending { job_id }) => req.job_id = Some(job_id),
            Some(HostJobStatus::Waiting) | None => {}
        }
        let Some(job_id) = req.job_id.clone() else {
            // Not yet covered by a job; the trigger leader will pick us up.
            return Ok(BatchProgress::InProgress);
        };

        // Freshness guard: skip redundant polls without taking the lock.
        if let Some(last) = self.store.last_polled(&job_id).await? {
            let window = chrono::Duration::from_std(self.options.freshness_window).unwrap_or(chrono::Duration::zero());
            if Utc::now() - last < window {
                return Ok(BatchProgress::InProgress);
            }
        }

        let key = lock_key("batch", &job_id, "poll");
        let Some(guard) = self.locks.try_acquire(&key, self.options.poll_lock_ttl).await? else {
            return Ok(BatchProgress::InProgress);
        };

        let outcome = self.poll_backend(&job_id).await;
        if let Err(err) = self.locks.release(guard).await {
            warn!(target: "gangway::batch", error = %err, "poll lock release failed");
        }
        outcome?;

        // Re-read own record so the poller itself completes promptly.
        match self.store.host_status(&req.task, signature, &req.host).await? {
            Some(HostJobStatus::Succeeded) => Ok(BatchProgress::Succeeded),
            Some(HostJobStatus::Failed { message }) => Ok(BatchProgress::Failed { message }),
            _ => Ok(BatchProgress::InProgress),
        }
    }

    async fn poll_backend(&self, job_id: &str) -> Result<()> {
        let statuses = self.jobs.get_status(job_id).await?;
        let terminal: Vec<(String, HostJobStatus)> = statuses
            .into_iter()
            .filter_map(|s| match s.status {
                crate::transport::JobTargetStatus::Succeeded => Some((s.target, HostJobStatus::Succeeded)),
                crate::transport::JobTargetStatus::Failed { message } => {
                    Some((s.target, HostJobStatus::Failed { message }))
                }
                crate::transport::JobTargetStatus::Pending => None,
            })
            .collect();
        if !terminal.is_empty() {
            self.store.apply_terminal(job_id, &terminal).await?;
        }
        self.store.touch_last_polled(job_id, Utc::now()).await?;
        debug!(
            target: "gangway::batch",
            job_id = %job_id,
            terminal = terminal.len(),
            "polled downstream job status"
        );
        Ok(())
    }
}
