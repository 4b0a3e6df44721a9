//! Installation dispatcher: a tick-driven state machine over install
//! instances.
//!
//! The dispatcher owns no scheduler. An external scheduler invokes
//! `tick()` repeatedly; within one tick the dispatcher drains report
//! queues, applies timeouts, and fans out pending dispatches with
//! per-channel concurrency bounds. The tick returns once its own fan-out
//! completes; it never blocks waiting for reports.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::host::HostDescriptor;
use crate::report::{self, FactKind, FactPayload, FactUpdate, ReportRecord, ReportVerdict};
use crate::solution::ExecutionSolution;
use crate::transport::retry::RetryPolicy;
use crate::transport::{CacheStore, FactSink, JobBackend, RemoteCommand, RemoteShell, ReportSource};

pub mod channel;
pub mod instance;

pub use channel::{classify, Channel};
pub use instance::{InstallInstance, InstanceState};

/// Key prefix for cached per-instance configuration payloads.
const CONFIG_CACHE_PREFIX: &str = "gangway:cfg:";

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Interval the external scheduler ticks at. Used for the report
    /// timeout budget and the cache TTL jitter; the dispatcher itself
    /// never sleeps on it.
    pub tick_interval: Duration,
    /// Report timeout budget, in ticks. An instance with no terminal
    /// record after this many ticks times out.
    pub timeout_ticks: u32,
    pub relay_concurrency: usize,
    pub windows_concurrency: usize,
    pub unix_concurrency: usize,
    pub retry: RetryPolicy,
}

impl DispatcherOptions {
    /// Wall-clock report budget: `ticks × tick_interval`.
    pub fn timeout(&self) -> Duration {
        self.tick_interval * self.timeout_ticks
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        DispatcherOptions {
            tick_interval: Duration::from_secs(10),
            timeout_ticks: 90,
            relay_concurrency: 20,
            windows_concurrency: 10,
            unix_concurrency: 20,
            retry: RetryPolicy::default(),
        }
    }
}

/// Injected collaborators, constructed once at process start and shared
/// by reference into every tick.
#[derive(Clone)]
pub struct DispatcherClients {
    pub shell: Arc<dyn RemoteShell>,
    pub remote: Arc<dyn RemoteCommand>,
    pub jobs: Arc<dyn JobBackend>,
    pub cache: Arc<dyn CacheStore>,
    pub facts: Arc<dyn FactSink>,
    pub reports: Arc<dyn ReportSource>,
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

struct DispatchJob {
    id: String,
    host: HostDescriptor,
    solution: ExecutionSolution,
    payload: String,
}

pub struct Dispatcher {
    options: DispatcherOptions,
    clients: DispatcherClients,
    instances: HashMap<String, InstallInstance>,
    /// (host, kind, value) triples already flushed; keeps fact writes to
    /// one per distinct new value.
    seen_facts: HashSet<(String, FactKind, String)>,
}

impl Dispatcher {
    pub fn new(options: DispatcherOptions, clients: DispatcherClients) -> Self {
        Dispatcher {
            options,
            clients,
            instances: HashMap::new(),
            seen_facts: HashSet::new(),
        }
    }

    /// Admit one instance. Manual installs arrive already in
    /// `AwaitingReport`; everything else starts `Pending`.
    pub fn admit(&mut self, instance: InstallInstance) {
        debug!(
            target: "gangway::dispatch",
            instance_id = %instance.id,
            host = %instance.host.host_id,
            state = ?instance.state,
            "instance admitted"
        );
        self.instances.insert(instance.id.clone(), instance);
    }

    pub fn instance(&self, id: &str) -> Option<&InstallInstance> {
        self.instances.get(id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstallInstance> {
        self.instances.values()
    }

    /// Execute one tick: cancellation sweep, report drain, timeout check,
    /// then bounded dispatch fan-out. Never blocks on report arrival.
    ///
    /// `active`, when supplied, is the authoritative still-active id set;
    /// in-flight instances missing from it are dropped silently.
    pub async fn tick(&mut self, active: Option<&HashSet<String>>) -> TickSummary {
        let mut summary = TickSummary::default();

        if let Some(active) = active {
            let cancelled: Vec<String> = self
                .instances
                .iter()
                .filter(|(id, inst)| !inst.is_terminal() && !active.contains(*id))
                .map(|(id, _)| id.clone())
                .collect();
            for id in cancelled {
                self.instances.remove(&id);
                summary.cancelled += 1;
                debug!(target: "gangway::dispatch", instance_id = %id, "instance cancelled");
            }
        }

        self.drain_reports(&mut summary).await;
        self.apply_timeouts(&mut summary);
        self.dispatch_pending(&mut summary).await;

        summary
    }

    async fn drain_reports(&mut self, summary: &mut TickSummary) {
        let mut fact_groups: HashMap<(FactKind, String), (FactPayload, Vec<String>)> = HashMap::new();

        for inst in self.instances.values_mut() {
            if !matches!(inst.state, InstanceState::Dispatched | InstanceState::AwaitingReport) {
                continue;
            }
            let lines = match self.clients.reports.drain(&inst.id).await {
                Ok(lines) => lines,
                Err(err) => {
                    warn!(
                        target: "gangway::dispatch",
                        instance_id = %inst.id,
                        error = %err,
                        "report drain failed, deferring to next tick"
                    );
                    continue;
                }
            };

            let mut records: Vec<ReportRecord> = Vec::with_capacity(lines.len());
            for line in &lines {
                match ReportRecord::parse(line) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!(
                            target: "gangway::dispatch",
                            instance_id = %inst.id,
                            error = %err,
                            "skipping unparseable report record"
                        );
                    }
                }
            }

            for record in &records {
                if let Some((kind, payload)) = report::side_fact(record) {
                    let key = (inst.host.host_id.clone(), kind, payload.dedup_key());
                    if self.seen_facts.insert(key) {
                        fact_groups
                            .entry((kind, payload.dedup_key()))
                            .or_insert_with(|| (payload.clone(), Vec::new()))
                            .1
                            .push(inst.host.host_id.clone());
                    }
                }
            }

            match report::verdict(&records, &inst.success_step) {
                ReportVerdict::Succeeded => {
                    inst.state = InstanceState::Succeeded;
                    summary.succeeded += 1;
                    info!(
                        target: "gangway::dispatch",
                        instance_id = %inst.id,
                        host = %inst.host.host_id,
                        "instance succeeded"
                    );
                }
                ReportVerdict::Failed { step, log } => {
                    inst.state = InstanceState::Failed {
                        reason: format!("step {step}: {log}"),
                    };
                    summary.failed += 1;
                    info!(
                        target: "gangway::dispatch",
                        instance_id = %inst.id,
                        host = %inst.host.host_id,
                        step = %step,
                        "instance failed"
                    );
                }
                ReportVerdict::Pending => {}
            }
        }

        if !fact_groups.is_empty() {
            let updates: Vec<FactUpdate> = fact_groups
                .into_iter()
                .map(|((kind, _), (payload, hosts))| FactUpdate { kind, payload, hosts })
                .collect();
            let count = updates.len();
            if let Err(err) = self.clients.facts.flush(updates).await {
                warn!(target: "gangway::dispatch", error = %err, "fact flush failed, facts dropped");
            } else {
                debug!(target: "gangway::dispatch", updates = count, "flushed side-channel facts");
            }
        }
    }

    fn apply_timeouts(&mut self, summary: &mut TickSummary) {
        for inst in self.instances.values_mut() {
            if inst.is_terminal() {
                continue;
            }
            inst.elapsed_ticks += 1;
            let awaiting = matches!(inst.state, InstanceState::Dispatched | InstanceState::AwaitingReport);
            if awaiting && inst.elapsed_ticks >= self.options.timeout_ticks {
                inst.state = InstanceState::TimedOut;
                summary.timed_out += 1;
                info!(
                    target: "gangway::dispatch",
                    instance_id = %inst.id,
                    host = %inst.host.host_id,
                    ticks = inst.elapsed_ticks,
                    "instance timed out waiting for a terminal report"
                );
            }
        }
    }

    async fn dispatch_pending(&mut self, summary: &mut TickSummary) {
        let mut by_channel: HashMap<Channel, Vec<DispatchJob>> = HashMap::new();

        for inst in self.instances.values_mut() {
            if inst.state != InstanceState::Pending {
                continue;
            }
            let Some(solution) = inst.dispatch_solution().cloned() else {
                inst.state = InstanceState::Failed {
                    reason: "no executable solution built for host".to_string(),
                };
                summary.failed += 1;
                continue;
            };
            let payload = match serde_json::to_string(&inst.solutions) {
                Ok(p) => p,
                Err(err) => {
                    inst.state = InstanceState::Failed {
                        reason: format!("render config payload: {err}"),
                    };
                    summary.failed += 1;
                    continue;
                }
            };
            inst.state = InstanceState::Dispatched;
            by_channel.entry(classify(&inst.host)).or_default().push(DispatchJob {
                id: inst.id.clone(),
                host: inst.host.clone(),
                solution,
                payload,
            });
        }

        for (channel, jobs) in by_channel {
            let limit = match channel {
                Channel::Relay => self.options.relay_concurrency,
                Channel::WindowsCommand => self.options.windows_concurrency,
                Channel::UnixShell => self.options.unix_concurrency,
            };
            let semaphore = Arc::new(Semaphore::new(limit.max(1)));
            let results = join_all(jobs.into_iter().map(|job| {
                let semaphore = semaphore.clone();
                let clients = self.clients.clone();
                let retry = self.options.retry;
                let job_timeout = self.options.timeout();
                let cache_ttl = self.jittered_cache_ttl();
                async move {
                    let permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                job.id,
                                Err(OrchestratorError::transport_permanent("dispatch", "channel pool closed")),
                            );
                        }
                    };

                    // Pre-compute the config payload the running script
                    // fetches; jittered TTL avoids correlated expiry.
                    let cache_key = format!("{CONFIG_CACHE_PREFIX}{}", job.id);
                    if let Err(err) = clients.cache.set(&cache_key, &job.payload, Some(cache_ttl)).await {
                        warn!(
                            target: "gangway::dispatch",
                            instance_id = %job.id,
                            error = %err,
                            "config payload cache write failed"
                        );
                    }

                    let outcome = match channel {
                        Channel::Relay => {
                            channel::dispatch_relay(clients.jobs, &job.host, &job.solution, job_timeout, retry)
                                .await
                                .map(Some)
                        }
                        Channel::WindowsCommand => {
                            channel::dispatch_windows(clients.remote, &job.host, &job.solution, retry)
                                .await
                                .map(|_| None)
                        }
                        Channel::UnixShell => channel::dispatch_unix(clients.shell, &job.host, &job.solution, retry)
                            .await
                            .map(|_| None),
                    };
                    drop(permit);
                    (job.id, outcome)
                }
            }))
            .await;

            // One host's transport failure never aborts its siblings:
            // every job resolved to its own outcome above.
            for (id, outcome) in results {
                let Some(inst) = self.instances.get_mut(&id) else { continue };
                match outcome {
                    Ok(job_id) => {
                        inst.backend_job_id = job_id;
                        inst.state = InstanceState::AwaitingReport;
                        summary.dispatched += 1;
                    }
                    Err(err) => {
                        inst.state = InstanceState::Failed {
                            reason: err.to_string(),
                        };
                        summary.failed += 1;
                        info!(
                            target: "gangway::dispatch",
                            instance_id = %id,
                            error = %err,
                            "dispatch failed"
                        );
                    }
                }
            }
        }
    }

    /// TTL drawn uniformly from `[timeout, 2×timeout]`.
    fn jittered_cache_ttl(&self) -> Duration {
        let timeout = self.options.timeout().as_secs().max(1);
        let secs = rand::thread_rng().gen_range(timeout..=timeout * 2);
        Duration::from_secs(secs)
    }
}
