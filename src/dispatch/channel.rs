//! Execution channels: how a classified instance actually reaches its
//! host.
//!
//! Three channels exist: relay through the job backend, direct Windows
//! over the remote-command transport, and direct Unix-like over an
//! interactive shell session. Each channel executor handles exactly one
//! instance; fan-out and concurrency bounds live in the dispatcher tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::{OrchestratorError, Result};
use crate::host::HostDescriptor;
use crate::solution::{ExecutionSolution, StepKind};
use crate::transport::retry::{with_retry, RetryPolicy};
use crate::transport::{JobBackend, JobPayload, RemoteCommand, RemoteShell};

/// Execution transport for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Relay,
    WindowsCommand,
    UnixShell,
}

/// Classify a host into its channel.
pub fn classify(host: &HostDescriptor) -> Channel {
    if host.needs_jump_server {
        Channel::Relay
    } else if host.os.is_windows() {
        Channel::WindowsCommand
    } else {
        Channel::UnixShell
    }
}

/// Relay channel: one job submission covering the outer solution's run
/// command. Returns the backend job id.
pub(crate) async fn dispatch_relay(
    jobs: Arc<dyn JobBackend>,
    host: &HostDescriptor,
    solution: &ExecutionSolution,
    job_timeout: Duration,
    retry: RetryPolicy,
) -> Result<String> {
    let cmd = solution.run_command().ok_or_else(|| {
        OrchestratorError::Configuration(format!("relay solution for {} has no run command", host.host_id))
    })?;
    let payload = JobPayload::RunScript {
        script: cmd.to_string(),
        params: Vec::new(),
    };
    let targets = vec![host.host_id.clone()];
    let job_id = with_retry(retry, "job_backend.submit", || {
        let payload = payload.clone();
        let targets = targets.clone();
        let jobs = jobs.clone();
        async move { jobs.submit(&payload, &targets, job_timeout).await }
    })
    .await?;
    debug!(target: "gangway::dispatch", host = %host.host_id, job_id = %job_id, "relay job submitted");
    Ok(job_id)
}

/// Direct Windows channel: connectivity probe first, then dependency
/// pushes and command execution over the remote-command transport.
pub(crate) async fn dispatch_windows(
    remote: Arc<dyn RemoteCommand>,
    host: &HostDescriptor,
    solution: &ExecutionSolution,
    retry: RetryPolicy,
) -> Result<()> {
    with_retry(retry, "remote_command.probe", || {
        let remote = remote.clone();
        let host = host.clone();
        async move { remote.probe(&host).await }
    })
    .await?;

    for step in &solution.steps {
        match step.kind {
            StepKind::Dependencies => {
                for content in &step.contents {
                    remote.push(host, content).await?;
                }
            }
            StepKind::Commands => {
                for content in &step.contents {
                    remote.execute(host, &content.text).await?;
                }
            }
        }
    }
    debug!(target: "gangway::dispatch", host = %host.host_id, "windows dispatch complete");
    Ok(())
}

/// Direct Unix channel: one interactive session walking the solution in
/// step order: create-dirs, hooks, dependency pushes, download/chmod,
/// detached run.
pub(crate) async fn dispatch_unix(
    shell: Arc<dyn RemoteShell>,
    host: &HostDescriptor,
    solution: &ExecutionSolution,
    retry: RetryPolicy,
) -> Result<()> {
    let mut session = with_retry(retry, "remote_shell.open", || {
        let shell = shell.clone();
        let host = host.clone();
        async move { shell.open(&host).await }
    })
    .await?;

    for step in &solution.steps {
        match step.kind {
            StepKind::Dependencies => {
                for content in &step.contents {
                    session.push(content).await?;
                }
            }
            StepKind::Commands => {
                for content in &step.contents {
                    session.run(&content.text).await?;
                }
            }
        }
    }
    debug!(target: "gangway::dispatch", host = %host.host_id, "unix dispatch complete");
    Ok(())
}
