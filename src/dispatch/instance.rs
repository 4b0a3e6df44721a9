//! Per-instance install state.
//!
//! One instance is one (host, operation) unit. Its state is mutated only
//! by the dispatcher and is serializable so a coordinator restart can
//! resume from durable records.

use serde::{Deserialize, Serialize};

use crate::host::{HostDescriptor, Operation};
use crate::solution::ExecutionSolution;

/// Dispatcher-driven lifecycle of one instance.
///
/// `Pending → Dispatched → AwaitingReport → {Succeeded|Failed|TimedOut}`.
/// Manual installs skip `Dispatched` and start in `AwaitingReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Pending,
    Dispatched,
    AwaitingReport,
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Succeeded | InstanceState::Failed { .. } | InstanceState::TimedOut
        )
    }
}

/// One (host, operation) unit of install/uninstall/upgrade work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallInstance {
    pub id: String,
    pub host: HostDescriptor,
    pub operation: Operation,
    /// Solutions built for this host, in dispatch preference order (for a
    /// Windows host: Shell first, Batch second; the command channel runs
    /// the Batch one).
    pub solutions: Vec<ExecutionSolution>,
    /// Step whose `DONE` record marks success on the report channel.
    pub success_step: String,
    pub state: InstanceState,
    /// Ticks observed since admission; drives the report timeout.
    pub elapsed_ticks: u32,
    /// Backend job id, recorded for relay dispatches.
    pub backend_job_id: Option<String>,
}

impl InstallInstance {
    pub fn new(
        id: impl Into<String>,
        host: HostDescriptor,
        operation: Operation,
        solutions: Vec<ExecutionSolution>,
        success_step: impl Into<String>,
    ) -> Self {
        let state = if host.manual_install {
            InstanceState::AwaitingReport
        } else {
            InstanceState::Pending
        };
        InstallInstance {
            id: id.into(),
            host,
            operation,
            solutions,
            success_step: success_step.into(),
            state,
            elapsed_ticks: 0,
            backend_job_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Solution the dispatcher executes for this instance: the Batch
    /// rendition on direct Windows, otherwise the first (Shell or relay)
    /// solution.
    pub fn dispatch_solution(&self) -> Option<&ExecutionSolution> {
        if self.host.os.is_windows() && !self.host.needs_jump_server {
            self.solutions.iter().find(|s| s.kind == crate::solution::SolutionKind::Batch)
        } else {
            self.solutions.first()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NodeType, OsType};

    fn host(manual: bool) -> HostDescriptor {
        HostDescriptor {
            host_id: "h1".into(),
            os: OsType::Linux,
            node: NodeType::Agent,
            inner_ip: "10.0.0.1".into(),
            outer_ip: None,
            login_ip: None,
            port: 22,
            cloud_id: "0".into(),
            account: "ops".into(),
            auth_type: "key".into(),
            dest_dir: "/tmp/agent_setup".into(),
            install_path: "/usr/local/agent".into(),
            manual_install: manual,
            needs_jump_server: false,
            service_credentials: None,
        }
    }

    #[test]
    fn manual_instances_skip_dispatched() {
        let inst = InstallInstance::new("i1", host(true), Operation::Install, vec![], "install_agent");
        assert_eq!(inst.state, InstanceState::AwaitingReport);
    }

    #[test]
    fn automated_instances_start_pending() {
        let inst = InstallInstance::new("i1", host(false), Operation::Install, vec![], "install_agent");
        assert_eq!(inst.state, InstanceState::Pending);
    }
}
