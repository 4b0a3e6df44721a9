//! gangway: remote install/uninstall/upgrade orchestration for
//! monitoring agents across large, heterogeneous host fleets.
//!
//! Three subsystems form the core:
//!
//! - [`solution`]: builds OS/topology-specific command sequences
//!   ([`solution::ExecutionSolution`]) per host, including relay
//!   solutions that tunnel a target's own solutions through a jump
//!   server.
//! - [`dispatch`]: a tick-driven state machine classifying instances into
//!   execution channels and driving bounded-concurrency remote execution,
//!   consuming the out-of-band report channel.
//! - [`batch`]: coalesces many per-host backend job requests into few
//!   jobs using named TTL locks and a polling-freshness guard.
//!
//! Everything else (transports, the job backend, the shared cache, the
//! process-management backend) is an external collaborator reached
//! through the narrow ports in [`transport`]. Components never own a
//! scheduler: an external scheduler invokes `tick` repeatedly and the
//! components return between ticks.
//!
//! The crate emits `tracing` events under the `gangway::*` targets;
//! subscriber installation is the embedding application's job.

pub mod batch;
pub mod dispatch;
pub mod errors;
pub mod host;
pub mod report;
pub mod solution;
pub mod transport;

pub use batch::{BatchCoordinator, BatchPhase, BatchProgress, BatchRequest, CoordinatorOptions, Signature};
pub use dispatch::{Dispatcher, DispatcherClients, DispatcherOptions, InstallInstance, InstanceState, TickSummary};
pub use errors::{OrchestratorError, Result};
pub use host::{
    AgentBuild, HookScript, HostDescriptor, IdentityToken, JumpServer, NodeType, Operation, OsType, ServerLists,
    ServerPorts, ServiceCredentials,
};
pub use report::{ReportRecord, ReportStatus, ReportVerdict};
pub use solution::{build_for_host, BuildContext, ExecutionSolution, SolutionKind, Step, StepKind};
