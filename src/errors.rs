//! Crate error taxonomy.
//!
//! Transport errors carry a retryable classification so call sites can
//! decide between bounded retry and immediate failure. Lock contention is
//! deliberately not represented here: a held lock defers work to the next
//! tick and is signalled as `None` by the lock manager.

/// Errors surfaced by the orchestrator subsystems.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Unresolvable script selection, missing jump-server config and
    /// similar pre-flight failures. Fatal, never retried.
    #[error("configuration: {0}")]
    Configuration(String),

    /// Remote shell / remote command / backend HTTP failure.
    #[error("transport: {operation}: {message}")]
    Transport {
        operation: String,
        message: String,
        retryable: bool,
    },

    /// No terminal report record arrived within the tick budget.
    #[error("no terminal report within {ticks} ticks")]
    ReportTimeout { ticks: u32 },

    /// The downstream job backend reported failure for a host.
    #[error("downstream job {job_id}: {message}")]
    DownstreamJob { job_id: String, message: String },

    /// Coordinator store failure (cache round-trip or SQL).
    #[error("store: {operation}: {message}")]
    Store { operation: String, message: String },
}

impl OrchestratorError {
    /// Transient transport error; call sites may retry with fixed backoff.
    pub fn transport_retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Transport {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Permanent transport error; retrying cannot help.
    pub fn transport_permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Transport {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        OrchestratorError::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Transport { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
