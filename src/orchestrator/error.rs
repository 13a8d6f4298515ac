use thiserror::Error;

use super::ports::PortConflict;

/// A failure attributed to exactly one service during a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    PortConflict(#[from] PortConflict),

    /// The allocated port was bound by someone else between probe and spawn.
    /// Retryable against the next candidate.
    #[error("port {port} was taken before the process could be spawned")]
    PortTaken { port: u16 },

    #[error("failed to spawn: {reason}")]
    Spawn { reason: String },

    #[error("health check timed out after {attempts} attempt(s) in {elapsed_ms} ms: {last_error}")]
    HealthTimeout {
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("dependency `{dependency}` failed")]
    DependencyFailed { dependency: String },

    #[error("service is locked by another orchestrate invocation")]
    Locked,

    #[error("cancelled")]
    Cancelled,

    #[error("run directory error: {reason}")]
    RunDir { reason: String },
}

impl ServiceError {
    pub(crate) fn run_dir(err: impl std::fmt::Display) -> Self {
        ServiceError::RunDir {
            reason: err.to_string(),
        }
    }

    pub(crate) fn spawn(err: impl std::fmt::Display) -> Self {
        ServiceError::Spawn {
            reason: err.to_string(),
        }
    }

    pub fn is_health_timeout(&self) -> bool {
        matches!(self, ServiceError::HealthTimeout { .. })
    }
}
