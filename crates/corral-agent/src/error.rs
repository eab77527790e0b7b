//! Agent and container runtime error types.

use thiserror::Error;

/// Failures reported by a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid container spec for {name}: {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("failed to create container {name}: {reason}")]
    Create { name: String, reason: String },

    #[error("failed to start container {name}: {reason}")]
    Start { name: String, reason: String },

    #[error("failed to query container {name}: {reason}")]
    Status { name: String, reason: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that end a single agent loop iteration.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("state store error: {0}")]
    State(#[from] corral_state::StateError),

    #[error("cluster error: {0}")]
    Cluster(#[from] corral_cluster::ClusterError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl AgentError {
    /// Failures that are expected to clear up on a later iteration.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::State(_) => true,
            Self::Cluster(e) => e.is_transient(),
            Self::Runtime(_) => false,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
