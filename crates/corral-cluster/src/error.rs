//! Cluster error types.

use thiserror::Error;
use tracing::warn;

/// Errors raised by the controller-side coordination loops.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("state store error: {0}")]
    State(#[from] corral_state::StateError),

    #[error("malformed report: {0}")]
    MalformedReport(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("container {0} is already queued")]
    AlreadyQueued(String),

    #[error("report rejected by controller: {0}")]
    Rejected(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ClusterError {
    /// Failures that are expected to clear up on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::State(_) | Self::TransportClosed(_) | Self::Transport(_)
        )
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Record a broken programming invariant.
///
/// Panics in debug builds; release builds log and let the caller skip the
/// offending item.
pub fn invariant_violation(what: &str) {
    debug_assert!(false, "invariant violated: {what}");
    warn!(%what, "invariant violated, skipping");
}
