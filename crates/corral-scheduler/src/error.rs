//! Scheduler error types.

use thiserror::Error;

/// Errors that abort a scheduling cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state store error: {0}")]
    State(#[from] corral_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
