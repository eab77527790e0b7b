//! Errors raised by the state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    /// A redb transaction, table, or row operation failed.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    /// A stored value no longer matches the record type.
    #[error("corrupt record: {0}")]
    Decode(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl StateError {
    pub(crate) fn request_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "request",
            id: id.to_string(),
        }
    }
}
