//! corral-state: cluster domain types and the durable store.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for requests, containers, host snapshots, and the append-only
//! history streams written by the synchronizer and host agents.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! History keys are `{identity}:{timestamp}` with a zero-padded timestamp,
//! so a prefix scan returns records in time order and re-publishing the
//! same record is an idempotent overwrite.
//!
//! Clones of a `StateStore` share one database handle, so the controller
//! loops and API handlers each hold their own clone.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
