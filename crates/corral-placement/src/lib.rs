//! Corral placement: decides which host runs each pending request.
//!
//! This crate does NOT dispatch anything (that's `corral-scheduler`) and
//! never mutates cluster state. Strategies are pure functions from a host
//! view and a pending-request set to a list of assignments.
//!
//! # Components
//!
//! - **`scorer`**: Host capacity view and bin-packing scoring
//! - **`placer`**: `PlacementStrategy` trait and the one-host strategy

pub mod placer;
pub mod scorer;

pub use placer::{Assignment, OneHostPlacement, PendingRequest, PlacementStrategy};
pub use scorer::{HostCapacity, HostScore, rank_hosts, score_host};
