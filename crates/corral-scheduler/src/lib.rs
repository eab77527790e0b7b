//! corral-scheduler: the global scheduling loop.
//!
//! Every cycle the `GlobalScheduler` pulls NEW requests from the state
//! store, persists them as QUEUED, registers them with the synchronizer's
//! live set, then asks a `PlacementStrategy` for assignments and hands the
//! placed containers to a `Dispatcher`.
//!
//! # Architecture
//!
//! ```text
//! GlobalScheduler
//!   ├── StateStore        (read NEW requests, write QUEUED + container hostnames)
//!   ├── SharedState       (register live requests, snapshot alive hosts)
//!   ├── PlacementStrategy (pure: hosts × pending → assignments)
//!   └── Dispatcher        (per-host inbound queues)
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{CycleReport, GlobalScheduler};
