//! corral-cluster: the controller's authoritative view of the cluster.
//!
//! Holds the host directory and the live request set behind one lock, the
//! per-host inbound container queues, the transport seams between agents
//! and the controller, and the synchronizer loop that folds host reports
//! into cluster state.
//!
//! # Architecture
//!
//! ```text
//! HostAgent ──ReportSink──▶ mpsc<ReportEnvelope> ──▶ Synchronizer
//!                                                     ├── StateStore (host + container history,
//!                                                     │               request transitions)
//!                                                     └── ClusterState (RwLock)
//!                                                         ├── HostDirectory (hostname → Member)
//!                                                         └── LiveRequests  (reqid → status)
//!
//! GlobalScheduler ──Dispatcher──▶ HostQueues ──ContainerSource──▶ ContainerManager
//! ```

pub mod dispatch;
pub mod error;
pub mod membership;
pub mod request;
pub mod state;
pub mod synchronizer;
pub mod transport;

pub use dispatch::{Dispatcher, HostQueues};
pub use error::{ClusterError, ClusterResult, invariant_violation};
pub use membership::{HostDirectory, Liveness, Member};
pub use request::{LiveRequest, LiveRequests, Transition, advance};
pub use state::{ClusterState, SharedState};
pub use synchronizer::{ReportSummary, Synchronizer};
pub use transport::{
    ChannelReportSink, ContainerSource, QueueContainerSource, ReportEnvelope, ReportOutcome,
    ReportSink, outcome_to_result, report_channel,
};
