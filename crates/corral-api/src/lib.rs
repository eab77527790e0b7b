//! corral-api: REST API for the Corral controller.
//!
//! Host agents push reports and pull placed containers through this
//! surface; clients submit requests and inspect the cluster.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/reports` | Submit a host snapshot, answered once the synchronizer has handled it |
//! | POST | `/api/v1/hosts/{hostname}/containers/drain` | Take the containers placed on a host |
//! | GET | `/api/v1/hosts` | List hosts with liveness |
//! | GET | `/api/v1/requests` | List requests |
//! | POST | `/api/v1/requests` | Submit a request |
//! | GET | `/api/v1/requests/{id}` | Get a request and its containers |

pub mod handlers;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Router;
use axum::routing::{get, post};
use corral_cluster::{HostQueues, ReportEnvelope, SharedState};
use corral_state::StateStore;
use tokio::sync::mpsc;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub cluster: SharedState,
    pub queues: Arc<HostQueues>,
    pub reports: mpsc::Sender<ReportEnvelope>,
    /// Sequence for generated request ids.
    pub next_id: Arc<AtomicU64>,
}

impl ApiState {
    pub fn new(
        store: StateStore,
        cluster: SharedState,
        queues: Arc<HostQueues>,
        reports: mpsc::Sender<ReportEnvelope>,
    ) -> Self {
        Self {
            store,
            cluster,
            queues,
            reports,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Build the controller's API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/reports", post(handlers::submit_report))
        .route("/hosts", get(handlers::list_hosts))
        .route("/hosts/{hostname}/containers/drain", post(handlers::drain_containers))
        .route("/requests", get(handlers::list_requests).post(handlers::create_request))
        .route("/requests/{id}", get(handlers::get_request))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
