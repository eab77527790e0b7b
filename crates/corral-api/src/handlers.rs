//! REST API handlers.
//!
//! Reads go straight to `StateStore` or the shared cluster view. Reports
//! are forwarded to the synchronizer and the response waits for its
//! verdict, so a 202 means the snapshot has been applied.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use corral_cluster::{Member, ReportEnvelope, ReportOutcome};
use corral_state::{Container, Request, Reservation, epoch_millis};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Host agents ────────────────────────────────────────────────

/// POST /api/v1/reports
pub async fn submit_report(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let (ack_tx, ack_rx) = oneshot::channel();
    let envelope = ReportEnvelope {
        payload: body.to_vec(),
        ack: Some(ack_tx),
    };
    if state.reports.send(envelope).await.is_err() {
        return error_response("synchronizer is not running", StatusCode::SERVICE_UNAVAILABLE)
            .into_response();
    }
    match ack_rx.await {
        Ok(ReportOutcome::Applied) => {
            (StatusCode::ACCEPTED, ApiResponse::ok(ReportOutcome::Applied)).into_response()
        }
        Ok(ReportOutcome::Discarded(reason)) => {
            error_response(&reason, StatusCode::BAD_REQUEST).into_response()
        }
        Ok(ReportOutcome::Failed(reason)) => {
            error_response(&reason, StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
        Err(_) => error_response("report dropped without ack", StatusCode::SERVICE_UNAVAILABLE)
            .into_response(),
    }
}

/// POST /api/v1/hosts/{hostname}/containers/drain
///
/// Answers with a bare JSON array; the agent client decodes it directly.
pub async fn drain_containers(
    State(state): State<ApiState>,
    Path(hostname): Path<String>,
) -> impl IntoResponse {
    let containers = state.queues.drain(&hostname);
    if !containers.is_empty() {
        debug!(%hostname, count = containers.len(), "containers handed to host");
    }
    Json(containers)
}

/// GET /api/v1/hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    let cluster = state.cluster.read().await;
    let members: Vec<Member> = cluster.hosts.members().cloned().collect();
    ApiResponse::ok(members)
}

// ── Requests ───────────────────────────────────────────────────

/// Upper bound on the cores a single container may reserve.
pub const MAX_CORES_PER_CONTAINER: u32 = 1024;

/// One container of a submitted request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerSpec {
    /// Defaults to `{request_id}-{index}`.
    #[serde(default)]
    pub name: Option<String>,
    pub cores: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub command: Vec<String>,
}

/// Request submission body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub containers: Vec<ContainerSpec>,
}

/// A request with its containers.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request: Request,
    pub containers: Vec<Container>,
}

/// GET /api/v1/requests
pub async fn list_requests(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_requests() {
        Ok(requests) => ApiResponse::ok(requests).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/requests/{id}
pub async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let request = match state.store.get_request(&id) {
        Ok(Some(request)) => request,
        Ok(None) => return error_response("request not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => return internal(e),
    };
    match state.store.list_containers_for_request(&id) {
        Ok(containers) => ApiResponse::ok(RequestDetail {
            request,
            containers,
        })
        .into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/requests
///
/// Containers are written before the NEW request that names them, so the
/// scheduler never sees a request whose containers are missing.
pub async fn create_request(
    State(state): State<ApiState>,
    Json(body): Json<CreateRequest>,
) -> impl IntoResponse {
    if body.containers.is_empty() {
        return error_response("a request needs at least one container", StatusCode::BAD_REQUEST)
            .into_response();
    }
    if let Some(spec) = body.containers.iter().find(|c| c.cores == 0) {
        let msg = format!(
            "container {} must reserve at least one core",
            spec.name.as_deref().unwrap_or("<unnamed>")
        );
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }
    if let Some(spec) = body.containers.iter().find(|c| c.cores > MAX_CORES_PER_CONTAINER) {
        let msg = format!(
            "container {} reserves {} cores, the limit is {MAX_CORES_PER_CONTAINER}",
            spec.name.as_deref().unwrap_or("<unnamed>"),
            spec.cores
        );
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }

    let now = epoch_millis();
    let id = body.id.unwrap_or_else(|| {
        let seq = state.next_id.fetch_add(1, Ordering::Relaxed);
        format!("req-{now}-{seq}")
    });
    match state.store.get_request(&id) {
        Ok(Some(_)) => {
            return error_response("request already exists", StatusCode::CONFLICT).into_response();
        }
        Ok(None) => {}
        Err(e) => return internal(e),
    }

    let containers: Vec<Container> = body
        .containers
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let name = spec.name.unwrap_or_else(|| format!("{id}-{i}"));
            let mut container =
                Container::new(name, id.as_str(), Reservation::new(spec.cores, spec.memory_bytes), now);
            container.command = spec.command;
            container
        })
        .collect();

    let mut seen = HashSet::with_capacity(containers.len());
    if let Some(dup) = containers.iter().find(|c| !seen.insert(c.name.as_str())) {
        let msg = format!("container name {} appears more than once", dup.name);
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }
    for container in &containers {
        match state.store.get_container(&container.name) {
            Ok(Some(_)) => {
                let msg = format!("container {} already exists", container.name);
                return error_response(&msg, StatusCode::CONFLICT).into_response();
            }
            Ok(None) => {}
            Err(e) => return internal(e),
        }
    }
    if let Err(e) = state.store.put_containers(&containers) {
        warn!(request = %id, error = %e, "failed to store containers");
        return internal(e);
    }

    let request = Request::new(
        id.as_str(),
        containers.iter().map(|c| c.name.clone()).collect(),
        now,
    );
    match state.store.put_request(&request) {
        Ok(()) => {
            info!(request = %id, containers = containers.len(), "request accepted");
            (StatusCode::CREATED, ApiResponse::ok(request)).into_response()
        }
        Err(e) => internal(e),
    }
}
