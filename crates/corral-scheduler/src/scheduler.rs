//! Global scheduler: turns NEW requests into dispatched containers.
//!
//! The scheduler owns the pending set: requests that are QUEUED but not yet
//! placed. Unplaced requests are retried every cycle from memory; they are
//! never re-read from the store, which only hands out NEW requests.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use corral_cluster::{Dispatcher, SharedState, invariant_violation};
use corral_placement::{Assignment, PendingRequest, PlacementStrategy};
use corral_state::{Container, RequestId, RequestStatus, StateStore};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerResult;

/// What one scheduling cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Requests moved from NEW to QUEUED this cycle.
    pub queued: Vec<RequestId>,
    /// Assignments that were dispatched.
    pub placed: Vec<Assignment>,
    /// Requests still waiting for a host.
    pub pending: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.placed.is_empty()
    }
}

/// The global scheduling loop.
pub struct GlobalScheduler<P, D> {
    store: StateStore,
    state: SharedState,
    strategy: P,
    dispatcher: D,
    pending: BTreeMap<RequestId, PendingRequest>,
}

impl<P: PlacementStrategy, D: Dispatcher> GlobalScheduler<P, D> {
    pub fn new(store: StateStore, state: SharedState, strategy: P, dispatcher: D) -> Self {
        Self {
            store,
            state,
            strategy,
            dispatcher,
            pending: BTreeMap::new(),
        }
    }

    /// Requests queued but not yet placed.
    pub fn pending(&self) -> impl Iterator<Item = &RequestId> {
        self.pending.keys()
    }

    /// Rebuild in-memory state after a controller restart.
    ///
    /// QUEUED and RUNNING requests go back into the live set with their
    /// containers' last stored statuses. QUEUED requests with no placed
    /// container return to the pending set.
    pub async fn recover(&mut self) -> SchedulerResult<usize> {
        let mut recovered = 0;
        for request in self.store.list_requests()? {
            if !matches!(request.status, RequestStatus::Queued | RequestStatus::Running) {
                continue;
            }
            let containers = self.store.list_containers_for_request(&request.id)?;
            {
                let mut state = self.state.write().await;
                state.track_request(&request);
                for c in &containers {
                    state.container_status.insert(c.name.clone(), c.status);
                }
            }
            if request.status == RequestStatus::Queued
                && containers.iter().all(|c| c.hostname.is_none())
            {
                self.pending.insert(
                    request.id.clone(),
                    PendingRequest {
                        request_id: request.id.clone(),
                        created_at: request.created_at,
                        containers,
                    },
                );
            }
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, pending = self.pending.len(), "scheduler state recovered");
        }
        Ok(recovered)
    }

    /// Run one scheduling cycle.
    pub async fn run_cycle(&mut self) -> SchedulerResult<CycleReport> {
        let mut report = CycleReport {
            queued: self.queue_new_requests().await?,
            ..Default::default()
        };

        if !self.pending.is_empty() {
            report.placed = self.place_pending().await;
        }
        report.pending = self.pending.len();
        Ok(report)
    }

    /// NEW → QUEUED, persisted before the request becomes placeable.
    async fn queue_new_requests(&mut self) -> SchedulerResult<Vec<RequestId>> {
        let mut queued = Vec::new();
        for mut request in self.store.get_new_requests()? {
            let containers = self.store.list_containers_for_request(&request.id)?;
            if containers.len() != request.containers.len() {
                warn!(
                    request_id = %request.id,
                    expected = request.containers.len(),
                    found = containers.len(),
                    "request containers not stored yet, leaving NEW"
                );
                continue;
            }

            self.store
                .update_request_status(&request.id, RequestStatus::Queued)?;
            request.status = RequestStatus::Queued;
            self.state.write().await.track_request(&request);
            info!(request_id = %request.id, containers = containers.len(), "request queued");

            self.pending.insert(
                request.id.clone(),
                PendingRequest {
                    request_id: request.id.clone(),
                    created_at: request.created_at,
                    containers,
                },
            );
            queued.push(request.id);
        }
        Ok(queued)
    }

    /// Invoke the strategy once and dispatch whatever it placed.
    async fn place_pending(&mut self) -> Vec<Assignment> {
        let hosts = self.state.read().await.hosts.alive_hosts();
        let candidates: Vec<PendingRequest> = self.pending.values().cloned().collect();
        let assignments = self.strategy.assign(&hosts, &candidates);

        let alive: HashSet<&str> = hosts.iter().map(|h| h.hostname.as_str()).collect();
        let mut placed = Vec::new();
        let mut seen = HashSet::new();

        for assignment in assignments {
            if !alive.contains(assignment.hostname.as_str()) {
                invariant_violation(&format!(
                    "assignment of {} targets unknown host {}",
                    assignment.request_id, assignment.hostname
                ));
                continue;
            }
            if !seen.insert(assignment.request_id.clone()) {
                invariant_violation(&format!("request {} assigned twice", assignment.request_id));
                continue;
            }
            let Some(request) = self.pending.get(&assignment.request_id) else {
                invariant_violation(&format!(
                    "assignment for request {} that is not pending",
                    assignment.request_id
                ));
                continue;
            };

            let containers: Vec<Container> = request
                .containers
                .iter()
                .cloned()
                .map(|mut c| {
                    c.hostname = Some(assignment.hostname.clone());
                    c
                })
                .collect();

            // Record the owner before handing the containers out: recovery
            // treats a container with a hostname as dispatched.
            if let Err(e) = self.store.put_containers(&containers) {
                warn!(
                    request_id = %assignment.request_id,
                    hostname = %assignment.hostname,
                    error = %e,
                    "failed to record container host, request stays pending"
                );
                continue;
            }
            if let Err(e) = self.dispatcher.dispatch(&assignment.hostname, containers.clone()) {
                warn!(
                    request_id = %assignment.request_id,
                    hostname = %assignment.hostname,
                    error = %e,
                    "dispatch failed, request stays pending"
                );
                if let Err(e) = self.store.put_containers(&request.containers) {
                    error!(
                        request_id = %assignment.request_id,
                        error = %e,
                        "failed to clear container host after dispatch failure"
                    );
                }
                continue;
            }

            self.pending.remove(&assignment.request_id);
            info!(
                request_id = %assignment.request_id,
                hostname = %assignment.hostname,
                containers = containers.len(),
                "request dispatched"
            );
            placed.push(assignment);
        }
        placed
    }

    /// Run cycles on a fixed interval until shutdown.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, "global scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => debug!(
                            queued = report.queued.len(),
                            placed = report.placed.len(),
                            pending = report.pending,
                            "scheduling cycle complete"
                        ),
                        Err(e) => error!(error = %e, "scheduling cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("global scheduler shutting down");
                    break;
                }
            }
        }
    }
}
