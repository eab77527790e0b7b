//! Cluster state synchronizer: the global monitor.
//!
//! Blocks on the report channel. For every report it:
//!
//! 1. persists the host snapshot and its history entry,
//! 2. persists each container's history and canonical status,
//! 3. upserts the host into the directory, and
//! 4. re-evaluates every live request, persisting only real transitions
//!    and retiring terminal requests.
//!
//! Steps 3 and 4 run under one write lock. Between reports a ticker marks
//! silent hosts unreachable.

use std::time::Duration;

use corral_state::{Host, Hostname, RequestId, StateStore, epoch_millis};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::request::Transition;
use crate::state::SharedState;
use crate::transport::{ReportEnvelope, ReportOutcome};

/// What a single report changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub hostname: Hostname,
    pub containers: usize,
    pub transitions: Vec<Transition>,
    /// Requests that reached a terminal state and left the live set.
    pub retired: Vec<RequestId>,
}

/// Folds host reports into the authoritative cluster view.
#[derive(Clone)]
pub struct Synchronizer {
    state: SharedState,
    store: StateStore,
}

impl Synchronizer {
    pub fn new(state: SharedState, store: StateStore) -> Self {
        Self { state, store }
    }

    /// Decode and apply one raw report.
    ///
    /// Undecodable or self-inconsistent payloads yield
    /// [`ClusterError::MalformedReport`] and change nothing.
    pub async fn process_report(&self, payload: &[u8]) -> ClusterResult<ReportSummary> {
        let host = decode_report(payload)?;
        let hostname = host.hostname.clone();

        // Steps 1-2: durable history and canonical container status.
        self.store.publish_host(&hostname, &host)?;
        for container in host.containers() {
            self.store.publish_container_history(container)?;
            self.store.update_container_status(container)?;
        }
        let containers = host.containers().count();

        // Steps 3-4: one critical section.
        let mut state = self.state.write().await;
        for container in host.containers() {
            if state.requests.contains(&container.request_id) {
                state
                    .container_status
                    .insert(container.name.clone(), container.status);
            }
        }
        state.hosts.upsert(host, epoch_millis());

        let mut applied = Vec::new();
        for transition in state.requests.pending_transitions(&state.container_status) {
            match self
                .store
                .update_request_status(&transition.request_id, transition.to)
            {
                Ok(changed) => {
                    if !changed {
                        debug!(request_id = %transition.request_id, status = %transition.to, "request status already stored");
                    }
                    state.requests.apply(&transition);
                    info!(
                        request_id = %transition.request_id,
                        from = %transition.from,
                        to = %transition.to,
                        "request advanced"
                    );
                    applied.push(transition);
                }
                Err(e) => {
                    warn!(request_id = %transition.request_id, error = %e, "failed to persist request transition");
                }
            }
        }

        let retired = state.requests.compact();
        state.forget(&retired);
        drop(state);

        for request in &retired {
            info!(request_id = %request.id, status = %request.status, "request retired");
        }

        Ok(ReportSummary {
            hostname,
            containers,
            transitions: applied,
            retired: retired.into_iter().map(|r| r.id).collect(),
        })
    }

    /// Mark hosts that stopped reporting as unreachable.
    pub async fn check_liveness(&self) -> Vec<Hostname> {
        self.state.write().await.hosts.mark_unreachable(epoch_millis())
    }

    /// Apply one envelope and answer its ack.
    pub async fn handle(&self, envelope: ReportEnvelope) {
        let outcome = match self.process_report(&envelope.payload).await {
            Ok(summary) => {
                debug!(
                    hostname = %summary.hostname,
                    containers = summary.containers,
                    transitions = summary.transitions.len(),
                    "report applied"
                );
                ReportOutcome::Applied
            }
            Err(ClusterError::MalformedReport(reason)) => {
                warn!(%reason, "discarding malformed report");
                ReportOutcome::Discarded(reason)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(error = %e, "report not fully applied");
                } else {
                    error!(error = %e, "report processing failed");
                }
                ReportOutcome::Failed(e.to_string())
            }
        };
        if let Some(ack) = envelope.ack {
            // The sender may have given up waiting.
            let _ = ack.send(outcome);
        }
    }

    /// Run until shutdown or until every report sender is gone.
    pub async fn run(
        self,
        mut reports: mpsc::Receiver<ReportEnvelope>,
        liveness_every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // `interval` panics on a zero period.
        let liveness_every = liveness_every.max(Duration::from_millis(1));
        let mut liveness = tokio::time::interval(liveness_every);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(?liveness_every, "synchronizer started");

        loop {
            tokio::select! {
                maybe = reports.recv() => {
                    match maybe {
                        Some(envelope) => self.handle(envelope).await,
                        None => {
                            info!("report channel closed, synchronizer stopping");
                            break;
                        }
                    }
                }
                _ = liveness.tick() => {
                    let marked = self.check_liveness().await;
                    if !marked.is_empty() {
                        debug!(?marked, "liveness check marked hosts");
                    }
                }
                _ = shutdown.changed() => {
                    info!("synchronizer shutting down");
                    break;
                }
            }
        }
    }
}

fn decode_report(payload: &[u8]) -> ClusterResult<Host> {
    let host: Host =
        serde_json::from_slice(payload).map_err(|e| ClusterError::MalformedReport(e.to_string()))?;
    if host.hostname.is_empty() {
        return Err(ClusterError::MalformedReport("empty hostname".into()));
    }
    if host.available_cores > host.total_cores
        || host.available_memory_bytes > host.total_memory_bytes
    {
        return Err(ClusterError::MalformedReport(format!(
            "host {} reports more available than total resources",
            host.hostname
        )));
    }
    Ok(host)
}
