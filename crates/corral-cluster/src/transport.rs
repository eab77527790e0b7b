//! Transport seams between host agents and the controller.
//!
//! Agents push host reports through a [`ReportSink`] and pull newly placed
//! containers from a [`ContainerSource`]. The in-process implementations
//! here wire agents straight to the synchronizer's report channel and the
//! scheduler's host queues; `corral-agent` provides the HTTP ones.

use std::future::Future;
use std::sync::Arc;

use corral_state::{Container, Host};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::HostQueues;
use crate::error::{ClusterError, ClusterResult};

/// How the synchronizer disposed of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ReportOutcome {
    Applied,
    /// Undecodable or inconsistent; dropped without effect.
    Discarded(String),
    /// Decoded but not fully applied; the next report retries it.
    Failed(String),
}

/// A raw report on its way to the synchronizer.
#[derive(Debug)]
pub struct ReportEnvelope {
    /// JSON-encoded [`Host`] snapshot.
    pub payload: Vec<u8>,
    /// Where to send the outcome, if the sender is waiting for one.
    pub ack: Option<oneshot::Sender<ReportOutcome>>,
}

/// Create the channel feeding the synchronizer.
pub fn report_channel(
    capacity: usize,
) -> (mpsc::Sender<ReportEnvelope>, mpsc::Receiver<ReportEnvelope>) {
    mpsc::channel(capacity)
}

/// Outbound path for host snapshots.
pub trait ReportSink: Send + Sync {
    fn send_report(&self, host: &Host) -> impl Future<Output = ClusterResult<()>> + Send;
}

/// Inbound path for containers placed on a host.
pub trait ContainerSource: Send + Sync {
    /// Take every pending container for `hostname`; may be empty.
    fn receive_containers(
        &self,
        hostname: &str,
    ) -> impl Future<Output = ClusterResult<Vec<Container>>> + Send;
}

/// Sends reports over the in-process report channel and awaits the ack.
#[derive(Debug, Clone)]
pub struct ChannelReportSink {
    tx: mpsc::Sender<ReportEnvelope>,
}

impl ChannelReportSink {
    pub fn new(tx: mpsc::Sender<ReportEnvelope>) -> Self {
        Self { tx }
    }
}

impl ReportSink for ChannelReportSink {
    async fn send_report(&self, host: &Host) -> ClusterResult<()> {
        let payload =
            serde_json::to_vec(host).map_err(|e| ClusterError::MalformedReport(e.to_string()))?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ReportEnvelope {
                payload,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| ClusterError::TransportClosed("report channel closed".into()))?;
        outcome_to_result(
            ack_rx
                .await
                .map_err(|_| ClusterError::TransportClosed("report dropped without ack".into()))?,
        )
    }
}

/// Map a synchronizer outcome onto the sender's result.
pub fn outcome_to_result(outcome: ReportOutcome) -> ClusterResult<()> {
    match outcome {
        ReportOutcome::Applied => Ok(()),
        ReportOutcome::Discarded(reason) => Err(ClusterError::Rejected(reason)),
        ReportOutcome::Failed(reason) => Err(ClusterError::Transport(reason)),
    }
}

/// Drains the scheduler's host queues directly.
#[derive(Debug, Clone)]
pub struct QueueContainerSource {
    queues: Arc<HostQueues>,
}

impl QueueContainerSource {
    pub fn new(queues: Arc<HostQueues>) -> Self {
        Self { queues }
    }
}

impl ContainerSource for QueueContainerSource {
    async fn receive_containers(&self, hostname: &str) -> ClusterResult<Vec<Container>> {
        Ok(self.queues.drain(hostname))
    }
}
