//! Host agent: the per-host monitoring loop.
//!
//! Each pass refreshes container status and host occupancy, writes a local
//! history record for every tracked container, ships the full snapshot to
//! the controller, and prunes finalized containers the controller has
//! already seen. A failed pass is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use corral_cluster::ReportSink;
use corral_state::{ContainerName, StateStore, epoch_millis};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::AgentResult;
use crate::host::SharedHost;
use crate::runtime::ContainerRuntime;

/// What one monitor pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorPass {
    pub reported_at: u64,
    pub containers: usize,
    pub pruned: Vec<ContainerName>,
}

/// Monitoring loop for one host.
pub struct HostAgent<R> {
    host: SharedHost,
    runtime: Arc<dyn ContainerRuntime>,
    sink: R,
    store: StateStore,
    retention: Duration,
}

impl<R: ReportSink> HostAgent<R> {
    pub fn new(
        host: SharedHost,
        runtime: Arc<dyn ContainerRuntime>,
        sink: R,
        store: StateStore,
        retention: Duration,
    ) -> Self {
        Self {
            host,
            runtime,
            sink,
            store,
            retention,
        }
    }

    /// Run one monitoring pass.
    pub async fn run_once(&self) -> AgentResult<MonitorPass> {
        let now = epoch_millis();
        let snapshot = {
            let mut host = self.host.lock().await;
            host.refresh_containers(self.runtime.as_ref(), now);
            host.refresh_occupancy(now);
            for container in host.host().containers() {
                if let Err(e) = self.store.publish_local_container_history(container) {
                    warn!(container = %container.name, error = %e, "failed to record local history");
                }
            }
            host.snapshot()
        };

        // The host lock is not held while the report is in flight.
        self.sink.send_report(&snapshot).await?;

        let pruned = {
            let mut host = self.host.lock().await;
            host.mark_reported(snapshot.reported_at);
            host.remove_finished(now, self.retention)
        };

        Ok(MonitorPass {
            reported_at: snapshot.reported_at,
            containers: snapshot.containers().count(),
            pruned: pruned.into_iter().map(|c| c.name).collect(),
        })
    }

    /// Run passes on a fixed interval until shutdown.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, retention = ?self.retention, "host agent started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.run_once().await {
                        Ok(pass) => debug!(
                            containers = pass.containers,
                            pruned = pass.pruned.len(),
                            "host reported"
                        ),
                        Err(e) if e.is_transient() => warn!(error = %e, "host report failed"),
                        Err(e) => error!(error = %e, "host report failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("host agent shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use corral_cluster::{ClusterError, ClusterResult};
    use corral_state::{Container, ContainerStatus, Host, Reservation};

    use crate::error::AgentError;
    use crate::host::LocalHost;
    use crate::runtime::SimulatedRuntime;

    #[derive(Clone, Default)]
    struct RecordingSink {
        reports: Arc<Mutex<Vec<Host>>>,
        down: Arc<AtomicBool>,
    }

    impl ReportSink for RecordingSink {
        async fn send_report(&self, host: &Host) -> ClusterResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ClusterError::Transport("controller unreachable".into()));
            }
            self.reports.lock().unwrap().push(host.clone());
            Ok(())
        }
    }

    fn agent_with_running(
        run_for: Duration,
        retention: Duration,
    ) -> (HostAgent<RecordingSink>, RecordingSink, SharedHost, StateStore) {
        let runtime = Arc::new(SimulatedRuntime::new(run_for));
        let mut local = LocalHost::new("h1", 2, 1024);
        let c = Container::new("c1", "r1", Reservation::new(1, 128), 0);
        runtime.create(&c).unwrap();
        local.admit(c.clone(), true, 0);
        let cores = local.reserve_cores("c1", 1).unwrap();
        runtime.start(&c, &cores).unwrap();
        local.activate("c1", 1);

        let host = local.shared();
        let sink = RecordingSink::default();
        let store = StateStore::open_in_memory().unwrap();
        let agent = HostAgent::new(host.clone(), runtime, sink.clone(), store.clone(), retention);
        (agent, sink, host, store)
    }

    #[tokio::test]
    async fn pass_reports_snapshot_and_local_history() {
        let (agent, sink, _host, store) =
            agent_with_running(Duration::from_secs(3600), Duration::ZERO);

        let pass = agent.run_once().await.unwrap();

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].hostname, "h1");
        assert_eq!(reports[0].available_cores, 1);
        assert_eq!(reports[0].available_memory_bytes, 1024 - 128);
        assert_eq!(pass.containers, 1);
        assert_eq!(store.list_local_container_history("c1", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_container_is_reported_before_pruning() {
        let (agent, sink, host, _store) = agent_with_running(Duration::ZERO, Duration::ZERO);

        let pass = agent.run_once().await.unwrap();

        let reports = sink.reports.lock().unwrap();
        let reported = &reports[0].inactive[0];
        assert_eq!(reported.status, ContainerStatus::Finished);
        assert_eq!(pass.pruned, vec!["c1".to_string()]);
        assert!(!host.lock().await.knows("c1"));
    }

    #[tokio::test]
    async fn failed_report_keeps_finished_containers() {
        let (agent, sink, host, _store) = agent_with_running(Duration::ZERO, Duration::ZERO);
        sink.down.store(true, Ordering::SeqCst);

        let err = agent.run_once().await.unwrap_err();
        assert!(matches!(err, AgentError::Cluster(_)));
        assert!(err.is_transient());
        assert!(host.lock().await.knows("c1"));

        sink.down.store(false, Ordering::SeqCst);
        let pass = agent.run_once().await.unwrap();
        assert_eq!(pass.pruned, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (agent, sink, _host, _store) =
            agent_with_running(Duration::from_secs(3600), Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(agent.run(Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!sink.reports.lock().unwrap().is_empty());
    }
}
