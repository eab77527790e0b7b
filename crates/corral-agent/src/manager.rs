//! Container manager: the per-host placement loop.
//!
//! Each pass refreshes container state, takes ownership of containers the
//! controller placed here, and starts waiting containers in arrival order
//! while cores and (policy-shaped) memory last. The first waiting container
//! that does not fit blocks the ones behind it.

use std::sync::Arc;
use std::time::Duration;

use corral_cluster::ContainerSource;
use corral_state::{Container, ContainerName, epoch_millis};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cooldown::Cooldown;
use crate::error::{AgentResult, RuntimeError};
use crate::host::{LocalHost, SharedHost};
use crate::policy::AdmissionPolicy;
use crate::runtime::ContainerRuntime;

/// What one manager pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerPass {
    pub arrived: usize,
    /// Arrivals held back because their name is in cooldown.
    pub deferred: usize,
    pub started: Vec<ContainerName>,
    /// Containers that exhausted their start attempts.
    pub failed: Vec<ContainerName>,
}

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Local placement loop for one host.
pub struct ContainerManager<S> {
    host: SharedHost,
    runtime: Arc<dyn ContainerRuntime>,
    policy: Box<dyn AdmissionPolicy>,
    source: S,
    cooldown: Cooldown,
    deferred: Vec<Container>,
    max_start_attempts: u32,
}

impl<S: ContainerSource> ContainerManager<S> {
    pub fn new(
        host: SharedHost,
        runtime: Arc<dyn ContainerRuntime>,
        policy: Box<dyn AdmissionPolicy>,
        source: S,
    ) -> Self {
        Self {
            host,
            runtime,
            policy,
            source,
            cooldown: Cooldown::new(DEFAULT_COOLDOWN),
            deferred: Vec::new(),
            max_start_attempts: 3,
        }
    }

    /// Start attempts before a container is declared FAILED (minimum 1).
    pub fn with_max_start_attempts(mut self, attempts: u32) -> Self {
        self.max_start_attempts = attempts.max(1);
        self
    }

    /// How long a finalized name is held back before it may arrive again.
    pub fn with_cooldown(mut self, period: Duration) -> Self {
        self.cooldown = Cooldown::new(period);
        self
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    /// Run one placement pass.
    pub async fn run_once(&mut self) -> AgentResult<ManagerPass> {
        let hostname = self.host.lock().await.hostname().to_string();
        let arrivals = match self.source.receive_containers(&hostname).await {
            Ok(arrivals) => arrivals,
            Err(e) => {
                warn!(%hostname, error = %e, "could not fetch placed containers");
                Vec::new()
            }
        };

        let now = epoch_millis();
        let mut pass = ManagerPass {
            arrived: arrivals.len(),
            ..Default::default()
        };
        let mut host = self.host.lock().await;

        host.refresh_containers(self.runtime.as_ref(), now);
        self.cooldown.evict_expired(&host, now);
        for name in host.take_finalized() {
            self.cooldown.insert(name, now);
        }

        let held = std::mem::take(&mut self.deferred);
        for container in held.into_iter().chain(arrivals) {
            if self.cooldown.contains(&container.name) {
                debug!(container = %container.name, "name in cooldown, arrival deferred");
                self.deferred.push(container);
                continue;
            }
            if host.knows(&container.name) {
                warn!(container = %container.name, "duplicate container arrival ignored");
                continue;
            }
            let created = match self.runtime.create(&container) {
                Ok(()) => true,
                Err(e) => {
                    warn!(container = %container.name, error = %e, "create failed, will retry");
                    false
                }
            };
            host.admit(container, created, now);
        }

        pass.deferred = self.deferred.len();

        let free = host.free();
        let shaped = self
            .policy
            .shape_free_memory(host.host(), free.memory_bytes)
            .min(free.memory_bytes);
        debug!(
            %hostname,
            free_cores = free.cores,
            free_memory = free.memory_bytes,
            shaped_memory = shaped,
            "local placement"
        );
        if shaped == 0 || free.cores == 0 || !host.has_waiting() {
            return Ok(pass);
        }

        let mut memory_left = shaped;
        for container in host.start_queue() {
            let need = container.reservation;
            if need.memory_bytes > memory_left || need.cores > host.free().cores {
                debug!(container = %container.name, ?need, memory_left, "head of line does not fit");
                break;
            }

            if host.needs_create(&container.name) {
                match self.runtime.create(&container) {
                    Ok(()) => host.mark_created(&container.name),
                    Err(e) => {
                        self.record_failure(&mut host, &container.name, &e, now, &mut pass);
                        continue;
                    }
                }
            }

            let Some(cores) = host.reserve_cores(&container.name, need.cores) else {
                break;
            };
            match self.runtime.start(&container, &cores) {
                Ok(()) => {
                    host.activate(&container.name, now);
                    memory_left -= need.memory_bytes;
                    info!(container = %container.name, ?cores, "container started");
                    pass.started.push(container.name);
                }
                Err(e) => {
                    host.release_cores(&container.name);
                    self.record_failure(&mut host, &container.name, &e, now, &mut pass);
                }
            }
        }
        Ok(pass)
    }

    fn record_failure(
        &self,
        host: &mut LocalHost,
        name: &str,
        err: &RuntimeError,
        now: u64,
        pass: &mut ManagerPass,
    ) {
        let attempts = host.record_start_failure(name);
        if attempts >= self.max_start_attempts {
            warn!(container = %name, attempts, error = %err, "giving up on container");
            host.fail_waiting(name, now);
            pass.failed.push(name.to_string());
        } else {
            warn!(container = %name, attempts, error = %err, "start failed, container stays inactive");
        }
    }

    /// Run passes on a fixed interval until shutdown.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, "container manager started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.run_once().await {
                        Ok(pass) => {
                            if pass.arrived > 0 || !pass.started.is_empty() || !pass.failed.is_empty() {
                                debug!(
                                    arrived = pass.arrived,
                                    started = pass.started.len(),
                                    failed = pass.failed.len(),
                                    "manager pass complete"
                                );
                            }
                        }
                        Err(e) if e.is_transient() => warn!(error = %e, "manager pass failed"),
                        Err(e) => error!(error = %e, "manager pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("container manager shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_cluster::{Dispatcher, HostQueues, QueueContainerSource};
    use corral_state::{Container, ContainerStatus, Reservation};

    use crate::policy::{Headroom, Unshaped};
    use crate::runtime::SimulatedRuntime;

    const MB: u64 = 1024 * 1024;

    struct Fixture {
        host: SharedHost,
        queues: Arc<HostQueues>,
        runtime: Arc<SimulatedRuntime>,
    }

    fn fixture(cores: u32, run_for: Duration) -> Fixture {
        Fixture {
            host: LocalHost::new("h1", cores, 1024 * MB).shared(),
            queues: Arc::new(HostQueues::new()),
            runtime: Arc::new(SimulatedRuntime::new(run_for)),
        }
    }

    impl Fixture {
        fn manager(&self) -> ContainerManager<QueueContainerSource> {
            ContainerManager::new(
                self.host.clone(),
                self.runtime.clone(),
                Box::new(Unshaped),
                QueueContainerSource::new(self.queues.clone()),
            )
        }

        fn place(&self, name: &str, cores: u32, mem_mb: u64) {
            self.queues
                .dispatch(
                    "h1",
                    vec![Container::new(name, "r1", Reservation::new(cores, mem_mb * MB), 0)],
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn arrivals_are_created_and_started() {
        let f = fixture(4, Duration::from_secs(3600));
        f.place("c1", 1, 64);
        let mut manager = f.manager();

        let pass = manager.run_once().await.unwrap();

        assert_eq!(pass.arrived, 1);
        assert_eq!(pass.started, vec!["c1".to_string()]);
        assert_eq!(f.runtime.created(), vec!["c1".to_string()]);
        let host = f.host.lock().await;
        assert!(host.is_active("c1"));
        assert_eq!(host.host().core_allocation["c1"], vec![0]);
    }

    #[tokio::test]
    async fn no_free_core_starts_nothing_then_earliest_starts_first() {
        let f = fixture(1, Duration::from_secs(3600));
        f.place("blocker", 1, 64);
        let mut manager = f.manager();
        manager.run_once().await.unwrap();

        f.place("first", 1, 64);
        let pass = manager.run_once().await.unwrap();
        f.place("second", 1, 64);
        let pass2 = manager.run_once().await.unwrap();
        assert!(pass.started.is_empty());
        assert!(pass2.started.is_empty());

        // Free the only core.
        {
            let mut host = f.host.lock().await;
            host.release_cores("blocker");
        }
        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.started, vec!["first".to_string()]);

        let host = f.host.lock().await;
        assert!(host.host().allocated_cores() <= host.host().total_cores);
        assert_eq!(host.start_queue()[0].name, "second");
    }

    #[tokio::test]
    async fn large_head_of_line_blocks_smaller_followers() {
        let f = fixture(4, Duration::from_secs(3600));
        f.place("big", 8, 64);
        let mut manager = f.manager();
        manager.run_once().await.unwrap();
        f.place("small", 1, 64);

        let pass = manager.run_once().await.unwrap();
        assert!(pass.started.is_empty());
    }

    #[tokio::test]
    async fn start_failures_retry_then_fail() {
        let f = fixture(2, Duration::from_secs(3600));
        f.runtime.fail_start("flaky");
        f.place("flaky", 1, 64);
        let mut manager = f.manager().with_max_start_attempts(2);

        let pass = manager.run_once().await.unwrap();
        assert!(pass.failed.is_empty());
        assert_eq!(f.host.lock().await.get("flaky").unwrap().status, ContainerStatus::Created);

        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.failed, vec!["flaky".to_string()]);
        let host = f.host.lock().await;
        assert_eq!(host.get("flaky").unwrap().status, ContainerStatus::Failed);
        assert_eq!(host.host().allocated_cores(), 0);
    }

    /// Run "quick" to completion, then drop it from the host as the
    /// monitor would after reporting it.
    async fn finish_and_prune(f: &Fixture, manager: &mut ContainerManager<QueueContainerSource>) {
        f.place("quick", 1, 64);
        manager.run_once().await.unwrap();
        manager.run_once().await.unwrap();
        let mut host = f.host.lock().await;
        host.mark_reported(u64::MAX);
        host.remove_finished(u64::MAX, Duration::ZERO);
        assert!(!host.knows("quick"));
    }

    #[tokio::test]
    async fn rearriving_name_is_held_during_cooldown() {
        let f = fixture(2, Duration::ZERO);
        let mut manager = f.manager().with_cooldown(Duration::from_secs(3600));
        finish_and_prune(&f, &mut manager).await;
        assert!(manager.cooldown().contains("quick"));

        f.place("quick", 1, 64);
        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.arrived, 1);
        assert_eq!(pass.deferred, 1);
        assert!(pass.started.is_empty());
        assert!(!f.host.lock().await.knows("quick"));

        // Still held on the following pass without being placed again.
        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.deferred, 1);
        assert!(!f.host.lock().await.knows("quick"));
    }

    #[tokio::test]
    async fn rearriving_name_is_admitted_after_cooldown() {
        let f = fixture(2, Duration::ZERO);
        let mut manager = f.manager().with_cooldown(Duration::ZERO);
        finish_and_prune(&f, &mut manager).await;

        f.place("quick", 1, 64);
        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.deferred, 0);
        assert_eq!(pass.started, vec!["quick".to_string()]);
        assert!(manager.cooldown().is_empty());
    }

    #[tokio::test]
    async fn policy_can_block_admission() {
        let f = fixture(2, Duration::from_secs(3600));
        f.place("c1", 1, 64);
        let mut manager = ContainerManager::new(
            f.host.clone(),
            f.runtime.clone(),
            Box::new(Headroom::new(1.0)),
            QueueContainerSource::new(f.queues.clone()),
        );

        let pass = manager.run_once().await.unwrap();
        assert_eq!(pass.arrived, 1);
        assert!(pass.started.is_empty());
        assert!(f.host.lock().await.has_waiting());
    }

    #[tokio::test]
    async fn duplicate_arrival_is_ignored() {
        let f = fixture(2, Duration::from_secs(3600));
        f.place("c1", 1, 64);
        let mut manager = f.manager();
        manager.run_once().await.unwrap();
        f.place("c1", 1, 64);

        manager.run_once().await.unwrap();
        let host = f.host.lock().await;
        assert_eq!(host.host().containers().filter(|c| c.name == "c1").count(), 1);
    }
}
