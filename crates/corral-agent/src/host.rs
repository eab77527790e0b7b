//! Local host model: the agent's own view of its host.
//!
//! Tracks which containers are active or waiting, which physical cores each
//! active container holds, and what is left for new work. Both agent loops
//! mutate the same `LocalHost` through [`SharedHost`], one iteration at a
//! time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use corral_state::{Container, ContainerName, ContainerStatus, Host, Reservation};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::runtime::ContainerRuntime;

/// Host model shared by the monitor and the container manager.
pub type SharedHost = Arc<Mutex<LocalHost>>;

/// A host's containers and resource bookkeeping.
#[derive(Debug)]
pub struct LocalHost {
    host: Host,
    /// Arrived containers whose runtime `create` has not succeeded yet.
    uncreated: HashSet<ContainerName>,
    /// Failed start attempts per waiting container.
    start_attempts: HashMap<ContainerName, u32>,
    /// Containers finalized since the last `take_finalized` call.
    finalized: Vec<ContainerName>,
    /// `reported_at` of the last snapshot the controller acknowledged.
    last_reported_at: Option<u64>,
}

impl LocalHost {
    pub fn new(hostname: impl Into<String>, total_cores: u32, total_memory_bytes: u64) -> Self {
        Self {
            host: Host::new(hostname, total_cores, total_memory_bytes),
            uncreated: HashSet::new(),
            start_attempts: HashMap::new(),
            finalized: Vec::new(),
            last_reported_at: None,
        }
    }

    pub fn shared(self) -> SharedHost {
        Arc::new(Mutex::new(self))
    }

    pub fn hostname(&self) -> &str {
        &self.host.hostname
    }

    /// Read-only view of the underlying host record.
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn knows(&self, name: &str) -> bool {
        self.host.containers().any(|c| c.name == name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.host.active.iter().any(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.host.containers().find(|c| c.name == name)
    }

    /// Cores and memory not held by active containers.
    pub fn free(&self) -> Reservation {
        let held = self
            .host
            .active
            .iter()
            .fold(0u64, |acc, c| acc + c.reservation.memory_bytes);
        Reservation {
            cores: self.host.total_cores.saturating_sub(self.host.allocated_cores()),
            memory_bytes: self.host.total_memory_bytes.saturating_sub(held),
        }
    }

    /// Take ownership of a newly arrived container.
    ///
    /// `created` records whether the runtime already prepared it.
    pub fn admit(&mut self, mut container: Container, created: bool, now: u64) {
        container.status = ContainerStatus::Created;
        container.hostname = Some(self.host.hostname.clone());
        container.inactive_since = Some(now);
        if !created {
            self.uncreated.insert(container.name.clone());
        }
        info!(container = %container.name, request_id = %container.request_id, "container admitted");
        self.host.inactive.push(container);
    }

    pub fn needs_create(&self, name: &str) -> bool {
        self.uncreated.contains(name)
    }

    pub fn mark_created(&mut self, name: &str) {
        self.uncreated.remove(name);
    }

    /// Waiting containers in start order: earliest arrival first, then name.
    pub fn start_queue(&self) -> Vec<Container> {
        let mut waiting: Vec<Container> = self
            .host
            .inactive
            .iter()
            .filter(|c| c.status == ContainerStatus::Created)
            .cloned()
            .collect();
        waiting.sort_by(|a, b| {
            a.inactive_since
                .cmp(&b.inactive_since)
                .then_with(|| a.name.cmp(&b.name))
        });
        waiting
    }

    pub fn has_waiting(&self) -> bool {
        self.host
            .inactive
            .iter()
            .any(|c| c.status == ContainerStatus::Created)
    }

    /// Claim the `count` lowest-numbered unclaimed cores for `name`.
    ///
    /// Returns `None` (and claims nothing) if not enough cores are free or
    /// `name` already holds cores.
    pub fn reserve_cores(&mut self, name: &str, count: u32) -> Option<Vec<u32>> {
        if self.host.core_allocation.contains_key(name) {
            return None;
        }
        let claimed: BTreeSet<u32> = self
            .host
            .core_allocation
            .values()
            .flatten()
            .copied()
            .collect();
        let cores: Vec<u32> = (0..self.host.total_cores)
            .filter(|c| !claimed.contains(c))
            .take(count as usize)
            .collect();
        if cores.len() < count as usize {
            return None;
        }
        self.host
            .core_allocation
            .insert(name.to_string(), cores.clone());
        Some(cores)
    }

    pub fn release_cores(&mut self, name: &str) {
        self.host.core_allocation.remove(name);
    }

    /// CREATED → ACTIVE for a container whose cores are already reserved.
    pub fn activate(&mut self, name: &str, now: u64) -> bool {
        let Some(idx) = self.host.inactive.iter().position(|c| c.name == name) else {
            return false;
        };
        let mut container = self.host.inactive.remove(idx);
        container.set_status(ContainerStatus::Active, now);
        container.inactive_since = None;
        self.start_attempts.remove(name);
        self.uncreated.remove(name);
        self.host.active.push(container);
        true
    }

    /// Count a failed start (or create) attempt, returning the new total.
    pub fn record_start_failure(&mut self, name: &str) -> u32 {
        let attempts = self.start_attempts.entry(name.to_string()).or_insert(0);
        *attempts += 1;
        let total = *attempts;
        if let Some(c) = self.host.inactive.iter_mut().find(|c| c.name == name) {
            c.start_attempts = total;
        }
        total
    }

    /// Give up on a waiting container.
    pub fn fail_waiting(&mut self, name: &str, now: u64) {
        if let Some(c) = self.host.inactive.iter_mut().find(|c| c.name == name) {
            c.set_status(ContainerStatus::Failed, now);
            c.inactive_since = Some(now);
            self.finalized.push(name.to_string());
        }
        self.start_attempts.remove(name);
        self.uncreated.remove(name);
        self.release_cores(name);
    }

    /// Pull fresh status for every active container from the runtime.
    ///
    /// Terminated containers move to the inactive list and free their
    /// cores. A container the runtime does not know is treated as FAILED.
    /// Returns the containers finalized by this call.
    pub fn refresh_containers(&mut self, runtime: &dyn ContainerRuntime, now: u64) -> Vec<ContainerName> {
        let mut done = Vec::new();
        for container in &self.host.active {
            match runtime.status(&container.name) {
                Ok(Some(status)) if status.is_final() => done.push((container.name.clone(), status)),
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(container = %container.name, "runtime lost track of container");
                    done.push((container.name.clone(), ContainerStatus::Failed));
                }
                Err(e) => warn!(container = %container.name, error = %e, "status query failed"),
            }
        }

        let mut names = Vec::with_capacity(done.len());
        for (name, status) in done {
            let Some(idx) = self.host.active.iter().position(|c| c.name == name) else {
                continue;
            };
            let mut container = self.host.active.remove(idx);
            container.set_status(status, now);
            container.inactive_since = Some(now);
            self.host.core_allocation.remove(&name);
            info!(container = %name, ?status, "container terminated");
            self.host.inactive.push(container);
            self.finalized.push(name.clone());
            names.push(name);
        }
        names
    }

    /// Recompute advertised availability and stamp the snapshot time.
    pub fn refresh_occupancy(&mut self, now: u64) {
        let free = self.free();
        self.host.available_cores = free.cores;
        self.host.available_memory_bytes = free.memory_bytes;
        self.host.reported_at = now;
    }

    /// Copy of the host record for reporting.
    pub fn snapshot(&self) -> Host {
        self.host.clone()
    }

    /// Containers finalized since the previous call.
    pub fn take_finalized(&mut self) -> Vec<ContainerName> {
        std::mem::take(&mut self.finalized)
    }

    /// The controller acknowledged a snapshot taken at `reported_at`.
    pub fn mark_reported(&mut self, reported_at: u64) {
        self.last_reported_at = Some(reported_at);
    }

    /// Drop finalized containers that have been reported and have been
    /// inactive for at least `retention`.
    pub fn remove_finished(&mut self, now: u64, retention: Duration) -> Vec<Container> {
        let Some(reported) = self.last_reported_at else {
            return Vec::new();
        };
        let retention = retention.as_millis() as u64;
        let (removed, kept): (Vec<Container>, Vec<Container>) =
            std::mem::take(&mut self.host.inactive)
                .into_iter()
                .partition(|c| {
                    c.status.is_final()
                        && c.updated_at <= reported
                        && now.saturating_sub(c.inactive_since.unwrap_or(c.updated_at)) >= retention
                });
        self.host.inactive = kept;
        for c in &removed {
            debug!(container = %c.name, status = ?c.status, "finalized container pruned");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SimulatedRuntime;

    fn container(name: &str, cores: u32, mem: u64) -> Container {
        Container::new(name, "r1", Reservation::new(cores, mem), 0)
    }

    fn started(host: &mut LocalHost, name: &str, now: u64) -> Vec<u32> {
        let cores = host
            .reserve_cores(name, host.get(name).unwrap().reservation.cores)
            .unwrap();
        assert!(host.activate(name, now));
        cores
    }

    #[test]
    fn cores_are_allocated_lowest_first() {
        let mut host = LocalHost::new("h1", 4, 1024);
        host.admit(container("a", 2, 10), true, 1);
        host.admit(container("b", 1, 10), true, 2);
        host.admit(container("c", 1, 10), true, 3);

        assert_eq!(started(&mut host, "a", 5), vec![0, 1]);
        assert_eq!(started(&mut host, "b", 5), vec![2]);
        host.release_cores("a");
        assert_eq!(started(&mut host, "c", 5), vec![0]);
    }

    #[test]
    fn reserve_refuses_overcommit() {
        let mut host = LocalHost::new("h1", 2, 1024);
        host.admit(container("a", 2, 10), true, 1);
        host.admit(container("b", 1, 10), true, 1);
        started(&mut host, "a", 2);

        assert!(host.reserve_cores("b", 1).is_none());
        assert!(host.host().allocated_cores() <= host.host().total_cores);
    }

    #[test]
    fn free_accounts_for_active_only() {
        let mut host = LocalHost::new("h1", 4, 1000);
        host.admit(container("a", 1, 300), true, 1);
        host.admit(container("b", 1, 300), true, 1);
        started(&mut host, "a", 2);

        assert_eq!(host.free(), Reservation::new(3, 700));
    }

    #[test]
    fn start_queue_is_arrival_ordered() {
        let mut host = LocalHost::new("h1", 4, 1000);
        host.admit(container("late", 1, 1), true, 20);
        host.admit(container("b-early", 1, 1), true, 10);
        host.admit(container("a-early", 1, 1), true, 10);

        let order: Vec<String> = host.start_queue().into_iter().map(|c| c.name).collect();
        assert_eq!(order, vec!["a-early", "b-early", "late"]);
    }

    #[test]
    fn refresh_moves_terminated_containers_and_frees_cores() {
        let runtime = SimulatedRuntime::new(Duration::ZERO);
        let mut host = LocalHost::new("h1", 2, 1000);
        let c = container("a", 2, 100);
        runtime.create(&c).unwrap();
        host.admit(c.clone(), true, 1);
        let cores = started(&mut host, "a", 2);
        runtime.start(&c, &cores).unwrap();

        let done = host.refresh_containers(&runtime, 3);

        assert_eq!(done, vec!["a".to_string()]);
        assert!(host.host().active.is_empty());
        assert_eq!(host.host().allocated_cores(), 0);
        let finished = host.get("a").unwrap();
        assert_eq!(finished.status, ContainerStatus::Finished);
        assert_eq!(finished.inactive_since, Some(3));
        assert_eq!(host.take_finalized(), vec!["a".to_string()]);
        assert!(host.take_finalized().is_empty());
    }

    #[test]
    fn unknown_to_runtime_counts_as_failed() {
        let runtime = SimulatedRuntime::new(Duration::ZERO);
        let mut host = LocalHost::new("h1", 2, 1000);
        host.admit(container("ghost", 1, 1), true, 1);
        started(&mut host, "ghost", 2);

        host.refresh_containers(&runtime, 3);
        assert_eq!(host.get("ghost").unwrap().status, ContainerStatus::Failed);
    }

    #[test]
    fn remove_finished_waits_for_report_and_retention() {
        let runtime = SimulatedRuntime::new(Duration::ZERO);
        let mut host = LocalHost::new("h1", 2, 1000);
        let c = container("a", 1, 1);
        runtime.create(&c).unwrap();
        host.admit(c.clone(), true, 1);
        started(&mut host, "a", 2);
        runtime.start(&c, &[0]).unwrap();
        host.refresh_containers(&runtime, 100);

        let retention = Duration::from_millis(50);
        // Never reported.
        assert!(host.remove_finished(1_000, retention).is_empty());

        host.mark_reported(100);
        // Reported, but not yet past retention.
        assert!(host.remove_finished(120, retention).is_empty());

        let removed = host.remove_finished(150, retention);
        assert_eq!(removed.len(), 1);
        assert!(!host.knows("a"));
    }

    #[test]
    fn fail_waiting_finalizes_container() {
        let mut host = LocalHost::new("h1", 2, 1000);
        host.admit(container("a", 1, 1), false, 1);
        assert!(host.needs_create("a"));
        assert_eq!(host.record_start_failure("a"), 1);
        assert_eq!(host.record_start_failure("a"), 2);

        host.fail_waiting("a", 9);
        let c = host.get("a").unwrap();
        assert_eq!(c.status, ContainerStatus::Failed);
        assert_eq!(c.start_attempts, 2);
        assert!(!host.has_waiting());
        assert!(!host.needs_create("a"));
    }
}
