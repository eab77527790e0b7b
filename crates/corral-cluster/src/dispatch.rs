//! Per-host inbound container queues.
//!
//! The scheduler enqueues every container of a placed request onto the
//! chosen host's queue in one step; the host's container manager drains
//! its queue, taking ownership of the specs exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use corral_state::{Container, ContainerName, Hostname};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

/// Delivers placed containers to a host.
pub trait Dispatcher: Send + Sync {
    /// Hand all `containers` to `hostname`, or none of them.
    fn dispatch(&self, hostname: &str, containers: Vec<Container>) -> ClusterResult<()>;
}

impl<T: Dispatcher + ?Sized> Dispatcher for Arc<T> {
    fn dispatch(&self, hostname: &str, containers: Vec<Container>) -> ClusterResult<()> {
        (**self).dispatch(hostname, containers)
    }
}

#[derive(Debug, Default)]
struct Queues {
    by_host: HashMap<Hostname, VecDeque<Container>>,
    queued: HashSet<ContainerName>,
}

/// In-memory FIFO queue per host.
#[derive(Debug, Default)]
pub struct HostQueues {
    inner: Mutex<Queues>,
}

impl HostQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every container queued for `hostname`, in arrival order.
    pub fn drain(&self, hostname: &str) -> Vec<Container> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let drained: Vec<Container> = inner
            .by_host
            .get_mut(hostname)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        for c in &drained {
            inner.queued.remove(&c.name);
        }
        if !drained.is_empty() {
            debug!(%hostname, count = drained.len(), "host queue drained");
        }
        drained
    }

    /// Number of containers waiting for `hostname`.
    pub fn queued_for(&self, hostname: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.by_host.get(hostname).map_or(0, VecDeque::len)
    }
}

impl Dispatcher for HostQueues {
    fn dispatch(&self, hostname: &str, containers: Vec<Container>) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let mut names = HashSet::with_capacity(containers.len());
        for c in &containers {
            if inner.queued.contains(&c.name) || !names.insert(c.name.as_str()) {
                return Err(ClusterError::AlreadyQueued(c.name.clone()));
            }
        }

        let count = containers.len();
        for c in &containers {
            inner.queued.insert(c.name.clone());
        }
        inner
            .by_host
            .entry(hostname.to_string())
            .or_default()
            .extend(containers);
        debug!(%hostname, count, "containers dispatched");
        Ok(())
    }
}
