//! The controller's single-lock cluster view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corral_state::{ContainerName, ContainerStatus, Request};
use tokio::sync::RwLock;

use crate::membership::HostDirectory;
use crate::request::{LiveRequest, LiveRequests};

/// Host directory and live requests, guarded together.
///
/// The synchronizer holds the write lock across a host upsert and the
/// request re-evaluation that follows it, so two reports never race on the
/// same request.
#[derive(Debug)]
pub struct ClusterState {
    pub hosts: HostDirectory,
    pub requests: LiveRequests,
    /// Latest known status of every container of a live request.
    pub container_status: HashMap<ContainerName, ContainerStatus>,
}

pub type SharedState = Arc<RwLock<ClusterState>>;

impl ClusterState {
    pub fn new(host_timeout: Duration) -> Self {
        Self {
            hosts: HostDirectory::new(host_timeout),
            requests: LiveRequests::default(),
            container_status: HashMap::new(),
        }
    }

    pub fn shared(host_timeout: Duration) -> SharedState {
        Arc::new(RwLock::new(Self::new(host_timeout)))
    }

    /// Start tracking a queued request.
    pub fn track_request(&mut self, request: &Request) {
        self.requests.track(request);
    }

    /// Forget container statuses of requests that left the live set.
    pub fn forget(&mut self, retired: &[LiveRequest]) {
        for request in retired {
            for name in &request.containers {
                self.container_status.remove(name);
            }
        }
    }
}
