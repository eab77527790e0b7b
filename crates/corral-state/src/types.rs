//! Domain types for the Corral cluster.
//!
//! These types are shared by the controller and the host agents: a `Host`
//! is both the agent's local view and the report it ships to the
//! synchronizer. All types are serializable to/from JSON for storage in redb
//! tables and for transport.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique name of a compute host.
pub type Hostname = String;

/// Unique identifier of a client request.
pub type RequestId = String;

/// Container name, unique within a host (and, in practice, cluster-wide).
pub type ContainerName = String;

// ── Container ─────────────────────────────────────────────────────

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Created,
    Active,
    Finished,
    Failed,
}

impl ContainerStatus {
    /// Finished or failed; the container will never run again.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Resources reserved for a container while it is active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub cores: u32,
    pub memory_bytes: u64,
}

impl Reservation {
    pub fn new(cores: u32, memory_bytes: u64) -> Self {
        Self {
            cores,
            memory_bytes,
        }
    }
}

impl Reservation {
    /// Sum of two reservations, `None` if either resource overflows.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Reservation {
            cores: self.cores.checked_add(rhs.cores)?,
            memory_bytes: self.memory_bytes.checked_add(rhs.memory_bytes)?,
        })
    }
}

/// Saturating: an overflowed total is larger than any host.
impl std::ops::Add for Reservation {
    type Output = Reservation;

    fn add(self, rhs: Self) -> Self::Output {
        Reservation {
            cores: self.cores.saturating_add(rhs.cores),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

/// A schedulable unit of work belonging to exactly one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: ContainerName,
    pub request_id: RequestId,
    pub status: ContainerStatus,
    /// Owning host; `None` until the global scheduler places it.
    pub hostname: Option<Hostname>,
    pub reservation: Reservation,
    /// Command line run by the process engine.
    #[serde(default)]
    pub command: Vec<String>,
    /// Unix millis when ingress created the container.
    pub created_at: u64,
    /// Unix millis since the container entered its host's inactive list.
    pub inactive_since: Option<u64>,
    /// Unix millis of the last status change (history key).
    pub updated_at: u64,
    /// Failed start attempts on the current host.
    #[serde(default)]
    pub start_attempts: u32,
}

impl Container {
    /// Build a freshly-created container for a request.
    pub fn new(
        name: impl Into<ContainerName>,
        request_id: impl Into<RequestId>,
        reservation: Reservation,
        created_at: u64,
    ) -> Self {
        Self {
            name: name.into(),
            request_id: request_id.into(),
            status: ContainerStatus::Created,
            hostname: None,
            reservation,
            command: Vec::new(),
            created_at,
            inactive_since: None,
            updated_at: created_at,
            start_attempts: 0,
        }
    }

    /// Change status and stamp the transition time.
    pub fn set_status(&mut self, status: ContainerStatus, at: u64) {
        self.status = status;
        self.updated_at = at;
    }

    /// Build the key for the container history tables.
    pub fn history_key(&self) -> String {
        history_key(&self.name, self.updated_at)
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// Occupancy snapshot of a compute host.
///
/// Agents mutate their own copy and ship it whole; the synchronizer treats
/// every received snapshot as the new truth for that hostname.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub hostname: Hostname,
    pub total_cores: u32,
    pub available_cores: u32,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// Container name → core indices claimed by it.
    pub core_allocation: BTreeMap<ContainerName, Vec<u32>>,
    pub active: Vec<Container>,
    /// Containers not yet started, or finished and awaiting pruning.
    pub inactive: Vec<Container>,
    /// Unix millis when this snapshot was taken.
    pub reported_at: u64,
}

impl Host {
    /// An empty host with all resources available.
    pub fn new(hostname: impl Into<Hostname>, total_cores: u32, total_memory_bytes: u64) -> Self {
        Self {
            hostname: hostname.into(),
            total_cores,
            available_cores: total_cores,
            total_memory_bytes,
            available_memory_bytes: total_memory_bytes,
            core_allocation: BTreeMap::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            reported_at: 0,
        }
    }

    /// Active containers followed by inactive ones.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.active.iter().chain(self.inactive.iter())
    }

    /// Total number of cores currently claimed in the allocation map.
    pub fn allocated_cores(&self) -> u32 {
        self.core_allocation.values().map(|c| c.len() as u32).sum()
    }

    /// Build the key for the host history table.
    pub fn history_key(&self) -> String {
        history_key(&self.hostname, self.reported_at)
    }
}

// ── Request ───────────────────────────────────────────────────────

/// Client-visible lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    New,
    Queued,
    Running,
    Finished,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A unit of client work composed of one or more containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub status: RequestStatus,
    /// Names of the request's containers, in declaration order.
    pub containers: Vec<ContainerName>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, containers: Vec<ContainerName>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            status: RequestStatus::New,
            containers,
            created_at,
            updated_at: created_at,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────

/// `{identity}:{timestamp}` with the timestamp zero-padded to sort lexically.
pub fn history_key(identity: &str, at: u64) -> String {
    format!("{identity}:{at:020}")
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
