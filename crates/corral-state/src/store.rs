//! StateStore: redb-backed durable store for Corral.
//!
//! Implements the durable-store contract used by the control loops: request
//! and container records, host snapshots, and the append-only history
//! streams. Every write is an idempotent upsert. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Wrap a backend error message in the named `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            REQUESTS,
            CONTAINERS,
            CONTAINER_HISTORY,
            LOCAL_CONTAINER_HISTORY,
            HOSTS,
            HOST_HISTORY,
        ] {
            txn.open_table(table).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Insert or replace a request record.
    pub fn put_request(&self, request: &Request) -> StateResult<()> {
        self.put_json(REQUESTS, &request.id, request)?;
        debug!(request_id = %request.id, status = %request.status, "request stored");
        Ok(())
    }

    /// Get a request by ID.
    pub fn get_request(&self, id: &str) -> StateResult<Option<Request>> {
        self.get_json(REQUESTS, id)
    }

    /// List all requests.
    pub fn list_requests(&self) -> StateResult<Vec<Request>> {
        self.scan_all(REQUESTS)
    }

    /// All requests still in `NEW`, oldest first.
    pub fn get_new_requests(&self) -> StateResult<Vec<Request>> {
        let mut requests: Vec<Request> = self
            .list_requests()?
            .into_iter()
            .filter(|r| r.status == RequestStatus::New)
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    /// Set a request's status. Returns true if the stored status changed.
    ///
    /// Read-modify-write inside one transaction; writing the status a request
    /// already has is a no-op.
    pub fn update_request_status(&self, id: &str, status: RequestStatus) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let changed;
        {
            let mut table = txn.open_table(REQUESTS).map_err(map_err!(Storage))?;
            let mut request: Request = match table.get(id).map_err(map_err!(Storage))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?
                }
                None => return Err(StateError::request_not_found(id)),
            };
            changed = request.status != status;
            if changed {
                let old = request.status;
                request.status = status;
                request.updated_at = epoch_millis();
                let value = serde_json::to_vec(&request).map_err(map_err!(Encode))?;
                table.insert(id, value.as_slice()).map_err(map_err!(Storage))?;
                debug!(request_id = %id, %old, new = %status, "request status updated");
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(changed)
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Insert or replace a canonical container record.
    pub fn put_container(&self, container: &Container) -> StateResult<()> {
        self.put_json(CONTAINERS, &container.name, container)
    }

    /// Write several container records in one transaction; either all of
    /// them land or none do.
    pub fn put_containers(&self, containers: &[Container]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Storage))?;
            for container in containers {
                let value = serde_json::to_vec(container).map_err(map_err!(Encode))?;
                table
                    .insert(container.name.as_str(), value.as_slice())
                    .map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    /// Get a container's canonical record by name.
    pub fn get_container(&self, name: &str) -> StateResult<Option<Container>> {
        self.get_json(CONTAINERS, name)
    }

    /// Containers of a request, in the request's declared order.
    ///
    /// Names without a canonical record are skipped.
    pub fn list_containers_for_request(&self, request_id: &str) -> StateResult<Vec<Container>> {
        let request = self
            .get_request(request_id)?
            .ok_or_else(|| StateError::request_not_found(request_id))?;
        let mut containers = Vec::with_capacity(request.containers.len());
        for name in &request.containers {
            if let Some(container) = self.get_container(name)? {
                containers.push(container);
            }
        }
        Ok(containers)
    }

    /// Upsert a container's canonical status (last writer wins).
    ///
    /// Returns true if the stored status differed from the incoming one.
    pub fn update_container_status(&self, container: &Container) -> StateResult<bool> {
        let previous = self.get_container(&container.name)?;
        self.put_json(CONTAINERS, &container.name, container)?;
        Ok(previous.is_none_or(|p| p.status != container.status))
    }

    /// Append a controller-side history record for a container.
    pub fn publish_container_history(&self, container: &Container) -> StateResult<()> {
        self.put_json(CONTAINER_HISTORY, &container.history_key(), container)
    }

    /// Append an agent-side history record for a container.
    pub fn publish_local_container_history(&self, container: &Container) -> StateResult<()> {
        self.put_json(LOCAL_CONTAINER_HISTORY, &container.history_key(), container)
    }

    /// Controller-side history of a container, oldest first.
    pub fn list_container_history(&self, name: &str, limit: usize) -> StateResult<Vec<Container>> {
        self.scan_history(CONTAINER_HISTORY, name, limit)
    }

    /// Agent-side history of a container, oldest first.
    pub fn list_local_container_history(
        &self,
        name: &str,
        limit: usize,
    ) -> StateResult<Vec<Container>> {
        self.scan_history(LOCAL_CONTAINER_HISTORY, name, limit)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Record a host snapshot: latest view plus a history entry keyed by
    /// `{hostname}:{reported_at}`. Both writes share one transaction.
    pub fn publish_host(&self, hostname: &str, snapshot: &Host) -> StateResult<()> {
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Encode))?;
        let history_key = history_key(hostname, snapshot.reported_at);
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut latest = txn.open_table(HOSTS).map_err(map_err!(Storage))?;
            latest
                .insert(hostname, value.as_slice())
                .map_err(map_err!(Storage))?;
            let mut history = txn.open_table(HOST_HISTORY).map_err(map_err!(Storage))?;
            history
                .insert(history_key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    /// Latest stored snapshot of a host.
    pub fn get_host(&self, hostname: &str) -> StateResult<Option<Host>> {
        self.get_json(HOSTS, hostname)
    }

    /// Historical snapshots of a host, oldest first.
    pub fn list_host_history(&self, hostname: &str, limit: usize) -> StateResult<Vec<Host>> {
        self.scan_history(HOST_HISTORY, hostname, limit)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Storage))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(table).map_err(map_err!(Storage))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan_all<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(table).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Decode))?);
        }
        Ok(results)
    }

    /// History records of one identity, oldest first.
    ///
    /// Seeks to `{identity}:` and stops at the first key past it. Keys of
    /// other identities that share the prefix (`c1:x:...` for `c1`) are
    /// skipped because their suffix is not a bare timestamp.
    fn scan_history<T: DeserializeOwned>(
        &self,
        table: Table,
        identity: &str,
        limit: usize,
    ) -> StateResult<Vec<T>> {
        let prefix = format!("{identity}:");
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(table).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Storage))? {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let Some(suffix) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            if !is_timestamp(suffix) {
                continue;
            }
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Decode))?);
        }
        Ok(results)
    }
}

/// The zero-padded timestamp part of a history key.
fn is_timestamp(suffix: &str) -> bool {
    suffix.len() == 20 && suffix.bytes().all(|b| b.is_ascii_digit())
}
