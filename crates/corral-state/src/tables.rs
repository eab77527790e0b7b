//! redb table definitions for the Corral state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! History keys follow the pattern `{identity}:{timestamp:020}`.

use redb::TableDefinition;

/// Requests keyed by `{request_id}`.
pub const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");

/// Canonical container records keyed by `{container_name}`.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Container history as seen by the controller, keyed by `{name}:{updated_at}`.
pub const CONTAINER_HISTORY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("container_history");

/// Container history as seen by a host agent, keyed by `{name}:{updated_at}`.
pub const LOCAL_CONTAINER_HISTORY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("local_container_history");

/// Latest host snapshot keyed by `{hostname}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Host snapshots keyed by `{hostname}:{reported_at}`.
pub const HOST_HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("host_history");
