//! redb table definitions for the capscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Resource specs keyed by `{resource_id}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Resource status keyed by `{resource_id}`.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");

/// Utilization samples keyed by `{resource_id}:{epoch:020}`.
pub const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("samples");
