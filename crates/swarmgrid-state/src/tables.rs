//! redb table definitions for the SwarmGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shorthand for every table definition in the store.
pub type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Observable metric fields keyed by `{name}`.
pub const FIELDS: Table = TableDefinition::new("fields");

/// Conditions keyed by `{name}`.
pub const CONDITIONS: Table = TableDefinition::new("conditions");

/// Rules keyed by `{name}`.
pub const RULES: Table = TableDefinition::new("rules");

/// Decision events keyed by `{component}:{target}`.
pub const EVENTS: Table = TableDefinition::new("events");

/// Cluster nodes keyed by `{node_id}`.
pub const NODES: Table = TableDefinition::new("nodes");

/// Cloud hosts keyed by `{instance_id}`.
pub const CLOUD_HOSTS: Table = TableDefinition::new("cloud_hosts");

/// Managed containers keyed by `{container_id}`.
pub const CONTAINERS: Table = TableDefinition::new("containers");

/// Per-field monitoring history keyed by `{component}:{target}:{field}`.
pub const MONITORING: Table = TableDefinition::new("monitoring");

/// Simulated metrics keyed by `{name}`.
pub const SIMULATED_METRICS: Table = TableDefinition::new("simulated_metrics");

/// Decision records keyed by a zero-padded sequence number.
pub const DECISIONS: Table = TableDefinition::new("decisions");

/// Configuring markers keyed by `{entity_id}`.
pub const CONFIGURING: Table = TableDefinition::new("configuring");
