//! swarmgrid-state: embedded state store for SwarmGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for the rule vocabulary (fields, conditions, rules), per-target
//! decision events, cluster nodes, cloud hosts, containers, monitoring
//! history, decision records, and configuring markers.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{component}:{target}`, `{component}:{target}:{field}`)
//! enable prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Node records are guarded by an
//! optimistic version token: an update presenting a stale version is
//! rejected with [`StateError::StaleVersion`].

pub mod configuring;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use configuring::{ConfiguringGuard, ConfiguringRegistry};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
