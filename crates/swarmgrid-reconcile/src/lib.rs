//! swarmgrid-reconcile: periodic drift correction.
//!
//! Three independent reconcilers diff a live set against the persisted
//! one: cloud instances, managed containers and swarm nodes. Each pass:
//!
//! 1. Snapshot the configuring markers; marked entities are skipped in
//!    both directions.
//! 2. Insert live entities that are not persisted.
//! 3. Delete persisted entities that are no longer live.
//! 4. Update persisted entities whose observable state changed.
//!
//! A pass with no upstream change writes nothing. The [`Runner`] drives a
//! reconciler on its own timer and swallows failed passes.

pub mod cloud_hosts;
pub mod containers;
pub mod error;
pub mod nodes;
pub mod runner;

use async_trait::async_trait;

pub use cloud_hosts::CloudHostReconciler;
pub use containers::ContainerReconciler;
pub use error::{ReconcileError, ReconcileResult};
pub use nodes::NodeReconciler;
pub use runner::Runner;

/// What one pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Entities left alone because they are configuring.
    pub skipped: usize,
}

impl ReconcileReport {
    /// True when the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run one pass.
    async fn reconcile(&self) -> ReconcileResult<ReconcileReport>;
}
