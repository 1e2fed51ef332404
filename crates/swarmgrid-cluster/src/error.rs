//! Cluster error types.

use swarmgrid_state::StateError;
use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// A call to the orchestration engine failed.
    #[error("orchestration failed while {context}: {source}")]
    Orchestration {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unrecognized cluster-init output: {0}")]
    InitOutput(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("cluster has no leader")]
    NoLeader,
}

impl ClusterError {
    pub fn is_stale_version(&self) -> bool {
        matches!(self, ClusterError::State(StateError::StaleVersion { .. }))
    }
}

/// Map an orchestration failure into a [`ClusterError`] with context.
pub(crate) fn orchestration(context: impl Into<String>) -> impl FnOnce(anyhow::Error) -> ClusterError {
    let context = context.into();
    move |source| ClusterError::Orchestration { context, source }
}
