//! Actuator error types.

use swarmgrid_cluster::ClusterError;
use swarmgrid_state::StateError;
use thiserror::Error;

pub type ActuatorResult<T> = Result<T, ActuatorError>;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("orchestration failed while {context}: {source}")]
    Orchestration {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no host available for {0}")]
    NoPlacement(String),
}

pub(crate) fn orchestration(context: impl Into<String>) -> impl FnOnce(anyhow::Error) -> ActuatorError {
    let context = context.into();
    move |source| ActuatorError::Orchestration { context, source }
}
