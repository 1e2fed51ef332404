use swarmgrid_state::StateError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The live set could not be fetched.
    #[error("failed to list {what}: {source}")]
    Live {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub(crate) fn listing(what: &'static str) -> impl FnOnce(anyhow::Error) -> ReconcileError {
    move |source| ReconcileError::Live { what, source }
}
