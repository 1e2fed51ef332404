use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The transport itself failed (ssh exit 255, scp failure).
    #[error("{program} to {host} failed: {stderr}")]
    Transport {
        program: String,
        host: String,
        stderr: String,
    },

    #[error("`{command}` on {host} exited with {exit_code}: {stderr}")]
    Command {
        command: String,
        host: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("http request to {uri} failed: {reason}")]
    Http { uri: String, reason: String },

    #[error("http request to {uri} timed out")]
    HttpTimeout { uri: String },

    #[error("unexpected response from {source_name}: {reason}")]
    Decode {
        source_name: String,
        reason: String,
    },

    #[error("no manager host known for cluster-wide commands")]
    NoManager,
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
