//! swarmgrid-remote: concrete collaborators for a docker swarm over SSH.
//!
//! - [`SshExecutor`] runs commands through the system `ssh`/`scp` with a
//!   hard timeout.
//! - [`DockerCli`] drives the docker engine of each host over a
//!   [`RemoteExecutionClient`](swarmgrid_core::RemoteExecutionClient).
//! - [`PrometheusMetrics`] and [`HttpLocations`] read the per-node
//!   monitors over plain HTTP/1.

pub mod docker;
pub mod error;
pub mod http;
pub mod locations;
pub mod prometheus;
pub mod ssh;

pub use docker::{CREATED_LABEL, DockerCli, SERVICE_LABEL};
pub use error::{RemoteError, RemoteResult};
pub use locations::HttpLocations;
pub use prometheus::PrometheusMetrics;
pub use ssh::{SshExecutor, shell_quote};
