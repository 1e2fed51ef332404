//! Contracts the control loop consumes from the outside world.
//!
//! Every collaborator is an `async_trait` object held as `Arc<dyn Trait>`.
//! Implementations return `anyhow::Result` so they can attach their own
//! context; the core wraps failures into its typed errors.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use swarmgrid_state::{Field, HostAddress, NodeRole};

use crate::types::*;

/// Source of live metric values.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current value of `field` for the target, if the source has one.
    async fn value(&self, target: &MetricTarget, field: &Field) -> anyhow::Result<Option<f64>>;

    /// Reference a percentage-mode threshold is relative to (e.g. total RAM).
    async fn reference(&self, target: &MetricTarget, field: &Field)
    -> anyhow::Result<Option<f64>>;
}

/// Container orchestration engine (cluster membership and containers).
#[async_trait]
pub trait ContainerOrchestrationClient: Send + Sync {
    async fn launch(&self, host: &HostAddress, spec: &ServiceSpec) -> anyhow::Result<LiveContainer>;

    /// Stop and remove a container. The engine is per-host, hence the host.
    async fn stop(&self, host: &HostAddress, container_id: &str) -> anyhow::Result<()>;

    /// Containers across the cluster carrying every label in `filter`.
    async fn list_by_labels(
        &self,
        filter: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<LiveContainer>>;

    async fn list_nodes(&self) -> anyhow::Result<Vec<LiveNode>>;

    async fn inspect_node(&self, node_id: &str) -> anyhow::Result<Option<LiveNode>>;

    /// Run the cluster-init primitive on `host`, returning its raw output.
    async fn init_cluster(&self, host: &HostAddress) -> anyhow::Result<String>;

    async fn join_token(&self, role: NodeRole) -> anyhow::Result<String>;

    /// Join `host` to the cluster. Returns the new node id.
    async fn join_cluster(&self, host: &HostAddress, spec: &JoinSpec) -> anyhow::Result<String>;

    async fn leave_cluster(&self, host: &HostAddress, force: bool) -> anyhow::Result<()>;

    async fn membership(&self, host: &HostAddress) -> anyhow::Result<LocalMembership>;

    /// Replace a node's spec. `version` must be the engine's current one.
    async fn update_node(&self, node_id: &str, version: u64, spec: &NodeSpec)
    -> anyhow::Result<()>;

    async fn remove_node(&self, node_id: &str, force: bool) -> anyhow::Result<()>;

    async fn create_network(&self, host: &HostAddress, name: &str) -> anyhow::Result<()>;
}

/// Cloud provider instance management.
#[async_trait]
pub trait CloudProviderClient: Send + Sync {
    async fn list_instances(&self) -> anyhow::Result<Vec<CloudInstance>>;
    async fn create_instance(&self, request: &InstanceRequest) -> anyhow::Result<CloudInstance>;
    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<()>;
    async fn stop_instance(&self, instance_id: &str) -> anyhow::Result<()>;
    async fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}

/// Remote command execution on hosts.
///
/// Transport failures are errors; a command that ran and failed is an
/// `Ok(ExecResult)` with a non-zero exit code.
#[async_trait]
pub trait RemoteExecutionClient: Send + Sync {
    async fn run(
        &self,
        host: &HostAddress,
        credentials: &Credentials,
        command: &str,
        wait: bool,
    ) -> anyhow::Result<ExecResult>;

    async fn upload(
        &self,
        host: &HostAddress,
        credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> anyhow::Result<()>;
}

/// Recent request-origin histogram of a node: service name to request count.
#[async_trait]
pub trait RequestLocationSource: Send + Sync {
    async fn location_requests(&self, node: &HostAddress) -> anyhow::Result<HashMap<String, u64>>;
}
