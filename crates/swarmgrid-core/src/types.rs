//! Wire-neutral types exchanged with the external collaborators.
//!
//! Live views (`LiveNode`, `LiveContainer`, `CloudInstance`) describe the
//! infrastructure as the authoritative source reports it; the persisted
//! counterparts live in `swarmgrid-state`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use swarmgrid_state::{
    CloudHost, ComponentType, Container, HostAddress, InstanceState, ManagerStatus, Node,
    NodeAvailability, NodeRole, NodeState, epoch_secs,
};

/// A node as reported by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveNode {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub role: NodeRole,
    pub availability: NodeAvailability,
    pub state: NodeState,
    pub manager_status: Option<ManagerStatus>,
    pub labels: BTreeMap<String, String>,
    /// The engine's own object version, required by engine-side updates.
    pub engine_version: u64,
}

impl LiveNode {
    /// Persisted form of this node. The store assigns the version.
    pub fn to_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            address: self.address.clone(),
            role: self.role,
            availability: self.availability,
            state: self.state,
            manager_status: self.manager_status.clone(),
            labels: self.labels.clone(),
            version: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.manager_status.as_ref().is_some_and(|s| s.leader)
    }
}

/// A container as reported by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub service_name: String,
    pub host: String,
    pub state: String,
    pub ports: BTreeMap<u16, u16>,
    pub labels: BTreeMap<String, String>,
    pub created_at: u64,
}

impl LiveContainer {
    pub fn to_container(&self) -> Container {
        Container {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            service_name: self.service_name.clone(),
            host: self.host.clone(),
            state: self.state.clone(),
            ports: self.ports.clone(),
            labels: self.labels.clone(),
            created_at: self.created_at,
        }
    }
}

/// A cloud-provider instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub state: InstanceState,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub region: Option<String>,
}

impl CloudInstance {
    pub fn to_cloud_host(&self) -> CloudHost {
        CloudHost {
            instance_id: self.instance_id.clone(),
            instance_type: self.instance_type.clone(),
            state: self.state,
            public_ip: self.public_ip.clone(),
            private_ip: self.private_ip.clone(),
            region: self.region.clone(),
            updated_at: epoch_secs(),
        }
    }
}

/// Request for a new cloud instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub instance_type: String,
    pub region: Option<String>,
}

/// What to launch when starting a container instance of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,
    pub image: String,
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Spec that recreates an existing container elsewhere.
    pub fn from_container(container: &Container) -> Self {
        Self {
            service_name: container.service_name.clone(),
            image: container.image.clone(),
            ports: container.ports.clone(),
            labels: container.labels.clone(),
            env: BTreeMap::new(),
        }
    }
}

/// Parameters for joining a host to the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub token: String,
    /// Address other nodes use to reach this one.
    pub advertise_addr: String,
    /// Local address the engine listens on.
    pub listen_addr: String,
    /// Managers to contact for the join.
    pub remote_addrs: Vec<String>,
}

/// Full desired spec for an engine-side node update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub role: NodeRole,
    pub availability: NodeAvailability,
    pub labels: BTreeMap<String, String>,
}

impl NodeSpec {
    pub fn of(node: &LiveNode) -> Self {
        Self {
            role: node.role,
            availability: node.availability,
            labels: node.labels.clone(),
        }
    }
}

/// The cluster membership as seen from one host's engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMembership {
    pub node_id: Option<String>,
    /// Engine-reported local node state ("active", "inactive", "pending", ...).
    pub state: String,
    pub is_manager: bool,
    /// Number of managers in the cluster, as known by this host.
    pub managers: u32,
}

impl LocalMembership {
    pub fn inactive() -> Self {
        Self {
            node_id: None,
            state: "inactive".to_string(),
            is_manager: false,
            managers: 0,
        }
    }

    pub fn is_member(&self) -> bool {
        self.state != "inactive"
    }
}

/// What a metric is being read for.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTarget {
    pub component_type: ComponentType,
    pub id: String,
    /// Host the metric is collected on.
    pub host: HostAddress,
}

/// SSH credentials for a remote host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub identity_file: Option<std::path::PathBuf>,
    pub port: Option<u16>,
}

/// Outcome of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Remote exit status; `-1` when the command timed out.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
