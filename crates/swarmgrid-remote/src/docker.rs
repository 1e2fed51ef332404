//! Container orchestration through the docker CLI, run over remote execution.
//!
//! Cluster-wide commands (node listing, join tokens, node updates) run on
//! a manager host. Per-host commands (`run`, `rm`, `swarm join`, `swarm
//! leave`) run on the host they concern. The manager is either configured
//! up front or becomes the host that initialized the swarm.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use swarmgrid_core::{
    ContainerOrchestrationClient, Credentials, ExecResult, JoinSpec, LiveContainer, LiveNode,
    LocalMembership, NodeSpec, RemoteExecutionClient, ServiceSpec,
};
use swarmgrid_state::{
    HostAddress, ManagerStatus, NodeAvailability, NodeRole, NodeState, epoch_secs,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{RemoteError, RemoteResult};
use crate::ssh::shell_quote;

/// Label carrying the service a container instantiates.
pub const SERVICE_LABEL: &str = "swarmgrid.service";
/// Label carrying the launch time in epoch seconds.
pub const CREATED_LABEL: &str = "swarmgrid.created-at";

const SWARM_PORT: u16 = 2377;

pub struct DockerCli {
    remote: Arc<dyn RemoteExecutionClient>,
    credentials: Credentials,
    docker: String,
    network: Option<String>,
    manager: RwLock<Option<HostAddress>>,
}

impl DockerCli {
    pub fn new(remote: Arc<dyn RemoteExecutionClient>, credentials: Credentials) -> Self {
        Self {
            remote,
            credentials,
            docker: "docker".to_string(),
            network: None,
            manager: RwLock::new(None),
        }
    }

    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    /// Attach launched containers to `network`.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_manager(mut self, host: HostAddress) -> Self {
        *self.manager.get_mut() = Some(host);
        self
    }

    pub async fn set_manager(&self, host: HostAddress) {
        *self.manager.write().await = Some(host);
    }

    async fn manager(&self) -> RemoteResult<HostAddress> {
        self.manager.read().await.clone().ok_or(RemoteError::NoManager)
    }

    async fn run(&self, host: &HostAddress, command: &str) -> anyhow::Result<ExecResult> {
        debug!(host = %host, command, "docker");
        self.remote.run(host, &self.credentials, command, true).await
    }

    /// Run `command` and return its stdout, failing on a non-zero exit.
    async fn exec(&self, host: &HostAddress, command: String) -> anyhow::Result<String> {
        let result = self.run(host, &command).await?;
        if !result.success() {
            return Err(RemoteError::Command {
                command,
                host: host.public_ip.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(result.stdout)
    }

    async fn inspect_containers(
        &self,
        host: &HostAddress,
        ids: &[String],
    ) -> anyhow::Result<Vec<LiveContainer>> {
        let stdout = self
            .exec(host, format!("{} inspect {}", self.docker, ids.join(" ")))
            .await?;
        Ok(parse_containers(&stdout, &host.public_ip)?)
    }
}

// ── docker JSON ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInspect {
    #[serde(rename = "ID")]
    id: String,
    version: ObjectVersion,
    spec: NodeInspectSpec,
    #[serde(default)]
    description: NodeDescription,
    status: NodeStatus,
    #[serde(default)]
    manager_status: Option<NodeManagerStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectVersion {
    index: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInspectSpec {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    role: NodeRole,
    availability: NodeAvailability,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeDescription {
    #[serde(default)]
    hostname: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeStatus {
    state: NodeState,
    #[serde(default)]
    addr: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeManagerStatus {
    #[serde(default)]
    leader: bool,
    #[serde(default)]
    reachability: String,
    #[serde(default)]
    addr: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmInfo {
    #[serde(rename = "NodeID", default)]
    node_id: String,
    #[serde(default)]
    local_node_state: String,
    #[serde(default)]
    control_available: bool,
    #[serde(default)]
    managers: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    config: ContainerConfig,
    state: ContainerStatus,
    #[serde(default)]
    host_config: Option<HostConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerStatus {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    #[serde(default)]
    port_bindings: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_port: String,
}

fn decode(what: &str, e: serde_json::Error) -> RemoteError {
    RemoteError::Decode {
        source_name: format!("docker {what}"),
        reason: e.to_string(),
    }
}

pub(crate) fn parse_nodes(json: &str) -> RemoteResult<Vec<LiveNode>> {
    let nodes: Vec<NodeInspect> =
        serde_json::from_str(json).map_err(|e| decode("node inspect", e))?;
    Ok(nodes.into_iter().map(into_live_node).collect())
}

fn into_live_node(node: NodeInspect) -> LiveNode {
    // Managers may report 0.0.0.0 as their status address.
    let address = match (&node.manager_status, node.status.addr.as_str()) {
        (Some(status), "" | "0.0.0.0") => status
            .addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| status.addr.clone()),
        _ => node.status.addr.clone(),
    };
    LiveNode {
        id: node.id,
        hostname: node.description.hostname,
        address,
        role: node.spec.role,
        availability: node.spec.availability,
        state: node.status.state,
        manager_status: node.manager_status.map(|s| ManagerStatus {
            leader: s.leader,
            reachability: s.reachability,
            addr: s.addr,
        }),
        labels: node.spec.labels.unwrap_or_default(),
        engine_version: node.version.index,
    }
}

pub(crate) fn parse_swarm_info(json: &str) -> RemoteResult<LocalMembership> {
    let info: SwarmInfo = serde_json::from_str(json.trim()).map_err(|e| decode("info", e))?;
    if info.local_node_state.is_empty() {
        return Ok(LocalMembership::inactive());
    }
    Ok(LocalMembership {
        node_id: (!info.node_id.is_empty()).then_some(info.node_id),
        state: info.local_node_state,
        is_manager: info.control_available,
        managers: info.managers,
    })
}

pub(crate) fn parse_containers(json: &str, host: &str) -> RemoteResult<Vec<LiveContainer>> {
    let containers: Vec<ContainerInspect> =
        serde_json::from_str(json).map_err(|e| decode("inspect", e))?;
    Ok(containers
        .into_iter()
        .map(|c| {
            let labels = c.config.labels.unwrap_or_default();
            let service_name = labels
                .get(SERVICE_LABEL)
                .cloned()
                .unwrap_or_else(|| service_of(&c.config.image));
            let created_at = labels
                .get(CREATED_LABEL)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let ports = c
                .host_config
                .and_then(|h| h.port_bindings)
                .map(|bindings| port_map(&bindings))
                .unwrap_or_default();
            LiveContainer {
                id: c.id,
                name: c.name.trim_start_matches('/').to_string(),
                image: c.config.image,
                service_name,
                host: host.to_string(),
                state: c.state.status,
                ports,
                labels,
                created_at,
            }
        })
        .collect())
}

/// Host port to container port.
fn port_map(bindings: &HashMap<String, Option<Vec<PortBinding>>>) -> BTreeMap<u16, u16> {
    let mut ports = BTreeMap::new();
    for (exposed, bound) in bindings {
        let Ok(container_port) = exposed.split('/').next().unwrap_or_default().parse::<u16>() else {
            continue;
        };
        for binding in bound.iter().flatten() {
            if let Ok(host_port) = binding.host_port.parse::<u16>() {
                ports.insert(host_port, container_port);
            }
        }
    }
    ports
}

/// Image name without registry, path or tag.
fn service_of(image: &str) -> String {
    let name = image.rsplit('/').next().unwrap_or(image);
    name.split([':', '@']).next().unwrap_or(name).to_string()
}

fn availability_arg(availability: NodeAvailability) -> &'static str {
    match availability {
        NodeAvailability::Active => "active",
        NodeAvailability::Pause => "pause",
        NodeAvailability::Drain => "drain",
    }
}

/// Address to reach `node` on, using `username` when the node has none recorded.
fn node_host(node: &LiveNode, username: &str) -> HostAddress {
    let mut host = node.to_node().host_address();
    if host.username.is_empty() {
        host.username = username.to_string();
    }
    host
}

#[async_trait]
impl ContainerOrchestrationClient for DockerCli {
    async fn launch(&self, host: &HostAddress, spec: &ServiceSpec) -> anyhow::Result<LiveContainer> {
        let mut labels = spec.labels.clone();
        labels.insert(SERVICE_LABEL.to_string(), spec.service_name.clone());
        labels.insert(CREATED_LABEL.to_string(), epoch_secs().to_string());

        let mut command = format!("{} run -d", self.docker);
        if let Some(network) = &self.network {
            command.push_str(&format!(" --network {}", shell_quote(network)));
        }
        for (key, value) in &labels {
            command.push_str(&format!(" --label {}", shell_quote(&format!("{key}={value}"))));
        }
        for (host_port, container_port) in &spec.ports {
            command.push_str(&format!(" -p {host_port}:{container_port}"));
        }
        for (key, value) in &spec.env {
            command.push_str(&format!(" -e {}", shell_quote(&format!("{key}={value}"))));
        }
        command.push_str(&format!(" {}", shell_quote(&spec.image)));

        let stdout = self.exec(host, command).await?;
        let id = stdout.trim().lines().next_back().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            anyhow::bail!("docker run on {host} printed no container id");
        }
        let container = self
            .inspect_containers(host, std::slice::from_ref(&id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("container {id} vanished after launch on {host}"))?;
        info!(service = %spec.service_name, container_id = %container.id, host = %host, "docker container started");
        Ok(container)
    }

    async fn stop(&self, host: &HostAddress, container_id: &str) -> anyhow::Result<()> {
        self.exec(host, format!("{} rm -f {}", self.docker, shell_quote(container_id)))
            .await?;
        Ok(())
    }

    async fn list_by_labels(
        &self,
        filter: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<LiveContainer>> {
        let manager = self.manager().await?;
        let filters: String = filter
            .iter()
            .map(|(k, v)| format!(" --filter {}", shell_quote(&format!("label={k}={v}"))))
            .collect();

        let mut containers = Vec::new();
        for node in self.list_nodes().await? {
            if node.state != NodeState::Ready {
                continue;
            }
            let host = node_host(&node, &manager.username);
            let stdout = self
                .exec(&host, format!("{} ps -q --no-trunc{filters}", self.docker))
                .await?;
            let ids: Vec<String> = stdout.split_whitespace().map(str::to_string).collect();
            if ids.is_empty() {
                continue;
            }
            containers.extend(self.inspect_containers(&host, &ids).await?);
        }
        Ok(containers)
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<LiveNode>> {
        let manager = self.manager().await?;
        let stdout = self
            .exec(&manager, format!("{} node ls -q", self.docker))
            .await?;
        let ids: Vec<&str> = stdout.split_whitespace().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let json = self
            .exec(&manager, format!("{} node inspect {}", self.docker, ids.join(" ")))
            .await?;
        Ok(parse_nodes(&json)?)
    }

    async fn inspect_node(&self, node_id: &str) -> anyhow::Result<Option<LiveNode>> {
        let manager = self.manager().await?;
        let command = format!("{} node inspect {}", self.docker, shell_quote(node_id));
        let result = self.run(&manager, &command).await?;
        if !result.success() {
            if result.stderr.contains("No such node") {
                return Ok(None);
            }
            return Err(RemoteError::Command {
                command,
                host: manager.public_ip,
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(parse_nodes(&result.stdout)?.into_iter().next())
    }

    async fn init_cluster(&self, host: &HostAddress) -> anyhow::Result<String> {
        let stdout = self
            .exec(
                host,
                format!(
                    "{} swarm init --advertise-addr {} --listen-addr {}:{SWARM_PORT}",
                    self.docker, host.public_ip, host.private_ip
                ),
            )
            .await?;
        self.set_manager(host.clone()).await;
        Ok(stdout)
    }

    async fn join_token(&self, role: NodeRole) -> anyhow::Result<String> {
        let manager = self.manager().await?;
        let stdout = self
            .exec(&manager, format!("{} swarm join-token -q {role}", self.docker))
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn join_cluster(&self, host: &HostAddress, spec: &JoinSpec) -> anyhow::Result<String> {
        let mut command = format!(
            "{} swarm join --token {} --advertise-addr {} --listen-addr {}",
            self.docker,
            shell_quote(&spec.token),
            spec.advertise_addr,
            spec.listen_addr
        );
        for addr in &spec.remote_addrs {
            command.push(' ');
            command.push_str(addr);
        }
        self.exec(host, command).await?;

        let node_id = self
            .exec(host, format!("{} info --format '{{{{.Swarm.NodeID}}}}'", self.docker))
            .await?
            .trim()
            .to_string();
        if node_id.is_empty() {
            anyhow::bail!("{host} joined but reports no node id");
        }
        Ok(node_id)
    }

    async fn leave_cluster(&self, host: &HostAddress, force: bool) -> anyhow::Result<()> {
        let mut command = format!("{} swarm leave", self.docker);
        if force {
            command.push_str(" --force");
        }
        self.exec(host, command).await?;
        Ok(())
    }

    async fn membership(&self, host: &HostAddress) -> anyhow::Result<LocalMembership> {
        let stdout = self
            .exec(host, format!("{} info --format '{{{{json .Swarm}}}}'", self.docker))
            .await?;
        Ok(parse_swarm_info(&stdout)?)
    }

    async fn update_node(&self, node_id: &str, version: u64, spec: &NodeSpec) -> anyhow::Result<()> {
        let manager = self.manager().await?;
        let current = self
            .inspect_node(node_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("node {node_id} not found"))?;
        if current.engine_version != version {
            anyhow::bail!(
                "node {node_id} is at engine version {}, update presented {version}",
                current.engine_version
            );
        }

        let mut command = format!(
            "{} node update --role {} --availability {}",
            self.docker,
            spec.role,
            availability_arg(spec.availability)
        );
        for key in current.labels.keys().filter(|k| !spec.labels.contains_key(*k)) {
            command.push_str(&format!(" --label-rm {}", shell_quote(key)));
        }
        for (key, value) in &spec.labels {
            command.push_str(&format!(" --label-add {}", shell_quote(&format!("{key}={value}"))));
        }
        command.push_str(&format!(" {}", shell_quote(node_id)));
        self.exec(&manager, command).await?;
        Ok(())
    }

    async fn remove_node(&self, node_id: &str, force: bool) -> anyhow::Result<()> {
        let manager = self.manager().await?;
        let flag = if force { " --force" } else { "" };
        self.exec(
            &manager,
            format!("{} node rm{flag} {}", self.docker, shell_quote(node_id)),
        )
        .await?;
        Ok(())
    }

    async fn create_network(&self, host: &HostAddress, name: &str) -> anyhow::Result<()> {
        let command = format!(
            "{} network create --driver overlay --attachable {}",
            self.docker,
            shell_quote(name)
        );
        let result = self.run(host, &command).await?;
        if result.success() {
            return Ok(());
        }
        if result.stderr.contains("already exists") {
            debug!(network = name, host = %host, "network already exists");
            return Ok(());
        }
        Err(RemoteError::Command {
            command,
            host: host.public_ip.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        }
        .into())
    }
}
