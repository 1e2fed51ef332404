//! Swarm lifecycle manager.
//!
//! A host moves through not-a-member → joining → member(role) → leaving →
//! not-a-member. Leaving a manager while other managers exist demotes it
//! first, and a full teardown removes the leader only after every other
//! node has left.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use swarmgrid_core::{ContainerOrchestrationClient, JoinSpec, LiveNode};
use swarmgrid_state::{
    ConfiguringGuard, ConfiguringRegistry, HostAddress, Node, NodeRole, StateStore, labels,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ClusterError, ClusterResult, orchestration};
use crate::registry::NodeRegistry;

pub const DEFAULT_NETWORK: &str = "swarmgrid-network";

/// Outcome of [`SwarmManager::destroy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Node ids that left, in completion order.
    pub left: Vec<String>,
    /// Node ids that failed to leave, with the error.
    pub failed: Vec<(String, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, node_id: String, result: ClusterResult<()>) {
        match result {
            Ok(()) => self.left.push(node_id),
            Err(e) => {
                warn!(%node_id, error = %e, "node failed to leave during teardown");
                self.failed.push((node_id, e.to_string()));
            }
        }
    }
}

/// Extract the new leader's node id from the cluster-init output.
pub fn parse_init_output(output: &str) -> ClusterResult<String> {
    let re = Regex::new(r"Swarm initialized: current node \((\S+)\) is now a manager")
        .map_err(|e| ClusterError::InitOutput(e.to_string()))?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ClusterError::InitOutput(output.trim().to_string()))
}

/// Labels describing where a host is and how to reach it.
pub fn host_labels(host: &HostAddress) -> BTreeMap<String, String> {
    let mut out = BTreeMap::from([
        (labels::PRIVATE_IP.to_string(), host.private_ip.clone()),
        (labels::USERNAME.to_string(), host.username.clone()),
    ]);
    if let Some(coordinates) = host.coordinates
        && let Ok(json) = serde_json::to_string(&coordinates)
    {
        out.insert(labels::COORDINATES.to_string(), json);
    }
    if let Some(region) = &host.region {
        out.insert(labels::REGION.to_string(), region.clone());
    }
    out
}

#[derive(Clone)]
pub struct SwarmManager {
    orchestration: Arc<dyn ContainerOrchestrationClient>,
    registry: NodeRegistry,
    network: String,
    configuring: Option<ConfiguringRegistry>,
}

impl SwarmManager {
    pub fn new(state: StateStore, orchestration: Arc<dyn ContainerOrchestrationClient>) -> Self {
        Self {
            registry: NodeRegistry::new(state, orchestration.clone()),
            orchestration,
            network: DEFAULT_NETWORK.to_string(),
            configuring: None,
        }
    }

    /// Mark joining nodes as configuring until they are labelled, so the
    /// node reconciler leaves them alone.
    pub fn with_configuring(mut self, configuring: ConfiguringRegistry) -> Self {
        self.configuring = Some(configuring);
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Initialize a new swarm on the bootstrap host and return its leader.
    pub async fn init(&self, host: &HostAddress) -> ClusterResult<Node> {
        let output = self
            .orchestration
            .init_cluster(host)
            .await
            .map_err(orchestration(format!("initializing the swarm on {host}")))?;
        let node_id = parse_init_output(&output)?;

        let live = self.inspect(&node_id).await?;
        self.registry.track(&live)?;

        let mut node_labels = host_labels(host);
        node_labels.insert(labels::MASTER_MANAGER.to_string(), "true".to_string());
        let node = self.registry.add_labels(&node_id, node_labels).await?;

        self.orchestration
            .create_network(host, &self.network)
            .await
            .map_err(orchestration(format!("creating network {}", self.network)))?;

        info!(%node_id, %host, network = %self.network, "swarm initialized");
        Ok(node)
    }

    /// Join `host` to the swarm with the given role.
    pub async fn join(&self, host: &HostAddress, role: NodeRole) -> ClusterResult<Node> {
        if let Err(e) = self.leave(host).await {
            debug!(%host, error = %e, "stale membership not cleared");
        }

        let nodes = self
            .orchestration
            .list_nodes()
            .await
            .map_err(orchestration("listing nodes"))?;
        let leader = nodes
            .iter()
            .find(|n| n.is_leader())
            .ok_or(ClusterError::NoLeader)?;
        let leader_addr = leader
            .manager_status
            .as_ref()
            .map(|s| s.addr.clone())
            .unwrap_or_else(|| leader.address.clone());

        let token = self
            .orchestration
            .join_token(role)
            .await
            .map_err(orchestration(format!("fetching {role} join token")))?;
        let spec = JoinSpec {
            token,
            advertise_addr: host.public_ip.clone(),
            listen_addr: host.private_ip.clone(),
            remote_addrs: vec![leader_addr],
        };
        let node_id = self
            .orchestration
            .join_cluster(host, &spec)
            .await
            .map_err(orchestration(format!("joining {host} as {role}")))?;
        let guard = self.mark_configuring(&node_id)?;

        let live = self.inspect(&node_id).await?;
        self.registry.track(&live)?;
        let node = self.registry.add_labels(&node_id, host_labels(host)).await?;
        if let Some(guard) = guard {
            guard.release()?;
        }
        info!(%node_id, %host, %role, "node joined");
        Ok(node)
    }

    fn mark_configuring(&self, node_id: &str) -> ClusterResult<Option<ConfiguringGuard>> {
        match &self.configuring {
            Some(configuring) => Ok(Some(configuring.acquire(node_id)?)),
            None => Ok(None),
        }
    }

    /// Recover a node whose record disagrees with reality: drop it and join
    /// again from its last known address with its last known role.
    pub async fn rejoin(&self, node_id: &str) -> ClusterResult<Node> {
        let stale = self.registry.node(node_id)?;
        let host = stale.host_address();
        info!(%node_id, %host, role = %stale.role, "rejoining node");
        self.registry.remove(node_id, true).await?;
        self.join(&host, stale.role).await
    }

    /// Take `host` out of the swarm. A host that is not a member is a no-op.
    pub async fn leave(&self, host: &HostAddress) -> ClusterResult<()> {
        let membership = self
            .orchestration
            .membership(host)
            .await
            .map_err(orchestration(format!("reading membership of {host}")))?;
        if !membership.is_member() {
            debug!(%host, "not a swarm member, nothing to leave");
            return Ok(());
        }

        let mut force = membership.is_manager;
        if membership.is_manager
            && membership.managers > 1
            && let Some(node_id) = &membership.node_id
        {
            self.registry.change_role(node_id, NodeRole::Worker).await?;
            force = false;
        }

        self.orchestration
            .leave_cluster(host, force)
            .await
            .map_err(orchestration(format!("leaving the swarm from {host}")))?;
        if let Some(node_id) = &membership.node_id {
            self.registry.forget(node_id)?;
        }
        info!(%host, "left the swarm");
        Ok(())
    }

    /// Tear the whole swarm down.
    ///
    /// Every non-leader leaves concurrently; the leader leaves after all of
    /// them have finished. Failures are collected, never abort the teardown.
    pub async fn destroy(&self) -> ClusterResult<TeardownReport> {
        let nodes = self
            .orchestration
            .list_nodes()
            .await
            .map_err(orchestration("listing nodes"))?;
        let (leaders, others): (Vec<LiveNode>, Vec<LiveNode>) =
            nodes.into_iter().partition(LiveNode::is_leader);

        let mut report = TeardownReport::default();
        let mut tasks = JoinSet::new();
        for node in others {
            let manager = self.clone();
            tasks.spawn(async move {
                let host = node.to_node().host_address();
                let result = manager.leave(&host).await;
                (node.id, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node_id, result)) => report.absorb(node_id, result),
                Err(e) => error!(error = %e, "teardown task failed"),
            }
        }

        for leader in leaders {
            let host = leader.to_node().host_address();
            let result = self.leave(&host).await;
            report.absorb(leader.id, result);
        }

        info!(left = report.left.len(), failed = report.failed.len(), "swarm destroyed");
        Ok(report)
    }

    async fn inspect(&self, node_id: &str) -> ClusterResult<LiveNode> {
        self.orchestration
            .inspect_node(node_id)
            .await
            .map_err(orchestration(format!("inspecting node {node_id}")))?
            .ok_or_else(|| ClusterError::NodeNotFound(node_id.to_string()))
    }
}
