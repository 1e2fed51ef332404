//! Node registry: persisted membership records kept in step with the
//! orchestration engine.
//!
//! Every mutation goes to the engine first (with the engine's own object
//! version), then to the store presenting the version last read. A write
//! racing another writer is rejected with `StaleVersion`; retrying is left
//! to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use swarmgrid_core::{ContainerOrchestrationClient, LiveNode, NodeSpec};
use swarmgrid_state::{Node, NodeAvailability, NodeRole, StateError, StateStore};
use tracing::{debug, info};

use crate::error::{ClusterError, ClusterResult, orchestration};

#[derive(Clone)]
pub struct NodeRegistry {
    state: StateStore,
    orchestration: Arc<dyn ContainerOrchestrationClient>,
}

impl NodeRegistry {
    pub fn new(state: StateStore, orchestration: Arc<dyn ContainerOrchestrationClient>) -> Self {
        Self {
            state,
            orchestration,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn node(&self, id: &str) -> ClusterResult<Node> {
        self.state
            .get_node(id)?
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))
    }

    pub fn nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.state.list_nodes()?)
    }

    pub fn ready_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.nodes()?.into_iter().filter(Node::is_ready).collect())
    }

    pub fn leader(&self) -> ClusterResult<Option<Node>> {
        Ok(self.nodes()?.into_iter().find(Node::is_leader))
    }

    pub fn find_by_address(&self, public_ip: &str) -> ClusterResult<Option<Node>> {
        Ok(self.nodes()?.into_iter().find(|n| n.address == public_ip))
    }

    /// Persist the engine's view of a node, inserting it when unknown.
    pub fn track(&self, live: &LiveNode) -> ClusterResult<Node> {
        let observed = live.to_node();
        match self.state.get_node(&live.id)? {
            Some(current) if same_observed(&current, &observed) => Ok(current),
            Some(current) => Ok(self.state.update_node(&Node {
                version: current.version,
                ..observed
            })?),
            None => {
                let node = self.state.insert_node(&observed)?;
                info!(node_id = %node.id, address = %node.address, role = %node.role, "node tracked");
                Ok(node)
            }
        }
    }

    /// Merge `labels` into the node's labels.
    pub async fn add_labels(&self, id: &str, labels: BTreeMap<String, String>) -> ClusterResult<Node> {
        self.apply(id, |spec| spec.labels.extend(labels)).await
    }

    pub async fn change_role(&self, id: &str, role: NodeRole) -> ClusterResult<Node> {
        let node = self.apply(id, |spec| spec.role = role).await?;
        info!(node_id = %id, %role, "node role changed");
        Ok(node)
    }

    pub async fn change_availability(
        &self,
        id: &str,
        availability: NodeAvailability,
    ) -> ClusterResult<Node> {
        let node = self.apply(id, |spec| spec.availability = availability).await?;
        info!(node_id = %id, ?availability, "node availability changed");
        Ok(node)
    }

    /// Apply a caller-edited node record.
    ///
    /// `node.version` must be the version the caller last read; an outdated
    /// one is rejected before the engine is touched.
    pub async fn update(&self, node: &Node) -> ClusterResult<Node> {
        let current = self.node(&node.id)?;
        if current.version != node.version {
            return Err(StateError::StaleVersion {
                id: node.id.clone(),
                presented: node.version,
                current: current.version,
            }
            .into());
        }
        let spec = NodeSpec {
            role: node.role,
            availability: node.availability,
            labels: node.labels.clone(),
        };
        self.write(node.clone(), Some(node.version), spec).await
    }

    /// Remove a node from the engine, then drop its record.
    pub async fn remove(&self, id: &str, force: bool) -> ClusterResult<()> {
        self.orchestration
            .remove_node(id, force)
            .await
            .map_err(orchestration(format!("removing node {id}")))?;
        self.forget(id)
    }

    /// Drop the persisted record only.
    pub fn forget(&self, id: &str) -> ClusterResult<()> {
        if self.state.delete_node(id)? {
            info!(node_id = %id, "node record removed");
        }
        Ok(())
    }

    async fn apply(&self, id: &str, edit: impl FnOnce(&mut NodeSpec)) -> ClusterResult<Node> {
        let persisted = self.state.get_node(id)?;
        let live = self.inspect(id).await?;
        let mut spec = NodeSpec::of(&live);
        edit(&mut spec);
        let base = persisted.clone().unwrap_or_else(|| live.to_node());
        self.write(base, persisted.map(|p| p.version), spec).await
    }

    /// Push `spec` to the engine and persist the result. `version` is the
    /// persisted version last read, `None` when there is no record yet.
    async fn write(&self, base: Node, version: Option<u64>, spec: NodeSpec) -> ClusterResult<Node> {
        let live = self.inspect(&base.id).await?;
        self.orchestration
            .update_node(&base.id, live.engine_version, &spec)
            .await
            .map_err(orchestration(format!("updating node {}", base.id)))?;

        let refreshed = match self.orchestration.inspect_node(&base.id).await {
            Ok(Some(n)) => n.to_node(),
            Ok(None) | Err(_) => Node {
                role: spec.role,
                availability: spec.availability,
                manager_status: match spec.role {
                    NodeRole::Worker => None,
                    NodeRole::Manager => base.manager_status.clone(),
                },
                labels: spec.labels,
                ..base
            },
        };
        let node = match version {
            Some(version) => self.state.update_node(&Node {
                version,
                ..refreshed
            })?,
            None => self.state.insert_node(&refreshed)?,
        };
        debug!(node_id = %node.id, version = node.version, "node written");
        Ok(node)
    }

    async fn inspect(&self, id: &str) -> ClusterResult<LiveNode> {
        self.orchestration
            .inspect_node(id)
            .await
            .map_err(orchestration(format!("inspecting node {id}")))?
            .ok_or_else(|| ClusterError::NodeNotFound(id.to_string()))
    }
}

fn same_observed(a: &Node, b: &Node) -> bool {
    a.hostname == b.hostname
        && a.address == b.address
        && a.role == b.role
        && a.availability == b.availability
        && a.state == b.state
        && a.manager_status == b.manager_status
        && a.labels == b.labels
}
