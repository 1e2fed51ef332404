//! Swarm nodes against persisted node records.
//!
//! Updates present the persisted version read at the start of the pass.
//! A concurrent writer makes the update fail with `StaleVersion`, which
//! aborts the pass; the next pass starts from a fresh read.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use swarmgrid_core::ContainerOrchestrationClient;
use swarmgrid_state::{ConfiguringRegistry, Node, StateStore};
use tracing::info;

use crate::error::{ReconcileResult, listing};
use crate::{Reconcile, ReconcileReport};

pub struct NodeReconciler {
    state: StateStore,
    orchestration: Arc<dyn ContainerOrchestrationClient>,
    configuring: ConfiguringRegistry,
}

impl NodeReconciler {
    pub fn new(
        state: StateStore,
        orchestration: Arc<dyn ContainerOrchestrationClient>,
        configuring: ConfiguringRegistry,
    ) -> Self {
        Self {
            state,
            orchestration,
            configuring,
        }
    }
}

fn changed(persisted: &Node, live: &Node) -> bool {
    persisted.availability != live.availability
        || persisted.manager_status != live.manager_status
        || persisted.state != live.state
        || persisted.role != live.role
        || persisted.labels != live.labels
        || persisted.address != live.address
        || persisted.hostname != live.hostname
}

#[async_trait]
impl Reconcile for NodeReconciler {
    fn name(&self) -> &'static str {
        "nodes"
    }

    async fn reconcile(&self) -> ReconcileResult<ReconcileReport> {
        let active = self.configuring.active()?;
        let live: HashMap<String, Node> = self
            .orchestration
            .list_nodes()
            .await
            .map_err(listing("swarm nodes"))?
            .into_iter()
            .map(|n| (n.id.clone(), n.to_node()))
            .collect();
        let persisted: HashMap<String, Node> = self
            .state
            .list_nodes()?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let ids: BTreeSet<&str> = live
            .keys()
            .chain(persisted.keys())
            .map(String::as_str)
            .collect();
        let mut report = ReconcileReport::default();
        for id in ids {
            if active.contains(id) {
                report.skipped += 1;
                continue;
            }
            match (live.get(id), persisted.get(id)) {
                (Some(node), None) => {
                    self.state.insert_node(node)?;
                    info!(node_id = %id, address = %node.address, role = %node.role, "node inserted");
                    report.inserted += 1;
                }
                (Some(node), Some(stored)) if changed(stored, node) => {
                    let updated = self.state.update_node(&Node {
                        version: stored.version,
                        ..node.clone()
                    })?;
                    info!(
                        node_id = %id,
                        availability = ?updated.availability,
                        state = ?updated.state,
                        version = updated.version,
                        "node updated"
                    );
                    report.updated += 1;
                }
                (None, Some(stored)) => {
                    self.state.delete_node(id)?;
                    info!(node_id = %id, address = %stored.address, "node deleted");
                    report.deleted += 1;
                }
                _ => {}
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use swarmgrid_core::testing::{FakeOrchestration, live_node};
    use swarmgrid_state::{NodeAvailability, NodeRole};

    fn setup() -> (NodeReconciler, Arc<FakeOrchestration>, StateStore, ConfiguringRegistry) {
        let state = StateStore::open_in_memory().unwrap();
        let fake = Arc::new(FakeOrchestration::new());
        let configuring = ConfiguringRegistry::new(state.clone(), Duration::from_secs(600));
        let reconciler = NodeReconciler::new(state.clone(), fake.clone(), configuring.clone());
        (reconciler, fake, state, configuring)
    }

    #[tokio::test]
    async fn converges_and_stays_put() {
        let (reconciler, fake, state, _) = setup();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        fake.add_node(live_node("b", "10.0.0.2", NodeRole::Worker, false));

        assert_eq!(reconciler.reconcile().await.unwrap().inserted, 2);
        let second = reconciler.reconcile().await.unwrap();
        assert!(second.is_noop(), "{second:?}");
        assert_eq!(state.get_node("b").unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn availability_and_manager_status_changes_are_picked_up() {
        let (reconciler, fake, state, _) = setup();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        fake.add_node(live_node("b", "10.0.0.2", NodeRole::Manager, false));
        reconciler.reconcile().await.unwrap();

        let mut drained = live_node("a", "10.0.0.1", NodeRole::Manager, false);
        drained.availability = NodeAvailability::Drain;
        fake.set_node(drained);
        fake.set_node(live_node("b", "10.0.0.2", NodeRole::Manager, true));

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.updated, 2);
        let a = state.get_node("a").unwrap().unwrap();
        assert_eq!(a.availability, NodeAvailability::Drain);
        assert_eq!(a.version, 2);
        assert!(state.get_node("b").unwrap().unwrap().is_leader());
    }

    #[tokio::test]
    async fn departed_nodes_are_deleted() {
        let (reconciler, fake, state, _) = setup();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        state
            .insert_node(&live_node("gone", "10.0.0.9", NodeRole::Worker, false).to_node())
            .unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!((report.inserted, report.deleted), (1, 1));
        assert!(state.get_node("gone").unwrap().is_none());
    }

    #[tokio::test]
    async fn configuring_nodes_are_left_alone() {
        let (reconciler, fake, state, configuring) = setup();
        fake.add_node(live_node("joining", "10.0.0.3", NodeRole::Worker, false));
        state
            .insert_node(&live_node("leaving", "10.0.0.4", NodeRole::Worker, false).to_node())
            .unwrap();

        let _a = configuring.acquire("joining").unwrap();
        let _b = configuring.acquire("leaving").unwrap();
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert!(report.is_noop());
        assert!(state.get_node("joining").unwrap().is_none());
        assert!(state.get_node("leaving").unwrap().is_some());
    }
}
