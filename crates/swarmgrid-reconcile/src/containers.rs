//! Managed containers against persisted containers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use swarmgrid_core::ContainerOrchestrationClient;
use swarmgrid_state::{ConfiguringRegistry, Container, StateStore};
use tracing::info;

use crate::error::{ReconcileResult, listing};
use crate::{Reconcile, ReconcileReport};

pub const DEFAULT_MANAGED_LABEL: &str = "swarmgrid.managed";

pub struct ContainerReconciler {
    state: StateStore,
    orchestration: Arc<dyn ContainerOrchestrationClient>,
    configuring: ConfiguringRegistry,
    managed_label: String,
}

impl ContainerReconciler {
    pub fn new(
        state: StateStore,
        orchestration: Arc<dyn ContainerOrchestrationClient>,
        configuring: ConfiguringRegistry,
    ) -> Self {
        Self {
            state,
            orchestration,
            configuring,
            managed_label: DEFAULT_MANAGED_LABEL.to_string(),
        }
    }

    /// Only containers carrying `<label>=true` are managed.
    pub fn with_managed_label(mut self, label: impl Into<String>) -> Self {
        self.managed_label = label.into();
        self
    }
}

#[async_trait]
impl Reconcile for ContainerReconciler {
    fn name(&self) -> &'static str {
        "containers"
    }

    async fn reconcile(&self) -> ReconcileResult<ReconcileReport> {
        let active = self.configuring.active()?;
        let filter = BTreeMap::from([(self.managed_label.clone(), "true".to_string())]);
        let live: HashMap<String, Container> = self
            .orchestration
            .list_by_labels(&filter)
            .await
            .map_err(listing("managed containers"))?
            .into_iter()
            .map(|c| (c.id.clone(), c.to_container()))
            .collect();
        let persisted: HashMap<String, Container> = self
            .state
            .list_containers()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
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
                (Some(container), None) => {
                    self.state.put_container(container)?;
                    info!(container_id = %id, service = %container.service_name, host = %container.host, "container inserted");
                    report.inserted += 1;
                }
                (Some(container), Some(stored)) if container != stored => {
                    self.state.put_container(container)?;
                    info!(container_id = %id, state = %container.state, host = %container.host, "container updated");
                    report.updated += 1;
                }
                (None, Some(stored)) => {
                    self.state.delete_container(id)?;
                    info!(container_id = %id, service = %stored.service_name, "container deleted");
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
    use swarmgrid_core::testing::{FakeOrchestration, live_container};

    fn setup() -> (ContainerReconciler, Arc<FakeOrchestration>, StateStore, ConfiguringRegistry) {
        let state = StateStore::open_in_memory().unwrap();
        let fake = Arc::new(FakeOrchestration::new());
        let configuring = ConfiguringRegistry::new(state.clone(), Duration::from_secs(600));
        let reconciler = ContainerReconciler::new(state.clone(), fake.clone(), configuring.clone());
        (reconciler, fake, state, configuring)
    }

    #[tokio::test]
    async fn inserts_managed_containers_once() {
        let (reconciler, fake, state, _) = setup();
        fake.add_container(live_container("c1", "web", "10.0.0.1"));
        let mut foreign = live_container("c2", "db", "10.0.0.1");
        foreign.labels.clear();
        fake.add_container(foreign);

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.inserted, 1);
        assert!(state.get_container("c2").unwrap().is_none());

        let second = reconciler.reconcile().await.unwrap();
        assert!(second.is_noop(), "{second:?}");
    }

    #[tokio::test]
    async fn updates_and_deletes_drift() {
        let (reconciler, fake, state, _) = setup();
        let running = live_container("c1", "web", "10.0.0.1");
        fake.add_container(running.clone());
        state
            .put_container(&Container {
                state: "created".to_string(),
                ..running.to_container()
            })
            .unwrap();
        state
            .put_container(&live_container("gone", "web", "10.0.0.2").to_container())
            .unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!((report.inserted, report.updated, report.deleted), (0, 1, 1));
        assert!(state.get_container("gone").unwrap().is_none());
        assert_eq!(state.get_container("c1").unwrap().unwrap().state, "running");
    }

    #[tokio::test]
    async fn configuring_containers_are_left_alone() {
        let (reconciler, fake, state, configuring) = setup();
        fake.add_container(live_container("c-new", "web", "10.0.0.1"));
        state
            .put_container(&live_container("c-old", "web", "10.0.0.1").to_container())
            .unwrap();

        let _a = configuring.acquire("c-new").unwrap();
        let _b = configuring.acquire("c-old").unwrap();
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert!(report.is_noop());
        assert!(state.get_container("c-new").unwrap().is_none());
        assert!(state.get_container("c-old").unwrap().is_some());
    }

    #[tokio::test]
    async fn custom_managed_label() {
        let (reconciler, fake, state, _) = setup();
        let reconciler = reconciler.with_managed_label("edge.managed");
        let mut c = live_container("c1", "web", "10.0.0.1");
        c.labels.insert("edge.managed".to_string(), "true".to_string());
        fake.add_container(c);
        fake.add_container(live_container("c2", "web", "10.0.0.1"));

        assert_eq!(reconciler.reconcile().await.unwrap().inserted, 1);
        assert!(state.get_container("c1").unwrap().is_some());
    }
}
