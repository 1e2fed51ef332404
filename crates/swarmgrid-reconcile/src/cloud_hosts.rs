//! Cloud instances against persisted cloud hosts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use swarmgrid_core::{CloudInstance, CloudProviderClient};
use swarmgrid_state::{CloudHost, ConfiguringRegistry, StateStore};
use tracing::info;

use crate::error::{ReconcileResult, listing};
use crate::{Reconcile, ReconcileReport};

pub struct CloudHostReconciler {
    state: StateStore,
    cloud: Arc<dyn CloudProviderClient>,
    configuring: ConfiguringRegistry,
}

impl CloudHostReconciler {
    pub fn new(
        state: StateStore,
        cloud: Arc<dyn CloudProviderClient>,
        configuring: ConfiguringRegistry,
    ) -> Self {
        Self {
            state,
            cloud,
            configuring,
        }
    }
}

/// Whether the persisted record no longer matches the instance.
fn changed(persisted: &CloudHost, live: &CloudInstance) -> bool {
    persisted.state != live.state
        || persisted.instance_type != live.instance_type
        || persisted.public_ip != live.public_ip
        || persisted.private_ip != live.private_ip
        || persisted.region != live.region
}

#[async_trait]
impl Reconcile for CloudHostReconciler {
    fn name(&self) -> &'static str {
        "cloud-hosts"
    }

    async fn reconcile(&self) -> ReconcileResult<ReconcileReport> {
        let active = self.configuring.active()?;
        let live: HashMap<String, CloudInstance> = self
            .cloud
            .list_instances()
            .await
            .map_err(listing("cloud instances"))?
            .into_iter()
            .map(|i| (i.instance_id.clone(), i))
            .collect();
        let persisted: HashMap<String, CloudHost> = self
            .state
            .list_cloud_hosts()?
            .into_iter()
            .map(|h| (h.instance_id.clone(), h))
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
                // A terminated instance is gone, whether or not we knew it.
                (Some(instance), None) if !instance.state.is_terminated() => {
                    self.state.put_cloud_host(&instance.to_cloud_host())?;
                    info!(instance_id = %id, state = ?instance.state, "cloud host inserted");
                    report.inserted += 1;
                }
                (Some(instance), Some(_)) if instance.state.is_terminated() => {
                    self.state.delete_cloud_host(id)?;
                    info!(instance_id = %id, "terminated cloud host deleted");
                    report.deleted += 1;
                }
                (Some(instance), Some(host)) if changed(host, instance) => {
                    self.state.put_cloud_host(&instance.to_cloud_host())?;
                    info!(instance_id = %id, from = ?host.state, to = ?instance.state, "cloud host updated");
                    report.updated += 1;
                }
                (None, Some(_)) => {
                    self.state.delete_cloud_host(id)?;
                    info!(instance_id = %id, "vanished cloud host deleted");
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
    use swarmgrid_core::testing::{FakeCloud, cloud_instance};
    use swarmgrid_state::InstanceState;

    fn setup() -> (CloudHostReconciler, Arc<FakeCloud>, StateStore, ConfiguringRegistry) {
        let state = StateStore::open_in_memory().unwrap();
        let cloud = Arc::new(FakeCloud::new());
        let configuring = ConfiguringRegistry::new(state.clone(), Duration::from_secs(600));
        let reconciler = CloudHostReconciler::new(state.clone(), cloud.clone(), configuring.clone());
        (reconciler, cloud, state, configuring)
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let (reconciler, cloud, state, _) = setup();
        cloud.add_instance(cloud_instance("i-1", InstanceState::Running));
        cloud.add_instance(cloud_instance("i-2", InstanceState::Pending));
        cloud.add_instance(cloud_instance("i-3", InstanceState::Terminated));

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(state.list_cloud_hosts().unwrap().len(), 2);

        let second = reconciler.reconcile().await.unwrap();
        assert!(second.is_noop(), "{second:?}");
    }

    #[tokio::test]
    async fn state_changes_and_terminations() {
        let (reconciler, cloud, state, _) = setup();
        cloud.add_instance(cloud_instance("i-1", InstanceState::Pending));
        cloud.add_instance(cloud_instance("i-2", InstanceState::Running));
        cloud.add_instance(cloud_instance("i-3", InstanceState::Running));
        reconciler.reconcile().await.unwrap();

        cloud.set_state("i-1", InstanceState::Running);
        cloud.set_state("i-2", InstanceState::Terminated);
        cloud.remove_instance("i-3");
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!((report.updated, report.deleted), (1, 2));

        let hosts = state.list_cloud_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].state, InstanceState::Running);
    }

    #[tokio::test]
    async fn configuring_hosts_are_left_alone() {
        let (reconciler, cloud, state, configuring) = setup();
        // Would be inserted.
        cloud.add_instance(cloud_instance("i-new", InstanceState::Running));
        // Would be deleted.
        state
            .put_cloud_host(&cloud_instance("i-old", InstanceState::Running).to_cloud_host())
            .unwrap();

        let _new = configuring.acquire("i-new").unwrap();
        let _old = configuring.acquire("i-old").unwrap();
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert!(report.is_noop());
        assert!(state.get_cloud_host("i-new").unwrap().is_none());
        assert!(state.get_cloud_host("i-old").unwrap().is_some());
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_pass() {
        let (reconciler, cloud, state, _) = setup();
        state
            .put_cloud_host(&cloud_instance("i-1", InstanceState::Running).to_cloud_host())
            .unwrap();
        cloud.fail("list_instances");
        assert!(reconciler.reconcile().await.is_err());
        assert!(state.get_cloud_host("i-1").unwrap().is_some());
    }
}
