//! Periodic reconcile runner.

use std::sync::Arc;
use std::time::Duration;

use swarmgrid_state::ConfiguringRegistry;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{Reconcile, ReconcileReport};

/// Drives one reconciler on its own timer.
pub struct Runner {
    reconciler: Arc<dyn Reconcile>,
    configuring: ConfiguringRegistry,
}

impl Runner {
    pub fn new(reconciler: Arc<dyn Reconcile>, configuring: ConfiguringRegistry) -> Self {
        Self {
            reconciler,
            configuring,
        }
    }

    /// One tick: purge expired markers, then run a pass.
    ///
    /// A failed pass is logged and yields `None`; nothing is carried over
    /// to the next tick.
    pub async fn tick(&self) -> Option<ReconcileReport> {
        let name = self.reconciler.name();
        if let Err(e) = self.configuring.purge_expired() {
            warn!(reconciler = name, error = %e, "failed to purge configuring markers");
        }
        match self.reconciler.reconcile().await {
            Ok(report) => {
                debug!(
                    reconciler = name,
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    "reconcile pass finished"
                );
                Some(report)
            }
            Err(e) => {
                error!(reconciler = name, error = %e, "reconcile pass failed");
                None
            }
        }
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        info!(reconciler = name, interval_ms = interval.as_millis() as u64, "reconciler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!(reconciler = name, "reconciler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeReconciler;
    use swarmgrid_core::testing::{FakeOrchestration, live_node};
    use swarmgrid_state::{ConfiguringMarker, NodeRole, StateStore};

    fn runner() -> (Runner, Arc<FakeOrchestration>, StateStore) {
        let state = StateStore::open_in_memory().unwrap();
        let fake = Arc::new(FakeOrchestration::new());
        let configuring = ConfiguringRegistry::new(state.clone(), Duration::from_secs(600));
        let reconciler = NodeReconciler::new(state.clone(), fake.clone(), configuring.clone());
        (Runner::new(Arc::new(reconciler), configuring), fake, state)
    }

    #[tokio::test]
    async fn failed_pass_is_swallowed_and_next_tick_recovers() {
        let (runner, fake, state) = runner();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        fake.fail("list_nodes");
        assert_eq!(runner.tick().await, None);
        assert!(state.list_nodes().unwrap().is_empty());

        fake.recover("list_nodes");
        let report = runner.tick().await.unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn expired_markers_stop_excluding() {
        let (runner, fake, state) = runner();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        state
            .put_marker(&ConfiguringMarker {
                entity_id: "a".into(),
                until: 0,
            })
            .unwrap();

        let report = runner.tick().await.unwrap();
        assert_eq!((report.inserted, report.skipped), (1, 0));
        assert!(state.list_markers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_ticks_until_shutdown() {
        let (runner, fake, state) = runner();
        fake.add_node(live_node("a", "10.0.0.1", NodeRole::Manager, true));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            runner.run(Duration::from_millis(5), rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.list_nodes().unwrap().len(), 1);
    }
}
