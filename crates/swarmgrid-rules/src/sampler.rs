//! Sampler: builds a target's [`Snapshot`] from the metrics source, the
//! simulated metrics, and the monitoring history.

use std::sync::Arc;

use rand::Rng;
use swarmgrid_core::{MetricTarget, MetricsSource};
use swarmgrid_state::*;
use tracing::{debug, warn};

use crate::engine::{FieldReading, Snapshot};

#[derive(Clone)]
pub struct Sampler {
    state: StateStore,
    metrics: Arc<dyn MetricsSource>,
}

impl Sampler {
    pub fn new(state: StateStore, metrics: Arc<dyn MetricsSource>) -> Self {
        Self { state, metrics }
    }

    /// Read every field for the target and fold the values into the
    /// monitoring history. Fields without a value are left out.
    pub async fn snapshot(&self, target: &MetricTarget, fields: &[Field]) -> StateResult<Snapshot> {
        let simulated = self.state.list_simulated_metrics()?;
        let mut snapshot = Snapshot::new(target.component_type, target.id.clone());

        for field in fields {
            let live = match self.metrics.value(target, field).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(target = %target.id, field = %field.name, error = %e, "metric read failed");
                    None
                }
            };

            let simulation = simulated
                .iter()
                .find(|s| s.applies_to(target.component_type, &target.id, &field.name));
            let value = match simulation {
                Some(sim) if live.is_none() || sim.override_live => {
                    let v = simulate(sim);
                    debug!(target = %target.id, field = %field.name, value = v, metric = %sim.name, "simulated value");
                    Some(v)
                }
                _ => live,
            };
            let Some(value) = value else {
                continue;
            };

            let reference = self
                .metrics
                .reference(target, field)
                .await
                .unwrap_or_else(|e| {
                    warn!(target = %target.id, field = %field.name, error = %e, "reference read failed");
                    None
                });

            let previous = self
                .state
                .get_monitoring(target.component_type, &target.id, &field.name)?;
            let log = self
                .state
                .record_monitoring(target.component_type, &target.id, &field.name, value)?;

            snapshot.readings.insert(
                field.name.clone(),
                FieldReading {
                    value,
                    reference,
                    average: log.average(),
                    last: previous.map(|p| p.last_value),
                },
            );
        }
        Ok(snapshot)
    }
}

fn simulate(metric: &SimulatedMetric) -> f64 {
    if metric.max <= metric.min {
        return metric.min;
    }
    rand::rng().random_range(metric.min..=metric.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_core::testing::FakeMetrics;

    fn target() -> MetricTarget {
        MetricTarget {
            component_type: ComponentType::Host,
            id: "10.0.0.1".into(),
            host: HostAddress::new("ubuntu", "10.0.0.1"),
        }
    }

    fn field(name: &str) -> Field {
        Field {
            name: name.into(),
            query: None,
        }
    }

    #[tokio::test]
    async fn readings_carry_history() {
        let state = StateStore::open_in_memory().unwrap();
        let metrics = Arc::new(FakeMetrics::new());
        metrics.set_reference("10.0.0.1", "ram", 200.0);
        let sampler = Sampler::new(state, metrics.clone());

        metrics.set("10.0.0.1", "ram", 40.0);
        let first = sampler.snapshot(&target(), &[field("ram")]).await.unwrap();
        let r = first.reading("ram").unwrap();
        assert_eq!(r.value, 40.0);
        assert_eq!(r.last, None);
        assert_eq!(r.reference, Some(200.0));

        metrics.set("10.0.0.1", "ram", 80.0);
        let second = sampler.snapshot(&target(), &[field("ram")]).await.unwrap();
        let r = second.reading("ram").unwrap();
        assert_eq!(r.last, Some(40.0));
        assert_eq!(r.average, Some(60.0));
    }

    #[tokio::test]
    async fn absent_values_are_skipped() {
        let state = StateStore::open_in_memory().unwrap();
        let sampler = Sampler::new(state, Arc::new(FakeMetrics::new()));
        let snapshot = sampler.snapshot(&target(), &[field("cpu")]).await.unwrap();
        assert!(snapshot.readings.is_empty());
    }

    #[tokio::test]
    async fn source_errors_are_treated_as_absent() {
        let state = StateStore::open_in_memory().unwrap();
        let metrics = Arc::new(FakeMetrics::new());
        metrics.fail("value");
        let sampler = Sampler::new(state, metrics);
        let snapshot = sampler.snapshot(&target(), &[field("cpu")]).await.unwrap();
        assert!(snapshot.readings.is_empty());
    }

    #[tokio::test]
    async fn simulated_metrics_fill_and_override() {
        let state = StateStore::open_in_memory().unwrap();
        let metrics = Arc::new(FakeMetrics::new());
        let sampler = Sampler::new(state.clone(), metrics.clone());

        let mut sim = SimulatedMetric {
            name: "hot-cpu".into(),
            component_type: ComponentType::Host,
            target_id: Some("10.0.0.1".into()),
            field: "cpu".into(),
            min: 95.0,
            max: 99.0,
            override_live: false,
            active: true,
        };
        state.put_simulated_metric(&sim).unwrap();

        // No live value: simulated.
        let s = sampler.snapshot(&target(), &[field("cpu")]).await.unwrap();
        let v = s.reading("cpu").unwrap().value;
        assert!((95.0..=99.0).contains(&v));

        // Live value wins without override.
        metrics.set("10.0.0.1", "cpu", 10.0);
        let s = sampler.snapshot(&target(), &[field("cpu")]).await.unwrap();
        assert_eq!(s.reading("cpu").unwrap().value, 10.0);

        sim.override_live = true;
        state.put_simulated_metric(&sim).unwrap();
        let s = sampler.snapshot(&target(), &[field("cpu")]).await.unwrap();
        assert!(s.reading("cpu").unwrap().value >= 95.0);
    }
}
