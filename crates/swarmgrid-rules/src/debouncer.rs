//! Decision debouncer: per-target hysteresis over rule decisions.
//!
//! Each target has one [`Event`]: the last decision recorded for it and
//! how many times in a row it was recorded. A decision becomes actionable
//! once its count reaches the configured threshold.

use std::collections::HashMap;

use swarmgrid_core::config::MonitoringConfig;
use swarmgrid_state::*;
use tracing::debug;

/// Repeat counts required before a decision is actionable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceThresholds {
    default: u32,
    overrides: HashMap<DecisionValue, u32>,
}

impl DebounceThresholds {
    pub fn new(default: u32) -> Self {
        Self {
            default: default.max(1),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, decision: DecisionValue, threshold: u32) -> Self {
        self.overrides.insert(decision, threshold.max(1));
        self
    }

    pub fn for_decision(&self, decision: DecisionValue) -> u32 {
        self.overrides.get(&decision).copied().unwrap_or(self.default)
    }
}

impl From<&MonitoringConfig> for DebounceThresholds {
    fn from(config: &MonitoringConfig) -> Self {
        let mut thresholds = DebounceThresholds::new(config.debounce_threshold);
        for (name, threshold) in &config.decision_thresholds {
            if let Ok(decision) = name.parse::<DecisionValue>() {
                thresholds = thresholds.with_override(decision, *threshold);
            }
        }
        thresholds
    }
}

#[derive(Clone)]
pub struct Debouncer {
    state: StateStore,
    thresholds: DebounceThresholds,
}

impl Debouncer {
    pub fn new(state: StateStore, thresholds: DebounceThresholds) -> Self {
        Self { state, thresholds }
    }

    /// Record a decision for a target.
    ///
    /// Creates the event with count 1, increments the count when the
    /// decision repeats, and restarts at 1 when it changes.
    pub fn record(
        &self,
        component_type: ComponentType,
        target_id: &str,
        decision: DecisionValue,
        rule: Option<&str>,
    ) -> StateResult<Event> {
        let now = epoch_secs();
        let event = self
            .state
            .modify_event(component_type, target_id, |current| match current {
                Some(e) if e.decision == decision => Event {
                    count: e.count.saturating_add(1),
                    rule: rule.map(String::from).or(e.rule),
                    updated_at: now,
                    ..e
                },
                _ => Event {
                    target_id: target_id.to_string(),
                    component_type,
                    decision,
                    rule: rule.map(String::from),
                    count: 1,
                    updated_at: now,
                },
            })?;
        debug!(
            target = %target_id,
            component = %component_type,
            decision = %event.decision,
            count = event.count,
            "decision recorded"
        );
        Ok(event)
    }

    /// Whether the event's decision has repeated often enough to act on.
    pub fn is_actionable(&self, event: &Event) -> bool {
        !event.decision.is_none() && event.count >= self.thresholds.for_decision(event.decision)
    }

    /// Reset a target's event to (NONE, 1), e.g. after a successful actuation.
    pub fn reset(&self, component_type: ComponentType, target_id: &str) -> StateResult<Event> {
        let now = epoch_secs();
        self.state
            .modify_event(component_type, target_id, |_| Event {
                target_id: target_id.to_string(),
                component_type,
                decision: DecisionValue::None,
                rule: None,
                count: 1,
                updated_at: now,
            })
    }

    pub fn event(&self, component_type: ComponentType, target_id: &str) -> StateResult<Option<Event>> {
        self.state.get_event(component_type, target_id)
    }

    pub fn thresholds(&self) -> &DebounceThresholds {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_state::DecisionValue::{Replicate as A, Stop as B};

    fn debouncer(threshold: u32) -> Debouncer {
        Debouncer::new(
            StateStore::open_in_memory().unwrap(),
            DebounceThresholds::new(threshold),
        )
    }

    fn feed(d: &Debouncer, decisions: &[DecisionValue]) -> Vec<u32> {
        decisions
            .iter()
            .map(|dec| {
                d.record(ComponentType::Service, "web", *dec, Some("r"))
                    .unwrap()
                    .count
            })
            .collect()
    }

    #[test]
    fn hysteresis_change_back() {
        let d = debouncer(3);
        assert_eq!(feed(&d, &[A, A, B, A]), vec![1, 2, 1, 1]);
        let event = d.event(ComponentType::Service, "web").unwrap().unwrap();
        assert_eq!(event.decision, A);
    }

    #[test]
    fn hysteresis_streak_then_change() {
        let d = debouncer(3);
        assert_eq!(feed(&d, &[A, A, A, B]), vec![1, 2, 3, 1]);
    }

    #[test]
    fn targets_are_independent() {
        let d = debouncer(2);
        d.record(ComponentType::Service, "web", A, None).unwrap();
        let other = d.record(ComponentType::Service, "db", A, None).unwrap();
        assert_eq!(other.count, 1);
        let host = d.record(ComponentType::Host, "web", A, None).unwrap();
        assert_eq!(host.count, 1);
    }

    #[test]
    fn actionable_at_threshold() {
        let d = debouncer(3);
        let e1 = d.record(ComponentType::Service, "web", A, None).unwrap();
        let e2 = d.record(ComponentType::Service, "web", A, None).unwrap();
        assert!(!d.is_actionable(&e1));
        assert!(!d.is_actionable(&e2));
        let e3 = d.record(ComponentType::Service, "web", A, None).unwrap();
        assert!(d.is_actionable(&e3));
    }

    #[test]
    fn none_is_never_actionable() {
        let d = debouncer(1);
        let e = d
            .record(ComponentType::Host, "h", DecisionValue::None, None)
            .unwrap();
        assert!(!d.is_actionable(&e));
    }

    #[test]
    fn per_decision_override() {
        let d = Debouncer::new(
            StateStore::open_in_memory().unwrap(),
            DebounceThresholds::new(5).with_override(B, 1),
        );
        let e = d.record(ComponentType::Service, "web", B, None).unwrap();
        assert!(d.is_actionable(&e));
    }

    #[test]
    fn thresholds_from_monitoring_config() {
        let config = MonitoringConfig {
            host_interval: "30s".into(),
            service_interval: "30s".into(),
            debounce_threshold: 3,
            decision_thresholds: [("stop".to_string(), 5), ("bogus".to_string(), 9)]
                .into_iter()
                .collect(),
            min_hosts: 1,
            max_hosts: None,
        };
        let thresholds = DebounceThresholds::from(&config);
        assert_eq!(thresholds.for_decision(DecisionValue::Stop), 5);
        assert_eq!(thresholds.for_decision(DecisionValue::ScaleUp), 3);
    }

    #[test]
    fn reset_restarts_streak() {
        let d = debouncer(2);
        feed(&d, &[A, A]);
        let reset = d.reset(ComponentType::Service, "web").unwrap();
        assert_eq!((reset.decision, reset.count), (DecisionValue::None, 1));
        assert_eq!(feed(&d, &[A]), vec![1]);
    }
}
