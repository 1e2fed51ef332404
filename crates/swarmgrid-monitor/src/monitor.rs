//! Host and service polls.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use swarmgrid_actuator::{Action, Actuator};
use swarmgrid_core::MetricTarget;
use swarmgrid_rules::{Debouncer, RuleEngine, RuleSet, Rulebook, Sampler, Snapshot};
use swarmgrid_state::*;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Which targets a poll covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Every ready node, keyed by public address.
    Hosts,
    /// Containers, plus the services and apps they aggregate into.
    Services,
}

/// Result of actuating an actionable decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    Applied(Action),
    Failed(String),
}

/// One target's evaluation in a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub component_type: ComponentType,
    pub target_id: String,
    /// The target's event after the decisions of this poll were recorded.
    pub event: Event,
    pub actuation: Option<Actuation>,
}

#[derive(Clone)]
pub struct Monitor {
    state: StateStore,
    rulebook: Rulebook,
    engine: RuleEngine,
    sampler: Sampler,
    debouncer: Debouncer,
    actuator: Actuator,
}

impl Monitor {
    pub fn new(state: StateStore, sampler: Sampler, debouncer: Debouncer, actuator: Actuator) -> Self {
        Self {
            rulebook: Rulebook::new(state.clone()),
            state,
            engine: RuleEngine,
            sampler,
            debouncer,
            actuator,
        }
    }

    pub async fn tick(&self, poll: Poll) -> StateResult<Vec<Evaluation>> {
        match poll {
            Poll::Hosts => self.tick_hosts().await,
            Poll::Services => self.tick_services().await,
        }
    }

    /// Evaluate every ready node against the host rules.
    pub async fn tick_hosts(&self) -> StateResult<Vec<Evaluation>> {
        let rules = self.rulebook.rule_set(ComponentType::Host)?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut evaluations = Vec::new();
        for node in self.state.list_nodes()?.into_iter().filter(Node::is_ready) {
            let fields = self.rulebook.resolve_fields(rules.fields_for(&node.address))?;
            if fields.is_empty() {
                continue;
            }
            let target = MetricTarget {
                component_type: ComponentType::Host,
                id: node.address.clone(),
                host: node.host_address(),
            };
            let snapshot = self.sampler.snapshot(&target, &fields).await?;
            evaluations.push(self.process(&rules, &snapshot).await?);
        }
        Ok(evaluations)
    }

    /// Evaluate containers, then the services and apps they belong to.
    ///
    /// Each container is sampled once with the union of the fields its
    /// container, service and app rules read; service and app snapshots
    /// are the field-wise mean of their containers' snapshots.
    pub async fn tick_services(&self) -> StateResult<Vec<Evaluation>> {
        let container_rules = self.rulebook.rule_set(ComponentType::Container)?;
        let service_rules = self.rulebook.rule_set(ComponentType::Service)?;
        let app_rules = self.rulebook.rule_set(ComponentType::App)?;
        if container_rules.is_empty() && service_rules.is_empty() && app_rules.is_empty() {
            return Ok(Vec::new());
        }

        let hosts: BTreeMap<String, HostAddress> = self
            .state
            .list_nodes()?
            .into_iter()
            .map(|n| (n.address.clone(), n.host_address()))
            .collect();

        let mut by_service: BTreeMap<String, Vec<Snapshot>> = BTreeMap::new();
        let mut by_app: BTreeMap<String, Vec<Snapshot>> = BTreeMap::new();
        let mut evaluations = Vec::new();

        for container in self.state.list_containers()? {
            let app = container.app().map(String::from);
            let mut names: BTreeSet<String> = container_rules.fields_for(&container.id);
            names.extend(service_rules.fields_for(&container.service_name));
            if let Some(app) = &app {
                names.extend(app_rules.fields_for(app));
            }
            if names.is_empty() {
                continue;
            }

            let fields = self.rulebook.resolve_fields(names)?;
            let target = MetricTarget {
                component_type: ComponentType::Container,
                id: container.id.clone(),
                host: hosts
                    .get(&container.host)
                    .cloned()
                    .unwrap_or_else(|| HostAddress::new(String::new(), container.host.clone())),
            };
            let snapshot = self.sampler.snapshot(&target, &fields).await?;

            if container_rules.applicable(&container.id).next().is_some() {
                evaluations.push(self.process(&container_rules, &snapshot).await?);
            }
            if let Some(app) = app {
                by_app.entry(app).or_default().push(snapshot.clone());
            }
            by_service
                .entry(container.service_name.clone())
                .or_default()
                .push(snapshot);
        }

        for (service, parts) in &by_service {
            if service_rules.applicable(service).next().is_none() {
                continue;
            }
            let snapshot = Snapshot::aggregate(ComponentType::Service, service.clone(), parts);
            evaluations.push(self.process(&service_rules, &snapshot).await?);
        }
        for (app, parts) in &by_app {
            if app_rules.applicable(app).next().is_none() {
                continue;
            }
            let snapshot = Snapshot::aggregate(ComponentType::App, app.clone(), parts);
            evaluations.push(self.process(&app_rules, &snapshot).await?);
        }
        Ok(evaluations)
    }

    /// Record one decision for the target and actuate when the resulting
    /// event is actionable.
    ///
    /// Exactly one decision is recorded per evaluation: the last fired
    /// rule in processing order, or `None` when no rule fired.
    async fn process(&self, rules: &RuleSet, snapshot: &Snapshot) -> StateResult<Evaluation> {
        let component_type = snapshot.component_type;
        let target_id = snapshot.target_id.as_str();
        let candidates = self.engine.evaluate(rules, snapshot);

        let event = match candidates.last() {
            Some(winner) => self.debouncer.record(
                component_type,
                target_id,
                winner.decision,
                Some(&winner.rule),
            )?,
            None => self
                .debouncer
                .record(component_type, target_id, DecisionValue::None, None)?,
        };

        let actionable = self.debouncer.is_actionable(&event);
        debug!(
            component = %component_type,
            target = %target_id,
            decision = %event.decision,
            count = event.count,
            fired = candidates.len(),
            actionable,
            "target evaluated"
        );
        if !actionable {
            return Ok(Evaluation {
                component_type,
                target_id: target_id.to_string(),
                event,
                actuation: None,
            });
        }

        let outcome = self
            .actuator
            .actuate(component_type, target_id, event.decision)
            .await;
        let (success, result, actuation) = match outcome {
            Ok(action) => {
                self.debouncer.reset(component_type, target_id)?;
                info!(component = %component_type, target = %target_id, decision = %event.decision, %action, "decision actuated");
                (true, action.to_string(), Actuation::Applied(action))
            }
            Err(e) => {
                warn!(component = %component_type, target = %target_id, decision = %event.decision, error = %e, "actuation failed");
                (false, e.to_string(), Actuation::Failed(e.to_string()))
            }
        };
        self.state.append_decision(&DecisionRecord {
            id: 0,
            target_id: target_id.to_string(),
            component_type,
            decision: event.decision,
            rule: event.rule.clone(),
            timestamp: epoch_secs(),
            success,
            result,
            fields: snapshot.values(),
        })?;

        Ok(Evaluation {
            component_type,
            target_id: target_id.to_string(),
            event,
            actuation: Some(actuation),
        })
    }

    /// Run one poll on its own timer until shutdown.
    pub async fn run(&self, poll: Poll, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?poll, interval_ms = interval.as_millis() as u64, "monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.tick(poll).await {
                        Ok(evaluations) => debug!(?poll, targets = evaluations.len(), "monitor tick"),
                        Err(e) => error!(?poll, error = %e, "monitor tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(?poll, "monitor shutting down");
                    break;
                }
            }
        }
    }
}
