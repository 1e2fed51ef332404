//! Rulebook: managed access to fields, conditions and rules.
//!
//! Enforces the referential rules the raw store does not: a condition
//! must name a known field, a rule must name known conditions, and a
//! field or condition still referenced cannot be removed. Removing a rule
//! resets the events it left behind.

use swarmgrid_core::SwarmgridConfig;
use swarmgrid_state::*;
use tracing::{debug, info};

use crate::engine::RuleSet;

#[derive(Clone)]
pub struct Rulebook {
    state: StateStore,
}

impl Rulebook {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    // ── Fields ─────────────────────────────────────────────────────

    pub fn add_field(&self, field: &Field) -> StateResult<()> {
        self.state.insert_field(field)
    }

    pub fn field(&self, name: &str) -> StateResult<Field> {
        self.state
            .get_field(name)?
            .ok_or_else(|| StateError::NotFound(format!("field '{name}'")))
    }

    pub fn fields(&self) -> StateResult<Vec<Field>> {
        self.state.list_fields()
    }

    pub fn remove_field(&self, name: &str) -> StateResult<()> {
        self.field(name)?;
        if let Some(c) = self
            .state
            .list_conditions()?
            .into_iter()
            .find(|c| c.field == name)
        {
            return Err(StateError::Conflict(format!(
                "field '{name}' is used by condition '{}'",
                c.name
            )));
        }
        self.state.delete_field(name)?;
        Ok(())
    }

    // ── Conditions ─────────────────────────────────────────────────

    pub fn add_condition(&self, condition: &Condition) -> StateResult<()> {
        self.field(&condition.field)?;
        self.state.insert_condition(condition)
    }

    pub fn condition(&self, name: &str) -> StateResult<Condition> {
        self.state
            .get_condition(name)?
            .ok_or_else(|| StateError::NotFound(format!("condition '{name}'")))
    }

    pub fn conditions(&self) -> StateResult<Vec<Condition>> {
        self.state.list_conditions()
    }

    pub fn remove_condition(&self, name: &str) -> StateResult<()> {
        self.condition(name)?;
        if let Some(r) = self
            .state
            .list_rules()?
            .into_iter()
            .find(|r| r.conditions.iter().any(|c| c == name))
        {
            return Err(StateError::Conflict(format!(
                "condition '{name}' is used by rule '{}'",
                r.name
            )));
        }
        self.state.delete_condition(name)?;
        Ok(())
    }

    // ── Rules ──────────────────────────────────────────────────────

    pub fn add_rule(&self, rule: &Rule) -> StateResult<()> {
        rule.validate()?;
        for name in &rule.conditions {
            self.condition(name)?;
        }
        self.state.insert_rule(rule)?;
        info!(rule = %rule.name, component = %rule.component_type, decision = %rule.decision.value, "rule added");
        Ok(())
    }

    /// Replace an existing rule. Events the rule produced with a decision
    /// it no longer makes are reset.
    pub fn update_rule(&self, rule: &Rule) -> StateResult<()> {
        let previous = self.rule(&rule.name)?;
        rule.validate()?;
        for name in &rule.conditions {
            self.condition(name)?;
        }
        self.state.put_rule(rule)?;
        if previous.decision != rule.decision {
            self.reset_events_of(&previous)?;
        }
        Ok(())
    }

    pub fn rule(&self, name: &str) -> StateResult<Rule> {
        self.state
            .get_rule(name)?
            .ok_or_else(|| StateError::NotFound(format!("rule '{name}'")))
    }

    pub fn rules(&self) -> StateResult<Vec<Rule>> {
        self.state.list_rules()
    }

    /// Scope a rule to one more target.
    pub fn add_rule_target(&self, name: &str, target_id: &str) -> StateResult<()> {
        let mut rule = self.rule(name)?;
        if rule.targets.insert(target_id.to_string()) {
            self.state.put_rule(&rule)?;
        }
        Ok(())
    }

    pub fn remove_rule_target(&self, name: &str, target_id: &str) -> StateResult<()> {
        let mut rule = self.rule(name)?;
        if rule.targets.remove(target_id) {
            self.state.put_rule(&rule)?;
        }
        Ok(())
    }

    /// Remove a rule and reset the events it could have produced.
    pub fn remove_rule(&self, name: &str) -> StateResult<Rule> {
        let rule = self.rule(name)?;
        self.state.delete_rule(name)?;
        let reset = self.reset_events_of(&rule)?;
        info!(rule = %name, events_reset = reset, "rule removed");
        Ok(rule)
    }

    /// Reset to (NONE, 1) every event of the rule's component type that the
    /// rule produced, or that holds its decision while no remaining rule
    /// can produce that decision.
    fn reset_events_of(&self, rule: &Rule) -> StateResult<usize> {
        let component = rule.component_type;
        let decision = rule.decision.value;
        let still_produced = self
            .state
            .list_rules_for(component)?
            .iter()
            .any(|r| r.decision.value == decision);

        let mut reset = 0;
        for event in self.state.list_events_for(component)? {
            let produced_by_rule = event.rule.as_deref() == Some(rule.name.as_str());
            let orphaned = event.decision == decision && !still_produced;
            if !event.decision.is_none() && (produced_by_rule || orphaned) {
                self.state.put_event(&Event {
                    decision: DecisionValue::None,
                    rule: None,
                    count: 1,
                    updated_at: epoch_secs(),
                    ..event
                })?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Rules of a component type with the conditions they reference.
    pub fn rule_set(&self, component_type: ComponentType) -> StateResult<RuleSet> {
        let rules = self.state.list_rules_for(component_type)?;
        let conditions = self.state.list_conditions()?;
        Ok(RuleSet::new(rules, conditions))
    }

    /// Field definitions by name; unknown names get a bare definition.
    pub fn resolve_fields<I>(&self, names: I) -> StateResult<Vec<Field>>
    where
        I: IntoIterator<Item = String>,
    {
        names
            .into_iter()
            .map(|name| {
                Ok(self
                    .state
                    .get_field(&name)?
                    .unwrap_or(Field { name, query: None }))
            })
            .collect()
    }

    // ── Seeding ────────────────────────────────────────────────────

    /// Insert the configured vocabulary. Entries that already exist are
    /// left untouched, so seeding on every start is harmless.
    pub fn seed(&self, config: &SwarmgridConfig) -> StateResult<usize> {
        let mut inserted = 0;
        for field in &config.fields {
            inserted += skip_existing(self.add_field(field))?;
        }
        for condition in &config.conditions {
            inserted += skip_existing(self.add_condition(condition))?;
        }
        for rule in &config.rules {
            inserted += skip_existing(self.add_rule(&rule.to_rule()))?;
        }
        for metric in &config.simulated_metrics {
            self.state.put_simulated_metric(metric)?;
        }
        debug!(inserted, "rulebook seeded");
        Ok(inserted)
    }
}

fn skip_existing(result: StateResult<()>) -> StateResult<usize> {
    match result {
        Ok(()) => Ok(1),
        Err(StateError::AlreadyExists(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn book() -> Rulebook {
        let book = Rulebook::new(StateStore::open_in_memory().unwrap());
        book.add_field(&Field {
            name: "cpu-%".into(),
            query: None,
        })
        .unwrap();
        book.add_condition(&Condition {
            name: "cpu-high".into(),
            field: "cpu-%".into(),
            operator: Operator::GreaterThan,
            value_mode: ValueMode::Absolute,
            threshold: 80.0,
        })
        .unwrap();
        book
    }

    fn rule(name: &str, decision: DecisionValue) -> Rule {
        Rule {
            name: name.into(),
            component_type: ComponentType::Service,
            decision: Decision::new(ComponentType::Service, decision),
            priority: 0,
            conditions: vec!["cpu-high".into()],
            generic: true,
            targets: BTreeSet::new(),
        }
    }

    fn event(target: &str, decision: DecisionValue, rule: Option<&str>) -> Event {
        Event {
            target_id: target.into(),
            component_type: ComponentType::Service,
            decision,
            rule: rule.map(String::from),
            count: 4,
            updated_at: 0,
        }
    }

    #[test]
    fn lookups_are_not_found() {
        let book = book();
        assert!(book.rule("nope").unwrap_err().is_not_found());
        assert!(book.condition("nope").unwrap_err().is_not_found());
        assert!(book.remove_rule("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn rule_requires_known_conditions() {
        let book = book();
        let mut r = rule("r", DecisionValue::Replicate);
        r.conditions.push("missing".into());
        assert!(book.add_rule(&r).unwrap_err().is_not_found());
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        let book = book();
        book.add_rule(&rule("r", DecisionValue::Replicate)).unwrap();
        assert!(matches!(
            book.add_rule(&rule("r", DecisionValue::Stop)),
            Err(StateError::AlreadyExists(_))
        ));
    }

    #[test]
    fn referenced_condition_cannot_be_removed() {
        let book = book();
        book.add_rule(&rule("r", DecisionValue::Replicate)).unwrap();
        assert!(matches!(
            book.remove_condition("cpu-high"),
            Err(StateError::Conflict(_))
        ));
        assert!(matches!(book.remove_field("cpu-%"), Err(StateError::Conflict(_))));
        book.remove_rule("r").unwrap();
        book.remove_condition("cpu-high").unwrap();
        book.remove_field("cpu-%").unwrap();
    }

    #[test]
    fn removing_rule_resets_its_events() {
        let book = book();
        let state = book.state.clone();
        book.add_rule(&rule("replicate-hot", DecisionValue::Replicate)).unwrap();
        book.add_rule(&rule("stop-hot", DecisionValue::Stop)).unwrap();

        state.put_event(&event("web", DecisionValue::Replicate, Some("replicate-hot"))).unwrap();
        state.put_event(&event("db", DecisionValue::Stop, Some("stop-hot"))).unwrap();
        // Holds the decision without a rule attribution.
        state.put_event(&event("cache", DecisionValue::Replicate, None)).unwrap();

        book.remove_rule("replicate-hot").unwrap();

        for target in ["web", "cache"] {
            let e = state.get_event(ComponentType::Service, target).unwrap().unwrap();
            assert_eq!((e.decision, e.count, e.rule), (DecisionValue::None, 1, None));
        }
        let db = state.get_event(ComponentType::Service, "db").unwrap().unwrap();
        assert_eq!(db.decision, DecisionValue::Stop);
        assert_eq!(db.count, 4);
    }

    #[test]
    fn decision_still_produced_elsewhere_keeps_unattributed_events() {
        let book = book();
        let state = book.state.clone();
        book.add_rule(&rule("a", DecisionValue::Replicate)).unwrap();
        book.add_rule(&rule("b", DecisionValue::Replicate)).unwrap();
        state.put_event(&event("web", DecisionValue::Replicate, Some("b"))).unwrap();

        book.remove_rule("a").unwrap();
        let e = state.get_event(ComponentType::Service, "web").unwrap().unwrap();
        assert_eq!(e.decision, DecisionValue::Replicate);
    }

    #[test]
    fn updating_decision_resets_events() {
        let book = book();
        let state = book.state.clone();
        book.add_rule(&rule("r", DecisionValue::Replicate)).unwrap();
        state.put_event(&event("web", DecisionValue::Replicate, Some("r"))).unwrap();

        book.update_rule(&rule("r", DecisionValue::Stop)).unwrap();
        let e = state.get_event(ComponentType::Service, "web").unwrap().unwrap();
        assert_eq!(e.decision, DecisionValue::None);
        assert_eq!(book.rule("r").unwrap().decision.value, DecisionValue::Stop);
    }

    #[test]
    fn scoped_targets() {
        let book = book();
        let mut r = rule("r", DecisionValue::Stop);
        r.generic = false;
        book.add_rule(&r).unwrap();
        book.add_rule_target("r", "web").unwrap();
        let set = book.rule_set(ComponentType::Service).unwrap();
        assert_eq!(set.applicable("web").count(), 1);
        assert_eq!(set.applicable("db").count(), 0);
        book.remove_rule_target("r", "web").unwrap();
        assert!(book.rule("r").unwrap().targets.is_empty());
    }

    #[test]
    fn seeding_is_idempotent() {
        let config = SwarmgridConfig::from_toml(
            r#"
[monitoring]
debounce_threshold = 2

[[fields]]
name = "ram-%"

[[conditions]]
name = "ram-high"
field = "ram-%"
operator = "greater_than"
threshold = 90.0

[[rules]]
name = "ram-pressure"
component_type = "host"
decision = "migrate"
conditions = ["ram-high"]
generic = true
"#,
        )
        .unwrap();
        let book = Rulebook::new(StateStore::open_in_memory().unwrap());
        assert_eq!(book.seed(&config).unwrap(), 3);
        assert_eq!(book.seed(&config).unwrap(), 0);
        assert_eq!(book.rules().unwrap().len(), 1);
    }
}
