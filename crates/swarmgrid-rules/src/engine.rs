//! Rule engine: evaluates a target's metric snapshot against the rules
//! that apply to it.
//!
//! A rule fires iff every one of its conditions holds (AND semantics).
//! Firing rules become [`Candidate`]s, ordered by ascending priority then
//! name; the debouncer records them in that order, so the last candidate
//! is the one the target's event ends up holding.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use swarmgrid_state::{ComponentType, Condition, DecisionValue, Operator, Rule, ValueMode};
use tracing::{trace, warn};

/// Absolute tolerance for `Equal` / `NotEqual`.
pub const EPSILON: f64 = 1e-9;

/// Quantities known for one field of a target at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldReading {
    /// The effective (live or simulated) value.
    pub value: f64,
    /// Reference for percentage mode (e.g. total RAM).
    pub reference: Option<f64>,
    /// Running average including this sample.
    pub average: Option<f64>,
    /// The previous sample.
    pub last: Option<f64>,
}

impl FieldReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// The quantity a condition in `mode` compares against its threshold.
    pub fn quantity(&self, mode: ValueMode) -> Option<f64> {
        match mode {
            ValueMode::Absolute => Some(self.value),
            ValueMode::Percentage => self
                .reference
                .filter(|r| r.abs() > EPSILON)
                .map(|r| self.value / r * 100.0),
            ValueMode::Average => self.average,
            ValueMode::DeviationOnAverage => self
                .average
                .filter(|a| a.abs() > EPSILON)
                .map(|a| (self.value - a) / a * 100.0),
            ValueMode::DeviationOnLast => self
                .last
                .filter(|l| l.abs() > EPSILON)
                .map(|l| (self.value - l) / l * 100.0),
        }
    }
}

/// Current field readings of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub component_type: ComponentType,
    pub target_id: String,
    pub readings: HashMap<String, FieldReading>,
}

impl Snapshot {
    pub fn new(component_type: ComponentType, target_id: impl Into<String>) -> Self {
        Self {
            component_type,
            target_id: target_id.into(),
            readings: HashMap::new(),
        }
    }

    pub fn with_reading(mut self, field: &str, reading: FieldReading) -> Self {
        self.readings.insert(field.to_string(), reading);
        self
    }

    pub fn reading(&self, field: &str) -> Option<&FieldReading> {
        self.readings.get(field)
    }

    /// Effective values by field name, for decision records.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.readings
            .iter()
            .map(|(name, r)| (name.clone(), r.value))
            .collect()
    }

    /// Field-wise mean of several snapshots, as the snapshot of `target_id`.
    pub fn aggregate(
        component_type: ComponentType,
        target_id: impl Into<String>,
        parts: &[Snapshot],
    ) -> Snapshot {
        let mut fields: BTreeSet<&str> = BTreeSet::new();
        for part in parts {
            fields.extend(part.readings.keys().map(String::as_str));
        }

        let mut snapshot = Snapshot::new(component_type, target_id);
        for field in fields {
            let readings: Vec<&FieldReading> =
                parts.iter().filter_map(|p| p.reading(field)).collect();
            let Some(value) = mean(readings.iter().map(|r| Some(r.value))) else {
                continue;
            };
            snapshot.readings.insert(
                field.to_string(),
                FieldReading {
                    value,
                    reference: mean(readings.iter().map(|r| r.reference)),
                    average: mean(readings.iter().map(|r| r.average)),
                    last: mean(readings.iter().map(|r| r.last)),
                },
            );
        }
        snapshot
    }
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, n) = values.flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Numeric comparison under an operator.
pub fn compare(operator: Operator, lhs: f64, rhs: f64) -> bool {
    match operator {
        Operator::GreaterThan => lhs > rhs,
        Operator::GreaterThanOrEqual => lhs >= rhs,
        Operator::LessThan => lhs < rhs,
        Operator::LessThanOrEqual => lhs <= rhs,
        Operator::Equal => (lhs - rhs).abs() <= EPSILON,
        Operator::NotEqual => (lhs - rhs).abs() > EPSILON,
    }
}

/// Whether `condition` holds against the snapshot. A missing reading, or
/// one lacking the quantity the value mode needs, makes it false.
pub fn condition_holds(condition: &Condition, snapshot: &Snapshot) -> bool {
    snapshot
        .reading(&condition.field)
        .and_then(|r| r.quantity(condition.value_mode))
        .is_some_and(|q| compare(condition.operator, q, condition.threshold))
}

/// A fired rule's recommendation for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub rule: String,
    pub target_id: String,
    pub decision: DecisionValue,
    pub priority: i32,
}

/// Rules of one component type plus the conditions they reference.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub conditions: HashMap<String, Condition>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self {
            rules,
            conditions: conditions.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    /// Scoped rules naming the target plus every generic rule.
    pub fn applicable<'a>(&'a self, target_id: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.applies_to(target_id))
    }

    /// Names of the fields the conditions of applicable rules read.
    pub fn fields_for(&self, target_id: &str) -> BTreeSet<String> {
        self.applicable(target_id)
            .flat_map(|r| r.conditions.iter())
            .filter_map(|name| self.conditions.get(name))
            .map(|c| c.field.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// AND over the rule's conditions. An unknown condition never holds.
    pub fn rule_fires(&self, rule: &Rule, snapshot: &Snapshot) -> bool {
        rule.conditions.iter().all(|name| match self.conditions.get(name) {
            Some(condition) => condition_holds(condition, snapshot),
            None => {
                warn!(rule = %rule.name, condition = %name, "rule references unknown condition");
                false
            }
        })
    }
}

/// Stateless evaluator over a [`RuleSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    /// Candidates of every applicable rule that fires, in processing order.
    pub fn evaluate(&self, rules: &RuleSet, snapshot: &Snapshot) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = rules
            .applicable(&snapshot.target_id)
            .filter(|r| r.component_type == snapshot.component_type)
            .filter(|r| rules.rule_fires(r, snapshot))
            .map(|r| Candidate {
                rule: r.name.clone(),
                target_id: snapshot.target_id.clone(),
                decision: r.decision.value,
                priority: r.priority,
            })
            .collect();
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.rule.cmp(&b.rule)));
        trace!(
            target = %snapshot.target_id,
            fired = candidates.len(),
            "rules evaluated"
        );
        candidates
    }
}
