//! Domain types for the SwarmGrid state store.
//!
//! These types represent the rule vocabulary (fields, conditions, rules,
//! decisions), the per-target decision events, and the persisted view of
//! the infrastructure (nodes, cloud hosts, containers). All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Unique identifier for a managed container.
pub type ContainerId = String;

/// Unique identifier for a cloud instance.
pub type InstanceId = String;

/// Current time as seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Vocabulary ─────────────────────────────────────────────────────

/// The kind of component a rule, decision or event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Host,
    Service,
    Container,
    App,
}

impl ComponentType {
    pub const ALL: [ComponentType; 4] = [
        ComponentType::Host,
        ComponentType::Service,
        ComponentType::Container,
        ComponentType::App,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Host => "host",
            ComponentType::Service => "service",
            ComponentType::Container => "container",
            ComponentType::App => "app",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(ComponentType::Host),
            "service" => Ok(ComponentType::Service),
            "container" => Ok(ComponentType::Container),
            "app" => Ok(ComponentType::App),
            other => Err(StateError::Invalid(format!("unknown component type '{other}'"))),
        }
    }
}

/// Enumerated outcome a fired rule recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionValue {
    None,
    ScaleUp,
    ScaleDown,
    Replicate,
    Migrate,
    Stop,
}

impl DecisionValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionValue::None => "none",
            DecisionValue::ScaleUp => "scale_up",
            DecisionValue::ScaleDown => "scale_down",
            DecisionValue::Replicate => "replicate",
            DecisionValue::Migrate => "migrate",
            DecisionValue::Stop => "stop",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DecisionValue::None)
    }
}

impl fmt::Display for DecisionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionValue {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(DecisionValue::None),
            "scale_up" => Ok(DecisionValue::ScaleUp),
            "scale_down" => Ok(DecisionValue::ScaleDown),
            "replicate" => Ok(DecisionValue::Replicate),
            "migrate" => Ok(DecisionValue::Migrate),
            "stop" => Ok(DecisionValue::Stop),
            other => Err(StateError::Invalid(format!("unknown decision '{other}'"))),
        }
    }
}

/// A decision value tagged with the component type it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decision {
    pub component_type: ComponentType,
    pub value: DecisionValue,
}

impl Decision {
    pub fn new(component_type: ComponentType, value: DecisionValue) -> Self {
        Self {
            component_type,
            value,
        }
    }
}

/// A named observable metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    /// Metrics-source query reference (e.g. a PromQL template).
    #[serde(default)]
    pub query: Option<String>,
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }
}

/// Which quantity of a field reading a condition compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    #[default]
    Absolute,
    /// Threshold is a percentage of a collaborator-supplied reference.
    Percentage,
    Average,
    DeviationOnAverage,
    DeviationOnLast,
}

/// A single field/operator/threshold predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub name: String,
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value_mode: ValueMode,
    pub threshold: f64,
}

/// Named AND-combination of conditions bound to one decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: String,
    pub component_type: ComponentType,
    pub decision: Decision,
    /// Lower priorities are processed first.
    #[serde(default)]
    pub priority: i32,
    /// Condition names, evaluated with AND semantics.
    pub conditions: Vec<String>,
    /// A generic rule applies to every target of its component type.
    #[serde(default)]
    pub generic: bool,
    /// Targets a scoped rule applies to.
    #[serde(default)]
    pub targets: BTreeSet<String>,
}

impl Rule {
    /// Check the rule's structural invariants.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.name.trim().is_empty() {
            return Err(StateError::Invalid("rule name must not be empty".into()));
        }
        if self.decision.component_type != self.component_type {
            return Err(StateError::Invalid(format!(
                "rule '{}' targets {} but its decision targets {}",
                self.name, self.component_type, self.decision.component_type
            )));
        }
        if self.conditions.is_empty() {
            return Err(StateError::Invalid(format!(
                "rule '{}' has no conditions",
                self.name
            )));
        }
        Ok(())
    }

    pub fn applies_to(&self, target_id: &str) -> bool {
        self.generic || self.targets.contains(target_id)
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Per-target decision memory used for hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub target_id: String,
    pub component_type: ComponentType,
    pub decision: DecisionValue,
    /// Rule that produced the current decision, if any.
    pub rule: Option<String>,
    /// Consecutive identical decisions; always at least 1.
    pub count: u32,
    pub updated_at: u64,
}

impl Event {
    pub fn key_for(component_type: ComponentType, target_id: &str) -> String {
        format!("{component_type}:{target_id}")
    }

    pub fn table_key(&self) -> String {
        Self::key_for(self.component_type, &self.target_id)
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

/// Label keys written on cluster nodes.
pub mod labels {
    pub const PRIVATE_IP: &str = "swarmgrid.private-ip";
    pub const USERNAME: &str = "swarmgrid.username";
    pub const COORDINATES: &str = "swarmgrid.coordinates";
    pub const REGION: &str = "swarmgrid.region";
    /// Marks the node that initialized the swarm.
    pub const MASTER_MANAGER: &str = "swarmgrid.master-manager";
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Everything needed to reach and describe a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAddress {
    pub username: String,
    pub public_ip: String,
    pub private_ip: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub region: Option<String>,
}

impl HostAddress {
    pub fn new(username: impl Into<String>, public_ip: impl Into<String>) -> Self {
        let public_ip = public_ip.into();
        Self {
            username: username.into(),
            private_ip: public_ip.clone(),
            public_ip,
            coordinates: None,
            region: None,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.public_ip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Manager,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Manager => f.write_str("manager"),
            NodeRole::Worker => f.write_str("worker"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(NodeRole::Manager),
            "worker" => Ok(NodeRole::Worker),
            other => Err(StateError::Invalid(format!("unknown node role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAvailability {
    Active,
    Pause,
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Unknown,
    Down,
    Ready,
    Disconnected,
}

/// Raft status of a manager node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub leader: bool,
    pub reachability: String,
    pub addr: String,
}

/// A cluster membership record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    /// Public address the node joined with.
    pub address: String,
    pub role: NodeRole,
    pub availability: NodeAvailability,
    pub state: NodeState,
    #[serde(default)]
    pub manager_status: Option<ManagerStatus>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Optimistic-concurrency token; bumped on every stored update.
    pub version: u64,
}

impl Node {
    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready && self.availability == NodeAvailability::Active
    }

    pub fn is_manager(&self) -> bool {
        self.role == NodeRole::Manager
    }

    /// The raft leader, or the node that initialized the swarm.
    pub fn is_leader(&self) -> bool {
        self.manager_status.as_ref().is_some_and(|s| s.leader)
            || self
                .labels
                .get(labels::MASTER_MANAGER)
                .is_some_and(|v| v == "true")
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.labels
            .get(labels::COORDINATES)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Rebuild the host address from the node's labels.
    pub fn host_address(&self) -> HostAddress {
        HostAddress {
            username: self.labels.get(labels::USERNAME).cloned().unwrap_or_default(),
            public_ip: self.address.clone(),
            private_ip: self
                .labels
                .get(labels::PRIVATE_IP)
                .cloned()
                .unwrap_or_else(|| self.address.clone()),
            coordinates: self.coordinates(),
            region: self.labels.get(labels::REGION).cloned(),
        }
    }
}

// ── Cloud hosts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, InstanceState::Terminated)
    }
}

/// A cloud-provider instance as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudHost {
    pub instance_id: InstanceId,
    pub instance_type: String,
    pub state: InstanceState,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub updated_at: u64,
}

// ── Containers ─────────────────────────────────────────────────────

/// Label naming the app a container belongs to.
pub const APP_LABEL: &str = "swarmgrid.app";

/// A managed container as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    /// Service (image-level workload) this container instantiates.
    pub service_name: String,
    /// Public address of the host running the container.
    pub host: String,
    pub state: String,
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: u64,
}

impl Container {
    pub fn app(&self) -> Option<&str> {
        self.labels.get(APP_LABEL).map(String::as_str)
    }
}

// ── Monitoring ─────────────────────────────────────────────────────

/// Running statistics for one (target, field) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringLog {
    pub component_type: ComponentType,
    pub target_id: String,
    pub field: String,
    pub count: u64,
    pub sum: f64,
    pub last_value: f64,
    pub updated_at: u64,
}

impl MonitoringLog {
    pub fn key_for(component_type: ComponentType, target_id: &str, field: &str) -> String {
        format!("{component_type}:{target_id}:{field}")
    }

    pub fn table_key(&self) -> String {
        Self::key_for(self.component_type, &self.target_id, &self.field)
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Operator-registered metric generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMetric {
    pub name: String,
    pub component_type: ComponentType,
    /// Target the metric applies to; `None` applies to every target.
    #[serde(default)]
    pub target_id: Option<String>,
    pub field: String,
    pub min: f64,
    pub max: f64,
    /// Replace the live value even when one is present.
    #[serde(default, rename = "override")]
    pub override_live: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl SimulatedMetric {
    pub fn applies_to(&self, component_type: ComponentType, target_id: &str, field: &str) -> bool {
        self.active
            && self.component_type == component_type
            && self.field == field
            && self.target_id.as_deref().is_none_or(|t| t == target_id)
    }
}

// ── Decision records ───────────────────────────────────────────────

/// Audit record of one triggered actuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Assigned by the store on append.
    #[serde(default)]
    pub id: u64,
    pub target_id: String,
    pub component_type: ComponentType,
    pub decision: DecisionValue,
    pub rule: Option<String>,
    pub timestamp: u64,
    pub success: bool,
    pub result: String,
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

// ── Configuring markers ────────────────────────────────────────────

/// Transient exclusion flag for an entity mid-provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguringMarker {
    pub entity_id: String,
    /// Unix timestamp (seconds) after which the marker is ignored.
    pub until: u64,
}

impl ConfiguringMarker {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(component: ComponentType, decision: Decision) -> Rule {
        Rule {
            name: "cpu-high".into(),
            component_type: component,
            decision,
            priority: 0,
            conditions: vec!["cpu-over-80".into()],
            generic: false,
            targets: BTreeSet::from(["web".to_string()]),
        }
    }

    #[test]
    fn rule_decision_must_match_component() {
        let ok = rule(
            ComponentType::Service,
            Decision::new(ComponentType::Service, DecisionValue::Replicate),
        );
        assert!(ok.validate().is_ok());

        let bad = rule(
            ComponentType::Service,
            Decision::new(ComponentType::Host, DecisionValue::Replicate),
        );
        assert!(matches!(bad.validate(), Err(StateError::Invalid(_))));
    }

    #[test]
    fn scoped_and_generic_rules() {
        let mut r = rule(
            ComponentType::Service,
            Decision::new(ComponentType::Service, DecisionValue::Stop),
        );
        assert!(r.applies_to("web"));
        assert!(!r.applies_to("db"));
        r.generic = true;
        assert!(r.applies_to("db"));
    }

    #[test]
    fn decision_parsing_is_lenient() {
        assert_eq!("SCALE-UP".parse::<DecisionValue>().unwrap(), DecisionValue::ScaleUp);
        assert_eq!("scale_down".parse::<DecisionValue>().unwrap(), DecisionValue::ScaleDown);
        assert!("explode".parse::<DecisionValue>().is_err());
    }

    #[test]
    fn node_address_from_labels() {
        let node = Node {
            id: "n1".into(),
            hostname: "edge-1".into(),
            address: "203.0.113.7".into(),
            role: NodeRole::Worker,
            availability: NodeAvailability::Active,
            state: NodeState::Ready,
            manager_status: None,
            labels: BTreeMap::from([
                (labels::PRIVATE_IP.to_string(), "10.0.0.7".to_string()),
                (labels::USERNAME.to_string(), "ubuntu".to_string()),
                (
                    labels::COORDINATES.to_string(),
                    r#"{"latitude":38.7,"longitude":-9.1}"#.to_string(),
                ),
            ]),
            version: 1,
        };
        let addr = node.host_address();
        assert_eq!(addr.private_ip, "10.0.0.7");
        assert_eq!(addr.username, "ubuntu");
        assert_eq!(addr.coordinates, Some(Coordinates::new(38.7, -9.1)));
        assert!(node.is_ready());
        assert!(!node.is_leader());
    }

    #[test]
    fn simulated_metric_scope() {
        let metric = SimulatedMetric {
            name: "fake-cpu".into(),
            component_type: ComponentType::Host,
            target_id: None,
            field: "cpu-%".into(),
            min: 10.0,
            max: 20.0,
            override_live: false,
            active: true,
        };
        assert!(metric.applies_to(ComponentType::Host, "any", "cpu-%"));
        assert!(!metric.applies_to(ComponentType::Service, "any", "cpu-%"));
        assert!(!metric.applies_to(ComponentType::Host, "any", "ram-%"));
    }
}
