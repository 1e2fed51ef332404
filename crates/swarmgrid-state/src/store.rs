//! StateStore: redb-backed state persistence for SwarmGrid.
//!
//! Provides typed CRUD operations over the rule vocabulary, decision
//! events, nodes, cloud hosts, containers, monitoring history, decision
//! records and configuring markers. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            FIELDS,
            CONDITIONS,
            RULES,
            EVENTS,
            NODES,
            CLOUD_HOSTS,
            CONTAINERS,
            MONITORING,
            SIMULATED_METRICS,
            DECISIONS,
            CONFIGURING,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put_value<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert only if the key is absent.
    fn insert_value<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            if t.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!(
                    "{} '{key}'",
                    table.name()
                )));
            }
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_values<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    fn remove_value(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a single key inside one write transaction.
    fn modify_value<T, F>(&self, table: Table, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> StateResult<T>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            updated = f(current)?;
            let bytes = encode(&updated)?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Fields ─────────────────────────────────────────────────────

    pub fn insert_field(&self, field: &Field) -> StateResult<()> {
        self.insert_value(FIELDS, &field.name, field)?;
        debug!(name = %field.name, "field stored");
        Ok(())
    }

    pub fn get_field(&self, name: &str) -> StateResult<Option<Field>> {
        self.get_value(FIELDS, name)
    }

    pub fn list_fields(&self) -> StateResult<Vec<Field>> {
        self.list_values(FIELDS, "")
    }

    pub fn delete_field(&self, name: &str) -> StateResult<bool> {
        self.remove_value(FIELDS, name)
    }

    // ── Conditions ─────────────────────────────────────────────────

    pub fn insert_condition(&self, condition: &Condition) -> StateResult<()> {
        self.insert_value(CONDITIONS, &condition.name, condition)?;
        debug!(name = %condition.name, "condition stored");
        Ok(())
    }

    pub fn put_condition(&self, condition: &Condition) -> StateResult<()> {
        self.put_value(CONDITIONS, &condition.name, condition)
    }

    pub fn get_condition(&self, name: &str) -> StateResult<Option<Condition>> {
        self.get_value(CONDITIONS, name)
    }

    pub fn list_conditions(&self) -> StateResult<Vec<Condition>> {
        self.list_values(CONDITIONS, "")
    }

    pub fn delete_condition(&self, name: &str) -> StateResult<bool> {
        self.remove_value(CONDITIONS, name)
    }

    // ── Rules ──────────────────────────────────────────────────────

    pub fn insert_rule(&self, rule: &Rule) -> StateResult<()> {
        rule.validate()?;
        self.insert_value(RULES, &rule.name, rule)?;
        debug!(name = %rule.name, component = %rule.component_type, "rule stored");
        Ok(())
    }

    /// Insert or replace a rule.
    pub fn put_rule(&self, rule: &Rule) -> StateResult<()> {
        rule.validate()?;
        self.put_value(RULES, &rule.name, rule)
    }

    pub fn get_rule(&self, name: &str) -> StateResult<Option<Rule>> {
        self.get_value(RULES, name)
    }

    pub fn list_rules(&self) -> StateResult<Vec<Rule>> {
        self.list_values(RULES, "")
    }

    pub fn list_rules_for(&self, component_type: ComponentType) -> StateResult<Vec<Rule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.component_type == component_type)
            .collect())
    }

    pub fn delete_rule(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove_value(RULES, name)?;
        debug!(%name, existed, "rule deleted");
        Ok(existed)
    }

    // ── Events ─────────────────────────────────────────────────────

    pub fn get_event(
        &self,
        component_type: ComponentType,
        target_id: &str,
    ) -> StateResult<Option<Event>> {
        self.get_value(EVENTS, &Event::key_for(component_type, target_id))
    }

    pub fn put_event(&self, event: &Event) -> StateResult<()> {
        self.put_value(EVENTS, &event.table_key(), event)
    }

    pub fn list_events(&self) -> StateResult<Vec<Event>> {
        self.list_values(EVENTS, "")
    }

    pub fn list_events_for(&self, component_type: ComponentType) -> StateResult<Vec<Event>> {
        self.list_values(EVENTS, &format!("{component_type}:"))
    }

    /// Atomically transform the event of one target.
    pub fn modify_event<F>(
        &self,
        component_type: ComponentType,
        target_id: &str,
        f: F,
    ) -> StateResult<Event>
    where
        F: FnOnce(Option<Event>) -> Event,
    {
        let key = Event::key_for(component_type, target_id);
        self.modify_value(EVENTS, &key, |current| Ok(f(current)))
    }

    pub fn delete_event(&self, component_type: ComponentType, target_id: &str) -> StateResult<bool> {
        self.remove_value(EVENTS, &Event::key_for(component_type, target_id))
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert a new node record at version 1.
    pub fn insert_node(&self, node: &Node) -> StateResult<Node> {
        let stored = Node {
            version: 1,
            ..node.clone()
        };
        self.insert_value(NODES, &stored.id, &stored)?;
        debug!(node_id = %stored.id, "node stored");
        Ok(stored)
    }

    pub fn get_node(&self, id: &str) -> StateResult<Option<Node>> {
        self.get_value(NODES, id)
    }

    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list_values(NODES, "")
    }

    /// Update a node, presenting the version last read.
    ///
    /// Rejected with [`StateError::StaleVersion`] if the stored version
    /// differs. On success the stored record carries `version + 1`.
    pub fn update_node(&self, node: &Node) -> StateResult<Node> {
        let updated = self.modify_value(NODES, &node.id, |current: Option<Node>| {
            let current = current.ok_or_else(|| StateError::NotFound(format!("node {}", node.id)))?;
            if current.version != node.version {
                return Err(StateError::StaleVersion {
                    id: node.id.clone(),
                    presented: node.version,
                    current: current.version,
                });
            }
            Ok(Node {
                version: current.version + 1,
                ..node.clone()
            })
        })?;
        debug!(node_id = %updated.id, version = updated.version, "node updated");
        Ok(updated)
    }

    pub fn delete_node(&self, id: &str) -> StateResult<bool> {
        let existed = self.remove_value(NODES, id)?;
        debug!(node_id = %id, existed, "node deleted");
        Ok(existed)
    }

    // ── Cloud hosts ────────────────────────────────────────────────

    pub fn put_cloud_host(&self, host: &CloudHost) -> StateResult<()> {
        self.put_value(CLOUD_HOSTS, &host.instance_id, host)
    }

    pub fn get_cloud_host(&self, instance_id: &str) -> StateResult<Option<CloudHost>> {
        self.get_value(CLOUD_HOSTS, instance_id)
    }

    pub fn list_cloud_hosts(&self) -> StateResult<Vec<CloudHost>> {
        self.list_values(CLOUD_HOSTS, "")
    }

    pub fn delete_cloud_host(&self, instance_id: &str) -> StateResult<bool> {
        self.remove_value(CLOUD_HOSTS, instance_id)
    }

    // ── Containers ─────────────────────────────────────────────────

    pub fn put_container(&self, container: &Container) -> StateResult<()> {
        self.put_value(CONTAINERS, &container.id, container)
    }

    pub fn get_container(&self, id: &str) -> StateResult<Option<Container>> {
        self.get_value(CONTAINERS, id)
    }

    pub fn list_containers(&self) -> StateResult<Vec<Container>> {
        self.list_values(CONTAINERS, "")
    }

    pub fn list_containers_by_service(&self, service_name: &str) -> StateResult<Vec<Container>> {
        Ok(self
            .list_containers()?
            .into_iter()
            .filter(|c| c.service_name == service_name)
            .collect())
    }

    pub fn list_containers_on_host(&self, host: &str) -> StateResult<Vec<Container>> {
        Ok(self
            .list_containers()?
            .into_iter()
            .filter(|c| c.host == host)
            .collect())
    }

    pub fn delete_container(&self, id: &str) -> StateResult<bool> {
        self.remove_value(CONTAINERS, id)
    }

    // ── Monitoring ─────────────────────────────────────────────────

    pub fn get_monitoring(
        &self,
        component_type: ComponentType,
        target_id: &str,
        field: &str,
    ) -> StateResult<Option<MonitoringLog>> {
        self.get_value(MONITORING, &MonitoringLog::key_for(component_type, target_id, field))
    }

    /// Fold a new sample into the running statistics of one field.
    pub fn record_monitoring(
        &self,
        component_type: ComponentType,
        target_id: &str,
        field: &str,
        value: f64,
    ) -> StateResult<MonitoringLog> {
        let key = MonitoringLog::key_for(component_type, target_id, field);
        let now = epoch_secs();
        self.modify_value(MONITORING, &key, |current: Option<MonitoringLog>| {
            Ok(match current {
                Some(log) => MonitoringLog {
                    count: log.count + 1,
                    sum: log.sum + value,
                    last_value: value,
                    updated_at: now,
                    ..log
                },
                None => MonitoringLog {
                    component_type,
                    target_id: target_id.to_string(),
                    field: field.to_string(),
                    count: 1,
                    sum: value,
                    last_value: value,
                    updated_at: now,
                },
            })
        })
    }

    pub fn list_monitoring_for(
        &self,
        component_type: ComponentType,
        target_id: &str,
    ) -> StateResult<Vec<MonitoringLog>> {
        self.list_values(MONITORING, &format!("{component_type}:{target_id}:"))
    }

    // ── Simulated metrics ──────────────────────────────────────────

    pub fn put_simulated_metric(&self, metric: &SimulatedMetric) -> StateResult<()> {
        if metric.min > metric.max {
            return Err(StateError::Invalid(format!(
                "simulated metric '{}' has min above max",
                metric.name
            )));
        }
        self.put_value(SIMULATED_METRICS, &metric.name, metric)
    }

    pub fn list_simulated_metrics(&self) -> StateResult<Vec<SimulatedMetric>> {
        self.list_values(SIMULATED_METRICS, "")
    }

    pub fn delete_simulated_metric(&self, name: &str) -> StateResult<bool> {
        self.remove_value(SIMULATED_METRICS, name)
    }

    // ── Decision records ───────────────────────────────────────────

    /// Append a decision record, assigning it the next sequence id.
    pub fn append_decision(&self, record: &DecisionRecord) -> StateResult<DecisionRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            let last_id = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value().parse::<u64>().unwrap_or(0),
                None => 0,
            };
            stored = DecisionRecord {
                id: last_id + 1,
                ..record.clone()
            };
            let key = format!("{:020}", stored.id);
            let bytes = encode(&stored)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = stored.id, target = %stored.target_id, decision = %stored.decision, "decision recorded");
        Ok(stored)
    }

    /// Decision records in append order.
    pub fn list_decisions(&self) -> StateResult<Vec<DecisionRecord>> {
        self.list_values(DECISIONS, "")
    }

    // ── Configuring markers ────────────────────────────────────────

    pub fn put_marker(&self, marker: &ConfiguringMarker) -> StateResult<()> {
        self.put_value(CONFIGURING, &marker.entity_id, marker)
    }

    pub fn get_marker(&self, entity_id: &str) -> StateResult<Option<ConfiguringMarker>> {
        self.get_value(CONFIGURING, entity_id)
    }

    pub fn list_markers(&self) -> StateResult<Vec<ConfiguringMarker>> {
        self.list_values(CONFIGURING, "")
    }

    pub fn delete_marker(&self, entity_id: &str) -> StateResult<bool> {
        self.remove_value(CONFIGURING, entity_id)
    }
}
