//! swarmgrid.toml configuration parser.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarmgrid_state::{
    ComponentType, Condition, Coordinates, Decision, DecisionValue, Field, HostAddress, Rule,
    SimulatedMetric,
};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmgridConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    pub bootstrap: Option<BootstrapConfig>,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub simulated_metrics: Vec<SimulatedMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// The host that initializes the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub username: String,
    pub public_ip: String,
    pub private_ip: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub region: Option<String>,
}

impl BootstrapConfig {
    pub fn host_address(&self) -> HostAddress {
        HostAddress {
            username: self.username.clone(),
            public_ip: self.public_ip.clone(),
            private_ip: self
                .private_ip
                .clone()
                .unwrap_or_else(|| self.public_ip.clone()),
            coordinates: self.coordinates,
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_monitor_interval")]
    pub host_interval: String,
    #[serde(default = "default_monitor_interval")]
    pub service_interval: String,
    /// Consecutive identical decisions required before actuation.
    pub debounce_threshold: u32,
    /// Per-decision overrides of `debounce_threshold`, keyed by decision name.
    #[serde(default)]
    pub decision_thresholds: BTreeMap<String, u32>,
    #[serde(default = "default_min_hosts")]
    pub min_hosts: usize,
    pub max_hosts: Option<usize>,
}

impl MonitoringConfig {
    pub fn host_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("monitoring.host_interval", &self.host_interval)
    }

    pub fn service_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("monitoring.service_interval", &self.service_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_cloud_hosts_interval")]
    pub cloud_hosts_interval: String,
    #[serde(default = "default_sync_interval")]
    pub containers_interval: String,
    #[serde(default = "default_sync_interval")]
    pub nodes_interval: String,
    #[serde(default = "default_configuring_ttl")]
    pub configuring_ttl: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cloud_hosts_interval: default_cloud_hosts_interval(),
            containers_interval: default_sync_interval(),
            nodes_interval: default_sync_interval(),
            configuring_ttl: default_configuring_ttl(),
        }
    }
}

impl ReconcileConfig {
    pub fn cloud_hosts_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.cloud_hosts_interval", &self.cloud_hosts_interval)
    }

    pub fn containers_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.containers_interval", &self.containers_interval)
    }

    pub fn nodes_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.nodes_interval", &self.nodes_interval)
    }

    pub fn configuring_ttl(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.configuring_ttl", &self.configuring_ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    #[serde(default = "default_scp_binary")]
    pub scp_binary: String,
    pub identity_file: Option<PathBuf>,
    pub port: Option<u16>,
    /// Upper bound for any remote command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            scp_binary: default_scp_binary(),
            identity_file: None,
            port: None,
            command_timeout: default_command_timeout(),
        }
    }
}

impl RemoteConfig {
    pub fn command_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("remote.command_timeout", &self.command_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_network")]
    pub network: String,
    /// Label marking containers the manager owns.
    #[serde(default = "default_managed_label")]
    pub managed_label: String,
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            managed_label: default_managed_label(),
            docker_binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
    #[serde(default = "default_http_timeout")]
    pub timeout: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: default_prometheus_port(),
            timeout: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationsConfig {
    #[serde(default = "default_locations_port")]
    pub port: u16,
    #[serde(default = "default_locations_path")]
    pub path: String,
    #[serde(default = "default_http_timeout")]
    pub timeout: String,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            port: default_locations_port(),
            path: default_locations_path(),
            timeout: default_http_timeout(),
        }
    }
}

impl PrometheusConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("prometheus.timeout", &self.timeout)
    }
}

impl LocationsConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("locations.timeout", &self.timeout)
    }
}

/// Rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub component_type: ComponentType,
    pub decision: DecisionValue,
    #[serde(default)]
    pub priority: i32,
    pub conditions: Vec<String>,
    #[serde(default)]
    pub generic: bool,
    #[serde(default)]
    pub targets: BTreeSet<String>,
}

impl RuleConfig {
    pub fn to_rule(&self) -> Rule {
        Rule {
            name: self.name.clone(),
            component_type: self.component_type,
            decision: Decision::new(self.component_type, self.decision),
            priority: self.priority,
            conditions: self.conditions.clone(),
            generic: self.generic,
            targets: self.targets.clone(),
        }
    }
}

impl SwarmgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SwarmgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitoring;
        if m.debounce_threshold == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.debounce_threshold must be at least 1".into(),
            ));
        }
        for (name, threshold) in &m.decision_thresholds {
            name.parse::<DecisionValue>()
                .map_err(|e| ConfigError::Invalid(format!("monitoring.decision_thresholds: {e}")))?;
            if *threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "monitoring.decision_thresholds.{name} must be at least 1"
                )));
            }
        }
        if let Some(max) = m.max_hosts
            && max < m.min_hosts
        {
            return Err(ConfigError::Invalid(format!(
                "monitoring.max_hosts ({max}) is below min_hosts ({})",
                m.min_hosts
            )));
        }
        m.host_interval()?;
        m.service_interval()?;
        self.reconcile.cloud_hosts_interval()?;
        self.reconcile.containers_interval()?;
        self.reconcile.nodes_interval()?;
        self.reconcile.configuring_ttl()?;
        self.remote.command_timeout()?;
        self.prometheus.timeout()?;
        self.locations.timeout()?;
        for rule in &self.rules {
            rule.to_rule()
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}

fn duration_field(name: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::Invalid(format!("{name}: invalid duration '{value}'")))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/swarmgrid")
}

fn default_monitor_interval() -> String {
    "60s".to_string()
}

fn default_min_hosts() -> usize {
    1
}

fn default_cloud_hosts_interval() -> String {
    "45s".to_string()
}

fn default_sync_interval() -> String {
    "10s".to_string()
}

fn default_configuring_ttl() -> String {
    "10m".to_string()
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_scp_binary() -> String {
    "scp".to_string()
}

fn default_command_timeout() -> String {
    "5m".to_string()
}

fn default_network() -> String {
    "swarmgrid-network".to_string()
}

fn default_managed_label() -> String {
    "swarmgrid.managed".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_locations_port() -> u16 {
    1919
}

fn default_locations_path() -> String {
    "/api/location/requests".to_string()
}

fn default_http_timeout() -> String {
    "10s".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_state::{Operator, ValueMode};

    const FULL: &str = r#"
[manager]
data_dir = "/tmp/swarmgrid"

[bootstrap]
username = "ubuntu"
public_ip = "203.0.113.1"
private_ip = "10.0.0.1"
coordinates = { latitude = 41.15, longitude = -8.61 }
region = "europe"

[monitoring]
host_interval = "30s"
debounce_threshold = 3
min_hosts = 2
max_hosts = 6

[monitoring.decision_thresholds]
stop = 5

[[fields]]
name = "cpu-%"
query = "100 - avg(rate(node_cpu_seconds_total{mode=\"idle\"}[1m])) * 100"

[[conditions]]
name = "cpu-over-80"
field = "cpu-%"
operator = "greater_than"
threshold = 80.0

[[rules]]
name = "host-overloaded"
component_type = "host"
decision = "scale_up"
conditions = ["cpu-over-80"]
generic = true
"#;

    #[test]
    fn parse_full() {
        let config = SwarmgridConfig::from_toml(FULL).unwrap();
        assert_eq!(config.monitoring.debounce_threshold, 3);
        assert_eq!(config.monitoring.decision_thresholds.get("stop"), Some(&5));
        assert_eq!(
            config.monitoring.host_interval().unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(config.conditions[0].operator, Operator::GreaterThan);
        assert_eq!(config.conditions[0].value_mode, ValueMode::Absolute);

        let rule = config.rules[0].to_rule();
        assert_eq!(rule.decision.component_type, ComponentType::Host);

        let bootstrap = config.bootstrap.unwrap().host_address();
        assert_eq!(bootstrap.private_ip, "10.0.0.1");
        assert_eq!(bootstrap.coordinates, Some(Coordinates::new(41.15, -8.61)));
    }

    #[test]
    fn reconcile_defaults() {
        let config = SwarmgridConfig::from_toml("[monitoring]\ndebounce_threshold = 2\n").unwrap();
        assert_eq!(
            config.reconcile.cloud_hosts_interval().unwrap(),
            Duration::from_secs(45)
        );
        assert_eq!(
            config.reconcile.containers_interval().unwrap(),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.reconcile.nodes_interval().unwrap(),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.remote.command_timeout().unwrap(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn debounce_threshold_is_required() {
        let err = SwarmgridConfig::from_toml("[monitoring]\nhost_interval = \"10s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("debounce_threshold"));
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let err = SwarmgridConfig::from_toml("[monitoring]\ndebounce_threshold = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_duration_is_invalid() {
        let toml = "[monitoring]\ndebounce_threshold = 1\n[reconcile]\nnodes_interval = \"often\"\n";
        let err = SwarmgridConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("reconcile.nodes_interval"));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarmgrid.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = SwarmgridConfig::from_file(&path).unwrap();
        assert_eq!(config.rules.len(), 1);

        let missing = SwarmgridConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
