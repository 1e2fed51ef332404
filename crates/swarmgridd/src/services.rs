//! Builds the control loop out of a parsed config.

use std::sync::Arc;

use swarmgrid_actuator::{Actuator, HostLimits};
use swarmgrid_cluster::SwarmManager;
use swarmgrid_core::config::RemoteConfig;
use swarmgrid_core::{ContainerOrchestrationClient, Credentials, SwarmgridConfig};
use swarmgrid_monitor::Monitor;
use swarmgrid_placement::{LocationSampler, Placer};
use swarmgrid_remote::{DockerCli, HttpLocations, PrometheusMetrics, SshExecutor};
use swarmgrid_rules::{DebounceThresholds, Debouncer, Rulebook, Sampler};
use swarmgrid_state::{ConfiguringRegistry, StateStore};
use tracing::info;

pub const DB_FILE: &str = "swarmgrid.redb";

pub struct Services {
    pub state: StateStore,
    pub configuring: ConfiguringRegistry,
    pub orchestration: Arc<dyn ContainerOrchestrationClient>,
    pub swarm: SwarmManager,
    pub monitor: Monitor,
}

pub fn credentials(remote: &RemoteConfig) -> Credentials {
    Credentials {
        identity_file: remote.identity_file.clone(),
        port: remote.port,
    }
}

impl Services {
    pub fn build(config: &SwarmgridConfig) -> anyhow::Result<Self> {
        let data_dir = &config.manager.data_dir;
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE);
        let state = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");

        let seeded = Rulebook::new(state.clone()).seed(config)?;
        info!(inserted = seeded, rules = config.rules.len(), "rulebook seeded");

        let configuring = ConfiguringRegistry::new(state.clone(), config.reconcile.configuring_ttl()?);

        // Cluster-wide commands go to the bootstrap host, else the last known leader.
        let manager = match &config.bootstrap {
            Some(bootstrap) => Some(bootstrap.host_address()),
            None => state
                .list_nodes()?
                .into_iter()
                .find(|n| n.is_leader())
                .map(|n| n.host_address()),
        };
        let remote = Arc::new(SshExecutor::from_config(&config.remote)?);
        let mut docker = DockerCli::new(remote, credentials(&config.remote))
            .with_binary(config.orchestration.docker_binary.clone())
            .with_network(config.orchestration.network.clone());
        if let Some(manager) = manager {
            info!(manager = %manager, "docker manager host");
            docker = docker.with_manager(manager);
        }
        let orchestration: Arc<dyn ContainerOrchestrationClient> = Arc::new(docker);

        let swarm = SwarmManager::new(state.clone(), orchestration.clone())
            .with_network(config.orchestration.network.clone())
            .with_configuring(configuring.clone());
        let placer = Placer::new(LocationSampler::new(Arc::new(HttpLocations::from_config(
            &config.locations,
        )?)));
        let actuator = Actuator::new(
            state.clone(),
            orchestration.clone(),
            swarm.clone(),
            placer,
            configuring.clone(),
        )
        .with_limits(HostLimits::from(&config.monitoring));

        let sampler = Sampler::new(
            state.clone(),
            Arc::new(PrometheusMetrics::from_config(&config.prometheus)?),
        );
        let debouncer = Debouncer::new(state.clone(), DebounceThresholds::from(&config.monitoring));
        let monitor = Monitor::new(state.clone(), sampler, debouncer, actuator);

        Ok(Self {
            state,
            configuring,
            orchestration,
            swarm,
            monitor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use swarmgrid_state::ComponentType;

    fn config(data_dir: &std::path::Path) -> SwarmgridConfig {
        let toml = format!(
            r#"
[manager]
data_dir = "{}"

[monitoring]
debounce_threshold = 2

[[fields]]
name = "cpu-%"
query = "container_cpu"

[[conditions]]
name = "cpu-high"
field = "cpu-%"
operator = "greater_than"
threshold = 80.0

[[rules]]
name = "container-hot"
component_type = "container"
decision = "migrate"
conditions = ["cpu-high"]
generic = true
"#,
            data_dir.display()
        );
        SwarmgridConfig::from_toml(&toml).unwrap()
    }

    #[test]
    fn credentials_follow_the_remote_section() {
        let remote = RemoteConfig {
            identity_file: Some(PathBuf::from("/keys/swarm")),
            port: Some(2222),
            ..RemoteConfig::default()
        };
        let creds = credentials(&remote);
        assert_eq!(creds.identity_file, Some(PathBuf::from("/keys/swarm")));
        assert_eq!(creds.port, Some(2222));
    }

    #[tokio::test]
    async fn build_opens_the_store_and_seeds_once() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let config = config(&data_dir);

        let services = Services::build(&config).unwrap();
        assert!(data_dir.join(DB_FILE).exists());
        let rulebook = Rulebook::new(services.state.clone());
        let rules = rulebook.rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].component_type, ComponentType::Container);
        drop(rulebook);
        drop(services);

        // Reopening keeps the rulebook as it was.
        let services = Services::build(&config).unwrap();
        assert_eq!(Rulebook::new(services.state.clone()).rules().unwrap().len(), 1);
    }
}
