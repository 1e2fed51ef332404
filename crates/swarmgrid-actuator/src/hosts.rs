//! Host decisions: relieving an overloaded host and draining one.

use std::sync::Arc;

use swarmgrid_core::config::MonitoringConfig;
use swarmgrid_core::{CloudProviderClient, InstanceRequest};
use swarmgrid_state::*;
use tracing::{info, warn};

use crate::actuator::{Action, Actuator};
use crate::error::{ActuatorError, ActuatorResult, orchestration};

/// Bounds on the swarm size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    /// A drain is skipped at or below this many ready hosts.
    pub min_hosts: usize,
    pub max_hosts: Option<usize>,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            min_hosts: 1,
            max_hosts: None,
        }
    }
}

impl From<&MonitoringConfig> for HostLimits {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            min_hosts: config.min_hosts,
            max_hosts: config.max_hosts,
        }
    }
}

/// How to add a host when none can take a container.
#[derive(Clone)]
pub struct CloudProvisioning {
    pub client: Arc<dyn CloudProviderClient>,
    pub request: InstanceRequest,
    /// Login user of the provisioned image.
    pub username: String,
}

/// What a host address is known as, per host kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostLookup {
    pub node: Option<Node>,
    pub cloud: Option<CloudHost>,
}

impl Actuator {
    pub fn lookup_host(&self, public_ip: &str) -> ActuatorResult<HostLookup> {
        Ok(HostLookup {
            node: self.swarm.registry().find_by_address(public_ip)?,
            cloud: self
                .state
                .list_cloud_hosts()?
                .into_iter()
                .find(|h| h.public_ip.as_deref() == Some(public_ip)),
        })
    }

    pub(crate) async fn actuate_host(&self, public_ip: &str, decision: DecisionValue) -> ActuatorResult<Action> {
        let lookup = self.lookup_host(public_ip)?;
        let Some(node) = &lookup.node else {
            return Err(ActuatorError::NotFound(format!("host {public_ip}")));
        };
        match decision {
            DecisionValue::ScaleUp | DecisionValue::Replicate | DecisionValue::Migrate => {
                self.relieve(node).await
            }
            DecisionValue::ScaleDown | DecisionValue::Stop => self.drain(node, lookup.cloud.as_ref()).await,
            DecisionValue::None => Ok(Action::Nothing("no decision".to_string())),
        }
    }

    /// Move one managed container off `node`.
    async fn relieve(&self, node: &Node) -> ActuatorResult<Action> {
        let mut containers = self.state.list_containers_on_host(&node.address)?;
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        let Some(container) = containers.first() else {
            return Ok(Action::Nothing(format!("{} runs no managed containers", node.address)));
        };

        let placed = self
            .place(Some(&container.service_name), &[node.id.as_str()], node.coordinates())
            .await;
        let destination = match placed {
            Ok(destination) => destination,
            Err(ActuatorError::NoPlacement(_)) => {
                let hosts = self.swarm.registry().nodes()?.len();
                if let Some(max) = self.limits.max_hosts
                    && hosts >= max
                {
                    return Ok(Action::Nothing(format!("host limit of {max} reached")));
                }
                let Some(cloud) = &self.cloud else {
                    return Ok(Action::Nothing(format!(
                        "no other host can take {}",
                        container.service_name
                    )));
                };
                self.provision(cloud).await?
            }
            Err(e) => return Err(e),
        };
        self.migrate_to(container, &destination.host_address()).await
    }

    /// Migrate every managed container off `node`, then take it out of the
    /// swarm. A cloud host is stopped afterwards when a provider is wired.
    async fn drain(&self, node: &Node, cloud_host: Option<&CloudHost>) -> ActuatorResult<Action> {
        let ready = self.swarm.registry().ready_nodes()?.len();
        if ready <= self.limits.min_hosts {
            return Ok(Action::Nothing(format!(
                "{ready} ready hosts, minimum is {}",
                self.limits.min_hosts
            )));
        }
        if node.is_leader() {
            return Ok(Action::Nothing(format!("{} is the swarm leader", node.address)));
        }

        let containers = self.state.list_containers_on_host(&node.address)?;
        for container in &containers {
            self.migrate(container, node.coordinates()).await?;
        }
        self.swarm.leave(&node.host_address()).await?;

        if let Some(host) = cloud_host {
            match &self.cloud {
                Some(cloud) => {
                    cloud
                        .client
                        .stop_instance(&host.instance_id)
                        .await
                        .map_err(orchestration(format!("stopping instance {}", host.instance_id)))?;
                    info!(instance_id = %host.instance_id, "cloud host stopped");
                }
                None => warn!(instance_id = %host.instance_id, "no cloud provider, instance left running"),
            }
        }

        info!(host = %node.address, migrated = containers.len(), "host drained");
        Ok(Action::Drained {
            host: node.address.clone(),
            migrated: containers.len(),
        })
    }

    /// Create a cloud instance and join it to the swarm as a worker.
    ///
    /// The joined node is marked configuring by the swarm manager while it
    /// is labelled.
    async fn provision(&self, cloud: &CloudProvisioning) -> ActuatorResult<Node> {
        let instance = cloud
            .client
            .create_instance(&cloud.request)
            .await
            .map_err(orchestration("creating a cloud instance"))?;
        // Markers are keyed by instance id, which the provider assigns on create.
        let guard = self.configuring.acquire(&instance.instance_id)?;
        self.state.put_cloud_host(&instance.to_cloud_host())?;

        let Some(public_ip) = instance.public_ip.clone() else {
            return Err(ActuatorError::NotFound(format!(
                "public address of {}",
                instance.instance_id
            )));
        };
        let host = HostAddress {
            username: cloud.username.clone(),
            private_ip: instance.private_ip.clone().unwrap_or_else(|| public_ip.clone()),
            public_ip,
            coordinates: None,
            region: instance.region.clone(),
        };
        let node = self.swarm.join(&host, NodeRole::Worker).await?;
        guard.release()?;

        info!(instance_id = %instance.instance_id, node_id = %node.id, "cloud host provisioned");
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::tests::harness;
    use swarmgrid_core::testing::{FakeCloud, cloud_instance, live_container};

    fn with_cloud(h: &crate::actuator::tests::Harness, cloud: &Arc<FakeCloud>) -> Actuator {
        h.actuator.clone().with_cloud(CloudProvisioning {
            client: cloud.clone(),
            request: InstanceRequest {
                instance_type: "t2.micro".into(),
                region: Some("us-east-1".into()),
            },
            username: "ubuntu".into(),
        })
    }

    #[tokio::test]
    async fn scale_up_moves_a_container_near_the_host() {
        let h = harness();
        let action = h
            .actuator
            .actuate(ComponentType::Host, "10.0.0.1", DecisionValue::ScaleUp)
            .await
            .unwrap();
        assert!(matches!(&action, Action::Migrated { to_host, .. } if to_host == "10.0.0.2"), "{action:?}");
        assert_eq!(
            h.fake.calls(),
            vec![
                "launch web on 10.0.0.2".to_string(),
                "stop c-web-1 on 10.0.0.1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn relieve_stops_at_host_limit() {
        let h = harness();
        let registry = h.actuator.swarm.registry();
        registry.change_availability("n2", NodeAvailability::Drain).await.unwrap();
        registry.change_availability("n3", NodeAvailability::Drain).await.unwrap();
        h.fake.clear_calls();

        let limited = h.actuator.clone().with_limits(HostLimits {
            min_hosts: 1,
            max_hosts: Some(3),
        });
        let action = limited
            .actuate(ComponentType::Host, "10.0.0.1", DecisionValue::ScaleUp)
            .await
            .unwrap();
        assert!(action.is_nothing(), "{action:?}");
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn relieve_provisions_a_cloud_host() {
        let h = harness();
        let registry = h.actuator.swarm.registry();
        registry.change_availability("n2", NodeAvailability::Drain).await.unwrap();
        registry.change_availability("n3", NodeAvailability::Drain).await.unwrap();
        let cloud = Arc::new(FakeCloud::new());

        let action = with_cloud(&h, &cloud)
            .actuate(ComponentType::Host, "10.0.0.1", DecisionValue::Migrate)
            .await
            .unwrap();
        assert!(
            matches!(&action, Action::Migrated { to_host, .. } if to_host == "198.51.100.1"),
            "{action:?}"
        );
        assert_eq!(cloud.calls(), vec!["create_instance i-0001".to_string()]);
        assert!(h.state.get_cloud_host("i-0001").unwrap().is_some());
        assert!(!h.actuator.configuring.is_configuring("i-0001").unwrap());
    }

    #[tokio::test]
    async fn drain_migrates_then_leaves() {
        let h = harness();
        let db = live_container("c-db", "db", "10.0.0.2");
        h.fake.add_container(db.clone());
        h.state.put_container(&db.to_container()).unwrap();
        h.fake.clear_calls();

        let action = h
            .actuator
            .actuate(ComponentType::Host, "10.0.0.2", DecisionValue::ScaleDown)
            .await
            .unwrap();
        assert_eq!(
            action,
            Action::Drained {
                host: "10.0.0.2".into(),
                migrated: 1
            }
        );
        assert_eq!(
            h.fake.calls(),
            vec![
                "launch db on 10.0.0.1".to_string(),
                "stop c-db on 10.0.0.2".to_string(),
                "leave 10.0.0.2".to_string(),
            ]
        );
        assert!(h.actuator.swarm.registry().node("n2").is_err());
    }

    #[tokio::test]
    async fn drain_respects_minimum_and_leader() {
        let h = harness();
        let limited = h.actuator.clone().with_limits(HostLimits {
            min_hosts: 3,
            max_hosts: None,
        });
        let action = limited
            .actuate(ComponentType::Host, "10.0.0.2", DecisionValue::Stop)
            .await
            .unwrap();
        assert!(action.is_nothing());

        let action = h
            .actuator
            .actuate(ComponentType::Host, "10.0.0.1", DecisionValue::Stop)
            .await
            .unwrap();
        assert!(action.is_nothing());
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn draining_a_cloud_host_stops_its_instance() {
        let h = harness();
        let cloud = Arc::new(FakeCloud::new());
        cloud.add_instance(cloud_instance("i-9", InstanceState::Running));
        h.state
            .put_cloud_host(&CloudHost {
                public_ip: Some("10.0.0.3".into()),
                ..cloud_instance("i-9", InstanceState::Running).to_cloud_host()
            })
            .unwrap();

        let lookup = h.actuator.lookup_host("10.0.0.3").unwrap();
        assert!(lookup.node.is_some() && lookup.cloud.is_some());

        with_cloud(&h, &cloud)
            .actuate(ComponentType::Host, "10.0.0.3", DecisionValue::Stop)
            .await
            .unwrap();
        assert_eq!(cloud.calls(), vec!["stop_instance i-9".to_string()]);
    }

    #[tokio::test]
    async fn unknown_host_is_not_found() {
        let h = harness();
        let err = h
            .actuator
            .actuate(ComponentType::Host, "192.0.2.1", DecisionValue::Stop)
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::NotFound(_)));
        assert_eq!(h.actuator.lookup_host("192.0.2.1").unwrap(), HostLookup::default());
    }
}
