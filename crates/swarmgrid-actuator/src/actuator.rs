//! Decision actuation for service, container and app targets.
//!
//! Host targets live in [`crate::hosts`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use swarmgrid_cluster::SwarmManager;
use swarmgrid_core::{ContainerOrchestrationClient, ServiceSpec};
use swarmgrid_placement::Placer;
use swarmgrid_state::*;
use tracing::info;

use crate::error::{ActuatorError, ActuatorResult, orchestration};
use crate::hosts::{CloudProvisioning, HostLimits};

/// What an actuation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Launched {
        service: String,
        container_id: String,
        host: String,
    },
    Stopped {
        service: String,
        container_id: String,
        host: String,
    },
    Migrated {
        service: String,
        from_container: String,
        to_container: String,
        from_host: String,
        to_host: String,
    },
    /// Containers moved off a host that then left the swarm.
    Drained { host: String, migrated: usize },
    /// One action per service of an app.
    Fanout(Vec<Action>),
    /// Nothing was done, with the reason.
    Nothing(String),
}

impl Action {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Action::Nothing(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Launched {
                service,
                container_id,
                host,
            } => write!(f, "launched {service} ({container_id}) on {host}"),
            Action::Stopped {
                service,
                container_id,
                host,
            } => write!(f, "stopped {service} ({container_id}) on {host}"),
            Action::Migrated {
                service,
                from_container,
                to_container,
                from_host,
                to_host,
            } => write!(
                f,
                "migrated {service} from {from_host} ({from_container}) to {to_host} ({to_container})"
            ),
            Action::Drained { host, migrated } => {
                write!(f, "drained {host} ({migrated} containers moved)")
            }
            Action::Fanout(actions) => {
                let parts: Vec<String> = actions.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join("; "))
            }
            Action::Nothing(reason) => write!(f, "no action: {reason}"),
        }
    }
}

#[derive(Clone)]
pub struct Actuator {
    pub(crate) state: StateStore,
    pub(crate) orchestration: Arc<dyn ContainerOrchestrationClient>,
    pub(crate) swarm: SwarmManager,
    pub(crate) placer: Placer,
    pub(crate) configuring: ConfiguringRegistry,
    pub(crate) limits: HostLimits,
    pub(crate) cloud: Option<CloudProvisioning>,
}

impl Actuator {
    pub fn new(
        state: StateStore,
        orchestration: Arc<dyn ContainerOrchestrationClient>,
        swarm: SwarmManager,
        placer: Placer,
        configuring: ConfiguringRegistry,
    ) -> Self {
        Self {
            state,
            orchestration,
            swarm,
            placer,
            configuring,
            limits: HostLimits::default(),
            cloud: None,
        }
    }

    pub fn with_limits(mut self, limits: HostLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Allow relieving an overloaded host by provisioning a cloud instance.
    pub fn with_cloud(mut self, cloud: CloudProvisioning) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Apply `decision` to a target.
    pub async fn actuate(
        &self,
        component_type: ComponentType,
        target_id: &str,
        decision: DecisionValue,
    ) -> ActuatorResult<Action> {
        if decision.is_none() {
            return Ok(Action::Nothing("no decision".to_string()));
        }
        info!(component = %component_type, target = %target_id, %decision, "actuating");
        let action = match component_type {
            ComponentType::Service => self.actuate_service(target_id, decision).await?,
            ComponentType::Container => self.actuate_container(target_id, decision).await?,
            ComponentType::Host => self.actuate_host(target_id, decision).await?,
            ComponentType::App => self.actuate_app(target_id, decision).await?,
        };
        info!(component = %component_type, target = %target_id, %action, "actuated");
        Ok(action)
    }

    async fn actuate_service(&self, service: &str, decision: DecisionValue) -> ActuatorResult<Action> {
        let mut replicas = self.state.list_containers_by_service(service)?;
        replicas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let (Some(oldest), Some(newest)) = (replicas.first(), replicas.last()) else {
            return Err(ActuatorError::NotFound(format!("containers of service {service}")));
        };

        match decision {
            DecisionValue::ScaleUp | DecisionValue::Replicate => {
                let destination = self.place(Some(service), &[], None).await?;
                let launched = self.launch(&destination.host_address(), oldest).await?;
                Ok(Action::Launched {
                    service: service.to_string(),
                    container_id: launched.id,
                    host: launched.host,
                })
            }
            DecisionValue::ScaleDown if replicas.len() <= 1 => Ok(Action::Nothing(format!(
                "{service} is down to its last replica"
            ))),
            DecisionValue::ScaleDown | DecisionValue::Stop => self.stop(newest).await,
            DecisionValue::Migrate => self.migrate(oldest, None).await,
            DecisionValue::None => Ok(Action::Nothing("no decision".to_string())),
        }
    }

    async fn actuate_container(&self, id: &str, decision: DecisionValue) -> ActuatorResult<Action> {
        let container = self
            .state
            .get_container(id)?
            .ok_or_else(|| ActuatorError::NotFound(format!("container {id}")))?;

        match decision {
            DecisionValue::ScaleUp | DecisionValue::Replicate => {
                let host = self.host_of(&container)?;
                let launched = self.launch(&host, &container).await?;
                Ok(Action::Launched {
                    service: container.service_name,
                    container_id: launched.id,
                    host: launched.host,
                })
            }
            DecisionValue::ScaleDown | DecisionValue::Stop => self.stop(&container).await,
            DecisionValue::Migrate => self.migrate(&container, None).await,
            DecisionValue::None => Ok(Action::Nothing("no decision".to_string())),
        }
    }

    /// Apply the decision to every service of the app, in name order.
    async fn actuate_app(&self, app: &str, decision: DecisionValue) -> ActuatorResult<Action> {
        let services: BTreeSet<String> = self
            .state
            .list_containers()?
            .into_iter()
            .filter(|c| c.app() == Some(app))
            .map(|c| c.service_name)
            .collect();
        if services.is_empty() {
            return Err(ActuatorError::NotFound(format!("containers of app {app}")));
        }

        let mut actions = Vec::with_capacity(services.len());
        for service in &services {
            actions.push(self.actuate_service(service, decision).await?);
        }
        Ok(Action::Fanout(actions))
    }

    /// Placement over the currently ready nodes.
    pub(crate) async fn place(
        &self,
        service: Option<&str>,
        exclude: &[&str],
        anchor: Option<Coordinates>,
    ) -> ActuatorResult<Node> {
        let nodes = self.swarm.registry().ready_nodes()?;
        self.placer
            .choose(&nodes, service, exclude, anchor)
            .await
            .ok_or_else(|| ActuatorError::NoPlacement(service.unwrap_or("container").to_string()))
    }

    /// Address of the host running `container`.
    pub(crate) fn host_of(&self, container: &Container) -> ActuatorResult<HostAddress> {
        Ok(self
            .swarm
            .registry()
            .find_by_address(&container.host)?
            .map(|n| n.host_address())
            .unwrap_or_else(|| HostAddress::new(String::new(), container.host.clone())))
    }

    /// Launch a copy of `template` on `host` and record it.
    pub(crate) async fn launch(&self, host: &HostAddress, template: &Container) -> ActuatorResult<Container> {
        let spec = ServiceSpec::from_container(template);
        let live = self
            .orchestration
            .launch(host, &spec)
            .await
            .map_err(orchestration(format!("launching {} on {host}", spec.service_name)))?;
        let container = live.to_container();
        self.state.put_container(&container)?;
        info!(service = %container.service_name, container_id = %container.id, host = %container.host, "container launched");
        Ok(container)
    }

    pub(crate) async fn stop(&self, container: &Container) -> ActuatorResult<Action> {
        let host = self.host_of(container)?;
        self.orchestration
            .stop(&host, &container.id)
            .await
            .map_err(orchestration(format!("stopping {} on {host}", container.id)))?;
        self.state.delete_container(&container.id)?;
        info!(service = %container.service_name, container_id = %container.id, host = %container.host, "container stopped");
        Ok(Action::Stopped {
            service: container.service_name.clone(),
            container_id: container.id.clone(),
            host: container.host.clone(),
        })
    }

    /// Launch a replacement on another host, then stop the original.
    pub(crate) async fn migrate(
        &self,
        container: &Container,
        anchor: Option<Coordinates>,
    ) -> ActuatorResult<Action> {
        let source = self.swarm.registry().find_by_address(&container.host)?;
        let exclude: Vec<&str> = source.iter().map(|n| n.id.as_str()).collect();
        let destination = self
            .place(Some(&container.service_name), &exclude, anchor)
            .await?;
        self.migrate_to(container, &destination.host_address()).await
    }

    pub(crate) async fn migrate_to(
        &self,
        container: &Container,
        destination: &HostAddress,
    ) -> ActuatorResult<Action> {
        let launched = self.launch(destination, container).await?;
        self.stop(container).await?;
        Ok(Action::Migrated {
            service: container.service_name.clone(),
            from_container: container.id.clone(),
            to_container: launched.id,
            from_host: container.host.clone(),
            to_host: launched.host,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use swarmgrid_core::testing::{FakeLocations, FakeOrchestration, live_container, live_node};
    use swarmgrid_placement::LocationSampler;

    pub(crate) struct Harness {
        pub actuator: Actuator,
        pub fake: Arc<FakeOrchestration>,
        pub locations: Arc<FakeLocations>,
        pub state: StateStore,
    }

    fn coordinates_label(lat: f64, lon: f64) -> BTreeMap<String, String> {
        BTreeMap::from([(
            labels::COORDINATES.to_string(),
            format!(r#"{{"latitude":{lat},"longitude":{lon}}}"#),
        )])
    }

    /// Leader at 10.0.0.1 (Lisbon), workers at 10.0.0.2 (Porto) and
    /// 10.0.0.3 (Berlin); `web` runs on 10.0.0.1 with one replica.
    pub(crate) fn harness() -> Harness {
        let state = StateStore::open_in_memory().unwrap();
        let fake = Arc::new(FakeOrchestration::new());
        let swarm = SwarmManager::new(state.clone(), fake.clone());
        for (id, ip, role, leader, lat, lon) in [
            ("n1", "10.0.0.1", NodeRole::Manager, true, 38.72, -9.14),
            ("n2", "10.0.0.2", NodeRole::Worker, false, 41.16, -8.63),
            ("n3", "10.0.0.3", NodeRole::Worker, false, 52.52, 13.40),
        ] {
            let mut node = live_node(id, ip, role, leader);
            node.labels = coordinates_label(lat, lon);
            fake.add_node(node.clone());
            swarm.registry().track(&node).unwrap();
        }

        let mut web = live_container("c-web-1", "web", "10.0.0.1");
        web.created_at = 1;
        fake.add_container(web.clone());
        state.put_container(&web.to_container()).unwrap();

        let locations = Arc::new(FakeLocations::new());
        let placer = Placer::new(LocationSampler::new(locations.clone()));
        let configuring = ConfiguringRegistry::new(state.clone(), Duration::from_secs(600));
        let actuator = Actuator::new(state.clone(), fake.clone(), swarm, placer, configuring);
        Harness {
            actuator,
            fake,
            locations,
            state,
        }
    }

    #[tokio::test]
    async fn service_scale_up_follows_demand() {
        let h = harness();
        h.locations.set("10.0.0.3", "web", 40);
        let action = h
            .actuator
            .actuate(ComponentType::Service, "web", DecisionValue::ScaleUp)
            .await
            .unwrap();
        let Action::Launched { host, .. } = &action else {
            panic!("{action:?}");
        };
        assert_eq!(host, "10.0.0.3");
        assert_eq!(h.state.list_containers_by_service("web").unwrap().len(), 2);
        assert_eq!(h.fake.calls(), vec!["launch web on 10.0.0.3".to_string()]);
    }

    #[tokio::test]
    async fn service_scale_down_keeps_last_replica() {
        let h = harness();
        let action = h
            .actuator
            .actuate(ComponentType::Service, "web", DecisionValue::ScaleDown)
            .await
            .unwrap();
        assert!(action.is_nothing());
        assert!(h.fake.calls().is_empty());

        h.actuator
            .actuate(ComponentType::Service, "web", DecisionValue::Replicate)
            .await
            .unwrap();
        let action = h
            .actuator
            .actuate(ComponentType::Service, "web", DecisionValue::ScaleDown)
            .await
            .unwrap();
        assert!(matches!(action, Action::Stopped { .. }), "{action:?}");
        assert_eq!(h.state.list_containers_by_service("web").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn migrate_launches_before_stopping() {
        let h = harness();
        h.locations.set("10.0.0.2", "web", 10);
        let action = h
            .actuator
            .actuate(ComponentType::Container, "c-web-1", DecisionValue::Migrate)
            .await
            .unwrap();
        assert!(matches!(&action, Action::Migrated { to_host, .. } if to_host == "10.0.0.2"));
        assert_eq!(
            h.fake.calls(),
            vec![
                "launch web on 10.0.0.2".to_string(),
                "stop c-web-1 on 10.0.0.1".to_string(),
            ]
        );
        assert!(h.state.get_container("c-web-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_launch_stops_nothing() {
        let h = harness();
        h.fake.fail("launch");
        let err = h
            .actuator
            .actuate(ComponentType::Container, "c-web-1", DecisionValue::Migrate)
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Orchestration { .. }), "{err}");
        assert!(h.fake.calls().is_empty());
        assert!(h.state.get_container("c-web-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn container_replicate_stays_on_its_host() {
        let h = harness();
        h.locations.set("10.0.0.3", "web", 99);
        let action = h
            .actuator
            .actuate(ComponentType::Container, "c-web-1", DecisionValue::Replicate)
            .await
            .unwrap();
        assert!(matches!(&action, Action::Launched { host, .. } if host == "10.0.0.1"));
    }

    #[tokio::test]
    async fn app_fans_out_to_each_service() {
        let h = harness();
        for (id, service) in [("c-api", "api"), ("c-ui", "ui")] {
            let mut c = live_container(id, service, "10.0.0.2");
            c.labels.insert(APP_LABEL.to_string(), "shop".to_string());
            h.fake.add_container(c.clone());
            h.state.put_container(&c.to_container()).unwrap();
        }
        let action = h
            .actuator
            .actuate(ComponentType::App, "shop", DecisionValue::Stop)
            .await
            .unwrap();
        let Action::Fanout(actions) = action else {
            panic!("expected fanout");
        };
        assert_eq!(actions.len(), 2);
        assert!(h.state.list_containers_by_service("api").unwrap().is_empty());
        assert!(h.state.list_containers_by_service("web").unwrap().len() == 1);
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let h = harness();
        let err = h
            .actuator
            .actuate(ComponentType::Service, "nope", DecisionValue::ScaleUp)
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::NotFound(_)));
        let none = h
            .actuator
            .actuate(ComponentType::Service, "nope", DecisionValue::None)
            .await
            .unwrap();
        assert!(none.is_nothing());
    }
}
