//! In-memory collaborator fakes for tests.
//!
//! Each fake records the calls that change the outside world, in the
//! order they complete, so tests can assert on ordering. Any operation
//! can be made to fail with `fail("<op>")`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use swarmgrid_state::{
    Field, HostAddress, InstanceState, ManagerStatus, NodeAvailability, NodeRole, NodeState,
};

use crate::collaborators::*;
use crate::types::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared call log and failure switches.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl Recorder {
    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn check(&self, op: &str) -> anyhow::Result<()> {
        if lock(&self.failing).contains(op) {
            bail!("injected failure: {op}");
        }
        Ok(())
    }
}

/// A live node with sensible defaults.
pub fn live_node(id: &str, address: &str, role: NodeRole, leader: bool) -> LiveNode {
    LiveNode {
        id: id.to_string(),
        hostname: format!("host-{id}"),
        address: address.to_string(),
        role,
        availability: NodeAvailability::Active,
        state: NodeState::Ready,
        manager_status: (role == NodeRole::Manager).then(|| ManagerStatus {
            leader,
            reachability: "reachable".to_string(),
            addr: format!("{address}:2377"),
        }),
        labels: BTreeMap::new(),
        engine_version: 1,
    }
}

/// A running live container.
pub fn live_container(id: &str, service: &str, host: &str) -> LiveContainer {
    LiveContainer {
        id: id.to_string(),
        name: format!("{service}-{id}"),
        image: format!("{service}:latest"),
        service_name: service.to_string(),
        host: host.to_string(),
        state: "running".to_string(),
        ports: BTreeMap::new(),
        labels: BTreeMap::from([("swarmgrid.managed".to_string(), "true".to_string())]),
        created_at: 0,
    }
}

// ── Orchestration ──────────────────────────────────────────────────

/// Fake container orchestration engine holding nodes and containers.
#[derive(Default)]
pub struct FakeOrchestration {
    nodes: Mutex<Vec<LiveNode>>,
    containers: Mutex<Vec<LiveContainer>>,
    leave_delays: Mutex<HashMap<String, Duration>>,
    update_hook: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
    next_id: AtomicU64,
    recorder: Recorder,
}

impl FakeOrchestration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: LiveNode) {
        lock(&self.nodes).push(node);
    }

    pub fn add_container(&self, container: LiveContainer) {
        lock(&self.containers).push(container);
    }

    pub fn nodes(&self) -> Vec<LiveNode> {
        lock(&self.nodes).clone()
    }

    pub fn containers(&self) -> Vec<LiveContainer> {
        lock(&self.containers).clone()
    }

    pub fn set_node(&self, node: LiveNode) {
        let mut nodes = lock(&self.nodes);
        match nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => nodes.push(node),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.recorder.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.recorder.calls).clear();
    }

    pub fn fail(&self, op: &str) {
        lock(&self.recorder.failing).insert(op.to_string());
    }

    pub fn recover(&self, op: &str) {
        lock(&self.recorder.failing).remove(op);
    }

    /// Make `leave_cluster` on the given host take `delay` to complete.
    pub fn delay_leave(&self, public_ip: &str, delay: Duration) {
        lock(&self.leave_delays).insert(public_ip.to_string(), delay);
    }

    /// Call `hook` with the node id whenever `update_node` is issued.
    pub fn on_update_node(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.update_hook) = Some(Box::new(hook));
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn add_member(&self, host: &HostAddress, role: NodeRole, leader: bool) -> String {
        let id = format!("node-{}", self.next());
        self.add_node(live_node(&id, &host.public_ip, role, leader));
        id
    }
}

#[async_trait]
impl ContainerOrchestrationClient for FakeOrchestration {
    async fn launch(&self, host: &HostAddress, spec: &ServiceSpec) -> anyhow::Result<LiveContainer> {
        self.recorder.check("launch")?;
        let id = format!("c{}", self.next());
        let mut container = live_container(&id, &spec.service_name, &host.public_ip);
        container.image = spec.image.clone();
        container.labels.extend(spec.labels.clone());
        container.ports = spec.ports.clone();
        self.add_container(container.clone());
        self.recorder
            .record(format!("launch {} on {}", spec.service_name, host.public_ip));
        Ok(container)
    }

    async fn stop(&self, host: &HostAddress, container_id: &str) -> anyhow::Result<()> {
        self.recorder.check("stop")?;
        {
            let mut containers = lock(&self.containers);
            let before = containers.len();
            containers.retain(|c| c.id != container_id);
            if containers.len() == before {
                bail!("no such container: {container_id}");
            }
        }
        self.recorder
            .record(format!("stop {container_id} on {}", host.public_ip));
        Ok(())
    }

    async fn list_by_labels(
        &self,
        filter: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<LiveContainer>> {
        self.recorder.check("list_by_labels")?;
        Ok(lock(&self.containers)
            .iter()
            .filter(|c| filter.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self) -> anyhow::Result<Vec<LiveNode>> {
        self.recorder.check("list_nodes")?;
        Ok(self.nodes())
    }

    async fn inspect_node(&self, node_id: &str) -> anyhow::Result<Option<LiveNode>> {
        self.recorder.check("inspect_node")?;
        Ok(lock(&self.nodes).iter().find(|n| n.id == node_id).cloned())
    }

    async fn init_cluster(&self, host: &HostAddress) -> anyhow::Result<String> {
        self.recorder.check("init")?;
        if lock(&self.nodes).iter().any(|n| n.address == host.public_ip) {
            bail!("this node is already part of a swarm");
        }
        let id = self.add_member(host, NodeRole::Manager, true);
        self.recorder.record(format!("init {}", host.public_ip));
        Ok(format!(
            "Swarm initialized: current node ({id}) is now a manager.\n\n\
             To add a worker to this swarm, run the following command:\n"
        ))
    }

    async fn join_token(&self, role: NodeRole) -> anyhow::Result<String> {
        self.recorder.check("join_token")?;
        Ok(format!("SWMTKN-{role}"))
    }

    async fn join_cluster(&self, host: &HostAddress, spec: &JoinSpec) -> anyhow::Result<String> {
        self.recorder.check("join")?;
        if lock(&self.nodes).iter().any(|n| n.address == host.public_ip) {
            bail!("this node is already part of a swarm");
        }
        let role = if spec.token.ends_with("manager") {
            NodeRole::Manager
        } else {
            NodeRole::Worker
        };
        let id = self.add_member(host, role, false);
        self.recorder.record(format!("join {} as {role}", host.public_ip));
        Ok(id)
    }

    async fn leave_cluster(&self, host: &HostAddress, force: bool) -> anyhow::Result<()> {
        let delay = lock(&self.leave_delays).get(&host.public_ip).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.recorder.check("leave")?;
        {
            let mut nodes = lock(&self.nodes);
            let Some(pos) = nodes.iter().position(|n| n.address == host.public_ip) else {
                bail!("this node is not part of a swarm");
            };
            if nodes[pos].role == NodeRole::Manager && !force {
                bail!("a manager must be demoted or forced out");
            }
            nodes.remove(pos);
        }
        self.recorder.record(format!("leave {}", host.public_ip));
        Ok(())
    }

    async fn membership(&self, host: &HostAddress) -> anyhow::Result<LocalMembership> {
        self.recorder.check("membership")?;
        let nodes = lock(&self.nodes);
        let managers = nodes.iter().filter(|n| n.role == NodeRole::Manager).count() as u32;
        Ok(match nodes.iter().find(|n| n.address == host.public_ip) {
            Some(node) => LocalMembership {
                node_id: Some(node.id.clone()),
                state: "active".to_string(),
                is_manager: node.role == NodeRole::Manager,
                managers,
            },
            None => LocalMembership::inactive(),
        })
    }

    async fn update_node(&self, node_id: &str, version: u64, spec: &NodeSpec) -> anyhow::Result<()> {
        if let Some(hook) = lock(&self.update_hook).as_ref() {
            hook(node_id);
        }
        self.recorder.check("update_node")?;
        {
            let mut nodes = lock(&self.nodes);
            let node = nodes
                .iter_mut()
                .find(|n| n.id == node_id)
                .ok_or_else(|| anyhow!("no such node: {node_id}"))?;
            if node.engine_version != version {
                bail!("update out of sequence");
            }
            node.role = spec.role;
            node.availability = spec.availability;
            node.labels = spec.labels.clone();
            if spec.role == NodeRole::Worker {
                node.manager_status = None;
            }
            node.engine_version += 1;
        }
        self.recorder.record(format!(
            "update_node {node_id} role={} availability={:?}",
            spec.role, spec.availability
        ));
        Ok(())
    }

    async fn remove_node(&self, node_id: &str, _force: bool) -> anyhow::Result<()> {
        self.recorder.check("remove_node")?;
        lock(&self.nodes).retain(|n| n.id != node_id);
        self.recorder.record(format!("remove_node {node_id}"));
        Ok(())
    }

    async fn create_network(&self, host: &HostAddress, name: &str) -> anyhow::Result<()> {
        self.recorder.check("create_network")?;
        self.recorder
            .record(format!("create_network {name} on {}", host.public_ip));
        Ok(())
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Fake metrics source keyed by (target id, field name).
#[derive(Default)]
pub struct FakeMetrics {
    values: Mutex<HashMap<(String, String), f64>>,
    references: Mutex<HashMap<(String, String), f64>>,
    recorder: Recorder,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, target: &str, field: &str, value: f64) {
        lock(&self.values).insert((target.to_string(), field.to_string()), value);
    }

    pub fn set_reference(&self, target: &str, field: &str, value: f64) {
        lock(&self.references).insert((target.to_string(), field.to_string()), value);
    }

    pub fn clear(&self, target: &str, field: &str) {
        lock(&self.values).remove(&(target.to_string(), field.to_string()));
    }

    pub fn fail(&self, op: &str) {
        lock(&self.recorder.failing).insert(op.to_string());
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn value(&self, target: &MetricTarget, field: &Field) -> anyhow::Result<Option<f64>> {
        self.recorder.check("value")?;
        Ok(lock(&self.values)
            .get(&(target.id.clone(), field.name.clone()))
            .copied())
    }

    async fn reference(&self, target: &MetricTarget, field: &Field) -> anyhow::Result<Option<f64>> {
        self.recorder.check("reference")?;
        Ok(lock(&self.references)
            .get(&(target.id.clone(), field.name.clone()))
            .copied())
    }
}

// ── Cloud ──────────────────────────────────────────────────────────

/// Fake cloud provider.
#[derive(Default)]
pub struct FakeCloud {
    instances: Mutex<Vec<CloudInstance>>,
    next_id: AtomicU64,
    recorder: Recorder,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, instance: CloudInstance) {
        lock(&self.instances).push(instance);
    }

    pub fn set_state(&self, instance_id: &str, state: InstanceState) {
        if let Some(i) = lock(&self.instances)
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
        {
            i.state = state;
        }
    }

    pub fn remove_instance(&self, instance_id: &str) {
        lock(&self.instances).retain(|i| i.instance_id != instance_id);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.recorder.calls).clone()
    }

    pub fn fail(&self, op: &str) {
        lock(&self.recorder.failing).insert(op.to_string());
    }

    fn transition(&self, op: &str, instance_id: &str, state: InstanceState) -> anyhow::Result<()> {
        self.recorder.check(op)?;
        {
            let mut instances = lock(&self.instances);
            let instance = instances
                .iter_mut()
                .find(|i| i.instance_id == instance_id)
                .ok_or_else(|| anyhow!("no such instance: {instance_id}"))?;
            instance.state = state;
        }
        self.recorder.record(format!("{op} {instance_id}"));
        Ok(())
    }
}

/// A cloud instance in the given state.
pub fn cloud_instance(id: &str, state: InstanceState) -> CloudInstance {
    CloudInstance {
        instance_id: id.to_string(),
        instance_type: "t2.micro".to_string(),
        state,
        public_ip: Some("198.51.100.10".to_string()),
        private_ip: Some("172.31.0.10".to_string()),
        region: Some("us-east-1".to_string()),
    }
}

#[async_trait]
impl CloudProviderClient for FakeCloud {
    async fn list_instances(&self) -> anyhow::Result<Vec<CloudInstance>> {
        self.recorder.check("list_instances")?;
        Ok(lock(&self.instances).clone())
    }

    async fn create_instance(&self, request: &InstanceRequest) -> anyhow::Result<CloudInstance> {
        self.recorder.check("create_instance")?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let instance = CloudInstance {
            instance_id: format!("i-{n:04}"),
            instance_type: request.instance_type.clone(),
            state: InstanceState::Running,
            public_ip: Some(format!("198.51.100.{n}")),
            private_ip: Some(format!("172.31.0.{n}")),
            region: request.region.clone(),
        };
        self.add_instance(instance.clone());
        self.recorder
            .record(format!("create_instance {}", instance.instance_id));
        Ok(instance)
    }

    async fn start_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.transition("start_instance", instance_id, InstanceState::Running)
    }

    async fn stop_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.transition("stop_instance", instance_id, InstanceState::Stopped)
    }

    async fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.transition("terminate_instance", instance_id, InstanceState::Terminated)
    }
}

// ── Remote execution ───────────────────────────────────────────────

/// Fake remote executor; commands succeed unless a scripted reply matches.
#[derive(Default)]
pub struct FakeRemote {
    replies: Mutex<Vec<(String, ExecResult)>>,
    recorder: Recorder,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `result` to any command containing `needle`.
    pub fn reply(&self, needle: &str, result: ExecResult) {
        lock(&self.replies).push((needle.to_string(), result));
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.recorder.calls).clone()
    }

    pub fn fail(&self, op: &str) {
        lock(&self.recorder.failing).insert(op.to_string());
    }
}

#[async_trait]
impl RemoteExecutionClient for FakeRemote {
    async fn run(
        &self,
        host: &HostAddress,
        _credentials: &Credentials,
        command: &str,
        _wait: bool,
    ) -> anyhow::Result<ExecResult> {
        self.recorder.check("run")?;
        self.recorder.record(format!("run {}: {command}", host.public_ip));
        let reply = lock(&self.replies)
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, r)| r.clone());
        Ok(reply.unwrap_or(ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    async fn upload(
        &self,
        host: &HostAddress,
        _credentials: &Credentials,
        local: &Path,
        remote: &str,
    ) -> anyhow::Result<()> {
        self.recorder.check("upload")?;
        self.recorder
            .record(format!("upload {} to {}:{remote}", local.display(), host.public_ip));
        Ok(())
    }
}

// ── Request locations ──────────────────────────────────────────────

/// Fake request-location monitor keyed by node public address.
#[derive(Default)]
pub struct FakeLocations {
    requests: Mutex<HashMap<String, HashMap<String, u64>>>,
    unreachable: Mutex<HashSet<String>>,
}

impl FakeLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, public_ip: &str, service: &str, count: u64) {
        lock(&self.requests)
            .entry(public_ip.to_string())
            .or_default()
            .insert(service.to_string(), count);
    }

    pub fn unreachable(&self, public_ip: &str) {
        lock(&self.unreachable).insert(public_ip.to_string());
    }
}

#[async_trait]
impl RequestLocationSource for FakeLocations {
    async fn location_requests(&self, node: &HostAddress) -> anyhow::Result<HashMap<String, u64>> {
        if lock(&self.unreachable).contains(&node.public_ip) {
            bail!("connection refused: {}", node.public_ip);
        }
        Ok(lock(&self.requests)
            .get(&node.public_ip)
            .cloned()
            .unwrap_or_default())
    }
}
