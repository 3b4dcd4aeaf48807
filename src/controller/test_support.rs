//! In-memory fakes for assigner and supervisor tests

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use super::assigner::AssignerContext;
use super::cluster::{BindingStatusWriter, ClusterReader};
use super::eligibility::{matches_selector, TargetSelector};
use crate::crd::{FloatingIP, FloatingIPSpec};
use crate::error::{Error, Result};
use crate::provider::{ProviderAddress, ProviderClient, ProviderInstance};

/// Provider call as seen by the fake
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    ListAddresses,
    GetInstance(u64),
    GetInstanceByName(String),
    Unassign(IpAddr),
    Assign(IpAddr, String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Unassign(_) | Call::Assign(..))
    }
}

#[derive(Default)]
pub struct FakeProvider {
    addresses: Mutex<Vec<ProviderAddress>>,
    instances: Mutex<Vec<ProviderInstance>>,
    calls: Mutex<Vec<Call>>,
    fail_unassign: AtomicBool,
    fail_assign: AtomicBool,
    assign_delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_address(&self, id: u64, ip: &str, server: Option<u64>) {
        self.addresses.lock().unwrap().push(ProviderAddress {
            id,
            ip: ip.parse().unwrap(),
            server,
        });
    }

    pub fn add_instance(&self, id: u64, name: &str) {
        self.instances.lock().unwrap().push(ProviderInstance {
            id,
            name: name.to_string(),
        });
    }

    pub fn fail_unassign(&self) {
        self.fail_unassign.store(true, Ordering::SeqCst);
    }

    pub fn fail_assign(&self) {
        self.fail_assign.store(true, Ordering::SeqCst);
    }

    pub fn delay_assign(&self, delay: Duration) {
        *self.assign_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Server name the address is currently assigned to
    pub fn bound_to(&self, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.parse().unwrap();
        let server = self
            .addresses
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.ip == ip)
            .and_then(|a| a.server)?;
        self.instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == server)
            .map(|i| i.name.clone())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_server(&self, address: &ProviderAddress, server: Option<u64>) {
        if let Some(a) = self
            .addresses
            .lock()
            .unwrap()
            .iter_mut()
            .find(|a| a.id == address.id)
        {
            a.server = server;
        }
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn list_addresses(&self) -> Result<Vec<ProviderAddress>> {
        self.record(Call::ListAddresses);
        Ok(self.addresses.lock().unwrap().clone())
    }

    async fn get_instance(&self, id: u64) -> Result<Option<ProviderInstance>> {
        self.record(Call::GetInstance(id));
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn get_instance_by_name(&self, name: &str) -> Result<Option<ProviderInstance>> {
        self.record(Call::GetInstanceByName(name.to_string()));
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.name == name)
            .cloned())
    }

    async fn unassign(&self, address: &ProviderAddress) -> Result<()> {
        self.record(Call::Unassign(address.ip));
        if self.fail_unassign.load(Ordering::SeqCst) {
            return Err(Error::provider("unassign", "forbidden"));
        }
        self.set_server(address, None);
        Ok(())
    }

    async fn assign(&self, address: &ProviderAddress, instance: &ProviderInstance) -> Result<()> {
        self.record(Call::Assign(address.ip, instance.name.clone()));
        let delay = *self.assign_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_assign.load(Ordering::SeqCst) {
            return Err(Error::provider("assign", "rate limited"));
        }
        self.set_server(address, Some(instance.id));
        Ok(())
    }
}

/// Fake cluster serving a fixed node list and recording status writes
#[derive(Default)]
pub struct FakeCluster {
    nodes: Mutex<Vec<Node>>,
    bound: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<(String, &'static str)>>,
}

impl FakeCluster {
    pub fn with_nodes(nodes: Vec<Node>) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        })
    }

    pub fn set_ready(&self, name: &str, ready: bool) {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(n) = nodes.iter_mut().find(|n| n.name_any() == name) {
            *n = node(name, &labels_of(n), ready);
        }
    }

    /// Recorded `(binding, node)` status writes
    pub fn bound(&self) -> Vec<(String, String)> {
        self.bound.lock().unwrap().clone()
    }

    /// Recorded `(binding, error kind)` failure reports
    pub fn failures(&self) -> Vec<(String, &'static str)> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterReader for FakeCluster {
    async fn list_nodes(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches_selector(n, selector))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.name_any() == name)
            .cloned())
    }
}

#[async_trait]
impl BindingStatusWriter for FakeCluster {
    async fn record_bound(&self, binding: &str, node_name: &str) -> Result<()> {
        self.bound
            .lock()
            .unwrap()
            .push((binding.to_string(), node_name.to_string()));
        Ok(())
    }

    async fn record_failure(&self, binding: &str, error: &Error) -> Result<()> {
        self.failures
            .lock()
            .unwrap()
            .push((binding.to_string(), error.kind()));
        Ok(())
    }
}

/// Always picks the first eligible node
pub struct FirstSelector;

impl TargetSelector for FirstSelector {
    fn choose<'a>(&self, eligible: &'a [Node]) -> Option<&'a Node> {
        eligible.first()
    }
}

fn labels_of(node: &Node) -> Vec<(String, String)> {
    node.labels()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn node(name: &str, labels: &[(String, String)], ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.iter().cloned().collect()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node labelled `pool=ingress`
pub fn pool_node(name: &str, ready: bool) -> Node {
    node(name, &[("pool".to_string(), "ingress".to_string())], ready)
}

pub fn pool_spec(ip: &str, interval_seconds: u64) -> FloatingIPSpec {
    FloatingIPSpec {
        ip: ip.to_string(),
        node_selector: [("pool".to_string(), "ingress".to_string())].into(),
        interval_seconds,
    }
}

pub fn floating_ip(name: &str, spec: FloatingIPSpec) -> FloatingIP {
    FloatingIP::new(name, spec)
}

pub fn context(
    provider: Arc<FakeProvider>,
    cluster: Arc<FakeCluster>,
    selector: Arc<dyn TargetSelector>,
) -> AssignerContext {
    AssignerContext {
        cluster: cluster.clone(),
        status: cluster,
        provider,
        selector,
    }
}

/// Poll `condition` until it holds or the attempt budget runs out
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
