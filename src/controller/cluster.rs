//! Cluster-side collaborators of the assigners
//!
//! [`ClusterReader`] answers node questions, [`BindingStatusWriter`] writes the
//! observed binding back to the FloatingIP status. [`KubeCluster`] implements
//! both against the Kubernetes API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, Node};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    client::Client,
    Resource,
};
use tracing::{debug, warn};

use crate::crd::{label_selector, upsert_condition, Condition, FloatingIP};
use crate::error::{Error, Result};

/// Field manager used for every status patch
pub const FIELD_MANAGER: &str = "floating-ip-operator";

#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// List nodes carrying every label of `selector`
    async fn list_nodes(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Node>>;

    /// Fetch a node by name; `None` when it does not exist
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;
}

#[async_trait]
pub trait BindingStatusWriter: Send + Sync {
    /// Record a successful bind to `node_name`
    async fn record_bound(&self, binding: &str, node_name: &str) -> Result<()>;

    /// Record a failed convergence attempt; the bound node is left as is
    async fn record_failure(&self, binding: &str, error: &Error) -> Result<()>;
}

/// Kubernetes-backed implementation of the cluster collaborators
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn bindings(&self) -> Api<FloatingIP> {
        Api::all(self.client.clone())
    }

    async fn patch_status(&self, binding: &str, patch: serde_json::Value) -> Result<()> {
        self.bindings()
            .patch_status(
                binding,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }

    /// Current conditions with `condition` merged in
    async fn merged_conditions(
        &self,
        binding: &str,
        condition: Condition,
    ) -> Result<Vec<Condition>> {
        let mut conditions = self
            .bindings()
            .get_opt(binding)
            .await
            .map_err(Error::KubeError)?
            .and_then(|fip| fip.status)
            .map(|s| s.conditions)
            .unwrap_or_default();
        upsert_condition(&mut conditions, condition);
        Ok(conditions)
    }

    /// Helper to emit a Kubernetes Event on the FloatingIP
    async fn emit_event(
        &self,
        binding: &str,
        event_type: &str,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let fip = match self.bindings().get_opt(binding).await.map_err(Error::KubeError)? {
            Some(fip) => fip,
            None => return Ok(()),
        };
        // Events for cluster-scoped objects live in the default namespace
        let events: Api<Event> = Api::namespaced(self.client.clone(), "default");

        let time = chrono::Utc::now();
        let event = Event {
            metadata: kube::api::ObjectMeta {
                generate_name: Some(format!("{}-", binding)),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: fip.object_ref(&()),
            first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
            last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
            count: Some(1),
            ..Default::default()
        };

        events
            .create(&PostParams::default(), &event)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn list_nodes(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let selector = label_selector(selector);
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        };
        let list = nodes.list(&params).await.map_err(Error::KubeError)?;
        debug!("Listed {} nodes for selector {:?}", list.items.len(), selector);
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes.get_opt(name).await.map_err(Error::KubeError)
    }
}

#[async_trait]
impl BindingStatusWriter for KubeCluster {
    async fn record_bound(&self, binding: &str, node_name: &str) -> Result<()> {
        let message = format!("Floating IP assigned to node {}", node_name);
        let conditions = self
            .merged_conditions(binding, Condition::assigned(true, "Assigned", &message))
            .await?;

        let patch = serde_json::json!({
            "status": {
                "phase": "Assigned",
                "nodeName": node_name,
                "conditions": conditions,
            }
        });
        self.patch_status(binding, patch).await?;

        if let Err(e) = self.emit_event(binding, "Normal", "Assigned", &message).await {
            warn!("Failed to emit event for {}: {:?}", binding, e);
        }
        Ok(())
    }

    async fn record_failure(&self, binding: &str, error: &Error) -> Result<()> {
        let conditions = self
            .merged_conditions(
                binding,
                Condition::assigned(false, error.kind(), &error.status_message()),
            )
            .await?;

        let patch = serde_json::json!({
            "status": {
                "phase": "Failed",
                "conditions": conditions,
            }
        });
        self.patch_status(binding, patch).await
    }
}
