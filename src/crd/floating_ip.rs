//! FloatingIP Custom Resource Definition
//!
//! A FloatingIP declares that a provider floating IP should always be bound
//! to exactly one Ready node out of the pool selected by `nodeSelector`.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::error::{Error, Result};

/// The FloatingIP CRD binds a provider floating IP to a pool of nodes.
///
/// # Example
///
/// ```yaml
/// apiVersion: hcloud.apricote.de/v1beta1
/// kind: FloatingIP
/// metadata:
///   name: ingress
/// spec:
///   IP: "203.0.113.10"
///   nodeSelector:
///     node-role.kubernetes.io/ingress: "true"
///   intervalSeconds: 30
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hcloud.apricote.de",
    version = "v1beta1",
    kind = "FloatingIP",
    status = "FloatingIPStatus",
    shortname = "fip",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.IP"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPSpec {
    /// Floating IP from Hetzner Cloud that will be assigned to nodes matching
    /// the nodeSelector
    #[serde(rename = "IP", alias = "ip")]
    pub ip: String,

    /// Labels a node must carry (all of them) to be part of the pool.
    /// An empty selector matches every node.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Seconds between two convergence attempts
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    30
}

impl FloatingIPSpec {
    /// Parse the address literal
    pub fn parse_ip(&self) -> Result<IpAddr> {
        self.ip
            .parse::<IpAddr>()
            .map_err(|_| Error::InvalidAddress(self.ip.clone()))
    }

    /// Validate the spec before a task is started for it
    pub fn validate(&self) -> Result<()> {
        self.parse_ip()?;
        if self.interval_seconds == 0 {
            return Err(Error::ValidationError(
                "intervalSeconds must be at least 1".to_string(),
            ));
        }
        if self.node_selector.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::ValidationError(
                "nodeSelector keys must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    /// Compare the fields that define a running assigner.
    ///
    /// A difference in any of them means the assigner must be replaced.
    pub fn same_spec(&self, other: &FloatingIPSpec) -> bool {
        self.ip == other.ip
            && self.node_selector == other.node_selector
            && self.interval_seconds == other.interval_seconds
    }
}

/// Render a selector in Kubernetes label selector syntax (`k=v,k2=v2`)
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Status subresource for FloatingIP
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIPStatus {
    /// Current phase (Assigned, Failed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,

    /// Node the floating IP was last bound to by the operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Conditions following Kubernetes conventions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
