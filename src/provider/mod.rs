//! Cloud provider access for floating IPs and servers
//!
//! The controller only talks to the provider through [`ProviderClient`], so
//! the convergence logic can be exercised against an in-memory fake.

pub mod hcloud;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;

pub use hcloud::HcloudClient;

/// Provider-side floating IP object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderAddress {
    /// Provider ID of the floating IP
    pub id: u64,
    /// Address literal (network address for IPv6 floating IPs)
    pub ip: IpAddr,
    /// ID of the server the address is currently assigned to
    pub server: Option<u64>,
}

/// Provider compute instance, correlated to a cluster node by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderInstance {
    pub id: u64,
    pub name: String,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// List every floating IP visible to the configured credentials
    async fn list_addresses(&self) -> Result<Vec<ProviderAddress>>;

    /// Look up a server by ID; `None` if it no longer exists
    async fn get_instance(&self, id: u64) -> Result<Option<ProviderInstance>>;

    /// Look up a server by its exact name
    async fn get_instance_by_name(&self, name: &str) -> Result<Option<ProviderInstance>>;

    /// Detach the floating IP from whatever server holds it
    async fn unassign(&self, address: &ProviderAddress) -> Result<()>;

    /// Attach the floating IP to the given server
    async fn assign(&self, address: &ProviderAddress, instance: &ProviderInstance) -> Result<()>;
}
