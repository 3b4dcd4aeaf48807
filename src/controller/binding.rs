//! Provider binding adapter
//!
//! Wraps the raw provider client with the lookups the assigner needs and owns
//! the transition protocol: a floating IP is always detached from its current
//! server, and the detach must succeed, before it is attached to a new one.
//! Re-pointing an assigned floating IP directly used to leave it unroutable.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info};

use super::metrics;
use crate::error::{Error, Result};
use crate::provider::{ProviderAddress, ProviderClient, ProviderInstance};

pub struct BindingAdapter {
    provider: Arc<dyn ProviderClient>,
}

impl BindingAdapter {
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }

    /// Find the single provider floating IP carrying `ip`
    pub async fn resolve_address(&self, ip: IpAddr) -> Result<ProviderAddress> {
        let mut matching: Vec<ProviderAddress> = self
            .provider
            .list_addresses()
            .await?
            .into_iter()
            .filter(|a| a.ip == ip)
            .collect();

        match matching.len() {
            1 => Ok(matching.remove(0)),
            n => Err(Error::AddressLookup {
                address: ip.to_string(),
                matches: n,
            }),
        }
    }

    /// Server the address is currently assigned to, if it still exists
    pub async fn current_bound_instance(
        &self,
        address: &ProviderAddress,
    ) -> Result<Option<ProviderInstance>> {
        match address.server {
            Some(id) => self.provider.get_instance(id).await,
            None => Ok(None),
        }
    }

    /// Server correlated to a cluster node by name
    pub async fn resolve_instance_by_node(&self, node_name: &str) -> Result<ProviderInstance> {
        self.provider
            .get_instance_by_name(node_name)
            .await?
            .ok_or_else(|| Error::InstanceLookup(node_name.to_string()))
    }

    pub async fn unbind(&self, binding: &str, address: &ProviderAddress) -> Result<()> {
        metrics::inc_provider_mutation(binding, "unassign");
        self.provider.unassign(address).await
    }

    pub async fn bind(
        &self,
        binding: &str,
        address: &ProviderAddress,
        instance: &ProviderInstance,
    ) -> Result<()> {
        metrics::inc_provider_mutation(binding, "assign");
        self.provider.assign(address, instance).await
    }

    /// Move `address` to `target`, detaching it first when it is assigned.
    ///
    /// A failed detach aborts before any attach is attempted.
    pub async fn transition(
        &self,
        binding: &str,
        address: &ProviderAddress,
        target: &ProviderInstance,
    ) -> Result<()> {
        if let Some(server) = address.server {
            debug!("Unassigning {} from server {}", address.ip, server);
            self.unbind(binding, address).await?;
        }

        self.bind(binding, address, target).await?;
        info!("Assigned {} to server {}", address.ip, target.name);
        Ok(())
    }
}
