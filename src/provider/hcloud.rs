//! Hetzner Cloud implementation of [`ProviderClient`]
//!
//! Talks to the public REST API (`https://api.hetzner.cloud/v1`). Every request
//! carries the client-wide timeout, so a stalled provider call can never block
//! an assigner past its next trigger.
//!
//! Assign and unassign return an asynchronous provider action. Both calls wait
//! for that action to finish, which is what makes the detach-then-attach
//! ordering meaningful: the attach is only issued once the detach completed.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{ProviderAddress, ProviderClient, ProviderInstance};
use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

const PAGE_SIZE: u32 = 50;
const ACTION_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct FloatingIpsResponse {
    floating_ips: Vec<FloatingIpSchema>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct FloatingIpSchema {
    id: u64,
    /// Plain address for IPv4, network in CIDR notation for IPv6
    ip: String,
    #[serde(default)]
    server: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ServerSchema {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServerResponse {
    server: ServerSchema,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: Vec<ServerSchema>,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    action: ActionSchema,
}

#[derive(Debug, Deserialize)]
struct ActionSchema {
    id: u64,
    status: String,
    #[serde(default)]
    error: Option<ApiErrorSchema>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiErrorSchema,
}

#[derive(Debug, Deserialize)]
struct ApiErrorSchema {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct AssignRequest {
    server: u64,
}

impl From<ServerSchema> for ProviderInstance {
    fn from(s: ServerSchema) -> Self {
        ProviderInstance {
            id: s.id,
            name: s.name,
        }
    }
}

/// Parse the `ip` field of a floating IP.
///
/// IPv6 floating IPs are a /64 network; the network address is used.
fn parse_floating_ip(raw: &str) -> Option<IpAddr> {
    raw.split('/').next()?.parse().ok()
}

/// Outcome of a provider action; `None` while it is still running
fn action_result(operation: &str, action: &ActionSchema) -> Option<Result<()>> {
    match action.status.as_str() {
        "success" => Some(Ok(())),
        "error" => {
            let message = action
                .error
                .as_ref()
                .map(|e| format!("action {} failed ({}): {}", action.id, e.code, e.message))
                .unwrap_or_else(|| format!("action {} failed", action.id));
            Some(Err(Error::provider(operation, message)))
        }
        _ => None,
    }
}

/// Hetzner Cloud API client
#[derive(Clone)]
pub struct HcloudClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    action_timeout: Duration,
}

impl HcloudClient {
    /// Create a client; `timeout` bounds every single HTTP request and, scaled,
    /// the wait for an assign/unassign action to finish.
    pub fn new(token: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::ConfigError("hcloud token must not be empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hcloud-floating-ip-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            action_timeout: timeout * 4,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Send a request; `Ok(None)` when the API answers 404
    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Option<Response>> {
        let response = match request.bearer_auth(&self.token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("hcloud {} request failed: {}", operation, e);
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => format!("{} ({}): {}", status, body.error.code, body.error.message),
                Err(_) => format!("{}", status),
            };
            warn!("hcloud {} failed: {}", operation, message);
            return Err(Error::provider(operation, message));
        }
        Ok(Some(response))
    }

    async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
        let body = response.json::<T>().await.map_err(|e| {
            warn!("hcloud {} returned an unexpected body: {}", operation, e);
            e
        })?;
        Ok(body)
    }

    /// Send a request that must not 404 and decode its body
    async fn fetch<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        match self.execute(operation, request).await? {
            Some(response) => Self::decode(operation, response).await,
            None => Err(Error::provider(operation, "404 Not Found")),
        }
    }

    /// Poll an action until it leaves the `running` state
    async fn wait_for_action(&self, operation: &str, mut action: ActionSchema) -> Result<()> {
        let deadline = Instant::now() + self.action_timeout;
        loop {
            if let Some(result) = action_result(operation, &action) {
                return result;
            }
            if Instant::now() >= deadline {
                return Err(Error::provider(
                    operation,
                    format!("timed out waiting for action {}", action.id),
                ));
            }
            tokio::time::sleep(ACTION_POLL_INTERVAL).await;

            let url = self.url(&format!("/actions/{}", action.id));
            let response: ActionResponse = self.fetch(operation, self.http.get(url)).await?;
            action = response.action;
            debug!("action {} status: {}", action.id, action.status);
        }
    }
}

#[async_trait]
impl ProviderClient for HcloudClient {
    #[instrument(skip(self))]
    async fn list_addresses(&self) -> Result<Vec<ProviderAddress>> {
        let mut addresses = Vec::new();
        let mut page = Some(1u32);

        while let Some(current) = page {
            let request = self
                .http
                .get(self.url("/floating_ips"))
                .query(&[("page", current), ("per_page", PAGE_SIZE)]);
            let response: FloatingIpsResponse = self.fetch("list floating ips", request).await?;

            for fip in response.floating_ips {
                match parse_floating_ip(&fip.ip) {
                    Some(ip) => addresses.push(ProviderAddress {
                        id: fip.id,
                        ip,
                        server: fip.server,
                    }),
                    None => warn!("Skipping floating ip {} with unparsable ip {}", fip.id, fip.ip),
                }
            }

            page = response.meta.and_then(|m| m.pagination.next_page);
        }

        debug!("Found {} floating ips", addresses.len());
        Ok(addresses)
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, id: u64) -> Result<Option<ProviderInstance>> {
        let request = self.http.get(self.url(&format!("/servers/{}", id)));
        match self.execute("get server", request).await? {
            Some(response) => {
                let body: ServerResponse = Self::decode("get server", response).await?;
                Ok(Some(body.server.into()))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn get_instance_by_name(&self, name: &str) -> Result<Option<ProviderInstance>> {
        let request = self
            .http
            .get(self.url("/servers"))
            .query(&[("name", name)]);
        let body: ServersResponse = self.fetch("get server by name", request).await?;
        Ok(body
            .servers
            .into_iter()
            .find(|s| s.name == name)
            .map(ProviderInstance::from))
    }

    #[instrument(skip(self), fields(floating_ip = %address.ip))]
    async fn unassign(&self, address: &ProviderAddress) -> Result<()> {
        let url = self.url(&format!("/floating_ips/{}/actions/unassign", address.id));
        let response: ActionResponse = self.fetch("unassign", self.http.post(url)).await?;
        self.wait_for_action("unassign", response.action).await
    }

    #[instrument(skip(self), fields(floating_ip = %address.ip, server = %instance.name))]
    async fn assign(&self, address: &ProviderAddress, instance: &ProviderInstance) -> Result<()> {
        let url = self.url(&format!("/floating_ips/{}/actions/assign", address.id));
        let request = self.http.post(url).json(&AssignRequest {
            server: instance.id,
        });
        let response: ActionResponse = self.fetch("assign", request).await?;
        self.wait_for_action("assign", response.action).await
    }
}
