//! Per-FloatingIP assigner task
//!
//! Each FloatingIP gets one [`IpAssigner`]. Once started it converges the
//! provider binding on every trigger: its own refresh interval or an external
//! nudge (node or resource change seen by the controller).
//!
//! Lifecycle is encoded in the types: an [`IpAssigner`] is idle, `start`
//! consumes it and returns a running [`AssignerHandle`], and `stop` consumes
//! the handle after the loop has exited. A stopped assigner cannot be restarted.
//!
//! Cancellation is only observed between attempts, so an attempt that already
//! began always finishes (and reports) before `stop` returns.

use std::sync::Arc;

use kube::ResourceExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::binding::BindingAdapter;
use super::cluster::{BindingStatusWriter, ClusterReader};
use super::eligibility::{eligible_nodes, is_node_ready, TargetSelector};
use super::metrics;
use crate::crd::FloatingIPSpec;
use crate::error::{Error, Result};
use crate::provider::ProviderClient;

/// Collaborators shared by every assigner
#[derive(Clone)]
pub struct AssignerContext {
    pub cluster: Arc<dyn ClusterReader>,
    pub status: Arc<dyn BindingStatusWriter>,
    pub provider: Arc<dyn ProviderClient>,
    pub selector: Arc<dyn TargetSelector>,
}

/// Run state of a started assigner.
///
/// An idle assigner is an [`IpAssigner`] that was never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignerState {
    Running,
    Stopped,
}

/// Successful outcome of one convergence attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// The address already points at a Ready node; nothing was changed
    AlreadyBound { node: String },
    /// The address was (re)assigned to `node`
    Assigned { node: String, previous: Option<String> },
}

impl Convergence {
    pub fn node(&self) -> &str {
        match self {
            Convergence::AlreadyBound { node } | Convergence::Assigned { node, .. } => node,
        }
    }
}

pub struct IpAssigner {
    name: String,
    spec: FloatingIPSpec,
    ctx: AssignerContext,
    adapter: BindingAdapter,
    /// Node name last written to the FloatingIP status
    recorded_node: Option<String>,
}

impl IpAssigner {
    pub fn new(
        name: String,
        spec: FloatingIPSpec,
        recorded_node: Option<String>,
        ctx: AssignerContext,
    ) -> Self {
        let adapter = BindingAdapter::new(ctx.provider.clone());
        Self {
            name,
            spec,
            ctx,
            adapter,
            recorded_node,
        }
    }

    /// Run one convergence attempt.
    ///
    /// Errors never leave the binding half-changed: every failure before the
    /// detach leaves the provider untouched, and a failed detach skips the attach.
    pub async fn converge(&mut self) -> Result<Convergence> {
        let ip = self.spec.parse_ip()?;
        let address = self.adapter.resolve_address(ip).await?;

        let current = self.adapter.current_bound_instance(&address).await?;
        if let Some(current) = &current {
            match self.ctx.cluster.get_node(&current.name).await? {
                Some(node) if is_node_ready(&node) => {
                    debug!("{} is assigned to Ready node {}", ip, current.name);
                    if self.recorded_node.as_deref() != Some(current.name.as_str()) {
                        self.ctx.status.record_bound(&self.name, &current.name).await?;
                        self.recorded_node = Some(current.name.clone());
                    }
                    return Ok(Convergence::AlreadyBound {
                        node: current.name.clone(),
                    });
                }
                Some(_) => info!("Node {} holding {} is not Ready", current.name, ip),
                None => info!("Server {} holding {} is not a cluster node", current.name, ip),
            }
        }

        let nodes = self.ctx.cluster.list_nodes(&self.spec.node_selector).await?;
        let eligible = eligible_nodes(nodes, &self.spec.node_selector);
        let target = self
            .ctx
            .selector
            .choose(&eligible)
            .map(|node| node.name_any())
            .ok_or_else(|| Error::NoEligibleTarget(self.name.clone()))?;
        info!(
            "{} ip assigner will assign to node {} ({} eligible)",
            self.name,
            target,
            eligible.len()
        );

        let instance = self.adapter.resolve_instance_by_node(&target).await?;
        self.adapter.transition(&self.name, &address, &instance).await?;

        self.ctx.status.record_bound(&self.name, &target).await?;
        self.recorded_node = Some(target.clone());

        Ok(Convergence::Assigned {
            node: target,
            previous: current.map(|c| c.name),
        })
    }

    /// Run one attempt and report its outcome; never fails
    async fn converge_and_report(&mut self) {
        match self.converge().await {
            Ok(Convergence::AlreadyBound { .. }) => {
                metrics::inc_convergence(&self.name, "already_bound");
            }
            Ok(Convergence::Assigned { node, previous }) => {
                metrics::inc_convergence(&self.name, "assigned");
                info!(
                    "{} ip assigner assigned to node {} (previously {:?})",
                    self.name, node, previous
                );
            }
            Err(e) => {
                metrics::inc_convergence(&self.name, e.kind());
                warn!("{} ip assigner failed: {}", self.name, e);
                // Status now shows the failure; the next healthy attempt must overwrite it
                self.recorded_node = None;
                if let Err(status_err) = self.ctx.status.record_failure(&self.name, &e).await {
                    warn!(
                        "Failed to record failure for {}: {:?}",
                        self.name, status_err
                    );
                }
            }
        }
    }

    /// Spawn the convergence loop
    pub fn start(self) -> AssignerHandle {
        let token = CancellationToken::new();
        let nudge = Arc::new(Notify::new());
        let name = self.name.clone();
        let spec = self.spec.clone();

        info!("Started {} ip assigner", name);
        let span = info_span!("assigner", binding = %name);
        let join = tokio::spawn(self.run(token.clone(), nudge.clone()).instrument(span));

        AssignerHandle {
            name,
            spec,
            token,
            nudge,
            join,
        }
    }

    async fn run(mut self, token: CancellationToken, nudge: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.spec.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = nudge.notified() => {
                    debug!("{} ip assigner nudged", self.name);
                    ticker.reset();
                }
            }
            self.converge_and_report().await;
        }
        debug!("{} ip assigner loop exited", self.name);
    }
}

/// Handle to a running assigner
pub struct AssignerHandle {
    name: String,
    spec: FloatingIPSpec,
    token: CancellationToken,
    nudge: Arc<Notify>,
    join: JoinHandle<()>,
}

impl AssignerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spec the assigner was started with
    pub fn spec(&self) -> &FloatingIPSpec {
        &self.spec
    }

    pub fn state(&self) -> AssignerState {
        if self.join.is_finished() {
            AssignerState::Stopped
        } else {
            AssignerState::Running
        }
    }

    /// Request an extra convergence attempt; coalesces while one is pending
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop the loop and wait until it has exited
    pub async fn stop(self) -> AssignerState {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("{} ip assigner terminated abnormally: {}", self.name, e);
        }
        info!("Stopped {} ip assigner", self.name);
        AssignerState::Stopped
    }
}
