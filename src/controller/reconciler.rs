//! FloatingIP controller
//!
//! The controller only manages assigner lifecycles: every FloatingIP event
//! ensures a matching assigner is running, deletions stop it. Node changes
//! nudge every assigner so a node going NotReady is handled without waiting
//! for the refresh interval.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector::ObjectRef,
        wait::{await_condition, conditions},
        watcher::Config,
    },
    CustomResourceExt, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::cluster::{BindingStatusWriter, FIELD_MANAGER};
use super::supervisor::{EnsureOutcome, Supervisor};
use crate::crd::FloatingIP;
use crate::error::{Error, Result};

pub const FLOATING_IP_FINALIZER: &str = "hcloud.apricote.de/floating-ip";

const CRD_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub supervisor: Arc<Supervisor>,
    pub status: Arc<dyn BindingStatusWriter>,
    /// Minimum time between two reconciles of the same FloatingIP
    pub debounce: Duration,
}

/// Apply the FloatingIP CRD and wait until the API server serves it
pub async fn install_crd(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let name = FloatingIP::crd_name();

    info!("Applying CRD {}", name);
    crds.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(FloatingIP::crd()),
    )
    .await
    .map_err(Error::KubeError)?;

    let established = await_condition(crds, name, conditions::is_crd_established());
    match tokio::time::timeout(CRD_ESTABLISH_TIMEOUT, established).await {
        Ok(Ok(_)) => {
            info!("CRD {} is established", name);
            Ok(())
        }
        Ok(Err(e)) => Err(Error::ConfigError(format!(
            "Failed waiting for CRD {}: {}",
            name, e
        ))),
        Err(_) => Err(Error::ConfigError(format!(
            "CRD {} was not established within {:?}",
            name, CRD_ESTABLISH_TIMEOUT
        ))),
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let floating_ips: Api<FloatingIP> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client.clone());

    info!("Starting FloatingIP controller");

    // Verify CRD exists
    match floating_ips.list(&Default::default()).await {
        Ok(_) => info!("FloatingIP CRD is available"),
        Err(e) => {
            error!(
                "FloatingIP CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "FloatingIP CRD not installed (run with --install-crd or apply `crd` output)"
                    .to_string(),
            ));
        }
    }

    let controller = Controller::new(floating_ips, Config::default())
        .with_config(controller::Config::default().debounce(state.debounce));
    let store = controller.store();

    controller
        // Any node change may affect every pool
        .watches(nodes, Config::default(), move |node| {
            debug!("Node {} changed", node.name_any());
            store
                .state()
                .into_iter()
                .map(|fip| ObjectRef::from_obj(fip.as_ref()))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("FloatingIP controller stopped");
    Ok(())
}

/// The main reconciliation function
///
/// Called whenever a FloatingIP is created, updated or deleted, and for every
/// FloatingIP whenever a node changes.
#[instrument(skip(ctx), fields(name = %obj.name_any()))]
async fn reconcile(obj: Arc<FloatingIP>, ctx: Arc<ControllerState>) -> Result<Action> {
    let api: Api<FloatingIP> = Api::all(ctx.client.clone());

    finalizer(&api, FLOATING_IP_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(fip) => apply_floating_ip(&ctx, &fip).await,
            FinalizerEvent::Cleanup(fip) => cleanup_floating_ip(&ctx, &fip).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply_floating_ip(ctx: &ControllerState, fip: &FloatingIP) -> Result<Action> {
    let name = fip.name_any();

    if let Err(e) = fip.spec.validate() {
        warn!("Validation failed for FloatingIP {}: {}", name, e);
        if let Err(status_err) = ctx.status.record_failure(&name, &e).await {
            warn!("Failed to record validation failure: {:?}", status_err);
        }
        // An invalid spec must not keep an assigner for the previous one alive
        ctx.supervisor.remove(&name).await;
        return Err(e);
    }

    match ctx.supervisor.ensure(fip).await {
        EnsureOutcome::Created => info!("Created ip assigner for {}", name),
        EnsureOutcome::Replaced => info!("Replaced ip assigner for {}", name),
        EnsureOutcome::Unchanged => {
            ctx.supervisor.nudge(&name).await;
        }
    }

    // Periodic convergence is driven by the assigner itself
    Ok(Action::await_change())
}

async fn cleanup_floating_ip(ctx: &ControllerState, fip: &FloatingIP) -> Result<Action> {
    let name = fip.name_any();
    info!("Cleaning up FloatingIP: {}", name);

    if !ctx.supervisor.remove(&name).await {
        debug!("No ip assigner was running for {}", name);
    }

    Ok(Action::await_change())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(fip: Arc<FloatingIP>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", fip.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
