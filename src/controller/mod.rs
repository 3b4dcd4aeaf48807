//! Controller module for FloatingIP reconciliation
//!
//! The controller loop maps FloatingIP and node events onto the supervisor,
//! which runs one assigner per FloatingIP. Assigners own the convergence
//! algorithm and talk to the cluster and the provider through narrow traits.

mod assigner;
mod binding;
mod cluster;
mod eligibility;
pub mod metrics;
mod reconciler;
mod supervisor;
#[cfg(test)]
pub(crate) mod test_support;

pub use assigner::{AssignerContext, AssignerHandle, AssignerState, Convergence, IpAssigner};
pub use binding::BindingAdapter;
pub use cluster::{BindingStatusWriter, ClusterReader, KubeCluster, FIELD_MANAGER};
pub use eligibility::{
    choose_target, eligible_nodes, is_node_ready, matches_selector, RandomSelector, TargetSelector,
};
pub use reconciler::{install_crd, run_controller, ControllerState, FLOATING_IP_FINALIZER};
pub use supervisor::{EnsureOutcome, Supervisor};
