//! Node eligibility and target selection
//!
//! A node is eligible for a FloatingIP when it carries every label of the
//! selector and its latest `Ready` condition is `True`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use rand::seq::SliceRandom;
use rand::Rng;

/// Check if a node reports the Ready condition as True
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().rfind(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

/// Conjunctive label match; an empty selector matches every node
pub fn matches_selector(node: &Node, selector: &BTreeMap<String, String>) -> bool {
    let labels = node.metadata.labels.as_ref();
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|l| l.get(key))
            .map(|v| v == value)
            .unwrap_or(false)
    })
}

/// Filter a node snapshot down to the eligible targets.
///
/// Returns an empty vector when nothing qualifies; the caller decides
/// whether that is an error.
pub fn eligible_nodes(nodes: Vec<Node>, selector: &BTreeMap<String, String>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| matches_selector(node, selector) && is_node_ready(node))
        .collect()
}

/// Pick one node uniformly at random over the whole slice.
///
/// `None` only for an empty slice.
pub fn choose_target<'a, R: Rng + ?Sized>(eligible: &'a [Node], rng: &mut R) -> Option<&'a Node> {
    eligible.choose(rng)
}

/// Strategy used by assigners to pick the next target
pub trait TargetSelector: Send + Sync {
    fn choose<'a>(&self, eligible: &'a [Node]) -> Option<&'a Node>;
}

/// Uniform random selection backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl TargetSelector for RandomSelector {
    fn choose<'a>(&self, eligible: &'a [Node]) -> Option<&'a Node> {
        choose_target(eligible, &mut rand::thread_rng())
    }
}
