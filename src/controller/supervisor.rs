//! Registry of running assigners
//!
//! The supervisor owns at most one running assigner per FloatingIP name.
//! Operations on the same name are serialized through a per-name slot lock,
//! so a replacement always stops (and joins) the old assigner before the new
//! one is started. Operations on different names only share the registry lock
//! for the duration of a map lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::assigner::{AssignerContext, AssignerHandle, AssignerState, IpAssigner};
use super::metrics;
use crate::crd::FloatingIP;

type Slot = Arc<Mutex<Option<AssignerHandle>>>;

/// What `ensure` did for a FloatingIP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// No assigner was running, one was started
    Created,
    /// An assigner with an identical spec is already running
    Unchanged,
    /// The running assigner had a different spec and was replaced
    Replaced,
}

pub struct Supervisor {
    ctx: AssignerContext,
    registry: Mutex<HashMap<String, Slot>>,
    active: AtomicUsize,
}

impl Supervisor {
    pub fn new(ctx: AssignerContext) -> Self {
        Self {
            ctx,
            registry: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    async fn slot(&self, name: &str) -> Slot {
        let mut registry = self.registry.lock().await;
        registry.entry(name.to_string()).or_default().clone()
    }

    async fn existing_slot(&self, name: &str) -> Option<Slot> {
        self.registry.lock().await.get(name).cloned()
    }

    /// Make sure an assigner matching the FloatingIP's current spec is running
    pub async fn ensure(&self, fip: &FloatingIP) -> EnsureOutcome {
        let name = fip.name_any();
        let slot = self.slot(&name).await;
        let mut running = slot.lock().await;

        let outcome = match running.take() {
            Some(handle) if handle.spec().same_spec(&fip.spec) => {
                *running = Some(handle);
                return EnsureOutcome::Unchanged;
            }
            Some(handle) => {
                info!("Spec of {} changed, replacing ip assigner", name);
                handle.stop().await;
                self.stopped();
                EnsureOutcome::Replaced
            }
            None => EnsureOutcome::Created,
        };

        let recorded_node = fip.status.as_ref().and_then(|s| s.node_name.clone());
        let assigner = IpAssigner::new(name, fip.spec.clone(), recorded_node, self.ctx.clone());
        *running = Some(assigner.start());
        self.started();

        outcome
    }

    /// Stop the assigner for `name`. Returns whether one was running.
    pub async fn remove(&self, name: &str) -> bool {
        let Some(slot) = self.existing_slot(name).await else {
            return false;
        };

        let stopped = {
            let mut running = slot.lock().await;
            match running.take() {
                Some(handle) => {
                    handle.stop().await;
                    self.stopped();
                    true
                }
                None => false,
            }
        };
        drop(slot);

        self.prune(name).await;
        stopped
    }

    /// Drop the slot for `name` if it is empty and nobody else holds it
    async fn prune(&self, name: &str) {
        let mut registry = self.registry.lock().await;
        let removable = registry
            .get(name)
            .map(|slot| {
                Arc::strong_count(slot) == 1
                    && slot.try_lock().map(|running| running.is_none()).unwrap_or(false)
            })
            .unwrap_or(false);
        if removable {
            registry.remove(name);
            debug!("Pruned assigner slot for {}", name);
        }
    }

    /// Trigger an extra convergence attempt for `name`.
    ///
    /// Skipped while an ensure or remove holds the slot; that operation
    /// leaves a freshly started assigner (which converges immediately) or none.
    pub async fn nudge(&self, name: &str) -> bool {
        let Some(slot) = self.existing_slot(name).await else {
            return false;
        };
        let nudged = match slot.try_lock() {
            Ok(running) => match running.as_ref() {
                Some(handle) => {
                    handle.nudge();
                    true
                }
                None => false,
            },
            Err(_) => false,
        };
        nudged
    }

    /// Nudge every running assigner
    pub async fn nudge_all(&self) -> usize {
        let slots: Vec<Slot> = self.registry.lock().await.values().cloned().collect();
        slots
            .iter()
            .filter(|slot| match slot.try_lock() {
                Ok(running) => match running.as_ref() {
                    Some(handle) => {
                        handle.nudge();
                        true
                    }
                    None => false,
                },
                Err(_) => false,
            })
            .count()
    }

    /// Number of running assigners
    pub fn len(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an assigner is running for `name`
    pub async fn contains(&self, name: &str) -> bool {
        match self.existing_slot(name).await {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Name and run state of every registered assigner, sorted by name.
    ///
    /// Slots locked by an in-flight ensure or remove are skipped.
    pub async fn assigners(&self) -> Vec<(String, AssignerState)> {
        let slots: Vec<Slot> = self.registry.lock().await.values().cloned().collect();
        let mut assigners: Vec<(String, AssignerState)> = slots
            .iter()
            .filter_map(|slot| {
                let running = slot.try_lock().ok()?;
                running
                    .as_ref()
                    .map(|handle| (handle.name().to_string(), handle.state()))
            })
            .collect();
        assigners.sort_by(|a, b| a.0.cmp(&b.0));
        assigners
    }

    /// Stop every assigner and clear the registry
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Slot)> = self.registry.lock().await.drain().collect();
        info!("Stopping {} ip assigners", slots.len());
        for (_, slot) in slots {
            if let Some(handle) = slot.lock().await.take() {
                handle.stop().await;
                self.stopped();
            }
        }
    }

    fn started(&self) {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_assigners(count);
    }

    fn stopped(&self) {
        let count = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_assigners(count);
    }
}
