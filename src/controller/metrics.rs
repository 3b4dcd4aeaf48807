//! Prometheus metrics for the floating IP operator

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicI64;

/// Labels for convergence outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub binding: String,
    pub outcome: String,
}

/// Labels for provider mutations
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MutationLabels {
    pub binding: String,
    pub operation: String,
}

/// Convergence attempts per binding and outcome
pub static CONVERGENCE_TOTAL: Lazy<Family<OutcomeLabels, Counter>> = Lazy::new(Family::default);

/// Assign/unassign calls issued to the provider
pub static PROVIDER_MUTATIONS_TOTAL: Lazy<Family<MutationLabels, Counter>> =
    Lazy::new(Family::default);

/// Number of running assigners
pub static ACTIVE_ASSIGNERS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "floating_ip_convergence",
        "Convergence attempts by outcome",
        CONVERGENCE_TOTAL.clone(),
    );
    registry.register(
        "floating_ip_provider_mutations",
        "Floating IP assign and unassign calls issued to the provider",
        PROVIDER_MUTATIONS_TOTAL.clone(),
    );
    registry.register(
        "floating_ip_active_assigners",
        "Number of running floating IP assigners",
        ACTIVE_ASSIGNERS.clone(),
    );
    registry
});

/// Count one convergence attempt
pub fn inc_convergence(binding: &str, outcome: &str) {
    let labels = OutcomeLabels {
        binding: binding.to_string(),
        outcome: outcome.to_string(),
    };
    CONVERGENCE_TOTAL.get_or_create(&labels).inc();
}

/// Count one provider mutation
pub fn inc_provider_mutation(binding: &str, operation: &str) {
    let labels = MutationLabels {
        binding: binding.to_string(),
        operation: operation.to_string(),
    };
    PROVIDER_MUTATIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_active_assigners(count: usize) {
    ACTIVE_ASSIGNERS.set(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_registry_encodes_counters() {
        inc_convergence("metrics-test", "assigned");
        inc_provider_mutation("metrics-test", "assign");

        let mut buffer = String::new();
        encode(&mut buffer, &REGISTRY).unwrap();
        assert!(buffer.contains("floating_ip_convergence_total"));
        assert!(buffer.contains("binding=\"metrics-test\""));
        assert!(buffer.contains("floating_ip_provider_mutations_total"));
    }
}
