//! Prometheus metrics for out-of-memory kills
//!
//! The cgroup code only needs somewhere to report OOM kills; that is the
//! [`MetricsSink`] trait. [`PrometheusSink`] backs it with two counters in
//! the default registry.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Opts};
use tracing::warn;

const SUBSYSTEM: &str = "container_runtime";

/// Key for the total out of memory metric
pub const CONTAINERS_OOM_TOTAL_KEY: &str = "crio_containers_oom_total";

/// Key for the per-container out of memory metric
pub const CONTAINERS_OOM_KEY: &str = "crio_containers_oom";

lazy_static! {
    /// Total OOM kills across all containers
    pub static ref CONTAINERS_OOM_TOTAL: Counter = Counter::with_opts(
        Opts::new(CONTAINERS_OOM_TOTAL_KEY, "Amount of containers killed because they ran out of memory (OOM)")
            .subsystem(SUBSYSTEM)
    ).expect("valid CONTAINERS_OOM_TOTAL metric");

    /// OOM kills per container name.
    ///
    /// Labels:
    /// - name: container or sandbox name
    pub static ref CONTAINERS_OOM: CounterVec = CounterVec::new(
        Opts::new(CONTAINERS_OOM_KEY, "Amount of containers killed because they ran out of memory (OOM) by their name")
            .subsystem(SUBSYSTEM),
        &["name"]
    ).expect("valid CONTAINERS_OOM metric");
}

static REGISTER: Once = Once::new();

/// Register the metrics with the default registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register() {
    REGISTER.call_once(|| {
        let registry = prometheus::default_registry();
        if let Err(e) = registry.register(Box::new(CONTAINERS_OOM_TOTAL.clone())) {
            warn!(error = %e, "failed to register {}", CONTAINERS_OOM_TOTAL_KEY);
        }
        if let Err(e) = registry.register(Box::new(CONTAINERS_OOM.clone())) {
            warn!(error = %e, "failed to register {}", CONTAINERS_OOM_KEY);
        }
    });
}

/// Receiver of OOM events
pub trait MetricsSink: Send + Sync {
    /// One container or sandbox named `name` was OOM-killed
    fn container_oom(&self, name: &str);
}

/// [`MetricsSink`] backed by the global Prometheus counters
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn container_oom(&self, name: &str) {
        CONTAINERS_OOM_TOTAL.inc();
        CONTAINERS_OOM.with_label_values(&[name]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register();
        register();
        let families = prometheus::gather();
        let name = format!("{}_{}", SUBSYSTEM, CONTAINERS_OOM_TOTAL_KEY);
        assert_eq!(families.iter().filter(|f| f.get_name() == name).count(), 1);
    }

    #[test]
    fn test_prometheus_sink_counts() {
        let before_total = CONTAINERS_OOM_TOTAL.get();
        let before = CONTAINERS_OOM.with_label_values(&["sink-test"]).get();

        PrometheusSink.container_oom("sink-test");
        PrometheusSink.container_oom("sink-test");

        assert_eq!(CONTAINERS_OOM.with_label_values(&["sink-test"]).get(), before + 2.0);
        assert!(CONTAINERS_OOM_TOTAL.get() >= before_total + 2.0);
    }
}
