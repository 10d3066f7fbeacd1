use crate::Mode;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct PropagateMetrics {
    pub(crate) configmap_update_attempts: Counter,
    pub(crate) configmap_update_failure: Counter,
    pub(crate) change_set_push_attempts: Counter,
    pub(crate) change_set_push_failure: Counter,
    pub(crate) rollouts: Counter,
    batches: Family<BatchLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BatchLabels {
    mode: &'static str,
}

// === impl PropagateMetrics ===

impl PropagateMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let configmap_update_attempts = Counter::default();
        prom.register(
            "configmap_update_attempts",
            "Count of ConfigMap revision updates attempted",
            configmap_update_attempts.clone(),
        );

        let configmap_update_failure = Counter::default();
        prom.register(
            "configmap_update_failure",
            "Count of configuration files that failed to propagate",
            configmap_update_failure.clone(),
        );

        let change_set_push_attempts = Counter::default();
        prom.register(
            "change_set_push_attempts",
            "Count of change-sets written to the coordination store",
            change_set_push_attempts.clone(),
        );

        let change_set_push_failure = Counter::default();
        prom.register(
            "change_set_push_failure",
            "Count of change-sets that could not be written",
            change_set_push_failure.clone(),
        );

        let rollouts = Counter::default();
        prom.register(
            "rollouts",
            "Count of restarts triggered by configuration updates",
            rollouts.clone(),
        );

        let batches = Family::default();
        prom.register(
            "batches",
            "Count of per-NF update batches by delivery mode",
            batches.clone(),
        );

        Self {
            configmap_update_attempts,
            configmap_update_failure,
            change_set_push_attempts,
            change_set_push_failure,
            rollouts,
            batches,
        }
    }

    pub(crate) fn batch(&self, mode: Mode) {
        self.batches
            .get_or_create(&BatchLabels {
                mode: mode.as_str(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn batches(&self, mode: Mode) -> u64 {
        self.batches
            .get_or_create(&BatchLabels {
                mode: mode.as_str(),
            })
            .get()
    }
}

impl Default for PropagateMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
