use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    pub(crate) events: Family<EventLabels, Counter>,
    pub(crate) dead_letters: Counter,
    pub(crate) onboard_attempts: Counter,
    pub(crate) onboard_failures: Counter,
    pub(crate) models: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct EventLabels {
    action: &'static str,
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "events",
            "Count of managed ConfigMap events enqueued for processing",
            events.clone(),
        );

        let dead_letters = Counter::default();
        prom.register(
            "dead_letters",
            "Count of ConfigMap events dropped after the queue stayed full",
            dead_letters.clone(),
        );

        let onboard_attempts = Counter::default();
        prom.register(
            "onboard_attempts",
            "Count of ConfigMaps onboarded",
            onboard_attempts.clone(),
        );

        let onboard_failures = Counter::default();
        prom.register(
            "onboard_failures",
            "Count of ConfigMaps that failed onboarding",
            onboard_failures.clone(),
        );

        let models = Gauge::default();
        prom.register(
            "models",
            "Gauge of the number of indexed YANG models",
            models.clone(),
        );

        Self {
            events,
            dead_letters,
            onboard_attempts,
            onboard_failures,
            models,
        }
    }

    pub(crate) fn event(&self, action: &'static str) {
        self.events.get_or_create(&EventLabels { action }).inc();
    }
}

impl Default for IndexMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
