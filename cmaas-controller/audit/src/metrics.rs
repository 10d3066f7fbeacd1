use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct AuditMetrics {
    pub(crate) success: Counter,
    failures: Family<FailureLabels, Counter>,
    pub(crate) passes: Counter,
    pub(crate) abandoned: Counter,
    pub(crate) stale: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FailureLabels {
    reason: &'static str,
}

/// Why a pod failed to converge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The pod acknowledged an older revision.
    Drift,
    /// The pod never acknowledged the change-set.
    MissingAck,
    /// The pod reported that it could not apply the change-set.
    Sentinel,
}

// === impl FailureReason ===

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::MissingAck => "missing_ack",
            Self::Sentinel => "sentinel",
        }
    }
}

// === impl AuditMetrics ===

impl AuditMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let success = Counter::default();
        prom.register(
            "commit_config_success",
            "Count of pods that acknowledged the expected revision",
            success.clone(),
        );

        let failures = Family::default();
        prom.register(
            "commit_config_failure",
            "Count of pods that failed to converge",
            failures.clone(),
        );

        let passes = Counter::default();
        prom.register("passes", "Count of audit passes started", passes.clone());

        let abandoned = Counter::default();
        prom.register(
            "abandoned",
            "Count of audit passes abandoned after store errors",
            abandoned.clone(),
        );

        let stale = Counter::default();
        prom.register(
            "stale_entries",
            "Count of acknowledgments removed for pods that no longer exist",
            stale.clone(),
        );

        Self {
            success,
            failures,
            passes,
            abandoned,
            stale,
        }
    }

    pub(crate) fn failure(&self, reason: FailureReason) {
        self.failures
            .get_or_create(&FailureLabels {
                reason: reason.as_str(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn failures(&self, reason: FailureReason) -> u64 {
        self.failures
            .get_or_create(&FailureLabels {
                reason: reason.as_str(),
            })
            .get()
    }
}

impl Default for AuditMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
