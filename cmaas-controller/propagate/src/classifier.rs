use crate::{Mode, PropagateMetrics, Writer};
use anyhow::Result;
use cmaas_controller_core::{
    keys, ConfigUpdate, EventName, ManagedObjects, NfStateChange, NotificationBus, UpdateBatch,
};
use cmaas_controller_k8s_index::{ModelLocation, SharedRegistry};
use cmaas_controller_store::Store;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, warn};

/// Routes update batches to Day-1 or Day-2 delivery per network function.
pub struct Classifier {
    registry: SharedRegistry,
    store: Arc<dyn Store>,
    writer: Arc<Writer>,
    notifier: Arc<dyn NotificationBus>,
    metrics: PropagateMetrics,
}

// === impl Classifier ===

impl Classifier {
    pub fn new(
        registry: SharedRegistry,
        store: Arc<dyn Store>,
        writer: Arc<Writer>,
        notifier: Arc<dyn NotificationBus>,
        metrics: PropagateMetrics,
    ) -> Self {
        Self {
            registry,
            store,
            writer,
            notifier,
            metrics,
        }
    }

    /// Delivers every update of a datastore transaction.
    pub async fn handle_batch(&self, batch: UpdateBatch) {
        if batch.is_empty() {
            return;
        }
        for (nf_id, updates) in self.group_by_nf(batch) {
            match self.mode(&nf_id).await {
                Mode::Day2 => {
                    debug!(nf = %nf_id, updates = updates.len(), "NF is active");
                    self.metrics.batch(Mode::Day2);
                    for (update, loc) in &updates {
                        self.writer.day2(update, loc).await;
                    }
                }
                Mode::Day1 => {
                    debug!(nf = %nf_id, updates = updates.len(), "NF is not active");
                    self.metrics.batch(Mode::Day1);
                    for (_, loc) in &updates {
                        self.writer.day1(loc).await;
                    }
                    if let Err(error) = self.writer.write_day1(&nf_id).await {
                        warn!(nf = %nf_id, %error, "Failed to store Day-1 configuration");
                    }
                }
            }
        }
    }

    /// Records a network function state transition.
    pub async fn handle_state_change(&self, change: NfStateChange) -> Result<()> {
        info!(nf = %change.nf_name, state = %change.new_state, "NF state changed");
        if change.is_active() {
            self.mark_active(&change.nf_name).await?;
        }
        Ok(())
    }

    /// Marks a network function active so that later updates are delivered
    /// live.
    pub async fn mark_active(&self, nf_id: &str) -> Result<()> {
        self.registry.write().mark_ready(nf_id);
        self.store.put(&keys::state_active_key(nf_id), "true").await?;
        info!(nf = %nf_id, "NF marked active");
        Ok(())
    }

    fn group_by_nf(&self, batch: UpdateBatch) -> BTreeMap<String, Vec<(ConfigUpdate, ModelLocation)>> {
        let registry = self.registry.read();
        let mut by_nf = BTreeMap::<_, Vec<_>>::new();
        for update in batch {
            self.notifier.send_event(
                EventName::ConfigUpdateReceived,
                ManagedObjects::default().with("yangNamespace", &update.yang_namespace),
                ManagedObjects::default(),
            );
            let Some(loc) = registry.lookup(&update.yang_namespace).cloned() else {
                warn!(yang_namespace = %update.yang_namespace, "No ConfigMap owns YANG namespace");
                continue;
            };
            by_nf
                .entry(loc.nf_id.clone())
                .or_default()
                .push((update, loc));
        }
        by_nf
    }

    async fn mode(&self, nf_id: &str) -> Mode {
        {
            let registry = self.registry.read();
            if registry.is_self(nf_id) || registry.is_ready(nf_id) {
                return Mode::Day2;
            }
        }
        match self.store.get(&keys::state_active_key(nf_id)).await {
            Ok(Some(_)) => {
                self.registry.write().mark_ready(nf_id);
                Mode::Day2
            }
            Ok(None) => Mode::Day1,
            Err(error) => {
                warn!(nf = %nf_id, %error, "Failed to read NF state, assuming active");
                Mode::Day2
            }
        }
    }
}
