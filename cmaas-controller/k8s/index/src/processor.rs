use crate::{ConfigMapEvent, ConfigMapId, IndexMetrics, SharedRegistry};
use anyhow::{Context, Result};
use cmaas_controller_core::{
    diff::parse_config, keys, ClusterOps, ConfigMapSnapshot, EventName, ManagedObjects,
    NotificationBus, SchemaGateway, Tmaas, YangModel, MUTATE_ANNOTATION,
};
use cmaas_controller_store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Applies ConfigMap events to the registry, one at a time and in order.
pub struct Processor {
    registry: SharedRegistry,
    cluster: Arc<dyn ClusterOps>,
    store: Arc<dyn Store>,
    gateway: Arc<dyn SchemaGateway>,
    notifier: Arc<dyn NotificationBus>,
    metrics: IndexMetrics,
}

// === impl Processor ===

impl Processor {
    pub fn new(
        registry: SharedRegistry,
        cluster: Arc<dyn ClusterOps>,
        store: Arc<dyn Store>,
        gateway: Arc<dyn SchemaGateway>,
        notifier: Arc<dyn NotificationBus>,
        metrics: IndexMetrics,
    ) -> Self {
        Self {
            registry,
            cluster,
            store,
            gateway,
            notifier,
            metrics,
        }
    }

    /// Consumes the queue until every producer is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<ConfigMapEvent>) {
        while let Some(event) = rx.recv().await {
            self.process(event).await;
        }
        debug!("ConfigMap queue closed");
    }

    pub async fn process(&self, event: ConfigMapEvent) {
        let cm = event.config_map();
        let (namespace, name) = (cm.namespace.clone(), cm.name.clone());
        let res = match event {
            ConfigMapEvent::Applied(cm) => self.applied(cm).await,
            ConfigMapEvent::Deleted(cm) => self.deleted(cm).await,
        };
        if let Err(error) = res {
            error!(%namespace, %name, %error, "Failed to process ConfigMap");
        }
        self.metrics.models.set(self.registry.read().model_count() as i64);
    }

    async fn applied(&self, cm: ConfigMapSnapshot) -> Result<()> {
        let tmaas = cm.tmaas()?;
        if !self.is_managed(&tmaas) {
            debug!(namespace = %cm.namespace, name = %cm.name, "Ignoring ConfigMap of another instance");
            return Ok(());
        }

        let id = ConfigMapId::from(&cm);
        if cm.is_nf_level() {
            self.registry
                .write()
                .set_nf_config_map(&tmaas.nf_id, id.clone());
        }

        if !self.registry.read().is_onboarded(&id) {
            return self.onboard_nf(&cm.namespace, &tmaas).await;
        }
        if cm.is_mutated() {
            return self.upgrade_nf(&cm.namespace, &tmaas).await;
        }
        Ok(())
    }

    /// Onboards every managed ConfigMap of the NF in `namespace`.
    async fn onboard_nf(&self, namespace: &str, tmaas: &Tmaas) -> Result<()> {
        let mut ok = true;
        for cm in self.nf_config_maps(namespace, &tmaas.nf_id).await? {
            let id = ConfigMapId::from(&cm);
            if self.registry.read().is_onboarded(&id) {
                continue;
            }
            info!(%namespace, name = %cm.name, nf = %tmaas.nf_id, "Onboarding ConfigMap");
            self.metrics.onboard_attempts.inc();
            let models = {
                let mut registry = self.registry.write();
                if cm.is_nf_level() {
                    registry.set_nf_config_map(&tmaas.nf_id, id.clone());
                }
                registry.index_models(&cm, &tmaas.nf_id)
            };
            if !self.load_config(&cm, &models).await {
                self.metrics.onboard_failures.inc();
                ok = false;
            }
            self.registry.write().mark_onboarded(id);
        }

        if ok {
            info!(%namespace, nf = %tmaas.nf_id, "Onboarding succeeded");
            self.notify_nf(EventName::NfMgmtIntfReady, namespace, tmaas);
        } else {
            warn!(%namespace, nf = %tmaas.nf_id, "Onboarded with errors");
        }
        Ok(())
    }

    /// Re-indexes the NF's ConfigMaps that were marked as upgraded.
    async fn upgrade_nf(&self, namespace: &str, tmaas: &Tmaas) -> Result<()> {
        let upgraded = self
            .nf_config_maps(namespace, &tmaas.nf_id)
            .await?
            .into_iter()
            .filter(|cm| cm.is_mutated())
            .collect::<Vec<_>>();
        if upgraded.is_empty() {
            debug!(%namespace, nf = %tmaas.nf_id, "Upgrade already processed");
            return Ok(());
        }

        info!(%namespace, nf = %tmaas.nf_id, configmaps = upgraded.len(), "Upgrading NF");
        let mut ok = true;
        for cm in &upgraded {
            let added = self.registry.write().index_models(cm, &tmaas.nf_id);
            if !self.load_config(cm, &added).await {
                ok = false;
            }
            self.cluster
                .remove_config_map_annotation(namespace, &cm.name, MUTATE_ANNOTATION)
                .await?;
        }

        if ok {
            self.notify_nf(EventName::NfMgmtIntfChanged, namespace, tmaas);
        } else {
            warn!(%namespace, nf = %tmaas.nf_id, "Upgraded with errors");
        }
        Ok(())
    }

    async fn deleted(&self, cm: ConfigMapSnapshot) -> Result<()> {
        let tmaas = cm.tmaas()?;
        if !self.is_managed(&tmaas) {
            return Ok(());
        }
        let nf_id = tmaas.nf_id;
        info!(namespace = %cm.namespace, name = %cm.name, nf = %nf_id, "Removing ConfigMap");

        self.registry
            .write()
            .remove(&ConfigMapId::from(&cm), &nf_id);
        self.store
            .delete(&keys::state_active_key(&nf_id))
            .await
            .context("removing NF state")?;
        let removed = self
            .store
            .delete_prefix(&keys::namespace_config_prefix(&cm.namespace))
            .await
            .context("removing Day-1 configuration")?;
        debug!(namespace = %cm.namespace, removed, "Removed Day-1 configuration");
        Ok(())
    }

    /// Seeds the datastore with the configuration a ConfigMap carries for
    /// each model. Returns false if any model failed to load.
    async fn load_config(&self, cm: &ConfigMapSnapshot, models: &[YangModel]) -> bool {
        let mut ok = true;
        for model in models {
            let (Some(root), Some(data_key)) = (model.root.as_ref(), model.data_key.as_ref()) else {
                continue;
            };
            let Some(raw) = cm.data.get(data_key) else {
                continue;
            };
            if raw.trim().is_empty() {
                debug!(name = %cm.name, %data_key, "No initial configuration");
                continue;
            }
            let res = match parse_config(raw) {
                Ok(payload) => self.gateway.push(root, &payload).await,
                Err(error) => Err(error),
            };
            if let Err(error) = res {
                error!(name = %cm.name, %data_key, %error, "Failed to load configuration");
                ok = false;
            }
        }
        ok
    }

    async fn nf_config_maps(&self, namespace: &str, nf_id: &str) -> Result<Vec<ConfigMapSnapshot>> {
        let cms = self.cluster.list_config_maps(namespace).await?;
        Ok(cms
            .into_iter()
            .filter(|cm| cm.is_editable())
            .filter(|cm| {
                cm.tmaas()
                    .map(|t| t.nf_id == nf_id && self.is_managed(&t))
                    .unwrap_or(false)
            })
            .collect())
    }

    fn is_managed(&self, tmaas: &Tmaas) -> bool {
        tmaas.xgvela_id == self.registry.read().self_xgvela_id()
    }

    fn notify_nf(&self, event: EventName, namespace: &str, tmaas: &Tmaas) {
        self.notifier.send_event(
            event,
            ManagedObjects::default()
                .with("nfId", &tmaas.nf_id)
                .with("nfType", &tmaas.nf_type)
                .with("namespace", namespace),
            ManagedObjects::default(),
        );
    }
}
