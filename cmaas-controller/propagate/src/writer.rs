use crate::{
    day1,
    transform::{transform, transform_xml},
    PropagateMetrics,
};
use ahash::AHashMap as HashMap;
use anyhow::{bail, Context, Result};
use cmaas_controller_core::{
    cluster::Map,
    diff::{diff, parse_config},
    keys, ChangeSetKey, ClusterOps, ConfigMapSnapshot, ConfigUpdate, EventName, FileCoordinate,
    ManagedObjects, MapLevel, ModelRef, NotificationBus, SchemaGateway, UpdatePolicy, YangModel,
    REVISION_KEY,
};
use cmaas_controller_k8s_index::{yang, ConfigMapId, ModelLocation, SharedRegistry};
use cmaas_controller_store::Store;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct WriterConfig {
    /// Lease bound to each change-set entry.
    pub change_set_ttl: Duration,
}

/// Writes configuration into ConfigMaps and the coordination store.
///
/// Revision updates of a ConfigMap are serialized so that concurrent updates
/// never bump the same revision twice.
pub struct Writer {
    config: WriterConfig,
    registry: SharedRegistry,
    cluster: Arc<dyn ClusterOps>,
    store: Arc<dyn Store>,
    gateway: Arc<dyn SchemaGateway>,
    notifier: Arc<dyn NotificationBus>,
    metrics: PropagateMetrics,
    locks: parking_lot::Mutex<HashMap<ConfigMapId, Arc<tokio::sync::Mutex<()>>>>,
}

/// A model resolved from the registry along with its ConfigMap's other models.
struct Target {
    config_map: ConfigMapId,
    nf_id: String,
    root: ModelRef,
    data_file: String,
    models: Vec<YangModel>,
}

// === impl WriterConfig ===

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            change_set_ttl: Duration::from_secs(180),
        }
    }
}

// === impl Writer ===

impl Writer {
    pub fn new(
        config: WriterConfig,
        registry: SharedRegistry,
        cluster: Arc<dyn ClusterOps>,
        store: Arc<dyn Store>,
        gateway: Arc<dyn SchemaGateway>,
        notifier: Arc<dyn NotificationBus>,
        metrics: PropagateMetrics,
    ) -> Self {
        Self {
            config,
            registry,
            cluster,
            store,
            gateway,
            notifier,
            metrics,
            locks: Default::default(),
        }
    }

    /// Writes the current configuration of an inactive NF's model into its
    /// ConfigMap. The revision is left unchanged.
    pub async fn day1(&self, loc: &ModelLocation) {
        if let Err(error) = self.write_day1_file(loc).await {
            error!(configmap = %loc.config_map, yang = %loc.yang_file, %error, "Failed to update ConfigMap");
        }
    }

    async fn write_day1_file(&self, loc: &ModelLocation) -> Result<()> {
        let target = self.target(loc)?;
        let desired = self.desired(&target).await?;
        let ConfigMapId { namespace, name } = &target.config_map;

        let lock = self.lock(&target.config_map);
        let _guard = lock.lock().await;
        let cm = self
            .cluster
            .get_config_map(namespace, name)
            .await?
            .with_context(|| format!("configmap {} not found", target.config_map))?;
        let mut data = Map::from([(target.data_file.clone(), serde_json::to_string(&desired)?)]);
        data.extend(self.xml_sibling(&target, &cm).await?);
        self.cluster
            .edit_config_map_data(namespace, name, data)
            .await?;
        info!(%namespace, %name, data_file = %target.data_file, "Updated ConfigMap");
        Ok(())
    }

    /// Propagates a live update of an active NF's model.
    ///
    /// Failures are counted and notified; they never abort the caller's batch.
    pub async fn day2(&self, update: &ConfigUpdate, loc: &ModelLocation) {
        let data_file = self
            .registry
            .read()
            .model(loc)
            .map(data_file_of)
            .unwrap_or_else(|| yang::data_key_for(&loc.yang_file));

        if let Err(error) = self.write_day2_file(update, loc).await {
            self.metrics.configmap_update_failure.inc();
            let ConfigMapId { namespace, name } = &loc.config_map;
            error!(%namespace, %name, %data_file, %error, "Failed to update ConfigMap");
            self.notifier.send_event(
                EventName::ConfigmapUpdateFailure,
                config_map_objects(namespace, name, &data_file),
                ManagedObjects::default(),
            );
        }
    }

    async fn write_day2_file(&self, update: &ConfigUpdate, loc: &ModelLocation) -> Result<()> {
        let target = self.target(loc)?;
        let desired = self.desired(&target).await?;
        let ConfigMapId { namespace, name } = &target.config_map;
        let data_file = target.data_file.as_str();

        let (cm, patch, revision) = {
            let lock = self.lock(&target.config_map);
            let _guard = lock.lock().await;

            let cm = self
                .cluster
                .get_config_map(namespace, name)
                .await?
                .with_context(|| format!("configmap {} not found", target.config_map))?;
            let prior = parse_config(cm.data.get(data_file).map(String::as_str).unwrap_or(""))?;
            let Some(patch) = diff(&prior, &desired) else {
                debug!(%namespace, %name, %data_file, "Configuration unchanged");
                return Ok(());
            };

            let revision = cm.revision()? + 1;
            self.metrics.configmap_update_attempts.inc();
            let mut data = Map::from([
                (data_file.to_string(), serde_json::to_string(&desired)?),
                (REVISION_KEY.to_string(), revision.to_string()),
            ]);
            data.extend(self.xml_sibling(&target, &cm).await?);
            self.cluster
                .edit_config_map_data(namespace, name, data)
                .await?;
            (cm, patch, revision)
        };

        info!(%namespace, %name, %data_file, revision, "Updated ConfigMap");
        self.notifier.send_event(
            EventName::ConfigmapUpdateSuccess,
            config_map_objects(namespace, name, data_file).with("revision", revision),
            ManagedObjects::default(),
        );

        let policy = if update.restart {
            UpdatePolicy::Restart
        } else {
            cm.update_policy(data_file)
        };
        let (map_level, microservices) = consumers(&cm, data_file)?;
        let patch = serde_json::to_string(&patch)?;
        for microservice in microservices {
            let coordinate = FileCoordinate {
                namespace: namespace.clone(),
                microservice,
                service_version: cm.service_version().to_string(),
                map_level,
                data_file: data_file.to_string(),
            };
            self.apply_policy(policy, coordinate, revision, &patch).await?;
        }

        self.write_day1(&target.nf_id).await
    }

    async fn apply_policy(
        &self,
        policy: UpdatePolicy,
        coordinate: FileCoordinate,
        revision: u64,
        patch: &str,
    ) -> Result<()> {
        let FileCoordinate {
            namespace,
            microservice,
            service_version,
            ..
        } = &coordinate;
        debug!(%namespace, %microservice, %service_version, %policy, "Applying update policy");

        if policy == UpdatePolicy::Dynamic {
            let key = ChangeSetKey {
                coordinate,
                revision,
            };
            self.push_change_set(&key, patch).await;
            return Ok(());
        }

        self.metrics.rollouts.inc();
        if let Err(error) = self
            .cluster
            .rollout_restart(namespace, microservice, service_version)
            .await
        {
            warn!(%namespace, %microservice, %error, "Rollout failed, scaling deployment");
            self.cluster
                .scale_deployment(namespace, microservice)
                .await?;
        }
        Ok(())
    }

    async fn push_change_set(&self, key: &ChangeSetKey, patch: &str) {
        let c = &key.coordinate;
        let objects = ManagedObjects::default()
            .with("namespace", &c.namespace)
            .with("microservice", &c.microservice)
            .with("data-key", &c.data_file)
            .with("revision", key.revision);

        self.metrics.change_set_push_attempts.inc();
        let key_str = key.to_string();
        match self
            .store
            .put_with_ttl(&key_str, patch, self.config.change_set_ttl)
            .await
        {
            Ok(()) => {
                info!(key = %key_str, "Pushed change-set");
                self.notifier
                    .send_event(EventName::ChangeSetPushSuccess, objects, ManagedObjects::default());
            }
            Err(error) => {
                self.metrics.change_set_push_failure.inc();
                error!(key = %key_str, %error, "Failed to push change-set");
                self.notifier
                    .send_event(EventName::ChangeSetPushFailure, objects, ManagedObjects::default());
            }
        }
    }

    /// Recomputes and stores the configuration every microservice of `nf_id`
    /// loads on startup, replacing previous entries.
    ///
    /// A missing NF-level ConfigMap is logged and skipped.
    pub async fn write_day1(&self, nf_id: &str) -> Result<()> {
        let (id, xgvela_id) = {
            let registry = self.registry.read();
            let Some(id) = registry.nf_config_map(nf_id).cloned() else {
                error!(nf = %nf_id, "NF-level ConfigMap not found");
                return Ok(());
            };
            (id, registry.self_xgvela_id().to_string())
        };
        let ConfigMapId { namespace, name } = &id;

        let Some(nf) = self.cluster.get_config_map(namespace, name).await? else {
            error!(nf = %nf_id, configmap = %id, "NF-level ConfigMap not found");
            return Ok(());
        };

        let microservices = self
            .cluster
            .list_config_maps(namespace)
            .await?
            .into_iter()
            .filter(|cm| &cm.name != name && cm.is_editable())
            .filter(|cm| {
                cm.tmaas()
                    .map(|t| t.nf_id == nf_id && t.xgvela_id == xgvela_id)
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        let configs = day1::aggregate(&nf, &microservices);
        let revision = nf
            .load_full_config()
            .then(|| nf.revision_str().unwrap_or("0").to_string());

        for (microservice, config) in configs {
            let value = serde_json::to_string(&Value::Object(config))?;
            self.store
                .delete(&keys::config_key(namespace, &microservice, None))
                .await?;
            self.store
                .delete_prefix(&keys::config_revisions_prefix(namespace, &microservice))
                .await?;
            let key = keys::config_key(namespace, &microservice, revision.as_deref());
            self.store.put(&key, &value).await?;
            debug!(%key, "Stored Day-1 configuration");
        }
        info!(nf = %nf_id, %namespace, "Updated Day-1 configuration");
        Ok(())
    }

    fn target(&self, loc: &ModelLocation) -> Result<Target> {
        let registry = self.registry.read();
        let Some(model) = registry.model(loc) else {
            bail!("no model for {} in {}", loc.yang_file, loc.config_map);
        };
        let Some(root) = model.root.clone() else {
            bail!("model {} has no root node", model.module);
        };
        Ok(Target {
            config_map: loc.config_map.clone(),
            nf_id: loc.nf_id.clone(),
            data_file: data_file_of(model),
            root,
            models: registry.models_of(&loc.config_map),
        })
    }

    async fn desired(&self, target: &Target) -> Result<Value> {
        let payload = self
            .gateway
            .fetch_current(&target.root)
            .await
            .with_context(|| format!("fetching {}", target.root.path()))?;
        Ok(transform(payload, target.root.kind, &target.models))
    }

    /// Reads the XML rendition of `target` when its ConfigMap carries one
    /// beside the JSON data file.
    async fn xml_sibling(
        &self,
        target: &Target,
        cm: &ConfigMapSnapshot,
    ) -> Result<Option<(String, String)>> {
        let Some(key) = xml_key_for(&target.data_file).filter(|k| cm.data.contains_key(k)) else {
            return Ok(None);
        };
        let document = self
            .gateway
            .fetch_current_xml(&target.root)
            .await
            .with_context(|| format!("fetching {} as xml", target.root.path()))?;
        debug!(configmap = %target.config_map, %key, "Refreshing XML data");
        Ok(Some((
            key,
            transform_xml(document, target.root.kind, &target.nf_id),
        )))
    }

    fn lock(&self, id: &ConfigMapId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(id.clone()).or_default().clone()
    }
}

fn data_file_of(model: &YangModel) -> String {
    model
        .data_key
        .clone()
        .unwrap_or_else(|| yang::data_key_for(&model.yang_file))
}

fn xml_key_for(data_file: &str) -> Option<String> {
    data_file
        .strip_suffix(".json")
        .map(|stem| format!("{stem}.xml"))
}

/// The microservices consuming `data_file` and the level they consume it at.
fn consumers(cm: &ConfigMapSnapshot, data_file: &str) -> Result<(MapLevel, Vec<String>)> {
    if cm.is_nf_level() {
        return Ok((MapLevel::Nf, cm.dependents(data_file)?));
    }
    let microservice = cm
        .microservice()
        .with_context(|| format!("{}/{} has no microservice label", cm.namespace, cm.name))?;
    Ok((MapLevel::Ms, vec![microservice.to_string()]))
}

fn config_map_objects(namespace: &str, name: &str, data_file: &str) -> ManagedObjects {
    ManagedObjects::default()
        .with("namespace", namespace)
        .with("config-map", name)
        .with("data-key", data_file)
}
