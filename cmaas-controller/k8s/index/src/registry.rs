use crate::yang;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use cmaas_controller_core::{ConfigMapSnapshot, YangModel};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};
use tracing::{debug, info};

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Process-wide metadata about onboarded ConfigMaps and network functions.
///
/// Everything held here is derived from ConfigMaps and the coordination
/// store, and can be rebuilt by replaying ConfigMap events.
#[derive(Debug)]
pub struct Registry {
    self_nf_id: Option<String>,
    self_xgvela_id: String,

    /// YANG namespace -> where its model lives.
    by_yang_namespace: HashMap<String, ModelLocation>,

    /// ConfigMap -> YANG file -> model.
    models: HashMap<ConfigMapId, HashMap<String, YangModel>>,

    /// NF id -> the ConfigMap carrying its dependency manifest.
    nf_config_maps: HashMap<String, ConfigMapId>,

    ready_nfs: HashSet<String>,

    /// ConfigMaps that completed onboarding.
    onboarded: HashSet<ConfigMapId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigMapId {
    pub namespace: String,
    pub name: String,
}

/// Locates the model owning a YANG namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelLocation {
    pub config_map: ConfigMapId,
    pub nf_id: String,
    pub yang_file: String,
}

// === impl ConfigMapId ===

impl ConfigMapId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl From<&ConfigMapSnapshot> for ConfigMapId {
    fn from(cm: &ConfigMapSnapshot) -> Self {
        Self::new(cm.namespace.clone(), cm.name.clone())
    }
}

impl fmt::Display for ConfigMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Registry ===

impl Registry {
    pub fn new(self_nf_id: Option<String>, self_xgvela_id: String) -> Self {
        Self {
            self_nf_id,
            self_xgvela_id,
            by_yang_namespace: HashMap::default(),
            models: HashMap::default(),
            nf_config_maps: HashMap::default(),
            ready_nfs: HashSet::default(),
            onboarded: HashSet::default(),
        }
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn is_self(&self, nf_id: &str) -> bool {
        self.self_nf_id.as_deref() == Some(nf_id)
    }

    pub fn self_xgvela_id(&self) -> &str {
        &self.self_xgvela_id
    }

    /// Scans the YANG files of `cm` and indexes their models, replacing any
    /// models previously indexed for the ConfigMap. Returns the models that
    /// were not indexed before.
    pub fn index_models(&mut self, cm: &ConfigMapSnapshot, nf_id: &str) -> Vec<YangModel> {
        let id = ConfigMapId::from(cm);
        let scanned = cm
            .data
            .iter()
            .filter(|(k, _)| yang::is_yang_key(k))
            .map(|(file, content)| {
                let has_data = cm.data.contains_key(&yang::data_key_for(file));
                let model = yang::scan(file, content, nf_id, has_data);
                (file.clone(), model)
            })
            .collect::<HashMap<_, _>>();

        let previous = self.models.remove(&id).unwrap_or_default();
        for (file, model) in &previous {
            if scanned.contains_key(file) {
                continue;
            }
            debug!(configmap = %id, yang = %file, "Removing model");
            if let Some(ns) = model.namespace.as_ref() {
                self.by_yang_namespace.remove(ns);
            }
        }

        let mut added = Vec::new();
        for (file, model) in &scanned {
            if let Some(ns) = model.namespace.as_ref() {
                self.by_yang_namespace.insert(
                    ns.clone(),
                    ModelLocation {
                        config_map: id.clone(),
                        nf_id: nf_id.to_string(),
                        yang_file: file.clone(),
                    },
                );
            }
            if !previous.contains_key(file) {
                added.push(model.clone());
            }
        }
        info!(configmap = %id, nf = %nf_id, models = scanned.len(), "Indexed models");
        self.models.insert(id, scanned);
        added
    }

    pub fn lookup(&self, yang_namespace: &str) -> Option<&ModelLocation> {
        self.by_yang_namespace.get(yang_namespace)
    }

    pub fn model(&self, loc: &ModelLocation) -> Option<&YangModel> {
        self.models.get(&loc.config_map)?.get(&loc.yang_file)
    }

    /// All models carried by a ConfigMap.
    pub fn models_of(&self, id: &ConfigMapId) -> Vec<YangModel> {
        self.models
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn model_count(&self) -> usize {
        self.models.values().map(|m| m.len()).sum()
    }

    pub fn set_nf_config_map(&mut self, nf_id: &str, id: ConfigMapId) {
        self.nf_config_maps.insert(nf_id.to_string(), id);
    }

    pub fn nf_config_map(&self, nf_id: &str) -> Option<&ConfigMapId> {
        self.nf_config_maps.get(nf_id)
    }

    pub fn is_ready(&self, nf_id: &str) -> bool {
        self.ready_nfs.contains(nf_id)
    }

    pub fn mark_ready(&mut self, nf_id: &str) {
        self.ready_nfs.insert(nf_id.to_string());
    }

    pub fn ready_count(&self) -> usize {
        self.ready_nfs.len()
    }

    pub fn is_onboarded(&self, id: &ConfigMapId) -> bool {
        self.onboarded.contains(id)
    }

    pub fn mark_onboarded(&mut self, id: ConfigMapId) {
        self.onboarded.insert(id);
    }

    /// Drops a deleted ConfigMap and every cached fact about its NF.
    pub fn remove(&mut self, id: &ConfigMapId, nf_id: &str) {
        if let Some(models) = self.models.remove(id) {
            for ns in models.values().filter_map(|m| m.namespace.as_ref()) {
                self.by_yang_namespace.remove(ns);
            }
        }
        self.onboarded.remove(id);
        self.ready_nfs.remove(nf_id);
        self.nf_config_maps.remove(nf_id);
    }
}
