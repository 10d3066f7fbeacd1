use crate::{
    file_stem, is_config_data_key, Tmaas, UpdatePolicy, CONFIG_MGMT_ANNOTATION,
    DEFAULT_SVC_VERSION, DEPENDENCY_KEY, LOAD_CONFIG_ANNOTATION, MICROSERVICE_LABEL,
    MUTATE_ANNOTATION, REVISION_KEY, SVC_VERSION_ANNOTATION, TMAAS_ANNOTATION, UPDATE_POLICY_KEY,
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// Kubernetes operations consumed by propagation and audit.
///
/// Pods are identified by name within a namespace and selected by the
/// microservice label plus the service version annotation.
#[async_trait::async_trait]
pub trait ClusterOps: Send + Sync {
    async fn list_pods(&self, ns: &str, microservice: &str, version: &str) -> Result<Vec<String>>;

    /// Lists pods whose containers all report ready.
    async fn list_ready_pods(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<Vec<String>>;

    async fn kill_pod(&self, ns: &str, pod: &str) -> Result<()>;

    /// Restarts the microservice's deployment for `version`, killing its pods
    /// when no deployment exists.
    async fn rollout_restart(&self, ns: &str, microservice: &str, version: &str) -> Result<()>;

    /// Scales the microservice's deployment to zero and back.
    async fn scale_deployment(&self, ns: &str, microservice: &str) -> Result<()>;

    /// Writes `data` into the ConfigMap in a single update, leaving other
    /// keys untouched.
    async fn edit_config_map_data(&self, ns: &str, name: &str, data: Map) -> Result<()>;

    async fn remove_config_map_annotation(&self, ns: &str, name: &str, key: &str) -> Result<()>;

    async fn cim_config_map_exists(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<bool>;

    async fn get_config_map(&self, ns: &str, name: &str) -> Result<Option<ConfigMapSnapshot>>;

    async fn list_config_maps(&self, ns: &str) -> Result<Vec<ConfigMapSnapshot>>;
}

/// The parts of a ConfigMap that configuration management reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigMapSnapshot {
    pub namespace: String,
    pub name: String,
    pub labels: Map,
    pub annotations: Map,
    pub data: Map,
}

/// Names the CIM-managed ConfigMaps of a microservice, versioned first.
pub fn cim_config_map_names(microservice: &str, version: &str) -> [String; 2] {
    [
        format!("{microservice}-cim-{version}-mgmt-cfg"),
        format!("{microservice}-cim-mgmt-cfg"),
    ]
}

// === impl ConfigMapSnapshot ===

impl ConfigMapSnapshot {
    /// Returns true if configuration management owns this ConfigMap.
    pub fn is_editable(&self) -> bool {
        if self.namespace.starts_with("kube") {
            return false;
        }
        self.annotations
            .get(CONFIG_MGMT_ANNOTATION)
            .is_some_and(|v| v == "enabled")
            && self.annotations.contains_key(TMAAS_ANNOTATION)
            && !self.data.is_empty()
    }

    pub fn tmaas(&self) -> Result<Tmaas> {
        let raw = self
            .annotations
            .get(TMAAS_ANNOTATION)
            .with_context(|| format!("{}/{} has no tmaas annotation", self.namespace, self.name))?;
        serde_json::from_str(raw).context("invalid tmaas annotation")
    }

    pub fn is_mutated(&self) -> bool {
        self.annotations.contains_key(MUTATE_ANNOTATION)
    }

    pub fn microservice(&self) -> Option<&str> {
        self.labels.get(MICROSERVICE_LABEL).map(String::as_str)
    }

    pub fn service_version(&self) -> &str {
        self.annotations
            .get(SVC_VERSION_ANNOTATION)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SVC_VERSION)
    }

    pub fn load_full_config(&self) -> bool {
        self.annotations
            .get(LOAD_CONFIG_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("enabled"))
    }

    /// The stored revision counter. An absent counter is zero; a malformed one
    /// is an error.
    pub fn revision(&self) -> Result<u64> {
        let Some(raw) = self.data.get(REVISION_KEY) else {
            return Ok(0);
        };
        raw.trim().parse().with_context(|| {
            format!("{}/{} has malformed {REVISION_KEY}: {raw:?}", self.namespace, self.name)
        })
    }

    pub fn revision_str(&self) -> Option<&str> {
        self.data.get(REVISION_KEY).map(String::as_str)
    }

    /// Returns true if this ConfigMap carries the NF-level dependency manifest.
    pub fn is_nf_level(&self) -> bool {
        self.data.contains_key(DEPENDENCY_KEY)
    }

    /// Parses the dependency manifest: file stem to consuming microservices.
    pub fn dependencies(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let raw = self
            .data
            .get(DEPENDENCY_KEY)
            .with_context(|| format!("{}/{} has no {DEPENDENCY_KEY}", self.namespace, self.name))?;
        serde_json::from_str(raw).with_context(|| format!("malformed {DEPENDENCY_KEY}"))
    }

    /// The microservices consuming `data_file` according to the dependency manifest.
    pub fn dependents(&self, data_file: &str) -> Result<Vec<String>> {
        let mut deps = self.dependencies()?;
        Ok(deps.remove(file_stem(data_file)).unwrap_or_default())
    }

    /// Resolves the update policy for `data_file`, defaulting to restart when
    /// the policy map is absent, malformed, or silent about the file.
    pub fn update_policy(&self, data_file: &str) -> UpdatePolicy {
        let Some(raw) = self.data.get(UPDATE_POLICY_KEY) else {
            return UpdatePolicy::default();
        };
        let Ok(policies) = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) else {
            return UpdatePolicy::default();
        };
        policies
            .get(file_stem(data_file))
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Data keys carrying deliverable configuration.
    pub fn config_data_keys(&self) -> impl Iterator<Item = &str> {
        self.data
            .keys()
            .map(String::as_str)
            .filter(|k| is_config_data_key(k))
    }
}
