//! In-memory collaborators for tests.

use crate::{
    cluster::{cim_config_map_names, Map},
    ClusterOps, ConfigMapSnapshot, EventName, ManagedObjects, ModelRef, NotificationBus,
    SchemaGateway,
};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterCall {
    KillPod {
        ns: String,
        pod: String,
    },
    RolloutRestart {
        ns: String,
        microservice: String,
        version: String,
    },
    ScaleDeployment {
        ns: String,
        microservice: String,
    },
    EditConfigMap {
        ns: String,
        name: String,
        data: Map,
    },
    RemoveAnnotation {
        ns: String,
        name: String,
        key: String,
    },
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

#[derive(Debug, Default)]
struct ClusterState {
    /// (namespace, microservice, version) -> [(pod, ready)]
    pods: BTreeMap<(String, String, String), Vec<(String, bool)>>,
    config_maps: BTreeMap<(String, String), ConfigMapSnapshot>,
    calls: Vec<ClusterCall>,
    fail_rollouts: bool,
    fail_edits: bool,
    yield_on_edit: bool,
}

#[derive(Debug, Default)]
pub struct RecordingBus {
    events: Mutex<Vec<(EventName, ManagedObjects, ManagedObjects)>>,
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    configs: Mutex<BTreeMap<String, Value>>,
    documents: Mutex<BTreeMap<String, String>>,
    pushes: Mutex<Vec<(String, Value)>>,
    fail: Mutex<bool>,
}

// === impl FakeCluster ===

impl FakeCluster {
    pub fn with_pod(self, ns: &str, microservice: &str, version: &str, pod: &str, ready: bool) -> Self {
        self.add_pod(ns, microservice, version, pod, ready);
        self
    }

    pub fn with_config_map(self, cm: ConfigMapSnapshot) -> Self {
        self.put_config_map(cm);
        self
    }

    pub fn add_pod(&self, ns: &str, microservice: &str, version: &str, pod: &str, ready: bool) {
        self.state
            .lock()
            .pods
            .entry((ns.to_string(), microservice.to_string(), version.to_string()))
            .or_default()
            .push((pod.to_string(), ready));
    }

    pub fn put_config_map(&self, cm: ConfigMapSnapshot) {
        self.state
            .lock()
            .config_maps
            .insert((cm.namespace.clone(), cm.name.clone()), cm);
    }

    pub fn config_map(&self, ns: &str, name: &str) -> Option<ConfigMapSnapshot> {
        self.state
            .lock()
            .config_maps
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_rollouts(&self) {
        self.state.lock().fail_rollouts = true;
    }

    pub fn fail_edits(&self) {
        self.state.lock().fail_edits = true;
    }

    /// Makes every ConfigMap edit yield to the scheduler before it applies.
    pub fn yield_on_edit(&self) {
        self.state.lock().yield_on_edit = true;
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().calls.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClusterCall::KillPod { pod, .. } => Some(pod),
                _ => None,
            })
            .collect()
    }

    pub fn rollouts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClusterCall::RolloutRestart { microservice, .. } => Some(microservice),
                _ => None,
            })
            .collect()
    }

    fn pods(&self, ns: &str, microservice: &str, version: &str) -> Vec<(String, bool)> {
        self.state
            .lock()
            .pods
            .get(&(ns.to_string(), microservice.to_string(), version.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ClusterOps for FakeCluster {
    async fn list_pods(&self, ns: &str, microservice: &str, version: &str) -> Result<Vec<String>> {
        Ok(self
            .pods(ns, microservice, version)
            .into_iter()
            .map(|(p, _)| p)
            .collect())
    }

    async fn list_ready_pods(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<Vec<String>> {
        Ok(self
            .pods(ns, microservice, version)
            .into_iter()
            .filter(|(_, ready)| *ready)
            .map(|(p, _)| p)
            .collect())
    }

    async fn kill_pod(&self, ns: &str, pod: &str) -> Result<()> {
        let mut state = self.state.lock();
        for ((pod_ns, _, _), pods) in state.pods.iter_mut() {
            if pod_ns == ns {
                pods.retain(|(p, _)| p != pod);
            }
        }
        state.calls.push(ClusterCall::KillPod {
            ns: ns.to_string(),
            pod: pod.to_string(),
        });
        Ok(())
    }

    async fn rollout_restart(&self, ns: &str, microservice: &str, version: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_rollouts {
            bail!("rollout of {microservice} failed");
        }
        state.calls.push(ClusterCall::RolloutRestart {
            ns: ns.to_string(),
            microservice: microservice.to_string(),
            version: version.to_string(),
        });
        Ok(())
    }

    async fn scale_deployment(&self, ns: &str, microservice: &str) -> Result<()> {
        self.state.lock().calls.push(ClusterCall::ScaleDeployment {
            ns: ns.to_string(),
            microservice: microservice.to_string(),
        });
        Ok(())
    }

    async fn edit_config_map_data(&self, ns: &str, name: &str, data: Map) -> Result<()> {
        let yield_first = self.state.lock().yield_on_edit;
        if yield_first {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.lock();
        if state.fail_edits {
            bail!("edit of {ns}/{name} failed");
        }
        let Some(cm) = state
            .config_maps
            .get_mut(&(ns.to_string(), name.to_string()))
        else {
            bail!("configmap {ns}/{name} not found");
        };
        cm.data.extend(data.clone());
        state.calls.push(ClusterCall::EditConfigMap {
            ns: ns.to_string(),
            name: name.to_string(),
            data,
        });
        Ok(())
    }

    async fn remove_config_map_annotation(&self, ns: &str, name: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(cm) = state
            .config_maps
            .get_mut(&(ns.to_string(), name.to_string()))
        {
            cm.annotations.remove(key);
        }
        state.calls.push(ClusterCall::RemoveAnnotation {
            ns: ns.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn cim_config_map_exists(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<bool> {
        let state = self.state.lock();
        Ok(cim_config_map_names(microservice, version)
            .into_iter()
            .any(|name| state.config_maps.contains_key(&(ns.to_string(), name))))
    }

    async fn get_config_map(&self, ns: &str, name: &str) -> Result<Option<ConfigMapSnapshot>> {
        Ok(self.config_map(ns, name))
    }

    async fn list_config_maps(&self, ns: &str) -> Result<Vec<ConfigMapSnapshot>> {
        Ok(self
            .state
            .lock()
            .config_maps
            .values()
            .filter(|cm| cm.namespace == ns)
            .cloned()
            .collect())
    }
}

// === impl RecordingBus ===

impl RecordingBus {
    pub fn events(&self) -> Vec<(EventName, ManagedObjects, ManagedObjects)> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<EventName> {
        self.events.lock().iter().map(|(n, _, _)| *n).collect()
    }

    pub fn count(&self, name: EventName) -> usize {
        self.events.lock().iter().filter(|(n, _, _)| *n == name).count()
    }
}

impl NotificationBus for RecordingBus {
    fn send_event(&self, name: EventName, objects: ManagedObjects, info: ManagedObjects) {
        self.events.lock().push((name, objects, info));
    }
}

// === impl FakeGateway ===

impl FakeGateway {
    pub fn set(&self, model: &ModelRef, config: Value) {
        self.configs.lock().insert(model.path(), config);
    }

    pub fn set_xml(&self, model: &ModelRef, document: &str) {
        self.documents
            .lock()
            .insert(model.path(), document.to_string());
    }

    pub fn clear(&self, model: &ModelRef) {
        self.configs.lock().remove(&model.path());
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn pushes(&self) -> Vec<(String, Value)> {
        self.pushes.lock().clone()
    }
}

#[async_trait::async_trait]
impl SchemaGateway for FakeGateway {
    async fn fetch_current(&self, model: &ModelRef) -> Result<Option<Value>> {
        if *self.fail.lock() {
            bail!("gateway unavailable");
        }
        Ok(self.configs.lock().get(&model.path()).cloned())
    }

    async fn fetch_current_xml(&self, model: &ModelRef) -> Result<Option<String>> {
        if *self.fail.lock() {
            bail!("gateway unavailable");
        }
        Ok(self.documents.lock().get(&model.path()).cloned())
    }

    async fn push(&self, model: &ModelRef, payload: &Value) -> Result<()> {
        if *self.fail.lock() {
            bail!("gateway unavailable");
        }
        self.configs.lock().insert(model.path(), payload.clone());
        self.pushes.lock().push((model.path(), payload.clone()));
        Ok(())
    }
}
