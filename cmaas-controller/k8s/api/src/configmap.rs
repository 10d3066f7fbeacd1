use cmaas_controller_core::{ConfigMapSnapshot, DEFAULT_SVC_VERSION, SVC_VERSION_ANNOTATION};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{ObjectMeta, ResourceExt};

/// Copies the labels, annotations, and data of a ConfigMap.
pub fn snapshot(cm: &ConfigMap) -> ConfigMapSnapshot {
    ConfigMapSnapshot {
        namespace: cm.namespace().unwrap_or_default(),
        name: cm.name_any(),
        labels: cm.labels().clone(),
        annotations: cm.annotations().clone(),
        data: cm.data.clone().unwrap_or_default(),
    }
}

/// The service version an object is annotated with.
pub fn service_version(meta: &ObjectMeta) -> &str {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(SVC_VERSION_ANNOTATION))
        .map(String::as_str)
        .unwrap_or(DEFAULT_SVC_VERSION)
}

/// A pod is ready when it reports at least one container status and every
/// container is ready.
pub fn is_ready(pod: &Pod) -> bool {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());
    match statuses {
        Some(statuses) if !statuses.is_empty() => statuses.iter().all(|c| c.ready),
        _ => false,
    }
}
