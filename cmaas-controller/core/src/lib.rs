#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod diff;
pub mod gateway;
pub mod keys;
mod model;
pub mod notify;
#[cfg(feature = "test-util")]
pub mod testing;

pub use self::{
    cluster::{ClusterOps, ConfigMapSnapshot},
    gateway::{ModelRef, RootKind, SchemaGateway},
    keys::{ChangeSetKey, CommitKey, CommitValue, FileCoordinate, KeyError, MapLevel},
    model::{ConfigUpdate, NfStateChange, Tmaas, UpdateBatch, UpdatePolicy, YangModel},
    notify::{EventName, ManagedObjects, NotificationBus},
};

/// Data key holding the NF-level dependency manifest (file stem -> [microservice]).
pub const DEPENDENCY_KEY: &str = "dependency.json";

/// Data key holding the per-file update policy map (file stem -> policy).
pub const UPDATE_POLICY_KEY: &str = "updatePolicy.json";

/// Data key holding a ConfigMap's revision counter.
pub const REVISION_KEY: &str = "revision";

/// Label naming the microservice that owns a ConfigMap, deployment, or pod.
pub const MICROSERVICE_LABEL: &str = "microSvcName";

pub const TMAAS_ANNOTATION: &str = "xgvela.com/tmaas";
pub const MUTATE_ANNOTATION: &str = "cmaas.mutate";
pub const CONFIG_MGMT_ANNOTATION: &str = "configMgmt";
pub const LOAD_CONFIG_ANNOTATION: &str = "fullConfigOnRestart";
pub const SVC_VERSION_ANNOTATION: &str = "svcVersion";

pub const DEFAULT_SVC_VERSION: &str = "v0";

/// The state reported by a network function once it is fully configured.
pub const NF_ACTIVE_STATE: &str = "INSTANTIATED_CONFIGURED_ACTIVE";

/// Returns true if `key` names a configuration payload that is delivered to
/// microservices, i.e. a JSON file that is not one of the control manifests.
pub fn is_config_data_key(key: &str) -> bool {
    key.ends_with(".json") && key != DEPENDENCY_KEY && key != UPDATE_POLICY_KEY
}

/// Strips the `.json` extension from a data file name.
pub fn file_stem(data_file: &str) -> &str {
    data_file.strip_suffix(".json").unwrap_or(data_file)
}
