#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster;
mod configmap;

pub use self::{
    cluster::KubeClusterOps,
    configmap::{is_ready, service_version, snapshot},
};
pub use k8s_openapi::api::{
    self,
    apps::v1::Deployment,
    core::v1::{ConfigMap, Pod, PodStatus},
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, ResourceExt},
    Client, Error,
};
