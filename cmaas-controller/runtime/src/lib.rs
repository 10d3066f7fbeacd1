#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use cmaas_controller_audit as audit;
pub use cmaas_controller_core as core;
pub use cmaas_controller_k8s_api as k8s;
pub use cmaas_controller_k8s_index as index;
pub use cmaas_controller_propagate as propagate;
pub use cmaas_controller_store as store;

mod args;
mod gateway;
mod ingest;
mod notifier;

pub use self::{
    args::Args,
    gateway::{GatewayConfig, RestconfGateway},
    ingest::Ingest,
    notifier::LogNotifier,
};
