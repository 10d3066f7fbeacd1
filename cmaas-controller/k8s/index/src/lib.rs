#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Onboarding of managed ConfigMaps into a shared registry of YANG model
//! metadata.
//!
//! ConfigMap watch events are filtered by a [`Producer`] into a bounded queue
//! and applied in order by a single [`Processor`].

mod metrics;
mod processor;
mod queue;
mod registry;
pub mod yang;

#[cfg(test)]
mod tests;

pub use self::{
    metrics::IndexMetrics,
    processor::Processor,
    queue::{channel, ConfigMapEvent, Producer, QueueConfig},
    registry::{ConfigMapId, ModelLocation, Registry, SharedRegistry},
};
