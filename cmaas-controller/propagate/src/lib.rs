#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Delivery of configuration changes to microservices.
//!
//! The [`Classifier`] groups a datastore transaction's updates by network
//! function. Updates of active functions are propagated live by the
//! [`Writer`]: the ConfigMap revision is bumped, and the change is either
//! staged as a lease-bound change-set or applied by restarting consumers.
//! Updates of inactive functions only refresh the configuration loaded on
//! startup.

mod classifier;
pub mod day1;
mod metrics;
pub mod transform;
mod writer;


pub use self::{
    classifier::Classifier,
    metrics::PropagateMetrics,
    writer::{Writer, WriterConfig},
};

/// Selects how a network function's updates are delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// First-time delivery: only startup configuration is refreshed.
    Day1,
    /// Live update of an active function.
    Day2,
}

// === impl Mode ===

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day1 => "day1",
            Self::Day2 => "day2",
        }
    }
}
