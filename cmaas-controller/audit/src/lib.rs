#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Convergence auditing of staged configuration changes.
//!
//! Pods acknowledge the revision they applied under `commit-config/`. When a
//! change-set leaves the store, the [`Auditor`] compares each ready pod's
//! acknowledgment with the change-set's revision and evicts pods that did
//! not converge.

mod auditor;
pub mod classify;
mod metrics;


pub use self::{
    auditor::{AuditConfig, Auditor},
    classify::{Outcome, Pods, Verdict},
    metrics::{AuditMetrics, FailureReason},
};
