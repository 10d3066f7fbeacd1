#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A typed client over an etcd-like coordination store.
//!
//! Callers own their retry policy: every RPC failure surfaces as a retryable
//! [`Error::Rpc`].

mod etcd;
mod memory;

pub use self::{etcd::EtcdStore, memory::MemoryStore};
use futures::prelude::*;
use std::{pin::Pin, time::Duration};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An ordered stream of changes under a watched prefix.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send + 'static>>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store {op} failed: {source}")]
    Rpc {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("watch stream closed")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub key: String,
    /// Empty for deletions.
    pub value: String,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns all entries under `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Writes `key` bound to a fresh lease. The key is deleted, producing a
    /// `Delete` watch event, once the lease expires.
    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes every key under `prefix`, returning the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    async fn watch(&self, prefix: &str) -> Result<EventStream>;
}

// === impl Error ===

impl Error {
    pub(crate) fn rpc(op: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Rpc {
            op,
            source: source.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}

// === impl Event ===

impl Event {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: String::new(),
        }
    }
}
