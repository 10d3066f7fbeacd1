use crate::IndexMetrics;
use cmaas_controller_core::ConfigMapSnapshot;
use cmaas_controller_k8s_api::{snapshot, ConfigMap};
use futures::prelude::*;
use kube::runtime::watcher;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, error, warn};

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub capacity: usize,
    /// How long the producer blocks on a full queue before dead-lettering.
    pub overflow_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigMapEvent {
    Applied(ConfigMapSnapshot),
    Deleted(ConfigMapSnapshot),
}

/// Feeds managed ConfigMap events into the bounded processing queue.
#[derive(Debug)]
pub struct Producer {
    tx: mpsc::Sender<ConfigMapEvent>,
    overflow_timeout: Duration,
    metrics: IndexMetrics,
}

pub fn channel(config: QueueConfig, metrics: IndexMetrics) -> (Producer, mpsc::Receiver<ConfigMapEvent>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let producer = Producer {
        tx,
        overflow_timeout: config.overflow_timeout,
        metrics,
    };
    (producer, rx)
}

// === impl QueueConfig ===

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            overflow_timeout: Duration::from_secs(30),
        }
    }
}

// === impl ConfigMapEvent ===

impl ConfigMapEvent {
    pub fn config_map(&self) -> &ConfigMapSnapshot {
        match self {
            Self::Applied(cm) | Self::Deleted(cm) => cm,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Deleted(_) => "deleted",
        }
    }
}

// === impl Producer ===

impl Producer {
    /// Forwards ConfigMap watch events until the watch ends.
    pub async fn run<S>(self, events: S)
    where
        S: Stream<Item = watcher::Event<ConfigMap>>,
    {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            let event = match event {
                watcher::Event::Apply(cm) | watcher::Event::InitApply(cm) => {
                    ConfigMapEvent::Applied(snapshot(&cm))
                }
                watcher::Event::Delete(cm) => ConfigMapEvent::Deleted(snapshot(&cm)),
                watcher::Event::Init | watcher::Event::InitDone => continue,
            };
            if !event.config_map().is_editable() {
                continue;
            }
            if !self.enqueue(event).await {
                break;
            }
        }
        debug!("ConfigMap watch ended");
    }

    /// Enqueues an event, blocking while the queue is full for at most the
    /// overflow timeout. Returns false once the consumer is gone.
    pub async fn enqueue(&self, event: ConfigMapEvent) -> bool {
        let action = event.action();
        let event = match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.event(action);
                return true;
            }
            Err(TrySendError::Closed(_)) => return false,
            Err(TrySendError::Full(event)) => event,
        };

        let cm = event.config_map();
        let (namespace, name) = (cm.namespace.clone(), cm.name.clone());
        warn!(%namespace, %name, "ConfigMap queue is full, waiting");
        match self.tx.send_timeout(event, self.overflow_timeout).await {
            Ok(()) => {
                self.metrics.event(action);
                true
            }
            Err(SendTimeoutError::Closed(_)) => false,
            Err(SendTimeoutError::Timeout(_)) => {
                self.metrics.dead_letters.inc();
                error!(%namespace, %name, %action, "Dropped ConfigMap event after queue overflow");
                true
            }
        }
    }
}
