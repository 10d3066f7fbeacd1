use crate::{
    classify::{classify, Outcome, Pods, Verdict},
    AuditMetrics, FailureReason,
};
use ahash::AHashSet as HashSet;
use cmaas_controller_core::{
    keys::{CHANGE_SET_PREFIX, COMMIT_CONFIG_PREFIX},
    ChangeSetKey, ClusterOps, CommitKey, CommitValue, EventName, FileCoordinate, ManagedObjects,
    NotificationBus,
};
use cmaas_controller_store::{Event, EventKind, EventStream, KeyValue, Store};
use futures::prelude::*;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The number of audited change-set keys remembered for deduplication.
const AUDITED_CAPACITY: usize = 1024;

const WATCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct AuditConfig {
    /// Attempts at scanning acknowledgments before a pass is abandoned.
    pub attempts: usize,
    pub retry_backoff: Duration,
}

/// Verifies that pods converge on each staged revision.
///
/// An audit pass starts when a change-set is deleted, normally because its
/// lease expired. Pods that acknowledged an older revision or nothing at all
/// are evicted. A pod reporting a failed apply is evicted immediately.
pub struct Auditor {
    config: AuditConfig,
    store: Arc<dyn Store>,
    cluster: Arc<dyn ClusterOps>,
    notifier: Arc<dyn NotificationBus>,
    metrics: AuditMetrics,
    audited: Mutex<Audited>,
}

/// Change-set keys that were already audited, oldest first.
#[derive(Debug, Default)]
struct Audited {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

// === impl AuditConfig ===

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

// === impl Auditor ===

impl Auditor {
    pub fn new(
        config: AuditConfig,
        store: Arc<dyn Store>,
        cluster: Arc<dyn ClusterOps>,
        notifier: Arc<dyn NotificationBus>,
        metrics: AuditMetrics,
    ) -> Self {
        Self {
            config,
            store,
            cluster,
            notifier,
            metrics,
            audited: Default::default(),
        }
    }

    /// Watches change-sets and acknowledgments until `drain` is signaled.
    ///
    /// Events of each prefix are handled in order. The two prefixes are
    /// handled concurrently. A watch that ends or fails is re-established.
    pub async fn run(&self, drain: drain::Watch) {
        let handlers = future::join(
            self.watch_change_sets()
                .instrument(info_span!("change_sets")),
            self.watch_commit_configs()
                .instrument(info_span!("commit_configs")),
        );
        tokio::pin! {
            let shutdown = drain.signaled();
        }
        tokio::select! {
            _ = handlers => {}
            _ = &mut shutdown => debug!("Auditor shutting down"),
        }
    }

    async fn watch_change_sets(&self) {
        loop {
            let mut events = self.subscribe(CHANGE_SET_PREFIX).await;
            while let Some(event) = next_event(&mut events).await {
                self.on_change_set(event).await;
            }
            tokio::time::sleep(WATCH_BACKOFF).await;
        }
    }

    async fn watch_commit_configs(&self) {
        loop {
            let mut events = self.subscribe(COMMIT_CONFIG_PREFIX).await;
            while let Some(event) = next_event(&mut events).await {
                self.on_commit_config(event).await;
            }
            tokio::time::sleep(WATCH_BACKOFF).await;
        }
    }

    async fn subscribe(&self, prefix: &str) -> EventStream {
        loop {
            match self.store.watch(prefix).await {
                Ok(events) => {
                    info!(%prefix, "Watching");
                    return events;
                }
                Err(error) => {
                    warn!(%prefix, %error, "Failed to watch");
                    tokio::time::sleep(WATCH_BACKOFF).await;
                }
            }
        }
    }

    pub(crate) async fn on_change_set(&self, event: Event) {
        match event.kind {
            EventKind::Put => self.audited.lock().forget(&event.key),
            EventKind::Delete => {
                let key = match event.key.parse::<ChangeSetKey>() {
                    Ok(key) => key,
                    Err(error) => {
                        warn!(key = %event.key, %error, "Ignoring malformed change-set key");
                        return;
                    }
                };
                if !self.audited.lock().insert(&event.key) {
                    debug!(key = %event.key, "Change-set already audited");
                    return;
                }
                info!(key = %event.key, revision = key.revision, "Change-set removed");
                self.audit(&key).await;
            }
        }
    }

    pub(crate) async fn on_commit_config(&self, event: Event) {
        if event.kind != EventKind::Put {
            return;
        }
        if !matches!(event.value.parse::<CommitValue>(), Ok(CommitValue::Failed)) {
            return;
        }
        let key = match event.key.parse::<CommitKey>() {
            Ok(key) => key,
            Err(error) => {
                warn!(key = %event.key, %error, "Ignoring malformed commit-config key");
                return;
            }
        };
        let failed = CommitValue::Failed.to_string();
        self.fail(
            &key.namespace,
            &key.microservice,
            &key.pod,
            &failed,
            &failed,
            FailureReason::Sentinel,
        )
        .await;
    }

    /// Runs a single audit pass for a change-set.
    pub async fn audit(&self, key: &ChangeSetKey) {
        self.metrics.passes.inc();
        let c = &key.coordinate;

        let (cim_exists, pods) = match self.pods(c).await {
            Ok(res) => res,
            Err(error) => {
                self.metrics.abandoned.inc();
                error!(coordinate = %c, revision = key.revision, %error, "Failed to list pods, abandoning audit");
                return;
            }
        };
        debug!(coordinate = %c, ready = ?pods.ready, "Auditable pods");

        let prefix = c.commit_prefix(cim_exists && c.is_cim_file());
        let Some(entries) = self.scan(&prefix).await else {
            self.metrics.abandoned.inc();
            error!(coordinate = %c, revision = key.revision, %prefix, attempts = self.config.attempts, "Failed to read commit-configs, abandoning audit");
            return;
        };

        let skip_cim = cim_exists && !c.is_cim_file();
        for outcome in classify(key.revision, &pods, &entries, skip_cim) {
            self.apply(key, outcome).await;
        }
    }

    async fn pods(&self, c: &FileCoordinate) -> anyhow::Result<(bool, Pods)> {
        let FileCoordinate {
            namespace,
            microservice,
            service_version,
            ..
        } = c;
        let cim_exists = self
            .cluster
            .cim_config_map_exists(namespace, microservice, service_version)
            .await?;
        let ready = self
            .cluster
            .list_ready_pods(namespace, microservice, service_version)
            .await?;
        let all = self
            .cluster
            .list_pods(namespace, microservice, service_version)
            .await?;
        Ok((cim_exists, Pods { ready, all }))
    }

    async fn scan(&self, prefix: &str) -> Option<Vec<KeyValue>> {
        for attempt in 1..=self.config.attempts {
            match self.store.get_prefix(prefix).await {
                Ok(entries) => return Some(entries),
                Err(error) => {
                    debug!(%prefix, attempt, %error, "Commit-config scan failed");
                    if attempt < self.config.attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }
        None
    }

    async fn apply(&self, key: &ChangeSetKey, outcome: Outcome) {
        let c = &key.coordinate;
        let Outcome { pod, key: commit_key, verdict } = outcome;
        match verdict {
            Verdict::Success { revision } => {
                self.metrics.success.inc();
                info!(namespace = %c.namespace, %pod, version = %c.service_version, revision, "Audit succeeded");
                if revision == key.revision {
                    if let Some(k) = commit_key {
                        self.remove(&k).await;
                    }
                }
            }
            Verdict::Drift { revision } => {
                self.fail(
                    &c.namespace,
                    &c.microservice,
                    &pod,
                    &key.revision.to_string(),
                    &revision.to_string(),
                    FailureReason::Drift,
                )
                .await;
            }
            Verdict::MissingAck => {
                self.fail(
                    &c.namespace,
                    &c.microservice,
                    &pod,
                    &key.revision.to_string(),
                    "not-found",
                    FailureReason::MissingAck,
                )
                .await;
            }
            Verdict::SentinelFailure => {
                info!(namespace = %c.namespace, %pod, "Apply failure already handled");
            }
            Verdict::Bypass => {
                info!(namespace = %c.namespace, %pod, "Configuration ignored by pod");
            }
            Verdict::Stale => {
                self.metrics.stale.inc();
                if let Some(k) = commit_key {
                    debug!(key = %k, "Removing stale commit-config");
                    self.remove(&k).await;
                }
            }
        }
    }

    async fn fail(
        &self,
        namespace: &str,
        microservice: &str,
        pod: &str,
        cmap_revision: &str,
        commit_revision: &str,
        reason: FailureReason,
    ) {
        self.metrics.failure(reason);
        warn!(%namespace, %microservice, %pod, cmap_revision, commit_revision, reason = reason.as_str(), "Audit failed");
        self.notifier.send_event(
            EventName::AuditFailure,
            ManagedObjects::default()
                .with("namespace", namespace)
                .with("microservice", microservice)
                .with("pod", pod)
                .with("cmap-revision", cmap_revision)
                .with("commit-revision", commit_revision),
            ManagedObjects::default(),
        );
        if let Err(error) = self.cluster.kill_pod(namespace, pod).await {
            error!(%namespace, %pod, %error, "Failed to evict pod");
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(error) = self.store.delete(key).await {
            warn!(%key, %error, "Failed to remove commit-config");
        }
    }
}

/// Yields the next event. Returns `None` once the stream ends or fails.
async fn next_event(events: &mut EventStream) -> Option<Event> {
    match events.next().await? {
        Ok(event) => Some(event),
        Err(error) => {
            warn!(%error, "Watch interrupted");
            None
        }
    }
}

// === impl Audited ===

impl Audited {
    /// Records a key, returning false if it was already recorded.
    fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        if self.order.len() == AUDITED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    fn forget(&mut self, key: &str) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}
