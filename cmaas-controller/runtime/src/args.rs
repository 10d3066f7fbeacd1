use crate::{
    audit::{AuditConfig, AuditMetrics, Auditor},
    core::{ClusterOps, NotificationBus, SchemaGateway},
    index::{self, IndexMetrics, Processor, QueueConfig, Registry},
    k8s::{ConfigMap, KubeClusterOps},
    propagate::{Classifier, PropagateMetrics, Writer, WriterConfig},
    store::{EtcdStore, Store},
    GatewayConfig, Ingest, LogNotifier, RestconfGateway,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry as Prometheus;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, time::Duration};
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "cmaas",
    about = "Distributes network function configuration and audits its convergence"
)]
pub struct Args {
    #[clap(long, default_value = "cmaas=info,warn", env = "CMAAS_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Coordination store endpoints, comma separated.
    #[clap(
        long,
        env = "ETCD_SVC_FQDN",
        default_value = "http://etcd:2379",
        value_delimiter = ','
    )]
    etcd_endpoints: Vec<String>,

    /// Lifetime of a staged change-set before it is audited.
    #[clap(long, default_value = "180")]
    change_set_lease_secs: u64,

    #[clap(long, default_value = "5")]
    audit_attempts: usize,

    #[clap(long, default_value = "100")]
    audit_retry_backoff_ms: u64,

    #[clap(long, default_value = "500")]
    configmap_queue_capacity: usize,

    #[clap(long, default_value = "30")]
    configmap_queue_overflow_timeout_secs: u64,

    /// The network function this controller belongs to. Its updates are
    /// always delivered live.
    #[clap(long, env = "SELF_NF_ID")]
    self_nf_id: Option<String>,

    #[clap(long, env = "SELF_XGVELA_ID", default_value = "xgvela1")]
    self_xgvela_id: String,

    #[clap(long, default_value = "http://localhost:8008/api/running")]
    gateway_url: String,

    #[clap(long, env = "GATEWAY_USERNAME", default_value = "admin")]
    gateway_username: String,

    #[clap(long, env = "GATEWAY_PASSWORD", default_value = "admin", hide_env_values = true)]
    gateway_password: String,

    #[clap(long, default_value = "10")]
    gateway_timeout_secs: u64,

    #[clap(long, default_value = "0.0.0.0:8090")]
    updates_addr: SocketAddr,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            etcd_endpoints,
            change_set_lease_secs,
            audit_attempts,
            audit_retry_backoff_ms,
            configmap_queue_capacity,
            configmap_queue_overflow_timeout_secs,
            self_nf_id,
            self_xgvela_id,
            gateway_url,
            gateway_username,
            gateway_password,
            gateway_timeout_secs,
            updates_addr,
        } = self;

        let mut prom = <Prometheus>::default();
        let audit_metrics = AuditMetrics::register(prom.sub_registry_with_prefix("audit"));
        let propagate_metrics =
            PropagateMetrics::register(prom.sub_registry_with_prefix("propagate"));
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("configmap_queue"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let store: Arc<dyn Store> = Arc::new(
            EtcdStore::connect(&etcd_endpoints[..])
                .await
                .with_context(|| format!("failed to connect to {}", etcd_endpoints.join(",")))?,
        );
        info!(endpoints = ?etcd_endpoints, "Connected to coordination store");
        let cluster: Arc<dyn ClusterOps> = Arc::new(KubeClusterOps::new(runtime.client()));
        let gateway: Arc<dyn SchemaGateway> = Arc::new(RestconfGateway::new(GatewayConfig {
            base_url: gateway_url,
            username: gateway_username,
            password: gateway_password,
            timeout: Duration::from_secs(gateway_timeout_secs),
        })?);
        let notifier: Arc<dyn NotificationBus> = Arc::new(LogNotifier);
        let registry = Registry::new(self_nf_id, self_xgvela_id).shared();

        // Spawn the ConfigMap watch and its onboarding queue.
        let (producer, events) = index::channel(
            QueueConfig {
                capacity: configmap_queue_capacity,
                overflow_timeout: Duration::from_secs(configmap_queue_overflow_timeout_secs),
            },
            index_metrics.clone(),
        );
        let configmaps = runtime.watch_all::<ConfigMap>(watcher::Config::default());
        let drain = runtime.shutdown_handle();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = producer.run(configmaps) => {}
                    _ = drain.signaled() => debug!("ConfigMap watch stopped"),
                }
            }
            .instrument(info_span!("configmaps")),
        );
        let processor = Processor::new(
            registry.clone(),
            cluster.clone(),
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            index_metrics,
        );
        tokio::spawn(processor.run(events).instrument(info_span!("configmap_processor")));

        let writer = Arc::new(Writer::new(
            WriterConfig {
                change_set_ttl: Duration::from_secs(change_set_lease_secs),
            },
            registry.clone(),
            cluster.clone(),
            store.clone(),
            gateway,
            notifier.clone(),
            propagate_metrics.clone(),
        ));
        let classifier = Arc::new(Classifier::new(
            registry,
            store.clone(),
            writer,
            notifier.clone(),
            propagate_metrics,
        ));

        let auditor = Auditor::new(
            AuditConfig {
                attempts: audit_attempts.max(1),
                retry_backoff: Duration::from_millis(audit_retry_backoff_ms),
            },
            store,
            cluster,
            notifier,
            audit_metrics,
        );
        let drain = runtime.shutdown_handle();
        tokio::spawn(async move { auditor.run(drain).await }.instrument(info_span!("audit")));

        let listener = TcpListener::bind(updates_addr)
            .await
            .with_context(|| format!("failed to bind {updates_addr}"))?;
        tokio::spawn(
            Ingest::new(classifier)
                .serve(listener, runtime.shutdown_handle())
                .instrument(info_span!("updates")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
