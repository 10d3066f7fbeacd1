use super::*;
use cmaas_controller_core::{
    keys,
    testing::{ClusterCall, FakeCluster, FakeGateway, RecordingBus},
    ConfigMapSnapshot, EventName, CONFIG_MGMT_ANNOTATION, DEPENDENCY_KEY, MUTATE_ANNOTATION,
    TMAAS_ANNOTATION,
};
use cmaas_controller_k8s_api::{ConfigMap, ObjectMeta};
use cmaas_controller_store::{MemoryStore, Store};
use kube::runtime::watcher;
use maplit::btreemap;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time;

const APP_YANG: &str = "module amf-app {\n  namespace \"urn:amf-app\";\n  prefix amfapp;\n  container config {\n  }\n}\n";
const LOG_YANG: &str = "module amf-log {\n  namespace \"urn:amf-log\";\n  prefix amflog;\n  container logging {\n  }\n}\n";

struct Fixture {
    registry: SharedRegistry,
    cluster: Arc<FakeCluster>,
    store: Arc<MemoryStore>,
    gateway: Arc<FakeGateway>,
    bus: Arc<RecordingBus>,
    processor: Processor,
}

fn config_map(name: &str, nf_id: &str, xgvela_id: &str, data: &[(&str, &str)]) -> ConfigMapSnapshot {
    ConfigMapSnapshot {
        namespace: "ns1".to_string(),
        name: name.to_string(),
        labels: Default::default(),
        annotations: btreemap! {
            CONFIG_MGMT_ANNOTATION.to_string() => "enabled".to_string(),
            TMAAS_ANNOTATION.to_string() => json!({"nfId": nf_id, "nfType": "amf", "xgvelaId": xgvela_id}).to_string(),
        },
        data: data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn nf_config_map() -> ConfigMapSnapshot {
    config_map(
        "nf1-mgmt-cfg",
        "nf1",
        "xgvela1",
        &[
            ("app.yang", APP_YANG),
            ("app.json", r#"{"config":{"name":"a"}}"#),
            (DEPENDENCY_KEY, r#"{"app":["amf"]}"#),
        ],
    )
}

fn fixture(cms: Vec<ConfigMapSnapshot>) -> Fixture {
    let registry = Registry::new(None, "xgvela1".to_string()).shared();
    let cluster = Arc::new(FakeCluster::default());
    for cm in cms {
        cluster.put_config_map(cm);
    }
    let store = Arc::new(MemoryStore::default());
    let gateway = Arc::new(FakeGateway::default());
    let bus = Arc::new(RecordingBus::default());
    let processor = Processor::new(
        registry.clone(),
        cluster.clone(),
        store.clone(),
        gateway.clone(),
        bus.clone(),
        IndexMetrics::default(),
    );
    Fixture {
        registry,
        cluster,
        store,
        gateway,
        bus,
        processor,
    }
}

#[tokio::test]
async fn onboards_all_config_maps_of_nf() {
    let ms = config_map("amf-mgmt-cfg", "nf1", "xgvela1", &[("log.yang", LOG_YANG)]);
    let foreign = config_map("other-mgmt-cfg", "nf1", "xgvela2", &[("app.yang", APP_YANG)]);
    let f = fixture(vec![nf_config_map(), ms, foreign]);

    f.processor
        .process(ConfigMapEvent::Applied(nf_config_map()))
        .await;

    {
        let registry = f.registry.read();
        let loc = registry.lookup("urn:amf-app:nf1").expect("app model must be indexed");
        assert_eq!(loc.config_map, ConfigMapId::new("ns1", "nf1-mgmt-cfg"));
        assert_eq!(loc.nf_id, "nf1");
        assert!(registry.lookup("urn:amf-log:nf1").is_some());
        assert_eq!(
            registry.nf_config_map("nf1"),
            Some(&ConfigMapId::new("ns1", "nf1-mgmt-cfg"))
        );
        assert!(registry.is_onboarded(&ConfigMapId::new("ns1", "amf-mgmt-cfg")));
        assert!(!registry.is_onboarded(&ConfigMapId::new("ns1", "other-mgmt-cfg")));
        assert_eq!(registry.model_count(), 2);
    }

    // Only the model with a paired data key is seeded.
    assert_eq!(
        f.gateway.pushes(),
        vec![("amfapp-nf1:config".to_string(), json!({"config": {"name": "a"}}))]
    );
    assert_eq!(f.bus.names(), vec![EventName::NfMgmtIntfReady]);

    // Replays are ignored.
    f.processor
        .process(ConfigMapEvent::Applied(nf_config_map()))
        .await;
    assert_eq!(f.bus.count(EventName::NfMgmtIntfReady), 1);
    assert_eq!(f.gateway.pushes().len(), 1);
}

#[tokio::test]
async fn ignores_other_instances() {
    let foreign = config_map("other-mgmt-cfg", "nf9", "xgvela2", &[("app.yang", APP_YANG)]);
    let f = fixture(vec![foreign.clone()]);
    f.processor.process(ConfigMapEvent::Applied(foreign)).await;
    assert_eq!(f.registry.read().model_count(), 0);
    assert!(f.bus.events().is_empty());
}

#[tokio::test]
async fn load_failure_suppresses_ready() {
    let f = fixture(vec![nf_config_map()]);
    f.gateway.fail(true);
    f.processor
        .process(ConfigMapEvent::Applied(nf_config_map()))
        .await;
    assert!(f.bus.events().is_empty());
    assert!(f
        .registry
        .read()
        .is_onboarded(&ConfigMapId::new("ns1", "nf1-mgmt-cfg")));
}

#[tokio::test]
async fn upgrade_reindexes_mutated_config_maps() {
    let f = fixture(vec![nf_config_map()]);
    f.processor
        .process(ConfigMapEvent::Applied(nf_config_map()))
        .await;

    let mut upgraded = nf_config_map();
    upgraded.data.remove("app.yang");
    upgraded
        .data
        .insert("log.yang".to_string(), LOG_YANG.to_string());
    upgraded
        .data
        .insert("log.json".to_string(), r#"{"logging":{}}"#.to_string());
    upgraded
        .annotations
        .insert(MUTATE_ANNOTATION.to_string(), "true".to_string());
    f.cluster.put_config_map(upgraded.clone());

    f.processor.process(ConfigMapEvent::Applied(upgraded)).await;

    {
        let registry = f.registry.read();
        assert!(registry.lookup("urn:amf-app:nf1").is_none());
        assert!(registry.lookup("urn:amf-log:nf1").is_some());
    }
    assert!(f.cluster.calls().contains(&ClusterCall::RemoveAnnotation {
        ns: "ns1".to_string(),
        name: "nf1-mgmt-cfg".to_string(),
        key: MUTATE_ANNOTATION.to_string(),
    }));
    assert_eq!(
        f.bus.names(),
        vec![EventName::NfMgmtIntfReady, EventName::NfMgmtIntfChanged]
    );

    // The annotation is gone, so a later modification is not an upgrade.
    let current = f.cluster.config_map("ns1", "nf1-mgmt-cfg").unwrap();
    f.processor.process(ConfigMapEvent::Applied(current)).await;
    assert_eq!(f.bus.count(EventName::NfMgmtIntfChanged), 1);
}

#[tokio::test]
async fn delete_clears_nf_state() {
    let f = fixture(vec![nf_config_map()]);
    f.processor
        .process(ConfigMapEvent::Applied(nf_config_map()))
        .await;
    f.registry.write().mark_ready("nf1");
    f.store.seed(&keys::state_active_key("nf1"), "true");
    f.store.seed("config/ns1/amf", "{}");
    f.store.seed("config/ns1/amf/3", "{}");
    f.store.seed("config/ns10/amf", "{}");

    f.processor
        .process(ConfigMapEvent::Deleted(nf_config_map()))
        .await;

    let registry = f.registry.read();
    assert!(registry.lookup("urn:amf-app:nf1").is_none());
    assert!(registry.nf_config_map("nf1").is_none());
    assert!(!registry.is_ready("nf1"));
    drop(registry);

    assert_eq!(
        f.store.snapshot(),
        vec![("config/ns10/amf".to_string(), "{}".to_string())]
    );
    assert_eq!(f.store.get("stateActive/nf1").await.unwrap(), None);
}

#[tokio::test]
async fn queue_preserves_order() {
    let (producer, mut rx) = channel(QueueConfig::default(), IndexMetrics::default());
    let events = (0..3)
        .map(|i| ConfigMapEvent::Applied(config_map(&format!("cm{i}"), "nf1", "xgvela1", &[("a", "b")])))
        .collect::<Vec<_>>();
    for ev in events.clone() {
        assert!(producer.enqueue(ev).await);
    }
    for ev in events {
        assert_eq!(rx.recv().await, Some(ev));
    }
}

#[tokio::test]
async fn queue_dead_letters_after_overflow_timeout() {
    let metrics = IndexMetrics::default();
    let (producer, mut rx) = channel(
        QueueConfig {
            capacity: 1,
            overflow_timeout: Duration::from_millis(10),
        },
        metrics.clone(),
    );
    let ev = |name: &str| ConfigMapEvent::Applied(config_map(name, "nf1", "xgvela1", &[("a", "b")]));

    assert!(producer.enqueue(ev("first")).await);
    assert!(producer.enqueue(ev("second")).await);
    assert_eq!(metrics.dead_letters.get(), 1);

    assert_eq!(rx.recv().await, Some(ev("first")));
    assert!(rx.try_recv().is_err());

    drop(rx);
    assert!(!producer.enqueue(ev("third")).await);
}

#[tokio::test]
async fn queue_blocks_until_drained() {
    let (producer, mut rx) = channel(
        QueueConfig {
            capacity: 1,
            overflow_timeout: Duration::from_secs(5),
        },
        IndexMetrics::default(),
    );
    let ev = |name: &str| ConfigMapEvent::Applied(config_map(name, "nf1", "xgvela1", &[("a", "b")]));
    assert!(producer.enqueue(ev("first")).await);

    let consumer = tokio::spawn(async move {
        time::sleep(Duration::from_millis(20)).await;
        let mut seen = Vec::new();
        while let Some(ev) = rx.recv().await {
            seen.push(ev.config_map().name.clone());
        }
        seen
    });
    assert!(producer.enqueue(ev("second")).await);
    drop(producer);

    let seen = time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("consumer must finish")
        .unwrap();
    assert_eq!(seen, vec!["first", "second"]);
}

#[tokio::test]
async fn producer_forwards_managed_config_maps() {
    let managed = |name: &str| ConfigMap {
        metadata: ObjectMeta {
            namespace: Some("ns1".to_string()),
            name: Some(name.to_string()),
            annotations: Some(nf_config_map().annotations),
            ..Default::default()
        },
        data: Some(btreemap! { "a".to_string() => "b".to_string() }),
        ..Default::default()
    };
    let unmanaged = ConfigMap {
        metadata: ObjectMeta {
            namespace: Some("ns1".to_string()),
            name: Some("plain".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let (producer, mut rx) = channel(QueueConfig::default(), IndexMetrics::default());
    let events = futures::stream::iter(vec![
        watcher::Event::Init,
        watcher::Event::InitApply(managed("a")),
        watcher::Event::InitDone,
        watcher::Event::Apply(unmanaged),
        watcher::Event::Apply(managed("b")),
        watcher::Event::Delete(managed("a")),
    ]);
    producer.run(events).await;

    let mut seen = Vec::new();
    while let Some(ev) = rx.recv().await {
        seen.push(match ev {
            ConfigMapEvent::Applied(cm) => format!("applied {}", cm.name),
            ConfigMapEvent::Deleted(cm) => format!("deleted {}", cm.name),
        });
    }
    assert_eq!(seen, vec!["applied a", "applied b", "deleted a"]);
}
