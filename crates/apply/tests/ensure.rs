use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use meshop_apply::{ensure, SyncOutcome};
use meshop_core::DesiredState;
use meshop_kubehub::{ClusterStore, ManagedResource, MemoryStore, StoreError, Verb};

fn config_map(value: &str) -> ManagedResource {
    let cm = ConfigMap {
        metadata: ObjectMeta { name: Some("linkerd-config".into()), namespace: Some("linkerd".into()), ..Default::default() },
        data: Some([("global".to_string(), value.to_string())].into()),
        ..Default::default()
    };
    ManagedResource::from_typed(&cm).unwrap()
}

#[tokio::test]
async fn present_creates_then_settles() {
    let store = MemoryStore::new();
    let cm = config_map("a");
    assert_eq!(ensure(&store, &cm, DesiredState::Present).await.unwrap(), SyncOutcome::Created);
    assert_eq!(ensure(&store, &cm, DesiredState::Present).await.unwrap(), SyncOutcome::Unchanged);
    assert_eq!(store.count(Verb::Create).await, 1);
    assert_eq!(store.count(Verb::Replace).await, 0);
}

#[tokio::test]
async fn drift_is_corrected_once() {
    let store = MemoryStore::new();
    ensure(&store, &config_map("a"), DesiredState::Present).await.unwrap();
    let desired = config_map("b");
    assert_eq!(ensure(&store, &desired, DesiredState::Present).await.unwrap(), SyncOutcome::Updated);
    assert_eq!(ensure(&store, &desired, DesiredState::Present).await.unwrap(), SyncOutcome::Unchanged);
    let live = store.get(desired.key()).await.unwrap();
    assert_eq!(live.data["data"]["global"], "b");
    assert_eq!(store.count(Verb::Replace).await, 1);
}

#[tokio::test]
async fn absent_deletes_and_tolerates_missing() {
    let store = MemoryStore::new();
    let cm = config_map("a");
    assert_eq!(ensure(&store, &cm, DesiredState::Absent).await.unwrap(), SyncOutcome::Absent);
    ensure(&store, &cm, DesiredState::Present).await.unwrap();
    assert_eq!(ensure(&store, &cm, DesiredState::Absent).await.unwrap(), SyncOutcome::Deleted);
    assert!(!store.contains(cm.key()).await);
    assert_eq!(store.count(Verb::Delete).await, 1);
}

#[tokio::test]
async fn live_labels_and_cluster_ip_survive_update() {
    let store = MemoryStore::new();
    let live = Service {
        metadata: ObjectMeta {
            name: Some("linkerd-dst".into()),
            namespace: Some("linkerd".into()),
            labels: Some([("added-by".to_string(), "someone".to_string())].into()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.96.0.12".into()),
            ports: Some(vec![ServicePort { port: 8085, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    store.insert_typed(&live).await.unwrap();
    let desired = Service {
        metadata: ObjectMeta { name: Some("linkerd-dst".into()), namespace: Some("linkerd".into()), ..Default::default() },
        spec: Some(ServiceSpec { ports: Some(vec![ServicePort { port: 8086, ..Default::default() }]), ..Default::default() }),
        ..Default::default()
    };
    let desired = ManagedResource::from_typed(&desired).unwrap();
    assert_eq!(ensure(&store, &desired, DesiredState::Present).await.unwrap(), SyncOutcome::Updated);
    let got = store.get(desired.key()).await.unwrap();
    assert_eq!(got.data["spec"]["clusterIP"], "10.96.0.12");
    assert_eq!(got.data["spec"]["ports"][0]["port"], 8086);
    assert_eq!(got.metadata.labels.unwrap()["added-by"], "someone");
}

#[tokio::test]
async fn store_failure_carries_context() {
    let store = MemoryStore::new();
    store.fail(Verb::Create, "ConfigMap", Some("linkerd-config"), "etcd unavailable").await;
    let err = ensure(&store, &config_map("a"), DesiredState::Present).await.unwrap_err();
    assert_eq!(err.verb, "create");
    assert_eq!(err.key.name, "linkerd-config");
    assert!(matches!(err.source, StoreError::Api { code: 500, .. }));
    assert!(err.to_string().contains("ConfigMap linkerd/linkerd-config"));
}

#[tokio::test]
async fn stale_token_surfaces_conflict() {
    let store = MemoryStore::new();
    ensure(&store, &config_map("a"), DesiredState::Present).await.unwrap();
    store.conflict_next(Verb::Replace, 1).await;
    let err = ensure(&store, &config_map("b"), DesiredState::Present).await.unwrap_err();
    assert_eq!(err.verb, "update");
    assert!(err.source.is_conflict());
}
