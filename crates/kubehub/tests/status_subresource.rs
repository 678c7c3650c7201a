#![forbid(unsafe_code)]

use kube::core::DynamicObject;
use meshop_kubehub::{ClusterStore, MemoryStore, ObjectRef, StoreError, Verb};

fn record(status: Option<&str>) -> DynamicObject {
    let mut v = serde_json::json!({
        "apiVersion": "linkerd.linkerd.io/v1alpha1",
        "kind": "Linkerd",
        "metadata": {"name": "linkerd", "namespace": "linkerd"},
        "spec": {"version": "2.8.1"}
    });
    if let Some(s) = status {
        v["status"] = serde_json::json!({"Status": s});
    }
    serde_json::from_value(v).unwrap()
}

fn key() -> ObjectRef {
    ObjectRef::new("linkerd.linkerd.io/v1alpha1", "Linkerd", Some("linkerd"), "linkerd")
}

#[tokio::test]
async fn spec_and_status_writes_are_separate() {
    let store = MemoryStore::new();
    let created = store.create(&record(Some("Available"))).await.unwrap();
    assert!(created.data.get("status").is_none(), "create drops status");

    let mut with_status = created.clone();
    with_status.data["status"] = serde_json::json!({"Status": "Created"});
    let written = store.replace_status(&with_status).await.unwrap();
    assert_eq!(written.data["status"]["Status"], "Created");

    // a full update cannot change status on a kind with a status subresource
    let mut spec_edit = written.clone();
    spec_edit.data["spec"]["version"] = serde_json::json!("2.9.0");
    spec_edit.data["status"] = serde_json::json!({"Status": "Unmanaged"});
    let written = store.replace(&spec_edit).await.unwrap();
    assert_eq!(written.data["status"]["Status"], "Created");
    assert_eq!(written.data["spec"]["version"], "2.9.0");

    let live = store.get(&key()).await.unwrap();
    assert_eq!(live.metadata.resource_version, written.metadata.resource_version);
    assert_eq!(live.metadata.uid, created.metadata.uid);
}

#[tokio::test]
async fn uninitialised_status_subresource_falls_through_to_full_update() {
    let store = MemoryStore::new();
    store.without_status_subresource("Linkerd").await;
    let created = store.create(&record(None)).await.unwrap();

    let mut with_status = created.clone();
    with_status.data["status"] = serde_json::json!({"Status": "Created"});
    assert!(matches!(store.replace_status(&with_status).await, Err(StoreError::NotFound(_))));

    let written = store.replace(&with_status).await.unwrap();
    assert_eq!(written.data["status"]["Status"], "Created");
}

#[tokio::test]
async fn touch_invalidates_held_revision() {
    let store = MemoryStore::new();
    let created = store.create(&record(None)).await.unwrap();
    store.touch(&key()).await.unwrap();
    assert!(store.replace_status(&created).await.unwrap_err().is_conflict());
    assert_eq!(store.count(Verb::ReplaceStatus).await, 0);
}
