use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use meshop_core::{ConfigState, DesiredState, EffectiveConfiguration, Linkerd, LinkerdSpec, LinkerdStatus, FINALIZER};
use meshop_kubehub::{from_dynamic, ClusterStore, MemoryStore, ObjectRef, Verb};
use meshop_reconcile::{
    default_order, record_key, Component, ComponentReconciler, PassOutcome, ReconcileError, Reconciler,
};
use meshop_resources::{heartbeat, tap, web, Subsystem};

fn record(name: &str, version: &str) -> Linkerd {
    let mut r = Linkerd::new(name, LinkerdSpec { version: version.into(), ..Default::default() });
    r.metadata.namespace = Some("linkerd".into());
    r.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    r
}

async fn seed(store: &MemoryStore, r: &Linkerd) -> ObjectRef {
    let stored: Linkerd = from_dynamic(store.insert_typed(r).await.unwrap()).unwrap();
    record_key(&stored)
}

async fn load(store: &MemoryStore, key: &ObjectRef) -> Linkerd {
    from_dynamic(store.get(key).await.unwrap()).unwrap()
}

fn subsystems() -> Vec<Subsystem> {
    meshop_resources::default_subsystems()
}

fn present_keys(subsystem: &Subsystem, cfg: &EffectiveConfiguration) -> Vec<ObjectRef> {
    subsystem
        .render(cfg)
        .unwrap()
        .into_iter()
        .filter(|(_, state)| *state == DesiredState::Present)
        .map(|(m, _)| m.key().clone())
        .collect()
}

#[tokio::test]
async fn supported_record_becomes_available() {
    let store = Arc::new(MemoryStore::new());
    let key = seed(&store, &record("linkerd", "2.8.1")).await;
    let reconciler = Reconciler::new(store.clone());

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Reconciled);

    let live = load(&store, &key).await;
    assert_eq!(live.state(), Some(ConfigState::Available));
    assert_eq!(live.error_message(), "");
    let cfg = EffectiveConfiguration::resolve(&live).unwrap();
    for subsystem in subsystems() {
        for k in present_keys(&subsystem, &cfg) {
            assert!(store.contains(&k).await, "{} missing {k}", subsystem.name);
        }
    }
}

#[tokio::test]
async fn second_pass_settles() {
    let store = Arc::new(MemoryStore::new());
    let key = seed(&store, &record("linkerd", "2.8.1")).await;
    let reconciler = Reconciler::new(store.clone());
    reconciler.reconcile_pass(&key).await.unwrap();
    let created = store.count(Verb::Create).await;

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Reconciled);
    assert_eq!(store.count(Verb::Create).await, created);
    assert_eq!(store.count(Verb::Replace).await, 0);
    assert_eq!(load(&store, &key).await.state(), Some(ConfigState::Available));
}

#[tokio::test]
async fn unsupported_version_touches_nothing() {
    let store = Arc::new(MemoryStore::new());
    let key = seed(&store, &record("linkerd", "1.0.0")).await;
    let reconciler = Reconciler::new(store.clone());

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::UnsupportedVersion);
    assert!(store.mutations().await.is_empty());
    assert_eq!(load(&store, &key).await.state(), None);
}

#[tokio::test]
async fn failing_subsystem_stops_the_pass() {
    let store = Arc::new(MemoryStore::new());
    let key = seed(&store, &record("linkerd", "2.8.1")).await;
    store.fail(Verb::Create, "CronJob", Some(heartbeat::CRON_JOB), "quota exceeded").await;
    let reconciler = Reconciler::new(store.clone());

    let err = reconciler.reconcile_pass(&key).await.unwrap_err();
    assert_eq!(err.component(), Some(heartbeat::COMPONENT));

    let live = load(&store, &key).await;
    assert_eq!(live.state(), Some(ConfigState::ReconcileFailed));
    assert_eq!(
        live.error_message(),
        "failed to reconcile component heartbeat: failed to create CronJob linkerd/linkerd-heartbeat: \
         api error 500 (InternalError): quota exceeded"
    );

    let cfg = EffectiveConfiguration::resolve(&live).unwrap();
    let all = subsystems();
    for subsystem in &all[..2] {
        for k in present_keys(subsystem, &cfg) {
            assert!(store.contains(&k).await, "{k} should exist");
        }
    }
    for subsystem in &all[3..] {
        for k in present_keys(subsystem, &cfg) {
            assert!(!store.contains(&k).await, "{k} should not exist");
        }
    }
}

#[tokio::test]
async fn status_failure_does_not_mask_root_cause() {
    let store = Arc::new(MemoryStore::new());
    let mut r = record("linkerd", "2.8.1");
    r.status = Some(LinkerdStatus::new(ConfigState::Available, ""));
    let key = seed(&store, &r).await;
    store.fail(Verb::Create, "CronJob", None, "quota exceeded").await;
    store.fail(Verb::ReplaceStatus, "Linkerd", None, "status down").await;
    store.fail(Verb::Replace, "Linkerd", None, "status down").await;
    let reconciler = Reconciler::new(store.clone());

    let err = reconciler.reconcile_pass(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Component { component: "heartbeat", .. }), "{err:?}");
    assert_eq!(load(&store, &key).await.state(), Some(ConfigState::Available));
}

#[tokio::test]
async fn missing_record_is_deleted() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone());
    let key = ObjectRef::for_resource::<Linkerd>(Some("linkerd"), "gone");
    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Deleted);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn unmanaged_record_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let mut r = record("linkerd", "2.8.1");
    r.status = Some(LinkerdStatus::new(ConfigState::Unmanaged, ""));
    let key = seed(&store, &r).await;
    let reconciler = Reconciler::new(store.clone());

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Unmanaged);
    assert!(store.mutations().await.is_empty());
}

#[tokio::test]
async fn deleting_record_releases_finalizer() {
    let store = Arc::new(MemoryStore::new());
    let mut r = record("linkerd", "2.8.1");
    r.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    let key = seed(&store, &r).await;
    let reconciler = Reconciler::new(store.clone());

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Deleted);
    let live = load(&store, &key).await;
    assert!(live.finalizers().is_empty());
    assert_eq!(live.state(), Some(ConfigState::Unmanaged));
    assert_eq!(store.count(Verb::Create).await, 0);
}

#[tokio::test]
async fn decommission_and_release_all() {
    let store = Arc::new(MemoryStore::new());
    let first = seed(&store, &record("first", "2.8.1")).await;
    seed(&store, &record("second", "2.8.1")).await;
    let reconciler = Reconciler::new(store.clone());
    reconciler.reconcile_pass(&first).await.unwrap();

    assert!(reconciler.decommission(&first).await.unwrap());
    let live = load(&store, &first).await;
    assert!(live.finalizers().is_empty());
    assert_eq!(live.state(), Some(ConfigState::Unmanaged));
    assert_eq!(reconciler.reconcile_pass(&first).await.unwrap(), PassOutcome::Unmanaged);

    assert_eq!(reconciler.release_all(Some("linkerd")).await.unwrap(), 2);
    assert_eq!(reconciler.release_all(Some("elsewhere")).await.unwrap(), 0);
    let missing = ObjectRef::for_resource::<Linkerd>(Some("linkerd"), "gone");
    assert!(!reconciler.decommission(&missing).await.unwrap());
}

#[tokio::test]
async fn absent_subsystem_is_torn_down() {
    let store = Arc::new(MemoryStore::new());
    let key = seed(&store, &record("linkerd", "2.8.1")).await;
    Reconciler::new(store.clone()).reconcile_pass(&key).await.unwrap();
    let cfg = EffectiveConfiguration::resolve(&load(&store, &key).await).unwrap();
    let tap_keys = present_keys(&tap::subsystem(), &cfg);
    assert!(!tap_keys.is_empty());

    let mut components = default_order();
    let at = components.iter().position(|c| c.name() == tap::COMPONENT).unwrap();
    components[at] = Arc::new(Component::new(tap::subsystem().with_state(DesiredState::Absent))) as Arc<dyn ComponentReconciler>;
    let reconciler = Reconciler::with_components(store.clone(), components);

    assert_eq!(reconciler.reconcile_pass(&key).await.unwrap(), PassOutcome::Reconciled);
    for k in &tap_keys {
        assert!(!store.contains(k).await, "{k} should be gone");
    }
    assert_eq!(store.count(Verb::Delete).await, tap_keys.len());
    assert!(store.contains(&ObjectRef::for_resource::<k8s_openapi::api::apps::v1::Deployment>(Some("linkerd"), web::DEPLOYMENT)).await);
}
