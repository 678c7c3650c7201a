//! Mesh operator apply: drive one managed object to its desired existence
//! and shape through a [`ClusterStore`].

#![forbid(unsafe_code)]

use kube::core::DynamicObject;
use meshop_core::DesiredState;
use meshop_kubehub::{ClusterStore, ManagedResource, ObjectRef, StoreError};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info};

pub mod diff;

pub use diff::{diff_summary, is_subset, strip_noisy, DiffSummary};

/// What [`ensure`] did to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// Desired absent and already gone.
    Absent,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Deleted => "deleted",
            SyncOutcome::Absent => "absent",
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, SyncOutcome::Created | SyncOutcome::Updated | SyncOutcome::Deleted)
    }
}

/// A store failure with the operation and object it happened on.
#[derive(Debug, Error)]
#[error("failed to {verb} {key}")]
pub struct SyncError {
    pub verb: &'static str,
    pub key: ObjectRef,
    #[source]
    pub source: StoreError,
}

impl SyncError {
    fn new(verb: &'static str, key: &ObjectRef, source: StoreError) -> Self {
        Self { verb, key: key.clone(), source }
    }
}

/// Make the cluster hold `resource` (present) or not hold it (absent).
///
/// Present: create when missing, otherwise overlay onto the live object and
/// replace unless the live object already carries every desired field.
/// Absent: delete when found; a concurrent delete counts as absent.
pub async fn ensure(store: &dyn ClusterStore, resource: &ManagedResource, state: DesiredState) -> Result<SyncOutcome, SyncError> {
    let key = resource.key();
    let res = match state {
        DesiredState::Present => ensure_present(store, resource).await,
        DesiredState::Absent => ensure_absent(store, key).await,
    };
    match &res {
        Ok(outcome) => {
            counter!("meshop_sync_total", 1u64, "outcome" => outcome.as_str());
            debug!(resource = %key, desired = state.as_str(), outcome = outcome.as_str(), "synced");
        }
        Err(e) => {
            counter!("meshop_sync_errors_total", 1u64);
            debug!(resource = %key, verb = e.verb, error = %e.source, "sync failed");
        }
    }
    res
}

async fn ensure_present(store: &dyn ClusterStore, resource: &ManagedResource) -> Result<SyncOutcome, SyncError> {
    let key = resource.key();
    let live = store.get_opt(key).await.map_err(|e| SyncError::new("get", key, e))?;
    let Some(live) = live else {
        store.create(resource.object()).await.map_err(|e| SyncError::new("create", key, e))?;
        info!(resource = %key, "created");
        return Ok(SyncOutcome::Created);
    };

    let desired_json = to_json(resource.object(), key)?;
    let live_json = to_json(&live, key)?;
    let desired_json = strip_noisy(desired_json);
    if is_subset(&desired_json, &live_json) {
        return Ok(SyncOutcome::Unchanged);
    }
    let summary = diff_summary(&desired_json, &strip_noisy(live_json));
    let merged = overlay(resource.object(), &live);
    store.replace(&merged).await.map_err(|e| SyncError::new("update", key, e))?;
    info!(resource = %key, adds = summary.adds, updates = summary.updates, removes = summary.removes, "updated");
    Ok(SyncOutcome::Updated)
}

async fn ensure_absent(store: &dyn ClusterStore, key: &ObjectRef) -> Result<SyncOutcome, SyncError> {
    let live = store.get_opt(key).await.map_err(|e| SyncError::new("get", key, e))?;
    if live.is_none() {
        return Ok(SyncOutcome::Absent);
    }
    match store.delete(key).await {
        Ok(()) => {
            info!(resource = %key, "deleted");
            Ok(SyncOutcome::Deleted)
        }
        Err(StoreError::NotFound(_)) => Ok(SyncOutcome::Absent),
        Err(e) => Err(SyncError::new("delete", key, e)),
    }
}

fn to_json(obj: &DynamicObject, key: &ObjectRef) -> Result<serde_json::Value, SyncError> {
    serde_json::to_value(obj).map_err(|e| SyncError::new("compare", key, e.into()))
}

/// The desired object carrying what the live one owns: its concurrency token
/// and uid, labels and annotations the build doesn't set, finalizers and owner
/// references when the build sets none, and a Service's allocated cluster IPs.
pub fn overlay(desired: &DynamicObject, live: &DynamicObject) -> DynamicObject {
    let mut out = desired.clone();
    let (meta, live_meta) = (&mut out.metadata, &live.metadata);
    meta.resource_version = live_meta.resource_version.clone();
    meta.uid = live_meta.uid.clone();
    meta.labels = merge(live_meta.labels.as_ref(), meta.labels.take());
    meta.annotations = merge(live_meta.annotations.as_ref(), meta.annotations.take());
    if meta.finalizers.is_none() {
        meta.finalizers = live_meta.finalizers.clone();
    }
    if meta.owner_references.is_none() {
        meta.owner_references = live_meta.owner_references.clone();
    }
    let is_service = out.types.as_ref().map_or(false, |t| t.kind == "Service" && t.api_version == "v1");
    if is_service {
        for field in ["clusterIP", "clusterIPs"] {
            let allocated = live.data.get("spec").and_then(|s| s.get(field)).cloned();
            if let (Some(ip), Some(spec)) = (allocated, out.data.get_mut("spec").and_then(|s| s.as_object_mut())) {
                spec.entry(field).or_insert(ip);
            }
        }
    }
    out
}

fn merge(
    live: Option<&std::collections::BTreeMap<String, String>>,
    desired: Option<std::collections::BTreeMap<String, String>>,
) -> Option<std::collections::BTreeMap<String, String>> {
    match (live, desired) {
        (None, d) => d,
        (Some(l), None) => Some(l.clone()),
        (Some(l), Some(d)) => {
            let mut m = l.clone();
            m.extend(d);
            Some(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic(v: serde_json::Value) -> DynamicObject {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn overlay_keeps_live_ownership_and_token() {
        let desired = dynamic(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "linkerd", "labels": {"x": "desired"}},
            "data": {"k": "new"}
        }));
        let live = dynamic(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "a",
                "namespace": "linkerd",
                "resourceVersion": "7",
                "uid": "u-1",
                "labels": {"x": "live", "team": "mesh"},
                "annotations": {"note": "kept"},
                "finalizers": ["f"]
            },
            "data": {"k": "old"}
        }));
        let m = overlay(&desired, &live);
        assert_eq!(m.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(m.metadata.uid.as_deref(), Some("u-1"));
        let labels = m.metadata.labels.unwrap();
        assert_eq!(labels["x"], "desired");
        assert_eq!(labels["team"], "mesh");
        assert_eq!(m.metadata.annotations.unwrap()["note"], "kept");
        assert_eq!(m.metadata.finalizers, Some(vec!["f".to_string()]));
        assert_eq!(m.data["data"]["k"], "new");
    }

    #[test]
    fn overlay_keeps_allocated_cluster_ip() {
        let desired = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "s", "namespace": "linkerd"},
            "spec": {"type": "ClusterIP", "ports": [{"port": 80}]}
        }));
        let live = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "s", "namespace": "linkerd", "resourceVersion": "3"},
            "spec": {"type": "ClusterIP", "clusterIP": "10.0.0.9", "clusterIPs": ["10.0.0.9"], "ports": [{"port": 81}]}
        }));
        let m = overlay(&desired, &live);
        assert_eq!(m.data["spec"]["clusterIP"], "10.0.0.9");
        assert_eq!(m.data["spec"]["clusterIPs"][0], "10.0.0.9");
        assert_eq!(m.data["spec"]["ports"][0]["port"], 80);
    }

    #[test]
    fn sync_error_names_operation_and_object() {
        let key = ObjectRef::new("batch/v1", "CronJob", Some("linkerd"), "linkerd-heartbeat");
        let e = SyncError::new("create", &key, StoreError::Invalid("boom".into()));
        assert_eq!(e.to_string(), "failed to create CronJob linkerd/linkerd-heartbeat");
    }
}
