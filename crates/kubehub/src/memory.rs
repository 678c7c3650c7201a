//! In-process [`ClusterStore`] with API-server-like optimistic concurrency.
//!
//! Every successful write bumps a global revision that becomes the object's
//! `resourceVersion`; writes carrying an older one fail with `Conflict`. Kinds
//! registered with a status subresource keep status and spec writes apart the
//! way the API server does. Faults and conflicts can be scripted per verb.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::kinds;
use crate::object::{to_dynamic, ObjectRef};
use crate::store::ClusterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
    List,
}

/// One applied write, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub verb: Verb,
    pub key: ObjectRef,
}

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    kind: String,
    name: Option<String>,
    message: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectRef, DynamicObject>,
    revision: u64,
    journal: Vec<Mutation>,
    faults: Vec<Fault>,
    conflicts: HashMap<Verb, usize>,
    no_status: HashSet<String>,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check(&mut self, verb: Verb, key: &ObjectRef) -> Result<(), StoreError> {
        if let Some(n) = self.conflicts.get_mut(&verb) {
            if *n > 0 {
                *n -= 1;
                return Err(StoreError::Conflict(key.clone()));
            }
        }
        let hit = self
            .faults
            .iter()
            .find(|f| f.verb == verb && f.kind == key.kind && f.name.as_ref().map_or(true, |n| *n == key.name));
        match hit {
            Some(f) => Err(StoreError::Api { code: 500, reason: "InternalError".into(), message: f.message.clone() }),
            None => Ok(()),
        }
    }

    fn has_status_subresource(&self, key: &ObjectRef) -> bool {
        kinds::lookup(&key.api_version, &key.kind).map_or(false, |k| k.status_subresource)
            && !self.no_status.contains(&key.kind)
    }
}

fn status_of(obj: &DynamicObject) -> Option<serde_json::Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<serde_json::Value>) {
    if let Some(map) = obj.data.as_object_mut() {
        match status {
            Some(s) => {
                map.insert("status".into(), s);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a mutation.
    pub async fn insert(&self, obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(&obj)?;
        let mut inner = self.inner.lock().await;
        let mut stored = obj;
        stored.metadata.resource_version = Some(inner.next_revision());
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        if stored.metadata.creation_timestamp.is_none() {
            stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        }
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    pub async fn insert_typed<K: Serialize>(&self, obj: &K) -> Result<DynamicObject, StoreError> {
        self.insert(to_dynamic(obj)?).await
    }

    /// Every `verb` on `kind` (optionally only `name`) fails with a 500 carrying `message`.
    pub async fn fail(&self, verb: Verb, kind: &str, name: Option<&str>, message: &str) {
        self.inner.lock().await.faults.push(Fault {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            message: message.to_string(),
        });
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    /// The next `times` calls of `verb` fail with `Conflict`.
    pub async fn conflict_next(&self, verb: Verb, times: usize) {
        *self.inner.lock().await.conflicts.entry(verb).or_default() += times;
    }

    /// Simulate a record whose status subresource was never initialised: status
    /// writes fail with `NotFound` and full updates carry status.
    pub async fn without_status_subresource(&self, kind: &str) {
        self.inner.lock().await.no_status.insert(kind.to_string());
    }

    /// Simulate a concurrent writer: bump the stored resourceVersion.
    pub async fn touch(&self, key: &ObjectRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let rv = inner.next_revision();
        let obj = inner.objects.get_mut(key).ok_or_else(|| StoreError::NotFound(key.clone()))?;
        obj.metadata.resource_version = Some(rv);
        Ok(())
    }

    pub async fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().await.journal.clone()
    }

    pub async fn count(&self, verb: Verb) -> usize {
        self.inner.lock().await.journal.iter().filter(|m| m.verb == verb).count()
    }

    pub async fn contains(&self, key: &ObjectRef) -> bool {
        self.inner.lock().await.objects.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<ObjectRef> {
        self.inner.lock().await.objects.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn check_revision(key: &ObjectRef, incoming: &DynamicObject, stored: &DynamicObject) -> Result<(), StoreError> {
    match &incoming.metadata.resource_version {
        Some(rv) if Some(rv) != stored.metadata.resource_version.as_ref() => Err(StoreError::Conflict(key.clone())),
        _ => Ok(()),
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, key: &ObjectRef) -> Result<DynamicObject, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(Verb::Get, key)?;
        inner.objects.get(key).cloned().ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.check(Verb::Create, &key)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        let mut stored = obj.clone();
        if inner.has_status_subresource(&key) {
            set_status(&mut stored, None);
        }
        stored.metadata.resource_version = Some(inner.next_revision());
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        inner.objects.insert(key.clone(), stored.clone());
        inner.journal.push(Mutation { verb: Verb::Create, key });
        Ok(stored)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.check(Verb::Replace, &key)?;
        let current = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_revision(&key, obj, &current)?;
        let mut stored = obj.clone();
        if inner.has_status_subresource(&key) {
            set_status(&mut stored, status_of(&current));
        }
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.resource_version = Some(inner.next_revision());
        inner.objects.insert(key.clone(), stored.clone());
        inner.journal.push(Mutation { verb: Verb::Replace, key });
        Ok(stored)
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.check(Verb::ReplaceStatus, &key)?;
        if !inner.has_status_subresource(&key) {
            return Err(StoreError::NotFound(key));
        }
        let current = inner.objects.get(&key).cloned().ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_revision(&key, obj, &current)?;
        let mut stored = current;
        set_status(&mut stored, status_of(obj));
        stored.metadata.resource_version = Some(inner.next_revision());
        inner.objects.insert(key.clone(), stored.clone());
        inner.journal.push(Mutation { verb: Verb::ReplaceStatus, key });
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(Verb::Delete, key)?;
        inner.objects.remove(key).ok_or_else(|| StoreError::NotFound(key.clone()))?;
        inner.journal.push(Mutation { verb: Verb::Delete, key: key.clone() });
        Ok(())
    }

    async fn list(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Result<Vec<DynamicObject>, StoreError> {
        let mut inner = self.inner.lock().await;
        let probe = ObjectRef::new(api_version, kind, namespace, "");
        inner.check(Verb::List, &probe)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == api_version && k.kind == kind)
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace.as_deref() == Some(ns)))
            .map(|(_, o)| o.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(name: &str, data: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "linkerd"},
            "data": {"k": data}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_identity_and_revision() {
        let store = MemoryStore::new();
        let a = store.create(&cm("a", "1")).await.unwrap();
        let b = store.create(&cm("b", "1")).await.unwrap();
        assert!(a.metadata.uid.is_some());
        assert!(a.metadata.creation_timestamp.is_some());
        assert_ne!(a.metadata.resource_version, b.metadata.resource_version);
        assert!(matches!(store.create(&cm("a", "2")).await, Err(StoreError::AlreadyExists(_))));
        assert_eq!(store.count(Verb::Create).await, 2);
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let store = MemoryStore::new();
        let live = store.create(&cm("a", "1")).await.unwrap();
        let mut first = live.clone();
        first.data = serde_json::json!({"data": {"k": "2"}});
        store.replace(&first).await.unwrap();
        let mut stale = live;
        stale.data = serde_json::json!({"data": {"k": "3"}});
        assert!(matches!(store.replace(&stale).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn status_writes_only_on_record_kind() {
        let store = MemoryStore::new();
        let live = store.create(&cm("a", "1")).await.unwrap();
        assert!(store.replace_status(&live).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn scripted_faults_and_conflicts() {
        let store = MemoryStore::new();
        store.fail(Verb::Create, "ConfigMap", Some("bad"), "injected").await;
        assert!(store.create(&cm("good", "1")).await.is_ok());
        let err = store.create(&cm("bad", "1")).await.unwrap_err();
        assert!(err.to_string().contains("injected"));

        store.conflict_next(Verb::Get, 1).await;
        let key = ObjectRef::new("v1", "ConfigMap", Some("linkerd"), "good");
        assert!(store.get(&key).await.unwrap_err().is_conflict());
        assert!(store.get(&key).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_namespace() {
        let store = MemoryStore::new();
        store.create(&cm("a", "1")).await.unwrap();
        assert_eq!(store.list("v1", "ConfigMap", Some("linkerd")).await.unwrap().len(), 1);
        assert_eq!(store.list("v1", "ConfigMap", Some("other")).await.unwrap().len(), 0);
        assert_eq!(store.list("v1", "ConfigMap", None).await.unwrap().len(), 1);
        assert_eq!(store.list("v1", "Secret", None).await.unwrap().len(), 0);
    }
}
