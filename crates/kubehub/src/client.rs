//! [`ClusterStore`] backed by a live API server through kube-rs.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    Client,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::kinds;
use crate::object::ObjectRef;
use crate::store::ClusterStore;

pub struct KubeStore {
    client: Client,
    // kinds outside the static registry, resolved once through discovery
    discovered: Mutex<HashMap<(String, String), (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, discovered: Mutex::new(HashMap::new()) }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, bool), StoreError> {
        if let Some(info) = kinds::lookup(api_version, kind) {
            return Ok((info.api_resource(), info.namespaced));
        }
        let cache_key = (api_version.to_string(), kind.to_string());
        if let Some(hit) = self.discovered.lock().await.get(&cache_key) {
            return Ok(hit.clone());
        }
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let discovery = Discovery::new(self.client.clone()).run().await.map_err(StoreError::Client)?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    debug!(api_version, kind, namespaced, "resolved kind through discovery");
                    self.discovered.lock().await.insert(cache_key, (ar.clone(), namespaced));
                    return Ok((ar, namespaced));
                }
            }
        }
        Err(StoreError::UnknownKind { api_version: api_version.to_string(), kind: kind.to_string() })
    }

    async fn api_for(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.resolve(api_version, kind).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn api(&self, key: &ObjectRef) -> Result<Api<DynamicObject>, StoreError> {
        let (_, namespaced) = self.resolve(&key.api_version, &key.kind).await?;
        if namespaced && key.namespace.is_none() {
            return Err(StoreError::Invalid(format!("{key} is namespaced but has no namespace")));
        }
        self.api_for(&key.api_version, &key.kind, key.namespace.as_deref()).await
    }
}

// A list has no object name; classify against the collection.
fn list_error(api_version: &str, kind: &str, namespace: Option<&str>, err: kube::Error) -> StoreError {
    StoreError::from_kube(&ObjectRef::new(api_version, kind, namespace, ""), err)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, key: &ObjectRef) -> Result<DynamicObject, StoreError> {
        let api = self.api(key).await?;
        api.get(&key.name).await.map_err(|e| StoreError::from_kube(key, e))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let api = self.api(&key).await?;
        debug!(object = %key, "create");
        api.create(&PostParams::default(), obj).await.map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let api = self.api(&key).await?;
        debug!(object = %key, rv = ?obj.metadata.resource_version, "replace");
        api.replace(&key.name, &PostParams::default(), obj).await.map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectRef::of(obj)?;
        let api = self.api(&key).await?;
        let body = serde_json::to_vec(obj)?;
        debug!(object = %key, rv = ?obj.metadata.resource_version, "replace status");
        api.replace_status(&key.name, &PostParams::default(), body).await.map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn delete(&self, key: &ObjectRef) -> Result<(), StoreError> {
        let api = self.api(key).await?;
        debug!(object = %key, "delete");
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn list(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api_for(api_version, kind, namespace).await?;
        let listed = api.list(&ListParams::default()).await.map_err(|e| list_error(api_version, kind, namespace, e))?;
        // list items usually come back without apiVersion/kind
        Ok(listed
            .items
            .into_iter()
            .map(|mut o| {
                if o.types.is_none() {
                    o.types = Some(TypeMeta { api_version: api_version.to_string(), kind: kind.to_string() });
                }
                o
            })
            .collect())
    }
}
