use async_trait::async_trait;
use kube::core::DynamicObject;

use crate::error::StoreError;
use crate::object::ObjectRef;

/// The cluster object store as the reconciler sees it: get/create/update/list
/// with optimistic concurrency on `metadata.resourceVersion`.
///
/// Writes carrying a stale resourceVersion fail with [`StoreError::Conflict`];
/// lookups of missing objects fail with [`StoreError::NotFound`].
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, key: &ObjectRef) -> Result<DynamicObject, StoreError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Full-object update.
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Status subresource update. Fails with `NotFound` when the object has no
    /// status subresource.
    async fn replace_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn delete(&self, key: &ObjectRef) -> Result<(), StoreError>;

    /// Objects of one kind, optionally restricted to a namespace.
    async fn list(&self, api_version: &str, kind: &str, namespace: Option<&str>)
        -> Result<Vec<DynamicObject>, StoreError>;

    async fn get_opt(&self, key: &ObjectRef) -> Result<Option<DynamicObject>, StoreError> {
        match self.get(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
