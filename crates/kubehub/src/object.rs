use std::fmt;

use kube::core::{DynamicObject, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identity of one cluster object: type plus namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Key for a statically typed resource.
    pub fn for_resource<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }

    pub fn of(obj: &DynamicObject) -> Result<Self, StoreError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind".into()))?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Invalid(format!("{} missing metadata.name", types.kind)))?;
        Ok(Self::new(&types.api_version, &types.kind, obj.metadata.namespace.as_deref(), name))
    }

    /// `(group, version)`; the core group is the empty string.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// An object the operator drives toward a built shape.
#[derive(Debug, Clone)]
pub struct ManagedResource {
    key: ObjectRef,
    object: DynamicObject,
}

impl ManagedResource {
    pub fn from_value(value: serde_json::Value) -> Result<Self, StoreError> {
        let object: DynamicObject = serde_json::from_value(value)?;
        let key = ObjectRef::of(&object)?;
        Ok(Self { key, object })
    }

    /// k8s-openapi types serialize their own apiVersion/kind.
    pub fn from_typed<T: Serialize>(obj: &T) -> Result<Self, StoreError> {
        Self::from_value(serde_json::to_value(obj)?)
    }

    pub fn key(&self) -> &ObjectRef {
        &self.key
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    pub fn into_object(self) -> DynamicObject {
        self.object
    }
}

pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert back to a typed resource, restoring type metadata a write may have dropped.
pub fn from_dynamic<K>(mut obj: DynamicObject) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    if obj.types.is_none() {
        obj.types = Some(TypeMeta { api_version: K::api_version(&()).into_owned(), kind: K::kind(&()).into_owned() });
    }
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
