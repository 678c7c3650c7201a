use thiserror::Error;

use crate::object::ObjectRef;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectRef),
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(ObjectRef),
    #[error("{0} already exists")]
    AlreadyExists(ObjectRef),
    #[error("unknown kind {api_version} {kind}")]
    UnknownKind { api_version: String, kind: String },
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("kube client error")]
    Client(#[source] kube::Error),
    #[error("object (de)serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a kube error for `key`. 404 and 409 become typed variants.
    pub fn from_kube(key: &ObjectRef, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(key.clone()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(key.clone())
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(key.clone()),
            kube::Error::Api(ae) => StoreError::Api { code: ae.code, reason: ae.reason, message: ae.message },
            other => StoreError::Client(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
