use meshop_apply::SyncError;
use meshop_core::{ConfigState, CoreError};
use meshop_kubehub::{ObjectRef, StoreError};
use meshop_resources::BuildError;
use thiserror::Error;

/// Failure of one subsystem. The first failing resource stops the subsystem.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("could not build {resource}")]
    Build {
        resource: &'static str,
        #[source]
        source: BuildError,
    },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status write conflicted again after refetch")]
    RepeatedConflict(#[source] StoreError),
    #[error("state {from} cannot move to {to}")]
    Forbidden { from: ConfigState, to: ConfigState },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read record {key}")]
    Store {
        key: ObjectRef,
        #[source]
        source: StoreError,
    },
    #[error("failed to reconcile component {component}")]
    Component {
        component: &'static str,
        #[source]
        source: ComponentError,
    },
    #[error("failed to set status {state}")]
    Status {
        state: ConfigState,
        #[source]
        source: StatusError,
    },
    #[error("record cannot be resolved")]
    Build(#[from] CoreError),
}

impl ReconcileError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store { .. } => "store",
            ReconcileError::Component { .. } => "component",
            ReconcileError::Status { .. } => "status",
            ReconcileError::Build(_) => "build",
        }
    }

    pub fn component(&self) -> Option<&'static str> {
        match self {
            ReconcileError::Component { component, .. } => Some(*component),
            _ => None,
        }
    }
}

/// The error and every source below it, joined with `": "`. This is the text
/// persisted as `ErrorMessage`.
pub fn chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cur = e.source();
    }
    out
}
