//! Mesh operator reconcile: per-subsystem reconcilers, the aggregate pass over
//! a `Linkerd` record, its status state machine, and the kube-runtime watch
//! loop that drives them.

#![forbid(unsafe_code)]

pub mod component;
pub mod controller;
pub mod error;
pub mod order;
pub mod pass;
pub mod status;

pub use component::{Component, ComponentReconciler, ComponentReport};
pub use controller::Context;
pub use error::{chain, ComponentError, ReconcileError, StatusError};
pub use order::{default_order, reserved, DEFAULT_ORDER};
pub use pass::{PassOutcome, Reconciler};
pub use status::{record_key, update_status};
