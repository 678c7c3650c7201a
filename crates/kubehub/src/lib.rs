//! Mesh operator kubehub: the cluster store capability the reconciler writes
//! through, with a kube-rs implementation and an in-memory one.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod kinds;
pub mod memory;
pub mod object;
pub mod scope;
pub mod store;

pub use client::KubeStore;
pub use error::StoreError;
pub use memory::{MemoryStore, Mutation, Verb};
pub use object::{from_dynamic, to_dynamic, ManagedResource, ObjectRef};
pub use scope::{ScopeError, WatchScope};
pub use store::ClusterStore;
