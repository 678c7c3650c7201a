//! Mesh operator core types: the `Linkerd` custom resource, its status state
//! machine, the version and defaulting gates, and the effective configuration
//! every resource builder consumes.

#![forbid(unsafe_code)]

pub mod config;
pub mod crd;
pub mod defaults;
pub mod error;
pub mod state;
pub mod version;

pub use config::{ComponentConfig, EffectiveConfiguration, HeartbeatConfig};
pub use crd::{
    ComponentSpec, ConfigState, HeartbeatSpec, ImagePullPolicy, Linkerd, LinkerdSpec, LinkerdStatus,
    SelfSignedCertificates,
};
pub use error::CoreError;
pub use state::DesiredState;
pub use version::is_supported;

/// Finalizer the operator places on records it manages. The spelling is part of
/// the compatibility surface with already-deployed records.
pub const FINALIZER: &str = "linkerd2-operator.finializer.linkerd.io";

pub mod prelude {
    pub use super::{
        ComponentConfig, ConfigState, DesiredState, EffectiveConfiguration, Linkerd, LinkerdSpec, LinkerdStatus,
    };
}
