//! `ServiceProfile` definition. Not part of the default install order.

use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates;
use crate::{BuildError, Subsystem};

pub const CRD: &str = "serviceprofiles.linkerd.io";

pub fn subsystem() -> Subsystem {
    Subsystem::new("serviceprofile").present("custom-resource-definition", crd)
}

/// `v1alpha1` stays served for old clients; `v1alpha2` is the storage version.
pub fn crd(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let versions = vec![
        templates::open_crd_version("v1alpha1", false, vec![]),
        templates::open_crd_version("v1alpha2", true, vec![]),
    ];
    templates::managed(&templates::namespaced_crd("linkerd.io", "ServiceProfile", "serviceprofiles", "sp", versions, cfg))
}
