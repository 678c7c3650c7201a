//! SMI `TrafficSplit` definition. Not part of the default install order.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceColumnDefinition;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates;
use crate::{BuildError, Subsystem};

pub const CRD: &str = "trafficsplits.split.smi-spec.io";

pub fn subsystem() -> Subsystem {
    Subsystem::new("trafficsplit").present("custom-resource-definition", crd)
}

pub fn crd(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let service = CustomResourceColumnDefinition {
        name: "Service".into(),
        type_: "string".into(),
        description: Some("The apex service of this split.".into()),
        json_path: ".spec.service".into(),
        ..Default::default()
    };
    let versions = vec![templates::open_crd_version("v1alpha1", true, vec![service])];
    templates::managed(&templates::namespaced_crd("split.smi-spec.io", "TrafficSplit", "trafficsplits", "ts", versions, cfg))
}
