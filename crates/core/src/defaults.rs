//! Defaulting gate. Fills every unset optional field with its subsystem default.
//! Applying it to an already defaulted spec is a no-op.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::{ComponentSpec, ImagePullPolicy, LinkerdSpec, SelfSignedCertificates};

pub const LINKERD_RELEASE: &str = "stable-2.8.1";
pub const CONTROLLER_IMAGE: &str = "gcr.io/linkerd-io/controller:stable-2.8.1";
pub const WEB_IMAGE: &str = "gcr.io/linkerd-io/web:stable-2.8.1";
pub const PROMETHEUS_IMAGE: &str = "prom/prometheus:v2.15.2";
pub const PROXY_IMAGE: &str = "gcr.io/linkerd-io/proxy:stable-2.8.1";
pub const PROXY_INIT_IMAGE: &str = "gcr.io/linkerd-io/proxy-init:v1.3.3";
pub const LOG_LEVEL: &str = "info";
pub const REPLICA_COUNT: i32 = 1;
pub const HEARTBEAT_SCHEDULE: &str = "0 0 * * *";
pub const CLUSTER_DOMAIN: &str = "cluster.local";

pub fn requirements(limit_cpu: &str, limit_mem: &str, req_cpu: &str, req_mem: &str) -> ResourceRequirements {
    let list = |cpu: &str, mem: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(mem.to_string())),
        ])
    };
    ResourceRequirements {
        limits: Some(list(limit_cpu, limit_mem)),
        requests: Some(list(req_cpu, req_mem)),
        ..Default::default()
    }
}

pub fn default_resources() -> ResourceRequirements {
    requirements("1", "250Mi", "100m", "50Mi")
}

pub fn prometheus_resources() -> ResourceRequirements {
    requirements("4", "8Gi", "300m", "300Mi")
}

fn fill(block: &mut ComponentSpec, image: &str, resources: fn() -> ResourceRequirements) {
    if block.image.is_none() {
        block.image = Some(image.to_string());
    }
    if block.resources.is_none() {
        block.resources = Some(resources());
    }
    if block.replica_count.is_none() {
        block.replica_count = Some(REPLICA_COUNT);
    }
}

/// Mutates `spec` in place; callers keep the persisted record untouched by
/// defaulting a clone.
pub fn apply(spec: &mut LinkerdSpec) {
    if spec.log_level.as_deref().map_or(true, str::is_empty) {
        spec.log_level = Some(LOG_LEVEL.to_string());
    }
    if spec.image_pull_policy.is_none() {
        spec.image_pull_policy = Some(ImagePullPolicy::IfNotPresent);
    }
    if spec.self_signed_certificates.is_none() {
        spec.self_signed_certificates = Some(SelfSignedCertificates::default());
    }

    // controller and destination share the controller image and quota
    fill(&mut spec.controller, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.destination, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.heartbeat.base, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.identity, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.prometheus, PROMETHEUS_IMAGE, prometheus_resources);
    fill(&mut spec.proxy_injector, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.tap, CONTROLLER_IMAGE, default_resources);
    fill(&mut spec.web, WEB_IMAGE, default_resources);

    if spec.heartbeat.schedule.as_deref().map_or(true, str::is_empty) {
        spec.heartbeat.schedule = Some(HEARTBEAT_SCHEDULE.to_string());
    }
}
