//! Destination service: service discovery and routing policy for proxies.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates::{self, rule, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "destination";
pub const SERVICE_ACCOUNT: &str = "linkerd-destination";
pub const CLUSTER_ROLE: &str = "linkerd-linkerd-destination";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-linkerd-destination";
pub const DEPLOYMENT: &str = "linkerd-destination";
pub const SERVICE: &str = "linkerd-dst";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("cluster-role", cluster_role)
        .present("cluster-role-binding", cluster_role_binding)
        .present("deployment", deployment)
        .present("service", service)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        rule(&["apps"], &["replicasets"], &["list", "get", "watch"]),
        rule(&["batch"], &["jobs"], &["list", "get", "watch"]),
        rule(&[""], &["pods", "endpoints", "services"], &["list", "get", "watch"]),
        rule(&["linkerd.io"], &["serviceprofiles"], &["list", "get", "watch"]),
        rule(&["split.smi-spec.io"], &["trafficsplits"], &["list", "get", "watch"]),
    ];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let settings = &cfg.destination;
    let args = vec![
        "destination".to_string(),
        "-addr=:8086".to_string(),
        templates::controller_namespace_arg(cfg),
        "-enable-h2-upgrade=true".to_string(),
        templates::log_level_arg(cfg),
    ];
    let (liveness, readiness) = templates::admin_probes("9996");
    let mut c = templates::control_container("destination", settings, cfg, args);
    c.ports = Some(vec![templates::container_port("grpc", 8086), templates::container_port("admin-http", 9996)]);
    c.liveness_probe = liveness;
    c.readiness_probe = readiness;
    let d = Workload {
        name: DEPLOYMENT,
        component: COMPONENT,
        service_account: SERVICE_ACCOUNT,
        settings,
        containers: vec![c],
        volumes: vec![],
    }
    .deployment(cfg);
    templates::managed(&d)
}

pub fn service(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let ports = vec![templates::service_port("grpc", 8086, IntOrString::Int(8086))];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}
