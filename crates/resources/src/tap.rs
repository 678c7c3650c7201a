//! Tap: live request inspection, served through an aggregated API.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;
use serde_json::json;

use crate::templates::{self, rule, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "tap";
pub const SERVICE_ACCOUNT: &str = "linkerd-tap";
pub const CLUSTER_ROLE: &str = "linkerd-linkerd-tap";
pub const ADMIN_CLUSTER_ROLE: &str = "linkerd-linkerd-tap-admin";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-linkerd-tap";
pub const AUTH_DELEGATOR_BINDING: &str = "linkerd-linkerd-tap-auth-delegator";
pub const AUTH_READER_BINDING: &str = "linkerd-linkerd-tap-auth-reader";
pub const AUTH_READER_NAMESPACE: &str = "kube-system";
pub const SECRET: &str = "linkerd-tap-tls";
pub const DEPLOYMENT: &str = "linkerd-tap";
pub const SERVICE: &str = "linkerd-tap";
pub const API_SERVICE: &str = "v1alpha1.tap.linkerd.io";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("cluster-role", cluster_role)
        .present("admin-cluster-role", admin_cluster_role)
        .present("cluster-role-binding", cluster_role_binding)
        .present("auth-delegator-binding", auth_delegator_binding)
        .present("auth-reader-binding", auth_reader_binding)
        .present("secret", secret)
        .present("deployment", deployment)
        .present("service", service)
        .present("api-service", api_service)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        rule(&[""], &["pods", "services", "replicationcontrollers", "namespaces", "nodes"], &["list", "get", "watch"]),
        rule(&["extensions", "apps"], &["daemonsets", "deployments", "replicasets", "statefulsets"], &["list", "get", "watch"]),
        rule(&["extensions", "batch"], &["cronjobs", "jobs"], &["list", "get", "watch"]),
    ];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn admin_cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![rule(&["tap.linkerd.io"], &["*"], &["watch"])];
    templates::managed(&templates::cluster_role(ADMIN_CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn auth_delegator_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(
        AUTH_DELEGATOR_BINDING,
        "system:auth-delegator",
        SERVICE_ACCOUNT,
        COMPONENT,
        cfg,
    ))
}

/// Lives in `kube-system`, outside the record namespace, so it carries no
/// owner reference and is not garbage collected with the record.
pub fn auth_reader_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rb = RoleBinding {
        metadata: templates::meta(AUTH_READER_BINDING, Some(AUTH_READER_NAMESPACE), templates::labels(COMPONENT, cfg), None, cfg),
        role_ref: RoleRef {
            api_group: templates::RBAC_GROUP.into(),
            kind: "Role".into(),
            name: "extension-apiserver-authentication-reader".into(),
        },
        subjects: Some(vec![templates::service_account_subject(SERVICE_ACCOUNT, cfg)]),
    };
    templates::managed(&rb)
}

pub fn secret(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let certs = &cfg.certificates;
    let s = Secret {
        metadata: templates::namespaced(SECRET, templates::labels(COMPONENT, cfg), cfg),
        type_: Some("kubernetes.io/tls".into()),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(certs.crt_pem.clone().into_bytes())),
            ("tls.key".to_string(), ByteString(certs.key_pem.clone().into_bytes())),
        ])),
        ..Default::default()
    };
    templates::managed(&s)
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let settings = &cfg.tap;
    let args = vec!["tap".to_string(), templates::controller_namespace_arg(cfg), templates::log_level_arg(cfg)];
    let (liveness, readiness) = templates::admin_probes("9998");
    let mut c = templates::control_container("tap", settings, cfg, args);
    c.ports = Some(vec![
        templates::container_port("grpc", 8088),
        templates::container_port("apiserver", 8089),
        templates::container_port("admin-http", 9998),
    ]);
    c.liveness_probe = liveness;
    c.readiness_probe = readiness;
    let mut tls = templates::mount("tls", "/var/run/linkerd/tls");
    tls.read_only = Some(true);
    c.volume_mounts = Some(vec![tls, templates::config_mount()]);
    let d = Workload {
        name: DEPLOYMENT,
        component: COMPONENT,
        service_account: SERVICE_ACCOUNT,
        settings,
        containers: vec![c],
        volumes: vec![templates::secret_volume("tls", SECRET)],
    }
    .deployment(cfg);
    templates::managed(&d)
}

pub fn service(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let ports = vec![
        templates::service_port("grpc", 8088, IntOrString::Int(8088)),
        templates::service_port("apiserver", 443, IntOrString::String("apiserver".into())),
    ];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}

/// Registers `tap.linkerd.io/v1alpha1` with the aggregation layer.
pub fn api_service(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let metadata = templates::cluster(API_SERVICE, templates::labels(COMPONENT, cfg), cfg);
    let spec = json!({
        "group": "tap.linkerd.io",
        "version": "v1alpha1",
        "groupPriorityMinimum": 1000,
        "versionPriority": 100,
        "service": {"name": SERVICE, "namespace": cfg.namespace},
        "caBundle": STANDARD.encode(cfg.certificates.trust_anchors_pem.as_bytes())
    });
    templates::unstructured("apiregistration.k8s.io/v1", "APIService", metadata, spec)
}
