//! Identity issuer: signs proxy certificates from the issuer key pair.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, PodAffinityTerm, PodAntiAffinity, Secret, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates::{self, rule, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "identity";
pub const SERVICE_ACCOUNT: &str = "linkerd-identity";
pub const CLUSTER_ROLE: &str = "linkerd-linkerd-identity";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-linkerd-identity";
pub const SECRET: &str = "linkerd-identity-issuer";
pub const DEPLOYMENT: &str = "linkerd-identity";
pub const SERVICE: &str = "linkerd-identity";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("cluster-role", cluster_role)
        .present("cluster-role-binding", cluster_role_binding)
        .present("secret", secret)
        .present("deployment", deployment)
        .present("service", service)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        rule(&["authentication.k8s.io"], &["tokenreviews"], &["create"]),
        rule(&["apps"], &["deployments"], &["get"]),
        rule(&[""], &["events"], &["create", "patch"]),
    ];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

/// Issuer key pair from the record's certificate block.
pub fn secret(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let certs = &cfg.certificates;
    let s = Secret {
        metadata: templates::namespaced(SECRET, templates::labels(COMPONENT, cfg), cfg),
        data: Some(BTreeMap::from([
            ("crt.pem".to_string(), ByteString(certs.crt_pem.clone().into_bytes())),
            ("key.pem".to_string(), ByteString(certs.key_pem.clone().into_bytes())),
        ])),
        ..Default::default()
    };
    templates::managed(&s)
}

fn spread_across_nodes() -> Affinity {
    let selector = LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: templates::CONTROL_PLANE_COMPONENT.into(),
            operator: "In".into(),
            values: Some(vec![COMPONENT.into()]),
        }]),
        ..Default::default()
    };
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(selector.clone()),
                topology_key: "kubernetes.io/hostname".into(),
                ..Default::default()
            }]),
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                weight: 100,
                pod_affinity_term: PodAffinityTerm {
                    label_selector: Some(selector),
                    topology_key: "failure-domain.beta.kubernetes.io/zone".into(),
                    ..Default::default()
                },
            }]),
        }),
        ..Default::default()
    }
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let mut settings = cfg.identity.clone();
    if settings.affinity.is_none() {
        settings.affinity = Some(spread_across_nodes());
    }
    let (liveness, readiness) = templates::admin_probes("9990");
    let mut c = templates::control_container("identity", &settings, cfg, vec!["identity".into(), templates::log_level_arg(cfg)]);
    c.ports = Some(vec![templates::container_port("grpc", 8080), templates::container_port("admin-http", 9990)]);
    c.liveness_probe = liveness;
    c.readiness_probe = readiness;
    c.volume_mounts = Some(vec![
        templates::config_mount(),
        templates::mount("identity-issuer", "/var/run/linkerd/identity/issuer"),
    ]);
    let d = Workload {
        name: DEPLOYMENT,
        component: COMPONENT,
        service_account: SERVICE_ACCOUNT,
        settings: &settings,
        containers: vec![c],
        volumes: vec![templates::secret_volume("identity-issuer", SECRET)],
    }
    .deployment(cfg);
    templates::managed(&d)
}

pub fn service(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let ports = vec![templates::service_port("grpc", 8080, IntOrString::Int(8080))];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}
