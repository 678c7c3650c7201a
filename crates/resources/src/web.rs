//! Web dashboard.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meshop_core::defaults::CLUSTER_DOMAIN;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;
use serde_json::json;

use crate::templates::{self, named_rule, rule, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "web";
pub const SERVICE_ACCOUNT: &str = "linkerd-web";
pub const ROLE: &str = "linkerd-web";
pub const ROLE_BINDING: &str = "linkerd-web";
pub const CHECK_CLUSTER_ROLE: &str = "linkerd-web-check";
pub const CHECK_CLUSTER_ROLE_BINDING: &str = "linkerd-web-check";
pub const ADMIN_CLUSTER_ROLE_BINDING: &str = "linkerd-web-admin";
pub const CONFIG_MAP: &str = "linkerd-web-config";
pub const DEPLOYMENT: &str = "linkerd-web";
pub const SERVICE: &str = "linkerd-web";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("role", role)
        .present("role-binding", role_binding)
        .present("check-cluster-role", check_cluster_role)
        .present("check-cluster-role-binding", check_cluster_role_binding)
        .present("admin-cluster-role-binding", admin_cluster_role_binding)
        .present("config-map", config_map)
        .present("deployment", deployment)
        .present("service", service)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        named_rule(&[""], &["configmaps"], &["get"], &[templates::CONFIG_MAP]),
        rule(&[""], &["namespaces", "configmaps"], &["get"]),
        rule(&[""], &["serviceaccounts", "pods"], &["list"]),
        rule(&["apps"], &["replicasets"], &["list"]),
    ];
    templates::managed(&templates::role(ROLE, COMPONENT, rules, cfg))
}

pub fn role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let subjects = vec![templates::service_account_subject(SERVICE_ACCOUNT, cfg)];
    templates::managed(&templates::role_binding(ROLE_BINDING, ROLE, subjects, COMPONENT, cfg))
}

/// Read access the dashboard's `linkerd check` page needs.
pub fn check_cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        rule(&[templates::RBAC_GROUP], &["clusterroles", "clusterrolebindings"], &["list"]),
        rule(&["apiextensions.k8s.io"], &["customresourcedefinitions"], &["list"]),
        rule(&["admissionregistration.k8s.io"], &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"], &["list"]),
        rule(&["policy"], &["podsecuritypolicies"], &["list"]),
        rule(&["linkerd.io"], &["serviceprofiles"], &["list"]),
        rule(&["apiregistration.k8s.io"], &["apiservices"], &["get"]),
    ];
    templates::managed(&templates::cluster_role(CHECK_CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn check_cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(
        CHECK_CLUSTER_ROLE_BINDING,
        CHECK_CLUSTER_ROLE,
        SERVICE_ACCOUNT,
        COMPONENT,
        cfg,
    ))
}

/// Lets the dashboard open tap streams.
pub fn admin_cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(
        ADMIN_CLUSTER_ROLE_BINDING,
        crate::tap::ADMIN_CLUSTER_ROLE,
        SERVICE_ACCOUNT,
        COMPONENT,
        cfg,
    ))
}

pub fn config_map(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let network = json!({
        "cniVersion": "0.3.1",
        "name": "linkerd-cni",
        "type": "linkerd-cni",
        "kubernetes": {"kubeconfig": "__KUBECONFIG_FILEPATH__"}
    });
    let cm = ConfigMap {
        metadata: templates::namespaced(CONFIG_MAP, templates::labels(COMPONENT, cfg), cfg),
        data: Some(BTreeMap::from([("cni_network_config".to_string(), network.to_string())])),
        ..Default::default()
    };
    templates::managed(&cm)
}

fn enforced_host(namespace: &str) -> String {
    let ns = namespace.replace('.', "\\.");
    let domain = CLUSTER_DOMAIN.replace('.', "\\.");
    format!(r"-enforced-host=^(localhost|127\.0\.0\.1|linkerd-web\.{ns}\.svc\.{domain}|linkerd-web\.{ns}\.svc|\[::1\])(:\d+)?$")
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let settings = &cfg.web;
    let ns = &cfg.namespace;
    let args = vec![
        format!("-api-addr=linkerd-controller-api.{ns}.svc.{CLUSTER_DOMAIN}:8085"),
        format!("-grafana-addr=linkerd-grafana.{ns}.svc.{CLUSTER_DOMAIN}:3000"),
        templates::controller_namespace_arg(cfg),
        templates::log_level_arg(cfg),
        enforced_host(ns),
    ];
    let (liveness, readiness) = templates::admin_probes("9994");
    let mut c = templates::control_container("web", settings, cfg, args);
    c.ports = Some(vec![templates::container_port("http", 8084), templates::container_port("admin-http", 9994)]);
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
    let ports = vec![
        templates::service_port("http", 8084, IntOrString::Int(8084)),
        templates::service_port("admin-http", 9994, IntOrString::Int(9994)),
    ];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::testing::{config, value};

    #[test]
    fn admin_binding_grants_tap_admin() {
        let v = value(&admin_cluster_role_binding(&config()).unwrap());
        assert_eq!(v["roleRef"]["name"], "linkerd-linkerd-tap-admin");
        assert_eq!(v["subjects"][0]["name"], SERVICE_ACCOUNT);
    }

    #[test]
    fn enforced_host_escapes_namespace() {
        let arg = enforced_host("linkerd");
        assert!(arg.contains(r"linkerd-web\.linkerd\.svc\.cluster\.local"));
        assert!(arg.starts_with("-enforced-host=^") && arg.ends_with("?$"));
    }
}
