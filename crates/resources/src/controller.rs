//! Public API controller and the shared `linkerd-config` ConfigMap.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meshop_core::defaults::{CLUSTER_DOMAIN, LINKERD_RELEASE};
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;
use serde_json::json;

use crate::templates::{self, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "controller";
pub const SERVICE_ACCOUNT: &str = "linkerd-controller";
pub const CLUSTER_ROLE: &str = "linkerd-linkerd-controller";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-linkerd-controller";
pub const CONFIG_MAP: &str = templates::CONFIG_MAP;
pub const DEPLOYMENT: &str = "linkerd-controller";
pub const SERVICE: &str = "linkerd-controller-api";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("cluster-role", cluster_role)
        .present("cluster-role-binding", cluster_role_binding)
        .present("config-map", config_map)
        .present("deployment", deployment)
        .present("service", service)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    use templates::rule;
    let rules = vec![
        rule(&["extensions", "apps"], &["daemonsets", "deployments", "replicasets", "statefulsets"], &["list", "get", "watch"]),
        rule(&["extensions", "batch"], &["cronjobs", "jobs"], &["list", "get", "watch"]),
        rule(&[""], &["pods", "endpoints", "services", "replicationcontrollers", "namespaces"], &["list", "get", "watch"]),
        rule(&["linkerd.io"], &["serviceprofiles"], &["list", "get", "watch"]),
        rule(&["split.smi-spec.io"], &["trafficsplits"], &["list", "get", "watch"]),
    ];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

/// Install-wide configuration read by every control-plane binary and the CLI.
pub fn config_map(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let global = json!({
        "linkerdNamespace": cfg.namespace,
        "cniEnabled": false,
        "version": LINKERD_RELEASE,
        "identityContext": {
            "trustDomain": CLUSTER_DOMAIN,
            "trustAnchorsPem": cfg.certificates.trust_anchors_pem,
            "issuanceLifetime": "86400s",
            "clockSkewAllowance": "20s",
            "scheme": "linkerd.io/tls"
        },
        "autoInjectContext": null,
        "omitWebhookSideEffects": false,
        "clusterDomain": CLUSTER_DOMAIN
    });
    let proxy = json!({
        "proxyImage": {"imageName": "gcr.io/linkerd-io/proxy", "pullPolicy": cfg.image_pull_policy.as_str()},
        "proxyInitImage": {"imageName": "gcr.io/linkerd-io/proxy-init", "pullPolicy": cfg.image_pull_policy.as_str()},
        "controlPort": {"port": 4190},
        "ignoreInboundPorts": [],
        "ignoreOutboundPorts": [],
        "inboundPort": {"port": 4143},
        "adminPort": {"port": 4191},
        "outboundPort": {"port": 4140},
        "resource": {"requestCpu": "100m", "requestMemory": "20Mi", "limitCpu": "1", "limitMemory": "250Mi"},
        "proxyUid": "2102",
        "logLevel": {"level": "warn,linkerd=info"},
        "disableExternalProfiles": true,
        "proxyVersion": LINKERD_RELEASE,
        "proxyInitImageVersion": "v1.3.3",
        "debugImage": {"imageName": "gcr.io/linkerd-io/debug", "pullPolicy": cfg.image_pull_policy.as_str()},
        "debugImageVersion": LINKERD_RELEASE,
        "destinationGetNetworks": "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16"
    });
    let mut flags = vec![json!({"name": "ha", "value": "false"})];
    if !cfg.auto_injection_namespaces.is_empty() {
        flags.push(json!({"name": "auto-injection-namespaces", "value": cfg.auto_injection_namespaces.join(",")}));
    }
    let install = json!({"cliVersion": LINKERD_RELEASE, "flags": flags});

    let cm = ConfigMap {
        metadata: templates::namespaced(CONFIG_MAP, templates::labels(COMPONENT, cfg), cfg),
        data: Some(
            [("global", global), ("proxy", proxy), ("install", install)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    };
    templates::managed(&cm)
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let settings = &cfg.controller;
    let args = vec![
        "public-api".to_string(),
        templates::prometheus_url_arg(cfg),
        format!("-destination-addr=linkerd-dst.{}.svc.{}:8086", cfg.namespace, CLUSTER_DOMAIN),
        templates::controller_namespace_arg(cfg),
        templates::log_level_arg(cfg),
    ];
    let (liveness, readiness) = templates::admin_probes("9995");
    let mut c = templates::control_container("public-api", settings, cfg, args);
    c.ports = Some(vec![templates::container_port("http", 8085), templates::container_port("admin-http", 9995)]);
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
    let ports = vec![templates::service_port("http", 8085, IntOrString::Int(8085))];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}
