//! Proxy injector: the mutating webhook that adds the sidecar to new pods.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates::{self, rule, strings, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "proxy-injector";
pub const SERVICE_ACCOUNT: &str = "linkerd-proxy-injector";
pub const CLUSTER_ROLE: &str = "linkerd-linkerd-proxy-injector";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-linkerd-proxy-injector";
pub const SECRET: &str = "linkerd-proxy-injector-tls";
pub const DEPLOYMENT: &str = "linkerd-proxy-injector";
pub const SERVICE: &str = "linkerd-proxy-injector";
pub const WEBHOOK_CONFIG: &str = "linkerd-proxy-injector-webhook-config";
pub const WEBHOOK: &str = "linkerd-proxy-injector.linkerd.io";

pub fn subsystem() -> Subsystem {
    Subsystem::new(COMPONENT)
        .present("service-account", service_account)
        .present("cluster-role", cluster_role)
        .present("cluster-role-binding", cluster_role_binding)
        .present("secret", secret)
        .present("deployment", deployment)
        .present("service", service)
        .present("mutating-webhook-configuration", webhook_configuration)
}

pub fn service_account(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::service_account(SERVICE_ACCOUNT, COMPONENT, cfg))
}

pub fn cluster_role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![
        rule(&[""], &["events"], &["create", "patch"]),
        rule(&[""], &["namespaces", "replicationcontrollers"], &["get", "list", "watch"]),
        rule(&[""], &["pods"], &["list", "watch"]),
        rule(&["extensions", "apps"], &["deployments", "replicasets", "daemonsets", "statefulsets"], &["list", "get", "watch"]),
        rule(&["extensions", "batch"], &["cronjobs", "jobs"], &["list", "get", "watch"]),
    ];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

/// Serving pair for the webhook endpoint, signed by the issuer.
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
    let settings = &cfg.proxy_injector;
    let mut c = templates::control_container("proxy-injector", settings, cfg, vec!["proxy-injector".into(), templates::log_level_arg(cfg)]);
    c.ports = Some(vec![templates::container_port("proxy-injector", 8443), templates::container_port("admin-http", 9995)]);
    let mut tls = templates::mount("tls", "/var/run/linkerd/tls");
    tls.read_only = Some(true);
    c.volume_mounts = Some(vec![templates::config_mount(), tls]);
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
    let ports = vec![templates::service_port("proxy-injector", 443, IntOrString::String("proxy-injector".into()))];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}

/// Pod-create webhook pointing at the injector service. Namespaces labelled
/// `config.linkerd.io/admission-webhooks=disabled` are skipped.
pub fn webhook_configuration(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let hook = MutatingWebhook {
        name: WEBHOOK.into(),
        admission_review_versions: strings(&["v1", "v1beta1"]),
        namespace_selector: Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "config.linkerd.io/admission-webhooks".into(),
                operator: "NotIn".into(),
                values: Some(strings(&["disabled"])),
            }]),
            ..Default::default()
        }),
        client_config: WebhookClientConfig {
            service: Some(ServiceReference {
                name: SERVICE.into(),
                namespace: cfg.namespace.clone(),
                path: Some("/".into()),
                port: None,
            }),
            ca_bundle: Some(ByteString(cfg.certificates.trust_anchors_pem.clone().into_bytes())),
            url: None,
        },
        failure_policy: Some("Ignore".into()),
        side_effects: "None".into(),
        rules: Some(vec![RuleWithOperations {
            operations: Some(strings(&["CREATE"])),
            api_groups: Some(strings(&[""])),
            api_versions: Some(strings(&["v1"])),
            resources: Some(strings(&["pods"])),
            scope: None,
        }]),
        ..Default::default()
    };
    let w = MutatingWebhookConfiguration {
        metadata: templates::cluster(WEBHOOK_CONFIG, templates::labels(COMPONENT, cfg), cfg),
        webhooks: Some(vec![hook]),
    };
    templates::managed(&w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::testing::{config, value};

    #[test]
    fn webhook_trusts_anchor_bundle() {
        let m = webhook_configuration(&config()).unwrap();
        let w: MutatingWebhookConfiguration = serde_json::from_value(value(&m)).unwrap();
        assert!(w.metadata.owner_references.is_none());
        let hook = &w.webhooks.unwrap()[0];
        assert_eq!(hook.client_config.ca_bundle.as_ref().unwrap().0, b"ROOT-PEM");
        assert_eq!(hook.client_config.service.as_ref().unwrap().namespace, "linkerd");
        assert_eq!(hook.failure_policy.as_deref(), Some("Ignore"));
    }

    #[test]
    fn service_targets_named_port() {
        let v = value(&service(&config()).unwrap());
        assert_eq!(v["spec"]["ports"][0]["port"], 443);
        assert_eq!(v["spec"]["ports"][0]["targetPort"], "proxy-injector");
    }
}
