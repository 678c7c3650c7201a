//! Pod security policy for the control plane and the RBAC granting its use.

use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;
use serde_json::json;

use crate::templates::{self, named_rule};
use crate::{controller, destination, heartbeat, identity, prometheus, proxy_injector, tap, web};
use crate::{BuildError, Subsystem};

pub const SUBSYSTEM: &str = "psp";
pub const COMPONENT: &str = "linkerd-control-plane";
pub const POLICY: &str = "linkerd-control-plane";
pub const ROLE: &str = "linkerd-psp";
pub const ROLE_BINDING: &str = "linkerd-psp";

const SERVICE_ACCOUNTS: [&str; 8] = [
    controller::SERVICE_ACCOUNT,
    destination::SERVICE_ACCOUNT,
    heartbeat::SERVICE_ACCOUNT,
    identity::SERVICE_ACCOUNT,
    prometheus::SERVICE_ACCOUNT,
    proxy_injector::SERVICE_ACCOUNT,
    tap::SERVICE_ACCOUNT,
    web::SERVICE_ACCOUNT,
];

pub fn subsystem() -> Subsystem {
    Subsystem::new(SUBSYSTEM)
        .present("pod-security-policy", policy)
        .present("role", role)
        .present("role-binding", role_binding)
}

fn labels(cfg: &EffectiveConfiguration) -> std::collections::BTreeMap<String, String> {
    let mut l = templates::labels(COMPONENT, cfg);
    l.remove(templates::CONTROL_PLANE_COMPONENT);
    l
}

/// `policy/v1beta1` has no k8s-openapi type in the supported API range.
pub fn policy(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let ids = json!({"rule": "MustRunAs", "ranges": [{"min": 1, "max": 65535}]});
    let spec = json!({
        "allowPrivilegeEscalation": false,
        "readOnlyRootFilesystem": true,
        "allowedCapabilities": ["NET_ADMIN", "NET_RAW"],
        "requiredDropCapabilities": ["ALL"],
        "hostNetwork": false,
        "hostIPC": false,
        "hostPID": false,
        "seLinux": {"rule": "RunAsAny"},
        "runAsUser": {"rule": "RunAsAny"},
        "supplementalGroups": ids,
        "fsGroup": ids,
        "volumes": ["configMap", "emptyDir", "secret", "projected", "downwardAPI", "persistentVolumeClaim"]
    });
    templates::unstructured("policy/v1beta1", "PodSecurityPolicy", templates::cluster(POLICY, labels(cfg), cfg), spec)
}

pub fn role(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let rules = vec![named_rule(&["policy", "extensions"], &["podsecuritypolicies"], &["use"], &[POLICY])];
    let mut r = templates::role(ROLE, COMPONENT, rules, cfg);
    r.metadata.labels = Some(labels(cfg));
    templates::managed(&r)
}

pub fn role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let subjects = SERVICE_ACCOUNTS.iter().map(|sa| templates::service_account_subject(sa, cfg)).collect();
    let mut rb = templates::role_binding(ROLE_BINDING, ROLE, subjects, COMPONENT, cfg);
    rb.metadata.labels = Some(labels(cfg));
    templates::managed(&rb)
}
