//! Static registry of the kinds the operator reads or writes.

use kube::core::{ApiResource, GroupVersionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
    /// Status is written by this operator through the `/status` subresource.
    pub status_subresource: bool,
}

const fn kind(api_version: &'static str, kind: &'static str, plural: &'static str, namespaced: bool) -> KindInfo {
    KindInfo { api_version, kind, plural, namespaced, status_subresource: false }
}

pub const KNOWN_KINDS: &[KindInfo] = &[
    kind("v1", "ServiceAccount", "serviceaccounts", true),
    kind("v1", "Service", "services", true),
    kind("v1", "ConfigMap", "configmaps", true),
    kind("v1", "Secret", "secrets", true),
    kind("apps/v1", "Deployment", "deployments", true),
    kind("batch/v1", "CronJob", "cronjobs", true),
    kind("rbac.authorization.k8s.io/v1", "Role", "roles", true),
    kind("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings", true),
    kind("rbac.authorization.k8s.io/v1", "ClusterRole", "clusterroles", false),
    kind("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", "clusterrolebindings", false),
    kind("admissionregistration.k8s.io/v1", "MutatingWebhookConfiguration", "mutatingwebhookconfigurations", false),
    kind("apiregistration.k8s.io/v1", "APIService", "apiservices", false),
    kind("policy/v1beta1", "PodSecurityPolicy", "podsecuritypolicies", false),
    kind("apiextensions.k8s.io/v1", "CustomResourceDefinition", "customresourcedefinitions", false),
    KindInfo {
        api_version: "linkerd.linkerd.io/v1alpha1",
        kind: "Linkerd",
        plural: "linkerds",
        namespaced: true,
        status_subresource: true,
    },
];

pub fn lookup(api_version: &str, kind: &str) -> Option<&'static KindInfo> {
    KNOWN_KINDS.iter().find(|k| k.api_version == api_version && k.kind == kind)
}

impl KindInfo {
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self.api_version.split_once('/').unwrap_or(("", self.api_version));
        GroupVersionKind::gvk(group, version, self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk(), self.plural)
    }
}
