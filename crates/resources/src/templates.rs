//! Shared building blocks: metadata, labels, probes, the proxy sidecar and
//! the workload/service/RBAC shapes every subsystem repeats.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe, SecretVolumeSource, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meshop_core::defaults::{self, CLUSTER_DOMAIN, PROXY_IMAGE, PROXY_INIT_IMAGE};
use meshop_core::{ComponentConfig, EffectiveConfiguration};
use meshop_kubehub::ManagedResource;
use serde::Serialize;

use crate::error::BuildError;

pub const CONTROL_PLANE_COMPONENT: &str = "linkerd.io/control-plane-component";
pub const CONTROL_PLANE_NS: &str = "linkerd.io/control-plane-ns";
pub const CREATED_BY: &str = "linkerd.io/created-by";
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub const CONFIG_MAP: &str = "linkerd-config";
pub const END_ENTITY_VOLUME: &str = "linkerd-identity-end-entity";
const END_ENTITY_PATH: &str = "/var/run/linkerd/identity/end-entity";
const CONTROLLER_UID: i64 = 2103;
const PROXY_UID: i64 = 2102;

pub fn managed<T: Serialize>(obj: &T) -> Result<ManagedResource, BuildError> {
    Ok(ManagedResource::from_typed(obj)?)
}

/// Kinds without a k8s-openapi type: explicit apiVersion/kind, typed metadata
/// and a raw `spec`.
pub fn unstructured(api_version: &str, kind: &str, metadata: ObjectMeta, spec: serde_json::Value) -> Result<ManagedResource, BuildError> {
    let mut value = serde_json::json!({"apiVersion": api_version, "kind": kind, "spec": spec});
    value["metadata"] = serde_json::to_value(metadata).map_err(meshop_kubehub::StoreError::from)?;
    Ok(ManagedResource::from_value(value)?)
}

fn map<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn labels(component: &str, cfg: &EffectiveConfiguration) -> BTreeMap<String, String> {
    map([(CONTROL_PLANE_COMPONENT, component.to_string()), (CONTROL_PLANE_NS, cfg.namespace.clone())])
}

pub fn workload_labels(component: &str, cfg: &EffectiveConfiguration) -> BTreeMap<String, String> {
    let mut l = labels(component, cfg);
    l.extend(map([
        ("app.kubernetes.io/name", component.to_string()),
        ("app.kubernetes.io/part-of", "Linkerd".to_string()),
        ("app.kubernetes.io/version", cfg.version.clone()),
    ]));
    l
}

pub fn created_by(cfg: &EffectiveConfiguration) -> BTreeMap<String, String> {
    map([(CREATED_BY, cfg.version.clone())])
}

/// Metadata for an object in `namespace` (`None` for cluster scope). The owner
/// reference is only set inside the record's namespace.
pub fn meta(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
    annotations: Option<BTreeMap<String, String>>,
    cfg: &EffectiveConfiguration,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        annotations,
        owner_references: cfg.owner_for(namespace).map(|o| vec![o]),
        ..Default::default()
    }
}

pub fn namespaced(name: &str, labels: BTreeMap<String, String>, cfg: &EffectiveConfiguration) -> ObjectMeta {
    meta(name, Some(&cfg.namespace), labels, Some(created_by(cfg)), cfg)
}

pub fn cluster(name: &str, labels: BTreeMap<String, String>, cfg: &EffectiveConfiguration) -> ObjectMeta {
    meta(name, None, labels, None, cfg)
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(strings(groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

pub fn named_rule(groups: &[&str], resources: &[&str], verbs: &[&str], names: &[&str]) -> PolicyRule {
    PolicyRule { resource_names: Some(strings(names)), ..rule(groups, resources, verbs) }
}

pub fn service_account_subject(name: &str, cfg: &EffectiveConfiguration) -> Subject {
    Subject {
        kind: "ServiceAccount".into(),
        name: name.into(),
        namespace: Some(cfg.namespace.clone()),
        ..Default::default()
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef { api_group: RBAC_GROUP.into(), kind: kind.into(), name: name.into() }
}

pub fn service_account(name: &str, component: &str, cfg: &EffectiveConfiguration) -> ServiceAccount {
    ServiceAccount { metadata: namespaced(name, labels(component, cfg), cfg), ..Default::default() }
}

pub fn cluster_role(name: &str, component: &str, rules: Vec<PolicyRule>, cfg: &EffectiveConfiguration) -> ClusterRole {
    ClusterRole { metadata: cluster(name, labels(component, cfg), cfg), rules: Some(rules), ..Default::default() }
}

pub fn cluster_role_binding(
    name: &str,
    cluster_role: &str,
    service_account: &str,
    component: &str,
    cfg: &EffectiveConfiguration,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster(name, labels(component, cfg), cfg),
        role_ref: role_ref("ClusterRole", cluster_role),
        subjects: Some(vec![service_account_subject(service_account, cfg)]),
    }
}

pub fn role(name: &str, component: &str, rules: Vec<PolicyRule>, cfg: &EffectiveConfiguration) -> Role {
    Role { metadata: namespaced(name, labels(component, cfg), cfg), rules: Some(rules) }
}

pub fn role_binding(name: &str, role: &str, subjects: Vec<Subject>, component: &str, cfg: &EffectiveConfiguration) -> RoleBinding {
    RoleBinding {
        metadata: namespaced(name, labels(component, cfg), cfg),
        role_ref: role_ref("Role", role),
        subjects: Some(subjects),
    }
}

pub fn http_probe(path: &str, port: &str, initial_delay: Option<i32>, failure_threshold: Option<i32>) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(port.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: initial_delay,
        failure_threshold,
        ..Default::default()
    }
}

/// Liveness on `/ping` and readiness on `/ready`, the layout every controller binary serves.
pub fn admin_probes(port: &str) -> (Option<Probe>, Option<Probe>) {
    (Some(http_probe("/ping", port, Some(10), None)), Some(http_probe("/ready", port, None, Some(7))))
}

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort { name: Some(name.to_string()), container_port: port, ..Default::default() }
}

pub fn service_port(name: &str, port: i32, target: IntOrString) -> ServicePort {
    ServicePort { name: Some(name.to_string()), port, target_port: Some(target), ..Default::default() }
}

pub fn config_volume() -> Volume {
    Volume {
        name: "config".into(),
        config_map: Some(ConfigMapVolumeSource { name: Some(CONFIG_MAP.into()), ..Default::default() }),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource { secret_name: Some(secret.into()), ..Default::default() }),
        ..Default::default()
    }
}

pub fn memory_volume(name: &str) -> Volume {
    Volume {
        name: name.into(),
        empty_dir: Some(EmptyDirVolumeSource { medium: Some("Memory".into()), ..Default::default() }),
        ..Default::default()
    }
}

pub fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount { name: name.into(), mount_path: path.into(), ..Default::default() }
}

pub fn config_mount() -> VolumeMount {
    mount("config", "/var/run/linkerd/config")
}

/// The main container of a control-plane workload, with image, pull policy,
/// resources and security context taken from the component settings.
pub fn control_container(name: &str, settings: &ComponentConfig, cfg: &EffectiveConfiguration, args: Vec<String>) -> Container {
    Container {
        name: name.into(),
        image: Some(settings.image.clone()),
        image_pull_policy: Some(cfg.image_pull_policy.as_str().into()),
        args: Some(args),
        resources: Some(settings.resources.clone()),
        security_context: Some(
            settings
                .security_context
                .clone()
                .unwrap_or(SecurityContext { run_as_user: Some(CONTROLLER_UID), ..Default::default() }),
        ),
        volume_mounts: Some(vec![config_mount()]),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        ..Default::default()
    }
}

pub fn log_level_arg(cfg: &EffectiveConfiguration) -> String {
    format!("-log-level={}", cfg.log_level)
}

pub fn controller_namespace_arg(cfg: &EffectiveConfiguration) -> String {
    format!("-controller-namespace={}", cfg.namespace)
}

pub fn prometheus_url_arg(cfg: &EffectiveConfiguration) -> String {
    format!("-prometheus-url=http://linkerd-prometheus.{}.svc.{}:9090", cfg.namespace, CLUSTER_DOMAIN)
}

pub fn proxy_init_container() -> Container {
    Container {
        name: "linkerd-init".into(),
        image: Some(PROXY_INIT_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(strings(&[
            "--incoming-proxy-port",
            "4143",
            "--outgoing-proxy-port",
            "4140",
            "--proxy-uid",
            "2102",
            "--inbound-ports-to-ignore",
            "4190,4191",
            "--outbound-ports-to-ignore",
            "443",
        ])),
        resources: Some(defaults::requirements("100m", "50Mi", "10m", "10Mi")),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities { add: Some(strings(&["NET_ADMIN", "NET_RAW"])), ..Default::default() }),
            privileged: Some(false),
            read_only_root_filesystem: Some(false),
            run_as_non_root: Some(false),
            run_as_user: Some(0),
            ..Default::default()
        }),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        ..Default::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.into(), value: Some(value.into()), ..Default::default() }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector { field_path: path.into(), ..Default::default() }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn proxy_container(cfg: &EffectiveConfiguration) -> Container {
    let ns = &cfg.namespace;
    let identity = |svc: &str| format!("{svc}.$(_l5d_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)");
    Container {
        name: "linkerd-proxy".into(),
        image: Some(PROXY_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        resources: Some(defaults::requirements("1", "250Mi", "100m", "20Mi")),
        volume_mounts: Some(vec![mount(END_ENTITY_VOLUME, END_ENTITY_PATH)]),
        liveness_probe: Some(http_probe("/live", "4191", Some(10), None)),
        readiness_probe: Some(http_probe("/ready", "4191", Some(2), None)),
        security_context: Some(SecurityContext {
            run_as_user: Some(PROXY_UID),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ports: Some(vec![container_port("linkerd-proxy", 4143), container_port("linkerd-admin", 4191)]),
        env: Some(vec![
            env("LINKERD2_PROXY_LOG", "warn,linkerd=info"),
            env("LINKERD2_PROXY_DESTINATION_SVC_ADDR", &format!("linkerd-dst.{ns}.svc.{CLUSTER_DOMAIN}:8086")),
            env("LINKERD2_PROXY_DESTINATION_GET_NETWORKS", "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16"),
            env("LINKERD2_PROXY_CONTROL_LISTEN_ADDR", "0.0.0.0:4190"),
            env("LINKERD2_PROXY_ADMIN_LISTEN_ADDR", "0.0.0.0:4191"),
            env("LINKERD2_PROXY_OUTBOUND_LISTEN_ADDR", "127.0.0.1:4140"),
            env("LINKERD2_PROXY_INBOUND_LISTEN_ADDR", "0.0.0.0:4143"),
            env("LINKERD2_PROXY_DESTINATION_GET_SUFFIXES", "svc.cluster.local."),
            env("LINKERD2_PROXY_DESTINATION_PROFILE_SUFFIXES", "svc.cluster.local."),
            env("LINKERD2_PROXY_INBOUND_ACCEPT_KEEPALIVE", "10000ms"),
            env("LINKERD2_PROXY_OUTBOUND_CONNECT_KEEPALIVE", "10000ms"),
            field_env("_pod_ns", "metadata.namespace"),
            env("LINKERD2_PROXY_DESTINATION_CONTEXT", "ns:$(_pod_ns)"),
            env("LINKERD2_PROXY_IDENTITY_DIR", END_ENTITY_PATH),
            env("LINKERD2_PROXY_IDENTITY_TRUST_ANCHORS", &cfg.certificates.trust_anchors_pem),
            env("LINKERD2_PROXY_IDENTITY_TOKEN_FILE", "/var/run/secrets/kubernetes.io/serviceaccount/token"),
            env("LINKERD2_PROXY_IDENTITY_SVC_ADDR", &format!("linkerd-identity.{ns}.svc.{CLUSTER_DOMAIN}:8080")),
            field_env("_pod_sa", "spec.serviceAccountName"),
            env("_l5d_ns", ns),
            env("_l5d_trustdomain", CLUSTER_DOMAIN),
            env(
                "LINKERD2_PROXY_IDENTITY_LOCAL_NAME",
                "$(_pod_sa).$(_pod_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)",
            ),
            env("LINKERD2_PROXY_IDENTITY_SVC_NAME", &identity("linkerd-identity")),
            env("LINKERD2_PROXY_DESTINATION_SVC_NAME", &identity("linkerd-destination")),
            env("LINKERD2_PROXY_TAP_SVC_NAME", &identity("linkerd-tap")),
        ]),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        ..Default::default()
    }
}

/// A meshed control-plane deployment: the given containers plus the proxy
/// sidecar, the proxy-init container and the shared config and identity volumes.
pub struct Workload<'a> {
    pub name: &'a str,
    pub component: &'a str,
    pub service_account: &'a str,
    pub settings: &'a ComponentConfig,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

impl Workload<'_> {
    pub fn pod_spec(self, cfg: &EffectiveConfiguration) -> PodSpec {
        let mut containers = self.containers;
        containers.push(proxy_container(cfg));
        let mut volumes = vec![config_volume(), memory_volume(END_ENTITY_VOLUME)];
        volumes.extend(self.volumes);
        let s = self.settings;
        PodSpec {
            service_account_name: Some(self.service_account.into()),
            containers,
            init_containers: Some(vec![proxy_init_container()]),
            volumes: Some(volumes),
            node_selector: (!s.node_selector.is_empty()).then(|| s.node_selector.clone()),
            affinity: s.affinity.clone(),
            tolerations: (!s.tolerations.is_empty()).then(|| s.tolerations.clone()),
            ..Default::default()
        }
    }

    pub fn pod_template(self, cfg: &EffectiveConfiguration) -> PodTemplateSpec {
        let mut annotations = created_by(cfg);
        annotations.extend(self.settings.pod_annotations.clone());
        let labels = workload_labels(self.component, cfg);
        PodTemplateSpec {
            metadata: Some(ObjectMeta { labels: Some(labels), annotations: Some(annotations), ..Default::default() }),
            spec: Some(self.pod_spec(cfg)),
        }
    }

    pub fn deployment(self, cfg: &EffectiveConfiguration) -> Deployment {
        let name = self.name.to_string();
        let component = self.component.to_string();
        let replicas = self.settings.replicas;
        Deployment {
            metadata: namespaced(&name, workload_labels(&component, cfg), cfg),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector { match_labels: Some(labels(&component, cfg)), ..Default::default() },
                strategy: Some(DeploymentStrategy {
                    rolling_update: Some(RollingUpdateDeployment {
                        max_unavailable: Some(IntOrString::Int(1)),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                template: self.pod_template(cfg),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

pub fn cluster_ip_service(name: &str, component: &str, ports: Vec<ServicePort>, cfg: &EffectiveConfiguration) -> Service {
    Service {
        metadata: namespaced(name, labels(component, cfg), cfg),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(map([(CONTROL_PLANE_COMPONENT, component.to_string())])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A served CRD version whose schema accepts any object.
pub fn open_crd_version(name: &str, storage: bool, columns: Vec<CustomResourceColumnDefinition>) -> CustomResourceDefinitionVersion {
    CustomResourceDefinitionVersion {
        name: name.into(),
        served: true,
        storage,
        schema: Some(CustomResourceValidation {
            open_api_v3_schema: Some(JSONSchemaProps {
                type_: Some("object".into()),
                x_kubernetes_preserve_unknown_fields: Some(true),
                ..Default::default()
            }),
        }),
        additional_printer_columns: (!columns.is_empty()).then_some(columns),
        ..Default::default()
    }
}

pub fn namespaced_crd(
    group: &str,
    kind: &str,
    plural: &str,
    short_name: &str,
    versions: Vec<CustomResourceDefinitionVersion>,
    cfg: &EffectiveConfiguration,
) -> CustomResourceDefinition {
    let mut labels = BTreeMap::new();
    labels.insert(CONTROL_PLANE_NS.to_string(), cfg.namespace.clone());
    CustomResourceDefinition {
        metadata: meta(&format!("{plural}.{group}"), None, labels, Some(created_by(cfg)), cfg),
        spec: CustomResourceDefinitionSpec {
            group: group.into(),
            scope: "Namespaced".into(),
            names: CustomResourceDefinitionNames {
                kind: kind.into(),
                plural: plural.into(),
                singular: Some(kind.to_lowercase()),
                short_names: Some(vec![short_name.into()]),
                ..Default::default()
            },
            versions,
            ..Default::default()
        },
        status: None,
    }
}
