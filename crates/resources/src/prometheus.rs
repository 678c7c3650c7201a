//! Metrics collection for the control plane and meshed proxies.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, EmptyDirVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ManagedResource;

use crate::templates::{self, rule, Workload};
use crate::{BuildError, Subsystem};

pub const COMPONENT: &str = "prometheus";
pub const SERVICE_ACCOUNT: &str = "linkerd-prometheus";
pub const CLUSTER_ROLE: &str = "linkerd-prometheus";
pub const CLUSTER_ROLE_BINDING: &str = "linkerd-prometheus";
pub const CONFIG_MAP: &str = "linkerd-prometheus";
pub const DEPLOYMENT: &str = "linkerd-prometheus";
pub const SERVICE: &str = "linkerd-prometheus";

const CONFIG_FILE: &str = "prometheus.yml";

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
    let rules = vec![rule(&[""], &["nodes", "nodes/proxy", "pods"], &["get", "list", "watch"])];
    templates::managed(&templates::cluster_role(CLUSTER_ROLE, COMPONENT, rules, cfg))
}

pub fn cluster_role_binding(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    templates::managed(&templates::cluster_role_binding(CLUSTER_ROLE_BINDING, CLUSTER_ROLE, SERVICE_ACCOUNT, COMPONENT, cfg))
}

fn scrape_config(namespace: &str) -> String {
    format!(
        r#"global:
  evaluation_interval: 10s
  scrape_interval: 10s
  scrape_timeout: 10s

scrape_configs:
- job_name: 'prometheus'
  static_configs:
  - targets: ['localhost:9090']

- job_name: 'linkerd-controller'
  kubernetes_sd_configs:
  - role: pod
    namespaces:
      names: ['{namespace}']
  relabel_configs:
  - source_labels:
    - __meta_kubernetes_pod_label_linkerd_io_control_plane_component
    - __meta_kubernetes_pod_container_port_name
    action: keep
    regex: (.*);admin-http$
  - source_labels: [__meta_kubernetes_pod_container_name]
    action: replace
    target_label: component

- job_name: 'linkerd-proxy'
  kubernetes_sd_configs:
  - role: pod
  relabel_configs:
  - source_labels:
    - __meta_kubernetes_pod_container_name
    - __meta_kubernetes_pod_container_port_name
    - __meta_kubernetes_pod_label_linkerd_io_control_plane_ns
    action: keep
    regex: ^linkerd-proxy;linkerd-admin;{namespace}$
  - source_labels: [__meta_kubernetes_namespace]
    action: replace
    target_label: namespace
  - source_labels: [__meta_kubernetes_pod_name]
    action: replace
    target_label: pod
"#
    )
}

pub fn config_map(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let cm = ConfigMap {
        metadata: templates::namespaced(CONFIG_MAP, templates::labels(COMPONENT, cfg), cfg),
        data: Some(BTreeMap::from([(CONFIG_FILE.to_string(), scrape_config(&cfg.namespace))])),
        ..Default::default()
    };
    templates::managed(&cm)
}

pub fn deployment(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let settings = &cfg.prometheus;
    let args = vec![
        "--storage.tsdb.path=/data".to_string(),
        "--storage.tsdb.retention.time=6h".to_string(),
        format!("--config.file=/etc/prometheus/{CONFIG_FILE}"),
        format!("--log.level={}", cfg.log_level),
    ];
    let mut c = templates::control_container("prometheus", settings, cfg, args);
    c.ports = Some(vec![templates::container_port("admin-http", 9090)]);
    c.liveness_probe = Some(templates::http_probe("/-/healthy", "9090", Some(30), None));
    c.readiness_probe = Some(templates::http_probe("/-/ready", "9090", Some(30), None));
    c.volume_mounts = Some(vec![
        templates::mount("data", "/data"),
        VolumeMount {
            name: "prometheus-config".into(),
            mount_path: format!("/etc/prometheus/{CONFIG_FILE}"),
            sub_path: Some(CONFIG_FILE.into()),
            read_only: Some(true),
            ..Default::default()
        },
    ]);
    let volumes = vec![
        Volume { name: "data".into(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Default::default() },
        Volume {
            name: "prometheus-config".into(),
            config_map: Some(ConfigMapVolumeSource { name: Some(CONFIG_MAP.into()), ..Default::default() }),
            ..Default::default()
        },
    ];
    let d = Workload {
        name: DEPLOYMENT,
        component: COMPONENT,
        service_account: SERVICE_ACCOUNT,
        settings,
        containers: vec![c],
        volumes,
    }
    .deployment(cfg);
    templates::managed(&d)
}

pub fn service(cfg: &EffectiveConfiguration) -> Result<ManagedResource, BuildError> {
    let ports = vec![templates::service_port("admin-http", 9090, IntOrString::Int(9090))];
    templates::managed(&templates::cluster_ip_service(SERVICE, COMPONENT, ports, cfg))
}
