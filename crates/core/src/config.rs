use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, SecurityContext, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::crd::{ComponentSpec, ImagePullPolicy, Linkerd, SelfSignedCertificates};
use crate::defaults;
use crate::error::CoreError;

/// Per-subsystem workload settings after defaulting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub image: String,
    pub resources: ResourceRequirements,
    pub replicas: i32,
    pub node_selector: BTreeMap<String, String>,
    pub affinity: Option<Affinity>,
    pub tolerations: Vec<Toleration>,
    pub pod_annotations: BTreeMap<String, String>,
    pub security_context: Option<SecurityContext>,
}

impl ComponentConfig {
    // `block` has been through `defaults::apply`.
    fn from_spec(field: &'static str, block: ComponentSpec) -> Result<Self, CoreError> {
        Ok(Self {
            image: block.image.ok_or(CoreError::Undefaulted(field))?,
            resources: block.resources.ok_or(CoreError::Undefaulted(field))?,
            replicas: block.replica_count.ok_or(CoreError::Undefaulted(field))?,
            node_selector: block.node_selector,
            affinity: block.affinity,
            tolerations: block.tolerations,
            pod_annotations: block.pod_annotations,
            security_context: block.security_context,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub component: ComponentConfig,
    pub schedule: String,
}

/// What every resource builder reads. Recomputed on each pass, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfiguration {
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub log_level: String,
    pub image_pull_policy: ImagePullPolicy,
    pub certificates: SelfSignedCertificates,
    pub auto_injection_namespaces: Vec<String>,
    pub controller: ComponentConfig,
    pub destination: ComponentConfig,
    pub heartbeat: HeartbeatConfig,
    pub identity: ComponentConfig,
    pub prometheus: ComponentConfig,
    pub proxy_injector: ComponentConfig,
    pub tap: ComponentConfig,
    pub web: ComponentConfig,
    /// Controller reference back to the record; absent until the record has a uid.
    pub owner: Option<OwnerReference>,
}

impl EffectiveConfiguration {
    /// Run the defaulting gate over a copy of the record's spec.
    pub fn resolve(record: &Linkerd) -> Result<Self, CoreError> {
        let name = record.metadata.name.clone().ok_or(CoreError::MissingMetadata("name"))?;
        let namespace = record.metadata.namespace.clone().ok_or(CoreError::MissingMetadata("namespace"))?;

        let mut spec = record.spec.clone();
        defaults::apply(&mut spec);

        Ok(Self {
            name,
            namespace,
            version: spec.version,
            log_level: spec.log_level.ok_or(CoreError::Undefaulted("logLevel"))?,
            image_pull_policy: spec.image_pull_policy.ok_or(CoreError::Undefaulted("imagePullPolicy"))?,
            certificates: spec.self_signed_certificates.ok_or(CoreError::Undefaulted("selfSignedCertificates"))?,
            auto_injection_namespaces: spec.auto_injection_namespaces,
            controller: ComponentConfig::from_spec("controller", spec.controller)?,
            destination: ComponentConfig::from_spec("destination", spec.destination)?,
            heartbeat: HeartbeatConfig {
                component: ComponentConfig::from_spec("heartbeat", spec.heartbeat.base)?,
                schedule: spec.heartbeat.schedule.ok_or(CoreError::Undefaulted("heartbeat.schedule"))?,
            },
            identity: ComponentConfig::from_spec("identity", spec.identity)?,
            prometheus: ComponentConfig::from_spec("prometheus", spec.prometheus)?,
            proxy_injector: ComponentConfig::from_spec("proxyInjector", spec.proxy_injector)?,
            tap: ComponentConfig::from_spec("tap", spec.tap)?,
            web: ComponentConfig::from_spec("web", spec.web)?,
            owner: record.controller_owner_ref(&()),
        })
    }

    /// Owner reference for an object living in `namespace`. Cluster-scoped objects
    /// and objects in other namespaces cannot be owned by a namespaced record.
    pub fn owner_for(&self, namespace: Option<&str>) -> Option<OwnerReference> {
        match namespace {
            Some(ns) if ns == self.namespace => self.owner.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LinkerdSpec;

    fn record(uid: Option<&str>) -> Linkerd {
        let mut l = Linkerd::new("linkerd", LinkerdSpec { version: "2.8.1".into(), ..Default::default() });
        l.metadata.namespace = Some("linkerd".into());
        l.metadata.uid = uid.map(str::to_string);
        l
    }

    #[test]
    fn resolve_fills_defaults_without_touching_record() {
        let l = record(None);
        let cfg = EffectiveConfiguration::resolve(&l).unwrap();
        assert_eq!(cfg.controller.image, defaults::CONTROLLER_IMAGE);
        assert_eq!(cfg.web.image, defaults::WEB_IMAGE);
        assert_eq!(cfg.heartbeat.schedule, defaults::HEARTBEAT_SCHEDULE);
        assert_eq!(cfg.log_level, "info");
        assert!(l.spec.controller.image.is_none());
        assert!(cfg.owner.is_none());
    }

    #[test]
    fn resolve_twice_is_stable() {
        let l = record(Some("0000-1111"));
        let a = EffectiveConfiguration::resolve(&l).unwrap();
        let mut defaulted = l.clone();
        defaults::apply(&mut defaulted.spec);
        let b = EffectiveConfiguration::resolve(&defaulted).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn resolved_values_come_from_defaulting_gate() {
        let mut l = record(None);
        l.spec.prometheus.replica_count = Some(2);
        l.spec.tap.image = Some("example/tap:dev".into());
        let cfg = EffectiveConfiguration::resolve(&l).unwrap();
        let mut spec = l.spec.clone();
        defaults::apply(&mut spec);

        assert_eq!(Some(cfg.log_level), spec.log_level);
        assert_eq!(Some(cfg.image_pull_policy), spec.image_pull_policy);
        assert_eq!(Some(cfg.heartbeat.schedule), spec.heartbeat.schedule);
        for (resolved, block) in [
            (&cfg.controller, &spec.controller),
            (&cfg.destination, &spec.destination),
            (&cfg.heartbeat.component, &spec.heartbeat.base),
            (&cfg.identity, &spec.identity),
            (&cfg.prometheus, &spec.prometheus),
            (&cfg.proxy_injector, &spec.proxy_injector),
            (&cfg.tap, &spec.tap),
            (&cfg.web, &spec.web),
        ] {
            assert_eq!(Some(&resolved.image), block.image.as_ref());
            assert_eq!(Some(&resolved.resources), block.resources.as_ref());
            assert_eq!(Some(resolved.replicas), block.replica_count);
        }
        assert_eq!(cfg.prometheus.replicas, 2);
        assert_eq!(cfg.tap.image, "example/tap:dev");
    }

    #[test]
    fn owner_only_inside_record_namespace() {
        let cfg = EffectiveConfiguration::resolve(&record(Some("0000-1111"))).unwrap();
        let owner = cfg.owner_for(Some("linkerd")).unwrap();
        assert_eq!(owner.kind, "Linkerd");
        assert_eq!(owner.api_version, "linkerd.linkerd.io/v1alpha1");
        assert_eq!(owner.uid, "0000-1111");
        assert_eq!(owner.controller, Some(true));
        assert!(cfg.owner_for(Some("kube-system")).is_none());
        assert!(cfg.owner_for(None).is_none());
    }

    #[test]
    fn namespace_is_required() {
        let mut l = record(None);
        l.metadata.namespace = None;
        assert!(matches!(EffectiveConfiguration::resolve(&l), Err(CoreError::MissingMetadata("namespace"))));
    }
}
