use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, SecurityContext, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Desired state of one Linkerd control plane.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "linkerd.linkerd.io",
    version = "v1alpha1",
    kind = "Linkerd",
    plural = "linkerds",
    namespaced,
    status = "LinkerdStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.Status"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.ErrorMessage"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LinkerdSpec {
    /// Linkerd release to install; only the 2.x line is supported.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(rename = "selfSignedCerts", default, skip_serializing_if = "Option::is_none")]
    pub self_signed_certificates: Option<SelfSignedCertificates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_injection_namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<ImagePullPolicy>,
    #[serde(default)]
    pub controller: ComponentSpec,
    #[serde(default)]
    pub destination: ComponentSpec,
    #[serde(default)]
    pub heartbeat: HeartbeatSpec,
    #[serde(default)]
    pub identity: ComponentSpec,
    #[serde(default)]
    pub prometheus: ComponentSpec,
    #[serde(default)]
    pub proxy_injector: ComponentSpec,
    #[serde(default)]
    pub tap: ComponentSpec,
    #[serde(default)]
    pub web: ComponentSpec,
}

/// Base workload knobs shared by every subsystem block.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<i32>,
}

/// The heartbeat job runs on a cron schedule rather than as a long-lived workload.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSpec {
    #[serde(flatten)]
    pub base: ComponentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Trust anchor and issuer material. Empty strings mean "not provided".
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct SelfSignedCertificates {
    #[serde(rename = "trustAnchorsPEM", default, skip_serializing_if = "String::is_empty")]
    pub trust_anchors_pem: String,
    #[serde(rename = "keyPEM", default, skip_serializing_if = "String::is_empty")]
    pub key_pem: String,
    #[serde(rename = "crtPEM", default, skip_serializing_if = "String::is_empty")]
    pub crt_pem: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ImagePullPolicy {
    Always,
    Never,
    #[default]
    IfNotPresent,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePullPolicy::Always => "Always",
            ImagePullPolicy::Never => "Never",
            ImagePullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

/// Lifecycle state persisted in the status subresource.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum ConfigState {
    Created,
    Reconciling,
    Available,
    ReconcileFailed,
    Unmanaged,
}

impl ConfigState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigState::Created => "Created",
            ConfigState::Reconciling => "Reconciling",
            ConfigState::Available => "Available",
            ConfigState::ReconcileFailed => "ReconcileFailed",
            ConfigState::Unmanaged => "Unmanaged",
        }
    }

    /// Whether a record in `from` (None = never written) may move to `to`.
    /// `Unmanaged` is terminal for the lifetime of the record.
    pub fn permits(from: Option<ConfigState>, to: ConfigState) -> bool {
        !matches!(from, Some(ConfigState::Unmanaged)) || to == ConfigState::Unmanaged
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status subresource. Keys are capitalised on the wire.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct LinkerdStatus {
    #[serde(
        rename = "Status",
        default,
        deserialize_with = "state_or_unset",
        skip_serializing_if = "Option::is_none"
    )]
    pub state: Option<ConfigState>,
    #[serde(rename = "ErrorMessage", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl LinkerdStatus {
    pub fn new(state: ConfigState, error_message: impl Into<String>) -> Self {
        Self { state: Some(state), error_message: error_message.into() }
    }
}

// Older records carry `Status: ""` for the unset state.
fn state_or_unset<'de, D>(deserializer: D) -> Result<Option<ConfigState>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => ConfigState::deserialize(serde::de::value::StrDeserializer::<D::Error>::new(s)).map(Some),
    }
}

impl Linkerd {
    /// Current persisted state, `None` while the record has never been reconciled.
    pub fn state(&self) -> Option<ConfigState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    pub fn error_message(&self) -> &str {
        self.status.as_ref().map(|s| s.error_message.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn status_uses_capitalised_keys() {
        let st = LinkerdStatus::new(ConfigState::ReconcileFailed, "boom");
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v, serde_json::json!({"Status": "ReconcileFailed", "ErrorMessage": "boom"}));
    }

    #[test]
    fn empty_status_string_is_unset() {
        let st: LinkerdStatus = serde_json::from_value(serde_json::json!({"Status": ""})).unwrap();
        assert_eq!(st.state, None);
        let st: LinkerdStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(st.state, None);
        let st: LinkerdStatus = serde_json::from_value(serde_json::json!({"Status": "Available"})).unwrap();
        assert_eq!(st.state, Some(ConfigState::Available));
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        let res: Result<LinkerdStatus, _> = serde_json::from_value(serde_json::json!({"Status": "Bogus"}));
        assert!(res.is_err());
    }

    #[test]
    fn unmanaged_is_terminal() {
        assert!(ConfigState::permits(None, ConfigState::Created));
        assert!(ConfigState::permits(Some(ConfigState::Available), ConfigState::ReconcileFailed));
        assert!(ConfigState::permits(Some(ConfigState::ReconcileFailed), ConfigState::Available));
        assert!(ConfigState::permits(Some(ConfigState::Available), ConfigState::Unmanaged));
        assert!(!ConfigState::permits(Some(ConfigState::Unmanaged), ConfigState::Available));
        assert!(ConfigState::permits(Some(ConfigState::Unmanaged), ConfigState::Unmanaged));
    }

    #[test]
    fn spec_parses_from_manifest() {
        let y = r#"
apiVersion: linkerd.linkerd.io/v1alpha1
kind: Linkerd
metadata:
  name: linkerd
  namespace: linkerd
spec:
  version: "2.8.1"
  imagePullPolicy: Always
  selfSignedCerts:
    trustAnchorsPEM: ROOT
  heartbeat:
    schedule: "*/5 * * * *"
    replicaCount: 2
  proxyInjector:
    image: example/injector:dev
"#;
        let l: Linkerd = serde_yaml::from_str(y).unwrap();
        assert_eq!(l.spec.version, "2.8.1");
        assert_eq!(l.spec.image_pull_policy, Some(ImagePullPolicy::Always));
        assert_eq!(l.spec.self_signed_certificates.as_ref().unwrap().trust_anchors_pem, "ROOT");
        assert_eq!(l.spec.heartbeat.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(l.spec.heartbeat.base.replica_count, Some(2));
        assert_eq!(l.spec.proxy_injector.image.as_deref(), Some("example/injector:dev"));
        assert_eq!(l.state(), None);
    }

    #[test]
    fn crd_carries_status_subresource_and_columns() {
        let crd = Linkerd::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("linkerds.linkerd.linkerd.io"));
        assert_eq!(crd.spec.scope, "Namespaced");
        let v = &crd.spec.versions[0];
        assert_eq!(v.name, "v1alpha1");
        assert!(v.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
        let cols: Vec<_> = v
            .additional_printer_columns
            .as_ref()
            .map(|c| c.iter().map(|c| c.json_path.clone()).collect())
            .unwrap_or_default();
        assert_eq!(cols, vec![".status.Status", ".status.ErrorMessage", ".metadata.creationTimestamp"]);
    }
}
