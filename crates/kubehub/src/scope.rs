//! Watch scope resolved from the process environment at startup.

use thiserror::Error;

pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("POD_NAMESPACE must be set")]
    MissingPodNamespace,
    #[error("WATCH_NAMESPACE ({watch}) must be empty or equal to POD_NAMESPACE ({pod})")]
    ForeignWatchNamespace { watch: String, pod: String },
}

/// Which records the operator watches: its own namespace, or every namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchScope {
    pub pod_namespace: String,
    pub watch_namespace: Option<String>,
}

impl WatchScope {
    pub fn resolve(pod_namespace: Option<String>, watch_namespace: Option<String>) -> Result<Self, ScopeError> {
        let pod_namespace = pod_namespace.filter(|s| !s.is_empty()).ok_or(ScopeError::MissingPodNamespace)?;
        let watch_namespace = watch_namespace.filter(|s| !s.is_empty());
        if let Some(watch) = &watch_namespace {
            if *watch != pod_namespace {
                return Err(ScopeError::ForeignWatchNamespace { watch: watch.clone(), pod: pod_namespace });
            }
        }
        Ok(Self { pod_namespace, watch_namespace })
    }

    pub fn from_env() -> Result<Self, ScopeError> {
        Self::resolve(std::env::var(POD_NAMESPACE_ENV).ok(), std::env::var(WATCH_NAMESPACE_ENV).ok())
    }

    /// `None` means cluster-wide.
    pub fn namespace(&self) -> Option<&str> {
        self.watch_namespace.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_wide_when_watch_unset() {
        let s = WatchScope::resolve(Some("linkerd".into()), None).unwrap();
        assert_eq!(s.namespace(), None);
        let s = WatchScope::resolve(Some("linkerd".into()), Some(String::new())).unwrap();
        assert_eq!(s.namespace(), None);
    }

    #[test]
    fn single_namespace_when_equal() {
        let s = WatchScope::resolve(Some("linkerd".into()), Some("linkerd".into())).unwrap();
        assert_eq!(s.namespace(), Some("linkerd"));
    }

    #[test]
    fn rejects_missing_or_foreign() {
        assert_eq!(WatchScope::resolve(None, None), Err(ScopeError::MissingPodNamespace));
        assert_eq!(WatchScope::resolve(Some(String::new()), None), Err(ScopeError::MissingPodNamespace));
        assert!(matches!(
            WatchScope::resolve(Some("linkerd".into()), Some("default".into())),
            Err(ScopeError::ForeignWatchNamespace { .. })
        ));
    }
}
