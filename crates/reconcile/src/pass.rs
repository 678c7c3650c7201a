//! Aggregate reconciler: one full pass over every subsystem for one record.

use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use meshop_core::{is_supported, ConfigState, EffectiveConfiguration, Linkerd, FINALIZER};
use meshop_kubehub::{from_dynamic, to_dynamic, ClusterStore, ObjectRef};
use metrics::{counter, histogram};
use tracing::{error, info, info_span, warn, Instrument};

use crate::component::ComponentReconciler;
use crate::error::{chain, ReconcileError, StatusError};
use crate::order;
use crate::status::{record_key, update_status};

/// How a pass ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The record is gone or being deleted.
    Deleted,
    /// `spec.version` is outside the supported range. Nothing was touched.
    UnsupportedVersion,
    /// The record was released earlier and is left alone.
    Unmanaged,
    Reconciled,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Deleted => "deleted",
            PassOutcome::UnsupportedVersion => "unsupported_version",
            PassOutcome::Unmanaged => "unmanaged",
            PassOutcome::Reconciled => "reconciled",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    components: Vec<Arc<dyn ComponentReconciler>>,
}

impl Reconciler {
    /// Reconciler running the default subsystem order.
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self::with_components(store, order::default_order())
    }

    pub fn with_components(store: Arc<dyn ClusterStore>, components: Vec<Arc<dyn ComponentReconciler>>) -> Self {
        Self { store, components }
    }

    pub fn store(&self) -> &dyn ClusterStore {
        self.store.as_ref()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name())
    }

    /// Fetch the record behind `key` and drive every subsystem toward it.
    pub async fn reconcile_pass(&self, key: &ObjectRef) -> Result<PassOutcome, ReconcileError> {
        let span = info_span!("reconcile", name = %key.name, namespace = key.namespace.as_deref().unwrap_or_default());
        let started = Instant::now();
        let res = self.pass(key).instrument(span).await;
        let result = match &res {
            Ok(outcome) => outcome.as_str(),
            Err(e) => e.kind(),
        };
        counter!("meshop_reconcile_total", 1u64, "result" => result);
        histogram!("meshop_reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        res
    }

    async fn fetch(&self, key: &ObjectRef) -> Result<Option<Linkerd>, ReconcileError> {
        let store_err = |source| ReconcileError::Store { key: key.clone(), source };
        match self.store.get_opt(key).await.map_err(store_err)? {
            Some(obj) => Ok(Some(from_dynamic(obj).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    async fn pass(&self, key: &ObjectRef) -> Result<PassOutcome, ReconcileError> {
        let Some(mut record) = self.fetch(key).await? else {
            info!("Linkerd resource not found; ignoring");
            return Ok(PassOutcome::Deleted);
        };
        if record.metadata.deletion_timestamp.is_some() {
            if record.finalizers().iter().any(|f| f == FINALIZER) {
                self.release(&mut record).await?;
            }
            return Ok(PassOutcome::Deleted);
        }
        if record.state() == Some(ConfigState::Unmanaged) {
            info!("Linkerd resource is unmanaged; skipping");
            return Ok(PassOutcome::Unmanaged);
        }
        if !is_supported(&record.spec.version) {
            error!(version = %record.spec.version, "unsupported Linkerd version");
            return Ok(PassOutcome::UnsupportedVersion);
        }

        let config = EffectiveConfiguration::resolve(&record)?;

        if record.state().is_none() {
            self.set_state(&mut record, ConfigState::Created, "").await?;
        }

        for component in &self.components {
            let name = component.name();
            let res = component
                .reconcile(self.store.as_ref(), &config)
                .instrument(info_span!("component", component = name))
                .await;
            if let Err(source) = res {
                let err = ReconcileError::Component { component: name, source };
                let message = chain(&err);
                error!(component = name, error = %message, "reconcile failed");
                if let Err(status_err) = self.record_failure(&mut record, &message).await {
                    warn!(
                        state = ConfigState::ReconcileFailed.as_str(),
                        error = %chain(&status_err),
                        "could not record failure on status"
                    );
                }
                return Err(err);
            }
        }

        self.set_state(&mut record, ConfigState::Available, "").await?;
        info!("Linkerd reconciled");
        Ok(PassOutcome::Reconciled)
    }

    async fn set_state(&self, record: &mut Linkerd, state: ConfigState, message: &str) -> Result<(), ReconcileError> {
        update_status(self.store.as_ref(), record, state, message)
            .await
            .map_err(|source| ReconcileError::Status { state, source })
    }

    async fn record_failure(&self, record: &mut Linkerd, message: &str) -> Result<(), ReconcileError> {
        self.set_state(record, ConfigState::ReconcileFailed, message).await
    }

    // Finalizer off with a full update, then the terminal state.
    async fn release(&self, record: &mut Linkerd) -> Result<(), ReconcileError> {
        let key = record_key(record);
        let store_err = |source| ReconcileError::Store { key: key.clone(), source };
        let before = record.finalizers().len();
        record.finalizers_mut().retain(|f| f != FINALIZER);
        if record.finalizers().len() != before {
            let written = self.store.replace(&to_dynamic(record).map_err(store_err)?).await.map_err(store_err)?;
            *record = from_dynamic(written).map_err(store_err)?;
            info!("finalizer removed");
        }
        if record.metadata.deletion_timestamp.is_some() && record.finalizers().is_empty() {
            // The update above may have let the API server finish the delete.
            return match self.set_state(record, ConfigState::Unmanaged, "").await {
                Err(ReconcileError::Status { source: StatusError::Store(e), .. }) if e.is_not_found() => Ok(()),
                other => other,
            };
        }
        self.set_state(record, ConfigState::Unmanaged, "").await
    }

    /// Stop managing the record behind `key`: drop the operator finalizer and
    /// mark it `Unmanaged`. Returns false when the record does not exist.
    pub async fn decommission(&self, key: &ObjectRef) -> Result<bool, ReconcileError> {
        let span = info_span!("decommission", name = %key.name, namespace = key.namespace.as_deref().unwrap_or_default());
        async {
            match self.fetch(key).await? {
                Some(mut record) => {
                    self.release(&mut record).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
        .instrument(span)
        .await
    }

    /// Decommission every record in `namespace` (all namespaces when `None`).
    pub async fn release_all(&self, namespace: Option<&str>) -> Result<usize, ReconcileError> {
        let probe = ObjectRef::for_resource::<Linkerd>(namespace, "");
        let objs = self
            .store
            .list(&probe.api_version, &probe.kind, namespace)
            .await
            .map_err(|source| ReconcileError::Store { key: probe.clone(), source })?;
        let mut released = 0;
        for obj in objs {
            let key = ObjectRef::of(&obj).map_err(|source| ReconcileError::Store { key: probe.clone(), source })?;
            if self.decommission(&key).await? {
                released += 1;
            }
        }
        Ok(released)
    }
}
