use async_trait::async_trait;
use meshop_apply::{ensure, SyncOutcome};
use meshop_core::EffectiveConfiguration;
use meshop_kubehub::ClusterStore;
use meshop_resources::Subsystem;
use tracing::info;

use crate::error::ComponentError;

/// Per-outcome counts for one subsystem run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub absent: usize,
}

impl ComponentReport {
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Deleted => self.deleted += 1,
            SyncOutcome::Absent => self.absent += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.deleted + self.absent
    }
}

/// One subsystem of the control plane, driven through the sync primitive.
#[async_trait]
pub trait ComponentReconciler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sync every resource of the subsystem in order, stopping at the first error.
    async fn reconcile(&self, store: &dyn ClusterStore, config: &EffectiveConfiguration) -> Result<ComponentReport, ComponentError>;
}

/// A [`Subsystem`] descriptor as a reconciler.
#[derive(Debug, Clone)]
pub struct Component {
    subsystem: Subsystem,
}

impl Component {
    pub fn new(subsystem: Subsystem) -> Self {
        Self { subsystem }
    }

    pub fn subsystem(&self) -> &Subsystem {
        &self.subsystem
    }
}

impl From<Subsystem> for Component {
    fn from(subsystem: Subsystem) -> Self {
        Self::new(subsystem)
    }
}

#[async_trait]
impl ComponentReconciler for Component {
    fn name(&self) -> &'static str {
        self.subsystem.name
    }

    async fn reconcile(&self, store: &dyn ClusterStore, config: &EffectiveConfiguration) -> Result<ComponentReport, ComponentError> {
        info!("Reconciling");
        let mut report = ComponentReport::default();
        for production in &self.subsystem.productions {
            let resource = (production.build)(config)
                .map_err(|source| ComponentError::Build { resource: production.resource, source })?;
            let outcome = ensure(store, &resource, self.subsystem.effective_state(production)).await?;
            report.record(outcome);
        }
        info!(created = report.created, updated = report.updated, deleted = report.deleted, "Reconciled");
        Ok(report)
    }
}
