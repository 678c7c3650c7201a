//! Status state machine: conflict-safe writes of `{Status, ErrorMessage}`.

use kube::ResourceExt;
use meshop_core::{ConfigState, Linkerd, LinkerdStatus};
use meshop_kubehub::{from_dynamic, to_dynamic, ClusterStore, ObjectRef, StoreError};
use tracing::{debug, info};

use crate::error::StatusError;

pub fn record_key(record: &Linkerd) -> ObjectRef {
    ObjectRef::for_resource::<Linkerd>(record.namespace().as_deref(), record.name_any())
}

// Status subresource first; a record without one takes a full-object update.
async fn write(store: &dyn ClusterStore, record: &Linkerd) -> Result<Linkerd, StoreError> {
    let obj = to_dynamic(record)?;
    let written = match store.replace_status(&obj).await {
        Err(StoreError::NotFound(_)) => {
            debug!("no status subresource; updating whole record");
            store.replace(&obj).await?
        }
        other => other?,
    };
    from_dynamic(written)
}

fn stage(record: &mut Linkerd, state: ConfigState, message: &str) -> Result<(), StatusError> {
    if let Some(from) = record.state() {
        if !ConfigState::permits(Some(from), state) {
            return Err(StatusError::Forbidden { from, to: state });
        }
    }
    record.status = Some(LinkerdStatus::new(state, message));
    Ok(())
}

/// Persist `state` and `message` on `record`.
///
/// A conflict refetches the record, restages the status and retries once; a
/// second conflict is returned as [`StatusError::RepeatedConflict`]. On
/// success `record` is replaced by the written object, so later writes in the
/// same pass carry the new resourceVersion.
pub async fn update_status(
    store: &dyn ClusterStore,
    record: &mut Linkerd,
    state: ConfigState,
    message: &str,
) -> Result<(), StatusError> {
    stage(record, state, message)?;
    let written = match write(store, record).await {
        Ok(w) => w,
        Err(StoreError::Conflict(_)) => {
            debug!(state = state.as_str(), "status conflict; refetching record");
            let fresh = store.get(&record_key(record)).await?;
            *record = from_dynamic(fresh)?;
            stage(record, state, message)?;
            match write(store, record).await {
                Ok(w) => w,
                Err(e @ StoreError::Conflict(_)) => return Err(StatusError::RepeatedConflict(e)),
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) => return Err(e.into()),
    };
    *record = written;
    info!(state = state.as_str(), "Linkerd state updated");
    Ok(())
}
