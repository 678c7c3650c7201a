//! Watch glue: a kube-runtime controller over `Linkerd` records that owns the
//! workload kinds the subsystems create.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use meshop_core::Linkerd;
use meshop_kubehub::WatchScope;
use tracing::{debug, info, warn};

use crate::error::{chain, ReconcileError};
use crate::pass::Reconciler;
use crate::status::record_key;

pub struct Context {
    pub reconciler: Reconciler,
    pub requeue_after: Duration,
}

async fn reconcile(record: Arc<Linkerd>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    // The cached object may be stale; the pass refetches by identity.
    let outcome = ctx.reconciler.reconcile_pass(&record_key(&record)).await?;
    debug!(name = %record.name_any(), outcome = outcome.as_str(), "pass finished");
    Ok(Action::await_change())
}

fn error_policy(record: Arc<Linkerd>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(
        name = %record.name_any(),
        namespace = record.namespace().unwrap_or_default(),
        error = %chain(err),
        "reconcile failed; requeueing"
    );
    Action::requeue(ctx.requeue_after)
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run until a shutdown signal arrives.
pub async fn run(client: Client, scope: &WatchScope, ctx: Arc<Context>) {
    let ns = scope.namespace();
    info!(namespace = ns.unwrap_or("<all>"), "starting Linkerd controller");
    let cfg = watcher::Config::default;
    Controller::new(scoped::<Linkerd>(&client, ns), cfg())
        .owns(scoped::<Deployment>(&client, ns), cfg())
        .owns(scoped::<Service>(&client, ns), cfg())
        .owns(scoped::<ConfigMap>(&client, ns), cfg())
        .owns(scoped::<Secret>(&client, ns), cfg())
        .owns(scoped::<ServiceAccount>(&client, ns), cfg())
        .owns(scoped::<CronJob>(&client, ns), cfg())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!("Linkerd controller stopped");
}
