//! The fixed subsystem order of a reconcile pass.

use std::sync::Arc;

use meshop_resources::{
    controller, default_subsystems, destination, heartbeat, identity, prometheus, proxy_injector, psp,
    reserved_subsystems, tap, web, Subsystem,
};

use crate::component::{Component, ComponentReconciler};

/// Names in pass order, as produced by [`default_subsystems`].
pub const DEFAULT_ORDER: [&str; 9] = [
    controller::COMPONENT,
    destination::COMPONENT,
    heartbeat::COMPONENT,
    identity::COMPONENT,
    prometheus::COMPONENT,
    proxy_injector::COMPONENT,
    web::COMPONENT,
    tap::COMPONENT,
    psp::SUBSYSTEM,
];

fn components(subsystems: Vec<Subsystem>) -> Vec<Arc<dyn ComponentReconciler>> {
    subsystems.into_iter().map(|s| Arc::new(Component::new(s)) as Arc<dyn ComponentReconciler>).collect()
}

pub fn default_order() -> Vec<Arc<dyn ComponentReconciler>> {
    components(default_subsystems())
}

/// Defined but kept out of [`default_order`].
pub fn reserved() -> Vec<Arc<dyn ComponentReconciler>> {
    components(reserved_subsystems())
}
