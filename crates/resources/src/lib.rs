//! Resource builders: pure functions from an [`EffectiveConfiguration`] to the
//! managed objects of one subsystem. Nothing here talks to the cluster.

#![forbid(unsafe_code)]

use meshop_core::{DesiredState, EffectiveConfiguration};
use meshop_kubehub::ManagedResource;

pub mod controller;
pub mod destination;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod prometheus;
pub mod proxy_injector;
pub mod psp;
pub mod serviceprofile;
pub mod tap;
pub mod templates;
pub mod trafficsplit;
pub mod web;

pub use error::BuildError;

pub type Builder = fn(&EffectiveConfiguration) -> Result<ManagedResource, BuildError>;

/// One managed object of a subsystem together with its existence tag.
#[derive(Clone, Copy)]
pub struct Production {
    pub resource: &'static str,
    pub build: Builder,
    pub state: DesiredState,
}

impl std::fmt::Debug for Production {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Production").field("resource", &self.resource).field("state", &self.state).finish()
    }
}

/// Ordered productions of one subsystem. Order is the sync order.
#[derive(Debug, Clone)]
pub struct Subsystem {
    pub name: &'static str,
    pub state: DesiredState,
    pub productions: Vec<Production>,
}

impl Subsystem {
    pub fn new(name: &'static str) -> Self {
        Self { name, state: DesiredState::Present, productions: Vec::new() }
    }

    pub fn present(self, resource: &'static str, build: Builder) -> Self {
        self.with(resource, build, DesiredState::Present)
    }

    pub fn absent(self, resource: &'static str, build: Builder) -> Self {
        self.with(resource, build, DesiredState::Absent)
    }

    pub fn with(mut self, resource: &'static str, build: Builder, state: DesiredState) -> Self {
        self.productions.push(Production { resource, build, state });
        self
    }

    /// Toggle the whole subsystem. A resource marked absent stays absent.
    pub fn with_state(mut self, state: DesiredState) -> Self {
        self.state = state;
        self
    }

    pub fn effective_state(&self, production: &Production) -> DesiredState {
        production.state.combine(self.state)
    }

    /// Build every object up front, in sync order.
    pub fn render(&self, config: &EffectiveConfiguration) -> Result<Vec<(ManagedResource, DesiredState)>, BuildError> {
        self.productions
            .iter()
            .map(|p| Ok(((p.build)(config)?, self.effective_state(p))))
            .collect()
    }
}

/// Every control-plane subsystem in pass order. Later subsystems may depend on
/// objects made by earlier ones (the shared `linkerd-config` comes first).
pub fn default_subsystems() -> Vec<Subsystem> {
    vec![
        controller::subsystem(),
        destination::subsystem(),
        heartbeat::subsystem(),
        identity::subsystem(),
        prometheus::subsystem(),
        proxy_injector::subsystem(),
        web::subsystem(),
        tap::subsystem(),
        psp::subsystem(),
    ]
}

/// Schema extensions that are defined but kept out of [`default_subsystems`].
pub fn reserved_subsystems() -> Vec<Subsystem> {
    vec![serviceprofile::subsystem(), trafficsplit::subsystem()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_order_starts_with_shared_config_owner() {
        let names: Vec<_> = default_subsystems().iter().map(|s| s.name).collect();
        assert_eq!(names.first(), Some(&controller::COMPONENT));
        assert_eq!(names.last(), Some(&psp::SUBSYSTEM));
        assert_eq!(names.len(), 9);
        let reserved: Vec<_> = reserved_subsystems().iter().map(|s| s.name).collect();
        assert!(reserved.iter().all(|r| !names.contains(r)));
    }
}
