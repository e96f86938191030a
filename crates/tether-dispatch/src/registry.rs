//! Dispatch table mapping destination ids and action names to modules.
//!
//! The [`HandlerRegistry`] is filled once by the composition root during
//! bootstrap and then frozen behind an `Arc`, so lookups on the dispatch
//! thread need no locking. Registering a second module under an id or action
//! that is already bound replaces the earlier module; the replacement is
//! logged because it is as likely to be a wiring mistake as an intentional
//! re-registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::module::{DestinationId, HandlerModule};

pub(crate) const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Lookup table from destination ids and action names to handler modules.
#[derive(Default)]
pub struct HandlerRegistry {
    modules: HashMap<DestinationId, Arc<dyn HandlerModule>>,
    actions: HashMap<String, Arc<dyn HandlerModule>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `module` to the destination `id`, replacing any earlier binding.
    pub fn add_module(&mut self, module: Arc<dyn HandlerModule>, id: impl Into<DestinationId>) {
        let destination = id.into();
        if self.modules.insert(destination, module).is_some() {
            warn!(
                target: REGISTRY_TARGET,
                destination = %destination,
                "replaced module already registered for destination"
            );
        } else {
            debug!(
                target: REGISTRY_TARGET,
                destination = %destination,
                "registered module"
            );
        }
    }

    /// Binds `module` to the external action name, replacing any earlier
    /// binding.
    pub fn register_action(&mut self, action: impl Into<String>, module: Arc<dyn HandlerModule>) {
        let name = action.into();
        if self.actions.contains_key(&name) {
            warn!(
                target: REGISTRY_TARGET,
                action = %name,
                "replaced module already registered for action"
            );
        } else {
            debug!(target: REGISTRY_TARGET, action = %name, "registered action");
        }
        self.actions.insert(name, module);
    }

    /// Looks up the module bound to a destination id.
    #[must_use]
    pub fn module(&self, id: DestinationId) -> Option<&Arc<dyn HandlerModule>> {
        self.modules.get(&id)
    }

    /// Looks up the module bound to an action name.
    #[must_use]
    pub fn action(&self, action: &str) -> Option<&Arc<dyn HandlerModule>> {
        self.actions.get(action)
    }

    /// Iterates every destination binding in unspecified order.
    pub fn modules(&self) -> impl Iterator<Item = (DestinationId, &Arc<dyn HandlerModule>)> {
        self.modules.iter().map(|(id, module)| (*id, module))
    }

    /// Invokes `visit` once per distinct module bound to a destination id.
    ///
    /// A module registered under several ids is visited once.
    pub fn broadcast(&self, mut visit: impl FnMut(&dyn HandlerModule)) {
        let mut seen: Vec<&Arc<dyn HandlerModule>> = Vec::with_capacity(self.modules.len());
        for module in self.modules.values() {
            if seen.iter().any(|visited| Arc::ptr_eq(visited, module)) {
                continue;
            }
            seen.push(module);
            visit(module.as_ref());
        }
    }

    /// Number of destination bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` when no destination is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of action bindings.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut destinations: Vec<_> = self.modules.keys().copied().collect();
        destinations.sort_unstable();
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort_unstable();
        formatter
            .debug_struct("HandlerRegistry")
            .field("destinations", &destinations)
            .field("actions", &actions)
            .finish()
    }
}
