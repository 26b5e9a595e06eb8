// Module registry
//
// Single source of truth for "who to notify". Keeps a flat list in
// registration order (deterministic fan-out) plus a per-kind grouping.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::traits::{ModuleHandle, ModuleKind};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct ModuleRegistry {
    /// All modules, in registration order.
    modules: Vec<ModuleHandle>,
    /// Registration-ordered grouping by kind.
    by_kind: IndexMap<ModuleKind, Vec<ModuleHandle>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module. The same instance may be registered once only,
    /// regardless of the kind it is offered under.
    pub fn register(&mut self, module: ModuleHandle) -> Result<()> {
        if let Some(existing) = self.modules.iter().find(|m| m.same_instance(&module)) {
            warn!(
                kind = %module.kind(),
                registered_as = %existing.kind(),
                "rejecting duplicate module registration"
            );
            return Err(Error::ModuleAlreadyRegistered);
        }

        debug!(kind = %module.kind(), name = %module.as_module().name(), "module registered");
        self.by_kind
            .entry(module.kind())
            .or_default()
            .push(module.clone());
        self.modules.push(module);
        Ok(())
    }

    /// Remove a module from both indexes.
    pub fn unregister(&mut self, module: &ModuleHandle) -> Result<()> {
        let Some(pos) = self.modules.iter().position(|m| m.same_instance(module)) else {
            return Err(Error::ModuleNotFound);
        };
        let removed = self.modules.remove(pos);
        if let Some(group) = self.by_kind.get_mut(&removed.kind()) {
            group.retain(|m| !m.same_instance(&removed));
        }
        debug!(kind = %removed.kind(), "module unregistered");
        Ok(())
    }

    /// Modules of one kind, in registration order.
    #[must_use]
    pub fn of_kind(&self, kind: ModuleKind) -> Vec<ModuleHandle> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
