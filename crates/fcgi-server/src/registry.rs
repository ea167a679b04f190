//! Role Registry: a fixed table from role id to role factory.
//!
//! Built once at startup and shared read-only by every connection. Ids with
//! no factory (including ids beyond the table) resolve to
//! [`RoleSlot::Unsupported`].

use std::sync::Arc;

use fcgi_protocol::RoleKind;
use fcgi_roles::{RoleFactory, authorizer, responder};
use tracing::info;

/// One more than the largest standard role id.
const TABLE_SIZE: usize = 4;

static UNSUPPORTED: RoleSlot = RoleSlot::Unsupported;

#[derive(Clone)]
pub enum RoleSlot {
    Supported(Arc<dyn RoleFactory>),
    Unsupported,
}

impl RoleSlot {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }
}

impl std::fmt::Debug for RoleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supported(_) => f.write_str("Supported"),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleRegistry {
    slots: [RoleSlot; TABLE_SIZE],
}

impl RoleRegistry {
    /// A registry with every role unsupported.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| RoleSlot::Unsupported),
        }
    }

    /// Responder and authorizer built-ins. FILTER stays unsupported.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(RoleKind::Responder, responder::factory);
        registry.register(RoleKind::Authorizer, authorizer::factory);
        registry
    }

    pub fn register<F: RoleFactory>(&mut self, kind: RoleKind, factory: F) {
        self.register_shared(kind, Arc::new(factory));
    }

    pub fn register_shared(&mut self, kind: RoleKind, factory: Arc<dyn RoleFactory>) {
        info!("Registering role: {kind:?}");
        self.slots[usize::from(kind.id())] = RoleSlot::Supported(factory);
    }

    pub fn unregister(&mut self, kind: RoleKind) {
        self.slots[usize::from(kind.id())] = RoleSlot::Unsupported;
    }

    pub fn resolve(&self, role_id: u16) -> &RoleSlot {
        self.slots.get(usize::from(role_id)).unwrap_or(&UNSUPPORTED)
    }

    /// Roles with a registered factory, in id order.
    pub fn supported(&self) -> Vec<RoleKind> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_supported())
            .filter_map(|(id, _)| u16::try_from(id).ok().and_then(RoleKind::from_id))
            .collect()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table() {
        let registry = RoleRegistry::builtin();
        assert!(registry.resolve(RoleKind::Responder.id()).is_supported());
        assert!(registry.resolve(RoleKind::Authorizer.id()).is_supported());
        assert!(!registry.resolve(RoleKind::Filter.id()).is_supported());
        assert_eq!(
            registry.supported(),
            vec![RoleKind::Responder, RoleKind::Authorizer]
        );
    }

    #[test]
    fn out_of_table_ids_are_unsupported() {
        let registry = RoleRegistry::builtin();
        for id in [0, 4, 99, u16::MAX] {
            assert!(matches!(registry.resolve(id), RoleSlot::Unsupported));
        }
    }

    #[test]
    fn unregister_empties_the_slot() {
        let mut registry = RoleRegistry::builtin();
        registry.unregister(RoleKind::Authorizer);
        assert_eq!(registry.supported(), vec![RoleKind::Responder]);
    }
}
