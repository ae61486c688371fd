//! Entity traits: identity + continuity across state changes.

use crate::audit::{AuditStamp, LifecycleState};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// An entity carrying an audit stamp and a soft lifecycle state.
pub trait Audited: Entity {
    fn audit(&self) -> &AuditStamp;

    fn state(&self) -> LifecycleState;

    fn is_active(&self) -> bool {
        self.state().is_active()
    }
}

/// Find an entity by id in an owned collection.
pub fn find_by_id<'a, E: Entity>(entities: &'a [E], id: &E::Id) -> Option<&'a E> {
    entities.iter().find(|e| e.id() == id)
}

/// Active members of a collection, in stored order.
pub fn active<E: Audited>(entities: &[E]) -> impl Iterator<Item = &E> {
    entities.iter().filter(|e| e.is_active())
}
