//! Entity identifiers and allocation.
//!
//! An [`EntityId`] is a plain 32-bit handle. Unlike a generational ID, it
//! carries no recycling information: per the data model, IDs are issued by a
//! monotonic counter and are never reused within a run, so staleness can
//! only mean "never allocated" or "not alive in this state", never "index
//! reused by someone else".

use std::fmt;

/// Sentinel value reserved to mean "no entity".
pub const NULL_ENTITY: u32 = u32::MAX;

/// A 32-bit entity identifier. `EntityId::NULL` is reserved and never
/// allocated.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// The reserved null entity ID.
    pub const NULL: EntityId = EntityId(NULL_ENTITY);

    /// Wrap a raw ID. Does not validate liveness.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the reserved null ID.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == NULL_ENTITY
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "EntityId(null)")
        } else {
            write!(f, "EntityId({})", self.0)
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Issues monotonically increasing [`EntityId`]s starting at 1. Never
/// recycles an index within the lifetime of the allocator.
#[derive(Debug)]
pub struct EntityIdAllocator {
    next: u32,
}

impl EntityIdAllocator {
    /// Create a fresh allocator; the first ID it issues is `1`.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next ID.
    ///
    /// # Panics
    ///
    /// Panics if the counter would wrap into the reserved null value. This
    /// is a programming fault (the run has created `u32::MAX - 1` entities).
    pub fn allocate(&mut self) -> EntityId {
        assert!(
            self.next != NULL_ENTITY,
            "entity ID space exhausted (this is a programming fault, not a runtime condition)"
        );
        let id = EntityId(self.next);
        self.next += 1;
        id
    }
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_id_is_one() {
        let mut alloc = EntityIdAllocator::new();
        assert_eq!(alloc.allocate().raw(), 1);
        assert_eq!(alloc.allocate().raw(), 2);
    }

    #[test]
    fn ids_never_repeat() {
        let mut alloc = EntityIdAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let id = alloc.allocate();
            assert!(seen.insert(id.raw()), "ID {} issued twice", id.raw());
        }
    }

    #[test]
    fn null_is_reserved_and_distinct() {
        let mut alloc = EntityIdAllocator::new();
        let id = alloc.allocate();
        assert!(!id.is_null());
        assert!(EntityId::NULL.is_null());
        assert_ne!(id, EntityId::NULL);
    }
}
