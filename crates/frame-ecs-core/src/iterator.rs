//! Walking the past entity array and writing future components.
//!
//! Fetches a variable-width slice per component type from the sparse
//! counts/offsets arrays, and reuses the sorted-entity binary-search idiom
//! already used by [`crate::game_state`]'s `find_row` for [`Context`]'s
//! direct past lookups.

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::game_state::{commit_future_write, reserve_future_write, GameState};

/// One step of an [`EntityIterator`] walk: an alive past entity, its row in
/// `past.entities`, and the row it occupies in `future.entities` (which only
/// contains the alive subset, in the same relative order).
#[derive(Debug, Clone, Copy)]
pub struct EntityCursor {
    pub entity_id: EntityId,
    pub past_row: usize,
    pub future_row: usize,
}

impl EntityCursor {
    /// The past components of `type_id` this entity owns (possibly empty).
    pub fn past_components<'a>(&self, past: &'a GameState, type_id: ComponentTypeId) -> &'a [u8] {
        match past.storage(type_id) {
            Some(storage) => storage.slice(self.past_row),
            None => &[],
        }
    }

    /// How many components of `type_id` this entity owns in `past`.
    pub fn past_count(&self, past: &GameState, type_id: ComponentTypeId) -> u32 {
        past.storage(type_id).map_or(0, |s| s.count(self.past_row))
    }

    /// Reserve room for `n` future components of `type_id` for this entity
    /// and return the writable slice. The caller fills it in and then calls
    /// [`EntityCursor::commit_future`] with however many it actually wrote.
    pub fn reserve_future<'a>(
        &self,
        future: &'a mut GameState,
        type_id: ComponentTypeId,
        n: usize,
    ) -> &'a mut [u8] {
        reserve_future_write(future, type_id, n)
    }

    /// Commit `n` future components of `type_id` reserved for this entity by
    /// a prior [`EntityCursor::reserve_future`] call.
    pub fn commit_future(&self, future: &mut GameState, type_id: ComponentTypeId, n: usize) {
        commit_future_write(future, type_id, self.future_row, n);
    }
}

/// Walks `past`'s entity array in order, skipping dead entities without
/// invoking any Process on them -- they are not present in the future
/// entity array at all -- and tracks the row each surviving entity occupies
/// in the future array.
pub struct EntityIterator<'a> {
    past: &'a GameState,
    past_row: usize,
    future_row: usize,
}

impl<'a> EntityIterator<'a> {
    pub fn new(past: &'a GameState) -> Self {
        Self {
            past,
            past_row: 0,
            future_row: 0,
        }
    }
}

impl<'a> Iterator for EntityIterator<'a> {
    type Item = EntityCursor;

    fn next(&mut self) -> Option<EntityCursor> {
        while self.past_row < self.past.len() {
            let row = self.past_row;
            self.past_row += 1;
            if self.past.is_alive_at(row) {
                let future_row = self.future_row;
                self.future_row += 1;
                return Some(EntityCursor {
                    entity_id: self.past.entities()[row],
                    past_row: row,
                    future_row,
                });
            }
        }
        None
    }
}

/// Direct past-state access by entity ID, for processes that need to read
/// an entity other than the one currently being processed, e.g. a spawner
/// reading its spawn point's `Position`.
pub struct Context<'a> {
    past: &'a GameState,
}

impl<'a> Context<'a> {
    pub fn new(past: &'a GameState) -> Self {
        Self { past }
    }

    /// The past components of `type_id` owned by `entity`.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not present in this past state at all --
    /// requesting an unknown ID is a programming fault, not a runtime
    /// condition a caller is expected to handle.
    pub fn components(&self, entity: EntityId, type_id: ComponentTypeId) -> &'a [u8] {
        let row = self.find_row_or_panic(entity);
        self.past.storage(type_id).map_or(&[][..], |s| s.slice(row))
    }

    /// How many components of `type_id` `entity` owns in this past state.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is not present in this past state at all (see
    /// [`Context::components`]).
    pub fn count(&self, entity: EntityId, type_id: ComponentTypeId) -> u32 {
        let row = self.find_row_or_panic(entity);
        self.past.storage(type_id).map_or(0, |s| s.count(row))
    }

    fn find_row_or_panic(&self, entity: EntityId) -> usize {
        self.past
            .find_row(entity)
            .expect("Context: direct access to an unknown entity ID is a programming fault")
    }
}
