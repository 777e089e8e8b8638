//! Double-buffered frame state.
//!
//! A [`GameState`] is one half of the past/future pair: an entity array
//! sorted by ID and, for every registered component type, a
//! [`ComponentBuffer`] plus parallel `counts`/`offsets` arrays giving each
//! entity's slice within that buffer.
//!
//! Unlike an archetype-based layout (one table per unique component set,
//! with migration on insert/remove), one `GameState` holds every type's
//! buffer up front and tracks each entity's slice sparsely via
//! `counts`/`offsets` -- there is no archetype migration here.

use tracing::{debug, warn};

use crate::buffer::ComponentBuffer;
use crate::component::{ComponentTypeId, ComponentTypeRegistry, LIFE_TYPE};
use crate::entity::EntityId;
use crate::error::EcsError;
use crate::source::Source;

/// Sentinel offset recorded for an entity that owns zero components of a
/// given type, to make accidental reads of it obvious.
pub const OFFSET_SENTINEL: u32 = u32::MAX;

/// Per-type storage within one [`GameState`]: the byte buffer plus the
/// parallel `counts`/`offsets` arrays (indexed the same way as
/// `GameState::entities`).
#[derive(Debug)]
pub struct PerTypeStorage {
    pub(crate) buffer: ComponentBuffer,
    pub(crate) counts: Vec<u32>,
    pub(crate) offsets: Vec<u32>,
}

impl PerTypeStorage {
    fn new() -> Self {
        Self {
            buffer: ComponentBuffer::new(),
            counts: Vec::new(),
            offsets: Vec::new(),
        }
    }

    /// Number of components the entity at `row` owns of this type.
    pub fn count(&self, row: usize) -> u32 {
        self.counts[row]
    }

    /// Index of the entity's first component of this type within the
    /// buffer, or [`OFFSET_SENTINEL`] if it owns none.
    pub fn offset(&self, row: usize) -> u32 {
        self.offsets[row]
    }

    /// The committed byte buffer for this type.
    pub fn buffer(&self) -> &ComponentBuffer {
        &self.buffer
    }

    /// The byte slice holding the entity at `row`'s components of this
    /// type (possibly empty).
    pub fn slice(&self, row: usize) -> &[u8] {
        let count = self.counts[row] as usize;
        if count == 0 {
            return &[];
        }
        let size = self.buffer.component_size();
        let start = self.offsets[row] as usize * size;
        &self.buffer.committed_space()[start..start + count * size]
    }
}

/// A raw, not-yet-typed component value plus the type it belongs to. Used
/// by [`EntityPrototype`] and by processes appending multi-components.
#[derive(Debug, Clone)]
pub struct RawComponent {
    pub type_id: ComponentTypeId,
    pub bytes: Vec<u8>,
}

/// A not-yet-spawned entity: the raw component values to give it. Multiple
/// entries with the same `type_id` represent multiple instances of a multi
/// component, in order.
#[derive(Debug, Clone, Default)]
pub struct EntityPrototype {
    pub components: Vec<RawComponent>,
}

impl EntityPrototype {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, type_id: ComponentTypeId, bytes: Vec<u8>) -> Self {
        self.components.push(RawComponent { type_id, bytes });
        self
    }
}

/// One half of the past/future double buffer: the sorted entity array and,
/// for every registered type, a [`PerTypeStorage`].
#[derive(Debug)]
pub struct GameState {
    pub(crate) entities: Vec<EntityId>,
    pub(crate) per_type: Vec<PerTypeStorage>,
}

impl GameState {
    /// Build an empty state with a buffer enabled for every registered
    /// type.
    pub fn new(registry: &ComponentTypeRegistry) -> Self {
        let mut per_type: Vec<PerTypeStorage> =
            (0..registry.capacity()).map(|_| PerTypeStorage::new()).collect();
        for info in registry.type_info_all() {
            let slot = &mut per_type[info.id.0 as usize];
            slot.buffer.enable(info.id, info.size);
        }
        Self {
            entities: Vec::new(),
            per_type,
        }
    }

    /// The entity array, sorted by ID.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Binary-search the entity array for `id`, returning its row index.
    pub fn find_row(&self, id: EntityId) -> Option<usize> {
        self.entities.binary_search(&id).ok()
    }

    /// Per-type storage for `type_id`, if that type is registered.
    pub fn storage(&self, type_id: ComponentTypeId) -> Option<&PerTypeStorage> {
        self.per_type.get(type_id.0 as usize)
    }

    pub(crate) fn storage_mut(&mut self, type_id: ComponentTypeId) -> &mut PerTypeStorage {
        &mut self.per_type[type_id.0 as usize]
    }

    /// Whether the entity at `row` is alive, per its `Life` component.
    /// An entity with no `Life` component at all (should not normally
    /// happen once past state is composed by the engine) is treated as
    /// dead.
    pub(crate) fn is_alive_at(&self, row: usize) -> bool {
        let life = &self.per_type[LIFE_TYPE.0 as usize];
        let count = life.counts[row];
        if count == 0 {
            return false;
        }
        let offset = life.offsets[row] as usize;
        life.buffer.committed_space()[offset] != 0
    }

    /// Number of entities currently in this state.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Read `past`'s `Life` components and write surviving entity
/// IDs, in order, into `future.entities`. Resets every future component
/// buffer. Post-condition: `future.entities` holds every alive entity (in
/// original order); `future`'s buffers are empty.
pub fn copy_live_entities_to_future(past: &GameState, future: &mut GameState) {
    future.entities.clear();
    for (row, &id) in past.entities.iter().enumerate() {
        if past.is_alive_at(row) {
            future.entities.push(id);
        }
    }
    for slot in &mut future.per_type {
        slot.buffer.reset();
        slot.counts.clear();
        slot.offsets.clear();
    }
    debug!(
        alive = future.entities.len(),
        total = past.entities.len(),
        "copied alive past entities into future"
    );
}

/// Extend `future`'s entity array by `n` uninitialized slots and
/// grow every per-type `counts`/`offsets` array to match. Returns the index
/// of the first new slot (`entity_count_no_added`), so callers can recover
/// where their new entities landed.
pub fn add_new_entities_no_init(future: &mut GameState, n: usize) -> usize {
    let start = future.entities.len();
    future.entities.resize(start + n, EntityId::NULL);
    for slot in &mut future.per_type {
        slot.counts.resize(start + n, 0);
        slot.offsets.resize(start + n, OFFSET_SENTINEL);
    }
    start
}

/// Materialize pending entities into `past`'s buffers (the
/// actual component data new entities will be read from during this
/// frame), and record their presence in both `past.entities` and
/// `future.entities` at the reserved slot. `reserved_start` is the index
/// returned by a matching `add_new_entities_no_init` call on both states.
pub fn init_new_entities(
    pending: &[(EntityPrototype, EntityId)],
    past: &mut GameState,
    future: &mut GameState,
    reserved_start: usize,
) {
    for (offset, (prototype, id)) in pending.iter().enumerate() {
        let row = reserved_start + offset;
        past.entities[row] = *id;
        future.entities[row] = *id;

        // Group raw components by type so multi-components land
        // contiguously with a single running offset.
        let mut by_type: Vec<(ComponentTypeId, Vec<&[u8]>)> = Vec::new();
        for component in &prototype.components {
            if let Some(entry) = by_type.iter_mut().find(|(t, _)| *t == component.type_id) {
                entry.1.push(&component.bytes);
            } else {
                by_type.push((component.type_id, vec![&component.bytes]));
            }
        }
        // Mandatory Life{alive: true} component.
        by_type.push((LIFE_TYPE, vec![&[1u8]]));

        for (type_id, values) in by_type {
            let slot = past.storage_mut(type_id);
            let offset = slot.buffer.committed_components() as u32;
            for value in &values {
                slot.buffer.add_component(value);
            }
            slot.counts[row] = values.len() as u32;
            slot.offsets[row] = offset;
        }
    }
}

/// For every registered type, reserve space in `future`'s buffer
/// equal to `alloc_mult * max(min_prealloc, min_prealloc_per_entity *
/// entity_count)`, to avoid the forced-grow warning path during execution.
pub fn preallocate(future: &mut GameState, registry: &ComponentTypeRegistry, alloc_mult: f64) {
    assert!(alloc_mult > 0.0, "alloc_mult must be > 0");
    let entity_count = future.entities.len();
    for info in registry.type_info_all() {
        let base = (info.min_prealloc as f64)
            .max(info.min_prealloc_per_entity * entity_count as f64);
        let target = (base * alloc_mult).ceil() as usize;
        future.storage_mut(info.id).buffer.preallocate(target);
    }
}

/// Reserve room for `n` not-yet-committed components of `type_id` in
/// `future`'s buffer, growing it (with the usual forced-grow warning) if
/// necessary, and return the writable slice. The caller must follow up
/// with [`commit_future_write`] for the same `type_id` before reserving
/// again, since the offset recorded there is derived from the buffer's
/// committed count at commit time.
pub fn reserve_future_write<'a>(
    future: &'a mut GameState,
    type_id: ComponentTypeId,
    n: usize,
) -> &'a mut [u8] {
    let slot = future.storage_mut(type_id);
    let size = slot.buffer.component_size();
    let space = slot.buffer.force_uncommitted_space(n);
    &mut space[..n * size]
}

/// Commit `n` components reserved by a prior [`reserve_future_write`] call
/// for the same `type_id`, and record them at `future_row` in that type's
/// `counts`/`offsets` arrays.
pub fn commit_future_write(
    future: &mut GameState,
    type_id: ComponentTypeId,
    future_row: usize,
    n: usize,
) {
    let slot = future.storage_mut(type_id);
    let offset = slot.buffer.committed_components() as u32;
    slot.buffer.commit(n);
    slot.counts[future_row] = n as u32;
    slot.offsets[future_row] = if n == 0 { OFFSET_SENTINEL } else { offset };
}

/// Build an [`EntityPrototype`] from a `Source` document per the
/// component-format convention of §6: the document is a mapping whose keys
/// are registered component names, and each value is itself a mapping of
/// property name to property value (or, for a multi component, a sequence of
/// such per-instance mappings). The mandatory `Life` component is never read
/// from a document -- `init_new_entities` appends it unconditionally.
///
/// # Panics
///
/// Panics if `doc` is not a mapping value.
pub fn load_entity_prototype(registry: &ComponentTypeRegistry, doc: &dyn Source) -> Result<EntityPrototype, EcsError> {
    assert!(doc.is_mapping(), "entity prototype document must be a mapping");
    let mut prototype = EntityPrototype::new();
    for info in registry.type_info_all() {
        if info.id == LIFE_TYPE {
            continue;
        }
        let Some(value) = doc.get_mapping_value(&info.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if info.is_multi && value.is_sequence() {
            let mut index = 0usize;
            while let Some(item) = value.get_sequence_value(index) {
                if index >= info.max_per_entity {
                    return Err(EcsError::MultiCountOutOfRange {
                        type_id: info.id,
                        count: index + 1,
                        max: info.max_per_entity,
                    });
                }
                let bytes = registry.load_component(info.id, &*item)?;
                prototype = prototype.with_component(info.id, bytes);
                index += 1;
            }
        } else {
            let bytes = registry.load_component(info.id, &*value)?;
            prototype = prototype.with_component(info.id, bytes);
        }
    }
    Ok(prototype)
}

/// Debug-warning pass: every registered type should be
/// written by some registered process; `written` lists the types that
/// are. Logs a warning (once) for every type that isn't, since its data
/// will vanish after the entity's first frame.
pub fn warn_unwritten_types(registry: &ComponentTypeRegistry, written: &[ComponentTypeId]) {
    for info in registry.type_info_all() {
        if info.id == LIFE_TYPE {
            continue;
        }
        if !written.contains(&info.id) {
            warn!(
                component_type = info.id.0,
                component_name = %info.name,
                "no registered process writes this component type; its data will vanish after one frame"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TypeOptions;

    fn registry_with_position() -> ComponentTypeRegistry {
        let mut reg = ComponentTypeRegistry::new(64);
        reg.register(
            ComponentTypeId(40),
            "position",
            12,
            TypeOptions::default(),
        );
        reg.lock();
        reg
    }

    fn proto(x: f32, y: f32, z: f32) -> EntityPrototype {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&x.to_ne_bytes());
        bytes.extend_from_slice(&y.to_ne_bytes());
        bytes.extend_from_slice(&z.to_ne_bytes());
        EntityPrototype::new().with_component(ComponentTypeId(40), bytes)
    }

    #[test]
    fn init_new_entities_writes_past_and_both_entity_arrays() {
        let reg = registry_with_position();
        let mut past = GameState::new(&reg);
        let mut future = GameState::new(&reg);

        let id = EntityId::from_raw(1);
        let start = add_new_entities_no_init(&mut past, 1);
        let _ = add_new_entities_no_init(&mut future, 1);
        init_new_entities(&[(proto(1.0, 2.0, 3.0), id)], &mut past, &mut future, start);

        assert_eq!(past.entities(), &[id]);
        assert_eq!(future.entities(), &[id]);

        let pos = past.storage(ComponentTypeId(40)).unwrap();
        assert_eq!(pos.count(0), 1);
        let bytes = &pos.buffer().committed_space()[0..12];
        let x = f32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(x, 1.0);

        let life = past.storage(LIFE_TYPE).unwrap();
        assert_eq!(life.count(0), 1);
        assert!(past.is_alive_at(0));
    }

    #[test]
    fn copy_live_entities_skips_dead() {
        let reg = registry_with_position();
        let mut past = GameState::new(&reg);
        let mut future = GameState::new(&reg);

        let alive_id = EntityId::from_raw(1);
        let dead_id = EntityId::from_raw(2);
        let start = add_new_entities_no_init(&mut past, 2);
        add_new_entities_no_init(&mut future, 2);
        init_new_entities(
            &[(proto(0.0, 0.0, 0.0), alive_id), (proto(0.0, 0.0, 0.0), dead_id)],
            &mut past,
            &mut future,
            start,
        );
        // Kill the second entity's Life flag directly for the test.
        let life = past.storage_mut(LIFE_TYPE);
        let offset = life.offset(1) as usize;
        life.buffer.committed_space_mut()[offset] = 0;

        let mut next_future = GameState::new(&reg);
        copy_live_entities_to_future(&past, &mut next_future);
        assert_eq!(next_future.entities(), &[alive_id]);
    }

    #[test]
    fn preallocate_avoids_forced_grow() {
        let reg = registry_with_position();
        let mut future = GameState::new(&reg);
        add_new_entities_no_init(&mut future, 100);
        preallocate(&mut future, &reg, 1.0);
        let pos = future.storage_mut(ComponentTypeId(40));
        assert!(pos.buffer.allocated_components() > 0);
        assert_eq!(pos.buffer.grow_event_count(), 0);
        for _ in 0..pos.buffer.allocated_components() {
            pos.buffer.add_component(&[0u8; 12]);
        }
        assert_eq!(pos.buffer.grow_event_count(), 0);
    }

    fn f32_loader() -> crate::component::PropertyLoader {
        Box::new(|src, dst| {
            let v = src.as_f64().ok_or_else(|| "expected a number".to_owned())?;
            dst.copy_from_slice(&(v as f32).to_ne_bytes());
            Ok(())
        })
    }

    fn registry_with_loadable_position() -> ComponentTypeRegistry {
        let mut reg = ComponentTypeRegistry::new(64);
        reg.register(
            ComponentTypeId(40),
            "position",
            4,
            TypeOptions {
                properties: vec![crate::component::Property {
                    name: "x".to_owned(),
                    offset: 0,
                    size: 4,
                    attributes: vec![],
                    loader: f32_loader(),
                    add_right_to_left: None,
                }],
                ..Default::default()
            },
        );
        reg.lock();
        reg
    }

    #[test]
    fn load_entity_prototype_reads_component_by_lowercase_name() {
        let reg = registry_with_loadable_position();
        let doc = crate::source::JsonSource::new(serde_json::json!({"position": {"x": 5.0}}));
        let prototype = load_entity_prototype(&reg, &doc).unwrap();
        assert_eq!(prototype.components.len(), 1);
        assert_eq!(prototype.components[0].type_id, ComponentTypeId(40));
        assert_eq!(f32::from_ne_bytes(prototype.components[0].bytes[..].try_into().unwrap()), 5.0);
    }

    #[test]
    fn load_entity_prototype_skips_absent_types() {
        let reg = registry_with_loadable_position();
        let doc = crate::source::JsonSource::new(serde_json::json!({}));
        let prototype = load_entity_prototype(&reg, &doc).unwrap();
        assert!(prototype.components.is_empty());
    }

    #[test]
    fn load_entity_prototype_reads_multi_component_sequence() {
        let mut reg = ComponentTypeRegistry::new(64);
        reg.register(
            ComponentTypeId(41),
            "bullet_hit",
            4,
            TypeOptions {
                is_multi: true,
                max_per_entity: 4,
                properties: vec![crate::component::Property {
                    name: "damage".to_owned(),
                    offset: 0,
                    size: 4,
                    attributes: vec![],
                    loader: f32_loader(),
                    add_right_to_left: None,
                }],
                ..Default::default()
            },
        );
        reg.lock();
        let doc = crate::source::JsonSource::new(serde_json::json!({
            "bullet_hit": [{"damage": 1.0}, {"damage": 2.0}],
        }));
        let prototype = load_entity_prototype(&reg, &doc).unwrap();
        assert_eq!(prototype.components.len(), 2);
        assert_eq!(f32::from_ne_bytes(prototype.components[0].bytes[..].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_ne_bytes(prototype.components[1].bytes[..].try_into().unwrap()), 2.0);
    }

    #[test]
    fn load_entity_prototype_rejects_multi_component_overflow() {
        let mut reg = ComponentTypeRegistry::new(64);
        reg.register(
            ComponentTypeId(41),
            "bullet_hit",
            4,
            TypeOptions {
                is_multi: true,
                max_per_entity: 1,
                properties: vec![crate::component::Property {
                    name: "damage".to_owned(),
                    offset: 0,
                    size: 4,
                    attributes: vec![],
                    loader: f32_loader(),
                    add_right_to_left: None,
                }],
                ..Default::default()
            },
        );
        reg.lock();
        let doc = crate::source::JsonSource::new(serde_json::json!({
            "bullet_hit": [{"damage": 1.0}, {"damage": 2.0}],
        }));
        let err = load_entity_prototype(&reg, &doc).unwrap_err();
        assert!(matches!(err, EcsError::MultiCountOutOfRange { .. }));
    }
}
