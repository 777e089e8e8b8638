//! A per-component-type byte buffer with an append/commit protocol.
//!
//! A flat, growable region of raw bytes sized to one component type. Every
//! access goes through a borrow of `&mut ComponentBuffer`, so Rust's borrow
//! checker already enforces the "a forced grow invalidates prior write
//! slices" rule for free -- no raw pointers or `unsafe` are needed.

use tracing::warn;

use crate::component::ComponentTypeId;

/// Default growth multiplier applied when the uncommitted region is too
/// small and a buffer must be reallocated mid-frame.
pub const DEFAULT_REALLOC_MULT: f64 = 2.5;

/// A growable, type-erased byte buffer for one component type.
///
/// Invariant: `data.len() == allocated_components() * component_size`.
/// Invariant: `committed_components * component_size == committed_bytes()`.
#[derive(Debug)]
pub struct ComponentBuffer {
    type_id: ComponentTypeId,
    component_size: usize,
    committed_components: usize,
    data: Vec<u8>,
    realloc_mult: f64,
    enabled: bool,
    /// Number of forced-grow events since the buffer was created; exposed
    /// for diagnostics/tests, not part of the public contract.
    grow_events: usize,
}

impl ComponentBuffer {
    /// Construct a disabled buffer; call [`enable`](Self::enable) before use.
    pub fn new() -> Self {
        Self {
            type_id: crate::component::NULL_TYPE,
            component_size: 0,
            committed_components: 0,
            data: Vec::new(),
            realloc_mult: DEFAULT_REALLOC_MULT,
            enabled: false,
            grow_events: 0,
        }
    }

    /// One-shot setup. Panics if already enabled.
    pub fn enable(&mut self, type_id: ComponentTypeId, component_size: usize) {
        assert!(!self.enabled, "ComponentBuffer already enabled");
        self.type_id = type_id;
        self.component_size = component_size;
        self.enabled = true;
    }

    /// Override the growth multiplier (must stay > 1.0 to make progress).
    pub fn set_realloc_mult(&mut self, mult: f64) {
        assert!(mult > 1.0, "realloc_mult must be > 1.0");
        self.realloc_mult = mult;
    }

    /// Number of components currently committed.
    #[inline]
    pub fn committed_components(&self) -> usize {
        self.committed_components
    }

    /// Number of components the current allocation can hold.
    #[inline]
    pub fn allocated_components(&self) -> usize {
        if self.component_size == 0 {
            0
        } else {
            self.data.len() / self.component_size
        }
    }

    #[inline]
    fn committed_bytes(&self) -> usize {
        self.committed_components * self.component_size
    }

    /// How many forced-grow events this buffer has undergone.
    pub fn grow_event_count(&self) -> usize {
        self.grow_events
    }

    /// Byte size of one component of this buffer's type.
    #[inline]
    pub fn component_size(&self) -> usize {
        self.component_size
    }

    /// Reserve space for at least `min_components`, without logging a
    /// warning -- this is the deliberate preallocation path, distinct from
    /// the forced-grow path taken when a writer runs out of room mid-frame.
    pub fn preallocate(&mut self, min_components: usize) {
        if self.allocated_components() < min_components {
            self.grow_to(min_components);
        }
    }

    fn grow_to(&mut self, new_allocated_components: usize) {
        let new_len = new_allocated_components * self.component_size;
        self.data.resize(new_len, 0);
    }

    /// The `[committed_bytes, allocated_bytes)` scratch region.
    pub fn uncommitted_space(&mut self) -> &mut [u8] {
        let start = self.committed_bytes();
        &mut self.data[start..]
    }

    /// Like [`uncommitted_space`](Self::uncommitted_space), but grows the
    /// buffer first if fewer than `min_components` fit in the current
    /// scratch region. Logs a warning once per growth event.
    pub fn force_uncommitted_space(&mut self, min_components: usize) -> &mut [u8] {
        let available = self.allocated_components() - self.committed_components;
        if available < min_components {
            let old_allocated = self.allocated_components();
            let grown = ((old_allocated as f64) * self.realloc_mult) as usize;
            let new_allocated = grown.max(self.committed_components + min_components);
            warn!(
                component_type = self.type_id.0,
                old_allocated_components = old_allocated,
                new_allocated_components = new_allocated,
                "component buffer reallocated mid-frame; prior write slices are invalidated. \
                 Consider raising min_prealloc/min_prealloc_per_entity for this type."
            );
            self.grow_to(new_allocated);
            self.grow_events += 1;
        }
        self.uncommitted_space()
    }

    /// Advance the committed count by `n`. Panics if that would exceed the
    /// current allocation.
    pub fn commit(&mut self, n: usize) {
        assert!(
            self.committed_components + n <= self.allocated_components(),
            "commit({}) exceeds allocated components ({} committed, {} allocated)",
            n,
            self.committed_components,
            self.allocated_components()
        );
        self.committed_components += n;
    }

    /// Copy a single prebuilt component into the buffer and commit it.
    pub fn add_component(&mut self, raw: &[u8]) {
        assert_eq!(raw.len(), self.component_size, "component size mismatch");
        let dst = self.force_uncommitted_space(1);
        dst[..raw.len()].copy_from_slice(raw);
        self.commit(1);
    }

    /// The committed region, read-only.
    pub fn committed_space(&self) -> &[u8] {
        &self.data[..self.committed_bytes()]
    }

    /// Mutable access to the committed region (used by processes that
    /// overwrite components in place rather than appending, e.g. a
    /// future-buffer writer revisiting its own just-written slot).
    pub fn committed_space_mut(&mut self) -> &mut [u8] {
        let end = self.committed_bytes();
        &mut self.data[..end]
    }

    /// Zero all bytes and reset the committed count to 0. Called on the
    /// future buffer at the start of every frame.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
        self.committed_components = 0;
    }
}

impl Default for ComponentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentTypeId;

    fn enabled_buffer(component_size: usize) -> ComponentBuffer {
        let mut buf = ComponentBuffer::new();
        buf.enable(ComponentTypeId(40), component_size);
        buf
    }

    #[test]
    fn commit_tracks_count() {
        let mut buf = enabled_buffer(4);
        buf.preallocate(10);
        let slice = buf.force_uncommitted_space(3);
        slice[0..4].copy_from_slice(&1i32.to_ne_bytes());
        buf.commit(1);
        assert_eq!(buf.committed_components(), 1);
        assert_eq!(buf.committed_space().len(), 4);
    }

    #[test]
    #[should_panic(expected = "exceeds allocated")]
    fn commit_beyond_allocated_panics() {
        let mut buf = enabled_buffer(4);
        buf.preallocate(1);
        buf.commit(2);
    }

    #[test]
    fn forced_grow_preserves_committed_data() {
        let mut buf = enabled_buffer(4);
        buf.preallocate(1);
        buf.add_component(&42i32.to_ne_bytes());
        assert_eq!(buf.grow_event_count(), 0);
        // No room left; this should trigger a grow event.
        buf.add_component(&7i32.to_ne_bytes());
        assert_eq!(buf.grow_event_count(), 1);
        let first: [u8; 4] = buf.committed_space()[0..4].try_into().unwrap();
        assert_eq!(i32::from_ne_bytes(first), 42);
        let second: [u8; 4] = buf.committed_space()[4..8].try_into().unwrap();
        assert_eq!(i32::from_ne_bytes(second), 7);
    }

    #[test]
    fn reset_zeroes_and_clears_committed() {
        let mut buf = enabled_buffer(4);
        buf.preallocate(4);
        buf.add_component(&99i32.to_ne_bytes());
        buf.reset();
        assert_eq!(buf.committed_components(), 0);
        assert!(buf.committed_space().is_empty());
        // Uncommitted region is zeroed too.
        let scratch = buf.uncommitted_space();
        assert!(scratch.iter().all(|&b| b == 0));
    }

    #[test]
    fn sum_counts_equals_committed() {
        let mut buf = enabled_buffer(4);
        buf.preallocate(4);
        for i in 0..4i32 {
            buf.add_component(&i.to_ne_bytes());
        }
        assert_eq!(buf.committed_components(), 4);
        assert_eq!(buf.grow_event_count(), 0);
    }
}
