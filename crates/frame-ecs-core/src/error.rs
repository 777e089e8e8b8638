//! Crate-wide error types.
//!
//! Per the error-handling design: configuration mistakes (duplicate writer,
//! registration after lock, ...) are programming faults and abort via
//! `panic!` at the call site that detects them. Capacity exhaustion
//! (`add_entity`'s per-frame cap) and unknown-ID lookups (`Context`'s direct
//! access) are likewise not modeled as `Result`s here: the spec treats the
//! former as a null return and the latter as a caller bug, so `add_entity`
//! returns `Option<EntityId>` and `Context` returns `Option<&[u8]>` directly
//! rather than this enum. Only component-load and resource-load failures,
//! where the caller genuinely has a recovery path, are modeled here.

use crate::component::ComponentTypeId;

/// Errors surfaced to callers at runtime (not programming faults).
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A mandatory component property was missing from a `Source` value.
    #[error("entity load failed: missing required property '{property}' on component '{component}'")]
    MissingProperty {
        /// The component type name.
        component: String,
        /// The property name that was required but absent.
        property: String,
    },

    /// A property value could not be read from the `Source`.
    #[error("entity load failed: could not read property '{property}' on component '{component}': {details}")]
    UnreadableProperty {
        /// The component type name.
        component: String,
        /// The property name.
        property: String,
        /// Human-readable detail from the `Source` implementation.
        details: String,
    },

    /// A multi-component entry declared a component count outside
    /// `[0, maxPerEntity]`.
    #[error("component type {type_id:?} multi-count {count} exceeds maxPerEntity {max}")]
    MultiCountOutOfRange {
        /// The offending component type.
        type_id: ComponentTypeId,
        /// The count that was requested.
        count: usize,
        /// The type's `maxPerEntity` bound.
        max: usize,
    },
}

/// Errors a [`crate::resource::ResourceManager`] may report for a handle.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// `resource()` was called on a handle that is not `Loaded`.
    #[error("resource is not loaded (current state: {state:?})")]
    NotLoaded {
        /// The handle's current state.
        state: crate::resource::ResourceState,
    },

    /// The backing load operation failed.
    #[error("resource load failed: {details}")]
    LoadFailed {
        /// Human-readable detail about the failure.
        details: String,
    },
}
