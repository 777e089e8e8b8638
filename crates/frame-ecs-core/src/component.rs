//! Component type registry.
//!
//! Every component type used by the frame engine is registered here before
//! [`ComponentTypeRegistry::lock`] freezes the table. IDs partition into
//! three disjoint ranges -- builtin, default, user -- so that a handful of
//! reserved IDs (the null type, the mandatory `Life` flag) can never
//! collide with application-registered types.

use std::collections::HashMap;
use std::fmt;

use crate::error::EcsError;
use crate::source::Source;

/// Attribute tag marking a property as a resource handle: missing values for
/// such a property fail entity load rather than falling back to a
/// zero-filled default (§6, §7).
pub const RESOURCE_ATTR: &str = "resource";

/// Attribute tag marking a property that composes with its parent's value on
/// spawn via [`Property::add_right_to_left`] (e.g. a child's relative
/// position being added onto its parent's).
pub const RELATIVE_ATTR: &str = "relative";

/// Highest ID reserved for builtin types (the engine's own `Life` flag and
/// any future builtins).
pub const BUILTIN_MAX: u16 = 8;
/// Highest ID reserved for "default" application types (conventionally
/// shared across many games built on this core, e.g. transform/tag types).
pub const DEFAULTS_MAX: u16 = 32;

/// ID 0 is reserved as the null component type.
pub const NULL_TYPE: ComponentTypeId = ComponentTypeId(0);
/// ID 1 is the mandatory `Life` component (a single `alive: bool`).
pub const LIFE_TYPE: ComponentTypeId = ComponentTypeId(1);

/// Number of bytes of the builtin `Life` component.
pub const LIFE_SIZE: usize = std::mem::size_of::<bool>();

/// A 16-bit identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ComponentTypeId(pub u16);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

/// Which of the three ID partitions a type ID falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRole {
    /// `id <= BUILTIN_MAX`, reserved for the engine itself.
    Builtin,
    /// `BUILTIN_MAX < id <= DEFAULTS_MAX`.
    Default,
    /// `id > DEFAULTS_MAX`, the application's own types.
    User,
}

/// Classify a raw ID into its partition.
pub fn role_for_id(id: ComponentTypeId) -> TypeRole {
    if id.0 <= BUILTIN_MAX {
        TypeRole::Builtin
    } else if id.0 <= DEFAULTS_MAX {
        TypeRole::Default
    } else {
        TypeRole::User
    }
}

/// A type-erased property loader: reads a field out of a `Source` value and
/// writes its byte representation into `dst` (which is exactly
/// `property.size` bytes, already offset into the owning component).
pub type PropertyLoader = Box<dyn Fn(&dyn Source, &mut [u8]) -> Result<(), String>>;

/// Composes a property inherited from a "left" (parent) source into a
/// "right" (child) value already present at `dst`, e.g. adding parent
/// position onto a spawned child's relative position. `src` and `dst` are
/// both `property.size` bytes of the same component type.
pub type AddRightToLeft = fn(dst: &mut [u8], src: &[u8]);

/// Describes one named field of a component.
pub struct Property {
    /// Field name, as it appears in a `Source` mapping.
    pub name: String,
    /// Byte offset of this field within the component.
    pub offset: usize,
    /// Byte size of this field.
    pub size: usize,
    /// Free-form attribute tags consumed by processes, e.g. `"relative"`.
    pub attributes: Vec<String>,
    /// Converts a `Source` value into this field's byte representation.
    pub loader: PropertyLoader,
    /// Attribute-driven composition operation, if this property supports
    /// one (e.g. `"relative"` positions composing with a parent's).
    pub add_right_to_left: Option<AddRightToLeft>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Options supplied when registering a component type.
pub struct TypeOptions {
    /// Whether an entity may own more than one instance of this type.
    pub is_multi: bool,
    /// Upper bound on instances-per-entity (`1` for a normal component).
    pub max_per_entity: usize,
    /// Absolute minimum preallocation, in components.
    pub min_prealloc: usize,
    /// Minimum preallocation per live entity, as a ratio.
    pub min_prealloc_per_entity: f64,
    /// Declared properties, in the order they should be read from a
    /// `Source` mapping.
    pub properties: Vec<Property>,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            is_multi: false,
            max_per_entity: 1,
            min_prealloc: 64,
            min_prealloc_per_entity: 0.0,
            properties: Vec::new(),
        }
    }
}

/// Metadata recorded for a registered component type.
#[derive(Debug)]
pub struct TypeInfo {
    /// The type's assigned ID.
    pub id: ComponentTypeId,
    /// Human-readable name (the mapping key used in a `Source` document).
    pub name: String,
    /// Byte size of one instance.
    pub size: usize,
    /// Whether an entity may own more than one instance.
    pub is_multi: bool,
    /// Upper bound on instances-per-entity.
    pub max_per_entity: usize,
    /// Absolute minimum preallocation, in components.
    pub min_prealloc: usize,
    /// Minimum preallocation per live entity, as a ratio.
    pub min_prealloc_per_entity: f64,
    /// Declared properties.
    pub properties: Vec<Property>,
}

/// Catalog of registered component types, frozen by [`lock`](Self::lock).
#[derive(Debug)]
pub struct ComponentTypeRegistry {
    slots: Vec<Option<TypeInfo>>,
    by_name: HashMap<String, ComponentTypeId>,
    locked: bool,
    max_component_types: u16,
}

impl ComponentTypeRegistry {
    /// Create a registry with room for IDs up to `max_component_types`
    /// (inclusive), pre-populated with the null type and the mandatory
    /// `Life` component.
    pub fn new(max_component_types: u16) -> Self {
        assert!(
            max_component_types > DEFAULTS_MAX,
            "max_component_types must leave room for at least one user type"
        );
        let mut reg = Self {
            slots: (0..=max_component_types).map(|_| None).collect(),
            by_name: HashMap::new(),
            locked: false,
            max_component_types,
        };
        reg.register_internal(
            LIFE_TYPE,
            "life",
            LIFE_SIZE,
            TypeOptions {
                is_multi: false,
                max_per_entity: 1,
                min_prealloc: 0,
                min_prealloc_per_entity: 1.0,
                properties: Vec::new(),
            },
        );
        reg
    }

    fn register_internal(&mut self, id: ComponentTypeId, name: &str, size: usize, opts: TypeOptions) {
        assert!(!self.locked, "cannot register component type after lock()");
        assert!(
            (id.0 as usize) < self.slots.len(),
            "component type ID {} exceeds max_component_types {}",
            id.0,
            self.max_component_types
        );
        assert!(
            self.slots[id.0 as usize].is_none(),
            "component type ID {} already registered",
            id.0
        );
        assert!(
            !self.by_name.contains_key(name),
            "component name '{}' already registered",
            name
        );
        assert!(
            opts.max_per_entity >= 1,
            "max_per_entity must be at least 1"
        );

        let info = TypeInfo {
            id,
            name: name.to_owned(),
            size,
            is_multi: opts.is_multi,
            max_per_entity: opts.max_per_entity,
            min_prealloc: opts.min_prealloc,
            min_prealloc_per_entity: opts.min_prealloc_per_entity,
            properties: opts.properties,
        };
        self.by_name.insert(name.to_owned(), id);
        self.slots[id.0 as usize] = Some(info);
    }

    /// Register a component type at a specific ID.
    ///
    /// # Panics
    ///
    /// Panics (a programming fault) if: the registry is locked,
    /// the ID falls outside the registry's range, the ID is already
    /// registered, the ID's partition doesn't match its intended role, or
    /// the name is already in use.
    pub fn register(&mut self, id: ComponentTypeId, name: &str, size: usize, opts: TypeOptions) {
        assert!(
            id != NULL_TYPE && id != LIFE_TYPE,
            "component type ID {} is reserved",
            id.0
        );
        assert!(
            role_for_id(id) != TypeRole::Builtin,
            "component type ID {} falls in the builtin partition (<= {}), which is reserved for the engine's own types",
            id.0,
            BUILTIN_MAX
        );
        self.register_internal(id, name, size, opts);
    }

    /// Freeze the registry. Idempotent: calling this more than once is not
    /// an error, it simply has no further effect. Returns `true` if this
    /// call performed the freeze, `false` if the registry was already
    /// locked.
    pub fn lock(&mut self) -> bool {
        if self.locked {
            false
        } else {
            self.locked = true;
            true
        }
    }

    /// Whether the registry is locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Look up a registered type's metadata.
    pub fn type_info(&self, id: ComponentTypeId) -> Option<&TypeInfo> {
        self.slots.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    /// Look up a registered type's metadata by name.
    pub fn type_info_by_name(&self, name: &str) -> Option<&TypeInfo> {
        self.by_name.get(name).and_then(|id| self.type_info(*id))
    }

    /// Iterate over every registered type, in ID order.
    pub fn type_info_all(&self) -> impl Iterator<Item = &TypeInfo> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Build one component instance's raw bytes from a `Source` mapping,
    /// using this type's declared `Property` loaders (§4.1, §6). A property
    /// absent from `value` (or present as null) is left zero-filled unless
    /// it carries [`RESOURCE_ATTR`], in which case the load fails.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` is not registered -- the caller is expected to
    /// have validated the type against the locked registry already.
    pub fn load_component(&self, type_id: ComponentTypeId, value: &dyn Source) -> Result<Vec<u8>, EcsError> {
        let info = self
            .type_info(type_id)
            .unwrap_or_else(|| panic!("load_component: component type {:?} is not registered", type_id));
        let mut bytes = vec![0u8; info.size];
        for prop in &info.properties {
            let field = value.get_mapping_value(&prop.name);
            match field.as_deref().filter(|v| !v.is_null()) {
                Some(field_value) => {
                    (prop.loader)(field_value, &mut bytes[prop.offset..prop.offset + prop.size]).map_err(
                        |details| EcsError::UnreadableProperty {
                            component: info.name.clone(),
                            property: prop.name.clone(),
                            details,
                        },
                    )?;
                }
                None if prop.attributes.iter().any(|a| a == RESOURCE_ATTR) => {
                    return Err(EcsError::MissingProperty {
                        component: info.name.clone(),
                        property: prop.name.clone(),
                    });
                }
                None => {} // non-resource property: leave the zero-filled default
            }
        }
        Ok(bytes)
    }

    /// Apply every [`RELATIVE_ATTR`]-tagged property's
    /// [`Property::add_right_to_left`] operation, composing `parent`'s value
    /// into `child`'s in place (used on spawn to turn a child's relative
    /// position into an absolute one, for example).
    pub fn compose_relative(&self, type_id: ComponentTypeId, child: &mut [u8], parent: &[u8]) {
        let Some(info) = self.type_info(type_id) else { return };
        for prop in &info.properties {
            if prop.attributes.iter().any(|a| a == RELATIVE_ATTR) {
                if let Some(op) = prop.add_right_to_left {
                    op(&mut child[prop.offset..prop.offset + prop.size], &parent[prop.offset..prop.offset + prop.size]);
                }
            }
        }
    }

    /// Sum of `size * max_per_entity` over every registered type.
    ///
    /// # Panics
    ///
    /// Panics if the registry is not locked.
    pub fn max_entity_bytes(&self) -> usize {
        assert!(self.locked, "max_entity_bytes requires a locked registry");
        self.type_info_all()
            .map(|t| t.size * t.max_per_entity)
            .sum()
    }

    /// Number of ID slots this registry has room for (including unused
    /// ones); used to size per-type storage arrays in [`crate::game_state`].
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Sum of `max_per_entity` over every registered type.
    ///
    /// # Panics
    ///
    /// Panics if the registry is not locked.
    pub fn max_entity_components(&self) -> usize {
        assert!(
            self.locked,
            "max_entity_components requires a locked registry"
        );
        self.type_info_all().map(|t| t.max_per_entity).sum()
    }
}
