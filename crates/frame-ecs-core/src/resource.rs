//! Resource manager contract and a concrete in-memory implementation.
//!
//! A [`ResourceManager`] stages content-addressed resources for loading
//! between frames: `handle()` is lock-free once a resource has been
//! promoted out of staging, `request_load`/`update` drive the actual load,
//! and `resource()` hands back a cheaply-cloned, immutable reference once
//! loaded. [`RawHandle`] turns the resource's descriptor bytes into a
//! stable content hash via `blake3`. The lock-free-after-promotion read
//! path uses `arc-swap::ArcSwap` for a "readers never block on a writer"
//! guarantee over a copy-on-write backing store.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::error::ResourceError;

/// A content-addressed handle to a resource, derived from the bytes of the
/// descriptor that named it (e.g. a file path, an asset key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle([u8; 32]);

impl RawHandle {
    /// Derive a handle from a descriptor's raw bytes.
    pub fn from_descriptor_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Render the handle as a hex string, e.g. for diagnostics.
    pub fn to_hex(self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({}…)", &self.to_hex()[..8])
    }
}

/// Lifecycle state of a staged resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// `handle()` has created the entry but no load has been requested.
    New,
    /// `request_load` was called; the loader has not yet run (or is
    /// running) as of the last `update()`.
    Loading,
    /// The resource is promoted into the immutable store and may be read.
    Loaded,
    /// The load was attempted and failed; the handle stays valid but
    /// [`ResourceManager::resource`] must not be called on it.
    LoadFailed,
}

/// A lightweight description of the type of resource a manager owns,
/// analogous to [`crate::component::TypeInfo`] but for resources rather
/// than components.
#[derive(Debug, Clone)]
pub struct ResourceTypeInfo {
    /// Human-readable name, used to detect a resource-type collision when
    /// two managers are registered for the same kind of resource.
    pub name: String,
}

/// The resource manager contract. Implementors stage resources
/// keyed by [`RawHandle`] and promote them to an immutable store on
/// `update()`, which the core calls once per frame between process
/// execution windows.
pub trait ResourceManager: Send + Sync {
    /// The kind of resource this manager owns.
    fn managed_resource_type(&self) -> ResourceTypeInfo;

    /// Resolve (creating if necessary) the handle for `descriptor`. Lock-free
    /// when the resource already exists; takes a brief write lock only when
    /// adding a new staging entry.
    fn handle(&self, descriptor: &[u8]) -> RawHandle;

    /// Current lifecycle state of `handle`.
    fn state(&self, handle: RawHandle) -> ResourceState;

    /// Enqueue `handle` for loading at the next `update()`.
    fn request_load(&self, handle: RawHandle);

    /// The loaded resource, type-erased. Precondition: `state(handle) ==
    /// Loaded`.
    fn resource(&self, handle: RawHandle) -> Result<Arc<dyn Any + Send + Sync>, ResourceError>;

    /// Drain the staging queue: process pending load requests and promote
    /// successful loads into the immutable store. Called by the core
    /// between frames.
    fn update(&mut self);

    /// Destroy all resources. Called only during `EntityManager::destroy`.
    fn clear(&mut self);
}

enum StagingEntry {
    New,
    Loading,
    Loaded(usize),
    LoadFailed(String),
}

fn entry_state(entry: &StagingEntry) -> ResourceState {
    match entry {
        StagingEntry::New => ResourceState::New,
        StagingEntry::Loading => ResourceState::Loading,
        StagingEntry::Loaded(_) => ResourceState::Loaded,
        StagingEntry::LoadFailed(_) => ResourceState::LoadFailed,
    }
}

/// A function that turns a handle's descriptor bytes into a loaded
/// resource, or a human-readable failure reason.
pub type LoaderFn<R> = Box<dyn Fn(RawHandle) -> Result<R, String> + Send + Sync>;

/// A ready-to-use [`ResourceManager`] backed by an in-process loader
/// closure. Promoted resources live behind an [`ArcSwap`] so `resource()`
/// never blocks a writer; each `R` is individually heap-allocated via `Arc`
/// and, once promoted, never moves or is overwritten -- a published
/// resource's address is stable for its lifetime.
pub struct InMemoryResourceManager<R> {
    type_name: String,
    staging: RwLock<HashMap<RawHandle, StagingEntry>>,
    promoted: ArcSwap<Vec<Arc<R>>>,
    pending_loads: Mutex<VecDeque<RawHandle>>,
    loader: LoaderFn<R>,
}

impl<R: Send + Sync + 'static> InMemoryResourceManager<R> {
    /// Build a manager for resource kind `type_name`, loading resources with
    /// `loader`.
    pub fn new(type_name: impl Into<String>, loader: LoaderFn<R>) -> Self {
        Self {
            type_name: type_name.into(),
            staging: RwLock::new(HashMap::new()),
            promoted: ArcSwap::from_pointee(Vec::new()),
            pending_loads: Mutex::new(VecDeque::new()),
            loader,
        }
    }
}

impl<R: Send + Sync + 'static> ResourceManager for InMemoryResourceManager<R> {
    fn managed_resource_type(&self) -> ResourceTypeInfo {
        ResourceTypeInfo {
            name: self.type_name.clone(),
        }
    }

    fn handle(&self, descriptor: &[u8]) -> RawHandle {
        let handle = RawHandle::from_descriptor_bytes(descriptor);
        // Lock-free fast path: the entry already exists.
        if self.staging.read().unwrap().contains_key(&handle) {
            return handle;
        }
        let mut staging = self.staging.write().unwrap();
        staging.entry(handle).or_insert(StagingEntry::New);
        handle
    }

    fn state(&self, handle: RawHandle) -> ResourceState {
        self.staging
            .read()
            .unwrap()
            .get(&handle)
            .map(entry_state)
            .unwrap_or(ResourceState::New)
    }

    fn request_load(&self, handle: RawHandle) {
        {
            let mut staging = self.staging.write().unwrap();
            let entry = staging.entry(handle).or_insert(StagingEntry::New);
            *entry = StagingEntry::Loading;
        }
        self.pending_loads.lock().unwrap().push_back(handle);
    }

    fn resource(&self, handle: RawHandle) -> Result<Arc<dyn Any + Send + Sync>, ResourceError> {
        let state = self.state(handle);
        if state != ResourceState::Loaded {
            return Err(ResourceError::NotLoaded { state });
        }
        let index = match self.staging.read().unwrap().get(&handle) {
            Some(StagingEntry::Loaded(index)) => *index,
            _ => return Err(ResourceError::NotLoaded { state }),
        };
        let promoted = self.promoted.load();
        Ok(Arc::clone(&promoted[index]) as Arc<dyn Any + Send + Sync>)
    }

    fn update(&mut self) {
        let pending: Vec<RawHandle> = {
            let mut queue = self.pending_loads.lock().unwrap();
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        for handle in pending {
            match (self.loader)(handle) {
                Ok(resource) => {
                    let mut next: Vec<Arc<R>> = (**self.promoted.load()).clone();
                    next.push(Arc::new(resource));
                    let index = next.len() - 1;
                    self.promoted.store(Arc::new(next));
                    self.staging
                        .write()
                        .unwrap()
                        .insert(handle, StagingEntry::Loaded(index));
                    debug!(resource_type = %self.type_name, handle = %handle.to_hex(), "resource loaded");
                }
                Err(details) => {
                    warn!(resource_type = %self.type_name, handle = %handle.to_hex(), %details, "resource load failed");
                    self.staging
                        .write()
                        .unwrap()
                        .insert(handle, StagingEntry::LoadFailed(details));
                }
            }
        }
    }

    fn clear(&mut self) {
        self.staging.write().unwrap().clear();
        self.promoted.store(Arc::new(Vec::new()));
        self.pending_loads.lock().unwrap().clear();
    }
}
