//! A double-buffered, process-scheduled Entity-Component-System core.
//!
//! Every frame, a [`crate::entity_manager::EntityManager`] swaps a *past* and
//! a *future* [`crate::game_state::GameState`], copies surviving entities
//! forward, and runs every registered [`crate::process::Process`] against the
//! past state to produce the future one. Processes are assigned to worker
//! threads by a [`crate::scheduler::SchedulingAlgorithm`] driven by measured
//! per-process durations, so the busiest worker thread's load stays close to
//! balanced without any process declaring its own cost up front.
//!
//! # Quick start
//!
//! ```
//! use frame_ecs_core::prelude::*;
//!
//! const POSITION: ComponentTypeId = ComponentTypeId(40);
//!
//! struct CopyPosition;
//! impl Process for CopyPosition {
//!     fn signatures(&self) -> &[Signature] {
//!         Box::leak(Box::new(vec![Signature {
//!             required: vec![POSITION],
//!             needs_context: false,
//!             future_type: Some(POSITION),
//!             max_future_writes: 1,
//!             run: Box::new(|args: ProcessArgs<'_>| {
//!                 let bytes = args.cursor.past_components(args.past, POSITION);
//!                 args.future_slice[..bytes.len()].copy_from_slice(bytes);
//!                 1
//!             }),
//!         }]))
//!     }
//! }
//!
//! let mut registry = ComponentTypeRegistry::new(64);
//! registry.register(POSITION, "position", 4, TypeOptions::default());
//! registry.lock();
//!
//! let mut manager = EntityManager::new(registry, Some(1));
//! manager.register_process("copy_position", Box::new(CopyPosition));
//! manager.start_threads();
//!
//! let proto = EntityPrototype::new().with_component(POSITION, 7i32.to_ne_bytes().to_vec());
//! let id = manager.add_entity(proto).unwrap();
//!
//! manager.execute_frame(); // the entity becomes visible
//! manager.execute_frame(); // copy_position runs against it
//!
//! let row = manager.past().find_row(id).unwrap();
//! let bytes = manager.past().storage(POSITION).unwrap().slice(row);
//! assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 7);
//! manager.destroy(false);
//! ```
//!
//! # Module map
//!
//! - [`entity`] -- `EntityId`, allocation.
//! - [`component`] -- the component type registry.
//! - [`buffer`] -- per-type byte buffers.
//! - [`game_state`] -- the double-buffered past/future state.
//! - [`iterator`] -- walking past entities, direct by-ID access.
//! - [`process`] -- `Process`, signatures, execution.
//! - [`scheduler`] -- process-to-thread assignment and time estimation.
//! - [`thread_pool`] -- the worker pool and its per-frame fork/join.
//! - [`entity_manager`] -- the orchestrator.
//! - [`resource`] -- the resource manager contract.
//! - [`source`] -- the `Source`/`Loader` abstraction consumed by component
//!   property loaders.
//! - [`diagnostics`] -- the read-only per-frame diagnostics snapshot.
//! - [`error`] -- runtime-recoverable error types.

#![allow(unsafe_code)]

pub mod buffer;
pub mod component;
pub mod diagnostics;
pub mod entity;
pub mod entity_manager;
pub mod error;
pub mod game_state;
pub mod iterator;
pub mod process;
pub mod resource;
pub mod scheduler;
pub mod source;
pub mod thread_pool;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::buffer::ComponentBuffer;
    pub use crate::component::{
        ComponentTypeId, ComponentTypeRegistry, Property, TypeInfo, TypeOptions, LIFE_TYPE, NULL_TYPE, RELATIVE_ATTR,
        RESOURCE_ATTR,
    };
    pub use crate::diagnostics::FrameDiagnostics;
    pub use crate::entity::{EntityId, EntityIdAllocator};
    pub use crate::entity_manager::EntityManager;
    pub use crate::error::{EcsError, ResourceError};
    pub use crate::game_state::{load_entity_prototype, EntityPrototype, GameState, RawComponent};
    pub use crate::iterator::{Context, EntityCursor, EntityIterator};
    pub use crate::process::{Process, ProcessArgs, ProcessDiagnostics, ProcessExecutor, ProcessRegistry, Signature};
    pub use crate::resource::{InMemoryResourceManager, RawHandle, ResourceManager, ResourceState};
    pub use crate::scheduler::{
        Dumb, EstimatorErrorStats, ExhaustiveBacktracking, Lpt, RandomizedBacktracking, Schedule, SchedulingAlgorithm,
        SimpleEstimator, StepEstimator, TimeEstimator,
    };
    pub use crate::source::{JsonSource, Loader, Source};
    pub use crate::thread_pool::{ThreadPool, WorkerState};
}
