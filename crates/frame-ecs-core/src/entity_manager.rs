//! The orchestrator: owns both Game States, the process and resource
//! manager registries, the scheduler, and the thread pool, and drives the
//! fixed per-frame sequence -- swap, copy survivors forward, reserve and
//! initialize new entities, preallocate, schedule, fork-join execution,
//! diagnostics.
//!
//! Owns every subsystem behind a single `execute_frame` entry point, holding
//! cross-references as plain fields rather than a service locator.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use crate::component::{ComponentTypeId, ComponentTypeRegistry};
use crate::diagnostics::{ComponentTypeDiagnostics, FrameDiagnostics, SchedulerDiagnostics};
use crate::entity::{EntityId, EntityIdAllocator};
use crate::game_state::{
    add_new_entities_no_init, copy_live_entities_to_future, init_new_entities, preallocate, warn_unwritten_types,
    EntityPrototype, GameState,
};
use crate::process::{Process, ProcessRegistry};
use crate::resource::ResourceManager;
use crate::scheduler::{Lpt, SchedulingAlgorithm, StepEstimator, TimeEstimator};
use crate::thread_pool::ThreadPool;

/// Default cap on `add_entity` calls honored within a single frame, absent
/// an explicit override via [`EntityManager::with_max_new_entities_per_frame`].
pub const DEFAULT_MAX_NEW_ENTITIES_PER_FRAME: usize = 10_000;

fn detect_thread_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Owns both Game States and every subsystem, and drives frame execution.
pub struct EntityManager {
    registry: ComponentTypeRegistry,
    past: GameState,
    future: GameState,
    id_alloc: Mutex<EntityIdAllocator>,
    pending: Mutex<Vec<(EntityPrototype, EntityId)>>,
    max_new_entities_per_frame: usize,
    alloc_mult: f64,
    processes: ProcessRegistry,
    /// Process name -> thread it is pinned to, per `pin_process`.
    pinned: std::collections::HashMap<String, usize>,
    resource_managers: Vec<(String, Box<dyn ResourceManager>)>,
    thread_pool: ThreadPool,
    scheduler: Box<dyn SchedulingAlgorithm>,
    estimator: Box<dyn TimeEstimator>,
    frame_count: u64,
    threads_started: bool,
    diagnostics: FrameDiagnostics,
}

impl EntityManager {
    /// Build an orchestrator over a locked `registry`. `thread_count_override`
    /// fixes the total thread count (main + workers); `None` auto-sizes to
    /// the detected hardware thread count, falling back to 4.
    ///
    /// # Panics
    ///
    /// Panics if `registry` is not locked, or if `thread_count_override` is
    /// `Some(0)` (a zero-thread pool could never run the main thread's own
    /// share).
    pub fn new(registry: ComponentTypeRegistry, thread_count_override: Option<usize>) -> Self {
        assert!(registry.is_locked(), "EntityManager::new requires a locked registry");
        if let Some(n) = thread_count_override {
            assert!(n >= 1, "thread_count_override must be at least 1");
        }
        let thread_count = thread_count_override.unwrap_or_else(detect_thread_count);
        let past = GameState::new(&registry);
        let future = GameState::new(&registry);
        Self {
            registry,
            past,
            future,
            id_alloc: Mutex::new(EntityIdAllocator::new()),
            pending: Mutex::new(Vec::new()),
            max_new_entities_per_frame: DEFAULT_MAX_NEW_ENTITIES_PER_FRAME,
            alloc_mult: 1.0,
            processes: ProcessRegistry::new(),
            pinned: std::collections::HashMap::new(),
            resource_managers: Vec::new(),
            thread_pool: ThreadPool::new(thread_count),
            scheduler: Box::new(Lpt::new()),
            estimator: Box::new(StepEstimator::default()),
            frame_count: 0,
            threads_started: false,
            diagnostics: FrameDiagnostics::new(),
        }
    }

    /// Override the scheduling algorithm (default [`Lpt`]). Must be called
    /// before [`start_threads`](Self::start_threads).
    pub fn with_scheduler(mut self, scheduler: Box<dyn SchedulingAlgorithm>) -> Self {
        assert!(!self.threads_started, "cannot change the scheduler after start_threads()");
        self.scheduler = scheduler;
        self
    }

    /// Override the time estimator (default [`StepEstimator`]).
    pub fn with_estimator(mut self, estimator: Box<dyn TimeEstimator>) -> Self {
        assert!(!self.threads_started, "cannot change the estimator after start_threads()");
        self.estimator = estimator;
        self
    }

    /// Override the per-frame `add_entity` cap (default
    /// [`DEFAULT_MAX_NEW_ENTITIES_PER_FRAME`]).
    pub fn with_max_new_entities_per_frame(mut self, max: usize) -> Self {
        self.max_new_entities_per_frame = max;
        self
    }

    /// Launch worker threads. Must be called before the first
    /// [`execute_frame`](Self::execute_frame).
    pub fn start_threads(&mut self) {
        self.thread_pool.start_threads();
        self.threads_started = true;
    }

    /// Register a process under `name`.
    ///
    /// # Panics
    ///
    /// Panics if any of its signatures declare a future type that is not
    /// registered in the component registry, or one already claimed by
    /// another process (single-writer rule), or if at least one frame has
    /// already executed.
    pub fn register_process(&mut self, name: impl Into<String>, process: Box<dyn Process>) {
        assert!(self.frame_count == 0, "cannot register a process after the first frame has executed");
        for sig in process.signatures() {
            if let Some(type_id) = sig.future_type {
                assert!(
                    self.registry.type_info(type_id).is_some(),
                    "process declares future type {:?} which is not registered",
                    type_id
                );
            }
        }
        self.processes.register(name, process);
    }

    /// Pin a registered process to a specific worker thread, bypassing the
    /// scheduling algorithm's own placement for it. Its estimated duration
    /// is still folded into that thread's load via
    /// [`SchedulingAlgorithm::increase_thread_usage`], so the algorithm
    /// balances the remaining, unpinned processes around it.
    ///
    /// # Panics
    ///
    /// Panics if `name` was never registered via
    /// [`register_process`](Self::register_process), or if `thread` is out
    /// of range for the pool's thread count.
    pub fn pin_process(&mut self, name: &str, thread: usize) {
        assert!(
            self.processes.index_of(name).is_some(),
            "cannot pin unknown process '{}'",
            name
        );
        assert!(
            thread < self.thread_pool.thread_count(),
            "pin thread {} is out of range for a {}-thread pool",
            thread,
            self.thread_pool.thread_count()
        );
        self.pinned.insert(name.to_owned(), thread);
    }

    /// Register a resource manager.
    ///
    /// # Panics
    ///
    /// Panics if another registered manager already claims the same
    /// resource type name.
    pub fn register_resource_manager(&mut self, name: impl Into<String>, manager: Box<dyn ResourceManager>) {
        let name = name.into();
        let claimed = manager.managed_resource_type().name;
        assert!(
            !self
                .resource_managers
                .iter()
                .any(|(_, m)| m.managed_resource_type().name == claimed),
            "resource type '{}' is already claimed by another registered manager",
            claimed
        );
        self.resource_managers.push((name, manager));
    }

    /// Request a new entity. Thread-safe: may be called concurrently from
    /// inside a process (e.g. a spawner). Returns `None` if the per-frame
    /// cap has already been reached this frame.
    pub fn add_entity(&self, prototype: EntityPrototype) -> Option<EntityId> {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= self.max_new_entities_per_frame {
            return None;
        }
        let id = self.id_alloc.lock().unwrap().allocate();
        pending.push((prototype, id));
        Some(id)
    }

    /// Scale every registered type's preallocation target by `f`.
    pub fn alloc_mult(&mut self, f: f64) {
        assert!(f > 0.0, "alloc_mult must be > 0");
        self.alloc_mult = f;
    }

    /// A read-only view onto the state most recently exposed as `past`
    /// (useful for tests and host-side inspection between frames).
    pub fn past(&self) -> &GameState {
        &self.past
    }

    /// Snapshot of the most recently completed frame's diagnostics.
    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    /// Run the full per-frame sequence.
    ///
    /// # Panics
    ///
    /// Panics if [`start_threads`](Self::start_threads) has not been called.
    pub fn execute_frame(&mut self) {
        assert!(self.threads_started, "start_threads() must be called before execute_frame()");

        // 1. Debug warnings: types no registered process writes.
        let written: Vec<ComponentTypeId> = self
            .processes
            .iter_mut()
            .flat_map(|(_, p)| p.signatures().iter().filter_map(|s| s.future_type).collect::<Vec<_>>())
            .collect();
        warn_unwritten_types(&self.registry, &written);

        // 2. Update resource managers.
        for (name, manager) in &mut self.resource_managers {
            manager.update();
            debug!(resource_manager = %name, "updated");
        }

        // 3. Previous frame's invariant.
        assert!(
            self.past.len() >= self.future.len(),
            "invariant violated: |past| ({}) < |future| ({}) before swap",
            self.past.len(),
            self.future.len()
        );

        // 4. Swap past/future.
        std::mem::swap(&mut self.past, &mut self.future);

        // 5. Copy alive past -> future; reset future buffers.
        copy_live_entities_to_future(&self.past, &mut self.future);

        // 6 & 8. Reserve slots for pending entities in both states (also
        // grows their counts/offsets arrays).
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        let reserved_start_past = add_new_entities_no_init(&mut self.past, pending.len());
        let _reserved_start_future = add_new_entities_no_init(&mut self.future, pending.len());

        // 7. Preallocate component buffers in future.
        preallocate(&mut self.future, &self.registry, self.alloc_mult);

        // 9. Initialize pending entities into the reserved slots.
        init_new_entities(&pending, &mut self.past, &mut self.future, reserved_start_past);

        // 10. Pending queue already drained above.

        // 11. Run the scheduler. Pinned processes skip placement entirely;
        // their estimated duration still counts against their thread so the
        // algorithm balances the rest around it.
        let pinned_thread_of: Vec<Option<usize>> = (0..self.processes.len())
            .map(|index| {
                self.pinned
                    .iter()
                    .find(|(name, _)| self.processes.index_of(name) == Some(index))
                    .map(|(_, &thread)| thread)
            })
            .collect();

        let thread_count = self.thread_pool.thread_count();
        self.scheduler.begin(thread_count);
        for index in 0..self.processes.len() {
            match pinned_thread_of[index] {
                Some(thread) => self.scheduler.increase_thread_usage(thread, self.estimator.estimate(index)),
                None => self.scheduler.add_process(index),
            }
        }
        let schedule = self.scheduler.end(self.estimator.as_mut());
        let assignment: Vec<usize> = (0..self.processes.len())
            .map(|i| pinned_thread_of[i].unwrap_or_else(|| schedule.thread_of(i)))
            .collect();

        // 12. Publish Executing to workers, execute own share, wait.
        let (entries_ptr, entries_len) = self.processes.entries_mut_ptr();
        let results = self
            .thread_pool
            .run_frame(&self.past, &mut self.future, entries_ptr, entries_len, assignment);

        // 13. Update diagnostics.
        let mut process_diags = vec![None; self.processes.len()];
        let mut thread_busy = vec![Duration::ZERO; self.thread_pool.thread_count()];
        for result in &results {
            thread_busy[result.thread_index] = result.busy;
            for (index, diag) in &result.diagnostics {
                self.estimator.record(*index, diag.duration);
                process_diags[*index] = Some(diag.clone());
            }
        }
        let processes_out: Vec<_> = process_diags.into_iter().flatten().collect();

        let component_types = self
            .registry
            .type_info_all()
            .map(|info| {
                let storage = self.future.storage(info.id).expect("registered type has storage");
                ComponentTypeDiagnostics {
                    type_id: info.id,
                    name: info.name.clone(),
                    committed_components: storage.buffer().committed_components(),
                    allocated_components: storage.buffer().allocated_components(),
                    grow_events: storage.buffer().grow_event_count(),
                }
            })
            .collect();

        self.diagnostics = FrameDiagnostics {
            past_entity_count: self.future.len(),
            processes: processes_out,
            thread_busy,
            component_types,
            scheduler: Some(SchedulerDiagnostics {
                algorithm_name: format!("{:?}", self.scheduler).split(['(', ' ']).next().unwrap_or("unknown").to_owned(),
                is_approximate: schedule.is_approximate(),
                estimated_frame_time: schedule.estimated_frame_time(),
                error_stats: self.estimator.error_stats(),
            }),
        };

        self.frame_count += 1;
        info!(frame = self.frame_count, entities = self.diagnostics.past_entity_count, "frame complete");
    }

    /// Stop and join all worker threads. `clear_resources` also calls
    /// `clear()` on every registered resource manager.
    pub fn destroy(&mut self, clear_resources: bool) {
        self.thread_pool.destroy();
        if clear_resources {
            for (_, manager) in &mut self.resource_managers {
                manager.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TypeOptions;
    use crate::process::{ProcessArgs, Signature};

    const POSITION: ComponentTypeId = ComponentTypeId(40);

    fn registry() -> ComponentTypeRegistry {
        let mut reg = ComponentTypeRegistry::new(64);
        reg.register(POSITION, "position", 4, TypeOptions::default());
        reg.lock();
        reg
    }

    struct CopyPosition;
    impl Process for CopyPosition {
        fn signatures(&self) -> &[Signature] {
            Box::leak(Box::new(vec![Signature {
                required: vec![POSITION],
                needs_context: false,
                future_type: Some(POSITION),
                max_future_writes: 1,
                run: Box::new(|args: ProcessArgs<'_>| {
                    let bytes = args.cursor.past_components(args.past, POSITION);
                    args.future_slice[..4].copy_from_slice(bytes);
                    1
                }),
            }]))
        }
    }

    #[test]
    fn add_entity_respects_per_frame_cap() {
        let mut manager = EntityManager::new(registry(), Some(1)).with_max_new_entities_per_frame(2);
        manager.register_process("copy_position", Box::new(CopyPosition));
        manager.start_threads();

        let proto = || EntityPrototype::new().with_component(POSITION, 1i32.to_ne_bytes().to_vec());
        assert!(manager.add_entity(proto()).is_some());
        assert!(manager.add_entity(proto()).is_some());
        assert!(manager.add_entity(proto()).is_none());

        manager.execute_frame();
        assert_eq!(manager.past().len(), 2); // both pending entities land in this frame

        // The cap resets for the next frame.
        assert!(manager.add_entity(proto()).is_some());
        manager.destroy(false);
    }

    #[test]
    fn simple_copy_scenario_round_trips_position() {
        let mut manager = EntityManager::new(registry(), Some(1));
        manager.register_process("copy_position", Box::new(CopyPosition));
        manager.start_threads();

        let proto = EntityPrototype::new().with_component(POSITION, 7i32.to_ne_bytes().to_vec());
        let id = manager.add_entity(proto).unwrap();

        manager.execute_frame(); // entity becomes visible
        manager.execute_frame(); // process copies Position forward

        let row = manager.past().find_row(id).expect("entity should be alive");
        let bytes = manager.past().storage(POSITION).unwrap().slice(row);
        assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 7);
        manager.destroy(false);
    }

    #[test]
    #[should_panic(expected = "requires a locked registry")]
    fn new_requires_locked_registry() {
        let reg = ComponentTypeRegistry::new(64);
        EntityManager::new(reg, Some(1));
    }

    #[test]
    fn pinned_process_runs_on_its_pinned_thread() {
        let mut manager = EntityManager::new(registry(), Some(2));
        manager.register_process("copy_position", Box::new(CopyPosition));
        manager.pin_process("copy_position", 1);
        manager.start_threads();

        let proto = EntityPrototype::new().with_component(POSITION, 3i32.to_ne_bytes().to_vec());
        manager.add_entity(proto).unwrap();

        manager.execute_frame();
        manager.execute_frame();
        assert_eq!(manager.diagnostics().processes.len(), 1);
        manager.destroy(false);
    }

    #[test]
    #[should_panic(expected = "cannot pin unknown process")]
    fn pinning_an_unregistered_process_panics() {
        let mut manager = EntityManager::new(registry(), Some(1));
        manager.pin_process("ghost", 0);
    }
}
