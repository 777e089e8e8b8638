//! The worker-thread pool and per-frame fork/join.
//!
//! One main thread plus `N - 1` workers, each a small finite state machine
//! (`Stopped`/`Waiting`/`Executing`/`Stopping`) stored as a single-byte
//! atomic. The only synchronization primitive on the hot path is that
//! atomic plus a release/plain-load fence discipline -- there are no
//! suspension points inside a Process, so workers spin-yield while
//! `Waiting` rather than parking on a condvar.
//!
//! The cross-thread handoff of the future `GameState` and the registry's
//! process entries is a raw-pointer share guarded by the scheduler's
//! single-writer rule rather than the type system. The `AtomicU8`
//! state-machine style favors explicit `std::sync::atomic` state over
//! pulling in an executor crate.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::game_state::GameState;
use crate::process::{Process, ProcessDiagnostics, ProcessExecutor};

/// Number of consecutive idle frames (no process assigned) after which a
/// worker thread is stopped.
pub const IDLE_STOP_AFTER_FRAMES: u32 = 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped = 0,
    Waiting = 1,
    Executing = 2,
    Stopping = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Stopped,
            1 => WorkerState::Waiting,
            2 => WorkerState::Executing,
            3 => WorkerState::Stopping,
            other => unreachable!("invalid worker state byte {other}"),
        }
    }
}

#[derive(Debug)]
struct AtomicWorkerState(AtomicU8);

impl AtomicWorkerState {
    fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// A plain (non-atomic-ordering) load; this single byte is tear-free on
    /// target platforms and the release stores on the write side are what
    /// actually order the data they guard.
    fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// What one worker thread did during a frame: how long it spent in
/// processes, and the diagnostics for each process it ran (by registry
/// index, since workers run disjoint index subsets).
#[derive(Debug, Default)]
pub struct ThreadFrameResult {
    pub thread_index: usize,
    pub busy: Duration,
    pub diagnostics: Vec<(usize, ProcessDiagnostics)>,
}

/// Everything a worker thread needs to run its share of a frame. Built by
/// the main thread from borrows that are guaranteed to outlive the frame
/// (the main thread blocks on [`ThreadPool::run_frame`] until every worker
/// has returned to `Waiting`), then shared across threads as raw pointers.
struct FrameJob {
    past: *const GameState,
    future: *mut GameState,
    entries: *mut (String, Box<dyn Process>),
    entries_len: usize,
    /// `assignment[i]` is the thread index process `i` runs on this frame.
    assignment: Vec<usize>,
}

// SAFETY: `FrameJob` is only ever read by the worker it was dispatched to
// plus the main thread's own share; the scheduler's single-writer rule
// guarantees each process index (and therefore each future component
// column it may touch) is owned by exactly one thread for the lifetime of
// the frame, so the raw pointers above are never aliased across threads in
// a way that actually races.
unsafe impl Send for FrameJob {}
unsafe impl Sync for FrameJob {}

fn run_assigned(thread_index: usize, job: &FrameJob) -> ThreadFrameResult {
    let start = Instant::now();
    // SAFETY: see `FrameJob`'s safety comment; `past` is read-only for the
    // whole frame and `future` is only mutated through entries this thread
    // owns exclusively.
    let past = unsafe { &*job.past };
    let future = unsafe { &mut *job.future };

    let mut diagnostics = Vec::new();
    for index in 0..job.entries_len {
        if job.assignment[index] != thread_index {
            continue;
        }
        // SAFETY: `index` is owned by this thread alone this frame (see
        // above); no other thread dereferences `job.entries.add(index)`.
        let (name, process) = unsafe { &mut *job.entries.add(index) };
        // `ProcessExecutor::run` already recovers from a panic inside a
        // single entity's signature body; this catches anything that
        // escapes that (e.g. `pre_process`/`post_process`) so a worker
        // thread always reaches its `Waiting` publish below rather than
        // unwinding past it and deadlocking the main thread's wait loop.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ProcessExecutor::run(name, process.as_mut(), past, future)));
        match outcome {
            Ok(diag) => diagnostics.push((index, diag)),
            Err(payload) => {
                tracing::error!(
                    process = name,
                    thread = thread_index,
                    panic = ?payload.downcast_ref::<&str>().copied().or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
                    "process panicked outside entity handling; skipping its diagnostics for this frame"
                );
            }
        }
    }

    ThreadFrameResult {
        thread_index,
        busy: start.elapsed(),
        diagnostics,
    }
}

struct Worker {
    index: usize,
    state: Arc<AtomicWorkerState>,
    handle: Option<JoinHandle<()>>,
    idle_frames: u32,
}

impl Worker {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: Arc::new(AtomicWorkerState::new(WorkerState::Stopped)),
            handle: None,
            idle_frames: 0,
        }
    }

    fn spawn(&mut self, job_slot: Arc<Mutex<Option<Arc<FrameJob>>>>, results: Arc<Mutex<Vec<ThreadFrameResult>>>) {
        assert!(matches!(self.state.load(), WorkerState::Stopped), "worker {} is already running", self.index);
        let index = self.index;
        let state = Arc::clone(&self.state);
        state.store(WorkerState::Waiting);
        let builder = std::thread::Builder::new().name(format!("frame-ecs-worker-{index}"));
        self.handle = Some(
            builder
                .spawn(move || worker_loop(index, state, job_slot, results))
                .expect("failed to spawn worker thread"),
        );
        debug!(thread = index, "worker started");
    }

    fn stop_and_join(&mut self) {
        if matches!(self.state.load(), WorkerState::Stopped) {
            return;
        }
        assert!(
            matches!(self.state.load(), WorkerState::Waiting),
            "worker {} can only be stopped while Waiting",
            self.index
        );
        self.state.store(WorkerState::Stopping);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("worker thread panicked while stopping");
        }
        debug!(thread = self.index, "worker stopped");
    }
}

fn worker_loop(
    index: usize,
    state: Arc<AtomicWorkerState>,
    job_slot: Arc<Mutex<Option<Arc<FrameJob>>>>,
    results: Arc<Mutex<Vec<ThreadFrameResult>>>,
) {
    loop {
        let observed = loop {
            let s = state.load();
            if matches!(s, WorkerState::Executing | WorkerState::Stopping) {
                break s;
            }
            std::thread::yield_now();
        };
        if matches!(observed, WorkerState::Stopping) {
            state.store(WorkerState::Stopped);
            return;
        }

        let job = job_slot
            .lock()
            .unwrap()
            .clone()
            .expect("job must be published before a worker is told to execute");
        let result = run_assigned(index, &job);
        results.lock().unwrap().push(result);

        // Ensure all of this thread's writes to future state are visible
        // before the main thread observes `Waiting`.
        fence(Ordering::Release);
        state.store(WorkerState::Waiting);
    }
}

/// Owns the worker threads (indices `1..thread_count`); index `0` is always
/// the caller's own (main) thread and is not represented here.
pub struct ThreadPool {
    workers: Vec<Worker>,
    job_slot: Arc<Mutex<Option<Arc<FrameJob>>>>,
    results: Arc<Mutex<Vec<ThreadFrameResult>>>,
}

impl ThreadPool {
    /// Construct a pool for `thread_count` total threads (including the
    /// main thread). Workers are not yet running; call
    /// [`start_threads`](Self::start_threads) first.
    pub fn new(thread_count: usize) -> Self {
        assert!(thread_count >= 1, "thread_count must be at least 1 (the main thread)");
        let workers = (1..thread_count).map(Worker::new).collect();
        Self {
            workers,
            job_slot: Arc::new(Mutex::new(None)),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Total thread count, including the main thread.
    pub fn thread_count(&self) -> usize {
        self.workers.len() + 1
    }

    /// Launch every worker thread in the `Waiting` state.
    pub fn start_threads(&mut self) {
        for worker in &mut self.workers {
            worker.spawn(Arc::clone(&self.job_slot), Arc::clone(&self.results));
        }
    }

    /// Current FSM state of thread `index` (`0` is always reported as
    /// `Waiting`, since the main thread has no explicit state machine).
    pub fn worker_state(&self, index: usize) -> WorkerState {
        if index == 0 {
            WorkerState::Waiting
        } else {
            self.workers[index - 1].state.load()
        }
    }

    /// Run one frame: publish `past`/`future`/the process entries plus
    /// `assignment` (process index -> thread index, already merged with
    /// any pinned processes) to every worker, execute `main_share` (thread
    /// 0's processes) on the caller's own stack, wait for every worker to
    /// return to `Waiting`, then apply the idle-thread policy based on who
    /// got work this frame.
    pub fn run_frame(
        &mut self,
        past: &GameState,
        future: &mut GameState,
        entries: *mut (String, Box<dyn Process>),
        entries_len: usize,
        assignment: Vec<usize>,
    ) -> Vec<ThreadFrameResult> {
        let job = Arc::new(FrameJob {
            past: past as *const GameState,
            future: future as *mut GameState,
            entries,
            entries_len,
            assignment: assignment.clone(),
        });
        self.results.lock().unwrap().clear();
        *self.job_slot.lock().unwrap() = Some(Arc::clone(&job));

        // All future-state writes this frame will depend on are already
        // visible; make sure that's true before any worker starts.
        fence(Ordering::Release);

        let mut any_work = vec![false; self.thread_count()];
        for &thread in &assignment {
            any_work[thread] = true;
        }

        for worker in &mut self.workers {
            match worker.state.load() {
                WorkerState::Waiting => worker.state.store(WorkerState::Executing),
                WorkerState::Stopped if any_work[worker.index] => {
                    // A worker the idle policy stopped was just handed work
                    // again; restart it and hand it the job directly rather
                    // than waiting for `Waiting` first, which would never
                    // come.
                    worker.spawn(Arc::clone(&self.job_slot), Arc::clone(&self.results));
                    worker.idle_frames = 0;
                    worker.state.store(WorkerState::Executing);
                }
                _ => {}
            }
        }

        let main_result = run_assigned(0, &job);
        self.results.lock().unwrap().push(main_result);

        for worker in &self.workers {
            if any_work[worker.index] {
                while !matches!(worker.state.load(), WorkerState::Waiting) {
                    std::thread::yield_now();
                }
            }
        }

        self.apply_idle_policy(&any_work);

        std::mem::take(&mut *self.results.lock().unwrap())
    }

    /// Stop any worker idle for `IDLE_STOP_AFTER_FRAMES` consecutive frames.
    /// Restarting a stopped worker that gets assigned work again happens
    /// earlier, in `run_frame`, before the wait loop. Thread 0 (main) is
    /// never stopped.
    fn apply_idle_policy(&mut self, any_work: &[bool]) {
        for worker in &mut self.workers {
            if any_work[worker.index] {
                worker.idle_frames = 0;
            } else {
                worker.idle_frames += 1;
                if worker.idle_frames >= IDLE_STOP_AFTER_FRAMES && matches!(worker.state.load(), WorkerState::Waiting) {
                    worker.stop_and_join();
                    warn!(thread = worker.index, "worker idle for {} frames, stopped", worker.idle_frames);
                }
            }
        }
    }

    /// Stop and join every running worker. Safe to call more than once.
    pub fn destroy(&mut self) {
        for worker in &mut self.workers {
            worker.stop_and_join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
