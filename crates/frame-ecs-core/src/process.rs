//! User-supplied Processes: signatures, matching, and per-frame execution.
//!
//! A `Process` here is a small set of [`Signature`]s rather than a single
//! fixed query; the executor itself picks the most specific match per
//! entity instead of the caller committing to one query shape up front.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::error;

use crate::component::ComponentTypeId;
use crate::game_state::GameState;
use crate::iterator::{Context, EntityCursor, EntityIterator};

/// Everything a signature's closure needs to read past state and produce a
/// future component.
pub struct ProcessArgs<'a> {
    pub cursor: EntityCursor,
    pub past: &'a GameState,
    pub context: Option<&'a Context<'a>>,
    /// Scratch space sized `max_future_writes * component_size`, already
    /// reserved in the future buffer. The closure fills in however many
    /// components it actually wants to write and returns that count.
    pub future_slice: &'a mut [u8],
}

/// One overload of a [`Process`]'s `process(...)` method.
pub struct Signature {
    /// Component types this signature requires an entity to own at least
    /// one of (`matches` is nonzero iff all of these are present).
    pub required: Vec<ComponentTypeId>,
    /// Whether this signature wants a [`Context`] for ad-hoc past access.
    pub needs_context: bool,
    /// The future component type this signature writes, if any.
    pub future_type: Option<ComponentTypeId>,
    /// Upper bound on how many future components a single invocation may
    /// write (`1` unless `future_type` is a multi component).
    pub max_future_writes: usize,
    /// The signature body. Returns the number of future components it
    /// actually wrote (0 for an opt-out, `n` for a multi write).
    pub run: Box<dyn Fn(ProcessArgs<'_>) -> usize + Send + Sync>,
}

impl Signature {
    /// `matches(signature)`: nonzero iff the entity owns at least one of
    /// every required component type.
    fn matches(&self, cursor: &EntityCursor, past: &GameState) -> bool {
        self.required
            .iter()
            .all(|&type_id| cursor.past_count(past, type_id) > 0)
    }
}

/// User-supplied frame logic: one or more [`Signature`]s, matched against
/// entities by the executor, plus optional once-per-frame hooks.
pub trait Process: Send {
    /// This process's signatures, in declaration order (used to break ties
    /// when more than one matches with an equally specific required set).
    fn signatures(&self) -> &[Signature];

    /// Called once before this process's entities are iterated.
    fn pre_process(&mut self) {}

    /// Called once after this process's entities are iterated.
    fn post_process(&mut self) {}
}

/// Per-process measurements for one frame (folded into
/// [`crate::diagnostics::FrameDiagnostics`]).
#[derive(Debug, Clone)]
pub struct ProcessDiagnostics {
    pub name: String,
    pub call_count: usize,
    pub duration: Duration,
    pub types_read: Vec<ComponentTypeId>,
}

/// Best-effort human-readable message from a `catch_unwind` payload.
fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Pick the matching signature with the largest required-type set; ties
/// are broken by declaration order -- the most specific match wins.
fn best_match<'a>(signatures: &'a [Signature], cursor: &EntityCursor, past: &GameState) -> Option<&'a Signature> {
    let mut best: Option<&Signature> = None;
    for sig in signatures {
        if !sig.matches(cursor, past) {
            continue;
        }
        // Strictly-greater only: the first signature seen at a given
        // specificity keeps priority, so ties go to declaration order.
        if best.map_or(true, |b| sig.required.len() > b.required.len()) {
            best = Some(sig);
        }
    }
    best
}

/// Runs one [`Process`] against every alive entity in `past`, dispatching
/// each to its best-matching signature and committing the future writes it
/// produces.
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Execute `process` for one frame. `name` is recorded into the
    /// returned diagnostics.
    pub fn run(
        name: &str,
        process: &mut dyn Process,
        past: &GameState,
        future: &mut GameState,
    ) -> ProcessDiagnostics {
        let start = Instant::now();
        process.pre_process();

        let mut call_count = 0usize;
        let context = Context::new(past);
        // Borrowed once for the whole frame: `signatures()` is expected to
        // return a stable table owned by the process, not build one fresh
        // per call, so entities are matched against a single borrow instead
        // of re-invoking it once per entity.
        let signatures = process.signatures();

        for cursor in EntityIterator::new(past) {
            let Some(sig) = best_match(signatures, &cursor, past) else { continue };

            let future_type = sig.future_type;
            let max_writes = sig.max_future_writes;
            let future_slice: &mut [u8] = match future_type {
                Some(type_id) => cursor.reserve_future(future, type_id, max_writes),
                None => &mut [],
            };

            let ctx_ref = if sig.needs_context { Some(&context) } else { None };
            // A panicking signature must not take down the rest of the
            // frame: the entity being processed is treated as if no future
            // component was written (see the mid-entity-panic Open Question
            // decision in DESIGN.md), and iteration continues with the next
            // entity.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (sig.run)(ProcessArgs {
                    cursor,
                    past,
                    context: ctx_ref,
                    future_slice,
                })
            }));
            call_count += 1;

            let written = match outcome {
                Ok(written) => written,
                Err(payload) => {
                    error!(
                        process = name,
                        entity = ?cursor.entity_id,
                        panic = %panic_message(&payload),
                        "process panicked while handling an entity; treating as zero future components written"
                    );
                    0
                }
            };

            if let Some(type_id) = future_type {
                assert!(
                    written <= max_writes,
                    "process wrote {} future components but declared a maximum of {}",
                    written,
                    max_writes
                );
                cursor.commit_future(future, type_id, written);
            }
        }

        let types_read = signatures
            .iter()
            .flat_map(|sig| sig.required.iter().copied())
            .collect::<Vec<_>>();

        process.post_process();

        ProcessDiagnostics {
            name: name.to_owned(),
            call_count,
            duration: start.elapsed(),
            types_read,
        }
    }
}

/// Registered processes, keyed by name, with the single-writer rule --
/// two Processes may not declare the same future type -- enforced whenever
/// a new one is added.
#[derive(Default)]
pub struct ProcessRegistry {
    entries: Vec<(String, Box<dyn Process>)>,
    claimed_future_types: Vec<ComponentTypeId>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process under `name`.
    ///
    /// # Panics
    ///
    /// Panics if any of its signatures declare a future type already
    /// claimed by a previously registered process, or if `name` is already
    /// in use.
    pub fn register(&mut self, name: impl Into<String>, process: Box<dyn Process>) {
        let name = name.into();
        assert!(
            !self.entries.iter().any(|(n, _)| n == &name),
            "process name '{}' already registered",
            name
        );
        for sig in process.signatures() {
            if let Some(type_id) = sig.future_type {
                assert!(
                    !self.claimed_future_types.contains(&type_id),
                    "component type {:?} is already written by another registered process (single-writer rule)",
                    type_id
                );
                self.claimed_future_types.push(type_id);
            }
        }
        self.entries.push((name, process));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registry index a process was registered under, by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Box<dyn Process>)> {
        self.entries.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    /// Raw pointer to the first `(name, process)` entry plus the entry
    /// count, for [`crate::thread_pool`] to hand out disjoint per-entry
    /// access across worker threads. Each entry is touched by at most one
    /// thread per frame (the scheduler assigns one thread per process
    /// index), so indexing through this pointer from multiple threads is
    /// sound as long as callers never pick the same index twice.
    pub(crate) fn entries_mut_ptr(&mut self) -> (*mut (String, Box<dyn Process>), usize) {
        (self.entries.as_mut_ptr(), self.entries.len())
    }
}
