//! Per-frame process-to-thread assignment.
//!
//! A [`SchedulingAlgorithm`] maps every unpinned process to a worker thread,
//! trying to minimize the estimated duration of the busiest thread. A
//! [`TimeEstimator`] turns last frame's measured per-process durations into
//! next frame's estimates, which the algorithm pulls one at a time while
//! building its assignment: the estimator is computed once per frame and
//! algorithms pull from it via a callback, rather than estimates being
//! embedded into `add_process`.
//!
//! Plain structs implementing a small trait, favored here over a generic
//! scheduling DSL.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// Index of a process within the registry's declaration order.
pub type ProcessIndex = usize;
/// Index of a worker thread, `0` is always the main thread.
pub type ThreadIndex = usize;

/// The outcome of one scheduling pass: which thread each unpinned process
/// landed on, the algorithm's per-thread load estimate, and whether the
/// assignment is merely approximate (true for every algorithm except an
/// exhaustive search).
#[derive(Debug, Clone)]
pub struct Schedule {
    assignment: HashMap<ProcessIndex, ThreadIndex>,
    thread_loads: Vec<Duration>,
    approximate: bool,
}

impl Schedule {
    /// The thread `process` was assigned to.
    ///
    /// # Panics
    /// Panics if `process` was never passed to `add_process` during this
    /// scheduling pass.
    pub fn thread_of(&self, process: ProcessIndex) -> ThreadIndex {
        self.assignment[&process]
    }

    /// Per-thread estimated load after scheduling (including pinned-process
    /// usage folded in via `increase_thread_usage`).
    pub fn thread_loads(&self) -> &[Duration] {
        &self.thread_loads
    }

    /// The busiest thread's estimated load -- the frame's estimated
    /// duration.
    pub fn estimated_frame_time(&self) -> Duration {
        self.thread_loads.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    /// Whether this assignment is known-optimal (`false`) or a heuristic
    /// approximation (`true`).
    pub fn is_approximate(&self) -> bool {
        self.approximate
    }
}

/// Per-process estimated-duration source, fed by last frame's measurements.
pub trait TimeEstimator: fmt::Debug {
    /// Estimated duration for `process` in the upcoming frame.
    fn estimate(&mut self, process: ProcessIndex) -> Duration;

    /// Feed back the actually-measured duration for `process` from the
    /// frame that just ran, to inform the next `estimate` call.
    fn record(&mut self, process: ProcessIndex, measured: Duration);

    /// Accumulated error between what `estimate` returned and what was
    /// subsequently measured, for diagnostics.
    fn error_stats(&self) -> EstimatorErrorStats;
}

/// Summary statistics of an estimator's prediction error so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EstimatorErrorStats {
    pub sample_count: usize,
    pub mean_abs_error_secs: f64,
    pub max_abs_error_secs: f64,
}

#[derive(Debug, Default)]
struct ErrorAccumulator {
    sum_abs: f64,
    max_abs: f64,
    count: usize,
}

impl ErrorAccumulator {
    fn push(&mut self, estimate: Duration, measured: Duration) {
        let err = (measured.as_secs_f64() - estimate.as_secs_f64()).abs();
        self.sum_abs += err;
        self.max_abs = self.max_abs.max(err);
        self.count += 1;
    }

    fn stats(&self) -> EstimatorErrorStats {
        EstimatorErrorStats {
            sample_count: self.count,
            mean_abs_error_secs: if self.count == 0 { 0.0 } else { self.sum_abs / self.count as f64 },
            max_abs_error_secs: self.max_abs,
        }
    }
}

/// Estimate = the last measured duration (0 until a process has run once).
#[derive(Debug, Default)]
pub struct SimpleEstimator {
    last_measured: HashMap<ProcessIndex, Duration>,
    last_given: HashMap<ProcessIndex, Duration>,
    errors: ErrorAccumulator,
}

impl SimpleEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeEstimator for SimpleEstimator {
    fn estimate(&mut self, process: ProcessIndex) -> Duration {
        let estimate = self.last_measured.get(&process).copied().unwrap_or(Duration::ZERO);
        self.last_given.insert(process, estimate);
        estimate
    }

    fn record(&mut self, process: ProcessIndex, measured: Duration) {
        if let Some(given) = self.last_given.get(&process) {
            self.errors.push(*given, measured);
        }
        self.last_measured.insert(process, measured);
    }

    fn error_stats(&self) -> EstimatorErrorStats {
        self.errors.stats()
    }
}

/// Default falloff used by [`StepEstimator`] to decay toward a lower
/// measurement without losing upward spikes.
pub const DEFAULT_STEP_ALPHA: f64 = 0.2;

/// If a measurement exceeds the current estimate, snap up to it
/// immediately; otherwise decay toward it by `alpha` per frame. Dampens
/// noise without losing spikes.
#[derive(Debug)]
pub struct StepEstimator {
    alpha: f64,
    current: HashMap<ProcessIndex, Duration>,
    last_given: HashMap<ProcessIndex, Duration>,
    errors: ErrorAccumulator,
}

impl StepEstimator {
    pub fn new(alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0, 1]");
        Self {
            alpha,
            current: HashMap::new(),
            last_given: HashMap::new(),
            errors: ErrorAccumulator::default(),
        }
    }
}

impl Default for StepEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_ALPHA)
    }
}

impl TimeEstimator for StepEstimator {
    fn estimate(&mut self, process: ProcessIndex) -> Duration {
        let estimate = self.current.get(&process).copied().unwrap_or(Duration::ZERO);
        self.last_given.insert(process, estimate);
        estimate
    }

    fn record(&mut self, process: ProcessIndex, measured: Duration) {
        if let Some(given) = self.last_given.get(&process) {
            self.errors.push(*given, measured);
        }
        let prev = self.current.get(&process).copied().unwrap_or(Duration::ZERO);
        let next = if measured > prev {
            measured
        } else {
            let prev_s = prev.as_secs_f64();
            let measured_s = measured.as_secs_f64();
            Duration::from_secs_f64((prev_s + self.alpha * (measured_s - prev_s)).max(0.0))
        };
        self.current.insert(process, next);
    }

    fn error_stats(&self) -> EstimatorErrorStats {
        self.errors.stats()
    }
}

/// Protocol every scheduling algorithm implements: `begin` resets per-frame
/// state, `add_process`/`increase_thread_usage` feed in the work to
/// schedule, `end` produces the [`Schedule`].
pub trait SchedulingAlgorithm: fmt::Debug {
    /// Reset for a new frame with `thread_count` worker threads (including
    /// the main thread at index 0).
    fn begin(&mut self, thread_count: usize);

    /// Register an unpinned process that needs assigning.
    fn add_process(&mut self, process: ProcessIndex);

    /// Fold in a pinned process's estimated duration against the thread it
    /// is already pinned to, without the algorithm choosing its thread.
    fn increase_thread_usage(&mut self, thread: ThreadIndex, amount: Duration);

    /// Produce the final assignment, pulling per-process estimates from
    /// `estimator` as needed.
    fn end(&mut self, estimator: &mut dyn TimeEstimator) -> Schedule;
}

/// Round-robin assignment that ignores estimated durations entirely. Used
/// as a baseline/fallback and in tests that need a scheduler with no
/// adaptive behavior to compare against.
#[derive(Debug, Default)]
pub struct Dumb {
    thread_count: usize,
    next_thread: usize,
    thread_loads: Vec<Duration>,
    added: Vec<ProcessIndex>,
}

impl Dumb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulingAlgorithm for Dumb {
    fn begin(&mut self, thread_count: usize) {
        assert!(thread_count >= 1, "thread_count must be at least 1");
        self.thread_count = thread_count;
        self.next_thread = 0;
        self.thread_loads = vec![Duration::ZERO; thread_count];
        self.added.clear();
    }

    fn add_process(&mut self, process: ProcessIndex) {
        self.added.push(process);
    }

    fn increase_thread_usage(&mut self, thread: ThreadIndex, amount: Duration) {
        self.thread_loads[thread] += amount;
    }

    fn end(&mut self, estimator: &mut dyn TimeEstimator) -> Schedule {
        let mut assignment = HashMap::with_capacity(self.added.len());
        for &process in &self.added {
            let thread = self.next_thread % self.thread_count;
            self.next_thread += 1;
            self.thread_loads[thread] += estimator.estimate(process);
            assignment.insert(process, thread);
        }
        Schedule {
            assignment,
            thread_loads: self.thread_loads.clone(),
            approximate: true,
        }
    }
}

/// Longest-Processing-Time-first: sort unpinned processes by estimated
/// duration descending, then greedily assign each to the currently
/// least-loaded thread. A `4/3`-of-optimal-or-better heuristic for
/// identical machines; the default algorithm.
#[derive(Debug, Default)]
pub struct Lpt {
    thread_count: usize,
    thread_loads: Vec<Duration>,
    added: Vec<ProcessIndex>,
}

impl Lpt {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulingAlgorithm for Lpt {
    fn begin(&mut self, thread_count: usize) {
        assert!(thread_count >= 1, "thread_count must be at least 1");
        self.thread_count = thread_count;
        self.thread_loads = vec![Duration::ZERO; thread_count];
        self.added.clear();
    }

    fn add_process(&mut self, process: ProcessIndex) {
        self.added.push(process);
    }

    fn increase_thread_usage(&mut self, thread: ThreadIndex, amount: Duration) {
        self.thread_loads[thread] += amount;
    }

    fn end(&mut self, estimator: &mut dyn TimeEstimator) -> Schedule {
        let mut estimates: Vec<(ProcessIndex, Duration)> = self
            .added
            .iter()
            .map(|&p| (p, estimator.estimate(p)))
            .collect();
        estimates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut assignment = HashMap::with_capacity(estimates.len());
        for (process, estimate) in estimates {
            let thread = (0..self.thread_count)
                .min_by_key(|&t| self.thread_loads[t])
                .expect("thread_count is at least 1");
            self.thread_loads[thread] += estimate;
            assignment.insert(process, thread);
        }
        Schedule {
            assignment,
            thread_loads: self.thread_loads.clone(),
            approximate: true,
        }
    }
}

/// Brute-force search for the makespan-minimal assignment. Exponential in
/// the number of unpinned processes; intended for tests that verify LPT (or
/// Dumb) comes within its guaranteed bound of the true optimum on small
/// workloads, not for production use.
#[derive(Debug, Default)]
pub struct ExhaustiveBacktracking {
    thread_count: usize,
    base_loads: Vec<Duration>,
    added: Vec<ProcessIndex>,
}

impl ExhaustiveBacktracking {
    pub fn new() -> Self {
        Self::default()
    }

    fn search(
        durations: &[(ProcessIndex, Duration)],
        index: usize,
        loads: &mut [Duration],
        best: &mut Option<(Duration, Vec<ThreadIndex>)>,
        current: &mut Vec<ThreadIndex>,
    ) {
        if index == durations.len() {
            let makespan = loads.iter().copied().max().unwrap_or(Duration::ZERO);
            if best.as_ref().map_or(true, |(m, _)| makespan < *m) {
                *best = Some((makespan, current.clone()));
            }
            return;
        }
        for thread in 0..loads.len() {
            loads[thread] += durations[index].1;
            current.push(thread);
            Self::search(durations, index + 1, loads, best, current);
            current.pop();
            loads[thread] -= durations[index].1;
        }
    }
}

impl SchedulingAlgorithm for ExhaustiveBacktracking {
    fn begin(&mut self, thread_count: usize) {
        assert!(thread_count >= 1, "thread_count must be at least 1");
        self.thread_count = thread_count;
        self.base_loads = vec![Duration::ZERO; thread_count];
        self.added.clear();
    }

    fn add_process(&mut self, process: ProcessIndex) {
        self.added.push(process);
    }

    fn increase_thread_usage(&mut self, thread: ThreadIndex, amount: Duration) {
        self.base_loads[thread] += amount;
    }

    fn end(&mut self, estimator: &mut dyn TimeEstimator) -> Schedule {
        assert!(
            self.added.len() <= 10,
            "ExhaustiveBacktracking is for tests only; {} processes is too many to brute force",
            self.added.len()
        );
        let durations: Vec<(ProcessIndex, Duration)> =
            self.added.iter().map(|&p| (p, estimator.estimate(p))).collect();
        let mut loads = self.base_loads.clone();
        let mut best = None;
        let mut current = Vec::new();
        Self::search(&durations, 0, &mut loads, &mut best, &mut current);

        let mut assignment = HashMap::with_capacity(durations.len());
        let mut final_loads = self.base_loads.clone();
        if let Some((_, choice)) = best {
            for ((process, duration), thread) in durations.iter().zip(choice.iter()) {
                assignment.insert(*process, *thread);
                final_loads[*thread] += *duration;
            }
        }
        Schedule {
            assignment,
            thread_loads: final_loads,
            approximate: false,
        }
    }
}

/// Randomized restarts over a branch-and-bound backtracking search: each
/// attempt shuffles the process order with a seeded PRNG, then explores
/// assignments depth-first, pruning any partial assignment whose busiest
/// thread already exceeds the best complete makespan found so far. The
/// bound tightens (deepens) every time an attempt beats it, so later
/// attempts prune more aggressively than the first. Opt-in for applications
/// that want a tighter-than-LPT bound and can spend more CPU per frame than
/// LPT's single greedy pass; [`ExhaustiveBacktracking`] remains the
/// test-only oracle for true optimality.
#[derive(Debug)]
pub struct RandomizedBacktracking {
    thread_count: usize,
    base_loads: Vec<Duration>,
    added: Vec<ProcessIndex>,
    attempts: usize,
    rng: Pcg32,
}

impl RandomizedBacktracking {
    /// `attempts` restarts per `end()` call; `seed` makes the search
    /// reproducible (e.g. for deterministic tests or frame replay).
    pub fn new(attempts: usize, seed: u64) -> Self {
        assert!(attempts >= 1, "attempts must be at least 1");
        Self {
            thread_count: 0,
            base_loads: Vec::new(),
            added: Vec::new(),
            attempts,
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    fn search(
        durations: &[(ProcessIndex, Duration)],
        index: usize,
        loads: &mut [Duration],
        bound: Duration,
        local_best: &mut Option<(Duration, Vec<ThreadIndex>)>,
        current: &mut Vec<ThreadIndex>,
    ) {
        if index == durations.len() {
            let makespan = loads.iter().copied().max().unwrap_or(Duration::ZERO);
            if local_best.as_ref().map_or(true, |(m, _)| makespan < *m) {
                *local_best = Some((makespan, current.clone()));
            }
            return;
        }
        for thread in 0..loads.len() {
            loads[thread] += durations[index].1;
            let prune_bound = local_best.as_ref().map_or(bound, |(m, _)| *m);
            if loads[thread] <= prune_bound {
                current.push(thread);
                Self::search(durations, index + 1, loads, bound, local_best, current);
                current.pop();
            }
            loads[thread] -= durations[index].1;
        }
    }
}

impl SchedulingAlgorithm for RandomizedBacktracking {
    fn begin(&mut self, thread_count: usize) {
        assert!(thread_count >= 1, "thread_count must be at least 1");
        self.thread_count = thread_count;
        self.base_loads = vec![Duration::ZERO; thread_count];
        self.added.clear();
    }

    fn add_process(&mut self, process: ProcessIndex) {
        self.added.push(process);
    }

    fn increase_thread_usage(&mut self, thread: ThreadIndex, amount: Duration) {
        self.base_loads[thread] += amount;
    }

    fn end(&mut self, estimator: &mut dyn TimeEstimator) -> Schedule {
        let base_durations: Vec<(ProcessIndex, Duration)> =
            self.added.iter().map(|&p| (p, estimator.estimate(p))).collect();

        let mut best_makespan: Option<Duration> = None;
        let mut best_order = base_durations.clone();
        let mut best_choice: Vec<ThreadIndex> = Vec::new();
        let mut order = base_durations.clone();

        for _ in 0..self.attempts {
            order.shuffle(&mut self.rng);
            let mut loads = self.base_loads.clone();
            let bound = best_makespan.unwrap_or(Duration::MAX);
            let mut local_best: Option<(Duration, Vec<ThreadIndex>)> = None;
            let mut current = Vec::with_capacity(order.len());
            Self::search(&order, 0, &mut loads, bound, &mut local_best, &mut current);
            if let Some((makespan, choice)) = local_best {
                if best_makespan.map_or(true, |m| makespan < m) {
                    best_makespan = Some(makespan);
                    best_order = order.clone();
                    best_choice = choice;
                }
            }
        }

        let mut assignment = HashMap::with_capacity(base_durations.len());
        let mut final_loads = self.base_loads.clone();
        for ((process, duration), thread) in best_order.iter().zip(best_choice.iter()) {
            assignment.insert(*process, *thread);
            final_loads[*thread] += *duration;
        }
        Schedule {
            assignment,
            thread_loads: final_loads,
            approximate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_estimator(values: &[(ProcessIndex, Duration)]) -> impl TimeEstimator {
        #[derive(Debug)]
        struct Fixed(HashMap<ProcessIndex, Duration>, ErrorAccumulator);
        impl TimeEstimator for Fixed {
            fn estimate(&mut self, process: ProcessIndex) -> Duration {
                self.0.get(&process).copied().unwrap_or(Duration::ZERO)
            }
            fn record(&mut self, _process: ProcessIndex, _measured: Duration) {}
            fn error_stats(&self) -> EstimatorErrorStats {
                self.1.stats()
            }
        }
        Fixed(values.iter().copied().collect(), ErrorAccumulator::default())
    }

    #[test]
    fn dumb_round_robins_ignoring_durations() {
        let mut algo = Dumb::new();
        algo.begin(2);
        for p in 0..4 {
            algo.add_process(p);
        }
        let mut est = fixed_estimator(&[(0, Duration::from_millis(100)), (1, Duration::from_millis(1))]);
        let schedule = algo.end(&mut est);
        assert_eq!(schedule.thread_of(0), 0);
        assert_eq!(schedule.thread_of(1), 1);
        assert_eq!(schedule.thread_of(2), 0);
        assert_eq!(schedule.thread_of(3), 1);
        assert!(schedule.is_approximate());
    }

    #[test]
    fn lpt_balances_by_duration() {
        let mut algo = Lpt::new();
        algo.begin(2);
        for p in 0..4 {
            algo.add_process(p);
        }
        let mut est = fixed_estimator(&[
            (0, Duration::from_millis(10)),
            (1, Duration::from_millis(1)),
            (2, Duration::from_millis(1)),
            (3, Duration::from_millis(1)),
        ]);
        let schedule = algo.end(&mut est);
        // The 10ms process should land alone on a thread; LPT never stacks
        // the longest job behind anything.
        let lone_thread = schedule.thread_of(0);
        let other_on_same = (1..4).filter(|&p| schedule.thread_of(p) == lone_thread).count();
        assert_eq!(other_on_same, 0);
    }

    #[test]
    fn lpt_matches_optimal_on_small_workload() {
        let durations = vec![
            (0, Duration::from_millis(8)),
            (1, Duration::from_millis(7)),
            (2, Duration::from_millis(6)),
            (3, Duration::from_millis(5)),
            (4, Duration::from_millis(4)),
        ];
        let mut lpt = Lpt::new();
        lpt.begin(2);
        for (p, _) in &durations {
            lpt.add_process(*p);
        }
        let mut est = fixed_estimator(&durations);
        let lpt_schedule = lpt.end(&mut est);

        let mut exhaustive = ExhaustiveBacktracking::new();
        exhaustive.begin(2);
        for (p, _) in &durations {
            exhaustive.add_process(*p);
        }
        let mut est2 = fixed_estimator(&durations);
        let optimal_schedule = exhaustive.end(&mut est2);

        assert_eq!(lpt_schedule.estimated_frame_time(), optimal_schedule.estimated_frame_time());
        assert!(!optimal_schedule.is_approximate());
    }

    #[test]
    fn step_estimator_snaps_up_and_decays_down() {
        let mut est = StepEstimator::new(0.2);
        assert_eq!(est.estimate(0), Duration::ZERO);
        est.record(0, Duration::from_millis(100));
        // Spike: snaps straight to the measurement.
        assert_eq!(est.estimate(0), Duration::from_millis(100));
        est.record(0, Duration::from_millis(0));
        // Decays toward a lower measurement instead of snapping.
        let decayed = est.estimate(0);
        assert_eq!(decayed, Duration::from_millis(80));
    }

    #[test]
    fn simple_estimator_uses_last_measurement() {
        let mut est = SimpleEstimator::new();
        assert_eq!(est.estimate(0), Duration::ZERO);
        est.record(0, Duration::from_millis(5));
        assert_eq!(est.estimate(0), Duration::from_millis(5));
    }

    #[test]
    fn randomized_backtracking_matches_optimal_on_small_workload() {
        let durations = vec![
            (0, Duration::from_millis(8)),
            (1, Duration::from_millis(7)),
            (2, Duration::from_millis(6)),
            (3, Duration::from_millis(5)),
            (4, Duration::from_millis(4)),
        ];
        let mut randomized = RandomizedBacktracking::new(8, 42);
        randomized.begin(2);
        for (p, _) in &durations {
            randomized.add_process(*p);
        }
        let mut est = fixed_estimator(&durations);
        let randomized_schedule = randomized.end(&mut est);

        let mut exhaustive = ExhaustiveBacktracking::new();
        exhaustive.begin(2);
        for (p, _) in &durations {
            exhaustive.add_process(*p);
        }
        let mut est2 = fixed_estimator(&durations);
        let optimal_schedule = exhaustive.end(&mut est2);

        assert_eq!(
            randomized_schedule.estimated_frame_time(),
            optimal_schedule.estimated_frame_time()
        );
        assert!(randomized_schedule.is_approximate());
    }

    #[test]
    fn randomized_backtracking_is_deterministic_for_a_fixed_seed() {
        let durations = vec![
            (0, Duration::from_millis(9)),
            (1, Duration::from_millis(4)),
            (2, Duration::from_millis(3)),
            (3, Duration::from_millis(2)),
        ];

        let run = |seed: u64| {
            let mut algo = RandomizedBacktracking::new(5, seed);
            algo.begin(3);
            for (p, _) in &durations {
                algo.add_process(*p);
            }
            let mut est = fixed_estimator(&durations);
            let schedule = algo.end(&mut est);
            (0..durations.len()).map(|p| schedule.thread_of(p)).collect::<Vec<_>>()
        };

        assert_eq!(run(7), run(7));
    }

    #[test]
    fn randomized_backtracking_folds_in_pinned_thread_usage() {
        let mut algo = RandomizedBacktracking::new(4, 1);
        algo.begin(2);
        algo.increase_thread_usage(0, Duration::from_millis(50));
        algo.add_process(0);
        let mut est = fixed_estimator(&[(0, Duration::from_millis(1))]);
        let schedule = algo.end(&mut est);
        assert!(schedule.thread_loads()[0] >= Duration::from_millis(50));
    }

    #[test]
    fn estimator_error_stats_track_mispredictions() {
        let mut est = SimpleEstimator::new();
        let _ = est.estimate(0); // estimate 0
        est.record(0, Duration::from_millis(10)); // error = 10ms
        let _ = est.estimate(0); // estimate 10ms now
        est.record(0, Duration::from_millis(10)); // error = 0
        let stats = est.error_stats();
        assert_eq!(stats.sample_count, 2);
        assert!(stats.max_abs_error_secs > 0.0);
    }
}
