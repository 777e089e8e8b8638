//! Read-only per-frame diagnostics snapshot.
//!
//! Rebuilt from scratch every frame by [`crate::entity_manager::EntityManager`]
//! and handed back by `diagnostics()`; no history beyond the previous frame
//! is kept. Collected into a retained struct rather than only being emitted
//! through `tracing`, since the host application needs to query it, not just
//! read logs.

use std::time::Duration;

use crate::component::ComponentTypeId;
use crate::process::ProcessDiagnostics;
use crate::scheduler::EstimatorErrorStats;

/// Component-type-level counters for one frame.
#[derive(Debug, Clone)]
pub struct ComponentTypeDiagnostics {
    pub type_id: ComponentTypeId,
    pub name: String,
    pub committed_components: usize,
    pub allocated_components: usize,
    pub grow_events: usize,
}

/// Scheduler-level summary for one frame.
#[derive(Debug, Clone)]
pub struct SchedulerDiagnostics {
    pub algorithm_name: String,
    pub is_approximate: bool,
    pub estimated_frame_time: Duration,
    pub error_stats: EstimatorErrorStats,
}

/// Everything reported by [`crate::entity_manager::EntityManager::diagnostics`].
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// `past.entities().len()` as of the frame just completed.
    pub past_entity_count: usize,
    pub processes: Vec<ProcessDiagnostics>,
    /// Per-thread time spent inside process execution, indexed by thread.
    pub thread_busy: Vec<Duration>,
    pub component_types: Vec<ComponentTypeDiagnostics>,
    pub scheduler: Option<SchedulerDiagnostics>,
}

impl FrameDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total process time across every thread this frame.
    pub fn total_process_time(&self) -> Duration {
        self.processes.iter().map(|p| p.duration).sum()
    }

    /// The busiest thread's measured busy time this frame.
    pub fn max_thread_busy(&self) -> Duration {
        self.thread_busy.iter().copied().max().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_process_time_sums_every_process() {
        let mut diag = FrameDiagnostics::new();
        diag.processes.push(ProcessDiagnostics {
            name: "a".to_owned(),
            call_count: 1,
            duration: Duration::from_millis(3),
            types_read: vec![],
        });
        diag.processes.push(ProcessDiagnostics {
            name: "b".to_owned(),
            call_count: 1,
            duration: Duration::from_millis(4),
            types_read: vec![],
        });
        assert_eq!(diag.total_process_time(), Duration::from_millis(7));
    }

    #[test]
    fn max_thread_busy_is_the_busiest() {
        let mut diag = FrameDiagnostics::new();
        diag.thread_busy = vec![Duration::from_millis(1), Duration::from_millis(9), Duration::from_millis(2)];
        assert_eq!(diag.max_thread_busy(), Duration::from_millis(9));
    }

    #[test]
    fn empty_diagnostics_has_zero_totals() {
        let diag = FrameDiagnostics::new();
        assert_eq!(diag.total_process_time(), Duration::ZERO);
        assert_eq!(diag.max_thread_busy(), Duration::ZERO);
    }
}
