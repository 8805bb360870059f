//! Pipeline health metrics.
//!
//! Every stage worker records into a shared [`PipelineHealth`]. All
//! counters are atomics so recording never contends with the workers'
//! hot path; [`PipelineHealth::stage_snapshots`] gives a consistent-enough
//! view for diagnostics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::cell::{CellStatus, ClusterTypeId};

/// Pipeline stage with its own queue and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Stage {
    /// Batch placement; mutates the global index.
    Determine = 0,
    /// Source-position selection from sampled sightings.
    Clean = 1,
    /// Shape generation into pending edits.
    Pregenerate = 2,
    /// Writing pending edits into the world.
    Edit = 3,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Determine, Stage::Clean, Stage::Pregenerate, Stage::Edit];

    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Determine => "determine",
            Self::Clean => "clean",
            Self::Pregenerate => "pregenerate",
            Self::Edit => "edit",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for one stage.
#[derive(Debug, Default)]
struct StageMetrics {
    processed: AtomicU64,
    total_latency_us: AtomicU64,
    contended: AtomicU64,
    dropped_wakes: AtomicU64,
    peak_depth: AtomicUsize,
}

/// Lock-free health counters for all stages.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    stages: [StageMetrics; 4],
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&self, stage: Stage) -> &StageMetrics {
        &self.stages[stage as usize]
    }

    /// Records one item handled by `stage` and how long it took.
    pub fn record_processed(&self, stage: Stage, latency: Duration) {
        let metrics = self.stage(stage);
        metrics.processed.fetch_add(1, Ordering::Relaxed);
        metrics
            .total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records a cell skipped because another worker held its lock.
    pub fn record_contended(&self, stage: Stage) {
        self.stage(stage).contended.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a wake-up dropped because the worker was already signalled.
    pub fn record_dropped_wake(&self, stage: Stage) {
        self.stage(stage).dropped_wakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Raises the stage's queue high-water mark if `depth` exceeds it.
    pub fn observe_depth(&self, stage: Stage, depth: usize) {
        self.stage(stage)
            .peak_depth
            .fetch_max(depth, Ordering::AcqRel);
    }

    pub fn processed(&self, stage: Stage) -> u64 {
        self.stage(stage).processed.load(Ordering::Relaxed)
    }

    /// Mean latency per processed item; `None` before the first item.
    pub fn average_latency(&self, stage: Stage) -> Option<Duration> {
        let metrics = self.stage(stage);
        let processed = metrics.processed.load(Ordering::Relaxed);
        if processed == 0 {
            return None;
        }
        let total = metrics.total_latency_us.load(Ordering::Relaxed);
        Some(Duration::from_micros(total / processed))
    }

    /// Snapshot of every stage. `depths` supplies the current queue depth.
    pub fn stage_snapshots(&self, depths: impl Fn(Stage) -> usize) -> Vec<StageSnapshot> {
        Stage::ALL
            .iter()
            .map(|&stage| {
                let metrics = self.stage(stage);
                StageSnapshot {
                    stage,
                    queue_depth: depths(stage),
                    peak_queue_depth: metrics.peak_depth.load(Ordering::Acquire),
                    processed: metrics.processed.load(Ordering::Relaxed),
                    contended: metrics.contended.load(Ordering::Relaxed),
                    dropped_wakes: metrics.dropped_wakes.load(Ordering::Relaxed),
                    average_latency: self.average_latency(stage),
                }
            })
            .collect()
    }
}

/// Point-in-time metrics of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub queue_depth: usize,
    pub peak_queue_depth: usize,
    pub processed: u64,
    /// Cells deferred because their lock was held.
    pub contended: u64,
    pub dropped_wakes: u64,
    pub average_latency: Option<Duration>,
}

/// Point-in-time view of the whole pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    /// False until startup replay finishes, and after shutdown.
    pub running: bool,
    pub stages: Vec<StageSnapshot>,
    /// Working-set cells per status, in status order.
    pub status_counts: Vec<(CellStatus, usize)>,
    pub loaded_cells: usize,
    pub managed_cells: usize,
    pub determined_cells: usize,
    pub source_cells: usize,
    pub clusters: Vec<(ClusterTypeId, usize)>,
}

impl HealthSnapshot {
    pub fn stage(&self, stage: Stage) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.status_counts
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }

    /// Total items waiting across all stages.
    pub fn backlog(&self) -> usize {
        self.stages.iter().map(|s| s.queue_depth).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stage_from_u8() {
        assert_eq!(Stage::from_u8(0), Some(Stage::Determine));
        assert_eq!(Stage::from_u8(3), Some(Stage::Edit));
        assert_eq!(Stage::from_u8(4), None);
        assert_eq!(Stage::Pregenerate.to_string(), "pregenerate");
    }

    #[test]
    fn test_initial_state() {
        let health = PipelineHealth::new();

        assert_eq!(health.processed(Stage::Clean), 0);
        assert!(health.average_latency(Stage::Clean).is_none());
    }

    #[test]
    fn test_average_latency() {
        let health = PipelineHealth::new();
        health.record_processed(Stage::Edit, Duration::from_millis(2));
        health.record_processed(Stage::Edit, Duration::from_millis(4));

        assert_eq!(health.processed(Stage::Edit), 2);
        assert_eq!(health.average_latency(Stage::Edit), Some(Duration::from_millis(3)));
        assert!(health.average_latency(Stage::Determine).is_none());
    }

    #[test]
    fn test_snapshot_uses_supplied_depths() {
        let health = PipelineHealth::new();
        health.observe_depth(Stage::Clean, 7);
        health.observe_depth(Stage::Clean, 3);
        health.record_contended(Stage::Clean);
        health.record_dropped_wake(Stage::Clean);

        let stages = health.stage_snapshots(|stage| stage as usize);
        let clean = &stages[Stage::Clean as usize];

        assert_eq!(stages.len(), 4);
        assert_eq!(clean.queue_depth, 1);
        assert_eq!(clean.peak_queue_depth, 7);
        assert_eq!(clean.contended, 1);
        assert_eq!(clean.dropped_wakes, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let health = Arc::new(PipelineHealth::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let h = Arc::clone(&health);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    h.record_processed(Stage::Determine, Duration::from_micros(10));
                    h.observe_depth(Stage::Determine, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(health.processed(Stage::Determine), 800);
        assert_eq!(
            health.average_latency(Stage::Determine),
            Some(Duration::from_micros(10))
        );
        assert_eq!(
            health.stage_snapshots(|_| 0)[0].peak_queue_depth,
            99
        );
    }

    #[test]
    fn test_snapshot_helpers() {
        let health = PipelineHealth::new();
        let snapshot = HealthSnapshot {
            running: true,
            stages: health.stage_snapshots(|_| 2),
            status_counts: vec![(CellStatus::Generated, 4)],
            loaded_cells: 4,
            managed_cells: 4,
            determined_cells: 10,
            source_cells: 1,
            clusters: Vec::new(),
        };

        assert_eq!(snapshot.backlog(), 8);
        assert_eq!(snapshot.count(CellStatus::Generated), 4);
        assert_eq!(snapshot.count(CellStatus::Complete), 0);
        assert!(snapshot.stage(Stage::Edit).is_some());
    }
}
