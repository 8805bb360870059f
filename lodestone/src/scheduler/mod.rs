//! Cell pipeline scheduling.
//!
//! - [`index`]: global spacing index and source-cell log
//! - [`queue`]: per-stage queues and workers
//! - [`health`]: lock-free pipeline metrics
//! - [`eviction`]: idle-cell sweep
//! - [`manager`]: the [`PipelineScheduler`] tying them together

pub mod eviction;
pub mod health;
pub mod index;
pub mod manager;
pub mod queue;

pub use eviction::{CellMap, EvictionSweep, SweepStats};
pub use health::{HealthSnapshot, PipelineHealth, Stage, StageSnapshot};
pub use index::{ClusterCells, GlobalIndex};
pub use manager::{ClusterLocation, PipelineScheduler};
pub use queue::{StageQueue, StageWorker, StepOutcome};
