//! Idle-cell eviction sweep.
//!
//! Periodically refreshes the "still loaded" stamp of loaded cells, notices
//! cells the host dropped without telling us, and removes unloaded cells
//! from the working set once they are finished or have been idle past the
//! configured timeout. Evicted cells lose only in-memory progress: their
//! determination lives in the global index.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cell::{CellId, ManagedCell};
use crate::context::WorldContext;

/// Working set of one world, keyed by cell.
pub type CellMap = DashMap<CellId, Arc<ManagedCell>>;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub touched: usize,
    /// Cells marked unloaded because the host no longer has them.
    pub unloaded: usize,
    pub evicted: usize,
}

/// Background sweep over the working set.
pub struct EvictionSweep {
    cells: Arc<CellMap>,
    ctx: WorldContext,
    interval: Duration,
}

impl EvictionSweep {
    pub fn new(cells: Arc<CellMap>, ctx: WorldContext) -> Self {
        let interval = ctx.config().scheduler.eviction_interval;
        Self {
            cells,
            ctx,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs the sweep until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Eviction sweep shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
    }

    /// One pass over the working set.
    pub fn sweep(&self) -> SweepStats {
        let idle_timeout = self.ctx.config().scheduler.idle_timeout;
        let world = self.ctx.world();
        let cells: Vec<Arc<ManagedCell>> = self
            .cells
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut stats = SweepStats::default();
        for cell in cells {
            if cell.is_loaded() {
                if world.chunk_exists(cell.id()) {
                    cell.touch_loaded();
                    stats.touched += 1;
                } else {
                    cell.mark_unloaded();
                    cell.set_ready(false);
                    stats.unloaded += 1;
                }
                continue;
            }

            if cell.status().is_terminal() || cell.idle_for() > idle_timeout {
                let removed = self
                    .cells
                    .remove_if(&cell.id(), |_, current| {
                        Arc::ptr_eq(current, &cell) && !current.is_loaded()
                    })
                    .is_some();
                if removed {
                    stats.evicted += 1;
                }
            }
        }

        if stats.unloaded > 0 || stats.evicted > 0 {
            debug!(
                touched = stats.touched,
                unloaded = stats.unloaded,
                evicted = stats.evicted,
                remaining = self.cells.len(),
                "Eviction sweep"
            );
        }
        stats
    }
}
