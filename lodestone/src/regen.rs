//! Periodic regeneration of generated clusters.
//!
//! The [`RegenScheduler`] tracks a period boundary in world ticks. The host
//! reports ticks; once a tick passes the period end a new period starts and
//! a [`RegenPass`] re-enters every generated or harvested cell whose
//! cluster types allow regeneration.
//!
//! The boundary is persisted so a restart does not reset the clock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cell::{CellLock, ManagedCell};
use crate::config::{ClusterConfig, RegenSettings};
use crate::persistence::{self, PersistenceStore, KEY_REGEN_PERIOD};
use crate::scheduler::CellMap;

/// Rounds a pass retries cells whose lock was held.
const MAX_PASS_ROUNDS: usize = 20;

/// One regen period, in world ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenPeriod {
    pub start: u64,
    pub end: u64,
    pub length: u64,
}

impl RegenPeriod {
    pub fn starting_at(tick: u64, length: u64) -> Self {
        Self {
            start: tick,
            end: tick.saturating_add(length),
            length,
        }
    }
}

/// Tracks the current regen period and whether a pass is running.
#[derive(Debug)]
pub struct RegenScheduler {
    period: Mutex<Option<RegenPeriod>>,
    level: AtomicUsize,
    pass_running: AtomicBool,
    passes: AtomicU64,
}

impl RegenScheduler {
    pub fn new(initial_level: usize) -> Self {
        Self {
            period: Mutex::new(None),
            level: AtomicUsize::new(initial_level),
            pass_running: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    /// Loads the persisted boundary, if any.
    pub fn restore(&self, store: &dyn PersistenceStore) {
        let restored: Option<RegenPeriod> = persistence::load(store, KEY_REGEN_PERIOD);
        if let Some(period) = restored {
            debug!(start = period.start, end = period.end, "Restored regen period");
        }
        *self.period.lock() = restored;
    }

    /// Writes the current boundary. Returns false if nothing was written.
    pub fn persist(&self, store: &dyn PersistenceStore) -> bool {
        match *self.period.lock() {
            Some(period) => persistence::save(store, KEY_REGEN_PERIOD, &period),
            None => false,
        }
    }

    pub fn period(&self) -> Option<RegenPeriod> {
        *self.period.lock()
    }

    pub fn level(&self) -> usize {
        self.level.load(Ordering::Relaxed)
    }

    /// Selects the period length used from the next boundary on.
    pub fn set_level(&self, level: usize) {
        let old = self.level.swap(level, Ordering::Relaxed);
        if old != level {
            info!(old_level = old, new_level = level, "Regen level changed");
        }
    }

    /// Advances the period clock to `tick`.
    ///
    /// Returns true when `tick` passed the period end, in which case the
    /// next period has already been started at `tick`.
    pub fn check(&self, tick: u64, settings: &RegenSettings) -> bool {
        if !settings.enabled {
            return false;
        }
        let length = settings.period_for(self.level());
        let mut period = self.period.lock();
        match *period {
            Some(current) if tick > current.end => {
                *period = Some(RegenPeriod::starting_at(tick, length));
                true
            }
            Some(current) if tick >= current.start => false,
            // First tick, or the world clock went backwards.
            _ => {
                *period = Some(RegenPeriod::starting_at(tick, length));
                false
            }
        }
    }

    /// Claims the right to run a pass. False while one is in flight.
    pub fn try_begin_pass(&self) -> bool {
        self.pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.pass_running.store(false, Ordering::Release);
    }

    pub fn is_pass_running(&self) -> bool {
        self.pass_running.load(Ordering::Acquire)
    }

    /// Completed passes since start.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

/// One sweep re-entering regen candidates.
pub struct RegenPass {
    cells: Arc<CellMap>,
    config: Arc<ClusterConfig>,
    retry_interval: Duration,
}

impl RegenPass {
    pub fn new(cells: Arc<CellMap>, config: Arc<ClusterConfig>, retry_interval: Duration) -> Self {
        Self {
            cells,
            config,
            retry_interval,
        }
    }

    /// Moves candidates to REGENERATED, calling `on_regenerated` for each
    /// after its lock is released. Returns the number regenerated.
    pub async fn run<F>(self, shutdown: CancellationToken, mut on_regenerated: F) -> usize
    where
        F: FnMut(&ManagedCell),
    {
        let mut pending: Vec<Arc<ManagedCell>> = self
            .cells
            .iter()
            .filter(|entry| entry.value().status().is_regen_candidate())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        info!(candidates = pending.len(), "Regen pass starting");

        let mut regenerated = 0;
        for round in 0..MAX_PASS_ROUNDS {
            pending.retain(|cell| match self.try_regen(cell) {
                None => true,
                Some(true) => {
                    regenerated += 1;
                    on_regenerated(cell.as_ref());
                    false
                }
                Some(false) => false,
            });
            if pending.is_empty() {
                break;
            }
            debug!(round, contended = pending.len(), "Regen pass retrying busy cells");
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        if !pending.is_empty() {
            warn!(skipped = pending.len(), "Regen pass gave up on busy cells");
        }
        info!(regenerated, "Regen pass finished");
        regenerated
    }

    /// `None` if the cell was busy, otherwise whether it was regenerated.
    fn try_regen(&self, cell: &ManagedCell) -> Option<bool> {
        let mut guard = match cell.try_lock() {
            CellLock::Acquired(guard) => guard,
            CellLock::Contended => return None,
        };
        if !self.config.any_regen(guard.cluster_types().keys()) {
            return Some(false);
        }
        Some(guard.begin_regen())
    }
}
