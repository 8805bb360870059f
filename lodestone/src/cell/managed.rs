//! Per-cell state machine.
//!
//! A [`ManagedCell`] owns its mutable [`CellState`] behind a mutex that is
//! only ever try-locked: workers that find a cell busy skip it and pick it
//! up again on their next poll. The current status is also mirrored into
//! an atomic when the guard is released, so scans and health snapshots can
//! read it without touching the lock.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rand::Rng;
use tracing::{debug, warn};

use super::id::{BlockPos, CellId, ClusterTypeId, MaterialId};
use super::sampling::SourceSampler;
use super::status::{CellStatus, Transition, TransitionError};
use crate::time::{elapsed_since, now_millis};
use crate::world::WorldHandle;

/// Upper bound on sightings parked while a cell is locked.
const MAX_PARKED_SIGHTINGS: usize = 4096;

/// A block write that has not yet reached the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub cluster: ClusterTypeId,
    pub pos: BlockPos,
    pub material: MaterialId,
}

/// Result of [`CellState::apply_edits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The cell was not waiting for edits.
    NotReady,
    /// Every edit was written and the status advanced.
    Applied { written: usize, status: CellStatus },
    /// Some writes were refused; they stay queued for the next attempt.
    Partial { written: usize, failed: usize },
}

/// Mutable state of a cell. Only reachable through a [`CellGuard`].
#[derive(Debug)]
pub struct CellState {
    id: CellId,
    status: CellStatus,
    cluster_types: BTreeMap<ClusterTypeId, Option<BlockPos>>,
    pending_edits: Vec<PendingEdit>,
    placed_edits: Vec<PendingEdit>,
    sampler: SourceSampler,
}

impl CellState {
    fn new(id: CellId) -> Self {
        Self {
            id,
            status: CellStatus::None,
            cluster_types: BTreeMap::new(),
            pending_edits: Vec::new(),
            placed_edits: Vec::new(),
            sampler: SourceSampler::new(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    /// Assigned cluster types and their source positions.
    pub fn cluster_types(&self) -> &BTreeMap<ClusterTypeId, Option<BlockPos>> {
        &self.cluster_types
    }

    pub fn has_clusters(&self) -> bool {
        !self.cluster_types.is_empty()
    }

    pub fn pending_edits(&self) -> &[PendingEdit] {
        &self.pending_edits
    }

    /// Edits already written, kept for harvest detection.
    pub fn placed_edits(&self) -> &[PendingEdit] {
        &self.placed_edits
    }

    pub fn sampler(&self) -> &SourceSampler {
        &self.sampler
    }

    /// Moves the cell to `next` if the transition table allows it.
    ///
    /// CLEANED -> DETERMINED is applied but logged; cluster types are left
    /// untouched.
    pub fn transition(&mut self, next: CellStatus) -> Result<Transition, TransitionError> {
        let kind = self.status.classify(next);
        match kind {
            Transition::Unchanged => {}
            Transition::Forward => self.status = next,
            Transition::Anomaly => {
                warn!(
                    cell = %self.id,
                    from = %self.status,
                    to = %next,
                    clusters = self.cluster_types.len(),
                    "Cell moved back from cleaned to determined"
                );
                self.status = next;
            }
            Transition::Illegal => {
                debug!(cell = %self.id, from = %self.status, to = %next, "Rejected transition");
                return Err(TransitionError {
                    from: self.status,
                    to: next,
                });
            }
        }
        Ok(kind)
    }

    /// Merges cluster types with unset source positions.
    ///
    /// Types already present are left alone. Once the cell is determined
    /// its key set is frozen and new types are refused. Returns the number
    /// of types added.
    pub fn add_cluster_types<I>(&mut self, types: I) -> usize
    where
        I: IntoIterator<Item = ClusterTypeId>,
    {
        let mut added = 0;
        for ty in types {
            if self.cluster_types.contains_key(&ty) {
                continue;
            }
            if self.status.is_determined() {
                debug!(
                    cell = %self.id,
                    cluster = %ty,
                    "Refusing new cluster type on determined cell"
                );
                continue;
            }
            self.cluster_types.insert(ty, None);
            added += 1;
        }
        added
    }

    /// Sets the source position of an already assigned type.
    ///
    /// Positions only ever go from unset to set; returns false otherwise.
    pub fn set_source(&mut self, ty: &ClusterTypeId, pos: BlockPos) -> bool {
        match self.cluster_types.get_mut(ty) {
            Some(slot) if slot.is_none() => {
                *slot = Some(pos);
                true
            }
            _ => false,
        }
    }

    /// Offers a sighting of `ty` at `pos` to the reservoir.
    ///
    /// Ignored once the cell has been cleaned.
    pub fn sample<R: Rng + ?Sized>(&mut self, ty: &ClusterTypeId, pos: BlockPos, rng: &mut R) {
        if self.status.accepts_sightings() {
            self.sampler.sample(ty, pos, rng);
        }
    }

    /// Copies sampled picks into every unset source position.
    ///
    /// Returns the number of positions filled.
    pub fn select_source_positions(&mut self) -> usize {
        let mut filled = 0;
        for (ty, source) in self.cluster_types.iter_mut() {
            if source.is_none() {
                if let Some(pick) = self.sampler.pick(ty) {
                    *source = Some(pick);
                    filled += 1;
                }
            }
        }
        filled
    }

    pub fn clear_samples(&mut self) {
        self.sampler.clear();
    }

    /// True when every assigned type has a source position.
    pub fn has_ready_clusters(&self) -> bool {
        self.cluster_types.values().all(Option::is_some)
    }

    pub fn queue_edit(&mut self, edit: PendingEdit) {
        self.pending_edits.push(edit);
    }

    /// True when the edit worker should write this cell.
    pub fn is_edit_ready(&self) -> bool {
        self.status.awaits_edits() || (self.status == CellStatus::Cleaned && !self.has_clusters())
    }

    /// Writes pending edits through `world`.
    ///
    /// When every write succeeds the queue is cleared and the cell advances
    /// to GENERATED, or straight to COMPLETE if it holds no clusters.
    /// Refused writes stay queued.
    pub fn apply_edits<W: WorldHandle + ?Sized>(&mut self, world: &W) -> ApplyOutcome {
        if !self.is_edit_ready() {
            return ApplyOutcome::NotReady;
        }

        let mut written = 0;
        let mut failed = Vec::new();
        for edit in self.pending_edits.drain(..) {
            if world.write_material(edit.pos, edit.material) {
                written += 1;
                self.placed_edits.push(edit);
            } else {
                failed.push(edit);
            }
        }

        if !failed.is_empty() {
            let failed_count = failed.len();
            self.pending_edits = failed;
            return ApplyOutcome::Partial {
                written,
                failed: failed_count,
            };
        }

        let next = if self.has_clusters() {
            CellStatus::Generated
        } else {
            CellStatus::Complete
        };
        match self.transition(next) {
            Ok(_) => ApplyOutcome::Applied {
                written,
                status: next,
            },
            Err(_) => ApplyOutcome::NotReady,
        }
    }

    /// Checks whether generated material is still in place.
    ///
    /// On the first position whose live material differs from what was
    /// written, the cell flips to HARVESTED and both edit lists are cleared.
    /// Only a regen pass can bring it back.
    pub fn detect_harvest<W: WorldHandle + ?Sized>(&mut self, world: &W) -> bool {
        if self.status != CellStatus::Generated {
            return false;
        }

        let mismatch = self
            .placed_edits
            .iter()
            .chain(self.pending_edits.iter())
            .find(|edit| world.read_material(edit.pos) != Some(edit.material))
            .map(|edit| edit.pos);

        let Some(pos) = mismatch else {
            return false;
        };

        debug!(cell = %self.id, %pos, "Generated cluster harvested");
        self.pending_edits.clear();
        self.placed_edits.clear();
        self.transition(CellStatus::Harvested).is_ok()
    }

    /// Re-enters a generated or harvested cell for regeneration.
    pub fn begin_regen(&mut self) -> bool {
        if !self.status.is_regen_candidate() {
            return false;
        }
        self.placed_edits.clear();
        self.transition(CellStatus::Regenerated).is_ok()
    }
}

/// Outcome of [`ManagedCell::try_lock`].
pub enum CellLock<'a> {
    Acquired(CellGuard<'a>),
    /// Another worker holds the cell; skip it and retry later.
    Contended,
}

impl<'a> CellLock<'a> {
    /// Returns the guard if the lock was acquired.
    pub fn acquired(self) -> Option<CellGuard<'a>> {
        match self {
            CellLock::Acquired(guard) => Some(guard),
            CellLock::Contended => None,
        }
    }
}

/// Exclusive access to a cell's state.
///
/// Publishes the status to the cell's atomic mirror on drop.
pub struct CellGuard<'a> {
    cell: &'a ManagedCell,
    state: MutexGuard<'a, CellState>,
}

impl CellGuard<'_> {
    /// Feeds sightings parked while the cell was locked into the reservoir.
    pub fn absorb_parked<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        let parked = std::mem::take(&mut *self.cell.parked.lock());
        let count = parked.len();
        for (ty, pos) in parked {
            self.state.sample(&ty, pos, rng);
        }
        count
    }
}

impl Deref for CellGuard<'_> {
    type Target = CellState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl DerefMut for CellGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl Drop for CellGuard<'_> {
    fn drop(&mut self) {
        self.cell
            .status
            .store(self.state.status as u8, Ordering::Release);
    }
}

/// A cell in the scheduler's working set.
#[derive(Debug)]
pub struct ManagedCell {
    id: CellId,
    state: Mutex<CellState>,
    status: AtomicU8,
    ready: AtomicBool,
    loaded: AtomicBool,
    time_loaded_ms: AtomicU64,
    time_unloaded_ms: AtomicU64,
    parked: Mutex<Vec<(ClusterTypeId, BlockPos)>>,
}

impl ManagedCell {
    /// Creates an unloaded cell with status NONE.
    pub fn new(id: CellId) -> Self {
        let now = now_millis();
        Self {
            id,
            state: Mutex::new(CellState::new(id)),
            status: AtomicU8::new(CellStatus::None as u8),
            ready: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            time_loaded_ms: AtomicU64::new(now),
            time_unloaded_ms: AtomicU64::new(now),
            parked: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Status as of the last released guard.
    #[inline]
    pub fn status(&self) -> CellStatus {
        CellStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Attempts to lock the cell without blocking.
    pub fn try_lock(&self) -> CellLock<'_> {
        match self.state.try_lock() {
            Some(state) => CellLock::Acquired(CellGuard { cell: self, state }),
            None => CellLock::Contended,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn mark_loaded(&self) {
        self.time_loaded_ms.store(now_millis(), Ordering::Relaxed);
        self.loaded.store(true, Ordering::Release);
    }

    pub fn mark_unloaded(&self) {
        self.time_unloaded_ms.store(now_millis(), Ordering::Relaxed);
        self.loaded.store(false, Ordering::Release);
    }

    /// Refreshes the "still loaded" stamp.
    pub fn touch_loaded(&self) {
        self.time_loaded_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub fn time_loaded_ms(&self) -> u64 {
        self.time_loaded_ms.load(Ordering::Relaxed)
    }

    pub fn time_unloaded_ms(&self) -> u64 {
        self.time_unloaded_ms.load(Ordering::Relaxed)
    }

    /// How long the cell has been unloaded; zero while loaded.
    pub fn idle_for(&self) -> Duration {
        if self.is_loaded() {
            Duration::ZERO
        } else {
            elapsed_since(self.time_unloaded_ms())
        }
    }

    /// Stores a sighting that arrived while the cell was locked.
    ///
    /// Returns false when the parking area is full and the sighting was
    /// dropped.
    pub fn park_sighting(&self, ty: ClusterTypeId, pos: BlockPos) -> bool {
        let mut parked = self.parked.lock();
        if parked.len() >= MAX_PARKED_SIGHTINGS {
            return false;
        }
        parked.push((ty, pos));
        true
    }

    pub fn parked_sightings(&self) -> usize {
        self.parked.lock().len()
    }
}
