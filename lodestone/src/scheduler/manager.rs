//! Pipeline scheduler.
//!
//! Owns the working set of one world and drives each cell through
//! determine → clean → pregenerate → edit. Every stage has its own queue
//! and worker task; a stage handler try-locks the cell, does its work under
//! the lock, computes the next hop and only submits it after the lock is
//! released.
//!
//! ```text
//!   on_cell_loaded ──► determine ──► clean ──► pregenerate ──► edit
//!                         ▲            ▲            ▲            │
//!   replay (startup) ─────┘  sightings ┘   regen ───┘   readiness┘
//! ```
//!
//! Determination is the only stage that mutates the [`GlobalIndex`]. It
//! runs on a single worker, which is what makes placement decisions
//! reproducible from the persisted source-cell log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::eviction::{CellMap, EvictionSweep};
use super::health::{HealthSnapshot, PipelineHealth, Stage};
use super::index::GlobalIndex;
use super::queue::{StageQueue, StageWorker, StepOutcome};
use crate::cell::{
    ApplyOutcome, BlockPos, CellId, CellLock, CellState, CellStatus, ClusterTypeId, ManagedCell,
    MaterialId, PendingEdit,
};
use crate::config::ClusterConfig;
use crate::context::WorldContext;
use crate::persistence::{self, KEY_SOURCE_CELLS};
use crate::placement::PlacementCalculator;
use crate::regen::{RegenPass, RegenScheduler};
use crate::spiral::SpiralSequencer;
use crate::world::GenerationObserver;

/// Root of the master spiral used inside the strategy radius.
const ORIGIN: CellId = CellId::new(0, 0);

/// Replayed batches between cooperative yields.
const REPLAY_YIELD_EVERY: usize = 16;

/// Where a cell goes after a stage finished with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Determine,
    Clean,
    Pregenerate,
    Edit,
    Evict,
    Idle,
}

/// Next hop for a cell in its current state.
fn next_action(state: &CellState) -> Action {
    match state.status() {
        CellStatus::None => Action::Determine,
        // Cells without clusters pass straight through cleaning.
        CellStatus::Determined => Action::Clean,
        CellStatus::Cleaned if state.has_clusters() => Action::Pregenerate,
        CellStatus::Cleaned => Action::Edit,
        CellStatus::Regenerated if state.pending_edits().is_empty() => Action::Pregenerate,
        CellStatus::Regenerated => Action::Idle,
        CellStatus::Pregenerated => Action::Edit,
        CellStatus::Generated | CellStatus::Harvested => Action::Idle,
        CellStatus::Complete => Action::Evict,
    }
}

/// A cluster reported by [`PipelineScheduler::locate_clusters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLocation {
    pub cluster: ClusterTypeId,
    pub cell: CellId,
    /// Source position when known, otherwise the cell centre.
    pub pos: BlockPos,
    pub status: CellStatus,
}

struct StageQueues {
    determine: Arc<StageQueue>,
    clean: Arc<StageQueue>,
    pregenerate: Arc<StageQueue>,
    edit: Arc<StageQueue>,
}

impl StageQueues {
    fn new(health: &Arc<PipelineHealth>) -> Self {
        let queue = |stage| Arc::new(StageQueue::new(stage, Arc::clone(health)));
        Self {
            determine: queue(Stage::Determine),
            clean: queue(Stage::Clean),
            pregenerate: queue(Stage::Pregenerate),
            edit: queue(Stage::Edit),
        }
    }

    fn get(&self, stage: Stage) -> &Arc<StageQueue> {
        match stage {
            Stage::Determine => &self.determine,
            Stage::Clean => &self.clean,
            Stage::Pregenerate => &self.pregenerate,
            Stage::Edit => &self.edit,
        }
    }
}

/// State shared between the scheduler handle and its tasks.
struct Shared {
    ctx: WorldContext,
    index: GlobalIndex,
    cells: Arc<CellMap>,
    queues: StageQueues,
    health: Arc<PipelineHealth>,
    regen: RegenScheduler,
    running: AtomicBool,
    master: Mutex<SpiralSequencer>,
    /// Reservoir sampling randomness. Always locked after a cell, never before.
    sampling_rng: Mutex<StdRng>,
}

impl Shared {
    fn cell(&self, id: CellId) -> Option<Arc<ManagedCell>> {
        self.cells.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn cell_or_insert(&self, id: CellId) -> Arc<ManagedCell> {
        let entry = self
            .cells
            .entry(id)
            .or_insert_with(|| Arc::new(ManagedCell::new(id)));
        Arc::clone(entry.value())
    }

    fn apply(&self, cell: &ManagedCell, action: Action) {
        let id = cell.id();
        match action {
            Action::Determine => {
                self.queues.determine.push(id);
            }
            Action::Clean => {
                self.queues.clean.push(id);
            }
            Action::Pregenerate => {
                self.queues.pregenerate.push(id);
            }
            Action::Edit => {
                // Unloaded cells are picked up by the readiness scan.
                if cell.is_loaded() {
                    cell.set_ready(true);
                    self.queues.edit.push(id);
                }
            }
            Action::Evict => {
                if self.cells.remove(&id).is_some() {
                    debug!(cell = %id, "Completed cell evicted");
                }
            }
            Action::Idle => {}
        }
    }

    /// Gives a NONE cell the clusters the index decided for it.
    fn settle(&self, state: &mut CellState) {
        if state.status() != CellStatus::None || !self.index.is_determined(&state.id()) {
            return;
        }
        state.add_cluster_types(self.index.types_at(&state.id()));
        if let Err(e) = state.transition(CellStatus::Determined) {
            warn!(cell = %state.id(), error = %e, "Could not settle determined cell");
        }
    }

    /// Settles `cell` and submits it to its next stage.
    ///
    /// A busy cell is handed to the determine queue, which settles it once
    /// the lock is free.
    fn reconcile(&self, cell: &ManagedCell) -> bool {
        let action = match cell.try_lock() {
            CellLock::Acquired(mut guard) => {
                self.settle(&mut guard);
                next_action(&guard)
            }
            CellLock::Contended => {
                self.queues.determine.push(cell.id());
                return false;
            }
        };
        self.apply(cell, action);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Determination
    // ─────────────────────────────────────────────────────────────────────────

    /// Determines one batch rooted at `source` and records it.
    fn run_batch(&self, source: CellId, config: &ClusterConfig) {
        let batch: Vec<CellId> = SpiralSequencer::new(source)
            .take(config.placement.batch_size)
            .collect();
        let mut rng = StdRng::seed_from_u64(self.ctx.batch_seed(source));
        let placement = PlacementCalculator::new(config, &self.index).calculate(&batch, &mut rng);

        for (cell, types) in &placement {
            for ty in types {
                self.index.record_cluster(ty, *cell);
            }
        }

        let mut newly = 0;
        for cell in &batch {
            if self.index.mark_determined(*cell) {
                newly += 1;
                if self.cells.contains_key(cell) {
                    self.queues.determine.push(*cell);
                }
            }
        }
        self.index.record_source(source);

        debug!(
            %source,
            batch = batch.len(),
            newly_determined = newly,
            clusters = placement.len(),
            "Batch determined"
        );
    }

    /// Makes sure `id` is determined, running as many batches as needed.
    fn determine_cell(&self, id: CellId, config: &ClusterConfig) {
        let radius = config.placement.strategy_change_radius;
        if id.chebyshev(&ORIGIN) > radius {
            self.run_batch(id, config);
            return;
        }

        // Inside the radius batches root at the next undetermined cell of
        // the master spiral, so placement is independent of load order.
        let side = 2 * radius as u64 + 1;
        let limit = side * side + 1;
        let mut batches = 0u64;
        while !self.index.is_determined(&id) {
            if batches >= limit {
                warn!(cell = %id, batches, "Master spiral did not reach cell");
                return;
            }
            let next = self.master.lock().find(|c| !self.index.is_determined(c));
            let Some(source) = next else {
                return;
            };
            self.run_batch(source, config);
            batches += 1;
        }
    }

    fn handle_determine(&self, id: CellId) -> StepOutcome {
        if !self.index.is_determined(&id) {
            let config = self.ctx.config();
            self.determine_cell(id, &config);
        }

        let Some(cell) = self.cell(id) else {
            return StepOutcome::Done;
        };
        let action = match cell.try_lock() {
            CellLock::Acquired(mut guard) => {
                self.settle(&mut guard);
                next_action(&guard)
            }
            CellLock::Contended => return StepOutcome::Deferred,
        };
        // An undetermined cell would bounce back into this queue forever.
        if action != Action::Determine {
            self.apply(&cell, action);
        }
        StepOutcome::Done
    }

    /// Re-runs the persisted batches in their original order.
    async fn replay(&self, shutdown: &CancellationToken) {
        let sources: Vec<CellId> =
            persistence::load(self.ctx.store(), KEY_SOURCE_CELLS).unwrap_or_default();
        let config = self.ctx.config();
        let started = Instant::now();
        info!(sources = sources.len(), "Replaying determined source cells");

        for (i, source) in sources.iter().enumerate() {
            if shutdown.is_cancelled() {
                warn!(replayed = i, total = sources.len(), "Replay interrupted by shutdown");
                return;
            }
            self.run_batch(*source, &config);
            if (i + 1) % REPLAY_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.running.store(true, Ordering::Release);
        info!(
            sources = sources.len(),
            determined = self.index.determined_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Replay finished, pipeline running"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clean / pregenerate / edit
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_clean(&self, id: CellId) -> StepOutcome {
        let Some(cell) = self.cell(id) else {
            return StepOutcome::Done;
        };
        let action = {
            let mut guard = match cell.try_lock() {
                CellLock::Acquired(guard) => guard,
                CellLock::Contended => return StepOutcome::Deferred,
            };
            if guard.status() != CellStatus::Determined {
                return StepOutcome::Done;
            }

            if guard.has_clusters() {
                {
                    let mut rng = self.sampling_rng.lock();
                    guard.absorb_parked(&mut *rng);
                }
                guard.select_source_positions();
                if !guard.has_ready_clusters() {
                    trace!(cell = %id, "Waiting for sightings");
                    return StepOutcome::Done;
                }
                guard.clear_samples();
            }

            if let Err(e) = guard.transition(CellStatus::Cleaned) {
                debug!(cell = %id, error = %e, "Clean skipped");
                return StepOutcome::Done;
            }
            debug!(cell = %id, clusters = guard.cluster_types().len(), "Cell cleaned");
            next_action(&guard)
        };
        self.apply(&cell, action);
        StepOutcome::Done
    }

    fn handle_pregenerate(&self, id: CellId) -> StepOutcome {
        let Some(cell) = self.cell(id) else {
            return StepOutcome::Done;
        };
        let action = {
            let mut guard = match cell.try_lock() {
                CellLock::Acquired(guard) => guard,
                CellLock::Contended => return StepOutcome::Deferred,
            };
            let status = guard.status();
            let eligible = match status {
                CellStatus::Cleaned => guard.has_clusters(),
                CellStatus::Regenerated => guard.pending_edits().is_empty(),
                _ => false,
            };
            if !eligible {
                return StepOutcome::Done;
            }

            let config = self.ctx.config();
            let sources: Vec<(ClusterTypeId, BlockPos)> = guard
                .cluster_types()
                .iter()
                .filter_map(|(ty, source)| source.map(|pos| (ty.clone(), pos)))
                .collect();

            let mut queued = 0;
            for (ty, source) in sources {
                let Some(settings) = config.cluster(&ty) else {
                    warn!(cell = %id, cluster = %ty, "Cluster type no longer configured");
                    continue;
                };
                if status == CellStatus::Regenerated && !settings.regen {
                    continue;
                }
                let mut rng = StdRng::seed_from_u64(self.ctx.shape_seed(id, &ty));
                for offset in self.ctx.shapes().generate(settings, &mut rng) {
                    guard.queue_edit(PendingEdit {
                        cluster: ty.clone(),
                        pos: source.offset(offset),
                        material: settings.material,
                    });
                    queued += 1;
                }
            }

            if let Err(e) = guard.transition(CellStatus::Pregenerated) {
                debug!(cell = %id, error = %e, "Pregenerate skipped");
                return StepOutcome::Done;
            }
            debug!(cell = %id, edits = queued, "Cell pregenerated");
            next_action(&guard)
        };
        self.apply(&cell, action);
        StepOutcome::Done
    }

    fn handle_edit(&self, id: CellId) -> StepOutcome {
        let Some(cell) = self.cell(id) else {
            return StepOutcome::Done;
        };
        if !cell.is_loaded() {
            cell.set_ready(false);
            return StepOutcome::Done;
        }
        let action = {
            let mut guard = match cell.try_lock() {
                CellLock::Acquired(guard) => guard,
                CellLock::Contended => return StepOutcome::Deferred,
            };
            let outcome = guard.apply_edits(self.ctx.world());
            cell.set_ready(guard.is_edit_ready());
            match outcome {
                ApplyOutcome::Applied { written, status } => {
                    debug!(cell = %id, written, %status, "Edits applied");
                    next_action(&guard)
                }
                // Left for the readiness scan, so a refusing host cannot
                // spin the worker.
                ApplyOutcome::Partial { written, failed } => {
                    debug!(cell = %id, written, failed, "Some edits refused, retrying later");
                    Action::Idle
                }
                ApplyOutcome::NotReady => Action::Idle,
            }
        };
        self.apply(&cell, action);
        StepOutcome::Done
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Periodic scans
    // ─────────────────────────────────────────────────────────────────────────

    fn snapshot_cells(&self) -> Vec<Arc<ManagedCell>> {
        self.cells
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Flags loaded cells whose edits can be written and submits them.
    fn scan_ready(&self) -> usize {
        let mut submitted = 0;
        for cell in self.snapshot_cells() {
            if !cell.is_loaded() {
                cell.set_ready(false);
                continue;
            }
            let ready = match cell.try_lock() {
                CellLock::Acquired(guard) => guard.is_edit_ready(),
                CellLock::Contended => continue,
            };
            cell.set_ready(ready);
            if ready && self.queues.edit.push(cell.id()) {
                submitted += 1;
            }
        }
        if submitted > 0 {
            trace!(submitted, "Readiness scan");
        }
        submitted
    }

    /// Checks loaded generated cells for removed material.
    fn check_harvests(&self) -> usize {
        let mut harvested = 0;
        for cell in self.snapshot_cells() {
            if !cell.is_loaded() || cell.status() != CellStatus::Generated {
                continue;
            }
            if let CellLock::Acquired(mut guard) = cell.try_lock() {
                if guard.detect_harvest(self.ctx.world()) {
                    harvested += 1;
                }
            }
        }
        if harvested > 0 {
            info!(harvested, "Harvested clusters detected");
        }
        harvested
    }

    async fn run_scans(self: Arc<Self>, shutdown: CancellationToken) {
        let settings = self.ctx.config().scheduler.clone();
        let mut interval = tokio::time::interval(settings.readiness_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;
        let mut last_harvest = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Readiness scan shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.scan_ready();
                    if last_harvest.elapsed() >= settings.harvest_interval {
                        self.check_harvests();
                        last_harvest = Instant::now();
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sightings
    // ─────────────────────────────────────────────────────────────────────────

    fn record_sighting(&self, pos: BlockPos, material: MaterialId) {
        let types: Vec<ClusterTypeId> = self
            .ctx
            .config()
            .types_for_material(material)
            .map(|settings| settings.id.clone())
            .collect();
        if types.is_empty() {
            return;
        }

        let cell = self.cell_or_insert(pos.cell());
        let needs_clean = match cell.try_lock() {
            CellLock::Acquired(mut guard) => {
                if !guard.status().accepts_sightings() {
                    return;
                }
                let mut rng = self.sampling_rng.lock();
                guard.absorb_parked(&mut *rng);
                for ty in &types {
                    guard.sample(ty, pos, &mut *rng);
                }
                guard.status() == CellStatus::Determined && guard.has_clusters()
            }
            CellLock::Contended => {
                for ty in types {
                    if !cell.park_sighting(ty, pos) {
                        trace!(cell = %cell.id(), %pos, "Parking full, sighting dropped");
                        break;
                    }
                }
                cell.status() == CellStatus::Determined
            }
        };
        if needs_clean {
            self.queues.clean.push(cell.id());
        }
    }
}

/// Per-world placement scheduler and generation pipeline.
///
/// Create one per world with [`PipelineScheduler::new`], call
/// [`start`](Self::start) from inside a Tokio runtime, feed it host
/// notifications, and call [`shutdown`](Self::shutdown) to stop the
/// workers and persist the source-cell log.
pub struct PipelineScheduler {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    runtime: OnceLock<Handle>,
}

impl PipelineScheduler {
    pub fn new(ctx: WorldContext) -> Self {
        let config = ctx.config();
        let health = Arc::new(PipelineHealth::new());
        let sampling_seed = crate::context::mix(ctx.seed(), 0x5a4d_504c);
        let shared = Shared {
            index: GlobalIndex::new(),
            cells: Arc::new(CellMap::new()),
            queues: StageQueues::new(&health),
            health,
            regen: RegenScheduler::new(config.regen.initial_level),
            running: AtomicBool::new(false),
            master: Mutex::new(SpiralSequencer::new(ORIGIN)),
            sampling_rng: Mutex::new(StdRng::seed_from_u64(sampling_seed)),
            ctx,
        };
        Self {
            shared: Arc::new(shared),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            runtime: OnceLock::new(),
        }
    }

    /// Spawns the stage workers and background loops on the current
    /// runtime.
    ///
    /// The determination worker first replays the persisted source cells;
    /// the scheduler reports running once that finishes. Returns false if
    /// already started or called outside a runtime.
    pub fn start(&self) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("Scheduler start requested outside a Tokio runtime");
            return false;
        };
        if self.runtime.set(handle.clone()).is_err() {
            debug!("Scheduler already started");
            return false;
        }

        let shared = &self.shared;
        shared.regen.restore(shared.ctx.store());
        let settings = shared.ctx.config().scheduler.clone();
        let mut tasks = self.tasks.lock();

        let determine = {
            let s = Arc::clone(shared);
            StageWorker::new(
                Arc::clone(&shared.queues.determine),
                settings.poll_interval,
                Arc::clone(&shared.health),
                move |cell| s.handle_determine(cell),
            )
        };
        let replaying = Arc::clone(shared);
        let shutdown = self.shutdown.clone();
        tasks.push(handle.spawn(async move {
            replaying.replay(&shutdown).await;
            determine.run(shutdown).await;
        }));

        let stages: [(Stage, fn(&Shared, CellId) -> StepOutcome); 3] = [
            (Stage::Clean, Shared::handle_clean),
            (Stage::Pregenerate, Shared::handle_pregenerate),
            (Stage::Edit, Shared::handle_edit),
        ];
        for (stage, handler) in stages {
            let s = Arc::clone(shared);
            let worker = StageWorker::new(
                Arc::clone(shared.queues.get(stage)),
                settings.poll_interval,
                Arc::clone(&shared.health),
                move |cell| handler(s.as_ref(), cell),
            );
            tasks.push(handle.spawn(worker.run(self.shutdown.clone())));
        }

        tasks.push(handle.spawn(Arc::clone(shared).run_scans(self.shutdown.clone())));

        let sweep = EvictionSweep::new(Arc::clone(&shared.cells), shared.ctx.clone());
        tasks.push(handle.spawn(sweep.run(self.shutdown.clone())));

        info!(
            seed = shared.ctx.seed(),
            types = shared.ctx.config().type_count(),
            "Pipeline scheduler started"
        );
        true
    }

    /// Stops every task and writes the source-cell log.
    ///
    /// Tasks still running after the configured grace period are aborted.
    pub async fn shutdown(&self) {
        info!("Pipeline scheduler shutting down");
        self.shared.running.store(false, Ordering::Release);
        self.shutdown.cancel();

        let grace = self.shared.ctx.config().scheduler.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Pipeline task failed"),
                Err(_) => {
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "Pipeline task did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }

        self.persist();
        info!(
            sources = self.shared.index.source_count(),
            determined = self.shared.index.determined_count(),
            "Pipeline scheduler stopped"
        );
    }

    /// Writes the source-cell log and regen period. Returns false if the
    /// source log could not be written.
    pub fn persist(&self) -> bool {
        let store = self.shared.ctx.store();
        let saved = persistence::save(store, KEY_SOURCE_CELLS, &self.shared.index.sources());
        self.shared.regen.persist(store);
        saved
    }

    /// True between the end of startup replay and shutdown.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &WorldContext {
        &self.shared.ctx
    }

    pub fn index(&self) -> &GlobalIndex {
        &self.shared.index
    }

    pub fn regen(&self) -> &RegenScheduler {
        &self.shared.regen
    }

    pub fn cell(&self, id: CellId) -> Option<Arc<ManagedCell>> {
        self.shared.cell(id)
    }

    /// Status of a cell in the working set.
    pub fn cell_status(&self, id: CellId) -> Option<CellStatus> {
        self.shared.cell(id).map(|cell| cell.status())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host notifications
    // ─────────────────────────────────────────────────────────────────────────

    /// The host finished loading `id`.
    pub fn on_cell_loaded(&self, id: CellId) {
        let cell = self.shared.cell_or_insert(id);
        cell.mark_loaded();
        self.shared.reconcile(&cell);
    }

    /// The host dropped `id`. The cell stays in the working set until
    /// evicted.
    pub fn on_cell_unloaded(&self, id: CellId) {
        if let Some(cell) = self.shared.cell(id) {
            cell.mark_unloaded();
            cell.set_ready(false);
        }
    }

    /// Advances the regen clock. Starts a regen pass when a period ends.
    pub fn on_tick(&self, tick: u64) {
        let shared = &self.shared;
        let config = shared.ctx.config();
        if !shared.regen.check(tick, &config.regen) {
            return;
        }
        shared.regen.persist(shared.ctx.store());

        if !shared.regen.try_begin_pass() {
            debug!(tick, "Regen pass still running, period boundary skipped");
            return;
        }
        let Some(handle) = self.runtime.get() else {
            warn!(tick, "Scheduler not started, regen pass skipped");
            shared.regen.finish_pass();
            return;
        };

        let pass = RegenPass::new(
            Arc::clone(&shared.cells),
            Arc::clone(&config),
            config.scheduler.poll_interval,
        );
        let owner = Arc::clone(shared);
        let shutdown = self.shutdown.clone();
        let task = handle.spawn(async move {
            let queue = Arc::clone(&owner.queues.pregenerate);
            pass.run(shutdown, move |cell| {
                queue.push(cell.id());
            })
            .await;
            owner.regen.finish_pass();
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Selects which regen period length applies from the next boundary.
    pub fn set_regen_level(&self, level: usize) {
        self.shared.regen.set_level(level);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries and commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Known clusters nearest to `origin`, at most `limit` of them.
    ///
    /// Cells outside the working set report their centre at `origin.y`.
    pub fn locate_clusters(
        &self,
        origin: BlockPos,
        filter: Option<&ClusterTypeId>,
        limit: usize,
    ) -> Vec<ClusterLocation> {
        let mut found: Vec<ClusterLocation> = self
            .shared
            .index
            .cluster_cells(filter)
            .into_iter()
            .map(|(cluster, cell)| {
                let (source, status) = match self.shared.cell(cell) {
                    Some(managed) => {
                        let source = match managed.try_lock() {
                            CellLock::Acquired(guard) => {
                                guard.cluster_types().get(&cluster).copied().flatten()
                            }
                            CellLock::Contended => None,
                        };
                        (source, managed.status().max(CellStatus::Determined))
                    }
                    None => (None, CellStatus::Determined),
                };
                ClusterLocation {
                    pos: source.unwrap_or_else(|| cell.center(origin.y)),
                    cluster,
                    cell,
                    status,
                }
            })
            .collect();

        found.sort_by(|a, b| {
            a.pos
                .distance_sq(&origin)
                .cmp(&b.pos.distance_sq(&origin))
                .then_with(|| a.cell.cmp(&b.cell))
                .then_with(|| a.cluster.cmp(&b.cluster))
        });
        found.truncate(limit);
        found
    }

    /// Places a cluster of `ty` with its source at `pos`, bypassing
    /// placement.
    ///
    /// Only accepted while running, for a configured type, in a cell that
    /// has not been determined yet.
    pub fn add_cluster(&self, ty: &ClusterTypeId, pos: BlockPos) -> bool {
        let shared = &self.shared;
        let id = pos.cell();
        if !self.is_running() {
            debug!(cell = %id, cluster = %ty, "Manual cluster refused, not running");
            return false;
        }
        if shared.ctx.config().cluster(ty).is_none() {
            debug!(cluster = %ty, "Manual cluster refused, unknown type");
            return false;
        }
        if shared.index.is_determined(&id) {
            debug!(cell = %id, "Manual cluster refused, cell already determined");
            return false;
        }

        let cell = shared.cell_or_insert(id);
        let action = {
            let mut guard = match cell.try_lock() {
                CellLock::Acquired(guard) => guard,
                CellLock::Contended => return false,
            };
            if guard.status() != CellStatus::None {
                return false;
            }
            guard.add_cluster_types([ty.clone()]);
            guard.set_source(ty, pos);
            if guard.transition(CellStatus::Determined).is_err() {
                return false;
            }
            shared.index.record_cluster(ty, id);
            shared.index.mark_determined(id);
            next_action(&guard)
        };

        info!(cell = %id, cluster = %ty, %pos, "Cluster added");
        shared.apply(&cell, action);
        true
    }

    /// Re-submits a cell to the stage its status calls for.
    ///
    /// Returns false if the cell is not in the working set or is busy.
    pub fn force_reprocess(&self, id: CellId) -> bool {
        let Some(cell) = self.shared.cell(id) else {
            return false;
        };
        let action = match cell.try_lock() {
            CellLock::Acquired(mut guard) => {
                self.shared.settle(&mut guard);
                next_action(&guard)
            }
            CellLock::Contended => return false,
        };
        info!(cell = %id, action = ?action, "Cell reprocess forced");
        self.shared.apply(&cell, action);
        true
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let shared = &self.shared;
        let mut counts = [0usize; CellStatus::ALL.len()];
        let mut loaded = 0;
        for entry in shared.cells.iter() {
            counts[entry.value().status() as usize] += 1;
            if entry.value().is_loaded() {
                loaded += 1;
            }
        }

        HealthSnapshot {
            running: self.is_running(),
            stages: shared
                .health
                .stage_snapshots(|stage| shared.queues.get(stage).len()),
            status_counts: CellStatus::ALL
                .iter()
                .map(|status| (*status, counts[*status as usize]))
                .collect(),
            loaded_cells: loaded,
            managed_cells: shared.cells.len(),
            determined_cells: shared.index.determined_count(),
            source_cells: shared.index.source_count(),
            clusters: shared.index.cluster_counts(),
        }
    }
}

impl GenerationObserver for PipelineScheduler {
    fn on_material_placed(&self, pos: BlockPos, material: MaterialId) {
        self.shared.record_sighting(pos, material);
    }
}

impl std::fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("running", &self.is_running())
            .field("cells", &self.shared.cells.len())
            .finish_non_exhaustive()
    }
}
