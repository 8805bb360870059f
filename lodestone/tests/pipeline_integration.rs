//! Integration tests for the cell pipeline.
//!
//! These tests drive a running [`PipelineScheduler`] against an in-memory
//! world and verify:
//! - Loaded cells are determined and cluster cells run through to GENERATED
//! - Cluster cells without sightings wait in DETERMINED
//! - Harvest detection and regen passes
//! - Startup replay reproduces the persisted placement
//! - The query and command API

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lodestone::config::{
    ClusterConfig, ClusterTypeSettings, PlacementSettings, RegenSettings, SchedulerSettings,
    SharedConfig, Volume,
};
use lodestone::persistence::{JsonFileStore, MemoryStore, PersistenceStore};
use lodestone::scheduler::Stage;
use lodestone::{
    BlockPos, CellId, CellStatus, ClusterTypeId, GenerationObserver, MaterialId,
    PipelineScheduler, WorldContext, WorldHandle,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

const IRON: MaterialId = MaterialId(15);
const STONE: MaterialId = MaterialId(1);

/// World whose blocks live in a map. Every cell counts as loaded.
#[derive(Default)]
struct MapWorld {
    blocks: DashMap<BlockPos, MaterialId>,
}

impl WorldHandle for MapWorld {
    fn seed(&self) -> u64 {
        0x5eed
    }

    fn chunk_exists(&self, _cell: CellId) -> bool {
        true
    }

    fn read_material(&self, pos: BlockPos) -> Option<MaterialId> {
        self.blocks.get(&pos).map(|m| *m)
    }

    fn write_material(&self, pos: BlockPos, material: MaterialId) -> bool {
        self.blocks.insert(pos, material);
        true
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn test_config() -> ClusterConfig {
    let scheduler = SchedulerSettings {
        poll_interval: ms(2),
        readiness_interval: ms(5),
        harvest_interval: ms(10),
        shutdown_grace: ms(500),
        ..SchedulerSettings::default()
    };
    let regen = RegenSettings {
        enabled: true,
        periods: vec![20],
        initial_level: 0,
    };
    ClusterConfig::new(PlacementSettings::default(), scheduler, regen).with_type(
        ClusterTypeSettings::new("iron", IRON)
            .with_spawn_rate(24.0)
            .with_volume(Volume::cube(1))
            .with_density(1.0),
    )
}

fn build(world: Arc<MapWorld>, store: Arc<dyn PersistenceStore>) -> PipelineScheduler {
    let ctx = WorldContext::new(world, Arc::new(SharedConfig::new(test_config())), store);
    PipelineScheduler::new(ctx)
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(ms(5)).await;
    }
}

async fn started(scheduler: &PipelineScheduler) {
    assert!(scheduler.start());
    wait_for("replay", || scheduler.is_running()).await;
}

fn iron() -> ClusterTypeId {
    ClusterTypeId::new("iron")
}

/// Determines the origin batch and returns its iron cells.
async fn origin_clusters(scheduler: &PipelineScheduler) -> Vec<CellId> {
    scheduler.on_cell_loaded(CellId::new(0, 0));
    wait_for("origin batch", || {
        scheduler.index().is_determined(&CellId::new(0, 0))
    })
    .await;
    let mut cells: Vec<CellId> = scheduler
        .index()
        .cluster_cells(Some(&iron()))
        .into_iter()
        .map(|(_, cell)| cell)
        .collect();
    cells.sort();
    assert!(!cells.is_empty(), "origin batch placed no clusters");
    cells
}

/// Loads `cell` and reports one iron sighting at its centre.
fn load_with_sighting(scheduler: &PipelineScheduler, cell: CellId) -> BlockPos {
    let pos = cell.center(40);
    scheduler.on_material_placed(pos, IRON);
    scheduler.on_cell_loaded(cell);
    pos
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_cluster_cell_runs_to_generated() {
    let world = Arc::new(MapWorld::default());
    let scheduler = build(Arc::clone(&world), Arc::new(MemoryStore::new()));
    started(&scheduler).await;

    let clusters = origin_clusters(&scheduler).await;
    let targets: Vec<(CellId, BlockPos)> = clusters
        .iter()
        .take(3)
        .map(|cell| (*cell, load_with_sighting(&scheduler, *cell)))
        .collect();

    wait_for("generation", || {
        targets
            .iter()
            .all(|(cell, _)| scheduler.cell_status(*cell) == Some(CellStatus::Generated))
    })
    .await;

    for (_, source) in &targets {
        assert_eq!(world.read_material(*source), Some(IRON));
    }
    let snapshot = scheduler.health_snapshot();
    assert!(snapshot.count(CellStatus::Generated) >= targets.len());
    assert!(snapshot.stage(Stage::Edit).is_some_and(|s| s.processed > 0));

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_empty_cell_completes_and_leaves_working_set() {
    let scheduler = build(Arc::new(MapWorld::default()), Arc::new(MemoryStore::new()));
    started(&scheduler).await;
    origin_clusters(&scheduler).await;

    let empty = (0..16)
        .flat_map(|x| (0..16).map(move |z| CellId::new(x - 8, z - 8)))
        .find(|cell| scheduler.index().is_determined(cell) && !scheduler.index().has_cluster(cell))
        .expect("origin batch has empty cells");
    scheduler.on_cell_loaded(empty);

    wait_for("eviction of completed cell", || scheduler.cell(empty).is_none()).await;
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cluster_cell_without_sightings_waits() {
    let scheduler = build(Arc::new(MapWorld::default()), Arc::new(MemoryStore::new()));
    started(&scheduler).await;
    let cell = origin_clusters(&scheduler).await[0];

    scheduler.on_cell_loaded(cell);
    wait_for("settle", || {
        scheduler.cell_status(cell) == Some(CellStatus::Determined)
    })
    .await;
    tokio::time::sleep(ms(50)).await;

    assert_eq!(scheduler.cell_status(cell), Some(CellStatus::Determined));

    // A late sighting still gets it moving.
    load_with_sighting(&scheduler, cell);
    wait_for("generation", || {
        scheduler.cell_status(cell) == Some(CellStatus::Generated)
    })
    .await;
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_harvest_then_regen_restores_cluster() {
    let world = Arc::new(MapWorld::default());
    let scheduler = build(Arc::clone(&world), Arc::new(MemoryStore::new()));
    started(&scheduler).await;
    let cell = origin_clusters(&scheduler).await[0];
    let source = load_with_sighting(&scheduler, cell);
    wait_for("generation", || {
        scheduler.cell_status(cell) == Some(CellStatus::Generated)
    })
    .await;

    world.blocks.insert(source, STONE);
    wait_for("harvest", || {
        scheduler.cell_status(cell) == Some(CellStatus::Harvested)
    })
    .await;

    scheduler.on_tick(0);
    scheduler.on_tick(21);
    wait_for("regeneration", || {
        scheduler.cell_status(cell) == Some(CellStatus::Generated)
    })
    .await;

    assert_eq!(world.read_material(source), Some(IRON));
    wait_for("pass bookkeeping", || scheduler.regen().passes() == 1).await;
    scheduler.shutdown().await;
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_replay_reproduces_placement() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world").join("lodestone.json");
    let far = CellId::new(300, -300);

    let (sources, mut clusters) = {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let scheduler = build(Arc::new(MapWorld::default()), store);
        started(&scheduler).await;
        scheduler.on_cell_loaded(CellId::new(2, 2));
        scheduler.on_cell_loaded(far);
        wait_for("determination", || {
            scheduler.index().is_determined(&CellId::new(2, 2))
                && scheduler.index().is_determined(&far)
        })
        .await;
        scheduler.shutdown().await;
        (scheduler.index().sources(), scheduler.index().cluster_cells(None))
    };
    clusters.sort();
    assert!(path.exists());

    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let restarted = build(Arc::new(MapWorld::default()), store);
    started(&restarted).await;

    let mut replayed = restarted.index().cluster_cells(None);
    replayed.sort();
    assert_eq!(restarted.index().sources(), sources);
    assert_eq!(replayed, clusters);
    assert!(restarted.index().is_determined(&far));
    restarted.shutdown().await;
}

// =============================================================================
// Query and command API
// =============================================================================

#[tokio::test]
async fn test_add_cluster_and_locate() {
    let world = Arc::new(MapWorld::default());
    let scheduler = build(Arc::clone(&world), Arc::new(MemoryStore::new()));
    started(&scheduler).await;

    let pos = BlockPos::new(5_000, 70, 5_000);
    assert!(scheduler.add_cluster(&iron(), pos));
    assert!(!scheduler.add_cluster(&iron(), pos));
    assert!(!scheduler.add_cluster(&ClusterTypeId::new("gold"), BlockPos::new(-5_000, 70, 0)));

    let nearest = scheduler.locate_clusters(BlockPos::new(5_000, 70, 5_000), None, 1);
    assert_eq!(nearest.len(), 1);
    assert_eq!(nearest[0].pos, pos);
    assert_eq!(nearest[0].cluster, iron());

    // Loading the cell writes the manually placed cluster.
    scheduler.on_cell_loaded(pos.cell());
    wait_for("manual cluster generation", || {
        scheduler.cell_status(pos.cell()) == Some(CellStatus::Generated)
    })
    .await;
    assert_eq!(world.read_material(pos), Some(IRON));
    assert!(scheduler.force_reprocess(pos.cell()));

    scheduler.shutdown().await;
    assert!(!scheduler.add_cluster(&iron(), BlockPos::new(9_000, 70, 9_000)));
}
