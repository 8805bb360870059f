//! Per-world context.
//!
//! Every component of one world receives the same [`WorldContext`]. There
//! is no process-wide registry; two worlds in one process simply build two
//! contexts.

use std::sync::Arc;

use crate::cell::{CellId, ClusterTypeId};
use crate::config::{ClusterConfig, ConfigProvider};
use crate::persistence::PersistenceStore;
use crate::world::{ShapeGenerator, VolumeShape, WorldHandle};

/// Collaborators and resolved seed for one world instance.
#[derive(Clone)]
pub struct WorldContext {
    world: Arc<dyn WorldHandle>,
    config: Arc<dyn ConfigProvider>,
    store: Arc<dyn PersistenceStore>,
    shapes: Arc<dyn ShapeGenerator>,
    seed: u64,
}

impl WorldContext {
    /// Builds a context using [`VolumeShape`] for cluster shapes.
    ///
    /// The seed is the configured override if present, otherwise the
    /// world's own seed.
    pub fn new(
        world: Arc<dyn WorldHandle>,
        config: Arc<dyn ConfigProvider>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        let seed = config
            .current()
            .placement
            .seed_override
            .unwrap_or_else(|| world.seed());
        Self {
            world,
            config,
            store,
            shapes: Arc::new(VolumeShape),
            seed,
        }
    }

    pub fn with_shape_generator(mut self, shapes: Arc<dyn ShapeGenerator>) -> Self {
        self.shapes = shapes;
        self
    }

    pub fn world(&self) -> &dyn WorldHandle {
        self.world.as_ref()
    }

    pub fn store(&self) -> &dyn PersistenceStore {
        self.store.as_ref()
    }

    pub fn shapes(&self) -> &dyn ShapeGenerator {
        self.shapes.as_ref()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<ClusterConfig> {
        self.config.current()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed for the determination batch rooted at `source`.
    pub fn batch_seed(&self, source: CellId) -> u64 {
        mix(mix(self.seed, source.x as u32 as u64), source.z as u32 as u64)
    }

    /// Seed for shaping cluster `ty` inside `cell`.
    pub fn shape_seed(&self, cell: CellId, ty: &ClusterTypeId) -> u64 {
        let base = mix(mix(self.seed, cell.x as u32 as u64), cell.z as u32 as u64);
        ty.as_str()
            .bytes()
            .fold(base, |acc, byte| mix(acc, byte as u64))
    }
}

impl std::fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContext")
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// SplitMix64 finalizer over `a ^ b`, used to derive independent seeds.
pub fn mix(a: u64, b: u64) -> u64 {
    let mut z = (a ^ b.rotate_left(32)).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
