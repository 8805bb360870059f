//! Collaborator interfaces to the host world.
//!
//! The core never owns world data. It reads and writes single blocks
//! through [`WorldHandle`], learns about generated material through
//! [`GenerationObserver`], and asks a [`ShapeGenerator`] for cluster shapes.

use rand::{Rng, RngCore};

use crate::cell::{BlockPos, CellId, MaterialId, Offset};
use crate::config::ClusterTypeSettings;

/// Capability handle for one world instance.
pub trait WorldHandle: Send + Sync + 'static {
    /// World seed used when no override is configured.
    fn seed(&self) -> u64;

    /// True while the host has the cell loaded.
    fn chunk_exists(&self, cell: CellId) -> bool;

    /// Material at `pos`, or `None` if the position is not readable.
    fn read_material(&self, pos: BlockPos) -> Option<MaterialId>;

    /// Writes `material` at `pos`. Returns false if the host refused.
    fn write_material(&self, pos: BlockPos, material: MaterialId) -> bool;
}

/// Callback invoked synchronously by the world generator for every block
/// it places during feature generation.
pub trait GenerationObserver: Send + Sync {
    fn on_material_placed(&self, pos: BlockPos, material: MaterialId);
}

/// Produces the block offsets of a cluster around its source position.
pub trait ShapeGenerator: Send + Sync + 'static {
    fn generate(&self, settings: &ClusterTypeSettings, rng: &mut dyn RngCore) -> Vec<Offset>;
}

/// Fills the configured volume, centred on the source, keeping each block
/// with probability equal to the type's density.
///
/// The source block itself is always included.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeShape;

impl ShapeGenerator for VolumeShape {
    fn generate(&self, settings: &ClusterTypeSettings, rng: &mut dyn RngCore) -> Vec<Offset> {
        let volume = settings.volume;
        let half = |edge: u32| (edge as i32 - 1) / 2;
        let (hx, hy, hz) = (half(volume.width), half(volume.height), half(volume.depth));

        let mut offsets = Vec::with_capacity(volume.blocks() as usize);
        for dx in -hx..(volume.width as i32 - hx) {
            for dy in -hy..(volume.height as i32 - hy) {
                for dz in -hz..(volume.depth as i32 - hz) {
                    let origin = dx == 0 && dy == 0 && dz == 0;
                    if origin || rng.gen_bool(settings.density) {
                        offsets.push(Offset::new(dx, dy, dz));
                    }
                }
            }
        }
        offsets
    }
}
