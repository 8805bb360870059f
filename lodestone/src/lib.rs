//! Lodestone - spacing-aware resource cluster placement for chunked worlds
//!
//! Decides which cells of an infinite grid hold which resource clusters,
//! reproducibly from the world seed, and drives each cell through a
//! staged generation pipeline that writes the clusters into the host
//! world as cells load.
//!
//! # Usage
//!
//! ```ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use lodestone::config::{ConfigFile, SharedConfig};
//! use lodestone::context::WorldContext;
//! use lodestone::persistence::JsonFileStore;
//! use lodestone::scheduler::PipelineScheduler;
//!
//! let config = ConfigFile::load_from(Path::new("lodestone.ini"))?;
//! let store = JsonFileStore::open("world/lodestone.json")?;
//! let ctx = WorldContext::new(world, Arc::new(SharedConfig::new(config)), Arc::new(store));
//!
//! let scheduler = PipelineScheduler::new(ctx);
//! scheduler.start();
//! scheduler.on_cell_loaded(cell);
//! // ...
//! scheduler.shutdown().await;
//! ```

pub mod cell;
pub mod config;
pub mod context;
pub mod logging;
pub mod persistence;
pub mod placement;
pub mod regen;
pub mod scheduler;
pub mod spiral;
pub mod time;
pub mod world;

pub use cell::{BlockPos, CellId, CellStatus, ClusterTypeId, MaterialId};
pub use context::WorldContext;
pub use scheduler::PipelineScheduler;
pub use world::{GenerationObserver, ShapeGenerator, WorldHandle};

/// Version of the Lodestone library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
