//! Configuration for cluster placement and the pipeline.
//!
//! - [`settings`]: plain data structs, one per INI section
//! - [`defaults`]: `DEFAULT_*` constants, bounds and clamping helpers
//! - [`parser`]: the INI → [`ClusterConfig`] mapping
//! - [`file`]: loading from disk
//!
//! Components never read files themselves; they receive a
//! [`ConfigProvider`] through the world context.
//!
//! # Example
//!
//! ```
//! use lodestone::config::{ConfigFile, ConfigProvider, SharedConfig};
//!
//! let config = ConfigFile::parse("[cluster.iron]\nmaterial = 15\nspawn_rate = 16\n").unwrap();
//! let provider = SharedConfig::new(config);
//! assert_eq!(provider.current().type_count(), 1);
//! ```

pub mod defaults;
mod file;
mod parser;
mod settings;

use std::sync::Arc;

use parking_lot::RwLock;

pub use file::{ConfigFile, ConfigFileError};
pub use settings::{
    ClusterConfig, ClusterTypeSettings, PlacementSettings, RegenSettings, SchedulerSettings,
    Volume,
};

/// Source of the current configuration for one world.
pub trait ConfigProvider: Send + Sync + 'static {
    /// Snapshot of the configuration in effect.
    fn current(&self) -> Arc<ClusterConfig>;
}

/// In-memory provider whose configuration can be swapped at runtime.
#[derive(Debug)]
pub struct SharedConfig {
    inner: RwLock<Arc<ClusterConfig>>,
}

impl SharedConfig {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Replaces the configuration. Running batches keep their snapshot.
    pub fn replace(&self, config: ClusterConfig) {
        *self.inner.write() = Arc::new(config);
    }
}

impl ConfigProvider for SharedConfig {
    fn current(&self) -> Arc<ClusterConfig> {
        Arc::clone(&self.inner.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::MaterialId;

    #[test]
    fn test_replace_swaps_snapshot() {
        let provider = SharedConfig::new(ClusterConfig::default());
        let before = provider.current();

        provider.replace(
            ClusterConfig::default().with_type(ClusterTypeSettings::new("iron", MaterialId(1))),
        );

        assert_eq!(before.type_count(), 0);
        assert_eq!(provider.current().type_count(), 1);
    }
}
