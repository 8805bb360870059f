//! Settings structs for all configuration sections.
//!
//! Each struct maps to one `[section]` of the INI file. `sanitized()`
//! methods enforce the bounds from [`super::defaults`].

use std::collections::BTreeMap;
use std::time::Duration;

use super::defaults::*;
use crate::cell::{ClusterTypeId, MaterialId};

/// Placement batch settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementSettings {
    /// Cells per determination batch.
    pub batch_size: usize,
    /// Minimum spacing between any two cluster-bearing cells.
    pub min_spacing: u32,
    /// Spiral radius after which batches root at the triggering cell.
    pub strategy_change_radius: u32,
    /// Replaces the world seed for every placement RNG when set.
    pub seed_override: Option<u64>,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_spacing: DEFAULT_GLOBAL_MIN_SPACING,
            strategy_change_radius: DEFAULT_STRATEGY_CHANGE_RADIUS,
            seed_override: None,
        }
    }
}

impl PlacementSettings {
    pub fn sanitized(self) -> Self {
        Self {
            batch_size: clamp_field(
                "placement.batch_size",
                self.batch_size,
                MIN_BATCH_SIZE,
                MAX_BATCH_SIZE,
            ),
            min_spacing: clamp_field("placement.min_spacing", self.min_spacing, 0, MAX_SPACING),
            strategy_change_radius: clamp_field(
                "placement.strategy_change_radius",
                self.strategy_change_radius,
                0,
                MAX_STRATEGY_CHANGE_RADIUS,
            ),
            seed_override: self.seed_override,
        }
    }
}

/// Worker loop timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub readiness_interval: Duration,
    pub harvest_interval: Duration,
    pub eviction_interval: Duration,
    pub idle_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            readiness_interval: Duration::from_millis(DEFAULT_READINESS_INTERVAL_MS),
            harvest_interval: Duration::from_millis(DEFAULT_HARVEST_INTERVAL_MS),
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

impl SchedulerSettings {
    pub fn sanitized(self) -> Self {
        let clamp_ms = |field: &str, value: Duration, min_ms: u64| {
            let ms = clamp_field(field, value.as_millis() as u64, min_ms, MAX_INTERVAL_MS);
            Duration::from_millis(ms)
        };
        Self {
            poll_interval: Duration::from_millis(clamp_field(
                "scheduler.poll_interval_ms",
                self.poll_interval.as_millis() as u64,
                MIN_POLL_INTERVAL_MS,
                MAX_POLL_INTERVAL_MS,
            )),
            readiness_interval: clamp_ms(
                "scheduler.readiness_interval_ms",
                self.readiness_interval,
                1,
            ),
            harvest_interval: clamp_ms(
                "scheduler.harvest_interval_ms",
                self.harvest_interval,
                1,
            ),
            eviction_interval: clamp_ms(
                "scheduler.eviction_interval",
                self.eviction_interval,
                1,
            ),
            idle_timeout: clamp_ms("scheduler.idle_timeout", self.idle_timeout, 0),
            shutdown_grace: clamp_ms("scheduler.shutdown_grace_ms", self.shutdown_grace, 0),
        }
    }
}

/// Regeneration timing.
#[derive(Debug, Clone, PartialEq)]
pub struct RegenSettings {
    pub enabled: bool,
    /// Period lengths in ticks, selected by upgrade level.
    pub periods: Vec<u64>,
    /// Level used until the host upgrades it.
    pub initial_level: usize,
}

impl Default for RegenSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            periods: DEFAULT_REGEN_PERIODS.to_vec(),
            initial_level: 0,
        }
    }
}

impl RegenSettings {
    pub fn sanitized(self) -> Self {
        let mut periods: Vec<u64> = self
            .periods
            .into_iter()
            .map(|p| clamp_field("regen.periods", p, MIN_REGEN_PERIOD, u64::MAX / 4))
            .collect();
        if periods.is_empty() {
            tracing::warn!(
                field = "regen.periods",
                substituted = ?DEFAULT_REGEN_PERIODS,
                "Empty regen period table, using defaults"
            );
            periods = DEFAULT_REGEN_PERIODS.to_vec();
        }
        let initial_level = clamp_field("regen.level", self.initial_level, 0, periods.len() - 1);
        Self {
            enabled: self.enabled,
            periods,
            initial_level,
        }
    }

    /// Period length for `level`, saturating at the last entry.
    pub fn period_for(&self, level: usize) -> u64 {
        self.periods
            .get(level)
            .or_else(|| self.periods.last())
            .copied()
            .unwrap_or(DEFAULT_REGEN_PERIODS[0])
    }
}

/// Bounding volume of a generated cluster shape, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Volume {
    pub const fn cube(edge: u32) -> Self {
        Self {
            width: edge,
            height: edge,
            depth: edge,
        }
    }

    pub fn blocks(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

impl std::str::FromStr for Volume {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims: Vec<u32> = s
            .split('x')
            .map(|part| part.trim().parse::<u32>().map_err(|_| ()))
            .collect::<Result<_, _>>()?;
        match dims.as_slice() {
            [edge] => Ok(Volume::cube(*edge)),
            [width, height, depth] => Ok(Volume {
                width: *width,
                height: *height,
                depth: *depth,
            }),
            _ => Err(()),
        }
    }
}

/// Settings of one cluster type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTypeSettings {
    pub id: ClusterTypeId,
    /// Material written for this cluster and sampled during cleaning.
    pub material: MaterialId,
    /// Expected clusters per batch.
    pub spawn_rate: f64,
    /// Minimum spacing to other clusters of the same type, in cells.
    pub min_spacing: u32,
    /// Longest Phase A stride through a batch while this type is active.
    /// Zero leaves the stride uncapped.
    pub max_spacing: u32,
    pub volume: Volume,
    pub density: f64,
    /// Whether regen passes restore this type.
    pub regen: bool,
}

impl ClusterTypeSettings {
    /// Settings with every tunable at its default.
    pub fn new(id: &str, material: MaterialId) -> Self {
        Self {
            id: ClusterTypeId::new(id),
            material,
            spawn_rate: DEFAULT_SPAWN_RATE,
            min_spacing: DEFAULT_TYPE_MIN_SPACING,
            max_spacing: DEFAULT_TYPE_MAX_SPACING,
            volume: Volume::cube(DEFAULT_VOLUME_EDGE),
            density: DEFAULT_DENSITY,
            regen: DEFAULT_TYPE_REGEN,
        }
    }

    pub fn with_spawn_rate(mut self, rate: f64) -> Self {
        self.spawn_rate = rate;
        self
    }

    pub fn with_min_spacing(mut self, spacing: u32) -> Self {
        self.min_spacing = spacing;
        self
    }

    pub fn with_max_spacing(mut self, spacing: u32) -> Self {
        self.max_spacing = spacing;
        self
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub fn with_regen(mut self, regen: bool) -> Self {
        self.regen = regen;
        self
    }

    pub fn sanitized(self) -> Self {
        let key = |name: &str| format!("cluster.{}.{}", self.id, name);
        let min_spacing = clamp_field(&key("min_spacing"), self.min_spacing, 0, MAX_SPACING);
        let max_spacing = clamp_field(
            &key("max_spacing"),
            self.max_spacing,
            min_spacing,
            MAX_SPACING,
        );
        let clamp_edge = |name: &str, edge: u32| clamp_field(&key(name), edge, 1, MAX_VOLUME_EDGE);
        let spawn_rate = clamp_f64_field(
            &key("spawn_rate"),
            self.spawn_rate,
            0.0,
            MAX_SPAWN_RATE,
            DEFAULT_SPAWN_RATE,
        );
        let volume = Volume {
            width: clamp_edge("volume.width", self.volume.width),
            height: clamp_edge("volume.height", self.volume.height),
            depth: clamp_edge("volume.depth", self.volume.depth),
        };
        let density = clamp_f64_field(&key("density"), self.density, 0.0, 1.0, DEFAULT_DENSITY);
        Self {
            spawn_rate,
            min_spacing,
            max_spacing,
            volume,
            density,
            ..self
        }
    }
}

/// Resolved configuration for one world.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterConfig {
    pub placement: PlacementSettings,
    pub scheduler: SchedulerSettings,
    pub regen: RegenSettings,
    types: BTreeMap<ClusterTypeId, ClusterTypeSettings>,
}

impl ClusterConfig {
    pub fn new(
        placement: PlacementSettings,
        scheduler: SchedulerSettings,
        regen: RegenSettings,
    ) -> Self {
        Self {
            placement: placement.sanitized(),
            scheduler: scheduler.sanitized(),
            regen: regen.sanitized(),
            types: BTreeMap::new(),
        }
    }

    /// Adds or replaces a cluster type.
    pub fn with_type(mut self, settings: ClusterTypeSettings) -> Self {
        let settings = settings.sanitized();
        self.types.insert(settings.id.clone(), settings);
        self
    }

    pub fn cluster(&self, id: &ClusterTypeId) -> Option<&ClusterTypeSettings> {
        self.types.get(id)
    }

    /// All types in id order.
    pub fn types(&self) -> impl Iterator<Item = &ClusterTypeSettings> {
        self.types.values()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Types whose cluster material is `material`.
    pub fn types_for_material(
        &self,
        material: MaterialId,
    ) -> impl Iterator<Item = &ClusterTypeSettings> {
        self.types.values().filter(move |t| t.material == material)
    }

    /// True when any of `types` should be restored by regen passes.
    pub fn any_regen<'a>(&self, mut types: impl Iterator<Item = &'a ClusterTypeId>) -> bool {
        types.any(|id| self.cluster(id).is_some_and(|t| t.regen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_parse() {
        assert_eq!("4".parse::<Volume>(), Ok(Volume::cube(4)));
        assert_eq!(
            "2x3x4".parse::<Volume>(),
            Ok(Volume {
                width: 2,
                height: 3,
                depth: 4
            })
        );
        assert!("2x3".parse::<Volume>().is_err());
        assert!("big".parse::<Volume>().is_err());
    }

    #[test]
    fn test_type_sanitize_clamps() {
        let settings = ClusterTypeSettings::new("iron", MaterialId(1))
            .with_spawn_rate(f64::NAN)
            .with_density(3.0)
            .with_min_spacing(10_000)
            .with_volume(Volume::cube(0))
            .sanitized();

        assert_eq!(settings.spawn_rate, DEFAULT_SPAWN_RATE);
        assert_eq!(settings.density, 1.0);
        assert_eq!(settings.min_spacing, MAX_SPACING);
        assert_eq!(settings.max_spacing, MAX_SPACING);
        assert_eq!(settings.volume, Volume::cube(1));
    }

    #[test]
    fn test_scheduler_sanitize_clamps_intervals() {
        let settings = SchedulerSettings {
            poll_interval: Duration::ZERO,
            readiness_interval: Duration::ZERO,
            harvest_interval: Duration::ZERO,
            eviction_interval: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            shutdown_grace: Duration::from_millis(MAX_INTERVAL_MS + 1),
        }
        .sanitized();

        assert_eq!(settings.poll_interval, Duration::from_millis(MIN_POLL_INTERVAL_MS));
        assert_eq!(settings.readiness_interval, Duration::from_millis(1));
        assert_eq!(settings.harvest_interval, Duration::from_millis(1));
        assert_eq!(settings.eviction_interval, Duration::from_millis(1));
        assert_eq!(settings.idle_timeout, Duration::ZERO);
        assert_eq!(settings.shutdown_grace, Duration::from_millis(MAX_INTERVAL_MS));
    }

    #[test]
    fn test_type_max_spacing_not_below_min() {
        let settings = ClusterTypeSettings::new("iron", MaterialId(1))
            .with_min_spacing(6)
            .with_max_spacing(2)
            .sanitized();

        assert_eq!(settings.max_spacing, 6);
    }

    #[test]
    fn test_regen_empty_periods_replaced() {
        let regen = RegenSettings {
            enabled: true,
            periods: Vec::new(),
            initial_level: 5,
        }
        .sanitized();

        assert_eq!(regen.periods, DEFAULT_REGEN_PERIODS.to_vec());
        assert_eq!(regen.initial_level, DEFAULT_REGEN_PERIODS.len() - 1);
    }

    #[test]
    fn test_period_for_saturates() {
        let regen = RegenSettings::default();
        assert_eq!(regen.period_for(0), DEFAULT_REGEN_PERIODS[0]);
        assert_eq!(regen.period_for(99), DEFAULT_REGEN_PERIODS[2]);
    }

    #[test]
    fn test_types_for_material() {
        let config = ClusterConfig::default()
            .with_type(ClusterTypeSettings::new("iron", MaterialId(1)))
            .with_type(ClusterTypeSettings::new("deep_iron", MaterialId(1)))
            .with_type(ClusterTypeSettings::new("gold", MaterialId(2)));

        let ids: Vec<&str> = config
            .types_for_material(MaterialId(1))
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["deep_iron", "iron"]);
        assert_eq!(config.type_count(), 3);
    }

    #[test]
    fn test_any_regen() {
        let config = ClusterConfig::default()
            .with_type(ClusterTypeSettings::new("iron", MaterialId(1)).with_regen(false))
            .with_type(ClusterTypeSettings::new("gold", MaterialId(2)));
        let iron = ClusterTypeId::new("iron");
        let gold = ClusterTypeId::new("gold");

        assert!(!config.any_regen([&iron].into_iter()));
        assert!(config.any_regen([&iron, &gold].into_iter()));
    }
}
