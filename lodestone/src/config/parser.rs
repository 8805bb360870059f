//! INI parsing logic for converting `Ini` → `ClusterConfig`.
//!
//! This is the single place where INI key names are mapped to struct
//! fields. Parsing never fails on values: anything malformed falls back to
//! the default with a warning.

use std::time::Duration;

use ini::{Ini, Properties};

use super::defaults::*;
use super::settings::{
    ClusterConfig, ClusterTypeSettings, PlacementSettings, RegenSettings, SchedulerSettings,
};
use crate::cell::MaterialId;

/// Section holding the default cluster type template.
const CLUSTER_SECTION: &str = "cluster";

/// Prefix of per-type override sections, e.g. `[cluster.iron]`.
const CLUSTER_PREFIX: &str = "cluster.";

/// Parse an `Ini` object into a `ClusterConfig`.
///
/// Starts from defaults and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> ClusterConfig {
    let mut placement = PlacementSettings::default();
    if let Some(section) = ini.section(Some("placement")) {
        if let Some(v) = section.get("batch_size") {
            placement.batch_size = parse_or_default("placement.batch_size", v, DEFAULT_BATCH_SIZE);
        }
        if let Some(v) = section.get("min_spacing") {
            placement.min_spacing =
                parse_or_default("placement.min_spacing", v, DEFAULT_GLOBAL_MIN_SPACING);
        }
        if let Some(v) = section.get("strategy_change_radius") {
            placement.strategy_change_radius = parse_or_default(
                "placement.strategy_change_radius",
                v,
                DEFAULT_STRATEGY_CHANGE_RADIUS,
            );
        }
        if let Some(v) = section.get("seed") {
            let v = v.trim();
            if !v.is_empty() {
                match v.parse::<u64>() {
                    Ok(seed) => placement.seed_override = Some(seed),
                    Err(_) => tracing::warn!(
                        field = "placement.seed",
                        requested = v,
                        "Unparsable seed override, using world seed"
                    ),
                }
            }
        }
    }

    let mut scheduler = SchedulerSettings::default();
    if let Some(section) = ini.section(Some("scheduler")) {
        let millis = |key: &str, default_ms: u64| {
            section.get(key).map(|v| {
                Duration::from_millis(parse_or_default(&format!("scheduler.{key}"), v, default_ms))
            })
        };
        let secs = |key: &str, default_secs: u64| {
            section.get(key).map(|v| {
                Duration::from_secs(parse_or_default(&format!("scheduler.{key}"), v, default_secs))
            })
        };
        if let Some(d) = millis("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS) {
            scheduler.poll_interval = d;
        }
        if let Some(d) = millis("readiness_interval_ms", DEFAULT_READINESS_INTERVAL_MS) {
            scheduler.readiness_interval = d;
        }
        if let Some(d) = millis("harvest_interval_ms", DEFAULT_HARVEST_INTERVAL_MS) {
            scheduler.harvest_interval = d;
        }
        if let Some(d) = secs("eviction_interval_secs", DEFAULT_EVICTION_INTERVAL_SECS) {
            scheduler.eviction_interval = d;
        }
        if let Some(d) = secs("idle_timeout_secs", DEFAULT_IDLE_TIMEOUT_SECS) {
            scheduler.idle_timeout = d;
        }
        if let Some(d) = millis("shutdown_grace_ms", DEFAULT_SHUTDOWN_GRACE_MS) {
            scheduler.shutdown_grace = d;
        }
    }

    let mut regen = RegenSettings::default();
    if let Some(section) = ini.section(Some("regen")) {
        if let Some(v) = section.get("enabled") {
            regen.enabled = parse_bool_or_default("regen.enabled", v, true);
        }
        if let Some(v) = section.get("periods") {
            regen.periods = parse_period_list(v);
        }
        if let Some(v) = section.get("level") {
            regen.initial_level = parse_or_default("regen.level", v, 0usize);
        }
    }

    let mut config = ClusterConfig::new(placement, scheduler, regen);

    let template = ini.section(Some(CLUSTER_SECTION));
    for (name, section) in ini.iter() {
        let Some(type_name) = name.and_then(|n| n.strip_prefix(CLUSTER_PREFIX)) else {
            continue;
        };
        if let Some(settings) = parse_cluster_type(type_name, template, section) {
            config = config.with_type(settings);
        }
    }

    config
}

/// Parses a comma separated list of tick periods.
///
/// Unparsable entries are dropped with a warning; an empty result is
/// replaced by the default table during sanitizing.
fn parse_period_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<u64>() {
            Ok(period) => Some(period),
            Err(_) => {
                tracing::warn!(
                    field = "regen.periods",
                    requested = entry,
                    "Dropping unparsable regen period"
                );
                None
            }
        })
        .collect()
}

/// Builds one type from the `[cluster]` template plus its own section.
fn parse_cluster_type(
    name: &str,
    template: Option<&Properties>,
    section: &Properties,
) -> Option<ClusterTypeSettings> {
    let lookup = |key: &str| section.get(key).or_else(|| template.and_then(|t| t.get(key)));
    let field = |key: &str| format!("cluster.{name}.{key}");

    let Some(material) = lookup("material").and_then(|v| v.trim().parse::<u32>().ok()) else {
        tracing::warn!(
            field = %field("material"),
            "Cluster type has no valid material, skipping"
        );
        return None;
    };

    let mut settings = ClusterTypeSettings::new(name, MaterialId(material));
    if let Some(v) = lookup("spawn_rate") {
        settings.spawn_rate = parse_or_default(&field("spawn_rate"), v, DEFAULT_SPAWN_RATE);
    }
    if let Some(v) = lookup("min_spacing") {
        settings.min_spacing = parse_or_default(&field("min_spacing"), v, DEFAULT_TYPE_MIN_SPACING);
    }
    if let Some(v) = lookup("max_spacing") {
        settings.max_spacing = parse_or_default(&field("max_spacing"), v, DEFAULT_TYPE_MAX_SPACING);
    }
    if let Some(v) = lookup("volume") {
        settings.volume = v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                field = %field("volume"),
                requested = v,
                substituted = %settings.volume,
                "Unparsable volume, using default"
            );
            settings.volume
        });
    }
    if let Some(v) = lookup("density") {
        settings.density = parse_or_default(&field("density"), v, DEFAULT_DENSITY);
    }
    if let Some(v) = lookup("regen") {
        settings.regen = parse_bool_or_default(&field("regen"), v, DEFAULT_TYPE_REGEN);
    }
    Some(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ClusterTypeId;
    use crate::config::settings::Volume;

    fn parse(text: &str) -> ClusterConfig {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        let config = parse("");
        assert_eq!(config.placement, PlacementSettings::default());
        assert_eq!(config.scheduler, SchedulerSettings::default());
        assert_eq!(config.type_count(), 0);
    }

    #[test]
    fn test_placement_section() {
        let config = parse(
            r#"
[placement]
batch_size = 128
min_spacing = 2
strategy_change_radius = 32
seed = 99
"#,
        );
        assert_eq!(config.placement.batch_size, 128);
        assert_eq!(config.placement.min_spacing, 2);
        assert_eq!(config.placement.strategy_change_radius, 32);
        assert_eq!(config.placement.seed_override, Some(99));
    }

    #[test]
    fn test_batch_size_clamped() {
        let config = parse("[placement]\nbatch_size = 0\n");
        assert_eq!(config.placement.batch_size, MIN_BATCH_SIZE);
    }

    #[test]
    fn test_scheduler_section() {
        let config = parse(
            r#"
[scheduler]
poll_interval_ms = 50
idle_timeout_secs = 60
eviction_interval_secs = not-a-number
"#,
        );
        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(50));
        assert_eq!(config.scheduler.idle_timeout, Duration::from_secs(60));
        assert_eq!(
            config.scheduler.eviction_interval,
            Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_regen_period_list_drops_garbage() {
        let config = parse("[regen]\nperiods = 100, soon, 300\nlevel = 1\n");
        assert_eq!(config.regen.periods, vec![100, 300]);
        assert_eq!(config.regen.initial_level, 1);
    }

    #[test]
    fn test_regen_all_garbage_uses_defaults() {
        let config = parse("[regen]\nperiods = never\n");
        assert_eq!(config.regen.periods, DEFAULT_REGEN_PERIODS.to_vec());
    }

    #[test]
    fn test_types_inherit_template() {
        let config = parse(
            r#"
[cluster]
spawn_rate = 4
min_spacing = 5
volume = 2x2x2

[cluster.iron]
material = 15
spawn_rate = 16

[cluster.gold]
material = 14
regen = no
"#,
        );

        let iron = config.cluster(&ClusterTypeId::new("iron")).unwrap();
        assert_eq!(iron.material, MaterialId(15));
        assert_eq!(iron.spawn_rate, 16.0);
        assert_eq!(iron.min_spacing, 5);
        assert_eq!(iron.volume, Volume::cube(2));

        let gold = config.cluster(&ClusterTypeId::new("gold")).unwrap();
        assert_eq!(gold.spawn_rate, 4.0);
        assert!(!gold.regen);
    }

    #[test]
    fn test_type_without_material_skipped() {
        let config = parse("[cluster.mystery]\nspawn_rate = 3\n");
        assert_eq!(config.type_count(), 0);
    }

    #[test]
    fn test_bad_type_values_replaced() {
        let config = parse(
            r#"
[cluster.iron]
material = 15
spawn_rate = lots
density = 7
volume = huge
"#,
        );
        let iron = config.cluster(&ClusterTypeId::new("iron")).unwrap();
        assert_eq!(iron.spawn_rate, DEFAULT_SPAWN_RATE);
        assert_eq!(iron.density, 1.0);
        assert_eq!(iron.volume, Volume::cube(DEFAULT_VOLUME_EDGE));
    }
}
