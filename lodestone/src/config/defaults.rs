//! Default values, bounds, and clamping helpers for all settings.
//!
//! Out-of-range or unparsable values never fail a load: they are clamped
//! or replaced here with a warning naming the field and the substitute.

use std::fmt::Display;
use std::str::FromStr;

// =============================================================================
// Placement
// =============================================================================

/// Cells per determination batch.
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 65_536;

/// Global minimum spacing between any two cluster-bearing cells.
pub const DEFAULT_GLOBAL_MIN_SPACING: u32 = 1;

/// Upper bound for any spacing value, in cells.
pub const MAX_SPACING: u32 = 512;

/// Spiral radius beyond which batches are rooted at the triggering cell.
pub const DEFAULT_STRATEGY_CHANGE_RADIUS: u32 = 64;
pub const MAX_STRATEGY_CHANGE_RADIUS: u32 = 100_000;

// =============================================================================
// Cluster types
// =============================================================================

/// Expected clusters of a type per batch.
pub const DEFAULT_SPAWN_RATE: f64 = 8.0;
pub const MAX_SPAWN_RATE: f64 = 10_000.0;

pub const DEFAULT_TYPE_MIN_SPACING: u32 = 3;
pub const DEFAULT_TYPE_MAX_SPACING: u32 = 16;

/// Shape volume edge length, in blocks.
pub const DEFAULT_VOLUME_EDGE: u32 = 3;
pub const MAX_VOLUME_EDGE: u32 = 64;

/// Fraction of the volume filled with cluster material.
pub const DEFAULT_DENSITY: f64 = 0.6;

pub const DEFAULT_TYPE_REGEN: bool = true;

// =============================================================================
// Scheduler
// =============================================================================

/// Backoff when a stage queue is empty.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
pub const MIN_POLL_INTERVAL_MS: u64 = 1;
pub const MAX_POLL_INTERVAL_MS: u64 = 1_000;

/// Interval of the edit-readiness scan.
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 250;

/// Interval between harvest re-checks of generated cells.
pub const DEFAULT_HARVEST_INTERVAL_MS: u64 = 5_000;

/// Interval of the idle-cell eviction sweep.
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 10;

/// How long an unloaded, unfinished cell stays in the working set.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// How long shutdown waits for workers before abandoning them.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Upper bound for any scheduler interval, in milliseconds.
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;

// =============================================================================
// Regen
// =============================================================================

/// Period table in ticks (one, three and seven in-game days).
pub const DEFAULT_REGEN_PERIODS: [u64; 3] = [24_000, 72_000, 168_000];

/// Shortest accepted regen period, in ticks.
pub const MIN_REGEN_PERIOD: u64 = 20;

// =============================================================================
// Helpers
// =============================================================================

/// Clamps `value` to `[min, max]`, warning when it had to move.
pub(crate) fn clamp_field<T>(field: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Display + Copy,
{
    if value < min {
        tracing::warn!(
            field,
            requested = %value,
            substituted = %min,
            "Configuration value below minimum, clamping"
        );
        min
    } else if value > max {
        tracing::warn!(
            field,
            requested = %value,
            substituted = %max,
            "Configuration value above maximum, clamping"
        );
        max
    } else {
        value
    }
}

/// Clamps a float, replacing NaN and infinities with `default`.
pub(crate) fn clamp_f64_field(field: &str, value: f64, min: f64, max: f64, default: f64) -> f64 {
    if !value.is_finite() {
        tracing::warn!(
            field,
            requested = %value,
            substituted = %default,
            "Configuration value is not a finite number, using default"
        );
        return default;
    }
    clamp_field(field, value, min, max)
}

/// Parses `raw`, falling back to `default` with a warning.
pub(crate) fn parse_or_default<T>(field: &str, raw: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                field,
                requested = raw,
                substituted = %default,
                "Unparsable configuration value, using default"
            );
            default
        }
    }
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive).
pub(crate) fn parse_bool_or_default(field: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            tracing::warn!(
                field,
                requested = raw,
                substituted = default,
                "Unparsable boolean, using default"
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_field_in_range_unchanged() {
        assert_eq!(clamp_field("x", 5u32, 1, 10), 5);
    }

    #[test]
    fn test_clamp_field_bounds() {
        assert_eq!(clamp_field("x", 0u32, 1, 10), 1);
        assert_eq!(clamp_field("x", 50u32, 1, 10), 10);
    }

    #[test]
    fn test_clamp_f64_rejects_nan() {
        assert_eq!(clamp_f64_field("x", f64::NAN, 0.0, 1.0, 0.5), 0.5);
        assert_eq!(clamp_f64_field("x", f64::INFINITY, 0.0, 1.0, 0.5), 0.5);
        assert_eq!(clamp_f64_field("x", 2.0, 0.0, 1.0, 0.5), 1.0);
    }

    #[test]
    fn test_parse_or_default() {
        assert_eq!(parse_or_default("x", " 42 ", 7u32), 42);
        assert_eq!(parse_or_default("x", "forty", 7u32), 7);
        assert_eq!(parse_or_default("x", "-3", 7u32), 7);
    }

    #[test]
    fn test_parse_bool_values() {
        for raw in ["true", "YES", "1", " on "] {
            assert!(parse_bool_or_default("x", raw, false), "{raw}");
        }
        for raw in ["false", "No", "0", "off"] {
            assert!(!parse_bool_or_default("x", raw, true), "{raw}");
        }
        assert!(parse_bool_or_default("x", "maybe", true));
    }
}
