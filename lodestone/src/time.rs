//! Time-related utility functions.
//!
//! Cell timestamps and stage metrics live in atomics, so they are kept as
//! milliseconds since the Unix epoch rather than `Instant`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Time elapsed since `earlier_ms`, saturating at zero for future stamps.
pub fn elapsed_since(earlier_ms: u64) -> Duration {
    Duration::from_millis(now_millis().saturating_sub(earlier_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn elapsed_since_past_stamp() {
        let five_seconds_ago = now_millis() - 5_000;
        let elapsed = elapsed_since(five_seconds_ago);

        assert!(elapsed >= Duration::from_millis(4_900));
        assert!(elapsed <= Duration::from_millis(6_000));
    }

    #[test]
    fn elapsed_since_future_stamp_is_zero() {
        let future = now_millis() + 60_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }
}
