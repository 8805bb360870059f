//! Cell status and the transition table.
//!
//! Every legality check and "is X or later" question about a cell's status
//! is answered here, so callers never compare raw discriminants.
//!
//! ```text
//! NONE ─► DETERMINED ─► CLEANED ─┬─► PREGENERATED ─┬─► GENERATED ─► HARVESTED
//!              ▲           │     │        ▲        │       │            │
//!              └─ anomaly ─┘     └────────┼────────┴─► COMPLETE         │
//!                                         │                │            │
//!                                    REGENERATED ◄─────────┴────────────┘
//! ```

use thiserror::Error;

/// Pipeline status of a managed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum CellStatus {
    /// Nothing decided yet.
    #[default]
    None = 0,
    /// Cluster types assigned (possibly none).
    Determined = 1,
    /// Source positions selected from existing material.
    Cleaned = 2,
    /// Shape edits queued, waiting to be written.
    Pregenerated = 3,
    /// Re-entered by a regen pass; edits will be regenerated.
    Regenerated = 4,
    /// Edits written into the world.
    Generated = 5,
    /// Generated material was removed or altered.
    Harvested = 6,
    /// Nothing further to do for this cell.
    Complete = 7,
}

/// Result of classifying a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals the current status.
    Unchanged,
    /// A legal step along the pipeline.
    Forward,
    /// CLEANED back to DETERMINED: tolerated, but logged.
    Anomaly,
    /// Not permitted.
    Illegal,
}

/// Attempted status change that the transition table forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal cell transition {from} -> {to}")]
pub struct TransitionError {
    pub from: CellStatus,
    pub to: CellStatus,
}

impl CellStatus {
    /// Every status, in discriminant order.
    pub const ALL: [CellStatus; 8] = [
        CellStatus::None,
        CellStatus::Determined,
        CellStatus::Cleaned,
        CellStatus::Pregenerated,
        CellStatus::Regenerated,
        CellStatus::Generated,
        CellStatus::Harvested,
        CellStatus::Complete,
    ];

    /// Converts from u8 representation.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Returns the status name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Determined => "determined",
            Self::Cleaned => "cleaned",
            Self::Pregenerated => "pregenerated",
            Self::Regenerated => "regenerated",
            Self::Generated => "generated",
            Self::Harvested => "harvested",
            Self::Complete => "complete",
        }
    }

    /// Classifies a change from `self` to `next`.
    pub fn classify(self, next: CellStatus) -> Transition {
        use CellStatus::*;

        if self == next {
            return Transition::Unchanged;
        }
        match (self, next) {
            (None, Determined)
            | (Determined, Cleaned)
            | (Cleaned, Pregenerated)
            | (Cleaned, Complete)
            | (Pregenerated, Generated)
            | (Pregenerated, Complete)
            | (Generated, Harvested)
            | (Generated, Regenerated)
            | (Harvested, Regenerated)
            | (Regenerated, Pregenerated) => Transition::Forward,
            (Cleaned, Determined) => Transition::Anomaly,
            _ => Transition::Illegal,
        }
    }

    /// True once placement has been decided for the cell.
    #[inline]
    pub fn is_determined(self) -> bool {
        self != CellStatus::None
    }

    /// True while the cell still collects source-position sightings.
    #[inline]
    pub fn accepts_sightings(self) -> bool {
        matches!(self, CellStatus::None | CellStatus::Determined)
    }

    /// True when queued edits are waiting to be written.
    #[inline]
    pub fn awaits_edits(self) -> bool {
        self == CellStatus::Pregenerated
    }

    /// True when the cell's clusters exist (or existed) in the world.
    #[inline]
    pub fn is_generated(self) -> bool {
        matches!(self, CellStatus::Generated | CellStatus::Harvested)
    }

    /// True when a regen pass may re-enter the cell.
    #[inline]
    pub fn is_regen_candidate(self) -> bool {
        self.is_generated()
    }

    /// True when the cell can leave the working set.
    #[inline]
    pub fn is_terminal(self) -> bool {
        self == CellStatus::Complete
    }
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CellStatus::*;

    #[test]
    fn test_u8_round_trip() {
        for status in CellStatus::ALL {
            assert_eq!(CellStatus::from_u8(status as u8), Some(status));
        }
        assert_eq!(CellStatus::from_u8(8), Option::None);
    }

    #[test]
    fn test_main_path_is_forward() {
        let path = [None, Determined, Cleaned, Pregenerated, Generated, Harvested];
        for pair in path.windows(2) {
            assert_eq!(pair[0].classify(pair[1]), Transition::Forward, "{:?}", pair);
        }
    }

    #[test]
    fn test_clusterless_cells_complete_early() {
        assert_eq!(Cleaned.classify(Complete), Transition::Forward);
        assert_eq!(Pregenerated.classify(Complete), Transition::Forward);
    }

    #[test]
    fn test_regen_loop() {
        assert_eq!(Generated.classify(Regenerated), Transition::Forward);
        assert_eq!(Harvested.classify(Regenerated), Transition::Forward);
        assert_eq!(Regenerated.classify(Pregenerated), Transition::Forward);
    }

    #[test]
    fn test_harvested_only_from_generated() {
        for status in CellStatus::ALL {
            let expected = match status {
                Generated => Transition::Forward,
                Harvested => Transition::Unchanged,
                _ => Transition::Illegal,
            };
            assert_eq!(status.classify(Harvested), expected, "from {status}");
        }
    }

    #[test]
    fn test_cleaned_to_determined_is_anomaly() {
        assert_eq!(Cleaned.classify(Determined), Transition::Anomaly);
    }

    #[test]
    fn test_regressions_are_illegal() {
        assert_eq!(Generated.classify(Cleaned), Transition::Illegal);
        assert_eq!(Complete.classify(None), Transition::Illegal);
        assert_eq!(Pregenerated.classify(Determined), Transition::Illegal);
        assert_eq!(Determined.classify(None), Transition::Illegal);
    }

    #[test]
    fn test_predicates() {
        assert!(!None.is_determined());
        assert!(Determined.is_determined());
        assert!(Determined.accepts_sightings());
        assert!(!Cleaned.accepts_sightings());
        assert!(Pregenerated.awaits_edits());
        assert!(Harvested.is_generated());
        assert!(Complete.is_terminal());
    }
}
