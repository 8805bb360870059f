//! Spacing-constrained stochastic cluster placement.
//!
//! - [`spacing`]: the two spacing-check strategies and their cost heuristic
//! - [`calculator`]: the two-phase batch algorithm

pub mod calculator;
pub mod spacing;

pub use calculator::{
    placement_counts, target_std_dev, Placement, PlacementCalculator, PlacementError,
};
pub use spacing::{conflicts, CellSet, SpacingStrategy};
