//! Spacing checks between cluster-bearing cells.
//!
//! "Is cell C closer than D to any cell in S" has two implementations:
//!
//! - [`SpacingStrategy::Neighborhood`] checks every cell of the square
//!   `(2D+1)×(2D+1)` around C, so any member at Chebyshev distance `<= D`
//!   conflicts. Cost grows with D².
//! - [`SpacingStrategy::Linear`] scans S and treats Euclidean distance
//!   `< D` as a conflict. Cost grows with |S|.
//!
//! They disagree on the ring where the Euclidean distance is at least D but
//! the Chebyshev distance is at most D, e.g. `(3, 0)` or `(2, 3)` at D = 3.
//! The neighbourhood check rejects those, the linear scan accepts them.
//! A linear conflict is always a neighbourhood conflict.

use std::collections::HashSet;
use std::hash::BuildHasher;

use dashmap::DashSet;

use crate::cell::CellId;

/// A set of cells that can be looked up and scanned.
pub trait CellSet {
    fn cell_count(&self) -> usize;

    fn contains_cell(&self, cell: &CellId) -> bool;

    /// True if `pred` holds for any member.
    fn any_cell(&self, pred: &mut dyn FnMut(&CellId) -> bool) -> bool;
}

impl<S: BuildHasher> CellSet for HashSet<CellId, S> {
    fn cell_count(&self) -> usize {
        self.len()
    }

    fn contains_cell(&self, cell: &CellId) -> bool {
        self.contains(cell)
    }

    fn any_cell(&self, pred: &mut dyn FnMut(&CellId) -> bool) -> bool {
        self.iter().any(|c| pred(c))
    }
}

impl<S: BuildHasher + Clone> CellSet for DashSet<CellId, S> {
    fn cell_count(&self) -> usize {
        self.len()
    }

    fn contains_cell(&self, cell: &CellId) -> bool {
        self.contains(cell)
    }

    fn any_cell(&self, pred: &mut dyn FnMut(&CellId) -> bool) -> bool {
        self.iter().any(|c| pred(c.key()))
    }
}

/// The empty set, for types nothing has been placed for yet.
impl CellSet for () {
    fn cell_count(&self) -> usize {
        0
    }

    fn contains_cell(&self, _cell: &CellId) -> bool {
        false
    }

    fn any_cell(&self, _pred: &mut dyn FnMut(&CellId) -> bool) -> bool {
        false
    }
}

/// Union of two sets; members may overlap.
impl<A: CellSet + ?Sized, B: CellSet + ?Sized> CellSet for (&A, &B) {
    fn cell_count(&self) -> usize {
        self.0.cell_count() + self.1.cell_count()
    }

    fn contains_cell(&self, cell: &CellId) -> bool {
        self.0.contains_cell(cell) || self.1.contains_cell(cell)
    }

    fn any_cell(&self, pred: &mut dyn FnMut(&CellId) -> bool) -> bool {
        self.0.any_cell(pred) || self.1.any_cell(pred)
    }
}

/// How a spacing check is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacingStrategy {
    Neighborhood,
    Linear,
}

impl SpacingStrategy {
    /// Picks the cheaper strategy for a set of `set_len` cells at spacing
    /// `spacing`: the linear scan once `min(|S|, D²)` falls below D.
    pub fn choose(set_len: usize, spacing: u32) -> Self {
        let spacing = spacing as u64;
        let cost = (set_len as u64).min(spacing.saturating_mul(spacing));
        if cost < spacing {
            SpacingStrategy::Linear
        } else {
            SpacingStrategy::Neighborhood
        }
    }

    /// True when `cell` is too close to a member of `set`. What counts as
    /// too close at exactly `spacing` depends on the strategy.
    pub fn conflicts<S: CellSet + ?Sized>(self, cell: CellId, spacing: u32, set: &S) -> bool {
        if spacing == 0 {
            return false;
        }
        match self {
            SpacingStrategy::Neighborhood => {
                let reach = spacing as i32;
                (-reach..=reach).any(|dx| {
                    (-reach..=reach).any(|dz| set.contains_cell(&cell.offset(dx, dz)))
                })
            }
            SpacingStrategy::Linear => {
                let limit = spacing as i64 * spacing as i64;
                set.any_cell(&mut |other| cell.distance_sq(other) < limit)
            }
        }
    }
}

/// Spacing check using whichever strategy is cheaper for `set`.
pub fn conflicts<S: CellSet + ?Sized>(cell: CellId, spacing: u32, set: &S) -> bool {
    SpacingStrategy::choose(set.cell_count(), spacing).conflicts(cell, spacing, set)
}
