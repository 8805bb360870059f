//! Square spiral enumeration of cells.
//!
//! [`SpiralSequencer`] walks outward from a start cell in expanding square
//! rings. Legs are taken in the order up, right, down, left, and the leg
//! length grows by one after every second turn:
//!
//! ```text
//!   up 1, right 1, down 2, left 2, up 3, right 3, ...
//!
//!    7  8  9  ·
//!    6  1  2  ·
//!    5  4  3  ·
//! ```
//!
//! After `(2r + 1)²` draws every cell within Chebyshev distance `r` of the
//! start has been produced exactly once. The sequence is infinite and each
//! instance carries its own state.

use crate::cell::CellId;

/// Leg directions as `(dx, dz)`; "up" is towards negative z.
const DIRECTIONS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Lazy, restartable spiral over cell coordinates.
#[derive(Debug, Clone)]
pub struct SpiralSequencer {
    start: CellId,
    current: CellId,
    emitted: u64,
    direction: usize,
    leg_length: u32,
    leg_progress: u32,
    turns_at_length: u8,
}

impl SpiralSequencer {
    pub fn new(start: CellId) -> Self {
        Self {
            start,
            current: start,
            emitted: 0,
            direction: 0,
            leg_length: 1,
            leg_progress: 0,
            turns_at_length: 0,
        }
    }

    pub fn start(&self) -> CellId {
        self.start
    }

    /// Number of cells produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Ring of the most recently produced cell (0 for the start cell).
    pub fn radius(&self) -> u32 {
        self.start.chebyshev(&self.current)
    }

    /// Rewinds to the start cell.
    pub fn restart(&mut self) {
        *self = Self::new(self.start);
    }

    fn step(&mut self) {
        let (dx, dz) = DIRECTIONS[self.direction];
        self.current = self.current.offset(dx, dz);
        self.leg_progress += 1;

        if self.leg_progress == self.leg_length {
            self.leg_progress = 0;
            self.direction = (self.direction + 1) % DIRECTIONS.len();
            self.turns_at_length += 1;
            if self.turns_at_length == 2 {
                self.turns_at_length = 0;
                self.leg_length += 1;
            }
        }
    }
}

impl Iterator for SpiralSequencer {
    type Item = CellId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted > 0 {
            self.step();
        }
        self.emitted += 1;
        Some(self.current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}
