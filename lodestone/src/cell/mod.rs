//! Cells and their per-cell pipeline state.
//!
//! - [`id`]: identity and position types
//! - [`status`]: the status enum and its transition table
//! - [`sampling`]: reservoir sampling of source positions
//! - [`managed`]: the lockable per-cell state machine

pub mod id;
pub mod managed;
pub mod sampling;
pub mod status;

pub use id::{BlockPos, CellId, ClusterTypeId, MaterialId, Offset, ParseCellIdError, CELL_SIZE};
pub use managed::{ApplyOutcome, CellGuard, CellLock, CellState, ManagedCell, PendingEdit};
pub use sampling::{SampleSlot, SourceSampler};
pub use status::{CellStatus, Transition, TransitionError};
