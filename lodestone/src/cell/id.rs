//! Identity and position types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of a cell in blocks.
pub const CELL_SIZE: i32 = 16;

/// Errors from parsing the `"x,z"` text form of a [`CellId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCellIdError {
    #[error("expected 'x,z' but found '{0}'")]
    MissingSeparator(String),

    #[error("invalid coordinate '{0}'")]
    InvalidCoordinate(String),
}

/// Grid coordinates of a cell.
///
/// Serialized canonically as `"x,z"`; this is the key used in persisted
/// state, so the text form must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId {
    pub x: i32,
    pub z: i32,
}

impl CellId {
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chebyshev (ring) distance to another cell.
    #[inline]
    pub fn chebyshev(&self, other: &CellId) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz) as u32
    }

    /// Squared Euclidean distance to another cell, in cell units.
    #[inline]
    pub fn distance_sq(&self, other: &CellId) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dz * dz
    }

    /// Cell offset by `(dx, dz)`.
    #[inline]
    pub fn offset(&self, dx: i32, dz: i32) -> CellId {
        CellId::new(self.x.wrapping_add(dx), self.z.wrapping_add(dz))
    }

    /// Block position at the horizontal center of this cell.
    pub fn center(&self, y: i32) -> BlockPos {
        BlockPos::new(
            self.x * CELL_SIZE + CELL_SIZE / 2,
            y,
            self.z * CELL_SIZE + CELL_SIZE / 2,
        )
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

impl FromStr for CellId {
    type Err = ParseCellIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, z) = s
            .split_once(',')
            .ok_or_else(|| ParseCellIdError::MissingSeparator(s.to_string()))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<i32>()
                .map_err(|_| ParseCellIdError::InvalidCoordinate(part.to_string()))
        };
        Ok(CellId::new(parse(x)?, parse(z)?))
    }
}

impl TryFrom<String> for CellId {
    type Error = ParseCellIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CellId> for String {
    fn from(id: CellId) -> Self {
        id.to_string()
    }
}

/// Offset of a block relative to a source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
    pub dz: i32,
}

impl Offset {
    pub const fn new(dx: i32, dy: i32, dz: i32) -> Self {
        Self { dx, dy, dz }
    }
}

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The cell containing this block.
    #[inline]
    pub fn cell(&self) -> CellId {
        CellId::new(self.x.div_euclid(CELL_SIZE), self.z.div_euclid(CELL_SIZE))
    }

    #[inline]
    pub fn offset(&self, offset: Offset) -> BlockPos {
        BlockPos::new(
            self.x.wrapping_add(offset.dx),
            self.y.wrapping_add(offset.dy),
            self.z.wrapping_add(offset.dz),
        )
    }

    #[inline]
    pub fn distance_sq(&self, other: &BlockPos) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Name of a configured cluster type, e.g. `"iron"`.
///
/// Backed by a shared string so the many per-cell copies stay cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ClusterTypeId(Arc<str>);

impl ClusterTypeId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterTypeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ClusterTypeId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<ClusterTypeId> for String {
    fn from(id: ClusterTypeId) -> Self {
        id.0.to_string()
    }
}

/// Opaque material identifier understood by the host world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(pub u32);

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "material#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_text_form() {
        assert_eq!(CellId::new(3, -7).to_string(), "3,-7");
        assert_eq!("3,-7".parse::<CellId>(), Ok(CellId::new(3, -7)));
        assert_eq!(" 12 , 4 ".parse::<CellId>(), Ok(CellId::new(12, 4)));
    }

    #[test]
    fn test_cell_id_parse_errors() {
        assert!(matches!(
            "12".parse::<CellId>(),
            Err(ParseCellIdError::MissingSeparator(_))
        ));
        assert!(matches!(
            "a,4".parse::<CellId>(),
            Err(ParseCellIdError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_cell_id_serializes_as_string() {
        let json = serde_json::to_string(&vec![CellId::new(1, 2), CellId::new(-3, 0)]).unwrap();
        assert_eq!(json, r#"["1,2","-3,0"]"#);

        let back: Vec<CellId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![CellId::new(1, 2), CellId::new(-3, 0)]);
    }

    #[test]
    fn test_cluster_type_id_serializes_as_string() {
        let ids = vec![ClusterTypeId::new("iron"), ClusterTypeId::new("gold")];
        let json = serde_json::to_string(&ids).unwrap();
        assert_eq!(json, r#"["iron","gold"]"#);

        let back: Vec<ClusterTypeId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ids);
        assert_eq!(back[0].as_str(), "iron");
    }

    #[test]
    fn test_distances() {
        let a = CellId::new(0, 0);
        let b = CellId::new(3, -4);
        assert_eq!(a.chebyshev(&b), 4);
        assert_eq!(a.distance_sq(&b), 25);
    }

    #[test]
    fn test_block_pos_cell_handles_negatives() {
        assert_eq!(BlockPos::new(0, 64, 15).cell(), CellId::new(0, 0));
        assert_eq!(BlockPos::new(16, 64, 0).cell(), CellId::new(1, 0));
        assert_eq!(BlockPos::new(-1, 64, -16).cell(), CellId::new(-1, -1));
        assert_eq!(BlockPos::new(-17, 64, 0).cell(), CellId::new(-2, 0));
    }

    #[test]
    fn test_center_lies_in_cell() {
        let cell = CellId::new(-5, 9);
        assert_eq!(cell.center(40).cell(), cell);
    }
}
