//! Global placement index.
//!
//! Shared by every worker of one world. All sets are `DashMap`/`DashSet`
//! backed so lookups and inserts never take a global lock; only the
//! ordered source-cell log sits behind a mutex, and it is appended to by
//! the single determination worker.
//!
//! Callers must not hold a [`ClusterCells`] guard while inserting into the
//! index from the same thread.

use dashmap::mapref::one::Ref;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::cell::{CellId, ClusterTypeId};

/// Read guard over the cells holding one cluster type.
pub type ClusterCells<'a> = Ref<'a, ClusterTypeId, DashSet<CellId>>;

/// Spacing index and determination record for one world.
#[derive(Debug, Default)]
pub struct GlobalIndex {
    /// Every cell known to hold a cluster, per type.
    clusters_by_type: DashMap<ClusterTypeId, DashSet<CellId>>,

    /// Union of all `clusters_by_type` sets.
    occupied: DashSet<CellId>,

    /// Cells whose placement has been decided.
    determined: DashSet<CellId>,

    /// Batch roots in the order they were determined.
    source_log: Mutex<Vec<CellId>>,

    /// Membership view of `source_log`.
    sources: DashSet<CellId>,
}

impl GlobalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cluster of `ty` in `cell`.
    pub fn record_cluster(&self, ty: &ClusterTypeId, cell: CellId) {
        self.clusters_by_type
            .entry(ty.clone())
            .or_default()
            .insert(cell);
        self.occupied.insert(cell);
    }

    /// Cells holding clusters of `ty`, if any were ever recorded.
    pub fn clusters_of(&self, ty: &ClusterTypeId) -> Option<ClusterCells<'_>> {
        self.clusters_by_type.get(ty)
    }

    /// Cells holding a cluster of any type.
    pub fn occupied(&self) -> &DashSet<CellId> {
        &self.occupied
    }

    pub fn has_cluster(&self, cell: &CellId) -> bool {
        self.occupied.contains(cell)
    }

    /// Marks `cell` as decided. Returns false if it already was.
    pub fn mark_determined(&self, cell: CellId) -> bool {
        self.determined.insert(cell)
    }

    pub fn is_determined(&self, cell: &CellId) -> bool {
        self.determined.contains(cell)
    }

    pub fn determined_count(&self) -> usize {
        self.determined.len()
    }

    /// Appends a batch root to the log. Returns false for a repeat.
    pub fn record_source(&self, cell: CellId) -> bool {
        let mut log = self.source_log.lock();
        if !self.sources.insert(cell) {
            return false;
        }
        log.push(cell);
        true
    }

    pub fn is_source(&self, cell: &CellId) -> bool {
        self.sources.contains(cell)
    }

    /// Copy of the source log in determination order.
    pub fn sources(&self) -> Vec<CellId> {
        self.source_log.lock().clone()
    }

    pub fn source_count(&self) -> usize {
        self.source_log.lock().len()
    }

    /// Types recorded for `cell`, in id order.
    pub fn types_at(&self, cell: &CellId) -> Vec<ClusterTypeId> {
        if !self.occupied.contains(cell) {
            return Vec::new();
        }
        let mut types: Vec<_> = self
            .clusters_by_type
            .iter()
            .filter(|entry| entry.value().contains(cell))
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Every `(type, cell)` pair, optionally restricted to one type.
    pub fn cluster_cells(&self, filter: Option<&ClusterTypeId>) -> Vec<(ClusterTypeId, CellId)> {
        let mut out = Vec::new();
        for entry in self.clusters_by_type.iter() {
            if filter.is_some_and(|f| f != entry.key()) {
                continue;
            }
            out.extend(entry.value().iter().map(|cell| (entry.key().clone(), *cell)));
        }
        out
    }

    /// Number of recorded clusters per type.
    pub fn cluster_counts(&self) -> Vec<(ClusterTypeId, usize)> {
        let mut counts: Vec<_> = self
            .clusters_by_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();
        counts.sort();
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn iron() -> ClusterTypeId {
        ClusterTypeId::new("iron")
    }

    #[test]
    fn test_record_cluster_updates_both_views() {
        let index = GlobalIndex::new();
        index.record_cluster(&iron(), CellId::new(1, 2));

        assert!(index.has_cluster(&CellId::new(1, 2)));
        assert!(index
            .clusters_of(&iron())
            .is_some_and(|cells| cells.contains(&CellId::new(1, 2))));
        assert!(index.clusters_of(&ClusterTypeId::new("gold")).is_none());
    }

    #[test]
    fn test_mark_determined_once() {
        let index = GlobalIndex::new();
        assert!(index.mark_determined(CellId::new(0, 0)));
        assert!(!index.mark_determined(CellId::new(0, 0)));
        assert_eq!(index.determined_count(), 1);
    }

    #[test]
    fn test_source_log_keeps_order_and_dedups() {
        let index = GlobalIndex::new();
        assert!(index.record_source(CellId::new(5, 5)));
        assert!(index.record_source(CellId::new(0, 0)));
        assert!(!index.record_source(CellId::new(5, 5)));

        assert_eq!(index.sources(), vec![CellId::new(5, 5), CellId::new(0, 0)]);
        assert!(index.is_source(&CellId::new(0, 0)));
    }

    #[test]
    fn test_cluster_cells_filter() {
        let index = GlobalIndex::new();
        let gold = ClusterTypeId::new("gold");
        index.record_cluster(&iron(), CellId::new(0, 0));
        index.record_cluster(&gold, CellId::new(3, 3));

        assert_eq!(index.cluster_cells(None).len(), 2);
        assert_eq!(
            index.cluster_cells(Some(&gold)),
            vec![(gold.clone(), CellId::new(3, 3))]
        );
        assert_eq!(index.cluster_counts(), vec![(gold.clone(), 1), (iron(), 1)]);

        index.record_cluster(&gold, CellId::new(0, 0));
        assert_eq!(index.types_at(&CellId::new(0, 0)), vec![gold, iron()]);
        assert!(index.types_at(&CellId::new(9, 9)).is_empty());
    }

    #[test]
    fn test_concurrent_inserts() {
        let index = Arc::new(GlobalIndex::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        index.record_cluster(&iron(), CellId::new(t, i));
                        index.mark_determined(CellId::new(t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.determined_count(), 1000);
        assert_eq!(index.occupied().len(), 1000);
    }
}
