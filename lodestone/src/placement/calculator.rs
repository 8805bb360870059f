//! Two-phase cluster placement for one determination batch.
//!
//! Phase A walks the batch with Gaussian strides and picks an untyped
//! candidate list of the right aggregate size, honouring the global
//! minimum spacing. Cells decided by earlier batches count as picked, so a
//! batch overlapping old ground gets proportionally fewer new clusters.
//! Phase B hands those candidates out to cluster types, highest spawn rate
//! first, honouring each type's own spacing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use thiserror::Error;
use tracing::{debug, warn};

use super::spacing::conflicts;
use crate::cell::{CellId, ClusterTypeId};
use crate::config::{ClusterConfig, ClusterTypeSettings};
use crate::scheduler::GlobalIndex;

/// Mean above which the target deviation is damped logarithmically.
const STDEV_DAMPING_THRESHOLD: f64 = 16.0;

/// How many times the Phase A walk may wrap around the batch.
const MAX_WALK_PASSES: usize = 4;

/// Type assignments produced for one batch.
pub type Placement = BTreeMap<CellId, BTreeSet<ClusterTypeId>>;

/// Internal placement failures. The calculator never surfaces these to
/// callers; they end the batch early with a partial result.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid Gaussian for {what} (mean {mean}, std dev {std_dev}): {source}")]
    InvalidDistribution {
        what: String,
        mean: f64,
        std_dev: f64,
        #[source]
        source: NormalError,
    },
}

fn normal(what: &str, mean: f64, std_dev: f64) -> Result<Normal<f64>, PlacementError> {
    Normal::new(mean, std_dev).map_err(|source| PlacementError::InvalidDistribution {
        what: what.to_string(),
        mean,
        std_dev,
        source,
    })
}

/// Standard deviation of the per-batch target count for a spawn rate.
///
/// Grows as `sqrt(mean) / 2` up to the damping threshold, then only
/// logarithmically, and is continuous at the threshold.
pub fn target_std_dev(mean: f64) -> f64 {
    if mean.is_nan() || mean <= 0.0 {
        return 0.0;
    }
    if mean <= STDEV_DAMPING_THRESHOLD {
        mean.sqrt() / 2.0
    } else {
        STDEV_DAMPING_THRESHOLD.sqrt() / 2.0 * (1.0 + (mean / STDEV_DAMPING_THRESHOLD).ln())
    }
}

/// Places clusters for batches against one world's index.
///
/// The calculator only reads the index; the caller records the result.
pub struct PlacementCalculator<'a> {
    config: &'a ClusterConfig,
    index: &'a GlobalIndex,
}

/// Work completed so far, kept outside the fallible steps so a failure
/// still returns everything decided before it.
#[derive(Default)]
struct Progress {
    placement: Placement,
    remaining: BTreeMap<ClusterTypeId, usize>,
}

impl<'a> PlacementCalculator<'a> {
    pub fn new(config: &'a ClusterConfig, index: &'a GlobalIndex) -> Self {
        Self { config, index }
    }

    /// Assigns cluster types to cells of `batch`.
    ///
    /// Cells already determined in the index never appear in the result.
    pub fn calculate<R: Rng + ?Sized>(&self, batch: &[CellId], rng: &mut R) -> Placement {
        let mut progress = Progress::default();

        if let Err(e) = self.run(batch, rng, &mut progress) {
            let remaining: Vec<String> = progress
                .remaining
                .iter()
                .filter(|(_, left)| **left > 0)
                .map(|(ty, left)| format!("{ty}={left}"))
                .collect();
            warn!(
                error = %e,
                remaining = %remaining.join(","),
                placed = progress.placement.len(),
                "Batch placement failed, keeping partial result"
            );
        }

        let mut placement = progress.placement;
        placement.retain(|cell, _| !self.index.is_determined(cell));
        placement
    }

    fn run<R: Rng + ?Sized>(
        &self,
        batch: &[CellId],
        rng: &mut R,
        progress: &mut Progress,
    ) -> Result<(), PlacementError> {
        if batch.is_empty() {
            return Ok(());
        }

        let types = self.ordered_types();
        let mut targets = Vec::with_capacity(types.len());
        for settings in &types {
            let target = self.draw_target(settings, rng)?;
            progress.remaining.insert(settings.id.clone(), target);
            targets.push(target);
        }

        let total: usize = targets.iter().sum();
        if total == 0 {
            return Ok(());
        }

        let candidates = self.phase_a(batch, total, &types, rng)?;
        debug!(
            batch = batch.len(),
            total,
            candidates = candidates.len(),
            "Placement phase A done"
        );

        self.phase_b(candidates, &types, rng, progress);
        Ok(())
    }

    /// Types in descending spawn rate; ties broken by id.
    fn ordered_types(&self) -> Vec<&'a ClusterTypeSettings> {
        let mut types: Vec<_> = self.config.types().collect();
        types.sort_by(|a, b| {
            b.spawn_rate
                .total_cmp(&a.spawn_rate)
                .then_with(|| a.id.cmp(&b.id))
        });
        types
    }

    fn draw_target<R: Rng + ?Sized>(
        &self,
        settings: &ClusterTypeSettings,
        rng: &mut R,
    ) -> Result<usize, PlacementError> {
        let mean = settings.spawn_rate;
        if mean <= 0.0 {
            return Ok(0);
        }
        let dist = normal(settings.id.as_str(), mean, target_std_dev(mean))?;
        Ok(dist.sample(rng).round().max(0.0) as usize)
    }

    /// Picks `total` spaced cells from `batch`. Already determined cells
    /// are taken as they come and stripped again by [`Self::calculate`].
    fn phase_a<R: Rng + ?Sized>(
        &self,
        batch: &[CellId],
        total: usize,
        types: &[&ClusterTypeSettings],
        rng: &mut R,
    ) -> Result<Vec<CellId>, PlacementError> {
        let len = batch.len();
        let min_spacing = self.config.placement.min_spacing;
        let stride = Stride::new(len, total, min_spacing, max_stride(types))?;

        let mut visited: HashSet<CellId> = HashSet::with_capacity(len);
        let mut placed: HashSet<CellId> = HashSet::with_capacity(total);
        let mut candidates = Vec::with_capacity(total);

        let mut position = rng.gen_range(0..len);
        let mut walked = 0usize;
        while candidates.len() < total && visited.len() < len && walked < len * MAX_WALK_PASSES {
            let cell = batch[position % len];
            if visited.insert(cell)
                && (self.index.is_determined(&cell)
                    || !conflicts(cell, min_spacing, &(self.index.occupied(), &placed)))
            {
                placed.insert(cell);
                candidates.push(cell);
            }

            let step = stride.sample(rng);
            position = (position + step) % len;
            walked += step;
        }

        Ok(candidates)
    }

    /// Distributes candidates among types.
    fn phase_b<R: Rng + ?Sized>(
        &self,
        mut candidates: Vec<CellId>,
        types: &[&ClusterTypeSettings],
        rng: &mut R,
        progress: &mut Progress,
    ) {
        let mut claimed: HashSet<CellId> = HashSet::new();

        for settings in types {
            let target = progress.remaining.get(&settings.id).copied().unwrap_or(0);
            if target == 0 {
                continue;
            }

            candidates.retain(|cell| !claimed.contains(cell));
            candidates.shuffle(rng);

            let existing = self.index.clusters_of(&settings.id);
            let mut local: HashSet<CellId> = HashSet::new();
            let mut placed = 0;
            for &cell in &candidates {
                if placed == target {
                    break;
                }
                let conflict = match existing.as_deref() {
                    Some(cells) => conflicts(cell, settings.min_spacing, &(cells, &local)),
                    None => conflicts(cell, settings.min_spacing, &local),
                };
                if conflict {
                    continue;
                }
                local.insert(cell);
                claimed.insert(cell);
                progress
                    .placement
                    .entry(cell)
                    .or_default()
                    .insert(settings.id.clone());
                placed += 1;
            }
            drop(existing);

            progress.remaining.insert(settings.id.clone(), target - placed);
            if placed < target {
                debug!(
                    cluster = %settings.id,
                    target,
                    placed,
                    "Cluster type short of target"
                );
            }
        }
    }
}

/// Longest stride allowed by the active types, if any of them caps it.
fn max_stride(types: &[&ClusterTypeSettings]) -> Option<usize> {
    types
        .iter()
        .filter(|settings| settings.spawn_rate > 0.0 && settings.max_spacing > 0)
        .map(|settings| settings.max_spacing as usize)
        .max()
}

/// Gaussian step through a batch, at least one cell and at most `max`.
struct Stride {
    dist: Normal<f64>,
    max: usize,
}

impl Stride {
    fn new(
        len: usize,
        total: usize,
        min_spacing: u32,
        max: Option<usize>,
    ) -> Result<Self, PlacementError> {
        let max = max.unwrap_or(len).max(1);
        let mean = (len as f64 / total as f64).min(max as f64);
        let std_dev = ((mean - min_spacing as f64) / 3.0).max(0.0);
        Ok(Self {
            dist: normal("phase A stride", mean, std_dev)?,
            max,
        })
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        (self.dist.sample(rng).round().max(1.0) as usize).min(self.max)
    }
}

/// Counts placements per type.
pub fn placement_counts(placement: &Placement) -> HashMap<ClusterTypeId, usize> {
    let mut counts = HashMap::new();
    for types in placement.values() {
        for ty in types {
            *counts.entry(ty.clone()).or_insert(0) += 1;
        }
    }
    counts
}
