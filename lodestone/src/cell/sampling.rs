//! Reservoir sampling of source positions.
//!
//! While world generation places material, every sighting of a cluster
//! type's material is offered to the sampler. The sampler keeps a single
//! pick per type: the Nth sighting replaces the pick with probability 1/N,
//! so each of N sightings ends up as the pick with probability 1/N without
//! the sightings ever being stored.

use std::collections::HashMap;

use rand::Rng;

use super::id::{BlockPos, ClusterTypeId};

/// Current pick and number of sightings for one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSlot {
    pub pick: Option<BlockPos>,
    pub sightings: u64,
}

/// Per-type reservoir state for a cell.
#[derive(Debug, Clone, Default)]
pub struct SourceSampler {
    slots: HashMap<ClusterTypeId, SampleSlot>,
}

impl SourceSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers one sighting of `ty` at `pos`.
    pub fn sample<R: Rng + ?Sized>(&mut self, ty: &ClusterTypeId, pos: BlockPos, rng: &mut R) {
        let slot = self.slots.entry(ty.clone()).or_insert(SampleSlot {
            pick: None,
            sightings: 0,
        });
        slot.sightings += 1;
        if slot.sightings == 1 || rng.gen_range(0..slot.sightings) == 0 {
            slot.pick = Some(pos);
        }
    }

    /// The position currently held for `ty`, if any sighting occurred.
    pub fn pick(&self, ty: &ClusterTypeId) -> Option<BlockPos> {
        self.slots.get(ty).and_then(|slot| slot.pick)
    }

    /// Number of sightings recorded for `ty`.
    pub fn sightings(&self, ty: &ClusterTypeId) -> u64 {
        self.slots.get(ty).map_or(0, |slot| slot.sightings)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn iron() -> ClusterTypeId {
        ClusterTypeId::new("iron")
    }

    #[test]
    fn test_first_sighting_is_kept() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sampler = SourceSampler::new();

        sampler.sample(&iron(), BlockPos::new(1, 2, 3), &mut rng);

        assert_eq!(sampler.pick(&iron()), Some(BlockPos::new(1, 2, 3)));
        assert_eq!(sampler.sightings(&iron()), 1);
    }

    #[test]
    fn test_types_are_independent() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut sampler = SourceSampler::new();
        let gold = ClusterTypeId::new("gold");

        sampler.sample(&iron(), BlockPos::new(0, 0, 0), &mut rng);
        sampler.sample(&gold, BlockPos::new(5, 5, 5), &mut rng);
        sampler.sample(&gold, BlockPos::new(6, 6, 6), &mut rng);

        assert_eq!(sampler.sightings(&iron()), 1);
        assert_eq!(sampler.sightings(&gold), 2);
        assert_eq!(sampler.pick(&iron()), Some(BlockPos::new(0, 0, 0)));
    }

    #[test]
    fn test_unseen_type_has_no_pick() {
        let sampler = SourceSampler::new();
        assert_eq!(sampler.pick(&iron()), None);
        assert_eq!(sampler.sightings(&iron()), 0);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sampler = SourceSampler::new();
        sampler.sample(&iron(), BlockPos::new(0, 0, 0), &mut rng);

        sampler.clear();

        assert!(sampler.is_empty());
        assert_eq!(sampler.pick(&iron()), None);
    }

    /// Chi-square over 10,000 trials of 5 sightings each.
    ///
    /// With 4 degrees of freedom the 0.1% critical value is 18.47.
    #[test]
    fn test_pick_is_uniform_over_sightings() {
        const K: usize = 5;
        const TRIALS: usize = 10_000;

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = [0usize; K];

        for _ in 0..TRIALS {
            let mut sampler = SourceSampler::new();
            for i in 0..K {
                sampler.sample(&iron(), BlockPos::new(i as i32, 0, 0), &mut rng);
            }
            let pick = sampler.pick(&iron()).unwrap();
            counts[pick.x as usize] += 1;
        }

        let expected = TRIALS as f64 / K as f64;
        let chi_square: f64 = counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();

        assert!(
            chi_square < 18.47,
            "chi-square {chi_square:.2} too large, counts {counts:?}"
        );
    }
}
