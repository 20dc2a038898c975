//! Randomized fuzzing parameters for one pattern-synthesis round.
//!
//! Mirrors the reference fuzzer's parameter set: most knobs are sampled once
//! per pattern from a fixed range, then held constant while the pattern is
//! built and mapped. Kept as a single struct (rather than threading a dozen
//! loose values through the synthesizer) so a whole round's configuration
//! can be logged or replayed as one unit.

use rand::Rng;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// An inclusive `[min, max]` integer range sampled uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive lower bound.
    pub min: i64,
    /// Inclusive upper bound.
    pub max: i64,
}

impl Range {
    /// Builds a fixed (degenerate) range.
    pub fn fixed(value: i64) -> Self {
        Range {
            min: value,
            max: value,
        }
    }

    /// Samples a value uniformly from `[min, max]`.
    pub fn sample(&self, rng: &mut impl Rng) -> i64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }
}

/// Parameters governing one round of frequency-based pattern synthesis and
/// placement, sampled once per round.
///
/// Literal bounds are grounded in the reference fuzzer's `randomize_parameters`:
/// aggressor counts in `[8, 96]`, inter-aggressor distance in `[1, 24]`,
/// intra-aggressor distance fixed at `2`, start row in `[0, 2048)`,
/// pre-hammer settle time in `[10, 128)` refresh intervals, and a 20%/80%
/// split between 1-sided and 2-sided aggressor groups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuzzingParameterSet {
    /// Target number of distinct DRAM rows the mapper should try to spread
    /// this pattern's aggressors across.
    pub num_aggressors: u32,
    /// Measured (or overridden) activations per refresh interval.
    pub num_activations_per_trefi: u32,
    /// Total activations the synthesized pattern should span.
    pub total_acts_pattern: u32,
    /// Total activations to hammer for once mapped (cumulative across
    /// refresh intervals, independent of pattern length).
    pub hammering_total_num_activations: u64,
    /// Length, in activations, of the pattern's repeating base period.
    pub base_period: u32,
    /// Number of DRAM rows available for placement (`max_row_no`).
    pub max_row_no: usize,
    /// Row each mapping's aggressors are placed starting from.
    pub start_row: Range,
    /// Distance, in rows, between aggressors of the same group.
    pub agg_intra_distance: u32,
    /// Distance, in rows, between successive aggressor groups.
    pub agg_inter_distance: Range,
    /// Number of aggressors accessed at the start/end of the pattern to
    /// detect the refresh-interval boundary.
    pub num_aggressors_for_sync: Range,
    /// Number of refresh intervals this pattern hammers across.
    pub num_refresh_intervals: u32,
    /// Whether to re-synchronize with the refresh interval mid-pattern.
    pub sync_each_ref: bool,
    /// Refresh intervals to idle for before starting to hammer.
    pub wait_until_start_hammering_refs: Range,
}

/// Weighted choice of how many aggressors share one access slot: 20% chance
/// of a single aggressor, 80% chance of a pair.
const N_SIDED_CHOICES: [u32; 2] = [1, 2];
const N_SIDED_WEIGHTS: [u32; 2] = [20, 80];

/// Picks a random even divisor of `n` that is at least `min_value`, falling
/// back to `n` itself if none qualifies.
fn random_even_divisor(rng: &mut impl Rng, n: u32, min_value: u32) -> u32 {
    let mut divisors = Vec::new();
    let mut i = 1u32;
    while i.saturating_mul(i) <= n {
        if n % i == 0 {
            let other = n / i;
            if other == 1 && i % 2 == 0 {
                divisors.push(i);
            } else {
                if i % 2 == 0 {
                    divisors.push(i);
                }
                if other % 2 == 0 {
                    divisors.push(other);
                }
            }
        }
        i += 1;
    }
    divisors.shuffle(rng);
    divisors.into_iter().find(|&d| d >= min_value).unwrap_or(n)
}

impl FuzzingParameterSet {
    /// Randomizes a fresh parameter set for one synthesis round, given the
    /// number of activations measured per refresh interval.
    pub fn randomize(rng: &mut impl Rng, measured_num_acts_per_ref: u32) -> Self {
        let num_aggressors = rng.random_range(8..=96u32);
        let num_refresh_intervals = 2u32.pow(rng.random_range(0..=4));
        let total_acts_pattern = measured_num_acts_per_ref * num_refresh_intervals;
        let base_period = random_even_divisor(rng, total_acts_pattern, 4);
        FuzzingParameterSet {
            num_aggressors,
            num_activations_per_trefi: measured_num_acts_per_ref,
            total_acts_pattern,
            hammering_total_num_activations: 5_000_000,
            base_period,
            max_row_no: 2048,
            start_row: Range {
                min: 0,
                max: 2047,
            },
            agg_intra_distance: 2,
            agg_inter_distance: Range { min: 1, max: 24 },
            num_aggressors_for_sync: Range::fixed(2),
            num_refresh_intervals,
            sync_each_ref: rng.random_bool(0.5),
            wait_until_start_hammering_refs: Range { min: 10, max: 127 },
        }
    }

    /// Number of base periods that fit in the total pattern length; bounds
    /// how large a frequency multiplier is still meaningful.
    pub fn num_base_periods(&self) -> u32 {
        (self.total_acts_pattern / self.base_period.max(1)).max(1)
    }

    /// Samples how many aggressors share one access slot (1-sided 20% of
    /// the time, 2-sided 80%), capped at `upper_bound`.
    pub fn random_n_sided(&self, rng: &mut impl Rng, upper_bound: u32) -> u32 {
        if upper_bound <= 1 {
            return 1;
        }
        let dist = WeightedIndex::new(N_SIDED_WEIGHTS).expect("static weights are valid");
        N_SIDED_CHOICES[dist.sample(rng)].min(upper_bound)
    }

    /// Samples an amplitude (number of repeated accesses per slot) up to
    /// `max`, inclusive, with a minimum of 1.
    pub fn random_amplitude(&self, rng: &mut impl Rng, max: u32) -> u32 {
        if max <= 1 {
            1
        } else {
            rng.random_range(1..=max)
        }
    }

    /// Picks a multiplier from `allowed`, Gaussian-biased toward the middle
    /// of the list, clamped into range if the sample falls outside it.
    pub fn random_gaussian_multiplier(&self, rng: &mut impl Rng, allowed: &[u32]) -> u32 {
        if allowed.len() == 1 {
            return allowed[0];
        }
        let mean = if allowed.len() % 2 == 0 {
            (allowed.len() / 2 - 1) as f64
        } else {
            (allowed.len() - 1) as f64 / 2.0
        };
        let stddev = 1.0;
        loop {
            let u1: f64 = rng.random_range(f64::EPSILON..1.0);
            let u2: f64 = rng.random::<f64>();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            let idx = (mean + stddev * z).round();
            if idx >= 0.0 && (idx as usize) < allowed.len() {
                return allowed[idx as usize];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_sample_stays_in_bounds() {
        let r = Range { min: 10, max: 20 };
        let mut rng = rand::rng();
        for _ in 0..100 {
            let v = r.sample(&mut rng);
            assert!((10..=20).contains(&v));
        }
    }

    #[test]
    fn fixed_range_always_returns_its_value() {
        let r = Range::fixed(7);
        let mut rng = rand::rng();
        assert_eq!(r.sample(&mut rng), 7);
    }

    #[test]
    fn n_sided_respects_upper_bound() {
        let params = FuzzingParameterSet::randomize(&mut rand::rng(), 20);
        let mut rng = rand::rng();
        for _ in 0..50 {
            assert_eq!(params.random_n_sided(&mut rng, 1), 1);
        }
    }
}
