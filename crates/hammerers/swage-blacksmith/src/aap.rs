//! Frequency-based hammering-pattern synthesis.
//!
//! A pattern is an array of `total_acts_pattern` activation slots, each
//! either empty (a placeholder) or holding an aggressor. It is built up by
//! repeatedly choosing a still-empty slot, picking a frequency (a multiple
//! of the pattern's base period), an amplitude (how many times the chosen
//! aggressor group repeats back-to-back) and a group size (1- or 2-sided),
//! then tiling that group into every slot the chosen frequency/amplitude
//! pair reaches. This produces overlapping periodic access patterns at
//! several frequencies within one linear access sequence, the core idea
//! behind frequency-domain Rowhammer fuzzing.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::hammerer::Aggressor;
use crate::params::FuzzingParameterSet;

/// One frequency/amplitude/phase component of a synthesized pattern: the
/// aggressor group `aggressors` is accessed every `frequency` activations,
/// `amplitude` times in a row, starting at slot `start_offset`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggressorAccessPattern {
    /// Activations between successive repetitions of this group.
    pub frequency: u32,
    /// Number of back-to-back repetitions per occurrence.
    pub amplitude: u32,
    /// First pattern slot this group occupies.
    pub start_offset: usize,
    /// The aggressor row(s) accessed together in this group.
    pub aggressors: Vec<Aggressor>,
}

/// Synthesizes a frequency-based access pattern of `pattern_length` slots
/// with the given `base_period`, returning the linear access sequence and
/// the list of frequency components it was built from.
///
/// `next_id` supplies fresh, globally unique aggressor identifiers; pass a
/// closure over a shared counter when synthesizing several patterns so IDs
/// never collide.
pub fn synthesize_frequency_based_pattern(
    rng: &mut impl Rng,
    params: &FuzzingParameterSet,
    pattern_length: usize,
    base_period: u32,
    next_id: &mut impl FnMut() -> u64,
) -> (Vec<Option<Aggressor>>, Vec<AggressorAccessPattern>) {
    let mut slots: Vec<Option<Aggressor>> = vec![None; pattern_length];
    let mut components = Vec::new();

    let allowed_multipliers = available_multipliers(params.num_base_periods());
    let base_period = base_period as usize;

    let mut k = 0usize;
    while k < base_period {
        let mut cur_multipliers = allowed_multipliers.clone();
        let cur_m = params.random_gaussian_multiplier(rng, &cur_multipliers);
        cur_multipliers.retain(|&m| m >= cur_m);
        let cur_period = base_period * cur_m as usize;

        let remaining = (base_period - k).max(1) as u32;
        let num_aggressors = if remaining == 1 {
            1
        } else {
            params.random_n_sided(rng, remaining)
        };
        let cur_amplitude = params.random_amplitude(rng, remaining / num_aggressors.max(1));

        let group = next_aggressor_group(num_aggressors as usize, next_id);
        components.push(AggressorAccessPattern {
            frequency: cur_period as u32,
            amplitude: cur_amplitude,
            start_offset: k,
            aggressors: group.clone(),
        });
        fill_slots(&mut slots, k, cur_period, cur_amplitude as usize, &group);

        // Tile the remaining, still-empty occurrences of this base-period
        // slot with fresh (period, amplitude) choices until none remain.
        while let Some(next_slot) = first_unfilled_in_period(&slots, k, base_period) {
            let cur_m2 = params.random_gaussian_multiplier(rng, &cur_multipliers);
            cur_multipliers.retain(|&m| m >= cur_m2);
            let cur_period2 = base_period * cur_m2 as usize;
            let group2 = next_aggressor_group(num_aggressors as usize, next_id);
            components.push(AggressorAccessPattern {
                frequency: cur_period2 as u32,
                amplitude: cur_amplitude,
                start_offset: next_slot,
                aggressors: group2.clone(),
            });
            fill_slots(
                &mut slots,
                next_slot,
                cur_period2,
                cur_amplitude as usize,
                &group2,
            );
        }

        k += (num_aggressors * cur_amplitude).max(1) as usize;
    }

    (slots, components)
}

/// Generates `n` fresh aggressors via `next_id`.
fn next_aggressor_group(n: usize, next_id: &mut impl FnMut() -> u64) -> Vec<Aggressor> {
    (0..n).map(|_| Aggressor::new(next_id())).collect()
}

/// Tiles `aggressors` into `slots` starting at `start`, repeating every
/// `period` activations, `amplitude` times per occurrence.
fn fill_slots(
    slots: &mut [Option<Aggressor>],
    start: usize,
    period: usize,
    amplitude: usize,
    aggressors: &[Aggressor],
) {
    let pattern_length = slots.len();
    let mut offset = start;
    while offset < pattern_length {
        for amp in 0..amplitude {
            if offset + aggressors.len() * amp >= pattern_length {
                break;
            }
            for (agg_idx, &agg) in aggressors.iter().enumerate() {
                let target = offset + aggressors.len() * amp + agg_idx;
                if target >= pattern_length {
                    break;
                }
                slots[target] = Some(agg);
            }
        }
        offset += period;
    }
}

/// Finds the next empty slot at the same phase (`offset % base_period ==
/// k`) as `k`, scanning every `base_period`-th slot from `k` onward.
fn first_unfilled_in_period(
    slots: &[Option<Aggressor>],
    k: usize,
    base_period: usize,
) -> Option<usize> {
    (k..slots.len())
        .step_by(base_period.max(1))
        .find(|&idx| slots[idx].is_none())
}

/// Valid frequency multipliers `M` such that `M` is a power of two and
/// `M <= num_base_periods`.
fn available_multipliers(num_base_periods: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut m = 1u32;
    while m <= num_base_periods {
        out.push(m);
        m *= 2;
    }
    if out.is_empty() {
        out.push(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rng;

    #[test]
    fn synthesized_pattern_fills_every_slot() {
        let mut counter = 1u64;
        let mut next_id = move || {
            let id = counter;
            counter += 1;
            id
        };
        let params = FuzzingParameterSet::randomize(&mut rng(), 20);
        let (slots, components) = synthesize_frequency_based_pattern(
            &mut rng(),
            &params,
            16,
            4,
            &mut next_id,
        );
        assert!(slots.iter().all(|s| s.is_some()));
        assert!(!components.is_empty());
    }

    #[test]
    fn degenerate_amplitude_one_n_one_tiles_base_period_of_four() {
        let mut counter = 1u64;
        let mut next_id = move || {
            let id = counter;
            counter += 1;
            id
        };
        let params = FuzzingParameterSet {
            base_period: 4,
            total_acts_pattern: 4,
            ..FuzzingParameterSet::randomize(&mut rng(), 20)
        };
        let (slots, _) =
            synthesize_frequency_based_pattern(&mut rng(), &params, 4, 4, &mut next_id);
        assert!(slots.iter().all(|s| s.is_some()));
    }
}
