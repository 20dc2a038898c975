//! Placement of a synthesized access pattern onto concrete DRAM rows.
//!
//! A pattern's aggressors are abstract until mapped: each aggressor ID is
//! assigned a `(bank, row)` pair, aggressors that appear together in one
//! access slot get rows at a fixed intra-group distance, and successive
//! groups are spaced by an inter-group distance (or, with some probability,
//! reuse a row another group already occupies, to produce many-sided
//! patterns that share rows). The victim set is every row within five rows
//! of any aggressor.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use swage_core::memory::DRAMAddr;

use crate::aap::AggressorAccessPattern;
use crate::hammerer::{Aggressor, PatternAddressMapper};
use crate::jitter::CodeJitter;
use crate::params::FuzzingParameterSet;

/// Rows within this many rows of an aggressor are considered victims.
const ROW_THRESHOLD: i64 = 5;

/// Places the aggressors of `agg_access_patterns` onto rows of a single
/// bank, returning a fresh [`PatternAddressMapper`] and that mapping's
/// victim rows.
///
/// `bank_counter` is round-robined modulo `num_banks` and advanced by this
/// call, mirroring how successive mappings are spread across banks.
pub fn randomize_addresses(
    rng: &mut impl Rng,
    params: &FuzzingParameterSet,
    agg_access_patterns: &[AggressorAccessPattern],
    bank_counter: &mut usize,
    num_banks: usize,
    mapping_id: String,
) -> (PatternAddressMapper, Vec<usize>) {
    let bank_no = *bank_counter;
    *bank_counter = (*bank_counter + 1) % num_banks.max(1);

    let use_sequential = rng.random_bool(0.5);
    let mut cur_row = params.start_row.sample(rng) as usize;

    let mut aggressor_to_addr: HashMap<Aggressor, DRAMAddr> = HashMap::new();
    let mut occupied_rows: HashSet<usize> = HashSet::new();

    let total_abstract_aggs = agg_access_patterns
        .iter()
        .map(|p| p.aggressors.len())
        .sum::<usize>()
        .max(1);
    // Probability of mapping a fresh group onto an already-occupied row:
    // higher when the pattern references far more abstract aggressor slots
    // than the target number of distinct DRAM rows, so the excess is forced
    // to reuse rows -- this is what produces multi-sided patterns that
    // share a row across otherwise-unrelated aggressor groups.
    let prob_reuse_row =
        1.0 - (params.num_aggressors as f64 / total_abstract_aggs as f64).min(1.0);

    let mut assignment_trials = 0;

    for acc_pattern in agg_access_patterns {
        for (i, &agg) in acc_pattern.aggressors.iter().enumerate() {
            let row = if let Some(existing) = aggressor_to_addr.get(&agg) {
                existing.row as usize
            } else if i > 0 {
                let prev = acc_pattern.aggressors[i - 1];
                let prev_row = aggressor_to_addr[&prev].row as usize;
                cur_row = (prev_row + params.agg_intra_distance as usize) % params.max_row_no;
                cur_row
            } else {
                cur_row = (cur_row + params.agg_inter_distance.sample(rng) as usize)
                    % params.max_row_no;

                if rng.random_bool(prob_reuse_row.clamp(0.0, 1.0)) && !occupied_rows.is_empty() {
                    let idx = rng.random_range(0..occupied_rows.len());
                    *occupied_rows.iter().nth(idx).unwrap()
                } else {
                    let mut candidate = cur_row;
                    loop {
                        candidate = if use_sequential {
                            cur_row
                        } else {
                            rng.random_range(cur_row..cur_row + params.max_row_no) % params.max_row_no
                        };
                        if use_sequential || !occupied_rows.contains(&candidate) {
                            break;
                        }
                        assignment_trials += 1;
                        if assignment_trials >= 7 {
                            break;
                        }
                    }
                    assignment_trials = 0;
                    candidate
                }
            };

            occupied_rows.insert(row);
            aggressor_to_addr.insert(agg, DRAMAddr::new(bank_no, row, 0));
        }
    }

    let victim_rows = determine_victim_rows(&aggressor_to_addr);

    let min_row = occupied_rows.iter().copied().min().unwrap_or(0);
    let max_row = occupied_rows.iter().copied().max().unwrap_or(0);

    let code_jitter = CodeJitter {
        sync_each_ref: params.sync_each_ref,
        total_activations: params.hammering_total_num_activations,
        num_aggressors_for_sync: params.num_aggressors_for_sync.sample(rng) as usize,
        ..CodeJitter::default()
    };

    let mapper = PatternAddressMapper::new(
        mapping_id,
        min_row,
        max_row,
        bank_no,
        aggressor_to_addr,
        code_jitter,
    );

    (mapper, victim_rows)
}

/// Every row within [`ROW_THRESHOLD`] rows of any mapped aggressor.
pub(crate) fn determine_victim_rows(aggressor_to_addr: &HashMap<Aggressor, DRAMAddr>) -> Vec<usize> {
    let mut victims: HashSet<usize> = HashSet::new();
    for addr in aggressor_to_addr.values() {
        for delta in -ROW_THRESHOLD..=ROW_THRESHOLD {
            if delta == 0 {
                continue;
            }
            let candidate = addr.row as i64 + delta;
            if candidate >= 0 {
                victims.insert(candidate as usize);
            }
        }
    }
    let mut victims: Vec<usize> = victims.into_iter().collect();
    victims.sort_unstable();
    victims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victim_computation_covers_exactly_ten_rows_around_one_aggressor() {
        let mut addrs = HashMap::new();
        addrs.insert(Aggressor::new(1), DRAMAddr::new(0, 100, 0));
        let victims = determine_victim_rows(&addrs);
        assert_eq!(victims.len(), 2 * ROW_THRESHOLD as usize);
        assert!(victims.contains(&95));
        assert!(victims.contains(&105));
        assert!(!victims.contains(&94));
        assert!(!victims.contains(&106));
        assert!(!victims.contains(&100));
    }

    #[test]
    fn bank_counter_round_robins_modulo_num_banks() {
        let mut counter = 0usize;
        let mut rng = rand::rng();
        let params = FuzzingParameterSet::randomize(&mut rng, 20);
        for expected in [0, 1, 0] {
            let (mapper, _) =
                randomize_addresses(&mut rng, &params, &[], &mut counter, 2, "m".into());
            assert_eq!(mapper.bank_no, expected);
        }
    }
}
