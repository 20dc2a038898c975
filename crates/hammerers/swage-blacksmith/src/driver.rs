//! Fuzzer driver: the pattern-search loop that synthesizes, maps, hammers
//! and scans many distinct patterns against one allocated arena, archiving
//! every pattern whose probes produced bit flips.
//!
//! Grounded in the reference fuzzer's main fuzzing loop
//! (`FuzzyHammerer::n_sided_frequency_based_hammering`); generalized here
//! onto this crate's `Hammering`/`Checkable` seams rather than the
//! reference's hardcoded arena and DRAMAnalyzer globals.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::Rng as _;
use rand::seq::SliceRandom;
use serde::Serialize;

use swage_core::hammerer::Hammering;
use swage_core::memory::{
    AggressorPtr, BytePointer, ConsecBlocks, DataPattern, Initializable, MemConfiguration,
    MemoryTupleTimer,
};
use swage_core::util::Rng as SeededRng;
use swage_core::victim::HammerVictimError;

use crate::aap::synthesize_frequency_based_pattern;
use crate::analyzer::DramAnalyzer;
use crate::blacksmith_config::BlacksmithConfig;
use crate::hammerer::{
    Attempts, BitFlip, Blacksmith, BlockShift, FuzzMetadata, FuzzSummary, HammeringPattern,
    PatternAddressMapper,
};
use crate::jitter::CodeJitter;
use crate::mapping::randomize_addresses;
use crate::params::FuzzingParameterSet;

/// A single mapping's sweep result: how many shifts flipped bits in which
/// direction, and the flips themselves.
#[derive(Serialize, Debug)]
pub struct MappingSweepResult {
    /// Id of the pattern this mapping belongs to.
    pub pattern_id: String,
    /// Id of the swept mapping (pre-shift).
    pub mapping_id: String,
    /// Number of observed 0->1 bit flips across every shift.
    pub zero_to_one: usize,
    /// Number of observed 1->0 bit flips across every shift.
    pub one_to_zero: usize,
    /// Every bit flip observed, across every shift that produced one.
    pub bit_flips: Vec<BitFlip>,
}

/// Run-level sweep results, a separate archive from the pattern archive
/// since a sweep may be run standalone against already-archived patterns.
#[derive(Serialize, Debug)]
pub struct SweepSummary {
    /// Run id and timing shared with the pattern archive this sweep followed.
    pub metadata: FuzzMetadata,
    /// One entry per swept mapping.
    pub sweeps: Vec<MappingSweepResult>,
}

/// Rounds between re-measurements of the activations-per-refresh constant,
/// unless the caller supplied a fixed value.
const REMEASURE_INTERVAL_ROUNDS: u64 = 100;

/// Hammer attempts performed per probe; sweeps and probes each re-hammer
/// once rather than repeating, matching the reference's per-mapping trial.
const ATTEMPTS_PER_PROBE: u32 = 1;

/// Row-shift window swept by the mini-sweep (§4.G.1 equivalent): 2 MiB.
const MINI_SWEEP_ROWS: i64 = (2 * 1024 * 1024) / swage_core::util::ROW_SIZE as i64;

/// Row-shift window swept by the full sweep (§4.G.2 equivalent): 256 MiB.
const SWEEP_ROWS: i64 = (256 * 1024 * 1024) / swage_core::util::ROW_SIZE as i64;

/// Configuration for one fuzzing run, independent of the memory
/// configuration and arena (those are supplied separately since they are
/// typically set up once and reused across runs).
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Wall-clock budget for the main fuzzing loop.
    pub runtime_limit: Duration,
    /// Address mappings probed per synthesized pattern.
    pub probes_per_pattern: usize,
    /// Overrides the empirically measured activations-per-refresh constant.
    pub acts_per_trefi_override: Option<u64>,
    /// Run the post-fuzzing 256 MiB sweep of the best pattern.
    pub sweeping: bool,
    /// log2 of the physically-contiguous block size backing the arena;
    /// passed to [`Blacksmith::new`] for address relocation.
    pub block_shift: usize,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs the main pattern-search loop against `arena` until
/// `config.runtime_limit` elapses, then ranks archived patterns with a
/// mini-sweep and, if configured, sweeps the best one over 256 MiB.
///
/// Returns the pattern archive and, when [`DriverConfig::sweeping`] is set
/// and found at least one bit flip, the accompanying sweep summary.
pub fn fuzz(
    config: &DriverConfig,
    bs_config: &BlacksmithConfig,
    mem_config: MemConfiguration,
    arena: &ConsecBlocks,
    timer: &dyn MemoryTupleTimer,
) -> (FuzzSummary, Option<SweepSummary>) {
    let seed: u64 = rand::rng().random();
    let run_id = format!("run-{seed:016x}");
    let start_time = unix_now();
    info!("seeding arena (seed {seed:#x})");
    arena.initialize(DataPattern::Random(Box::new(SeededRng::from_seed(seed))));

    let analyzer = DramAnalyzer::new(bs_config, arena.ptr() as AggressorPtr);
    let mut acts_per_trefi = config
        .acts_per_trefi_override
        .unwrap_or_else(|| analyzer.count_acts_per_ref(timer));
    info!("using {acts_per_trefi} activations per refresh interval");

    let num_banks = mem_config.get_bank_count();
    let mut bank_counter = 0usize;
    let mut aggressor_counter = 0u64;
    let mut next_aggressor_id = move || {
        aggressor_counter += 1;
        aggressor_counter
    };

    let mut rng = rand::rng();
    let mut patterns: Vec<HammeringPattern> = Vec::new();

    let start = Instant::now();
    let mut round: u64 = 0;
    while start.elapsed() < config.runtime_limit {
        round += 1;

        let params = FuzzingParameterSet::randomize(&mut rng, acts_per_trefi as u32);
        let (access_stream, mut agg_access_patterns) = synthesize_frequency_based_pattern(
            &mut rng,
            &params,
            params.total_acts_pattern as usize,
            params.base_period,
            &mut next_aggressor_id,
        );
        agg_access_patterns.shuffle(&mut rng);

        let access_ids: Vec<_> = access_stream.into_iter().flatten().collect();
        if access_ids.is_empty() {
            warn!("round {round}: synthesized an empty access stream, skipping");
            continue;
        }

        let max_period = agg_access_patterns
            .iter()
            .map(|p| p.frequency as usize)
            .max()
            .unwrap_or(params.base_period as usize);

        let mut pattern = HammeringPattern::new(
            format!("pattern-{round}"),
            params.base_period as i32,
            max_period,
            access_ids.len() as u32,
            params.num_refresh_intervals,
            access_ids,
            agg_access_patterns.clone(),
            CodeJitter::default(),
        );

        for probe in 0..config.probes_per_pattern.max(1) {
            let (mut mapping, victim_rows) = randomize_addresses(
                &mut rng,
                &params,
                &agg_access_patterns,
                &mut bank_counter,
                num_banks,
                format!("pattern-{round}-mapping-{probe}"),
            );

            match hammer_and_scan(
                mem_config,
                &pattern,
                &mapping,
                &victim_rows,
                arena,
                BlockShift::from(config.block_shift),
                Attempts::from(ATTEMPTS_PER_PROBE),
                seed,
            ) {
                Ok(flips) => {
                    if !flips.is_empty() {
                        info!(
                            "bitflip: round {round} probe {probe} mapping {} -> {} flips",
                            mapping.id,
                            flips.len()
                        );
                    }
                    mapping.push_probe_flips(flips);
                }
                Err(e) => {
                    warn!("round {round} probe {probe}: hammer failed: {e}");
                    continue;
                }
            }

            if mapping.count_bitflips() > 0 {
                pattern.push_mapping(mapping);
            }
        }

        if pattern.count_bitflips() > 0 {
            patterns.push(pattern);
        }

        if round % REMEASURE_INTERVAL_ROUNDS == 0 && config.acts_per_trefi_override.is_none() {
            acts_per_trefi = analyzer.count_acts_per_ref(timer);
            info!("re-measured activations per refresh: {acts_per_trefi}");
        }
    }

    info!(
        "fuzzing done after {round} rounds, {} patterns archived",
        patterns.len()
    );

    let mini_sweep_scores = mini_sweep(mem_config, arena, config.block_shift, seed, &mut patterns);
    let best_pattern_idx = mini_sweep_scores
        .iter()
        .enumerate()
        .max_by_key(|(_, &score)| score)
        .map(|(idx, _)| idx);

    let sweep_summary = if config.sweeping {
        best_pattern_idx.and_then(|idx| {
            sweep(mem_config, arena, config.block_shift, seed, &mut patterns[idx]).map(|result| {
                SweepSummary {
                    metadata: FuzzMetadata {
                        run_id: run_id.clone(),
                        start_time,
                        end_time: unix_now(),
                        memory_config_name: bs_config.name.clone(),
                    },
                    sweeps: vec![result],
                }
            })
        })
    } else {
        None
    };

    let summary = FuzzSummary {
        metadata: FuzzMetadata {
            run_id,
            start_time,
            end_time: unix_now(),
            memory_config_name: bs_config.name.clone(),
        },
        hammering_patterns: patterns,
    };

    (summary, sweep_summary)
}

/// Re-seeds the arena, hammers `pattern` at `mapping`'s placement, and
/// scans only `victim_rows` for flips, returning each one found.
fn hammer_and_scan(
    mem_config: MemConfiguration,
    pattern: &HammeringPattern,
    mapping: &PatternAddressMapper,
    victim_rows: &[usize],
    arena: &ConsecBlocks,
    block_shift: BlockShift,
    attempts: Attempts,
    seed: u64,
) -> Result<Vec<crate::hammerer::BitFlip>, HammerVictimError> {
    arena.initialize(DataPattern::Random(Box::new(SeededRng::from_seed(seed))));

    let hammerer = Blacksmith::new(mem_config, pattern, mapping, block_shift, arena, attempts);
    hammerer.hammer()?;

    let rows: HashSet<usize> = victim_rows.iter().copied().collect();
    let flips = arena.check_victim_rows(
        DataPattern::Random(Box::new(SeededRng::from_seed(seed))),
        &mem_config,
        mapping.bank_no,
        &rows,
    );

    Ok(flips
        .iter()
        .map(|f| crate::hammerer::BitFlip::from_core(f, mem_config))
        .collect())
}

/// For every archived mapping, sweeps its placement by `num_rows` row
/// shifts, hammering and scanning at each one; archives every shift that
/// produced flips and, for the best-pattern-only sweep, stops at the first
/// hit. Returns the number of bit-flip-positive shifts observed.
fn sweep_mapping(
    mem_config: MemConfiguration,
    arena: &ConsecBlocks,
    block_shift: usize,
    seed: u64,
    pattern: &HammeringPattern,
    mapping: &PatternAddressMapper,
    num_rows: i64,
    stop_on_first_hit: bool,
) -> (usize, Vec<PatternAddressMapper>, MappingSweepResult) {
    let mut positive_shifts = 0usize;
    let mut attempted_shifts = 0usize;
    let mut archived = Vec::new();
    let mut all_flips: Vec<BitFlip> = Vec::new();

    for shift in 0..num_rows.max(1) {
        attempted_shifts += 1;
        let mut shifted = mapping.shift_rows(shift);
        let victim_rows = shifted.victim_rows();
        match hammer_and_scan(
            mem_config,
            pattern,
            &shifted,
            &victim_rows,
            arena,
            BlockShift::from(block_shift),
            Attempts::from(ATTEMPTS_PER_PROBE),
            seed,
        ) {
            Ok(flips) if !flips.is_empty() => {
                positive_shifts += 1;
                all_flips.extend(flips.iter().cloned());
                shifted.push_probe_flips(flips);
                archived.push(shifted);
                if stop_on_first_hit {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("sweep shift {shift}: hammer failed: {e}"),
        }
    }

    let score = positive_shifts as f64 / attempted_shifts.max(1) as f64;
    for mapping in archived.iter_mut() {
        mapping.set_reproducibility_score(score);
    }

    let result = MappingSweepResult {
        pattern_id: pattern.id.clone(),
        mapping_id: mapping.id.clone(),
        zero_to_one: all_flips.iter().filter(|f| f.is_zero_to_one()).count(),
        one_to_zero: all_flips.iter().filter(|f| f.is_one_to_zero()).count(),
        bit_flips: all_flips,
    };

    (positive_shifts, archived, result)
}

/// Ranks every archived pattern by how many of its mappings, swept over 2
/// MiB, produce bit flips, logging the ranking; used to pick which pattern
/// deserves the (much more expensive) full sweep.
/// Sweeps every archived pattern's most effective mapping over a small
/// window to rank patterns by reproducibility, returning one score
/// (bit-flip-positive shift count) per pattern in `patterns`' order; the
/// caller uses this ranking to pick which pattern gets the full sweep.
fn mini_sweep(
    mem_config: MemConfiguration,
    arena: &ConsecBlocks,
    block_shift: usize,
    seed: u64,
    patterns: &mut [HammeringPattern],
) -> Vec<usize> {
    let mut scores = Vec::with_capacity(patterns.len());
    for pattern in patterns.iter_mut() {
        let Some(base_mapping) = pattern.determine_most_effective_mapping() else {
            scores.push(0);
            continue;
        };
        let (positive_shifts, archived, _) = sweep_mapping(
            mem_config,
            arena,
            block_shift,
            seed,
            pattern,
            &base_mapping,
            MINI_SWEEP_ROWS,
            false,
        );
        info!(
            "mini-sweep: pattern {} has {positive_shifts}/{MINI_SWEEP_ROWS} bit-flip-positive shifts",
            pattern.id
        );
        for mapping in archived {
            pattern.push_mapping(mapping);
        }
        scores.push(positive_shifts);
    }
    scores
}

/// Sweeps `pattern`'s most effective mapping over 256 MiB, stopping at the
/// first bit-flip-positive shift. Returns `None` if the pattern has no
/// archived mapping to sweep from.
fn sweep(
    mem_config: MemConfiguration,
    arena: &ConsecBlocks,
    block_shift: usize,
    seed: u64,
    pattern: &mut HammeringPattern,
) -> Option<MappingSweepResult> {
    let base_mapping = pattern.determine_most_effective_mapping()?;
    let (positive_shifts, archived, result) = sweep_mapping(
        mem_config,
        arena,
        block_shift,
        seed,
        pattern,
        &base_mapping,
        SWEEP_ROWS,
        true,
    );
    info!(
        "sweep: pattern {} had {positive_shifts} bit-flip-positive shift(s) before stopping",
        pattern.id
    );
    for mapping in archived {
        pattern.push_mapping(mapping);
    }
    Some(result)
}

/// Replays a previously archived pattern: restores its recorded
/// parameters implicitly (they are carried on the loaded `HammeringPattern`
/// and its mappings already) and re-hammers every one of its mappings,
/// optionally sweeping the most effective one afterward.
///
/// Returns the sweep result when `do_sweep` is set and a mapping was found
/// to sweep from; the caller is responsible for wrapping it in a
/// [`SweepSummary`] with whatever run metadata applies to this replay.
pub fn replay(
    mem_config: MemConfiguration,
    arena: &ConsecBlocks,
    block_shift: usize,
    seed: u64,
    pattern: &mut HammeringPattern,
    do_sweep: bool,
) -> Option<MappingSweepResult> {
    let mappings = pattern.address_mappings.clone();
    for mapping in mappings {
        let victim_rows = mapping.victim_rows();
        match hammer_and_scan(
            mem_config,
            pattern,
            &mapping,
            &victim_rows,
            arena,
            BlockShift::from(block_shift),
            Attempts::from(ATTEMPTS_PER_PROBE),
            seed,
        ) {
            Ok(flips) => {
                info!(
                    "replay: pattern {} mapping {} -> {} flips",
                    pattern.id,
                    mapping.id,
                    flips.len()
                );
            }
            Err(e) => warn!("replay: mapping {} failed: {e}", mapping.id),
        }
    }

    if do_sweep {
        sweep(mem_config, arena, block_shift, seed, pattern)
    } else {
        None
    }
}
