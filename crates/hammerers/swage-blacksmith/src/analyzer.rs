//! DRAM row-conflict timing calibration and activations-per-refresh counting.
//!
//! Grounded in the reference fuzzer's `DramAnalyzer`: a thin host-side
//! measurement layer that sits on top of [`MemoryTupleTimer`] to (a) report
//! the mean latency between two addresses (used once to sanity-check the
//! configured threshold) and (b) empirically count how many DRAM
//! activations fit in one refresh interval, a quantity the pattern
//! synthesizer needs but that varies across DIMMs and is not worth hardcoding.

use log::{debug, info, warn};

use swage_core::memory::{AggressorPtr, MemoryTupleTimer};

use crate::blacksmith_config::BlacksmithConfig;

/// Initial refresh-interval samples discarded as warm-up noise.
const SKIP_FIRST_N: usize = 50;

/// Latency, in cycles, above which a `{flush; read a; read b}` round is
/// judged to have crossed a refresh boundary.
const REFRESH_LATENCY_THRESHOLD: u64 = 1000;

/// Sample-count interval at which the running standard deviation is checked.
const STD_CHECK_INTERVAL: usize = 200;

/// Standard deviation, in activations, below which the running estimate is
/// considered converged.
const STD_TARGET: f64 = 3.0;

/// Rounds to attempt before giving up on one convergence attempt and
/// restarting from a cleared accumulator.
const MAX_ROUNDS_PER_ATTEMPT: u64 = 1_000_000;

/// Measures row-conflict timing and the DRAM activations-per-refresh-interval
/// constant for one allocated arena.
pub struct DramAnalyzer<'a> {
    config: &'a BlacksmithConfig,
    start_address: AggressorPtr,
}

impl<'a> DramAnalyzer<'a> {
    /// Builds an analyzer over the arena starting at `start_address`.
    pub fn new(config: &'a BlacksmithConfig, start_address: AggressorPtr) -> Self {
        DramAnalyzer {
            config,
            start_address,
        }
    }

    /// Measures the mean latency, in cycles, of `rounds` repetitions of
    /// accessing `a` then `b`.
    ///
    /// # Safety
    ///
    /// `a` and `b` must be valid for reads for the duration of this call.
    pub unsafe fn measure_access(
        &self,
        timer: &dyn MemoryTupleTimer,
        a: AggressorPtr,
        b: AggressorPtr,
        rounds: usize,
    ) -> u64 {
        unsafe { timer.time_subsequent_access_from_ram(a, b, rounds) }
    }

    /// Finds an address `b` in the same bank as, but a different row from,
    /// `start_address`, by scanning forward one byte at a time.
    fn find_same_bank_diff_row_pair(&self) -> (AggressorPtr, AggressorPtr) {
        let bank_mask = self.config.bank_bits[0].to_bitstr();
        let row_mask = self.config.row_bits[0].to_bitstr();

        let a = self.start_address;
        let a_bank = (a as usize) & bank_mask;
        let a_row = (a as usize) & row_mask;

        let mut b = unsafe { a.add(1) };
        loop {
            let b_addr = b as usize;
            if (b_addr & bank_mask) == a_bank && (b_addr & row_mask) != a_row {
                break;
            }
            b = unsafe { b.add(1) };
        }

        debug!("count_acts_per_ref will use {:p} and {:p}", a, b);
        (a, b)
    }

    /// Empirically determines the number of DRAM activations that fit
    /// within one refresh interval (`tREFI`).
    ///
    /// Retries from scratch whenever the running estimate fails to converge
    /// within [`MAX_ROUNDS_PER_ATTEMPT`] rounds.
    pub fn count_acts_per_ref(&self, timer: &dyn MemoryTupleTimer) -> u64 {
        let (a, b) = self.find_same_bank_diff_row_pair();

        // Warm the cache, mirroring the reference before its measurement loop.
        unsafe {
            std::ptr::read_volatile(a);
            std::ptr::read_volatile(b);
        }

        loop {
            if let Some(acts) = self.count_acts_per_ref_attempt(timer, a, b) {
                return acts;
            }
            warn!("acts-per-refresh estimate failed to converge, retrying");
        }
    }

    /// One convergence attempt; returns `None` if [`MAX_ROUNDS_PER_ATTEMPT`]
    /// is exceeded without the running standard deviation settling.
    fn count_acts_per_ref_attempt(
        &self,
        timer: &dyn MemoryTupleTimer,
        a: AggressorPtr,
        b: AggressorPtr,
    ) -> Option<u64> {
        let mut acts: Vec<u64> = Vec::new();
        let mut running_sum: u64 = 0;
        let mut activation_count: u64 = 0;
        let mut activation_count_old: u64 = 0;

        let mut i: u64 = 0;
        loop {
            let latency = unsafe { timer.time_single_access(a, b) };
            activation_count += 2;

            if latency > REFRESH_LATENCY_THRESHOLD {
                if i > SKIP_FIRST_N as u64 && activation_count_old != 0 {
                    let value = (activation_count - activation_count_old) * 2;
                    acts.push(value);
                    running_sum += value;

                    if acts.len() % STD_CHECK_INTERVAL == 0
                        && compute_std(&acts, running_sum) < STD_TARGET
                    {
                        let activations = running_sum / acts.len() as u64;
                        info!(
                            "determined acts-per-refresh after {} rounds",
                            acts.len()
                        );
                        return Some(activations);
                    }
                }
                activation_count_old = activation_count;
            }

            i += 1;
            if i >= MAX_ROUNDS_PER_ATTEMPT {
                return None;
            }
        }
    }
}

/// Standard deviation of `values` around their mean, counting only samples
/// at or above the mean -- matches the reference's asymmetric variance
/// exactly rather than a textbook two-sided computation.
fn compute_std(values: &[u64], running_sum: u64) -> f64 {
    let n = values.len() as f64;
    let mean = running_sum as f64 / n;
    let var: f64 = values
        .iter()
        .filter(|&&v| v as f64 >= mean)
        .map(|&v| (v as f64 - mean).powi(2))
        .sum();
    (var / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_std_is_zero_for_constant_samples() {
        let values = vec![10u64; 300];
        let sum: u64 = values.iter().sum();
        assert_eq!(compute_std(&values, sum), 0.0);
    }

    #[test]
    fn compute_std_ignores_below_mean_samples() {
        // Half well below the mean, half exactly at it: only the at-mean
        // half contributes to the variance sum, matching the reference.
        let mut values = vec![0u64; 100];
        values.extend(vec![10u64; 100]);
        let sum: u64 = values.iter().sum();
        let std = compute_std(&values, sum);
        assert!(std > 0.0);
    }

    struct FixedTimer(u64);

    impl MemoryTupleTimer for FixedTimer {
        unsafe fn time_subsequent_access_from_ram(
            &self,
            _a: *const u8,
            _b: *const u8,
            _rounds: usize,
        ) -> u64 {
            self.0
        }

        unsafe fn time_single_access(&self, _a: *const u8, _b: *const u8) -> u64 {
            self.0
        }
    }

    #[test]
    fn measure_access_delegates_to_timer() {
        let config = BlacksmithConfig {
            name: "test".into(),
            channels: 1,
            dimms: 1,
            ranks: 1,
            total_banks: 1,
            max_rows: 1,
            threshold: 1,
            hammer_rounds: 1,
            drama_rounds: 1,
            memory_size: 1,
            acts_per_trefi: None,
            row_bits: vec![crate::blacksmith_config::BitDef::Single(0)],
            col_bits: vec![],
            bank_bits: vec![crate::blacksmith_config::BitDef::Single(1)],
        };
        let analyzer = DramAnalyzer::new(&config, std::ptr::null());
        let timer = FixedTimer(500);
        let latency =
            unsafe { analyzer.measure_access(&timer, std::ptr::null(), std::ptr::null(), 10) };
        assert_eq!(latency, 500);
    }
}
