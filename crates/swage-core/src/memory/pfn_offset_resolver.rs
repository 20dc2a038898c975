//! Determines, for a memory block whose physical layout is not known
//! directly (no root, or a deliberately mocked timer), the row-granular
//! shift between the block's own virtual addressing and the row at which
//! the DRAM bank function actually evaluates.
//!
//! A block allocated at a fixed virtual address is not necessarily *placed*
//! physically such that `block.addr(0)` behaves, under the configured bank
//! function, like row 0 of the DRAM address space: the block's physical
//! frame can start at an arbitrary row boundary. [`PfnOffsetResolver`]
//! recovers that offset purely from bank-conflict timing -- the same
//! technique SPOILER/THP use to validate block placement -- by testing
//! candidate shifts against the configured address matrices and keeping the
//! one the timing oracle agrees with.

use crate::memory::keyed_cache::KeyedCache;
use crate::memory::mem_configuration::MemConfiguration;
use crate::memory::pfn_offset::CachedPfnOffset;
use crate::memory::timer::MemoryTupleTimer;
use crate::memory::{BytePointer, DRAMAddr};
use crate::util::{ROW_SIZE, TIMER_ROUNDS};

/// Row deltas tested against each offset candidate. A handful of distinct,
/// small multiples of the row size is enough to disambiguate every
/// candidate within one [`MemConfiguration::bank_function_period`], since
/// the bank function is a fixed linear (XOR) function of the address bits.
const TEST_DELTAS: [usize; 4] = [1, 2, 3, 5];

/// Resolves the PFN row offset of a memory block.
pub trait PfnOffsetResolver {
    /// Returns the row offset between this block's virtual row 0 and the
    /// row at which the DRAM bank function actually evaluates, or `None` if
    /// no offset within one bank-function period is consistent with the
    /// timing oracle (e.g. the block isn't physically contiguous across the
    /// range needed).
    ///
    /// `hint`, if given, is returned immediately without re-measuring --
    /// callers that already know the offset (e.g. from a prior search
    /// against the same block) can skip the search entirely.
    fn pfn_offset(
        &self,
        mem_config: &MemConfiguration,
        threshold: u64,
        timer: &dyn MemoryTupleTimer,
        hint: Option<usize>,
    ) -> Option<usize>;
}

impl<T> PfnOffsetResolver for T
where
    T: BytePointer + CachedPfnOffset,
{
    fn pfn_offset(
        &self,
        mem_config: &MemConfiguration,
        threshold: u64,
        timer: &dyn MemoryTupleTimer,
        hint: Option<usize>,
    ) -> Option<usize> {
        let key = (*mem_config, threshold);
        if let Some(cached) = self.get_cached(key) {
            return Some(cached);
        }

        let result = hint.or_else(|| search_pfn_offset(self, mem_config, threshold, timer));
        self.put(result, key)
    }
}

fn search_pfn_offset<T: BytePointer>(
    block: &T,
    mem_config: &MemConfiguration,
    threshold: u64,
    timer: &dyn MemoryTupleTimer,
) -> Option<usize> {
    let period = mem_config.bank_function_period() as usize;
    let max_delta = *TEST_DELTAS.iter().max().unwrap_or(&0);
    if (period + max_delta) * ROW_SIZE > block.len() {
        return None;
    }

    // measured[k] = true if block.addr(0) and block.addr(k * ROW_SIZE)
    // conflict (same bank) according to the real timing oracle.
    let measured: Vec<bool> = TEST_DELTAS
        .iter()
        .map(|&k| {
            let a = block.addr(0);
            let b = block.addr(k * ROW_SIZE);
            let latency = unsafe { timer.time_subsequent_access_from_ram(a, b, TIMER_ROUNDS) };
            latency > threshold
        })
        .collect();

    (0..period).find(|&offset| {
        TEST_DELTAS.iter().zip(&measured).all(|(&k, &same_bank)| {
            let a = DRAMAddr::from_virt(block.addr(offset * ROW_SIZE), mem_config);
            let b = DRAMAddr::from_virt(block.addr((offset + k) * ROW_SIZE), mem_config);
            (a.bank == b.bank) == same_bank
        })
    })
}
