//! Row-conflict timing oracle.
//!
//! DRAM accesses that hit an already-open row are fast; accesses that force
//! a row conflict (same bank, different row) are measurably slower. Every
//! component that needs to tell bank-same from bank-different addresses
//! apart -- the DRAM analyzer, the PFN offset search, the SPOILER/THP
//! allocators -- goes through this one oracle so the measurement itself
//! (flush, fence, serialized timestamp) is implemented exactly once.

use std::arch::asm;
use std::arch::x86_64::{__rdtscp, _mm_lfence, _mm_mfence};

use thiserror::Error;

/// Errors that can occur while constructing a [`MemoryTupleTimer`].
#[derive(Debug, Error)]
pub enum TimerError {
    /// The host CPU does not support `RDTSCP` (checked via `/proc/cpuinfo`).
    #[error("CPU does not support RDTSCP")]
    RdtscpUnsupported,
    /// Reading `/proc/cpuinfo` to check for `RDTSCP` support failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Measures the round-trip latency of repeatedly accessing two addresses.
///
/// A higher reported latency means the two addresses conflict, i.e. they sit
/// in the same DRAM bank but a different row. Implementations must flush
/// both addresses from the cache before each access so the measurement
/// reflects actual DRAM latency rather than a cache hit.
pub trait MemoryTupleTimer {
    /// Times `rounds` repetitions of `{flush a; flush b; fence; read a; read b}`
    /// and returns the mean cycle count.
    ///
    /// # Safety
    ///
    /// `a` and `b` must be valid for reads for as long as this call runs.
    unsafe fn time_subsequent_access_from_ram(&self, a: *const u8, b: *const u8, rounds: usize)
    -> u64;

    /// Times a single `{flush a; flush b; fence; read a; read b}` round and
    /// returns its cycle count.
    ///
    /// Unlike [`Self::time_subsequent_access_from_ram`], this does not
    /// average over several rounds: refresh-interval boundary detection
    /// needs the individual spike, not a smoothed mean.
    ///
    /// # Safety
    ///
    /// `a` and `b` must be valid for reads for as long as this call runs.
    unsafe fn time_single_access(&self, a: *const u8, b: *const u8) -> u64;
}

/// `RDTSCP`-based implementation of [`MemoryTupleTimer`] for x86_64.
struct RdtscpTimer;

/// Flushes a single cache line at `addr` using the non-serializing
/// `CLFLUSHOPT` instruction. There is no stable `core::arch` intrinsic for
/// it, so it is emitted as inline assembly, matching how the rest of this
/// crate reaches for `clflushopt` (e.g. the hammer engine's flush loop).
#[inline(always)]
unsafe fn clflushopt(addr: *const u8) {
    unsafe {
        asm!("clflushopt [{}]", in(reg) addr, options(nostack, preserves_flags));
    }
}

impl MemoryTupleTimer for RdtscpTimer {
    unsafe fn time_subsequent_access_from_ram(
        &self,
        a: *const u8,
        b: *const u8,
        rounds: usize,
    ) -> u64 {
        let mut total: u64 = 0;
        let mut aux: u32 = 0;
        for _ in 0..rounds {
            unsafe {
                clflushopt(a);
                clflushopt(b);
                _mm_mfence();

                let before = __rdtscp(&mut aux);
                _mm_lfence();

                std::ptr::read_volatile(a);
                std::ptr::read_volatile(b);

                let after = __rdtscp(&mut aux);
                total += after.saturating_sub(before);
            }
        }
        total / rounds as u64
    }

    unsafe fn time_single_access(&self, a: *const u8, b: *const u8) -> u64 {
        let mut aux: u32 = 0;
        unsafe {
            clflushopt(a);
            clflushopt(b);
            _mm_mfence();

            let before = __rdtscp(&mut aux);
            _mm_lfence();

            std::ptr::read_volatile(a);
            std::ptr::read_volatile(b);

            let after = __rdtscp(&mut aux);
            after.saturating_sub(before)
        }
    }
}

/// Checks `/proc/cpuinfo` for the `rdtscp` CPU flag.
fn cpu_supports_rdtscp() -> Result<bool, std::io::Error> {
    let info = std::fs::read_to_string("/proc/cpuinfo")?;
    Ok(info
        .lines()
        .filter(|line| line.starts_with("flags"))
        .any(|line| line.split_whitespace().any(|flag| flag == "rdtscp")))
}

/// Constructs the platform's [`MemoryTupleTimer`].
///
/// # Errors
///
/// Returns [`TimerError::RdtscpUnsupported`] if the host CPU lacks `RDTSCP`,
/// or an I/O error if `/proc/cpuinfo` cannot be read.
pub fn construct_memory_tuple_timer() -> Result<Box<dyn MemoryTupleTimer>, TimerError> {
    if !cpu_supports_rdtscp()? {
        return Err(TimerError::RdtscpUnsupported);
    }
    Ok(Box::new(RdtscpTimer))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn mock_timer_reports_fixed_latency() {
        let timer = FixedTimer(1234);
        let latency = unsafe { timer.time_subsequent_access_from_ram(std::ptr::null(), std::ptr::null(), 10) };
        assert_eq!(latency, 1234);
    }
}
