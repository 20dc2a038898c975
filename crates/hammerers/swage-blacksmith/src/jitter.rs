//! JIT assembler for hammering patterns.
//!
//! Builds one straight-line, branch-light x86_64 function per hammer
//! invocation: synchronize with the start of a refresh interval, access
//! every mapped aggressor address once per pass according to the
//! configured flush/fence strategy, optionally re-synchronize mid-pattern,
//! then synchronize with the end of an interval and return the total
//! number of activations spent synchronizing. A dispatch loop would add
//! per-access latency variance that perturbs the very timing this code is
//! trying to control, so the pattern is emitted as machine code once and
//! called directly rather than interpreted.

use std::collections::HashMap;
use std::fmt;

use iced_x86::code_asm::*;
use serde::{Deserialize, Serialize};
use swage_core::memory::AggressorPtr;
use thiserror::Error;

/// When to flush an aggressor's cache line relative to accessing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlushingStrategy {
    /// Flush immediately after the access that needs it.
    EarliestPossible,
    /// Flush only just before the address is accessed again.
    LatestPossible,
}

impl Default for FlushingStrategy {
    fn default() -> Self {
        FlushingStrategy::EarliestPossible
    }
}

/// When to emit an `mfence` relative to a flushed access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FencingStrategy {
    /// Never emit a fence between accesses.
    OmitFencing,
    /// Fence right after the access that needed it.
    EarliestPossible,
    /// Fence right before the next access of an address flushed since.
    LatestPossible,
}

impl Default for FencingStrategy {
    fn default() -> Self {
        FencingStrategy::LatestPossible
    }
}

/// Errors that can occur while JIT-assembling a hammering pattern.
#[derive(Debug, Error)]
pub enum JitError {
    /// Fewer aggressor addresses were supplied than are needed for the
    /// leading and trailing refresh-synchronization sequences.
    #[error(
        "not enough aggressor addresses ({have}) for {need} sync accesses at both ends of the pattern"
    )]
    NotEnoughAggressorsForSync {
        /// Number of aggressor addresses supplied.
        have: usize,
        /// Number of addresses required (`2 * num_aggressors_for_sync`).
        need: usize,
    },
    /// The x86 assembler rejected an instruction or label reference.
    #[error(transparent)]
    Encode(#[from] iced_x86::IcedError),
    /// Allocating or protecting the executable code page failed.
    #[error(transparent)]
    Mmap(#[from] std::io::Error),
}

/// A JIT-compiled, directly callable hammering routine.
///
/// Calling it runs the whole synchronized hammer pass once and returns the
/// number of activations spent in the leading/trailing/mid-pattern
/// refresh-synchronization loops (useful for estimating how many real
/// refreshes were observed during the run).
pub struct Program {
    code: memmap2::Mmap,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("code_len", &self.code.len())
            .finish()
    }
}

impl Program {
    /// Executes the JIT-compiled routine.
    ///
    /// # Safety
    ///
    /// The caller must ensure every aggressor address baked into the
    /// program is still valid for reads; the program dereferences them
    /// directly with no bounds checking.
    pub unsafe fn call(&self) -> u32 {
        let entry: extern "C" fn() -> u32 = unsafe { std::mem::transmute(self.code.as_ptr()) };
        entry()
    }

    /// Writes the raw machine code to disk, for offline disassembly.
    pub fn write(&self, path: &str) -> std::io::Result<()> {
        std::fs::write(path, &self.code[..])
    }
}

/// Builds a [`Program`] for a sequence of mapped aggressor addresses.
pub trait Jitter {
    /// Assembles and maps the hammering routine.
    ///
    /// `acts_per_trefi` is used only when `sync_each_ref` is set, to decide
    /// how often to re-synchronize mid-pattern. `aggressor_addrs` is the
    /// full mapped access stream, sync addresses included at both ends.
    /// `log_cb` is called once per emitted access/flush, for tracing which
    /// physical addresses ended up in the generated program; it is never
    /// called from the JIT-compiled code itself.
    fn jit(
        &self,
        acts_per_trefi: u64,
        aggressor_addrs: &[AggressorPtr],
        log_cb: &dyn Fn(&str, AggressorPtr),
    ) -> Result<Program, JitError>;
}

/// Configuration for and entry point into the hammering-pattern JIT.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CodeJitter {
    /// Re-synchronize with the refresh interval after every `acts_per_trefi`
    /// activations, rather than only at the start and end of the pattern.
    #[serde(default)]
    pub sync_each_ref: bool,
    /// When to flush a just-accessed aggressor's cache line.
    #[serde(default)]
    pub flushing_strategy: FlushingStrategy,
    /// When to fence after a flush.
    #[serde(default)]
    pub fencing_strategy: FencingStrategy,
    /// Total number of activations to hammer for.
    #[serde(default = "default_total_activations")]
    pub total_activations: u64,
    /// Number of aggressors, from each end of the access stream, used to
    /// detect the boundary of a refresh interval.
    #[serde(default = "default_num_aggressors_for_sync")]
    pub num_aggressors_for_sync: usize,
}

fn default_total_activations() -> u64 {
    5_000_000
}

fn default_num_aggressors_for_sync() -> usize {
    2
}

impl Default for CodeJitter {
    fn default() -> Self {
        CodeJitter {
            sync_each_ref: false,
            flushing_strategy: FlushingStrategy::default(),
            fencing_strategy: FencingStrategy::default(),
            total_activations: default_total_activations(),
            num_aggressors_for_sync: default_num_aggressors_for_sync(),
        }
    }
}

/// Emits a refresh-boundary sync loop over `addrs`: flush+access each
/// address once per iteration, counting iterations in `edx`, until the gap
/// between two serialized timestamps exceeds 1000 cycles.
fn emit_sync_ref(a: &mut CodeAssembler, addrs: &[AggressorPtr]) -> Result<(), JitError> {
    let mut begin = a.create_label();
    let mut end = a.create_label();

    a.set_label(&mut begin)?;
    a.mfence()?;
    a.lfence()?;
    a.push(rdx)?;
    a.rdtscp()?;
    a.mov(ebx, eax)?;
    a.lfence()?;
    a.pop(rdx)?;

    for &addr in addrs {
        a.mov(rax, addr as u64)?;
        a.clflushopt(qword_ptr(rax))?;
        a.mov(rax, addr as u64)?;
        a.mov(rcx, qword_ptr(rax))?;
        a.inc(edx)?;
    }

    a.push(rdx)?;
    a.rdtscp()?;
    a.lfence()?;
    a.pop(rdx)?;
    a.sub(eax, ebx)?;
    a.cmp(eax, 1000i32)?;
    a.jg(end)?;
    a.jmp(begin)?;
    a.set_label(&mut end)?;
    Ok(())
}

impl Jitter for CodeJitter {
    fn jit(
        &self,
        acts_per_trefi: u64,
        aggressor_addrs: &[AggressorPtr],
        log_cb: &dyn Fn(&str, AggressorPtr),
    ) -> Result<Program, JitError> {
        let sync_n = self.num_aggressors_for_sync;
        if aggressor_addrs.len() < 2 * sync_n {
            return Err(JitError::NotEnoughAggressorsForSync {
                have: aggressor_addrs.len(),
                need: 2 * sync_n,
            });
        }

        let head = &aggressor_addrs[..sync_n];
        let tail = &aggressor_addrs[aggressor_addrs.len() - sync_n..];
        let body = &aggressor_addrs[sync_n..aggressor_addrs.len() - sync_n];

        let mut a = CodeAssembler::new(64)?;
        let mut while1_begin = a.create_label();
        let mut while1_end = a.create_label();
        let mut for_begin = a.create_label();
        let mut for_end = a.create_label();

        // --- warmup ---
        for &addr in head {
            a.mov(rax, addr as u64)?;
            a.mov(rbx, qword_ptr(rax))?;
        }

        // --- sync with the beginning of a refresh interval ---
        a.set_label(&mut while1_begin)?;
        for &addr in head {
            a.mov(rax, addr as u64)?;
            a.clflushopt(qword_ptr(rax))?;
            log_cb("sync-flush", addr);
        }
        a.mfence()?;
        a.rdtscp()?;
        a.lfence()?;
        a.mov(ebx, eax)?;
        for &addr in head {
            a.mov(rax, addr as u64)?;
            a.mov(rcx, qword_ptr(rax))?;
            log_cb("sync-read", addr);
        }
        a.rdtscp()?;
        a.sub(eax, ebx)?;
        a.cmp(eax, 1000i32)?;
        a.jg(while1_end)?;
        a.jmp(while1_begin)?;
        a.set_label(&mut while1_end)?;

        // --- hammer body ---
        a.mov(rsi, self.total_activations as i64)?;
        a.mov(edx, 0i32)?;
        a.set_label(&mut for_begin)?;
        a.cmp(rsi, 0i32)?;
        a.jle(for_end)?;

        let mut accessed_before: HashMap<usize, bool> = HashMap::new();
        let mut cnt_total_activations: u64 = 0;

        for (i, &addr) in body.iter().enumerate() {
            let key = addr as usize;
            if *accessed_before.get(&key).unwrap_or(&false) {
                if self.flushing_strategy == FlushingStrategy::LatestPossible {
                    a.mov(rax, addr as u64)?;
                    a.clflushopt(qword_ptr(rax))?;
                    log_cb("flush", addr);
                    accessed_before.insert(key, false);
                }
                if self.fencing_strategy == FencingStrategy::LatestPossible {
                    a.mfence()?;
                    accessed_before.insert(key, false);
                }
            }

            a.mov(rax, addr as u64)?;
            a.mov(rcx, qword_ptr(rax))?;
            log_cb("hammer", addr);
            accessed_before.insert(key, true);
            a.dec(rsi)?;
            cnt_total_activations += 1;

            if self.flushing_strategy == FlushingStrategy::EarliestPossible {
                a.mov(rax, addr as u64)?;
                a.clflushopt(qword_ptr(rax))?;
                log_cb("flush", addr);
            }
            if self.fencing_strategy == FencingStrategy::EarliestPossible {
                a.mfence()?;
            }

            if self.sync_each_ref && acts_per_trefi > 0 && cnt_total_activations % acts_per_trefi == 0
            {
                let end = (i + 1 + sync_n).min(body.len());
                emit_sync_ref(&mut a, &body[i + 1..end])?;
            }
        }

        a.mfence()?;
        emit_sync_ref(&mut a, tail)?;

        a.jmp(for_begin)?;
        a.set_label(&mut for_end)?;
        a.mov(eax, edx)?;
        a.ret()?;

        let bytes = a.assemble(0x1000)?;

        let mut mmap = memmap2::MmapMut::map_anon(bytes.len())?;
        mmap[..bytes.len()].copy_from_slice(&bytes);
        let code = mmap.make_exec()?;

        Ok(Program { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_few_sync_addresses() {
        let jitter = CodeJitter {
            num_aggressors_for_sync: 4,
            ..Default::default()
        };
        let addrs = vec![0x1000 as AggressorPtr; 3];
        let err = jitter.jit(10, &addrs, &|_, _| {}).unwrap_err();
        assert!(matches!(err, JitError::NotEnoughAggressorsForSync { .. }));
    }

    #[test]
    fn default_matches_reference_blacksmith_config() {
        let jitter = CodeJitter::default();
        assert_eq!(jitter.flushing_strategy, FlushingStrategy::EarliestPossible);
        assert_eq!(jitter.fencing_strategy, FencingStrategy::LatestPossible);
        assert_eq!(jitter.total_activations, 5_000_000);
        assert_eq!(jitter.num_aggressors_for_sync, 2);
    }
}
