//! Blacksmith frequency-domain Rowhammer fuzzer.
//!
//! Synthesizes and hammers patterns against a physically-contiguous memory
//! arena, archiving every pattern that produced bit flips, and optionally
//! replays a previously archived pattern instead of fuzzing fresh ones.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, atomic::AtomicBool};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

use swage_blacksmith::{
    BlacksmithConfig, DriverConfig, FromBlacksmithConfig, FuzzMetadata, HammeringPattern,
    SweepSummary, fuzz, replay,
};
use swage_core::allocator::ConsecAllocator;
use swage_core::memory::{MemConfiguration, construct_memory_tuple_timer};
use swage_core::util::{Size, spawn_page_locking_thread};

/// Command-line arguments for the `hammer` binary.
#[derive(Debug, Parser, Clone)]
#[command(about = "Frequency-domain Rowhammer fuzzer")]
struct CliArgs {
    /// Path to the memory-configuration JSON file.
    #[clap(long = "config", default_value = "config/bs-config.json")]
    config: String,
    /// Wall-clock budget for fuzzing, in seconds.
    #[clap(long = "runtime-limit", default_value = "120")]
    runtime_limit: u64,
    /// Override the measured activations-per-refresh-interval constant.
    #[clap(long = "acts-per-ref")]
    acts_per_ref: Option<u64>,
    /// Address mappings probed per synthesized pattern; defaults to banks/4.
    #[clap(long = "probes")]
    probes: Option<usize>,
    /// Sweep the best pattern over 256 MiB after fuzzing.
    #[clap(long = "sweeping")]
    sweeping: bool,
    /// Archive of previously discovered patterns to replay instead of fuzzing.
    #[clap(long = "load-json")]
    load_json: Option<String>,
    /// Comma-separated pattern ids to replay; requires `--load-json`.
    #[clap(long = "replay-patterns", value_delimiter = ',')]
    replay_patterns: Vec<String>,
    /// Allocation strategy backing the arena.
    #[clap(long = "alloc-strategy", default_value = "hugepage")]
    alloc_strategy: String,
    /// Victim-checking strategy. Only the arena self-check is wired up today.
    #[clap(long = "victim", default_value = "arena")]
    victim: String,
    /// Output file for the pattern archive (JSON).
    #[clap(long = "output", default_value = "config/fuzz-summary.json")]
    output: String,
    /// Output file for the sweep summary (JSON), when sweeping is enabled.
    #[clap(long = "sweep-output", default_value = "config/sweep-summary.json")]
    sweep_output: String,
    /// log2 of the physically-contiguous block size backing the arena.
    #[clap(long = "block-shift", default_value = "20")]
    block_shift: usize,
    /// Explicit fuzz mode. This is the default whenever `--load-json` is
    /// absent; the flag exists to make the choice visible on the command
    /// line, mirroring the reference tool's own mode switch.
    #[clap(long = "fuzzing")]
    fuzzing: bool,
    /// Write logs to this file instead of stderr.
    #[clap(long = "logfile")]
    logfile: Option<String>,
    /// Verbose logging (in addition to `RUST_LOG`).
    #[clap(long = "verbose", short = 'v')]
    verbose: bool,
}

/// Selects and runs one of §4.H's allocation strategies, sized to at least
/// one hugepage-sized arena (1 GiB minus one byte -- the hugepage allocator's
/// own size check requires a strict `<` against its 1 GiB block).
fn allocate_arena(
    strategy: &str,
    mem_config: MemConfiguration,
    bs_config: &BlacksmithConfig,
) -> Result<swage_core::memory::ConsecBlocks> {
    let size = Size::MB(1024 - 1);
    match strategy {
        "hugepage" => swage_hugepage::HugepageAllocator::default()
            .alloc_consec_blocks(size)
            .context("hugepage allocation failed"),
        "spoiler" => swage_spoiler::Spoiler::new(mem_config, bs_config.threshold.into(), None)
            .alloc_consec_blocks(size)
            .context("spoiler allocation failed"),
        "pfn" => swage_pfn::Pfn::new(mem_config, None.into())
            .alloc_consec_blocks(size)
            .context("pfn allocation failed"),
        "thp" => swage_thp::THP::new(bs_config.threshold, None)
            .alloc_consec_blocks(size)
            .context("THP allocation failed"),
        "coco" => swage_coco::CoCo {}
            .alloc_consec_blocks(size)
            .context("CoCo allocation failed"),
        other => bail!("unknown allocation strategy {other:?}"),
    }
}

/// Writes `value` as pretty JSON to `path`, creating or truncating the file.
fn write_json<T: serde::Serialize>(path: &str, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("wrote {path}");
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let _progress = swage_bin::init_logging_with_progress_to(args.logfile.as_deref())?;
    if args.verbose {
        info!("CLI args: {args:?}");
    }

    if args.fuzzing && args.load_json.is_some() {
        bail!("--fuzzing and --load-json are mutually exclusive");
    }

    let bs_config =
        BlacksmithConfig::from_jsonfile(&args.config).context("loading memory configuration")?;
    let mem_config = MemConfiguration::from_blacksmith(&bs_config);
    let num_banks = mem_config.get_bank_count();

    if args.victim != "arena" {
        bail!("--victim {:?}: only the arena self-check victim is supported", args.victim);
    }

    let arena = allocate_arena(&args.alloc_strategy, mem_config, &bs_config)?;

    let locker_blocks = Arc::new(Mutex::new(arena.blocks.clone()));
    let locker_stop = Arc::new(AtomicBool::new(false));
    let locker_mem_lock = Arc::new(Mutex::new(()));
    let locker = spawn_page_locking_thread(
        locker_blocks,
        locker_mem_lock,
        Arc::clone(&locker_stop),
    );
    let stop_locker = |stop: Arc<AtomicBool>, handle: std::thread::JoinHandle<()>| {
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        if handle.join().is_err() {
            warn!("page-locking thread panicked");
        }
    };

    if let Some(archive_path) = &args.load_json {
        if args.replay_patterns.is_empty() {
            bail!("--load-json requires at least one --replay-patterns id");
        }
        let mut patterns = HammeringPattern::load_patterns(archive_path)
            .context("loading pattern archive for replay")?;
        let seed: u64 = rand::random();

        let mut sweeps = Vec::new();
        for id in &args.replay_patterns {
            let Some(pattern) = patterns.iter_mut().find(|p| &p.id == id) else {
                warn!("replay: no pattern with id {id} in {archive_path}, skipping");
                continue;
            };
            if let Some(result) = replay(
                mem_config,
                &arena,
                args.block_shift,
                seed,
                pattern,
                args.sweeping,
            ) {
                sweeps.push(result);
            }
        }

        if args.sweeping && !sweeps.is_empty() {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let summary = SweepSummary {
                metadata: FuzzMetadata {
                    run_id: format!("replay-{seed:016x}"),
                    start_time: now,
                    end_time: now,
                    memory_config_name: bs_config.name.clone(),
                },
                sweeps,
            };
            write_json(&args.sweep_output, &summary)?;
        }

        stop_locker(locker_stop, locker);
        return Ok(());
    }

    let config = DriverConfig {
        runtime_limit: Duration::from_secs(args.runtime_limit),
        probes_per_pattern: args.probes.unwrap_or((num_banks / 4).max(1)),
        acts_per_trefi_override: args.acts_per_ref,
        sweeping: args.sweeping,
        block_shift: args.block_shift,
    };

    let timer = construct_memory_tuple_timer().context("constructing timing oracle")?;
    let (summary, sweep_summary) = fuzz(&config, &bs_config, mem_config, &arena, timer.as_ref());

    info!(
        "archived {} patterns with at least one bit flip",
        summary.hammering_patterns.len()
    );
    write_json(&args.output, &summary)?;
    if let Some(sweep_summary) = sweep_summary {
        write_json(&args.sweep_output, &sweep_summary)?;
    }

    stop_locker(locker_stop, locker);
    Ok(())
}
