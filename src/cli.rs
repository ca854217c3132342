//! Command-line surface.
//!
//! Grounded on `simulator.py`'s `argparse` setup (protocol/input/cache
//! geometry flags) and, for the `clap` derive style itself, on
//! `willmccallion-rvsim`'s CLI crate.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "cachesim",
    author,
    version,
    about = "Cycle-driven simulator of shared-bus multiprocessor cache coherence"
)]
pub struct Args {
    /// Coherence protocol to simulate: msi, mesi, or dragon.
    pub protocol: String,

    /// Path prefix for per-core trace files, e.g. `traces/bodytrack` for
    /// `traces/bodytrack_0.data`, `traces/bodytrack_1.data`, ...
    pub trace_prefix: PathBuf,

    /// Total cache size in bytes, per core.
    #[arg(default_value_t = 4096)]
    pub cache_size: u64,

    /// Cache associativity.
    #[arg(default_value_t = 2)]
    pub assoc: u64,

    /// Block size in bytes.
    #[arg(default_value_t = 32)]
    pub block_size: u64,

    /// Where to append the per-run CSV result row(s).
    #[arg(short, long, default_value = "results.csv")]
    pub output: PathBuf,
}
