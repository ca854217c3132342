//! Binary entry point: parses arguments, discovers trace files, dispatches to
//! the protocol-specific simulation, and writes results.
//!
//! Logging setup is grounded on `cachesim-ax-mesi/src/main.rs`'s
//! `env_logger::init_from_env` pattern.

use std::fs::File;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use env_logger::Env;
use log::info;

use cachesim::cli::Args;
use cachesim::commons::{Protocol, SystemSpec};
use cachesim::dragon::DragonController;
use cachesim::error::SimError;
use cachesim::mesi::MesiController;
use cachesim::msi::MsiController;
use cachesim::result::{CsvSink, ResultSink};
use cachesim::{simulator, trace};

fn main() -> ExitCode {
    let env = Env::default().filter_or("CACHESIM_LOG", "warn");
    env_logger::init_from_env(env);

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), SimError> {
    let args = Args::parse();
    let protocol = Protocol::from_str(&args.protocol).map_err(SimError::Config)?;

    let specs = std::rc::Rc::new(SystemSpec {
        protocol,
        cache_size: args.cache_size,
        block_size: args.block_size,
        assoc: args.assoc,
    });

    let traces = trace::discover_core_files(&args.trace_prefix)?;

    // Pre-flight: every discovered trace must at least be openable before
    // any simulation state is built. A malformed line inside a file that
    // does open is a per-core Trace fault (7.2); a file that can't be
    // opened at all is a Config fault that must abort the whole run before
    // producing any partial results (7.1).
    for (core, path) in &traces {
        File::open(path)
            .map_err(|e| SimError::Config(format!("cannot open trace for core {core} ('{}'): {e}", path.display())))?;
    }

    info!("running {protocol} over {} core(s)", traces.len());

    let (core_results, bus_result) = match protocol {
        Protocol::Msi => simulator::run::<MsiController>(specs.clone(), &traces)?,
        Protocol::Mesi => simulator::run::<MesiController>(specs.clone(), &traces)?,
        Protocol::Dragon => simulator::run::<DragonController>(specs.clone(), &traces)?,
    };

    let mut sink = CsvSink::new(args.output);
    sink.report(protocol, &core_results, &bus_result)?;

    Ok(())
}
