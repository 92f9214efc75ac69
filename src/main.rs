use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use snoopsim::sim::config::SystemConfig;
use snoopsim::sim::report::{run_summary, write_report};
use snoopsim::sim::top::{RunOutcome, SnoopsimTop};

/// Cycle-accurate trace-driven simulator for MESI coherence over a
/// snooping bus.
#[derive(Parser)]
#[command(version, about)]
struct SnoopsimArgs {
    /// Trace prefix; core i reads <prefix>_proc<i>.trace
    #[arg(short = 't', long = "trace-prefix")]
    trace_prefix: Option<String>,

    /// Number of set index bits (sets per cache = 2^s)
    #[arg(short = 's', long)]
    set_index_bits: Option<u32>,

    /// Associativity (lines per set)
    #[arg(short = 'E', long)]
    associativity: Option<usize>,

    /// Number of block offset bits (block size = 2^b bytes)
    #[arg(short = 'b', long)]
    block_offset_bits: Option<u32>,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Write a JSON summary alongside the report
    #[arg(long)]
    json: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    num_cores: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    // Surface every CLI error (missing value, unknown flag, bad number)
    // with exit code 1; clap's default exit code differs. Help and
    // version requests still exit 0.
    let argv = match SnoopsimArgs::try_parse() {
        Ok(argv) => argv,
        Err(err) => {
            err.print()?;
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let mut config = match &argv.config {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };
    if let Some(s) = argv.set_index_bits {
        config.geometry.set_index_bits = s;
    }
    if let Some(assoc) = argv.associativity {
        config.geometry.associativity = assoc;
    }
    if let Some(b) = argv.block_offset_bits {
        config.geometry.block_offset_bits = b;
    }
    if let Some(n) = argv.num_cores {
        config.sim.num_cores = n;
    }
    config.validate()?;

    let trace_prefix = match argv.trace_prefix {
        Some(prefix) if !prefix.is_empty() => prefix,
        _ => bail!("trace file prefix (-t) is required"),
    };

    let mut top = SnoopsimTop::from_trace_prefix(config, &trace_prefix);
    let outcome = top.run_to_completion();
    if let RunOutcome::TimedOut { cycles } = outcome {
        eprintln!("Simulation timed out after {cycles} cycles.");
    }

    match &argv.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot open output file {}", path.display()))?;
            let mut out = BufWriter::new(file);
            write_report(&mut out, &top, &trace_prefix)?;
            out.flush()?;
            println!("Output written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            write_report(&mut out, &top, &trace_prefix)?;
        }
    }

    if let Some(path) = &argv.json {
        let summary = run_summary(&top, &trace_prefix);
        let payload = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, payload)
            .with_context(|| format!("cannot write JSON summary {}", path.display()))?;
    }

    Ok(())
}
