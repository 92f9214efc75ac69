use std::io::{self, Write};

use serde::Serialize;

use crate::coherence::{CacheStats, Cycle};
use crate::sim::top::SnoopsimTop;

/// Writes the plain-text run report with its stable field names.
pub fn write_report<W: Write>(out: &mut W, top: &SnoopsimTop, trace_prefix: &str) -> io::Result<()> {
    let geometry = &top.config().geometry;
    let cache_kb = geometry.cache_bytes() as f64 / 1024.0;

    writeln!(out, "Simulation Parameters:")?;
    writeln!(out, "Trace Prefix: {trace_prefix}")?;
    writeln!(out, "Set Index Bits: {}", geometry.set_index_bits)?;
    writeln!(out, "Associativity: {}", geometry.associativity)?;
    writeln!(out, "Block Bits: {}", geometry.block_offset_bits)?;
    writeln!(out, "Block Size (Bytes): {}", geometry.block_bytes())?;
    writeln!(out, "Number of Sets: {}", geometry.num_sets())?;
    writeln!(out, "Cache Size (KB per core): {cache_kb:.2}")?;
    writeln!(out, "MESI Protocol: Enabled")?;
    writeln!(out, "Write Policy: Write-back, Write-allocate")?;
    writeln!(out, "Replacement Policy: LRU")?;
    writeln!(out, "Bus: Central snooping bus")?;
    writeln!(out)?;

    writeln!(out, "Overall Summary:")?;
    writeln!(
        out,
        "Maximum Execution Time (cycles): {}",
        top.max_execution_time()
    )?;
    writeln!(out)?;

    for (core, cache) in top.cores().iter().zip(top.caches()) {
        let stats = cache.stats();
        writeln!(out, "Core {} Statistics:", core.core_id())?;
        writeln!(out, "Total Instructions: {}", core.total_instructions())?;
        writeln!(out, "Total Reads: {}", core.read_instructions())?;
        writeln!(out, "Total Writes: {}", core.write_instructions())?;
        writeln!(out, "Execution Cycles: {}", core.total_cycles())?;
        writeln!(out, "Idle Cycles: {}", core.idle_cycles())?;
        writeln!(out, "Cache Misses: {}", stats.misses())?;
        writeln!(out, "Cache Miss Rate: {:.2}%", stats.miss_rate())?;
        writeln!(out, "Cache Evictions: {}", stats.evictions())?;
        writeln!(out, "Writebacks: {}", stats.writebacks())?;
        writeln!(out, "Bus Invalidations: {}", stats.invalidations())?;
        writeln!(out, "Data Traffic (Bytes): {}", stats.traffic_bytes())?;
        writeln!(out)?;
    }

    let bus = top.bus().stats();
    writeln!(out, "Overall Bus Summary:")?;
    writeln!(out, "Total Bus Transactions: {}", bus.transactions())?;
    writeln!(out, "Total Bus Traffic (Bytes): {}", bus.traffic_bytes())?;
    Ok(())
}

/// Machine-readable counterpart of the text report.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub trace_prefix: String,
    pub set_index_bits: u32,
    pub associativity: usize,
    pub block_offset_bits: u32,
    pub max_execution_time: Cycle,
    pub cores: Vec<CoreSummary>,
    pub bus: BusSummary,
}

#[derive(Debug, Serialize)]
pub struct CoreSummary {
    pub core_id: usize,
    pub total_instructions: u64,
    pub read_instructions: u64,
    pub write_instructions: u64,
    pub execution_cycles: Cycle,
    pub idle_cycles: Cycle,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct BusSummary {
    pub transactions: u64,
    pub reads: u64,
    pub read_xs: u64,
    pub upgrades: u64,
    pub flushes: u64,
    pub traffic_bytes: u64,
}

pub fn run_summary(top: &SnoopsimTop, trace_prefix: &str) -> RunSummary {
    let geometry = &top.config().geometry;
    let bus = top.bus().stats();
    RunSummary {
        trace_prefix: trace_prefix.to_string(),
        set_index_bits: geometry.set_index_bits,
        associativity: geometry.associativity,
        block_offset_bits: geometry.block_offset_bits,
        max_execution_time: top.max_execution_time(),
        cores: top
            .cores()
            .iter()
            .zip(top.caches())
            .map(|(core, cache)| CoreSummary {
                core_id: core.core_id(),
                total_instructions: core.total_instructions(),
                read_instructions: core.read_instructions(),
                write_instructions: core.write_instructions(),
                execution_cycles: core.total_cycles(),
                idle_cycles: core.idle_cycles(),
                cache: *cache.stats(),
            })
            .collect(),
        bus: BusSummary {
            transactions: bus.transactions(),
            reads: bus.reads(),
            read_xs: bus.read_xs(),
            upgrades: bus.upgrades(),
            flushes: bus.flushes(),
            traffic_bytes: bus.traffic_bytes(),
        },
    }
}
