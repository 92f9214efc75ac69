use log::{info, warn};

use crate::coherence::bus::Bus;
use crate::coherence::cache::Cache;
use crate::coherence::{verify_coherence, CoherenceViolation, Cycle};
use crate::sim::config::SystemConfig;
use crate::sim::core::Core;
use crate::sim::trace::TraceReader;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every core drained its trace.
    Completed { cycles: Cycle },
    /// The cycle ceiling was reached first. Statistics are still valid
    /// for whatever executed.
    TimedOut { cycles: Cycle },
}

impl RunOutcome {
    pub fn cycles(&self) -> Cycle {
        match *self {
            RunOutcome::Completed { cycles } | RunOutcome::TimedOut { cycles } => cycles,
        }
    }
}

/// The whole simulated machine: cores, their private caches, and the
/// shared bus, advanced one global cycle at a time.
pub struct SnoopsimTop {
    config: SystemConfig,
    cores: Vec<Core>,
    caches: Vec<Cache>,
    bus: Bus,
    cycle: Cycle,
    complete: bool,
}

impl SnoopsimTop {
    /// Builds the machine from per-core trace streams. `traces` must hold
    /// one reader per configured core.
    pub fn new(config: SystemConfig, traces: Vec<TraceReader>) -> Self {
        assert_eq!(
            traces.len(),
            config.sim.num_cores,
            "one trace stream per core"
        );
        let caches = (0..config.sim.num_cores)
            .map(|core_id| Cache::new(core_id, &config))
            .collect();
        let cores = traces
            .into_iter()
            .enumerate()
            .map(|(core_id, trace)| Core::new(core_id, trace))
            .collect();
        let bus = Bus::new(
            config.timing.mem_latency,
            config.geometry.block_bytes() as u64,
        );
        Self {
            config,
            cores,
            caches,
            bus,
            cycle: 0,
            complete: false,
        }
    }

    /// Builds the machine by opening `<prefix>_proc<id>.trace` per core.
    pub fn from_trace_prefix(config: SystemConfig, prefix: &str) -> Self {
        let traces = (0..config.sim.num_cores)
            .map(|core_id| TraceReader::open(prefix, core_id))
            .collect();
        Self::new(config, traces)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn current_cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Longest per-core wall time: execution plus idle cycles, maximised
    /// over cores.
    pub fn max_execution_time(&self) -> Cycle {
        self.cores
            .iter()
            .map(|core| core.total_cycles() + core.idle_cycles())
            .max()
            .unwrap_or(0)
    }

    /// Advances the machine one cycle: bus first, then every unfinished
    /// core in ascending id order, then the deadlock check.
    pub fn tick_one(&mut self) {
        self.cycle += 1;
        self.bus.tick(&mut self.caches);
        for i in 0..self.cores.len() {
            if self.cores[i].is_trace_complete() {
                continue;
            }
            self.cores[i].execute_cycle(&mut self.caches, &mut self.bus);
        }
        self.complete = self.cores.iter().all(Core::is_trace_complete);
        if !self.complete {
            self.check_for_deadlock();
        }
    }

    pub fn run_cycles(&mut self, n: Cycle) {
        for _ in 0..n {
            if self.complete || self.cycle >= self.config.sim.timeout {
                break;
            }
            self.tick_one();
        }
    }

    pub fn run_to_completion(&mut self) -> RunOutcome {
        info!(
            "starting simulation: {} cores, {} sets, {}-way, {}-byte blocks",
            self.config.sim.num_cores,
            self.config.geometry.num_sets(),
            self.config.geometry.associativity,
            self.config.geometry.block_bytes()
        );
        while !self.complete && self.cycle < self.config.sim.timeout {
            self.run_cycles(1);
        }
        if self.complete {
            info!("simulation complete after {} cycles", self.cycle);
            RunOutcome::Completed { cycles: self.cycle }
        } else {
            warn!("simulation timed out after {} cycles", self.cycle);
            RunOutcome::TimedOut { cycles: self.cycle }
        }
    }

    /// Audits the caches against the protocol invariants.
    pub fn verify_coherence(&self) -> Result<(), CoherenceViolation> {
        verify_coherence(&self.caches)
    }

    /// Every unfinished core stuck on its cache while the bus sits idle
    /// with an empty queue means nobody can make progress. The recovery
    /// unblocks every cache and resets the bus; it is a diagnostic of
    /// last resort, not a normal path.
    fn check_for_deadlock(&mut self) {
        let mut any_blocked = false;
        for core in &self.cores {
            if core.is_trace_complete() {
                continue;
            }
            if core.is_blocked() {
                any_blocked = true;
            } else {
                return;
            }
        }
        if !any_blocked || self.bus.is_busy() || self.bus.pending_len() > 0 {
            return;
        }
        warn!(
            "deadlock detected at cycle {}; unblocking all caches and resetting the bus",
            self.cycle
        );
        for cache in &mut self.caches {
            cache.force_unblock();
        }
        self.bus.reset();
    }
}
