use std::collections::VecDeque;

use crate::coherence::bus::{Bus, PeerSplit};
use crate::coherence::cache::{AccessResponse, Cache};
use crate::coherence::Cycle;
use crate::sim::trace::{MemOp, MemRef, TraceReader};

/// How many references to pull from the trace up front.
const PREFETCH_INITIAL: usize = 10;
/// Keep at least this many references queued while the trace lasts.
const PREFETCH_TARGET: usize = 5;

/// The per-core reference generator: pulls memory references off a trace
/// and drives its cache one reference per unblocked cycle.
pub struct Core {
    core_id: usize,
    trace: TraceReader,
    queue: VecDeque<MemRef>,
    trace_complete: bool,
    blocked: bool,
    total_instructions: u64,
    read_instructions: u64,
    write_instructions: u64,
    total_cycles: Cycle,
    idle_cycles: Cycle,
}

impl Core {
    pub fn new(core_id: usize, mut trace: TraceReader) -> Self {
        let mut queue = VecDeque::new();
        for _ in 0..PREFETCH_INITIAL {
            match trace.next_ref() {
                Some(reference) => queue.push_back(reference),
                None => break,
            }
        }
        // A missing or empty trace leaves the core quiescent from cycle
        // one; it still snoops but never originates.
        let trace_complete = queue.is_empty() && trace.is_exhausted();
        Self {
            core_id,
            trace,
            queue,
            trace_complete,
            blocked: false,
            total_instructions: 0,
            read_instructions: 0,
            write_instructions: 0,
            total_cycles: 0,
            idle_cycles: 0,
        }
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn is_trace_complete(&self) -> bool {
        self.trace_complete
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn total_instructions(&self) -> u64 {
        self.total_instructions
    }

    pub fn read_instructions(&self) -> u64 {
        self.read_instructions
    }

    pub fn write_instructions(&self) -> u64 {
        self.write_instructions
    }

    pub fn total_cycles(&self) -> Cycle {
        self.total_cycles
    }

    pub fn idle_cycles(&self) -> Cycle {
        self.idle_cycles
    }

    /// One processor cycle: wait out a blocked cache, otherwise offer the
    /// next reference to it.
    pub fn execute_cycle(&mut self, caches: &mut [Cache], bus: &mut Bus) {
        self.total_cycles += 1;

        if self.blocked {
            if caches[self.core_id].is_blocking() {
                self.idle_cycles += 1;
                return;
            }
            self.blocked = false;
        }

        if self.queue.is_empty() {
            self.refill();
            if self.queue.is_empty() {
                self.trace_complete = true;
                // No reference was processed this cycle.
                self.total_cycles = self.total_cycles.saturating_sub(1);
                return;
            }
        }

        let reference = self.queue[0];
        let (cache, peers) = PeerSplit::around(caches, self.core_id);
        let response = match reference.op {
            MemOp::Read => cache.read(reference.addr, bus, peers),
            MemOp::Write => cache.write(reference.addr, bus, peers),
        };

        match response {
            AccessResponse::Refused => {
                // The cache is still draining an earlier miss; keep the
                // reference and retry next cycle.
            }
            AccessResponse::Done { cycles } => {
                self.queue.pop_front();
                self.retire(reference.op);
                if cycles > 1 {
                    // The miss latency is accounted as idle time.
                    self.blocked = true;
                    self.idle_cycles += cycles;
                }
            }
            AccessResponse::Queued => {
                self.queue.pop_front();
                self.retire(reference.op);
                // Latency unknown until the bus comes back; idle cycles
                // accrue while the cache stays blocked.
                self.blocked = true;
            }
        }

        self.refill();
    }

    fn retire(&mut self, op: MemOp) {
        self.total_instructions += 1;
        match op {
            MemOp::Read => self.read_instructions += 1,
            MemOp::Write => self.write_instructions += 1,
        }
    }

    fn refill(&mut self) {
        while self.queue.len() < PREFETCH_TARGET {
            match self.trace.next_ref() {
                Some(reference) => self.queue.push_back(reference),
                None => break,
            }
        }
    }
}
