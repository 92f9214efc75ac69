use std::collections::VecDeque;

use log::debug;

use crate::coherence::stats::BusStats;
use crate::coherence::Cycle;

/// Operations that can appear on the snooping bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    /// Read miss: fetch a block for reading.
    BusRd,
    /// Write miss: fetch a block with intent to modify.
    BusRdX,
    /// Write hit on a shared block: claim ownership without a fetch.
    BusUpgr,
    /// Writeback of a dirty block to memory.
    Flush,
}

#[derive(Debug, Clone, Copy)]
pub struct BusTransaction {
    pub op: BusOp,
    pub addr: u32,
    pub source: usize,
}

/// A peer cache's answer to one snooped transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnoopReply {
    pub provided_data: bool,
    pub cycles: Cycle,
}

/// Outcome of a granted transaction: whether any peer supplied the block
/// and the total latency the bus will stay occupied for.
#[derive(Debug, Clone, Copy)]
pub struct BusGrant {
    pub data_provided: bool,
    pub cycles: Cycle,
}

/// The bus is occupied; the transaction has been queued and the caller
/// must wait for the bus to come back to it.
#[derive(Debug, Clone, Copy)]
pub struct BusBusy;

/// Report from a cache that finished filling a line after a grant.
#[derive(Debug, Clone, Copy, Default)]
pub struct FillReceipt {
    /// A dirty victim was written back to memory during the fill.
    pub wrote_back: bool,
}

/// The bus side of a cache: snooping, deferred fill completion, and the
/// unblock signal when a drained transaction releases its originator.
pub trait SnoopPort: Sized {
    fn snoop(&mut self, op: BusOp, addr: u32, source: usize) -> SnoopReply;

    /// Completes a transaction that was granted from the pending queue.
    /// The port allocates or upgrades its line and reports eviction side
    /// effects back to the bus.
    fn complete_transfer(
        &mut self,
        txn: &BusTransaction,
        grant: BusGrant,
        peers: PeerSplit<'_, Self>,
    ) -> FillReceipt;

    /// Called when the port's transaction finishes draining.
    fn release(&mut self);
}

/// Split-borrow view of the cache roster around one core: every port
/// except the originator, visited in ascending core-id order.
pub struct PeerSplit<'a, P> {
    below: &'a mut [P],
    above: &'a mut [P],
}

impl<'a, P> PeerSplit<'a, P> {
    /// Splits `ports` into the entry at `index` and a view of the rest.
    pub fn around(ports: &'a mut [P], index: usize) -> (&'a mut P, PeerSplit<'a, P>) {
        let (below, rest) = ports.split_at_mut(index);
        let (origin, above) = rest.split_first_mut().expect("core id within roster");
        (origin, PeerSplit { below, above })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut P> + '_ {
        self.below.iter_mut().chain(self.above.iter_mut())
    }

    pub fn reborrow(&mut self) -> PeerSplit<'_, P> {
        PeerSplit {
            below: &mut *self.below,
            above: &mut *self.above,
        }
    }

    pub fn len(&self) -> usize {
        self.below.len() + self.above.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Inflight {
    source: usize,
    remaining: Cycle,
}

/// The single atomic snooping bus. Serialises transactions, broadcasts
/// snoops, computes transfer latency, and owns the aggregate counters.
pub struct Bus {
    mem_latency: Cycle,
    block_bytes: u64,
    inflight: Option<Inflight>,
    pending: VecDeque<BusTransaction>,
    stats: BusStats,
}

impl Bus {
    pub fn new(mem_latency: Cycle, block_bytes: u64) -> Self {
        Self {
            mem_latency,
            block_bytes,
            inflight: None,
            pending: VecDeque::new(),
            stats: BusStats::default(),
        }
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn is_busy(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Requests the bus for a transaction. If the bus is free the snoop
    /// broadcast happens synchronously and the grant comes back at once;
    /// otherwise the transaction is queued behind the in-flight one and
    /// the caller stays blocked until the bus comes back to it.
    pub fn transaction<P: SnoopPort>(
        &mut self,
        op: BusOp,
        addr: u32,
        source: usize,
        peers: &mut PeerSplit<'_, P>,
    ) -> Result<BusGrant, BusBusy> {
        let txn = BusTransaction { op, addr, source };
        if self.inflight.is_some() || !self.pending.is_empty() {
            debug!(
                "bus busy, queueing {:?} addr={:#010x} from core {}",
                op, addr, source
            );
            self.pending.push_back(txn);
            return Err(BusBusy);
        }
        let grant = self.broadcast(&txn, peers);
        self.inflight = Some(Inflight {
            source,
            remaining: grant.cycles,
        });
        Ok(grant)
    }

    /// One bus cycle: drain the in-flight transaction, release its
    /// originator when it completes, then start the next pending one.
    pub fn tick<P: SnoopPort>(&mut self, ports: &mut [P]) {
        if let Some(mut inflight) = self.inflight.take() {
            inflight.remaining = inflight.remaining.saturating_sub(1);
            if inflight.remaining == 0 {
                ports[inflight.source].release();
            } else {
                self.inflight = Some(inflight);
            }
        }
        if self.inflight.is_none() {
            if let Some(txn) = self.pending.pop_front() {
                let (origin, mut peers) = PeerSplit::around(ports, txn.source);
                let grant = self.broadcast(&txn, &mut peers);
                self.inflight = Some(Inflight {
                    source: txn.source,
                    remaining: grant.cycles,
                });
                let receipt = origin.complete_transfer(&txn, grant, peers);
                self.apply_fill_receipt(receipt);
            }
        }
    }

    /// Folds a fill's eviction side effects into the in-flight
    /// transaction: a dirty-victim writeback occupies the bus for the
    /// memory latency and counts as a Flush operation.
    pub fn apply_fill_receipt(&mut self, receipt: FillReceipt) {
        if !receipt.wrote_back {
            return;
        }
        self.stats.record_flush();
        self.stats.record_traffic(self.block_bytes);
        if let Some(inflight) = &mut self.inflight {
            inflight.remaining = inflight.remaining.saturating_add(self.mem_latency);
        }
    }

    /// Deadlock-breaker hook: forget the in-flight transaction and drop
    /// everything queued.
    pub fn reset(&mut self) {
        self.inflight = None;
        self.pending.clear();
    }

    fn broadcast<P: SnoopPort>(
        &mut self,
        txn: &BusTransaction,
        peers: &mut PeerSplit<'_, P>,
    ) -> BusGrant {
        let mut provided = false;
        let mut snoop_cycles: Cycle = 0;
        for peer in peers.iter_mut() {
            let reply = peer.snoop(txn.op, txn.addr, txn.source);
            if reply.provided_data {
                provided = true;
                self.stats.record_traffic(self.block_bytes);
            }
            snoop_cycles = snoop_cycles.saturating_add(reply.cycles);
        }

        match txn.op {
            BusOp::BusRd => self.stats.record_read(),
            BusOp::BusRdX => self.stats.record_read_x(),
            BusOp::BusUpgr => self.stats.record_upgrade(),
            BusOp::Flush => self.stats.record_flush(),
        }

        // A cache-to-cache supply already paid for itself in snoop cycles;
        // anything else goes to memory for the full latency.
        let cycles = if provided {
            snoop_cycles
        } else {
            snoop_cycles.saturating_add(self.mem_latency)
        };

        debug!(
            "bus {:?} addr={:#010x} source={} provided={} cycles={}",
            txn.op, txn.addr, txn.source, provided, cycles
        );

        BusGrant {
            data_provided: provided,
            cycles,
        }
    }
}
