use crate::coherence::bus::{
    Bus, BusBusy, BusGrant, BusOp, BusTransaction, FillReceipt, PeerSplit, SnoopPort, SnoopReply,
};
use crate::coherence::line::MesiState;
use crate::coherence::set::CacheSet;
use crate::coherence::stats::CacheStats;
use crate::coherence::Cycle;
use crate::sim::config::SystemConfig;

/// Answer to a processor-side read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResponse {
    /// The cache is servicing an earlier miss; the processor must retry.
    Refused,
    /// Serviced with a known latency. Hits report a single cycle; misses
    /// report one cycle plus the full bus latency.
    Done { cycles: Cycle },
    /// Miss accepted but the bus was occupied. The transaction is queued
    /// and the cache stays blocked until the bus comes back to it.
    Queued,
}

#[derive(Debug, Clone, Copy)]
enum AccessKind {
    Read,
    Write,
    Upgrade,
}

#[derive(Debug, Clone, Copy)]
struct PendingAccess {
    addr: u32,
    kind: AccessKind,
}

#[derive(Debug, Clone, Copy)]
enum FillKind {
    Read { data_provided: bool },
    Write,
}

/// One core's private write-back L1 cache and its MESI engine.
pub struct Cache {
    core_id: usize,
    set_index_bits: u32,
    block_offset_bits: u32,
    block_bytes: u64,
    transfer_cycles: Cycle,
    mem_latency: Cycle,
    upgrade_data_response: bool,
    sets: Vec<CacheSet>,
    blocked: bool,
    pending: Option<PendingAccess>,
    stats: CacheStats,
}

impl Cache {
    pub fn new(core_id: usize, config: &SystemConfig) -> Self {
        let geometry = &config.geometry;
        let block_bytes = geometry.block_bytes();
        Self {
            core_id,
            set_index_bits: geometry.set_index_bits,
            block_offset_bits: geometry.block_offset_bits,
            block_bytes: block_bytes as u64,
            transfer_cycles: config.timing.cache_transfer_cycles(block_bytes),
            mem_latency: config.timing.mem_latency,
            upgrade_data_response: config.protocol.upgrade_data_response,
            sets: (0..geometry.num_sets())
                .map(|_| CacheSet::new(geometry.associativity, block_bytes))
                .collect(),
            blocked: false,
            pending: None,
            stats: CacheStats::default(),
        }
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn sets(&self) -> &[CacheSet] {
        &self.sets
    }

    /// True while an originated miss is still draining bus cycles. The
    /// bus clears this when the transaction completes; the cache never
    /// counts down on its own.
    pub fn is_blocking(&self) -> bool {
        self.blocked
    }

    /// Deadlock-breaker hook: drop the blocked state and any pending
    /// transaction descriptor.
    pub fn force_unblock(&mut self) {
        self.blocked = false;
        self.pending = None;
    }

    pub fn tag_of(&self, addr: u32) -> u32 {
        addr >> (self.set_index_bits + self.block_offset_bits)
    }

    pub fn set_index_of(&self, addr: u32) -> usize {
        ((addr >> self.block_offset_bits) & ((1u32 << self.set_index_bits) - 1)) as usize
    }

    /// Base address of the block held by (set, tag).
    pub fn block_addr(&self, set_index: usize, tag: u32) -> u32 {
        (tag << (self.set_index_bits + self.block_offset_bits))
            | ((set_index as u32) << self.block_offset_bits)
    }

    /// State of the line holding `addr`, if any valid line does. This is
    /// the read-only peer capability used for eviction-time observation.
    pub fn peek_line_state(&self, addr: u32) -> Option<MesiState> {
        let set = &self.sets[self.set_index_of(addr)];
        set.find_line(self.tag_of(addr)).map(|way| set.line(way).state())
    }

    pub fn is_hit(&self, addr: u32) -> bool {
        self.peek_line_state(addr).is_some()
    }

    /// Processor-side read.
    pub fn read(
        &mut self,
        addr: u32,
        bus: &mut Bus,
        mut peers: PeerSplit<'_, Cache>,
    ) -> AccessResponse {
        if self.blocked {
            return AccessResponse::Refused;
        }
        self.stats.record_read_access();

        let set_index = self.set_index_of(addr);
        let tag = self.tag_of(addr);
        if let Some(way) = self.sets[set_index].find_line(tag) {
            self.sets[set_index].touch(way);
            return AccessResponse::Done { cycles: 1 };
        }

        self.stats.record_read_miss();
        self.blocked = true;
        match bus.transaction(BusOp::BusRd, addr, self.core_id, &mut peers) {
            Ok(grant) => self.finish_miss(
                addr,
                FillKind::Read {
                    data_provided: grant.data_provided,
                },
                grant,
                bus,
                peers,
            ),
            Err(BusBusy) => {
                self.pending = Some(PendingAccess {
                    addr,
                    kind: AccessKind::Read,
                });
                AccessResponse::Queued
            }
        }
    }

    /// Processor-side write.
    pub fn write(
        &mut self,
        addr: u32,
        bus: &mut Bus,
        mut peers: PeerSplit<'_, Cache>,
    ) -> AccessResponse {
        if self.blocked {
            return AccessResponse::Refused;
        }
        self.stats.record_write_access();

        let set_index = self.set_index_of(addr);
        let tag = self.tag_of(addr);
        if let Some(way) = self.sets[set_index].find_line(tag) {
            self.sets[set_index].touch(way);
            return match self.sets[set_index].line(way).state() {
                MesiState::Modified => AccessResponse::Done { cycles: 1 },
                MesiState::Exclusive => {
                    // Lone clean owner: upgrade locally, no bus traffic.
                    self.sets[set_index].line_mut(way).set_state(MesiState::Modified);
                    AccessResponse::Done { cycles: 1 }
                }
                MesiState::Shared => {
                    // Other copies must be invalidated before we dirty ours.
                    self.blocked = true;
                    match bus.transaction(BusOp::BusUpgr, addr, self.core_id, &mut peers) {
                        Ok(grant) => {
                            self.sets[set_index].line_mut(way).set_state(MesiState::Modified);
                            AccessResponse::Done {
                                cycles: 1 + grant.cycles,
                            }
                        }
                        Err(BusBusy) => {
                            self.pending = Some(PendingAccess {
                                addr,
                                kind: AccessKind::Upgrade,
                            });
                            AccessResponse::Queued
                        }
                    }
                }
                MesiState::Invalid => unreachable!("find_line only matches valid lines"),
            };
        }

        self.stats.record_write_miss();
        self.blocked = true;
        match bus.transaction(BusOp::BusRdX, addr, self.core_id, &mut peers) {
            Ok(grant) => self.finish_miss(addr, FillKind::Write, grant, bus, peers),
            Err(BusBusy) => {
                self.pending = Some(PendingAccess {
                    addr,
                    kind: AccessKind::Write,
                });
                AccessResponse::Queued
            }
        }
    }

    fn finish_miss(
        &mut self,
        addr: u32,
        kind: FillKind,
        grant: BusGrant,
        bus: &mut Bus,
        peers: PeerSplit<'_, Cache>,
    ) -> AccessResponse {
        let receipt = self.fill(addr, kind, peers);
        let eviction_cycles = if receipt.wrote_back { self.mem_latency } else { 0 };
        bus.apply_fill_receipt(receipt);
        AccessResponse::Done {
            cycles: 1 + grant.cycles + eviction_cycles,
        }
    }

    /// Allocates the line for a serviced miss, evicting the LRU victim if
    /// the set is full.
    fn fill(&mut self, addr: u32, kind: FillKind, mut peers: PeerSplit<'_, Cache>) -> FillReceipt {
        let set_index = self.set_index_of(addr);
        let tag = self.tag_of(addr);
        let mut receipt = FillReceipt::default();

        if self.sets[set_index].is_full() {
            let victim_way = self.sets[set_index].lru_way();
            let victim = self.sets[set_index].line(victim_way);
            let victim_tag = victim.tag();
            let victim_state = victim.state();
            self.stats.record_eviction();
            match victim_state {
                MesiState::Modified => {
                    self.stats.record_writeback();
                    receipt.wrote_back = true;
                }
                MesiState::Shared => {
                    // If exactly one peer still shares the departing block
                    // it is now the lone clean holder and may sit in E.
                    let victim_addr = self.block_addr(set_index, victim_tag);
                    promote_lone_sharer(victim_addr, &mut peers);
                }
                MesiState::Exclusive | MesiState::Invalid => {}
            }
            self.sets[set_index].invalidate_line(victim_way);
        }

        let way = self.sets[set_index].allocate_line(tag);
        let state = match kind {
            FillKind::Write => MesiState::Modified,
            FillKind::Read { data_provided: true } => MesiState::Shared,
            FillKind::Read { data_provided: false } => MesiState::Exclusive,
        };
        self.sets[set_index].line_mut(way).set_state(state);
        receipt
    }

    fn promote_to_exclusive(&mut self, addr: u32) {
        let set_index = self.set_index_of(addr);
        let tag = self.tag_of(addr);
        if let Some(way) = self.sets[set_index].find_line(tag) {
            self.sets[set_index]
                .line_mut(way)
                .set_state(MesiState::Exclusive);
        }
    }
}

fn promote_lone_sharer(addr: u32, peers: &mut PeerSplit<'_, Cache>) {
    let sharers = peers
        .reborrow()
        .iter_mut()
        .filter(|peer| peer.peek_line_state(addr) == Some(MesiState::Shared))
        .count();
    if sharers != 1 {
        return;
    }
    for peer in peers.iter_mut() {
        if peer.peek_line_state(addr) == Some(MesiState::Shared) {
            peer.promote_to_exclusive(addr);
            return;
        }
    }
}

impl SnoopPort for Cache {
    /// Bus-side snoop. Every transition of the protocol table lives here;
    /// a snoop that finds no matching valid line is free.
    fn snoop(&mut self, op: BusOp, addr: u32, _source: usize) -> SnoopReply {
        let set_index = self.set_index_of(addr);
        let tag = self.tag_of(addr);
        let Some(way) = self.sets[set_index].find_line(tag) else {
            return SnoopReply::default();
        };
        let state = self.sets[set_index].line(way).state();

        match op {
            BusOp::BusRd => match state {
                MesiState::Modified => {
                    // Dirty copy: supply the block and write it back, then
                    // fall to shared alongside the requester.
                    self.stats.record_writeback();
                    self.stats.record_traffic(self.block_bytes);
                    self.sets[set_index].line_mut(way).set_state(MesiState::Shared);
                    SnoopReply {
                        provided_data: true,
                        cycles: self.transfer_cycles + self.mem_latency,
                    }
                }
                MesiState::Exclusive => {
                    self.stats.record_traffic(self.block_bytes);
                    self.sets[set_index].line_mut(way).set_state(MesiState::Shared);
                    SnoopReply {
                        provided_data: true,
                        cycles: self.transfer_cycles,
                    }
                }
                MesiState::Shared => {
                    self.stats.record_traffic(self.block_bytes);
                    SnoopReply {
                        provided_data: true,
                        cycles: self.transfer_cycles,
                    }
                }
                MesiState::Invalid => SnoopReply::default(),
            },
            BusOp::BusRdX => match state {
                MesiState::Modified => {
                    self.stats.record_writeback();
                    self.stats.record_traffic(self.block_bytes);
                    self.stats.record_invalidation();
                    self.sets[set_index].invalidate_line(way);
                    SnoopReply {
                        provided_data: true,
                        cycles: self.transfer_cycles + self.mem_latency,
                    }
                }
                MesiState::Exclusive | MesiState::Shared => {
                    self.stats.record_traffic(self.block_bytes);
                    self.stats.record_invalidation();
                    self.sets[set_index].invalidate_line(way);
                    SnoopReply {
                        provided_data: true,
                        cycles: self.transfer_cycles,
                    }
                }
                MesiState::Invalid => SnoopReply::default(),
            },
            BusOp::BusUpgr => match state {
                MesiState::Shared => {
                    self.stats.record_invalidation();
                    self.sets[set_index].invalidate_line(way);
                    SnoopReply::default()
                }
                MesiState::Exclusive | MesiState::Modified => {
                    // Not a canonical MESI situation. The source behaviour
                    // answers with data before invalidating.
                    let reply = if self.upgrade_data_response {
                        self.stats.record_traffic(self.block_bytes);
                        SnoopReply {
                            provided_data: true,
                            cycles: self.transfer_cycles,
                        }
                    } else {
                        SnoopReply::default()
                    };
                    self.stats.record_invalidation();
                    self.sets[set_index].invalidate_line(way);
                    reply
                }
                MesiState::Invalid => SnoopReply::default(),
            },
            // A flush only talks to memory; peers have nothing to do.
            BusOp::Flush => SnoopReply::default(),
        }
    }

    fn complete_transfer(
        &mut self,
        txn: &BusTransaction,
        grant: BusGrant,
        peers: PeerSplit<'_, Cache>,
    ) -> FillReceipt {
        let Some(pending) = self.pending.take() else {
            return FillReceipt::default();
        };
        debug_assert_eq!(pending.addr, txn.addr);

        match pending.kind {
            AccessKind::Read => self.fill(
                pending.addr,
                FillKind::Read {
                    data_provided: grant.data_provided,
                },
                peers,
            ),
            AccessKind::Write => self.fill(pending.addr, FillKind::Write, peers),
            AccessKind::Upgrade => {
                let set_index = self.set_index_of(pending.addr);
                let tag = self.tag_of(pending.addr);
                if let Some(way) = self.sets[set_index].find_line(tag) {
                    self.sets[set_index].line_mut(way).set_state(MesiState::Modified);
                    FillReceipt::default()
                } else {
                    // The line was invalidated while the upgrade sat in the
                    // queue. Our broadcast has already cleared every peer
                    // copy, so fall back to a plain write fill.
                    self.fill(pending.addr, FillKind::Write, peers)
                }
            }
        }
    }

    fn release(&mut self) {
        self.blocked = false;
    }
}
