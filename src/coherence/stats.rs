use serde::Serialize;
use std::ops::AddAssign;

/// Per-cache counters, snapshotted into the final report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    accesses: u64,
    reads: u64,
    writes: u64,
    read_misses: u64,
    write_misses: u64,
    evictions: u64,
    writebacks: u64,
    invalidations: u64,
    traffic_bytes: u64,
}

impl CacheStats {
    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn read_misses(&self) -> u64 {
        self.read_misses
    }

    pub fn write_misses(&self) -> u64 {
        self.write_misses
    }

    pub fn misses(&self) -> u64 {
        self.read_misses.saturating_add(self.write_misses)
    }

    pub fn hits(&self) -> u64 {
        self.accesses.saturating_sub(self.misses())
    }

    /// Miss rate as a percentage. Zero accesses report a rate of zero.
    pub fn miss_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            100.0 * self.misses() as f64 / self.accesses as f64
        }
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn writebacks(&self) -> u64 {
        self.writebacks
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    pub fn traffic_bytes(&self) -> u64 {
        self.traffic_bytes
    }

    pub fn record_read_access(&mut self) {
        self.accesses = self.accesses.saturating_add(1);
        self.reads = self.reads.saturating_add(1);
    }

    pub fn record_write_access(&mut self) {
        self.accesses = self.accesses.saturating_add(1);
        self.writes = self.writes.saturating_add(1);
    }

    pub fn record_read_miss(&mut self) {
        self.read_misses = self.read_misses.saturating_add(1);
    }

    pub fn record_write_miss(&mut self) {
        self.write_misses = self.write_misses.saturating_add(1);
    }

    pub fn record_eviction(&mut self) {
        self.evictions = self.evictions.saturating_add(1);
    }

    pub fn record_writeback(&mut self) {
        self.writebacks = self.writebacks.saturating_add(1);
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations = self.invalidations.saturating_add(1);
    }

    pub fn record_traffic(&mut self, bytes: u64) {
        self.traffic_bytes = self.traffic_bytes.saturating_add(bytes);
    }
}

impl AddAssign<&CacheStats> for CacheStats {
    fn add_assign(&mut self, other: &CacheStats) {
        self.accesses = self.accesses.saturating_add(other.accesses);
        self.reads = self.reads.saturating_add(other.reads);
        self.writes = self.writes.saturating_add(other.writes);
        self.read_misses = self.read_misses.saturating_add(other.read_misses);
        self.write_misses = self.write_misses.saturating_add(other.write_misses);
        self.evictions = self.evictions.saturating_add(other.evictions);
        self.writebacks = self.writebacks.saturating_add(other.writebacks);
        self.invalidations = self.invalidations.saturating_add(other.invalidations);
        self.traffic_bytes = self.traffic_bytes.saturating_add(other.traffic_bytes);
    }
}

/// Aggregate counters kept by the bus itself.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    reads: u64,
    read_xs: u64,
    upgrades: u64,
    flushes: u64,
    traffic_bytes: u64,
}

impl BusStats {
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn read_xs(&self) -> u64 {
        self.read_xs
    }

    pub fn upgrades(&self) -> u64 {
        self.upgrades
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Completed bus operations across all four kinds.
    pub fn transactions(&self) -> u64 {
        self.reads
            .saturating_add(self.read_xs)
            .saturating_add(self.upgrades)
            .saturating_add(self.flushes)
    }

    pub fn traffic_bytes(&self) -> u64 {
        self.traffic_bytes
    }

    pub fn record_read(&mut self) {
        self.reads = self.reads.saturating_add(1);
    }

    pub fn record_read_x(&mut self) {
        self.read_xs = self.read_xs.saturating_add(1);
    }

    pub fn record_upgrade(&mut self) {
        self.upgrades = self.upgrades.saturating_add(1);
    }

    pub fn record_flush(&mut self) {
        self.flushes = self.flushes.saturating_add(1);
    }

    pub fn record_traffic(&mut self, bytes: u64) {
        self.traffic_bytes = self.traffic_bytes.saturating_add(bytes);
    }
}
