use crate::coherence::bus::{Bus, PeerSplit};
use crate::coherence::cache::{AccessResponse, Cache};
use crate::coherence::{verify_coherence, MesiState};
use crate::sim::config::SystemConfig;

/// Two sets, two ways, 32-byte blocks; transfers cost 16 cycles.
fn small_config(num_cores: usize) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.sim.num_cores = num_cores;
    config.geometry.set_index_bits = 1;
    config.geometry.associativity = 2;
    config.geometry.block_offset_bits = 5;
    config
}

fn machine(num_cores: usize) -> (Vec<Cache>, Bus) {
    let config = small_config(num_cores);
    let caches = (0..num_cores).map(|i| Cache::new(i, &config)).collect();
    let bus = Bus::new(
        config.timing.mem_latency,
        config.geometry.block_bytes() as u64,
    );
    (caches, bus)
}

fn read(caches: &mut [Cache], bus: &mut Bus, core: usize, addr: u32) -> AccessResponse {
    let (cache, peers) = PeerSplit::around(caches, core);
    cache.read(addr, bus, peers)
}

fn write(caches: &mut [Cache], bus: &mut Bus, core: usize, addr: u32) -> AccessResponse {
    let (cache, peers) = PeerSplit::around(caches, core);
    cache.write(addr, bus, peers)
}

/// Runs the bus until everything in flight and queued has drained.
fn drain(caches: &mut [Cache], bus: &mut Bus) {
    while bus.is_busy() || bus.pending_len() > 0 {
        bus.tick(caches);
    }
}

#[test]
fn cold_read_fetches_from_memory_into_exclusive() {
    let (mut caches, mut bus) = machine(2);
    let response = read(&mut caches, &mut bus, 0, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 101 });
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Exclusive));
    assert!(caches[0].is_blocking());
    assert_eq!(caches[0].stats().read_misses(), 1);
    assert_eq!(bus.stats().reads(), 1);

    drain(&mut caches, &mut bus);
    assert!(!caches[0].is_blocking());
    verify_coherence(&caches).unwrap();
}

#[test]
fn read_serviced_by_a_peer_lands_shared_both_sides() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);

    // Peer holds E; the transfer costs 2 cycles per word, 16 in total.
    let response = read(&mut caches, &mut bus, 1, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 17 });
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Shared));
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Shared));
    assert_eq!(caches[0].stats().traffic_bytes(), 32);
    drain(&mut caches, &mut bus);
    verify_coherence(&caches).unwrap();
}

#[test]
fn second_read_of_the_same_block_hits() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    // Any address inside the block is the same line.
    let response = read(&mut caches, &mut bus, 0, 0x1c);
    assert_eq!(response, AccessResponse::Done { cycles: 1 });
    assert_eq!(caches[0].stats().misses(), 1);
    assert_eq!(caches[0].stats().accesses(), 2);
}

#[test]
fn blocked_cache_refuses_until_the_bus_releases_it() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    assert_eq!(read(&mut caches, &mut bus, 0, 0x20), AccessResponse::Refused);
    // The refused probe does not touch the counters.
    assert_eq!(caches[0].stats().accesses(), 1);
    drain(&mut caches, &mut bus);
    assert_eq!(
        read(&mut caches, &mut bus, 0, 0x0),
        AccessResponse::Done { cycles: 1 }
    );
}

#[test]
fn write_hit_in_exclusive_upgrades_without_bus_traffic() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    let transactions_before = bus.stats().transactions();

    let response = write(&mut caches, &mut bus, 0, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 1 });
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Modified));
    assert_eq!(bus.stats().transactions(), transactions_before);
}

#[test]
fn write_hit_in_shared_upgrades_and_invalidates_the_peer() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    read(&mut caches, &mut bus, 1, 0x0);
    drain(&mut caches, &mut bus);

    // No peer supplies data for an upgrade, so it pays the memory latency.
    let response = write(&mut caches, &mut bus, 0, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 101 });
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Modified));
    assert_eq!(caches[1].peek_line_state(0x0), None);
    assert_eq!(caches[1].stats().invalidations(), 1);
    assert_eq!(bus.stats().upgrades(), 1);
    drain(&mut caches, &mut bus);
    verify_coherence(&caches).unwrap();
}

#[test]
fn write_miss_on_a_dirty_peer_forces_its_writeback() {
    let (mut caches, mut bus) = machine(2);
    write(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Modified));

    // Transfer (16) plus the dirty peer's writeback (100).
    let response = write(&mut caches, &mut bus, 1, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 117 });
    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[0].stats().writebacks(), 1);
    assert_eq!(caches[0].stats().invalidations(), 1);
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Modified));
    drain(&mut caches, &mut bus);
    verify_coherence(&caches).unwrap();
}

#[test]
fn dirty_read_snoop_downgrades_the_owner_to_shared() {
    let (mut caches, mut bus) = machine(2);
    write(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);

    let response = read(&mut caches, &mut bus, 1, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 117 });
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Shared));
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Shared));
    assert_eq!(caches[0].stats().writebacks(), 1);
    drain(&mut caches, &mut bus);
    verify_coherence(&caches).unwrap();
}

#[test]
fn evicting_a_dirty_victim_writes_back_and_counts_a_flush() {
    let (mut caches, mut bus) = machine(1);
    // Three blocks mapping to set 0 in a 2-way cache.
    for addr in [0x0, 0x40, 0x80] {
        write(&mut caches, &mut bus, 0, addr);
        drain(&mut caches, &mut bus);
    }
    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[0].peek_line_state(0x40), Some(MesiState::Modified));
    assert_eq!(caches[0].peek_line_state(0x80), Some(MesiState::Modified));
    assert_eq!(caches[0].stats().evictions(), 1);
    assert_eq!(caches[0].stats().writebacks(), 1);
    assert_eq!(bus.stats().flushes(), 1);
}

#[test]
fn eviction_writeback_extends_the_miss_latency() {
    let (mut caches, mut bus) = machine(1);
    write(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    write(&mut caches, &mut bus, 0, 0x40);
    drain(&mut caches, &mut bus);
    // Fetch (100) plus the victim writeback (100) plus the hit cycle.
    let response = write(&mut caches, &mut bus, 0, 0x80);
    assert_eq!(response, AccessResponse::Done { cycles: 201 });
}

#[test]
fn evicting_a_shared_line_promotes_the_lone_remaining_sharer() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    read(&mut caches, &mut bus, 1, 0x0);
    drain(&mut caches, &mut bus);
    assert_eq!(caches[0].peek_line_state(0x0), Some(MesiState::Shared));

    // Fill core 0's set 0 with two further blocks, evicting the shared
    // line. Core 1 is then the only holder and may sit in E.
    read(&mut caches, &mut bus, 0, 0x40);
    drain(&mut caches, &mut bus);
    read(&mut caches, &mut bus, 0, 0x80);
    drain(&mut caches, &mut bus);
    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Exclusive));

    // A later write at the promoted peer is silent.
    let transactions_before = bus.stats().transactions();
    let response = write(&mut caches, &mut bus, 1, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 1 });
    assert_eq!(bus.stats().transactions(), transactions_before);
    verify_coherence(&caches).unwrap();
}

#[test]
fn no_promotion_when_two_peers_still_share() {
    let (mut caches, mut bus) = machine(3);
    for core in 0..3 {
        read(&mut caches, &mut bus, core, 0x0);
        drain(&mut caches, &mut bus);
    }
    read(&mut caches, &mut bus, 0, 0x40);
    drain(&mut caches, &mut bus);
    read(&mut caches, &mut bus, 0, 0x80);
    drain(&mut caches, &mut bus);

    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Shared));
    assert_eq!(caches[2].peek_line_state(0x0), Some(MesiState::Shared));
    verify_coherence(&caches).unwrap();
}

#[test]
fn write_miss_invalidates_a_clean_exclusive_peer() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);

    // A clean supply costs the transfer alone, no writeback.
    let response = write(&mut caches, &mut bus, 1, 0x0);
    assert_eq!(response, AccessResponse::Done { cycles: 17 });
    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[0].stats().invalidations(), 1);
    assert_eq!(caches[0].stats().writebacks(), 0);
    drain(&mut caches, &mut bus);
    verify_coherence(&caches).unwrap();
}

#[test]
fn racing_upgrades_serialise_and_the_loser_refetches() {
    let (mut caches, mut bus) = machine(3);
    read(&mut caches, &mut bus, 0, 0x0);
    drain(&mut caches, &mut bus);
    read(&mut caches, &mut bus, 1, 0x0);
    drain(&mut caches, &mut bus);

    // Occupy the bus so both upgrades end up queued behind core 2.
    read(&mut caches, &mut bus, 2, 0x200);
    assert_eq!(write(&mut caches, &mut bus, 0, 0x0), AccessResponse::Queued);
    assert_eq!(write(&mut caches, &mut bus, 1, 0x0), AccessResponse::Queued);
    drain(&mut caches, &mut bus);

    // Core 0's upgrade went first and invalidated core 1's copy, so core
    // 1's upgrade found its line gone, pulled the block from the now
    // dirty core 0, and refilled in M.
    assert_eq!(caches[0].peek_line_state(0x0), None);
    assert_eq!(caches[1].peek_line_state(0x0), Some(MesiState::Modified));
    assert_eq!(bus.stats().upgrades(), 2);
    assert_eq!(caches[0].stats().invalidations(), 1);
    assert_eq!(caches[1].stats().invalidations(), 1);
    verify_coherence(&caches).unwrap();
}

#[test]
fn force_unblock_lets_a_wedged_cache_accept_again() {
    let (mut caches, mut bus) = machine(2);
    read(&mut caches, &mut bus, 0, 0x0);
    assert!(caches[0].is_blocking());
    caches[0].force_unblock();
    bus.reset();
    assert_eq!(
        read(&mut caches, &mut bus, 0, 0x0),
        AccessResponse::Done { cycles: 1 }
    );
}
