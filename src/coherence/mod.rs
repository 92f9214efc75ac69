pub mod bus;
pub mod cache;
pub mod line;
pub mod set;
pub mod stats;

mod unit_tests;

pub use bus::{Bus, BusBusy, BusGrant, BusOp, BusTransaction, FillReceipt, PeerSplit, SnoopPort, SnoopReply};
pub use cache::{AccessResponse, Cache};
pub use line::{CacheLine, LineError, MesiState};
pub use set::CacheSet;
pub use stats::{BusStats, CacheStats};

use std::collections::HashMap;
use thiserror::Error;

pub type Cycle = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoherenceViolation {
    #[error(
        "block {addr:#010x} held {owner_state} by core {owner} while core {other} holds it {other_state}"
    )]
    ConflictingOwners {
        addr: u32,
        owner: usize,
        owner_state: &'static str,
        other: usize,
        other_state: &'static str,
    },
    #[error("core {core} set {set_index} holds tag {tag:#x} in more than one valid line")]
    DuplicateTag {
        core: usize,
        set_index: usize,
        tag: u32,
    },
}

/// Audits the whole cache roster against the protocol invariants: a block
/// in M or E is held by exactly one cache, S never coexists with M or E,
/// and valid tags are unique within a set.
pub fn verify_coherence(caches: &[Cache]) -> Result<(), CoherenceViolation> {
    let mut holders: HashMap<(usize, u32), (usize, MesiState)> = HashMap::new();

    for cache in caches {
        for (set_index, set) in cache.sets().iter().enumerate() {
            let mut seen_tags: Vec<u32> = Vec::new();
            for line in set.lines() {
                if !line.is_valid() {
                    continue;
                }
                if seen_tags.contains(&line.tag()) {
                    return Err(CoherenceViolation::DuplicateTag {
                        core: cache.core_id(),
                        set_index,
                        tag: line.tag(),
                    });
                }
                seen_tags.push(line.tag());

                let key = (set_index, line.tag());
                match holders.get(&key) {
                    None => {
                        holders.insert(key, (cache.core_id(), line.state()));
                    }
                    Some(&(owner, owner_state)) => {
                        let exclusive = |s: MesiState| {
                            matches!(s, MesiState::Modified | MesiState::Exclusive)
                        };
                        if exclusive(owner_state) || exclusive(line.state()) {
                            return Err(CoherenceViolation::ConflictingOwners {
                                addr: cache.block_addr(set_index, line.tag()),
                                owner,
                                owner_state: owner_state.as_str(),
                                other: cache.core_id(),
                                other_state: line.state().as_str(),
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
