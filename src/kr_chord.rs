use crate::kr_entry::RoutingEntry;
use crate::kr_interface::{Address, RoutingDistance, RoutingPolicy, BITNESS};
use crate::kr_key::{common_prefix_len, Key};
use crate::kr_range::Range;
use crate::kr_route_table::Flavor;

// ============================================================================
// Chord-like protocol policy
// ============================================================================

/// Flavor id of the ring-successor slot. Distinct from every prefix-length
/// flavor (those are at most BITNESS).
pub const SUCCESSOR_FLAVOR_ID: u32 = BITNESS + 1;

/// Numeric key-space metric of Chord-style routing.
///
/// A range containing the target is a perfect fit. Otherwise the score is
/// the clockwise distance from the range's right edge to the target, so the
/// claim ending closest below the target wins. The implicit whole-ring
/// range (stubs, fallback claims) is scored by the node key itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChordDistance;

impl RoutingDistance for ChordDistance {
    fn apply(&self, _local: Address, target: Key, cur: Address, cur_range: &Range) -> f64 {
        if cur_range.is_full() {
            return Key::from_address(cur).distance_to(target) as f64;
        }
        if cur_range.contains(target) {
            return 0.0;
        }
        cur_range.r_key().distance_to(target) as f64
    }
}

/// Chord-like classification: entries bucket by the length of the key
/// prefix they share with the owner (coarse far slots, fine near slots).
/// The entry whose rank-0 claim starts exactly where the owner's rank-0
/// claim ends is the ring successor: a uniquely-critical slot whose
/// acceptance forces a full maintenance pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChordPolicy {
    distance: ChordDistance,
}

impl ChordPolicy {
    pub fn new() -> Self {
        Self {
            distance: ChordDistance,
        }
    }
}

impl RoutingPolicy for ChordPolicy {
    fn flavorize(&self, owner: &RoutingEntry, entry: &RoutingEntry) -> Flavor {
        let own_rank0 = owner.ranges().iter().filter(|r| r.rank() == 0);
        for own_range in own_rank0 {
            let successor = entry
                .ranges()
                .iter()
                .filter(|r| r.rank() == 0)
                .any(|r| r.l_key() == own_range.r_key());
            if successor {
                return Flavor::forced(SUCCESSOR_FLAVOR_ID);
            }
        }
        Flavor::new(common_prefix_len(owner.node_id(), entry.node_id(), BITNESS))
    }

    fn routing_distance(&self) -> &dyn RoutingDistance {
        &self.distance
    }
}
