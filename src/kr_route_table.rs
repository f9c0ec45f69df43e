use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::kr_entry::RoutingEntry;
use crate::kr_interface::{Address, LIVENESS_DEFAULT};

// ============================================================================
// Flavor
// ============================================================================

/// Classification bucket for route-table slots, e.g. by address-prefix
/// distance from the owner. Bounds how many redundant entries of a given
/// relationship to the owner are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flavor {
    id: u32,
    force_reflavor: bool,
}

impl Flavor {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            force_reflavor: false,
        }
    }

    /// Flavor whose acceptance demands an immediate full maintenance pass.
    /// Used for uniquely-critical peers such as the ring successor.
    pub fn forced(id: u32) -> Self {
        Self {
            id,
            force_reflavor: true,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn force_reflavor(&self) -> bool {
        self.force_reflavor
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force_reflavor {
            write!(f, "flavor:{}!", self.id)
        } else {
            write!(f, "flavor:{}", self.id)
        }
    }
}

// ============================================================================
// RouteTable
// ============================================================================

/// Tri-index route store: flavor -> ordered addresses, address -> flavor,
/// address -> entry.
///
/// Invariants: an address lives in exactly one flavor bucket or none, and
/// the address->flavor and address->route key sets are identical at all
/// times. All operations are O(log n) over sorted maps.
#[derive(Debug, Default)]
pub struct RouteTable {
    flavor_to_addrs: BTreeMap<Flavor, BTreeSet<Address>>,
    addr_to_flavor: BTreeMap<Address, Flavor>,
    addr_to_route: BTreeMap<Address, RoutingEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for its address under `flavor`. If the
    /// address already belongs to a different flavor it is removed from the
    /// old bucket first, so no duplicate membership can arise.
    pub fn add(&mut self, flavor: Flavor, entry: RoutingEntry) {
        let address = entry.address();

        if let Some(old) = self.addr_to_flavor.get(&address).copied() {
            if old != flavor {
                if let Some(bucket) = self.flavor_to_addrs.get_mut(&old) {
                    bucket.remove(&address);
                }
            }
        }

        self.flavor_to_addrs.entry(flavor).or_default().insert(address);
        self.addr_to_flavor.insert(address, flavor);
        self.addr_to_route.insert(address, entry);
    }

    /// Remove the address from all indices. The emptied flavor bucket is
    /// kept, so `flavor_count(true)` still sees it.
    pub fn remove(&mut self, address: &Address) -> Option<RoutingEntry> {
        let flavor = self.addr_to_flavor.remove(address)?;
        if let Some(bucket) = self.flavor_to_addrs.get_mut(&flavor) {
            bucket.remove(address);
        }
        self.addr_to_route.remove(address)
    }

    pub fn route(&self, address: &Address) -> Option<&RoutingEntry> {
        self.addr_to_route.get(address)
    }

    pub fn flavor(&self, address: &Address) -> Option<Flavor> {
        self.addr_to_flavor.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.addr_to_route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addr_to_route.is_empty()
    }

    /// Occupancy of one flavor bucket.
    pub fn flavor_len(&self, flavor: Flavor) -> usize {
        self.flavor_to_addrs.get(&flavor).map_or(0, |b| b.len())
    }

    /// Number of flavor buckets, optionally counting emptied ones.
    pub fn flavor_count(&self, include_empty: bool) -> usize {
        if include_empty {
            self.flavor_to_addrs.len()
        } else {
            self.flavor_to_addrs.values().filter(|b| !b.is_empty()).count()
        }
    }

    /// Snapshot of all stored entries, in address order.
    pub fn routes(&self) -> Vec<RoutingEntry> {
        self.addr_to_route.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &RoutingEntry)> {
        self.addr_to_route.iter()
    }

    /// Smallest stored liveness; the default on an empty table.
    pub fn min_liveness(&self) -> f64 {
        if self.addr_to_route.is_empty() {
            return LIVENESS_DEFAULT;
        }
        self.addr_to_route
            .values()
            .map(|e| e.liveness())
            .fold(f64::INFINITY, f64::min)
    }

    /// Floored mean liveness, clamped at the default ceiling. The clamp is
    /// intentional: the "safe route" filter counts freshly seeded tables as
    /// average rather than above it.
    pub fn avg_liveness(&self) -> f64 {
        if self.addr_to_route.is_empty() {
            return LIVENESS_DEFAULT;
        }
        let sum: f64 = self.addr_to_route.values().map(|e| e.liveness()).sum();
        let mean = sum / self.addr_to_route.len() as f64;
        mean.floor().min(LIVENESS_DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kr_interface::StampClock;
    use crate::kr_key::Key;
    use crate::kr_range::Range;

    fn entry(address: Address, clock: &StampClock) -> RoutingEntry {
        RoutingEntry::new(
            Key::from_address(address),
            address,
            vec![Range::new(Key::from_address(address), Key::from_address(address + 100), 0)],
            clock,
        )
    }

    #[test]
    fn test_add_then_remove_restores_absence() {
        let clock = StampClock::new();
        let mut table = RouteTable::new();
        let flavor = Flavor::new(1);

        table.add(flavor, entry(10, &clock));
        table.add(flavor, entry(20, &clock));
        assert_eq!(table.len(), 2);
        assert_eq!(table.flavor_len(flavor), 2);
        assert_eq!(table.flavor(&10), Some(flavor));

        let removed = table.remove(&10).unwrap();
        assert_eq!(removed.address(), 10);
        assert!(table.route(&10).is_none());
        assert!(table.flavor(&10).is_none());
        assert_eq!(table.flavor_len(flavor), 1);

        // removing the last member leaves an empty bucket behind
        table.remove(&20);
        assert_eq!(table.flavor_count(false), 0);
        assert_eq!(table.flavor_count(true), 1);
    }

    #[test]
    fn test_reflavor_moves_address_between_buckets() {
        let clock = StampClock::new();
        let mut table = RouteTable::new();
        let a = Flavor::new(1);
        let b = Flavor::new(2);

        table.add(a, entry(10, &clock));
        table.add(b, entry(10, &clock));

        // single membership: the old bucket lost the address
        assert_eq!(table.len(), 1);
        assert_eq!(table.flavor_len(a), 0);
        assert_eq!(table.flavor_len(b), 1);
        assert_eq!(table.flavor(&10), Some(b));
    }

    #[test]
    fn test_add_replaces_entry_in_place() {
        let clock = StampClock::new();
        let mut table = RouteTable::new();
        let flavor = Flavor::new(1);

        table.add(flavor, entry(10, &clock));
        let newer = entry(10, &clock).with_entry_count(9);
        table.add(flavor, newer.clone());

        assert_eq!(table.len(), 1);
        assert_eq!(table.route(&10).unwrap().entry_count(), 9);
        assert_eq!(table.route(&10).unwrap().stamp(), newer.stamp());
    }

    #[test]
    fn test_index_key_sets_stay_identical() {
        let clock = StampClock::new();
        let mut table = RouteTable::new();

        for address in [5u64, 3, 9, 7] {
            table.add(Flavor::new((address % 2) as u32), entry(address, &clock));
        }
        table.remove(&3);
        table.remove(&42); // absent: no-op

        let route_keys: Vec<Address> = table.iter().map(|(a, _)| *a).collect();
        let flavor_keys: Vec<Address> = table.addr_to_flavor.keys().copied().collect();
        assert_eq!(route_keys, flavor_keys);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_liveness_aggregates() {
        let clock = StampClock::new();
        let mut table = RouteTable::new();

        // empty table reports defaults
        assert_eq!(table.min_liveness(), LIVENESS_DEFAULT);
        assert_eq!(table.avg_liveness(), LIVENESS_DEFAULT);

        table.add(Flavor::new(1), entry(10, &clock).with_liveness(40.0));
        table.add(Flavor::new(1), entry(20, &clock).with_liveness(61.5));

        assert_eq!(table.min_liveness(), 40.0);
        // natural mean 50.75 floors to 50
        assert_eq!(table.avg_liveness(), 50.0);

        // the average is clamped at the default ceiling
        table.add(Flavor::new(1), entry(30, &clock).with_liveness(500.0));
        assert_eq!(table.avg_liveness(), LIVENESS_DEFAULT);
    }
}
