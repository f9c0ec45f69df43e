use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::kr_entry::RoutingEntry;
use crate::kr_interface::{
    Address, Env, Event, RouteStats, RoutingError, RoutingPolicy, StampClock, LIVENESS_MIN,
    MAINTENANCE_THRESHOLD, REDUNDANCY_DEFAULT,
};
use crate::kr_key::Key;
use crate::kr_range::Range;
use crate::kr_route_table::{Flavor, RouteTable};

// ============================================================================
// RoutingService
// ============================================================================

/// The routing state machine: decides which incoming entries to accept,
/// applies liveness transitions, enforces per-flavor redundancy bounds and
/// answers lookup / neighbor / replica queries by distance ordering.
///
/// The protocol specifics (flavor classification, base distance metric) come
/// from the injected `RoutingPolicy`; topology and cost come from the
/// injected `Env`. One service instance belongs to exactly one node.
pub struct RoutingService<P: RoutingPolicy, E: Env> {
    policy: P,
    env: E,
    clock: Rc<StampClock>,
    table: RouteTable,
    own_route: Option<RoutingEntry>,
    redundancy: f64,
}

impl<P: RoutingPolicy, E: Env> RoutingService<P, E> {
    pub fn new(policy: P, env: E, clock: Rc<StampClock>) -> Self {
        Self {
            policy,
            env,
            clock,
            table: RouteTable::new(),
            own_route: None,
            redundancy: REDUNDANCY_DEFAULT,
        }
    }

    /// The owning node's entry. Using the service before this is set is a
    /// programming error.
    pub fn own_route(&self) -> Result<&RoutingEntry, RoutingError> {
        self.own_route.as_ref().ok_or(RoutingError::OwnerNotSet)
    }

    /// Set or refresh the owner's entry. Once set, the address is pinned:
    /// handing in an entry for a different address is a programming error.
    /// Refreshes merge through the stamp rule like any other update.
    pub fn update_own_route(&mut self, entry: RoutingEntry) -> Result<(), RoutingError> {
        match &self.own_route {
            None => {
                self.own_route = Some(entry);
                Ok(())
            }
            Some(own) => {
                if own.address() != entry.address() {
                    return Err(RoutingError::OwnerAddressMismatch {
                        expected: own.address(),
                        actual: entry.address(),
                    });
                }
                self.own_route = Some(own.update(&entry));
                Ok(())
            }
        }
    }

    /// Freshly stamped copy of the own route carrying the current route
    /// count, suitable for handing to other nodes. The stamped copy also
    /// becomes the stored own route, so later foreign echoes of older
    /// publications lose the stamp comparison.
    pub fn publish_own_route(&mut self) -> Result<RoutingEntry, RoutingError> {
        let own = self.own_route.clone().ok_or(RoutingError::OwnerNotSet)?;
        let published = own
            .with_entry_count(self.table.len())
            .reissued(&self.clock);
        self.own_route = Some(published.clone());
        Ok(published)
    }

    pub fn redundancy(&self) -> f64 {
        self.redundancy
    }

    /// Set the per-flavor redundancy target. Fractional values are
    /// interpreted via floor/ceil at the policy points that use them.
    pub fn set_redundancy(&mut self, redundancy: f64) {
        self.redundancy = redundancy;
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn get_stats(&self) -> RouteStats {
        let flavors = self.table.flavor_count(false);
        let redundancy_ratio = if flavors > 0 {
            self.table.len() as f64 / flavors as f64
        } else {
            0.0
        };
        RouteStats {
            route_count: self.table.len(),
            redundancy_ratio,
        }
    }

    /// The owner's best range for `key` at or below `max_rank`.
    pub fn get_range(&self, key: Key, max_rank: u32) -> Result<Option<Range>, RoutingError> {
        Ok(self.own_route()?.range_for(key, max_rank))
    }

    // ------------------------------------------------------------------
    // update
    // ------------------------------------------------------------------

    /// Feed a batch of foreign entries observed under `event` into the
    /// table. Stale copies are ignored via the stamp rule; admission of new
    /// addresses is controlled per flavor; a full maintenance pass runs
    /// afterwards when a forced flavor was inserted or the soft size
    /// threshold is crossed.
    pub fn update(&mut self, event: Event, entries: &[RoutingEntry]) -> Result<(), RoutingError> {
        let own = self.own_route.clone().ok_or(RoutingError::OwnerNotSet)?;
        let mut force_reflavor = false;

        for foreign in entries {
            let address = foreign.address();
            if address == own.address() {
                continue;
            }

            let flavor = self.policy.flavorize(&own, foreign);

            if let Some(cur) = self.table.route(&address).cloned() {
                let Some(cur_flavor) = self.table.flavor(&address) else {
                    continue;
                };
                if cur_flavor == flavor {
                    let next = cur.update(foreign).with_event(event);
                    if next.liveness() <= LIVENESS_MIN {
                        log::debug!(
                            "evicting {} (liveness {:.3} at floor)",
                            address,
                            next.liveness()
                        );
                        self.table.remove(&address);
                    } else {
                        self.table.add(flavor, next);
                    }
                } else {
                    // flavor changed: evict the old slot, readmit the entry
                    // under the new flavor with a fresh stamp
                    self.table.remove(&address);
                    let next = cur.update(foreign).with_event(event).reissued(&self.clock);
                    if next.liveness() > LIVENESS_MIN {
                        force_reflavor |= flavor.force_reflavor();
                        self.table.add(flavor, next);
                    }
                }
            } else {
                let seed = self.env.seed_link(own.address(), address);
                let next = foreign.with_event(event);
                let occupancy = self.table.flavor_len(flavor);
                // a full bucket only admits candidates at least as live as
                // the weakest stored entry; seed links always get in
                let rejected = !seed
                    && occupancy > self.redundancy.floor() as usize
                    && next.liveness() < self.table.min_liveness();
                if !rejected && next.liveness() > LIVENESS_MIN {
                    force_reflavor |= flavor.force_reflavor();
                    self.table.add(flavor, next);
                }
            }
        }

        if force_reflavor || self.requires_cleanup() {
            self.full_reflavor(&own);
        }
        Ok(())
    }

    /// Soft maintenance trigger: the table outgrew the redundancy target by
    /// the golden-ratio slack.
    fn requires_cleanup(&self) -> bool {
        let flavors = self.table.flavor_count(false);
        self.table.len() as f64 > flavors as f64 * self.redundancy * MAINTENANCE_THRESHOLD
    }

    /// Recompute every entry's flavor and trim to the redundancy bounds:
    /// at most ceil(redundancy) per flavor and ceil(flavor_count *
    /// redundancy) globally. Least-live entries are evicted first.
    fn full_reflavor(&mut self, own: &RoutingEntry) {
        let mut routes = self.table.routes();
        routes.sort_by(|a, b| {
            b.liveness()
                .partial_cmp(&a.liveness())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.address().cmp(&b.address()))
        });

        let old_flavors: BTreeMap<Address, Flavor> = routes
            .iter()
            .filter_map(|e| self.table.flavor(&e.address()).map(|f| (e.address(), f)))
            .collect();

        let flavors: BTreeSet<Flavor> = routes
            .iter()
            .map(|e| self.policy.flavorize(own, e))
            .collect();
        let total_max = (flavors.len() as f64 * self.redundancy).ceil() as usize;
        let keep_max = self.redundancy.ceil() as usize;

        let before = self.table.len();
        self.table = RouteTable::new();
        let mut kept = 0usize;

        for entry in routes {
            let flavor = self.policy.flavorize(own, &entry);
            let occupancy = self.table.flavor_len(flavor);
            let keep = occupancy < keep_max && kept < total_max;
            if !keep {
                continue;
            }
            let changed = old_flavors.get(&entry.address()) != Some(&flavor);
            let entry = if changed {
                entry.reissued(&self.clock)
            } else {
                entry
            };
            self.table.add(flavor, entry);
            kept += 1;
        }

        if kept < before {
            log::debug!(
                "reflavor trimmed {} -> {} routes across {} flavors",
                before,
                kept,
                flavors.len()
            );
        }
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Composed routing distance: the policy's base metric over the entry's
    /// best-matching range, scaled by 2^penalty from the environment. The
    /// exponential composition makes environment cost dominate
    /// multiplicatively, which keeps simulation results reproducible.
    pub fn routing_distance(&self, entry: &RoutingEntry, key: Key) -> Result<f64, RoutingError> {
        let own = self.own_route()?;
        Ok(self.distance_from(own.address(), entry, key))
    }

    fn distance_from(&self, local: Address, entry: &RoutingEntry, key: Key) -> f64 {
        let metric = self.policy.routing_distance();
        let range = entry.select_range(local, key, metric);
        let base = metric.apply(local, key, entry.address(), &range);
        let penalty = self.env.apply(local, key, entry.address(), &range);
        base * 2f64.powf(penalty)
    }

    /// Up to `num` entries ordered by increasing routing distance to `key`
    /// (0 = unlimited). With `safe`, stored entries below the table's
    /// average liveness are filtered out first. Seed-link addresses are
    /// always part of the answer: stored ones bypass the safe filter,
    /// un-stored ones are added as stub entries.
    pub fn local_lookup(
        &self,
        key: Key,
        num: usize,
        safe: bool,
    ) -> Result<Vec<RoutingEntry>, RoutingError> {
        let own = self.own_route.clone().ok_or(RoutingError::OwnerNotSet)?;

        let mut entries = self.table.routes();
        if safe {
            let avg = self.table.avg_liveness();
            entries.retain(|e| e.liveness() >= avg);
        }

        for address in self.env.seed_links(own.address()) {
            if address == own.address() {
                continue;
            }
            if entries.iter().any(|e| e.address() == address) {
                continue;
            }
            match self.table.route(&address) {
                // stored seed link that the safe filter dropped: reachable anyway
                Some(stored) => entries.push(stored.clone()),
                None => entries.push(RoutingEntry::stub(address)),
            }
        }

        let mut entries = self.order_by_distance(own.address(), entries, key);
        if num > 0 {
            entries.truncate(num);
        }
        Ok(entries)
    }

    /// Entries whose rank-0 range touches the owner's rank-0 range, plus
    /// un-stored seed links, ordered by distance to the owner's key.
    pub fn neighbor_set(&self, num: usize) -> Result<Vec<RoutingEntry>, RoutingError> {
        let own = self.own_route.clone().ok_or(RoutingError::OwnerNotSet)?;
        let own_ranges: Vec<Range> = own
            .ranges()
            .iter()
            .filter(|r| r.rank() == 0)
            .copied()
            .collect();

        let adjacent = |entry: &RoutingEntry| {
            entry
                .ranges()
                .iter()
                .filter(|r| r.rank() == 0)
                .any(|r| {
                    own_ranges
                        .iter()
                        .any(|o| r.l_key() == o.r_key() || o.l_key() == r.r_key())
                })
        };

        let mut entries: Vec<RoutingEntry> =
            self.table.routes().into_iter().filter(|e| adjacent(e)).collect();

        for address in self.env.seed_links(own.address()) {
            if address == own.address() {
                continue;
            }
            if self.table.route(&address).is_none()
                && !entries.iter().any(|e| e.address() == address)
            {
                entries.push(RoutingEntry::stub(address));
            }
        }

        let mut entries = self.order_by_distance(own.address(), entries, own.node_id());
        if num > 0 {
            entries.truncate(num);
        }
        Ok(entries)
    }

    /// Entries claiming a range at or below `max_rank` that contains `key`,
    /// plus un-stored seed links (stubs claim the whole ring, so they always
    /// qualify), ordered by distance to `key`.
    pub fn replica_set(
        &self,
        key: Key,
        max_rank: u32,
    ) -> Result<Vec<RoutingEntry>, RoutingError> {
        let own = self.own_route.clone().ok_or(RoutingError::OwnerNotSet)?;

        let mut entries: Vec<RoutingEntry> = self
            .table
            .routes()
            .into_iter()
            .filter(|e| e.is_replica_for(key, max_rank))
            .collect();

        for address in self.env.seed_links(own.address()) {
            if address == own.address() {
                continue;
            }
            if self.table.route(&address).is_none()
                && !entries.iter().any(|e| e.address() == address)
            {
                let stub = RoutingEntry::stub(address);
                if stub.is_replica_for(key, max_rank) {
                    entries.push(stub);
                }
            }
        }

        Ok(self.order_by_distance(own.address(), entries, key))
    }

    fn order_by_distance(
        &self,
        local: Address,
        entries: Vec<RoutingEntry>,
        key: Key,
    ) -> Vec<RoutingEntry> {
        let mut scored: Vec<(f64, RoutingEntry)> = entries
            .into_iter()
            .map(|e| (self.distance_from(local, &e, key), e))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.address().cmp(&b.1.address()))
        });
        scored.into_iter().map(|(_, e)| e).collect()
    }

    // ------------------------------------------------------------------
    // failure bookkeeping
    // ------------------------------------------------------------------

    /// Record a failed contact. A report about an unknown peer is silently
    /// tolerated; a known peer takes the multiplicative penalty and is
    /// evicted at the liveness floor.
    pub fn register_communication_failure(&mut self, address: Address) {
        let Some(cur) = self.table.route(&address).cloned() else {
            return;
        };
        let Some(flavor) = self.table.flavor(&address) else {
            return;
        };
        let next = cur.with_event(Event::ConnectionFailed);
        if next.liveness() <= LIVENESS_MIN {
            log::debug!(
                "evicting {} after failed contact (liveness {:.3})",
                address,
                next.liveness()
            );
            self.table.remove(&address);
        } else {
            self.table.add(flavor, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kr_chord::ChordDistance;
    use crate::kr_interface::{RoutingDistance, LIVENESS_COMM_FAIL_PENALTY, LIVENESS_DEFAULT};
    use std::cell::Cell;

    // ------------------------------------------------------------------
    // test collaborators
    // ------------------------------------------------------------------

    /// Env with a fixed seed-link list and zero penalty.
    struct TestEnv {
        seeds: Vec<Address>,
    }

    impl TestEnv {
        fn none() -> Self {
            Self { seeds: Vec::new() }
        }
    }

    impl Env for TestEnv {
        fn seed_links(&self, of: Address) -> Vec<Address> {
            self.seeds.iter().copied().filter(|a| *a != of).collect()
        }

        fn seed_link(&self, from: Address, into: Address) -> bool {
            from != into && self.seeds.contains(&into)
        }

        fn apply(&self, _local: Address, _target: Key, _cur: Address, _range: &Range) -> f64 {
            0.0
        }
    }

    /// Policy bucketing addresses by the hundreds digit; one flavor id can
    /// be marked as forced.
    struct BucketPolicy {
        distance: ChordDistance,
        forced_id: Option<u32>,
    }

    impl BucketPolicy {
        fn new() -> Self {
            Self {
                distance: ChordDistance,
                forced_id: None,
            }
        }

        fn with_forced(forced_id: u32) -> Self {
            Self {
                distance: ChordDistance,
                forced_id: Some(forced_id),
            }
        }
    }

    impl RoutingPolicy for BucketPolicy {
        fn flavorize(&self, _owner: &RoutingEntry, entry: &RoutingEntry) -> Flavor {
            let id = (entry.address() / 100) as u32;
            if self.forced_id == Some(id) {
                Flavor::forced(id)
            } else {
                Flavor::new(id)
            }
        }

        fn routing_distance(&self) -> &dyn RoutingDistance {
            &self.distance
        }
    }

    fn service(
        env: TestEnv,
        policy: BucketPolicy,
    ) -> (RoutingService<BucketPolicy, TestEnv>, Rc<StampClock>) {
        let clock = Rc::new(StampClock::new());
        let mut service = RoutingService::new(policy, env, Rc::clone(&clock));
        let own = RoutingEntry::new(
            Key::new(1),
            1,
            vec![Range::new(Key::new(0), Key::new(1 << 32), 0)],
            &clock,
        );
        service.update_own_route(own).unwrap();
        (service, clock)
    }

    fn foreign(address: Address, clock: &StampClock) -> RoutingEntry {
        RoutingEntry::new(
            Key::from_address(address),
            address,
            vec![Range::new(
                Key::from_address(address),
                Key::from_address(address + 50),
                0,
            )],
            clock,
        )
    }

    // ------------------------------------------------------------------
    // preconditions
    // ------------------------------------------------------------------

    #[test]
    fn test_operations_require_own_route() {
        let clock = Rc::new(StampClock::new());
        let mut service =
            RoutingService::new(BucketPolicy::new(), TestEnv::none(), Rc::clone(&clock));

        assert_eq!(service.own_route().unwrap_err(), RoutingError::OwnerNotSet);
        assert_eq!(
            service.update(Event::Discovered, &[]).unwrap_err(),
            RoutingError::OwnerNotSet
        );
        assert_eq!(
            service.local_lookup(Key::ZERO, 0, false).unwrap_err(),
            RoutingError::OwnerNotSet
        );
    }

    #[test]
    fn test_own_route_address_is_pinned() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        let intruder = foreign(99, &clock);
        assert_eq!(
            service.update_own_route(intruder).unwrap_err(),
            RoutingError::OwnerAddressMismatch {
                expected: 1,
                actual: 99
            }
        );
    }

    // ------------------------------------------------------------------
    // update / admission / eviction
    // ------------------------------------------------------------------

    #[test]
    fn test_update_ignores_own_address_and_admits_foreign() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        let own_echo = foreign(1, &clock);
        let peer = foreign(150, &clock);
        service
            .update(Event::Discovered, &[own_echo, peer])
            .unwrap();

        assert_eq!(service.table().len(), 1);
        let stored = service.table().route(&150).unwrap();
        assert_eq!(stored.liveness(), LIVENESS_DEFAULT + 1.0);
    }

    #[test]
    fn test_update_is_idempotent_per_stamp() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        let peer = foreign(150, &clock).with_entry_count(4);
        service.update(Event::Discovered, &[peer.clone()]).unwrap();
        let after_once = service.table().route(&150).unwrap().clone();

        // redelivery of the same stamp merges nothing; only the liveness
        // event is applied again
        service.update(Event::Discovered, &[peer.clone()]).unwrap();
        let after_twice = service.table().route(&150).unwrap().clone();
        assert_eq!(after_twice.stamp(), after_once.stamp());
        assert_eq!(after_twice.ranges(), after_once.ranges());
        assert_eq!(after_twice.entry_count(), after_once.entry_count());

        // a newer copy of the same peer does merge
        let newer = peer.with_ranges(vec![Range::full(1)]).reissued(&clock);
        service.update(Event::Discovered, &[newer.clone()]).unwrap();
        let merged = service.table().route(&150).unwrap();
        assert_eq!(merged.stamp(), newer.stamp());
        assert!(merged.ranges()[0].is_full());
    }

    #[test]
    fn test_admission_favors_livelier_candidate_when_bucket_full() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());
        service.set_redundancy(2.5);

        // flavor 1 fills past floor(redundancy) = 2
        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(120, &clock), foreign(130, &clock)],
            )
            .unwrap();
        assert_eq!(service.table().len(), 3);

        // a candidate weaker than the weakest stored entry is rejected:
        // Left arrives at liveness 1.0, below min_liveness 56
        service.update(Event::Left, &[foreign(140, &clock)]).unwrap();
        assert!(service.table().route(&140).is_none());

        // an equally live candidate is admitted (trimming happens later)
        service
            .update(Event::Discovered, &[foreign(150, &clock)])
            .unwrap();
        assert!(service.table().route(&150).is_some());
    }

    #[test]
    fn test_seed_links_bypass_admission_control() {
        let (mut service, clock) = service(
            TestEnv { seeds: vec![140] },
            BucketPolicy::new(),
        );
        service.set_redundancy(2.5);

        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(120, &clock), foreign(130, &clock)],
            )
            .unwrap();

        // same weak-candidate shape as above, but 140 is a seed link
        service.update(Event::Left, &[foreign(140, &clock)]).unwrap();
        assert!(service.table().route(&140).is_some());
    }

    #[test]
    fn test_eviction_one_failure_from_floor() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        let peer = foreign(150, &clock);
        service.update(Event::Discovered, &[peer]).unwrap();

        // pin the liveness exactly one failed contact above the floor
        let flavor = service.table.flavor(&150).unwrap();
        let boundary = service
            .table
            .route(&150)
            .unwrap()
            .clone()
            .with_liveness(LIVENESS_MIN / LIVENESS_COMM_FAIL_PENALTY);
        service.table.add(flavor, boundary);

        service.register_communication_failure(150);
        assert!(service.table().route(&150).is_none());

        // reporting an unknown peer is a tolerated no-op
        service.register_communication_failure(9999);
    }

    #[test]
    fn test_flavor_change_reinserts_with_fresh_stamp() {
        // policy whose bucket granularity can be flipped mid-test, standing
        // in for a classification that shifts as the owner's view changes
        struct SwitchPolicy {
            distance: ChordDistance,
            tens: Cell<bool>,
        }
        impl RoutingPolicy for SwitchPolicy {
            fn flavorize(&self, _owner: &RoutingEntry, entry: &RoutingEntry) -> Flavor {
                let div = if self.tens.get() { 10 } else { 100 };
                Flavor::new((entry.address() / div) as u32)
            }
            fn routing_distance(&self) -> &dyn RoutingDistance {
                &self.distance
            }
        }

        let clock = Rc::new(StampClock::new());
        let policy = SwitchPolicy {
            distance: ChordDistance,
            tens: Cell::new(false),
        };
        let mut service = RoutingService::new(policy, TestEnv::none(), Rc::clone(&clock));
        service
            .update_own_route(RoutingEntry::new(
                Key::new(1),
                1,
                vec![Range::new(Key::new(0), Key::new(1 << 32), 0)],
                &clock,
            ))
            .unwrap();

        let peer = foreign(150, &clock);
        service.update(Event::Discovered, &[peer.clone()]).unwrap();
        let stamp_before = service.table().route(&150).unwrap().stamp();
        assert_eq!(service.table().flavor(&150), Some(Flavor::new(1)));

        // reclassification evicts the old slot and readmits with a new stamp
        service.policy.tens.set(true);
        service.update(Event::Discovered, &[peer]).unwrap();

        let reinserted = service.table().route(&150).unwrap();
        assert!(reinserted.stamp() > stamp_before);
        assert_eq!(service.table().flavor(&150), Some(Flavor::new(15)));
        assert_eq!(service.table().len(), 1);
    }

    // ------------------------------------------------------------------
    // redundancy maintenance
    // ------------------------------------------------------------------

    #[test]
    fn test_forced_flavor_triggers_trim_to_redundancy_bounds() {
        // flavors {1: 3 candidates, 2: 1 candidate}, redundancy 1.75:
        // after maintenance flavor 1 keeps ceil(1.75) = 2, flavor 2 keeps 1
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::with_forced(2));
        service.set_redundancy(1.75);

        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(120, &clock), foreign(130, &clock)],
            )
            .unwrap();
        assert_eq!(service.table().len(), 3);

        // the flavor-2 insertion is forced and runs the full pass
        service
            .update(Event::Discovered, &[foreign(210, &clock)])
            .unwrap();

        assert_eq!(service.table().flavor_len(Flavor::new(1)), 2);
        assert_eq!(service.table().flavor_len(Flavor::forced(2)), 1);
        assert_eq!(service.table().len(), 3);
    }

    #[test]
    fn test_redundancy_invariant_after_update_storm() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::with_forced(9));
        service.set_redundancy(2.5);

        // 5 flavors x 6 candidates, then one forced insert to run maintenance
        let mut batch = Vec::new();
        for flavor in 1..=5u64 {
            for i in 0..6u64 {
                batch.push(foreign(flavor * 100 + i * 10, &clock));
            }
        }
        service.update(Event::Discovered, &batch).unwrap();
        service.update(Event::Discovered, &[foreign(910, &clock)]).unwrap();

        let ceil = service.redundancy().ceil() as usize;
        for flavor in 1..=5u32 {
            assert!(service.table().flavor_len(Flavor::new(flavor)) <= ceil);
        }
        let flavors = service.table().flavor_count(false);
        let total_max = (flavors as f64 * service.redundancy()).ceil() as usize;
        assert!(service.table().len() <= total_max);
    }

    #[test]
    fn test_least_live_evicted_first() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::with_forced(2));
        service.set_redundancy(1.9);

        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(120, &clock), foreign(130, &clock)],
            )
            .unwrap();
        // 120 takes penalties: it is now the weakest of flavor 1
        service.register_communication_failure(120);
        service.register_communication_failure(120);

        // forced insert runs maintenance; flavor 1 shrinks to ceil(1.9) = 2
        service.update(Event::Discovered, &[foreign(210, &clock)]).unwrap();

        assert!(service.table().route(&110).is_some());
        assert!(service.table().route(&130).is_some());
        assert!(service.table().route(&120).is_none());
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    #[test]
    fn test_local_lookup_on_empty_table_returns_seed_stubs_by_distance() {
        let (service, _clock) = service(
            TestEnv {
                seeds: vec![200, 100],
            },
            BucketPolicy::new(),
        );

        let found = service.local_lookup(Key::new(150), 0, false).unwrap();
        assert_eq!(found.len(), 2);
        // clockwise distance to 150: node 100 is 50 away, node 200 wraps
        assert_eq!(found[0].address(), 100);
        assert_eq!(found[1].address(), 200);
        assert!(found.iter().all(|e| e.is_stub()));
    }

    #[test]
    fn test_local_lookup_orders_limits_and_filters() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        // ranges [a, a+50) at rank 0; target 315 is inside 310's claim
        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(310, &clock), foreign(500, &clock)],
            )
            .unwrap();

        let found = service.local_lookup(Key::new(315), 0, false).unwrap();
        assert_eq!(found[0].address(), 310);

        let found = service.local_lookup(Key::new(315), 2, false).unwrap();
        assert_eq!(found.len(), 2);

        // drop 110 below the average and require safe routes
        for _ in 0..10 {
            service.register_communication_failure(110);
        }
        let found = service.local_lookup(Key::new(315), 0, true).unwrap();
        assert!(found.iter().all(|e| e.address() != 110));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_neighbor_set_picks_adjacent_ranges() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());
        // own rank-0 range is [0, 1<<32)

        let successor = RoutingEntry::new(
            Key::new(1 << 32),
            150,
            vec![Range::new(Key::new(1 << 32), Key::new(1 << 33), 0)],
            &clock,
        );
        let predecessor = RoutingEntry::new(
            Key::new(u64::MAX - 100),
            160,
            vec![Range::new(Key::new(u64::MAX - 100), Key::new(0), 0)],
            &clock,
        );
        let unrelated = foreign(700, &clock);

        service
            .update(
                Event::Discovered,
                &[successor, predecessor, unrelated],
            )
            .unwrap();

        let neighbors = service.neighbor_set(0).unwrap();
        let addrs: Vec<Address> = neighbors.iter().map(|e| e.address()).collect();
        assert!(addrs.contains(&150));
        assert!(addrs.contains(&160));
        assert!(!addrs.contains(&700));
    }

    #[test]
    fn test_replica_set_filters_by_rank_and_includes_seeds() {
        let (mut service, clock) = service(
            TestEnv { seeds: vec![999] },
            BucketPolicy::new(),
        );

        let replica = RoutingEntry::new(
            Key::new(100),
            150,
            vec![Range::new(Key::new(100), Key::new(200), 1)],
            &clock,
        );
        let deep_replica = RoutingEntry::new(
            Key::new(100),
            160,
            vec![Range::new(Key::new(100), Key::new(200), 3)],
            &clock,
        );
        service
            .update(Event::Discovered, &[replica, deep_replica])
            .unwrap();

        let set = service.replica_set(Key::new(150), 1).unwrap();
        let addrs: Vec<Address> = set.iter().map(|e| e.address()).collect();
        // rank-3 claim is beyond max_rank 1; the seed stub always qualifies
        assert!(addrs.contains(&150));
        assert!(!addrs.contains(&160));
        assert!(addrs.contains(&999));
    }

    // ------------------------------------------------------------------
    // telemetry / own route
    // ------------------------------------------------------------------

    #[test]
    fn test_stats_and_publish() {
        let (mut service, clock) = service(TestEnv::none(), BucketPolicy::new());

        let empty = service.get_stats();
        assert_eq!(empty.route_count, 0);
        assert_eq!(empty.redundancy_ratio, 0.0);

        service
            .update(
                Event::Discovered,
                &[foreign(110, &clock), foreign(120, &clock), foreign(210, &clock)],
            )
            .unwrap();

        let stats = service.get_stats();
        assert_eq!(stats.route_count, 3);
        assert!((stats.redundancy_ratio - 1.5).abs() < 1e-12);

        let published = service.publish_own_route().unwrap();
        assert_eq!(published.entry_count(), 3);
        assert_eq!(service.own_route().unwrap().stamp(), published.stamp());
    }

    #[test]
    fn test_get_range_delegates_to_own_route() {
        let (service, _clock) = service(TestEnv::none(), BucketPolicy::new());

        let range = service.get_range(Key::new(42), 0).unwrap().unwrap();
        assert!(range.contains(Key::new(42)));
        assert_eq!(range.rank(), 0);
    }
}
