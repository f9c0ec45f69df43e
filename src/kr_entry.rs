use crate::kr_interface::{
    Address, Event, RoutingDistance, Stamp, StampClock, LIVENESS_COMM_FAIL_PENALTY,
    LIVENESS_DEFAULT, LIVENESS_HEARTBEAT_REWARD, LIVENESS_LEFT,
};
use crate::kr_key::Key;
use crate::kr_range::Range;

// ============================================================================
// RoutingEntry
// ============================================================================

/// Versioned, liveness-scored handle to a remote node, plus the set of key
/// ranges that node claims responsibility for.
///
/// Entries are immutable values: every transition (`with_event`, `update`,
/// `reissued`) returns a new instance and the route table stores the latest
/// instance per address. Each node's view is a local copy; there is no
/// shared mutable ownership across nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingEntry {
    node_id: Key,
    address: Address,
    ranges: Vec<Range>,
    stamp: Stamp,
    entry_count: usize,
    liveness: f64,
}

impl RoutingEntry {
    pub fn new(node_id: Key, address: Address, ranges: Vec<Range>, clock: &StampClock) -> Self {
        Self {
            node_id,
            address,
            ranges,
            stamp: clock.next(),
            entry_count: 0,
            liveness: LIVENESS_DEFAULT,
        }
    }

    /// Synthetic entry for a seed-link address that is not stored in the
    /// table. Stubs carry stamp 0, default liveness and a whole-ring claim
    /// at rank 0; they are returned by lookups but never persisted.
    pub fn stub(address: Address) -> Self {
        Self {
            node_id: Key::from_address(address),
            address,
            ranges: vec![Range::full(0)],
            stamp: 0,
            entry_count: 0,
            liveness: LIVENESS_DEFAULT,
        }
    }

    pub fn node_id(&self) -> Key {
        self.node_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn liveness(&self) -> f64 {
        self.liveness
    }

    pub fn is_stub(&self) -> bool {
        self.stamp == 0
    }

    /// Copy with replaced responsibility ranges. The stamp is unchanged;
    /// publish via `reissued` for the change to win against older copies.
    pub fn with_ranges(mut self, ranges: Vec<Range>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Copy with an updated route count, exchanged as telemetry.
    pub fn with_entry_count(mut self, entry_count: usize) -> Self {
        self.entry_count = entry_count;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_liveness(mut self, liveness: f64) -> Self {
        self.liveness = liveness;
        self
    }

    /// Copy with a fresh stamp. Used when an entry is re-inserted after a
    /// flavor change and when the own route is published.
    pub fn reissued(&self, clock: &StampClock) -> Self {
        Self {
            stamp: clock.next(),
            ..self.clone()
        }
    }

    /// Pure liveness transition for a discrete event.
    pub fn with_event(&self, event: Event) -> Self {
        let liveness = match event {
            Event::Discovered => self.liveness + 1.0,
            Event::ConnectionFailed => self.liveness * LIVENESS_COMM_FAIL_PENALTY,
            Event::Joined => LIVENESS_DEFAULT,
            Event::Left => LIVENESS_LEFT,
            Event::HeartBeat => self.liveness * LIVENESS_HEARTBEAT_REWARD,
        };
        Self {
            liveness,
            ..self.clone()
        }
    }

    /// Last-writer-wins merge: adopt `foreign`'s ranges, entry count and
    /// stamp only if `foreign` is strictly newer. A stale or equal-stamp
    /// delivery returns the entry unchanged, which makes repeated delivery
    /// idempotent.
    pub fn update(&self, foreign: &RoutingEntry) -> Self {
        if foreign.stamp <= self.stamp {
            return self.clone();
        }
        Self {
            ranges: foreign.ranges.clone(),
            entry_count: foreign.entry_count,
            stamp: foreign.stamp,
            ..self.clone()
        }
    }

    /// The owned range (or the implicit whole-ring range) minimizing the
    /// base distance to `target`. On ties the first-seen owned range wins;
    /// the implicit range only wins strictly.
    pub fn select_range(
        &self,
        local: Address,
        target: Key,
        distance: &dyn RoutingDistance,
    ) -> Range {
        let mut best: Option<(Range, f64)> = None;
        for range in &self.ranges {
            let d = distance.apply(local, target, self.address, range);
            match best {
                Some((_, bd)) if d >= bd => {}
                _ => best = Some((*range, d)),
            }
        }

        let fallback = Range::full(0);
        let fd = distance.apply(local, target, self.address, &fallback);
        match best {
            Some((range, bd)) if bd <= fd => range,
            _ => fallback,
        }
    }

    /// True if any owned range at or below `max_rank` contains `key`.
    pub fn is_replica_for(&self, key: Key, max_rank: u32) -> bool {
        self.ranges
            .iter()
            .any(|r| r.rank() <= max_rank && r.contains(key))
    }

    /// Best range for `key` at or below `max_rank`: the lowest-rank
    /// containing range, else the nearest one clockwise from the key.
    pub fn range_for(&self, key: Key, max_rank: u32) -> Option<Range> {
        let mut containing: Option<Range> = None;
        let mut nearest: Option<(u64, Range)> = None;

        for range in self.ranges.iter().filter(|r| r.rank() <= max_rank) {
            if range.contains(key) {
                if containing.map_or(true, |c| range.rank() < c.rank()) {
                    containing = Some(*range);
                }
            } else {
                let d = key.distance_to(range.l_key());
                if nearest.map_or(true, |(nd, _)| d < nd) {
                    nearest = Some((d, *range));
                }
            }
        }

        containing.or(nearest.map(|(_, r)| r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kr_chord::ChordDistance;
    use crate::kr_interface::LIVENESS_MIN;

    fn entry(clock: &StampClock) -> RoutingEntry {
        RoutingEntry::new(
            Key::new(1000),
            1000,
            vec![Range::new(Key::new(1000), Key::new(2000), 0)],
            clock,
        )
    }

    #[test]
    fn test_liveness_transitions() {
        let clock = StampClock::new();
        let e = entry(&clock);
        assert_eq!(e.liveness(), LIVENESS_DEFAULT);

        assert_eq!(e.with_event(Event::Discovered).liveness(), LIVENESS_DEFAULT + 1.0);
        assert_eq!(e.with_event(Event::Left).liveness(), 1.0);
        assert_eq!(e.with_event(Event::Joined).liveness(), LIVENESS_DEFAULT);

        let failed = e.with_event(Event::ConnectionFailed);
        assert!(failed.liveness() < e.liveness());
        let rewarded = e.with_event(Event::HeartBeat);
        assert!(rewarded.liveness() > e.liveness());
    }

    #[test]
    fn test_four_failures_offset_four_heartbeats() {
        // penalty and reward are reciprocal at the 4th root of the golden
        // ratio, so 4 failures then 4 heartbeats restore the score
        let clock = StampClock::new();
        let mut e = entry(&clock);
        let original = e.liveness();

        for _ in 0..4 {
            e = e.with_event(Event::ConnectionFailed);
        }
        assert!(e.liveness() < original);
        for _ in 0..4 {
            e = e.with_event(Event::HeartBeat);
        }
        assert!((e.liveness() - original).abs() < 1e-9);
    }

    #[test]
    fn test_left_stays_above_eviction_floor() {
        let clock = StampClock::new();
        let left = entry(&clock).with_event(Event::Left);
        assert!(left.liveness() > LIVENESS_MIN);
        // one failed contact pushes a departed peer under the floor
        assert!(left.with_event(Event::ConnectionFailed).liveness() <= LIVENESS_MIN);
    }

    #[test]
    fn test_update_rejects_stale_and_is_idempotent() {
        let clock = StampClock::new();
        let local = entry(&clock);
        let foreign = RoutingEntry::new(
            Key::new(1000),
            1000,
            vec![Range::new(Key::new(3000), Key::new(4000), 1)],
            &clock,
        )
        .with_entry_count(7);

        let once = local.update(&foreign);
        assert_eq!(once.stamp(), foreign.stamp());
        assert_eq!(once.entry_count(), 7);
        assert_eq!(once.ranges(), foreign.ranges());

        // same foreign applied again changes nothing
        let twice = once.update(&foreign);
        assert_eq!(twice, once);

        // the older copy loses regardless of delivery order
        let stale = once.update(&local);
        assert_eq!(stale, once);
    }

    #[test]
    fn test_select_range_prefers_claimed_range() {
        let clock = StampClock::new();
        let e = RoutingEntry::new(
            Key::new(500),
            500,
            vec![
                Range::new(Key::new(100), Key::new(200), 0),
                Range::new(Key::new(400), Key::new(600), 0),
            ],
            &clock,
        );
        let distance = ChordDistance;

        // the second range contains the target: base distance 0
        let best = e.select_range(1, Key::new(450), &distance);
        assert!(best.is_same(&Range::new(Key::new(400), Key::new(600), 0)));

        // nothing contains 300; the range ending closest below it wins
        let best = e.select_range(1, Key::new(300), &distance);
        assert!(best.is_same(&Range::new(Key::new(100), Key::new(200), 0)));
    }

    #[test]
    fn test_replica_and_range_for_respect_rank() {
        let clock = StampClock::new();
        let e = RoutingEntry::new(
            Key::new(0),
            1,
            vec![
                Range::new(Key::new(100), Key::new(200), 2),
                Range::new(Key::new(300), Key::new(400), 0),
            ],
            &clock,
        );

        assert!(e.is_replica_for(Key::new(150), 2));
        assert!(!e.is_replica_for(Key::new(150), 1));
        assert!(e.is_replica_for(Key::new(350), 0));

        // containing range wins; rank filter applies
        let r = e.range_for(Key::new(150), 2).unwrap();
        assert_eq!(r.rank(), 2);
        // nothing at or below rank 1 contains 150: nearest clockwise is 300
        let r = e.range_for(Key::new(150), 1).unwrap();
        assert_eq!(r.l_key(), Key::new(300));
        assert_eq!(e.range_for(Key::new(150), 0).unwrap().l_key(), Key::new(300));
    }

    #[test]
    fn test_stub_claims_whole_ring() {
        let stub = RoutingEntry::stub(42);
        assert!(stub.is_stub());
        assert_eq!(stub.node_id(), Key::new(42));
        assert!(stub.is_replica_for(Key::new(u64::MAX), 0));
    }
}
