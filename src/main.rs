use std::collections::BTreeMap;
use std::rc::Rc;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use simple_logger::SimpleLogger;

use kr_rust::{
    Address, ChordPolicy, Env, Event, Key, Range, RoutingEntry, RoutingService, StampClock,
};

/// Static ring topology over a fixed member set: seed links are the ring
/// predecessor and successor, no penalty. Enough for a smoke run; the
/// simulator crate carries the full churn-capable topology.
struct StaticRing {
    members: Vec<Address>,
}

impl StaticRing {
    fn new(mut members: Vec<Address>) -> Self {
        members.sort_unstable();
        Self { members }
    }

    fn neighbors(&self, of: Address) -> Vec<Address> {
        let n = self.members.len();
        if n < 2 {
            return Vec::new();
        }
        let idx = self.members.iter().position(|a| *a == of).unwrap_or(0);
        let succ = self.members[(idx + 1) % n];
        let pred = self.members[(idx + n - 1) % n];
        if succ == pred {
            vec![succ]
        } else {
            vec![pred, succ]
        }
    }
}

impl Env for StaticRing {
    fn seed_links(&self, of: Address) -> Vec<Address> {
        self.neighbors(of)
    }

    fn seed_link(&self, from: Address, into: Address) -> bool {
        self.neighbors(from).contains(&into)
    }

    fn apply(&self, _local: Address, _target: Key, _cur: Address, _range: &Range) -> f64 {
        0.0
    }
}

fn main() {
    SimpleLogger::new().init().unwrap();

    info!("starting");

    let rounds = 50;
    let num_nodes = 16;
    let lookups_per_round = 20;

    let mut rng = StdRng::seed_from_u64(0x5eed);

    let members: Vec<Address> = (0..num_nodes).map(|_| rng.next_u64()).collect();
    let ring = Rc::new(StaticRing::new(members.clone()));
    let clock = Rc::new(StampClock::new());

    // one routing service per node, claiming [own, successor) at rank 0
    // and the predecessor's segment at rank 1
    let mut nodes: BTreeMap<Address, RoutingService<ChordPolicy, Rc<StaticRing>>> = BTreeMap::new();
    let sorted = ring.members.clone();
    for (idx, address) in sorted.iter().enumerate() {
        let succ = sorted[(idx + 1) % sorted.len()];
        let pred = sorted[(idx + sorted.len() - 1) % sorted.len()];
        let ranges = vec![
            Range::new(Key::from_address(*address), Key::from_address(succ), 0),
            Range::new(Key::from_address(pred), Key::from_address(*address), 1),
        ];
        let mut service =
            RoutingService::new(ChordPolicy::new(), Rc::clone(&ring), Rc::clone(&clock));
        let own = RoutingEntry::new(Key::from_address(*address), *address, ranges, &clock);
        service.update_own_route(own).unwrap();
        nodes.insert(*address, service);
    }

    let mut lookups_ok = 0usize;
    let mut lookups_failed = 0usize;
    let mut hops_total = 0usize;

    for round in 0..rounds {
        // gossip: every node hands its published route to its closest contacts
        let mut deliveries: Vec<(Address, RoutingEntry)> = Vec::new();
        for (address, service) in nodes.iter_mut() {
            let published = service.publish_own_route().unwrap();
            let contacts = service
                .local_lookup(Key::from_address(*address).next(), 3, false)
                .unwrap();
            for contact in contacts {
                deliveries.push((contact.address(), published.clone()));
            }
        }
        for (dst, entry) in deliveries {
            if let Some(service) = nodes.get_mut(&dst) {
                service.update(Event::Discovered, &[entry]).unwrap();
            }
        }

        // iterative lookups between random pairs
        for _ in 0..lookups_per_round {
            let origin = members[rng.gen_range(0..members.len())];
            let target = Key::new(rng.next_u64());

            let mut cur = origin;
            let mut done = false;
            for _hop in 0..32 {
                let service = &nodes[&cur];
                if service
                    .get_range(target, 0)
                    .unwrap()
                    .map_or(false, |r| r.contains(target))
                {
                    done = true;
                    break;
                }
                let candidates = service.local_lookup(target, 3, false).unwrap();
                match candidates.iter().find(|c| c.address() != cur) {
                    Some(next) => {
                        cur = next.address();
                        hops_total += 1;
                    }
                    None => break,
                }
            }
            if done {
                lookups_ok += 1;
            } else {
                lookups_failed += 1;
            }
        }

        if round % 10 == 0 {
            let sizes: usize = nodes.values().map(|s| s.get_stats().route_count).sum();
            info!(
                "round {}: mean table size {:.1}, lookups ok {} failed {}",
                round,
                sizes as f64 / nodes.len() as f64,
                lookups_ok,
                lookups_failed
            );
        }
    }

    info!(
        "done: {} ok, {} failed, {:.2} mean hops",
        lookups_ok,
        lookups_failed,
        hops_total as f64 / (lookups_ok + lookups_failed).max(1) as f64
    );
}
