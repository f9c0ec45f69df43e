// Overlay Simulator Runner

use super::config::{NodeSelection, OverlayConfig, OverlayEvent};
use super::stats::*;
use hashbrown::HashMap;
use indexmap::IndexMap;
use kr_rust::{
    Address, ChordPolicy, CommunicationError, Env, Event, Key, Range, RoutingEntry, RoutingError,
    RoutingService, StampClock,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::rc::Rc;

// ============================================================================
// Ring Topology
// ============================================================================

/// Shared topology oracle: the ground-truth ring membership. Every node's
/// routing service sees it through `Env`, so seed links follow churn without
/// any per-node rewiring.
pub struct RingTopology {
    members: RefCell<BTreeSet<Address>>,
    penalty_weight: f64,
}

impl RingTopology {
    pub fn new(penalty_weight: f64) -> Self {
        Self {
            members: RefCell::new(BTreeSet::new()),
            penalty_weight,
        }
    }

    pub fn insert(&self, address: Address) {
        self.members.borrow_mut().insert(address);
    }

    pub fn remove(&self, address: &Address) {
        self.members.borrow_mut().remove(address);
    }

    /// Ring predecessor and successor of `of` in address order. `of` itself
    /// need not be a member.
    fn ring_neighbors(&self, of: Address) -> Vec<Address> {
        let members = self.members.borrow();
        let succ = members
            .range((Bound::Excluded(of), Bound::Unbounded))
            .next()
            .or_else(|| members.iter().next())
            .copied();
        let pred = members
            .range(..of)
            .next_back()
            .or_else(|| members.iter().next_back())
            .copied();

        let mut neighbors = Vec::new();
        for address in [pred, succ].into_iter().flatten() {
            if address != of && !neighbors.contains(&address) {
                neighbors.push(address);
            }
        }
        neighbors
    }
}

impl Env for RingTopology {
    fn seed_links(&self, of: Address) -> Vec<Address> {
        self.ring_neighbors(of)
    }

    fn seed_link(&self, from: Address, into: Address) -> bool {
        self.ring_neighbors(from).contains(&into)
    }

    /// Topology penalty: shortest key-space distance between the local node
    /// and the contact, normalized to [0, 1] and scaled. A stand-in for
    /// latency that favors nearby contacts.
    fn apply(&self, local: Address, _target: Key, cur: Address, _range: &Range) -> f64 {
        let forward = cur.wrapping_sub(local);
        let backward = local.wrapping_sub(cur);
        let nearest = forward.min(backward) as f64;
        self.penalty_weight * nearest / (u64::MAX / 2) as f64
    }
}

// ============================================================================
// Core Structures
// ============================================================================

/// Main simulator runner
pub struct OverlayRunner {
    config: OverlayConfig,
    rng: StdRng,
    seed_used: [u8; 32],
    current_round: usize,

    // Overlay state
    topology: Rc<RingTopology>,
    clock: Rc<StampClock>,
    nodes: IndexMap<Address, SimNode>,
    total_created: usize,

    // Metrics tracking
    metrics_history: Vec<RoundMetrics>,
    lookups_started: usize,
    lookups_resolved: usize,
    lookups_failed: usize,
    hops_on_resolved: usize,
    replicas_on_resolved: usize,
    hop_histogram: HashMap<usize, usize>,
    gossip_sent: usize,
    lookup_hops: usize,
    messages_lost: usize,
    failures_reported: usize,
}

/// A simulated node
struct SimNode {
    service: RoutingService<ChordPolicy, Rc<RingTopology>>,
}

// ============================================================================
// Implementation
// ============================================================================

impl OverlayRunner {
    /// Create new simulator
    pub fn new(config: OverlayConfig) -> Self {
        let seed_used = config.seed.unwrap_or_else(|| {
            let mut seed = [0u8; 32];
            rand::thread_rng().fill(&mut seed);
            seed
        });
        let rng = StdRng::from_seed(seed_used);
        let topology = Rc::new(RingTopology::new(config.network.penalty_weight));

        Self {
            config,
            rng,
            seed_used,
            current_round: 0,
            topology,
            clock: Rc::new(StampClock::new()),
            nodes: IndexMap::new(),
            total_created: 0,
            metrics_history: Vec::new(),
            lookups_started: 0,
            lookups_resolved: 0,
            lookups_failed: 0,
            hops_on_resolved: 0,
            replicas_on_resolved: 0,
            hop_histogram: HashMap::new(),
            gossip_sent: 0,
            lookup_hops: 0,
            messages_lost: 0,
            failures_reported: 0,
        }
    }

    /// Run the simulation. A `RoutingError` from any service is a bug in
    /// the overlay driving code and aborts the run.
    pub fn run(mut self) -> Result<SimulationResult, RoutingError> {
        self.initialize_network()?;

        let bootstrap = self.config.initial_state.bootstrap_rounds;
        for round in 0..self.config.rounds {
            self.current_round = round;

            // Churn and lookups wait for the bootstrap phase to finish
            if round >= bootstrap {
                self.apply_scheduled_events()?;
            }

            self.gossip_round()?;

            if round >= bootstrap {
                self.run_lookups()?;
            }

            if round % self.config.metrics.sample_interval == 0 {
                self.collect_metrics();
            }
        }

        self.collect_metrics();
        Ok(self.build_result())
    }

    // ------------------------------------------------------------------
    // setup / membership
    // ------------------------------------------------------------------

    /// Create the initial ring membership
    fn initialize_network(&mut self) -> Result<(), RoutingError> {
        for _ in 0..self.config.initial_state.num_nodes {
            let address = self.fresh_address();
            self.create_node(address)?;
        }
        self.refresh_claims()
    }

    fn fresh_address(&mut self) -> Address {
        loop {
            let address = self.rng.gen();
            if !self.nodes.contains_key(&address) {
                return address;
            }
        }
    }

    fn create_node(&mut self, address: Address) -> Result<(), RoutingError> {
        self.topology.insert(address);

        let mut service = RoutingService::new(
            ChordPolicy::new(),
            Rc::clone(&self.topology),
            Rc::clone(&self.clock),
        );
        service.set_redundancy(self.config.redundancy);

        // claims are assigned by refresh_claims once the ring is known
        let own = RoutingEntry::new(Key::from_address(address), address, Vec::new(), &self.clock);
        service.update_own_route(own)?;

        self.nodes.insert(address, SimNode { service });
        self.total_created += 1;
        Ok(())
    }

    fn remove_node(&mut self, address: &Address) {
        self.topology.remove(address);
        self.nodes.shift_remove(address);
    }

    /// Reassign responsibility ranges from the ground-truth ring: each node
    /// claims [own, successor) at rank 0 and replicates its predecessor's
    /// segment at rank 1. The simulator plays the role of the stabilization
    /// protocol here; the services only ever see the resulting entries.
    fn refresh_claims(&mut self) -> Result<(), RoutingError> {
        let mut sorted: Vec<Address> = self.nodes.keys().copied().collect();
        sorted.sort_unstable();
        if sorted.is_empty() {
            return Ok(());
        }

        let clock = Rc::clone(&self.clock);
        for (idx, address) in sorted.iter().enumerate() {
            let succ = sorted[(idx + 1) % sorted.len()];
            let pred = sorted[(idx + sorted.len() - 1) % sorted.len()];
            let own_key = Key::from_address(*address);
            let ranges = if sorted.len() == 1 {
                // alone on the ring: one full-circle claim
                vec![Range::new(own_key, own_key, 0)]
            } else {
                vec![
                    Range::new(own_key, Key::from_address(succ), 0),
                    Range::new(Key::from_address(pred), own_key, 1),
                ]
            };
            if let Some(node) = self.nodes.get_mut(address) {
                let own = RoutingEntry::new(own_key, *address, ranges, &clock);
                node.service.update_own_route(own)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // scheduled events
    // ------------------------------------------------------------------

    fn apply_scheduled_events(&mut self) -> Result<(), RoutingError> {
        let due: Vec<OverlayEvent> = self
            .config
            .events
            .events
            .iter()
            .filter(|e| e.round == self.current_round)
            .map(|e| e.event.clone())
            .collect();

        for event in due {
            match event {
                OverlayEvent::NodeJoin { count } => {
                    log::info!("round {}: {} node(s) joining", self.current_round, count);
                    let mut joined = Vec::new();
                    for _ in 0..count {
                        let address = self.fresh_address();
                        self.create_node(address)?;
                        joined.push(address);
                    }
                    self.refresh_claims()?;

                    // newcomers announce themselves to their seed links
                    let mut notices: Vec<(Address, Address, RoutingEntry)> = Vec::new();
                    for address in &joined {
                        if let Some(node) = self.nodes.get_mut(address) {
                            let published = node.service.publish_own_route()?;
                            let contacts = node.service.local_lookup(
                                Key::from_address(*address).next(),
                                self.config.gossip.fanout,
                                false,
                            )?;
                            for contact in contacts {
                                notices.push((*address, contact.address(), published.clone()));
                            }
                        }
                    }
                    for (from, to, entry) in notices {
                        self.gossip_sent += 1;
                        if let Err(failure) = self.try_reach(from, to) {
                            self.report_failure(failure);
                            continue;
                        }
                        if let Some(node) = self.nodes.get_mut(&to) {
                            node.service.update(Event::Joined, &[entry])?;
                        }
                    }
                }

                OverlayEvent::NodeLeave { selection } => {
                    let victims = self.select_nodes(&selection);
                    log::info!(
                        "round {}: {} node(s) leaving gracefully",
                        self.current_round,
                        victims.len()
                    );

                    // departing nodes announce themselves to their neighbors
                    let mut notices: Vec<(Address, RoutingEntry)> = Vec::new();
                    for victim in &victims {
                        if let Some(node) = self.nodes.get_mut(victim) {
                            let published = node.service.publish_own_route()?;
                            for neighbor in node.service.neighbor_set(0)? {
                                notices.push((neighbor.address(), published.clone()));
                            }
                        }
                    }
                    for victim in &victims {
                        self.remove_node(victim);
                    }
                    for (to, entry) in notices {
                        if let Some(node) = self.nodes.get_mut(&to) {
                            node.service.update(Event::Left, &[entry])?;
                        }
                    }
                    self.refresh_claims()?;
                }

                OverlayEvent::NodeCrash { selection } => {
                    let victims = self.select_nodes(&selection);
                    log::info!(
                        "round {}: {} node(s) crashing",
                        self.current_round,
                        victims.len()
                    );
                    // no announcement: survivors find out through failed
                    // deliveries
                    for victim in &victims {
                        self.remove_node(victim);
                    }
                    self.refresh_claims()?;
                }

                OverlayEvent::NetworkCondition { loss_fraction } => {
                    log::info!(
                        "round {}: loss fraction {} -> {}",
                        self.current_round,
                        self.config.network.loss_fraction,
                        loss_fraction
                    );
                    self.config.network.loss_fraction = loss_fraction;
                }
            }
        }
        Ok(())
    }

    fn select_nodes(&mut self, selection: &NodeSelection) -> Vec<Address> {
        match selection {
            NodeSelection::Random { count } => {
                let mut addresses: Vec<Address> = self.nodes.keys().copied().collect();
                addresses.shuffle(&mut self.rng);
                addresses.truncate(*count);
                addresses
            }
            NodeSelection::Specific { addresses } => addresses
                .iter()
                .filter(|a| self.nodes.contains_key(*a))
                .copied()
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // gossip
    // ------------------------------------------------------------------

    /// Every node publishes its route and pushes it to its closest contacts.
    /// Dropped or undeliverable messages are reported back to the sender as
    /// communication failures.
    fn gossip_round(&mut self) -> Result<(), RoutingError> {
        let mut deliveries: Vec<(Address, Address, RoutingEntry)> = Vec::new();

        let addresses: Vec<Address> = self.nodes.keys().copied().collect();
        for address in &addresses {
            let Some(node) = self.nodes.get_mut(address) else {
                continue;
            };
            let published = node.service.publish_own_route()?;
            let contacts = node.service.local_lookup(
                Key::from_address(*address).next(),
                self.config.gossip.fanout,
                false,
            )?;
            for contact in contacts {
                deliveries.push((*address, contact.address(), published.clone()));
            }
        }

        for (from, to, entry) in deliveries {
            self.gossip_sent += 1;
            if let Err(failure) = self.try_reach(from, to) {
                self.report_failure(failure);
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&to) {
                let event = if node.service.table().route(&from).is_some() {
                    Event::HeartBeat
                } else {
                    Event::Discovered
                };
                node.service.update(event, &[entry])?;
            }
        }
        Ok(())
    }

    /// Simulated message send: lossy and membership-aware. A drop and a
    /// crashed recipient look the same to the sender.
    fn try_reach(&mut self, from: Address, to: Address) -> Result<(), CommunicationError> {
        if self.rng.gen_bool(self.config.network.loss_fraction) {
            self.messages_lost += 1;
            return Err(CommunicationError { from, to });
        }
        if !self.nodes.contains_key(&to) {
            return Err(CommunicationError { from, to });
        }
        Ok(())
    }

    fn report_failure(&mut self, failure: CommunicationError) {
        log::debug!("{}", failure);
        self.failures_reported += 1;
        if let Some(node) = self.nodes.get_mut(&failure.from) {
            node.service.register_communication_failure(failure.to);
        }
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    /// Iterative lookups from random origins to random targets. Each hop
    /// asks the current node for its best safe candidates and moves to the
    /// first reachable unvisited one.
    fn run_lookups(&mut self) -> Result<(), RoutingError> {
        if self.nodes.is_empty() {
            return Ok(());
        }

        for _ in 0..self.config.lookup.lookups_per_round {
            let origin_idx = self.rng.gen_range(0..self.nodes.len());
            let Some((&origin, _)) = self.nodes.get_index(origin_idx) else {
                continue;
            };
            let target = Key::new(self.rng.gen());

            self.lookups_started += 1;
            let mut cur = origin;
            let mut hops = 0usize;
            let mut resolved = false;
            let mut visited = BTreeSet::new();
            visited.insert(cur);

            while hops <= self.config.lookup.max_hops {
                let responsible = match self.nodes.get(&cur) {
                    Some(node) => node
                        .service
                        .get_range(target, 0)?
                        .map_or(false, |r| r.contains(target)),
                    None => break,
                };
                if responsible {
                    resolved = true;
                    break;
                }

                let candidates = match self.nodes.get(&cur) {
                    Some(node) => {
                        node.service
                            .local_lookup(target, self.config.gossip.fanout, true)?
                    }
                    None => break,
                };

                let mut advanced = false;
                for candidate in candidates {
                    let next = candidate.address();
                    if visited.contains(&next) {
                        continue;
                    }
                    hops += 1;
                    self.lookup_hops += 1;
                    if let Err(failure) = self.try_reach(cur, next) {
                        self.report_failure(failure);
                        continue;
                    }
                    visited.insert(next);
                    cur = next;
                    advanced = true;
                    break;
                }
                if !advanced {
                    break;
                }
            }

            if resolved {
                self.lookups_resolved += 1;
                self.hops_on_resolved += hops;
                *self.hop_histogram.entry(hops).or_insert(0) += 1;

                // how much replication the responsible node can see for the
                // resolved key
                let replicas = match self.nodes.get(&cur) {
                    Some(node) => node.service.replica_set(target, 1)?.len(),
                    None => 0,
                };
                self.replicas_on_resolved += replicas;
            } else {
                self.lookups_failed += 1;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // metrics
    // ------------------------------------------------------------------

    fn collect_metrics(&mut self) {
        let mut route_counts = Vec::new();
        let mut ratios = Vec::new();
        for node in self.nodes.values() {
            let stats = node.service.get_stats();
            route_counts.push(stats.route_count);
            ratios.push(stats.redundancy_ratio);
        }

        let mut metrics = RoundMetrics::new(self.current_round);
        metrics.node_counts = NodeCounts {
            active_nodes: self.nodes.len(),
            total_created: self.total_created,
        };
        metrics.table_health = calculate_table_health(&route_counts, &ratios);

        if self.config.output.enable_console {
            log::info!(
                "round {}: {} nodes, routes/node avg {:.1}, lookups {}/{} ok",
                self.current_round,
                metrics.node_counts.active_nodes,
                metrics.table_health.avg_routes,
                self.lookups_resolved,
                self.lookups_started
            );
        }

        self.metrics_history.push(metrics);
    }

    fn build_result(self) -> SimulationResult {
        let final_metrics = self
            .metrics_history
            .last()
            .cloned()
            .unwrap_or_else(|| RoundMetrics::new(0));

        let avg_hops = if self.lookups_resolved > 0 {
            self.hops_on_resolved as f64 / self.lookups_resolved as f64
        } else {
            0.0
        };
        let avg_replicas = if self.lookups_resolved > 0 {
            self.replicas_on_resolved as f64 / self.lookups_resolved as f64
        } else {
            0.0
        };
        let mut hop_histogram: Vec<(usize, usize)> = self.hop_histogram.into_iter().collect();
        hop_histogram.sort_unstable();

        let total_messages = self.gossip_sent + self.lookup_hops;
        let messages_per_node_per_round = if self.config.rounds > 0 && !self.nodes.is_empty() {
            total_messages as f64 / (self.config.rounds * self.nodes.len()) as f64
        } else {
            0.0
        };

        SimulationResult {
            config_summary: format!(
                "Nodes: {}, Rounds: {}, Redundancy: {}, Loss: {}",
                self.config.initial_state.num_nodes,
                self.config.rounds,
                self.config.redundancy,
                self.config.network.loss_fraction
            ),
            seed_used: self.seed_used,
            total_rounds: self.config.rounds,
            final_metrics,
            metrics_history: self.metrics_history,
            lookup_stats: LookupStats {
                started: self.lookups_started,
                resolved: self.lookups_resolved,
                failed: self.lookups_failed,
                avg_hops,
                avg_replicas,
                hop_histogram,
            },
            message_overhead: MessageOverhead {
                total_messages,
                gossip_sent: self.gossip_sent,
                lookup_hops: self.lookup_hops,
                messages_lost: self.messages_lost,
                failures_reported: self.failures_reported,
                messages_per_node_per_round,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::config::{EventSchedule, ScheduledEvent};

    fn small_config(rounds: usize, num_nodes: usize) -> OverlayConfig {
        let mut config = OverlayConfig::default();
        config.rounds = rounds;
        config.seed = Some([7u8; 32]);
        config.initial_state.num_nodes = num_nodes;
        config.initial_state.bootstrap_rounds = 15;
        config.network.loss_fraction = 0.01;
        config
    }

    #[test]
    fn test_ring_neighbors_wrap_around() {
        let topology = RingTopology::new(1.0);
        for address in [10u64, 20, 30] {
            topology.insert(address);
        }

        assert_eq!(topology.ring_neighbors(20), vec![10, 30]);
        // wrap at both ends
        assert_eq!(topology.ring_neighbors(10), vec![30, 20]);
        assert_eq!(topology.ring_neighbors(30), vec![20, 10]);
        // non-member sees its would-be neighbors
        assert_eq!(topology.ring_neighbors(25), vec![20, 30]);

        topology.remove(&20);
        topology.remove(&30);
        assert!(topology.ring_neighbors(10).is_empty());
    }

    #[test]
    fn test_stable_overlay_resolves_lookups() {
        let runner = OverlayRunner::new(small_config(40, 10));
        let result = runner.run().unwrap();

        assert_eq!(result.final_metrics.node_counts.active_nodes, 10);
        assert!(result.lookup_stats.started > 0);
        assert!(
            result.lookup_stats.success_rate() > 80.0,
            "success rate {:.1}%",
            result.lookup_stats.success_rate()
        );
        // every node holds at least its seed links
        assert!(result.final_metrics.table_health.min_routes >= 2);
    }

    #[test]
    fn test_churn_events_change_membership() {
        let mut config = small_config(40, 12);
        config.events = EventSchedule {
            events: vec![
                ScheduledEvent {
                    round: 20,
                    event: OverlayEvent::NodeCrash {
                        selection: NodeSelection::Random { count: 2 },
                    },
                },
                ScheduledEvent {
                    round: 25,
                    event: OverlayEvent::NodeJoin { count: 3 },
                },
            ],
        };

        let runner = OverlayRunner::new(config);
        let result = runner.run().unwrap();

        assert_eq!(result.final_metrics.node_counts.active_nodes, 13);
        assert_eq!(result.final_metrics.node_counts.total_created, 15);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let first = OverlayRunner::new(small_config(30, 8)).run().unwrap();
        let second = OverlayRunner::new(small_config(30, 8)).run().unwrap();

        assert_eq!(first.seed_used, second.seed_used);
        assert_eq!(first.lookup_stats.resolved, second.lookup_stats.resolved);
        assert_eq!(first.lookup_stats.avg_hops, second.lookup_stats.avg_hops);
        assert_eq!(
            first.message_overhead.total_messages,
            second.message_overhead.total_messages
        );
    }
}
