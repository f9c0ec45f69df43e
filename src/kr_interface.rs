use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::kr_entry::RoutingEntry;
use crate::kr_key::Key;
use crate::kr_range::Range;
use crate::kr_route_table::Flavor;

// all the same numeric type to allow casting/interop with the key space
pub type Address = u64;

/// Logical version number used for last-writer-wins conflict resolution
/// between route updates. Stamp 0 is reserved for synthetic stub entries.
pub type Stamp = u64;

// ============================================================================
// Constants
// ============================================================================

/// Bit width of the circular key space; all key arithmetic wraps
/// modulo 2^BITNESS.
pub const BITNESS: u32 = 64;

/// Liveness assigned to freshly discovered or (re)joined peers.
pub const LIVENESS_DEFAULT: f64 = 55.0;

/// Floor of the liveness scale. Entries at or below the floor are evicted.
pub const LIVENESS_MIN: f64 = 0.5;

/// Liveness of a peer that announced a graceful departure. Kept above the
/// eviction floor so the departed peer lingers as the weakest candidate
/// until trimming or a failed contact removes it.
pub const LIVENESS_LEFT: f64 = 1.0;

/// Multiplicative penalty applied on a failed contact: phi^(-1/4).
///
/// Penalty and reward are exact reciprocals at the 4th root of the golden
/// ratio, so four consecutive failures are offset by four consecutive
/// heartbeats.
pub const LIVENESS_COMM_FAIL_PENALTY: f64 = 0.886_651_779_312_162_2;

/// Multiplicative reward applied on a heartbeat: phi^(1/4).
pub const LIVENESS_HEARTBEAT_REWARD: f64 = 1.127_838_485_561_682_3;

/// Soft cleanup trigger: maintenance runs when the table grows beyond
/// flavor_count * redundancy * MAINTENANCE_THRESHOLD (the golden ratio).
pub const MAINTENANCE_THRESHOLD: f64 = 1.618_033_988_749_895;

/// Default per-flavor redundancy target.
pub const REDUNDANCY_DEFAULT: f64 = 3.0;

// ============================================================================
// Liveness Events
// ============================================================================

/// Discrete events driving the liveness score of a routing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Peer seen in a routing exchange: small linear reward.
    Discovered,
    /// Contact attempt failed: multiplicative penalty.
    ConnectionFailed,
    /// Peer (re)joined the overlay: liveness resets to the default.
    Joined,
    /// Peer announced departure: liveness drops to the departure mark.
    Left,
    /// Keepalive succeeded: multiplicative reward.
    HeartBeat,
}

// ============================================================================
// Stamp Clock
// ============================================================================

/// Monotonic counter issuing globally comparable entry stamps.
///
/// Stamps are strictly increasing across every node of a simulated network,
/// which is what makes the stale-update rejection rule sound. The driver is
/// single-threaded per step, so a relaxed atomic is sufficient; the clock is
/// passed explicitly into entry construction rather than kept as ambient
/// global state.
#[derive(Debug)]
pub struct StampClock {
    counter: AtomicU64,
}

impl StampClock {
    pub fn new() -> Self {
        // start at 1: stamp 0 marks stub entries
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Issue the next stamp. Strictly increasing per process.
    pub fn next(&self) -> Stamp {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for StampClock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Collaborator Contracts
// ============================================================================

/// Pluggable base metric scoring how well a claimed range serves a target
/// key, as seen from `local`. Protocol-specific (e.g. Chord numeric
/// distance).
pub trait RoutingDistance {
    fn apply(&self, local: Address, target: Key, cur: Address, cur_range: &Range) -> f64;
}

/// Topology and cost oracle supplied by the environment.
pub trait Env {
    /// Topology-provided edges of `of`. Seed links are considered reachable
    /// regardless of route-table membership.
    fn seed_links(&self, of: Address) -> Vec<Address>;

    /// True when `into` is a seed link of `from`.
    fn seed_link(&self, from: Address, into: Address) -> bool;

    /// Distance-penalty oracle, composed exponentially on top of the base
    /// metric (see `RoutingService::routing_distance`).
    fn apply(&self, local: Address, target: Key, cur: Address, cur_range: &Range) -> f64;
}

impl<E: Env + ?Sized> Env for Rc<E> {
    fn seed_links(&self, of: Address) -> Vec<Address> {
        (**self).seed_links(of)
    }

    fn seed_link(&self, from: Address, into: Address) -> bool {
        (**self).seed_link(from, into)
    }

    fn apply(&self, local: Address, target: Key, cur: Address, cur_range: &Range) -> f64 {
        (**self).apply(local, target, cur, cur_range)
    }
}

/// Protocol capability injected into the routing engine: how entries are
/// classified into flavors and which base distance metric applies.
pub trait RoutingPolicy {
    /// Classify a foreign entry relative to the owning node's entry.
    fn flavorize(&self, owner: &RoutingEntry, entry: &RoutingEntry) -> Flavor;

    /// The base distance metric of this protocol.
    fn routing_distance(&self) -> &dyn RoutingDistance;
}

// ============================================================================
// Errors
// ============================================================================

/// Violated preconditions of the routing engine. These are programming
/// errors: loud, non-recoverable, never swallowed. Expected absence (no
/// route for an address, no range for a key) is an `Option`, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    /// An operation requiring the owner's route ran before it was set.
    OwnerNotSet,
    /// `update_own_route` was handed an entry for a different address.
    OwnerAddressMismatch { expected: Address, actual: Address },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::OwnerNotSet => {
                write!(f, "own route is not set; call update_own_route first")
            }
            RoutingError::OwnerAddressMismatch { expected, actual } => write!(
                f,
                "own route address mismatch: expected {}, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for RoutingError {}

/// Simulated communication failure: a peer was unreachable. Raised by the
/// environment/driver layer and treated as retryable by the lookup protocol;
/// the routing core only ever records it via
/// `register_communication_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationError {
    pub from: Address,
    pub to: Address,
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "communication failure: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for CommunicationError {}

// ============================================================================
// Telemetry
// ============================================================================

/// Route-table telemetry exposed to the overlay layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStats {
    /// Number of stored routes.
    pub route_count: usize,
    /// Achieved redundancy: routes per non-empty flavor, 0.0 when empty.
    pub redundancy_ratio: f64,
}
