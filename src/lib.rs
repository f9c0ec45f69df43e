//! # krRust - Keyspace Overlay Routing
//!
//! A discrete-event-simulation core for DHT overlay routing (Chord-like ring
//! protocols). Each simulated node owns a routing service that maintains a
//! bounded, redundancy-controlled table of remote node handles, scores their
//! liveness on discrete events, and answers lookup / neighbor / replica
//! queries by distance ordering.
//!
//! ## Core Components
//!
//! - **Key / Range**: circular key-space arithmetic and half-open
//!   responsibility intervals
//! - **RoutingEntry**: versioned, liveness-scored handle to a remote node
//! - **RouteTable**: flavored tri-index route store
//! - **RoutingService**: the admission / eviction / lookup state machine
//! - **ChordPolicy**: a concrete prefix-flavored ring protocol policy
//!
//! ## Usage with an Overlay Layer
//!
//! This library is network-agnostic. The overlay/lookup layer you put on
//! top is expected to:
//! 1. Implement `Env` (topology oracle: seed links, distance penalty)
//! 2. Create one `RoutingService` per node with a shared `StampClock`
//! 3. Feed foreign entries into `update()` as join/gossip traffic arrives
//! 4. Route requests via `local_lookup` / `neighbor_set` / `replica_set`
//! 5. Report unreachable peers via `register_communication_failure`
//!
//! ```no_run
//! use std::rc::Rc;
//! use kr_rust::{ChordPolicy, Event, Key, Range, RoutingEntry, RoutingService, StampClock};
//! # use kr_rust::{Address, Env};
//! # struct NoEnv;
//! # impl Env for NoEnv {
//! #     fn seed_links(&self, _of: Address) -> Vec<Address> { Vec::new() }
//! #     fn seed_link(&self, _from: Address, _into: Address) -> bool { false }
//! #     fn apply(&self, _l: Address, _t: Key, _c: Address, _r: &Range) -> f64 { 0.0 }
//! # }
//!
//! let clock = Rc::new(StampClock::new());
//! let mut service = RoutingService::new(ChordPolicy::new(), NoEnv, Rc::clone(&clock));
//!
//! let own = RoutingEntry::new(
//!     Key::new(42),
//!     42,
//!     vec![Range::new(Key::new(42), Key::new(9000), 0)],
//!     &clock,
//! );
//! service.update_own_route(own)?;
//!
//! // as gossip arrives:
//! // service.update(Event::Discovered, &foreign_entries)?;
//! // let next_hops = service.local_lookup(target, 3, true)?;
//! # Ok::<(), kr_rust::RoutingError>(())
//! ```
//!
//! ## Testing and Simulation
//!
//! For driving whole overlays without a real network, see the simulator
//! framework in `simulator/`. It provides seeded, reproducible simulation
//! runs with churn schedules and YAML scenario files.

// Core routing modules
pub mod kr_chord;
pub mod kr_entry;
pub mod kr_interface;
pub mod kr_key;
pub mod kr_range;
pub mod kr_route_table;
pub mod kr_routing_service;

// Re-export commonly used types
pub use kr_chord::{ChordDistance, ChordPolicy, SUCCESSOR_FLAVOR_ID};
pub use kr_entry::RoutingEntry;
pub use kr_interface::{
    Address, CommunicationError, Env, Event, RouteStats, RoutingDistance, RoutingError,
    RoutingPolicy, Stamp, StampClock, BITNESS, LIVENESS_COMM_FAIL_PENALTY, LIVENESS_DEFAULT,
    LIVENESS_HEARTBEAT_REWARD, LIVENESS_LEFT, LIVENESS_MIN, MAINTENANCE_THRESHOLD,
    REDUNDANCY_DEFAULT,
};
pub use kr_key::{common_prefix_len, is_in_open_right_range, Key};
pub use kr_range::Range;
pub use kr_route_table::{Flavor, RouteTable};
pub use kr_routing_service::RoutingService;
