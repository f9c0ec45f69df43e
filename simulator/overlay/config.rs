// Overlay Simulator Configuration

use kr_rust::{Address, REDUNDANCY_DEFAULT};

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration for overlay routing simulation
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Total number of simulation rounds
    pub rounds: usize,

    /// Random seed for reproducibility
    pub seed: Option<[u8; 32]>,

    /// Initial overlay state
    pub initial_state: InitialOverlayState,

    /// Per-flavor redundancy target handed to every routing service
    pub redundancy: f64,

    /// Gossip behavior
    pub gossip: GossipConfig,

    /// Lookup workload
    pub lookup: LookupConfig,

    /// Scheduled overlay events
    pub events: EventSchedule,

    /// Network simulation parameters
    pub network: NetworkConfig,

    /// Metrics tracking configuration
    pub metrics: MetricsConfig,

    /// Output configuration
    pub output: OutputConfig,
}

// ============================================================================
// Initial Overlay State
// ============================================================================

/// Configuration for the initial ring membership
#[derive(Debug, Clone, serde::Deserialize)]
pub struct InitialOverlayState {
    /// Number of nodes to create initially
    pub num_nodes: usize,

    /// Number of gossip-only rounds before events and lookups start
    #[serde(default = "default_bootstrap_rounds")]
    pub bootstrap_rounds: usize,
}

fn default_bootstrap_rounds() -> usize {
    20
}

// ============================================================================
// Gossip / Lookup Workload
// ============================================================================

/// Gossip behavior per round
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GossipConfig {
    /// How many closest contacts each node pushes its route to per round
    pub fanout: usize,
}

/// Lookup workload per round
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LookupConfig {
    /// Iterative lookups issued per round (random origin, random target)
    pub lookups_per_round: usize,

    /// Hop budget before a lookup counts as failed
    pub max_hops: usize,
}

// ============================================================================
// Event Scheduling
// ============================================================================

/// Schedule of overlay events
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct EventSchedule {
    pub events: Vec<ScheduledEvent>,
}

/// A single scheduled event
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScheduledEvent {
    /// Round number when the event triggers
    pub round: usize,

    /// The event to trigger
    pub event: OverlayEvent,
}

/// Types of overlay events
#[derive(Debug, Clone, serde::Deserialize)]
pub enum OverlayEvent {
    /// Add new nodes to the ring
    NodeJoin { count: usize },

    /// Gracefully remove nodes (they announce their departure first)
    NodeLeave { selection: NodeSelection },

    /// Suddenly remove nodes (no announcement, simulates crashes)
    NodeCrash { selection: NodeSelection },

    /// Change network conditions
    NetworkCondition { loss_fraction: f64 },
}

/// Methods for selecting which nodes to affect
#[derive(Debug, Clone, serde::Deserialize)]
pub enum NodeSelection {
    /// Random selection
    Random { count: usize },

    /// Specific addresses
    Specific { addresses: Vec<Address> },
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Network behavior simulation
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NetworkConfig {
    /// Fraction of messages dropped (0.0 to 1.0); each drop is reported to
    /// the sender as a communication failure
    pub loss_fraction: f64,

    /// Weight of the topology penalty folded into routing distances
    #[serde(default = "default_penalty_weight")]
    pub penalty_weight: f64,
}

fn default_penalty_weight() -> f64 {
    1.0
}

// ============================================================================
// Metrics Configuration
// ============================================================================

/// Configuration for metrics tracking
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// How often to sample metrics (every N rounds)
    pub sample_interval: usize,
}

// ============================================================================
// Output Configuration
// ============================================================================

/// Configuration for output and logging
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Enable per-round console logging
    pub enable_console: bool,

    /// Verbose logging
    pub verbose: bool,
}

// ============================================================================
// Default Implementations
// ============================================================================

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            rounds: 500,
            seed: None,
            initial_state: InitialOverlayState::default(),
            redundancy: REDUNDANCY_DEFAULT,
            gossip: GossipConfig::default(),
            lookup: LookupConfig::default(),
            events: EventSchedule::default(),
            network: NetworkConfig::default(),
            metrics: MetricsConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for InitialOverlayState {
    fn default() -> Self {
        Self {
            num_nodes: 50,
            bootstrap_rounds: default_bootstrap_rounds(),
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self { fanout: 3 }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            lookups_per_round: 10,
            max_hops: 32,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_fraction: 0.01,
            penalty_weight: default_penalty_weight(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: 10,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enable_console: false,
            verbose: false,
        }
    }
}
