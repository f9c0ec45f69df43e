// Overlay Simulator Module

pub mod config;
pub mod runner;
pub mod stats;

// Re-export commonly used types
pub use config::{
    EventSchedule, GossipConfig, InitialOverlayState, LookupConfig, NetworkConfig, NodeSelection,
    OverlayConfig, OverlayEvent, ScheduledEvent,
};

pub use stats::{LookupStats, MessageOverhead, RoundMetrics, SimulationResult, TableHealth};

pub use runner::{OverlayRunner, RingTopology};
