// Overlay Simulator Statistics

// ============================================================================
// Simulation Result
// ============================================================================

/// Complete simulation result
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Configuration summary
    pub config_summary: String,

    /// Random seed used
    pub seed_used: [u8; 32],

    /// Total rounds executed
    pub total_rounds: usize,

    /// Final metrics at end of simulation
    pub final_metrics: RoundMetrics,

    /// Historical metrics (sampled at intervals)
    pub metrics_history: Vec<RoundMetrics>,

    /// Cumulative lookup statistics
    pub lookup_stats: LookupStats,

    /// Message overhead statistics
    pub message_overhead: MessageOverhead,
}

// ============================================================================
// Round Metrics
// ============================================================================

/// Metrics collected at a single round
#[derive(Debug, Clone)]
pub struct RoundMetrics {
    /// Round number
    pub round: usize,

    /// Node membership counts
    pub node_counts: NodeCounts,

    /// Route table health indicators
    pub table_health: TableHealth,
}

impl RoundMetrics {
    pub fn new(round: usize) -> Self {
        Self {
            round,
            node_counts: NodeCounts::default(),
            table_health: TableHealth::default(),
        }
    }
}

/// Node membership counts
#[derive(Debug, Clone, Default)]
pub struct NodeCounts {
    /// Nodes currently in the ring
    pub active_nodes: usize,

    /// Nodes ever created
    pub total_created: usize,
}

/// Route table health metrics
#[derive(Debug, Clone, Default)]
pub struct TableHealth {
    /// Minimum route count (across all active nodes)
    pub min_routes: usize,

    /// Maximum route count
    pub max_routes: usize,

    /// Average route count
    pub avg_routes: f64,

    /// Average routes-per-flavor ratio
    pub avg_redundancy_ratio: f64,
}

// ============================================================================
// Lookup Statistics
// ============================================================================

/// Cumulative lookup workload statistics
#[derive(Debug, Clone, Default)]
pub struct LookupStats {
    /// Lookups issued
    pub started: usize,

    /// Lookups that reached a responsible node
    pub resolved: usize,

    /// Lookups that exhausted the hop budget or ran out of candidates
    pub failed: usize,

    /// Average hops per resolved lookup
    pub avg_hops: f64,

    /// Average replica-set size observed at the responsible node
    pub avg_replicas: f64,

    /// Hop count distribution of resolved lookups, sorted by hop count
    pub hop_histogram: Vec<(usize, usize)>,
}

impl LookupStats {
    pub fn success_rate(&self) -> f64 {
        if self.started == 0 {
            return 0.0;
        }
        self.resolved as f64 / self.started as f64 * 100.0
    }
}

// ============================================================================
// Message Overhead
// ============================================================================

/// Message overhead statistics
#[derive(Debug, Clone, Default)]
pub struct MessageOverhead {
    /// Total messages put on the simulated wire
    pub total_messages: usize,

    /// Route publications delivered via gossip
    pub gossip_sent: usize,

    /// Lookup hops taken
    pub lookup_hops: usize,

    /// Messages dropped by the network
    pub messages_lost: usize,

    /// Communication failures reported back to routing services
    pub failures_reported: usize,

    /// Average messages per node per round
    pub messages_per_node_per_round: f64,
}

// ============================================================================
// Aggregation
// ============================================================================

/// Aggregate per-node table readings into a health snapshot.
pub fn calculate_table_health(route_counts: &[usize], redundancy_ratios: &[f64]) -> TableHealth {
    if route_counts.is_empty() {
        return TableHealth::default();
    }

    let min_routes = route_counts.iter().copied().min().unwrap_or(0);
    let max_routes = route_counts.iter().copied().max().unwrap_or(0);
    let avg_routes = route_counts.iter().sum::<usize>() as f64 / route_counts.len() as f64;
    let avg_redundancy_ratio = if redundancy_ratios.is_empty() {
        0.0
    } else {
        redundancy_ratios.iter().sum::<f64>() / redundancy_ratios.len() as f64
    };

    TableHealth {
        min_routes,
        max_routes,
        avg_routes,
        avg_redundancy_ratio,
    }
}

// ============================================================================
// Summary Output
// ============================================================================

impl SimulationResult {
    /// Print a human-readable summary to stdout
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║  SIMULATION RESULTS                                    ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration: {}", self.config_summary);
        println!("Rounds: {}", self.total_rounds);
        println!();

        let metrics = &self.final_metrics;

        println!("═══ Overlay Membership ═══");
        println!("  Active Nodes: {}", metrics.node_counts.active_nodes);
        println!("  Total Created: {}", metrics.node_counts.total_created);
        println!();

        println!("═══ Route Table Health ═══");
        println!(
            "  Routes per Node: min={}, max={}, avg={:.1}",
            metrics.table_health.min_routes,
            metrics.table_health.max_routes,
            metrics.table_health.avg_routes
        );
        println!(
            "  Avg Redundancy Ratio: {:.2}",
            metrics.table_health.avg_redundancy_ratio
        );
        println!();

        println!("═══ Lookup Performance ═══");
        println!("  Started: {}", self.lookup_stats.started);
        println!("  Resolved: {}", self.lookup_stats.resolved);
        println!("  Failed: {}", self.lookup_stats.failed);
        println!("  Success Rate: {:.1}%", self.lookup_stats.success_rate());
        println!("  Avg Hops: {:.2}", self.lookup_stats.avg_hops);
        println!("  Avg Replicas Seen: {:.2}", self.lookup_stats.avg_replicas);
        if !self.lookup_stats.hop_histogram.is_empty() {
            println!("\n  Hop Distribution:");
            for (hops, count) in &self.lookup_stats.hop_histogram {
                println!("    {:3} hops: {:6}", hops, count);
            }
        }
        println!();

        println!("═══ Message Overhead ═══");
        println!("  Total Messages: {}", self.message_overhead.total_messages);
        println!("  Gossip: {}", self.message_overhead.gossip_sent);
        println!("  Lookup Hops: {}", self.message_overhead.lookup_hops);
        println!("  Lost: {}", self.message_overhead.messages_lost);
        println!("  Failures Reported: {}", self.message_overhead.failures_reported);
        println!(
            "  Per Node/Round: {:.2}",
            self.message_overhead.messages_per_node_per_round
        );
        println!();
    }
}
