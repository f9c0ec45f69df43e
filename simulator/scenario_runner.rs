// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/bootstrap.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/bootstrap.yaml --seed 0x1234...

mod overlay;

use overlay::{EventSchedule, InitialOverlayState, OverlayConfig, OverlayRunner};
use std::env;
use std::fs;
use std::path::Path;

/// Simplified scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Configuration overrides
    config: ScenarioConfig,

    /// Event schedule
    #[serde(default)]
    events: EventSchedule,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ScenarioConfig {
    // Core settings
    rounds: usize,

    // Initial state
    initial_state: InitialOverlayState,

    // Routing service overrides (optional)
    #[serde(default)]
    redundancy: Option<f64>,

    // Workload overrides (optional)
    #[serde(default)]
    gossip: Option<GossipOverrides>,

    #[serde(default)]
    lookup: Option<LookupOverrides>,

    // Network config overrides (optional)
    #[serde(default)]
    network: Option<NetworkOverrides>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct GossipOverrides {
    fanout: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct LookupOverrides {
    lookups_per_round: Option<usize>,
    max_hops: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct NetworkOverrides {
    loss_fraction: Option<f64>,
    penalty_weight: Option<f64>,
}

fn main() {
    simple_logger::SimpleLogger::new().init().unwrap();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED_HEX]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/bootstrap.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/bootstrap.yaml --seed 0x123456...", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed
    let seed: Option<[u8; 32]> = if args.len() >= 4 && args[2] == "--seed" {
        Some(parse_seed_hex(&args[3]))
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<[u8; 32]>) {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("yaml")
                || path.extension().and_then(|s| s.to_str()) == Some("yml")
            {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, seed: Option<[u8; 32]>) {
    println!("Loading scenario from: {}", path.display());

    // Load and parse YAML
    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        std::process::exit(1);
    });

    // Print scenario header
    println!("\n╔════════════════════════════════════════════════════════╗");
    if let Some(ref name) = scenario.meta.name {
        println!("║  {}  {}", name, " ".repeat(54_usize.saturating_sub(name.len())));
    } else {
        println!("║  Scenario: {}  ", path.file_stem().unwrap().to_str().unwrap());
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    // Build configuration
    let mut config = OverlayConfig::default();

    // Apply scenario config
    config.rounds = scenario.config.rounds;
    config.initial_state = scenario.config.initial_state;
    config.events = scenario.events;
    config.seed = seed;

    if let Some(redundancy) = scenario.config.redundancy {
        config.redundancy = redundancy;
    }

    // Apply workload overrides
    if let Some(ref gossip_overrides) = scenario.config.gossip {
        if let Some(v) = gossip_overrides.fanout {
            config.gossip.fanout = v;
        }
    }
    if let Some(ref lookup_overrides) = scenario.config.lookup {
        if let Some(v) = lookup_overrides.lookups_per_round {
            config.lookup.lookups_per_round = v;
        }
        if let Some(v) = lookup_overrides.max_hops {
            config.lookup.max_hops = v;
        }
    }

    // Apply network config overrides
    if let Some(ref net_overrides) = scenario.config.network {
        if let Some(v) = net_overrides.loss_fraction {
            config.network.loss_fraction = v;
        }
        if let Some(v) = net_overrides.penalty_weight {
            config.network.penalty_weight = v;
        }
    }

    println!("Configuration:");
    println!("  Rounds: {}", config.rounds);
    println!("  Initial Nodes: {}", config.initial_state.num_nodes);
    println!("  Bootstrap Rounds: {}", config.initial_state.bootstrap_rounds);
    println!("  Redundancy: {}", config.redundancy);
    println!("  Loss Fraction: {}", config.network.loss_fraction);
    println!("\nStarting simulation...\n");

    // Run simulation
    let runner = OverlayRunner::new(config);
    match runner.run() {
        Ok(result) => {
            result.print_summary();
            println!("\n✓ Scenario complete!\n");
        }
        Err(e) => {
            eprintln!("Simulation aborted: {}", e);
            std::process::exit(1);
        }
    }
}

fn parse_seed_hex(hex: &str) -> [u8; 32] {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut seed = [0u8; 32];

    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i >= 32 {
            break;
        }
        let byte_str = std::str::from_utf8(chunk).unwrap();
        seed[i] = u8::from_str_radix(byte_str, 16).unwrap_or_else(|e| {
            eprintln!("Invalid hex seed: {}", e);
            std::process::exit(1);
        });
    }

    seed
}
