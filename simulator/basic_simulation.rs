// Basic Overlay Simulation Example

mod overlay;

use overlay::{
    EventSchedule, NodeSelection, OverlayConfig, OverlayEvent, OverlayRunner, ScheduledEvent,
};

fn main() {
    simple_logger::SimpleLogger::new().init().unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║    Overlay Routing Simulator                           ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    // Create configuration
    let mut config = OverlayConfig::default();
    config.rounds = 300;
    config.seed = Some([42u8; 32]);

    // Medium-sized ring with a short bootstrap phase
    config.initial_state.num_nodes = 40;
    config.initial_state.bootstrap_rounds = 30;

    // Steady lookup traffic with a slightly lossy network
    config.lookup.lookups_per_round = 20;
    config.network.loss_fraction = 0.02;
    config.output.enable_console = true;

    // A burst of churn mid-run: a few crashes, then replacements join
    config.events = EventSchedule {
        events: vec![
            ScheduledEvent {
                round: 100,
                event: OverlayEvent::NodeCrash {
                    selection: NodeSelection::Random { count: 4 },
                },
            },
            ScheduledEvent {
                round: 150,
                event: OverlayEvent::NodeJoin { count: 6 },
            },
            ScheduledEvent {
                round: 200,
                event: OverlayEvent::NodeLeave {
                    selection: NodeSelection::Random { count: 2 },
                },
            },
        ],
    };

    let runner = OverlayRunner::new(config);
    match runner.run() {
        Ok(result) => result.print_summary(),
        Err(e) => {
            eprintln!("Simulation aborted: {}", e);
            std::process::exit(1);
        }
    }
}
