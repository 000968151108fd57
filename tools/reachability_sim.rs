/// Reachability Simulator: lists which nodes a player can actually reach.
///
/// Usage: reachability_sim <content_dir> [--start <node>] [--max-steps <n>]
///        [--max-states <n>] [--per-node <n>] [--state <state.json>]

use std::path::Path;
use std::process;

use terminus_engine::core::engine::DialogueEngine;
use terminus_engine::core::reachability::ReachabilityOptions;
use terminus_engine::schema::state::GameState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terminus_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        process::exit(0);
    }

    let content_dir = &args[1];
    let mut start = None;
    let mut max_steps = None;
    let mut max_states = None;
    let mut per_node = None;
    let mut state_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--start" if i + 1 < args.len() => {
                i += 1;
                start = Some(args[i].clone());
            }
            "--max-steps" if i + 1 < args.len() => {
                i += 1;
                max_steps = Some(parse_count(&args[i]));
            }
            "--max-states" if i + 1 < args.len() => {
                i += 1;
                max_states = Some(parse_count(&args[i]));
            }
            "--per-node" if i + 1 < args.len() => {
                i += 1;
                per_node = Some(parse_count(&args[i]));
            }
            "--state" if i + 1 < args.len() => {
                i += 1;
                state_path = Some(args[i].clone());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                process::exit(2);
            }
        }
        i += 1;
    }

    let engine = match DialogueEngine::load(content_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: failed to load '{}': {}", content_dir, e);
            process::exit(2);
        }
    };

    let initial = match state_path {
        Some(path) => load_state(Path::new(&path)),
        None => GameState::new(),
    };

    // Default to the hub when there is one, otherwise the first graph.
    let start = start.unwrap_or_else(|| {
        let hub = &engine.settings().hub.hub_node_id;
        if engine.registry().locate(hub).is_some() {
            hub.clone()
        } else {
            engine
                .registry()
                .graphs()
                .first()
                .map(|g| g.start_node_id().to_string())
                .unwrap_or_default()
        }
    });

    let mut options = ReachabilityOptions::new(start);
    if let Some(n) = max_steps {
        options.max_steps = n;
    }
    if let Some(n) = max_states {
        options.max_states = n;
    }
    if let Some(n) = per_node {
        options.max_unique_states_per_node = n;
    }

    let report = match engine.simulate_reachability(&initial, &options) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(2);
        }
    };
    let unreachable = report.unreachable_nodes(engine.registry());

    println!("\n=== Reachability from '{}' ===\n", report.start_node_id);
    for node in &report.visited_node_ids {
        println!("  reached  {}", node);
    }
    for node in &unreachable {
        println!("  MISSING  {}", node);
    }
    for dangling in &report.dangling_targets {
        println!(
            "ERROR: {} --{}--> '{}' does not exist",
            dangling.node_id, dangling.choice_id, dangling.target
        );
    }
    for node in &report.capped_node_ids {
        println!("WARNING: per-node state cap reached at '{}'", node);
    }
    if let Some(cause) = report.truncation {
        println!("WARNING: exploration truncated ({:?})", cause);
    }

    println!(
        "\nSummary: {} reached, {} unreachable, {} states expanded",
        report.visited_node_ids.len(),
        unreachable.len(),
        report.expanded_states
    );

    if !unreachable.is_empty() || !report.dangling_targets.is_empty() {
        process::exit(1);
    }
}

fn parse_count(raw: &str) -> usize {
    match raw.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("ERROR: '{}' is not a count", raw);
            process::exit(2);
        }
    }
}

fn load_state(path: &Path) -> GameState {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()));
    match parsed {
        Ok(state) => state,
        Err(e) => {
            eprintln!("ERROR: cannot read state '{}': {}", path.display(), e);
            process::exit(2);
        }
    }
}

fn print_usage() {
    println!("Usage: reachability_sim <content_dir> [--start <node>] [--max-steps <n>]");
    println!("       [--max-states <n>] [--per-node <n>] [--state <state.json>]");
}
