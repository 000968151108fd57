/// Narrative Simulator: explores a content fixture for deadlocks, dangling
/// targets and broken redirects, then compares the failures to a baseline.
///
/// Usage: narrative_sim <config.json> [--baseline <path>] [--write-baseline] [--json <out>]
///
/// Exits 1 when a failure is found that the baseline does not list.

use std::path::{Path, PathBuf};
use std::process;

use terminus_engine::core::baseline::{Baseline, SimConfig};
use terminus_engine::core::engine::DialogueEngine;
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

    let config_path = PathBuf::from(&args[1]);
    let mut baseline_path = None;
    let mut write_baseline = false;
    let mut json_out = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--baseline" if i + 1 < args.len() => {
                i += 1;
                baseline_path = Some(PathBuf::from(&args[i]));
            }
            "--json" if i + 1 < args.len() => {
                i += 1;
                json_out = Some(PathBuf::from(&args[i]));
            }
            "--write-baseline" => write_baseline = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                process::exit(2);
            }
        }
        i += 1;
    }
    let baseline_path = baseline_path.unwrap_or_else(|| default_baseline_path(&config_path));

    let config = match SimConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(2);
        }
    };

    let fixture = config.fixture_path(&config_path);
    let engine = match DialogueEngine::load(&fixture) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: failed to load '{}': {}", fixture.display(), e);
            process::exit(2);
        }
    };
    println!(
        "Loaded {} graphs ({} nodes) from {}",
        engine.registry().graphs().len(),
        engine.registry().node_count(),
        fixture.display()
    );

    let report = match engine.narrative_report(&config.options()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(2);
        }
    };

    if let Some(path) = json_out {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json + "\n") {
                    eprintln!("ERROR: cannot write '{}': {}", path.display(), e);
                    process::exit(2);
                }
            }
            Err(e) => {
                eprintln!("ERROR: {}", e);
                process::exit(2);
            }
        }
    }

    println!("\n=== Narrative Simulation Report ===\n");
    println!(
        "Starts: {}\nExpanded states: {}\nVisited nodes: {}",
        report.start_node_ids.join(", "),
        report.expanded_states,
        report.visited_node_ids.len()
    );
    for truncated in &report.truncations {
        println!(
            "WARNING: exploration from '{}' truncated ({:?})",
            truncated.start_node_id, truncated.cause
        );
    }
    for node in &report.unreachable_node_ids {
        println!("WARNING: node '{}' was never reached", node);
    }

    if write_baseline {
        let baseline = Baseline::from_report(&report);
        if let Err(e) = baseline.save(&baseline_path) {
            eprintln!("ERROR: {}", e);
            process::exit(2);
        }
        println!(
            "\nWrote {} failures to {}",
            baseline.failures.len(),
            baseline_path.display()
        );
        process::exit(0);
    }

    let baseline = match Baseline::load_or_empty(&baseline_path) {
        Ok(baseline) => baseline,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(2);
        }
    };
    let diff = baseline.diff(&report);

    for key in &diff.new_failures {
        println!("ERROR: new failure {}", key);
        if let Some(failure) = report.failure(key) {
            println!("    {}", failure.message);
            println!("    from {}", failure.start_node_id);
            for hop in &failure.trace {
                println!(
                    "      {} --{}--> {}",
                    hop.node_id, hop.choice_id, hop.next_node_id
                );
            }
        }
    }
    for key in &diff.fixed {
        println!("FIXED: {} (remove it from the baseline)", key);
    }

    println!(
        "\nSummary: {} new, {} known, {} fixed",
        diff.new_failures.len(),
        diff.known.len(),
        diff.fixed.len()
    );

    if diff.is_regression() {
        process::exit(1);
    }
}

/// `sim/terminus.json` pairs with `sim/terminus.baseline.json`.
fn default_baseline_path(config_path: &Path) -> PathBuf {
    config_path.with_extension("baseline.json")
}

fn print_usage() {
    println!("Usage: narrative_sim <config.json> [--baseline <path>] [--write-baseline] [--json <out>]");
}
