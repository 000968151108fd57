/// Graph Linter: static checks over a content directory, without playing it.
///
/// Usage: graph_linter <content_dir> [--strict]
///
/// `--strict` treats warnings as errors.

use std::collections::BTreeSet;
use std::process;

use terminus_engine::core::engine::DialogueEngine;
use terminus_engine::schema::graph::DialogueNode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terminus_engine=error".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: graph_linter <content_dir> [--strict]");
        process::exit(0);
    }

    let content_dir = &args[1];
    let strict = args[2..].iter().any(|a| a == "--strict");

    let engine = match DialogueEngine::load(content_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: Failed to load content: {}", e);
            process::exit(1);
        }
    };

    println!(
        "Loaded {} graphs, {} nodes, {} combos, {} redirects",
        engine.registry().graphs().len(),
        engine.registry().node_count(),
        engine.combos().len(),
        engine.registry().redirects().len()
    );

    let (errors, warnings) = lint_content(&engine);

    println!("\n=== Graph Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() && !(strict && !warnings.is_empty()) {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn lint_content(engine: &DialogueEngine) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let registry = engine.registry();
    let hub = &engine.settings().hub;

    // Every node a choice or graph entry points at, after redirects.
    let mut targeted: BTreeSet<String> = BTreeSet::new();
    for graph in registry.graphs() {
        targeted.insert(graph.start_node_id().to_string());
    }
    if registry.locate(&hub.hub_node_id).is_some() {
        targeted.insert(hub.hub_node_id.clone());
    }

    for graph in registry.graphs() {
        if !engine.roster().contains(graph.character_id()) {
            warnings.push(format!(
                "graph '{}' belongs to '{}', who has no character profile",
                graph.id(),
                graph.character_id()
            ));
        }

        for node in graph.nodes() {
            lint_content_variations(engine, node, &mut errors, &mut warnings);

            if node.terminal && !node.choices.is_empty() {
                warnings.push(format!(
                    "terminal node '{}' declares {} choices that can never be taken",
                    node.id,
                    node.choices.len()
                ));
            }
            if node.choices.is_empty() && !node.terminal {
                if hub.wants_return(node) {
                    targeted.insert(hub.hub_node_id.clone());
                } else {
                    errors.push(format!(
                        "node '{}' has no choices and is neither terminal nor a '{}' node",
                        node.id, hub.return_suffix
                    ));
                }
            }

            for choice in &node.choices {
                let at = format!("{}/{}", node.id, choice.choice_id);

                for condition in &choice.conditions {
                    if let Err(e) = condition.validate(engine.combos()) {
                        errors.push(format!("{}: malformed condition: {}", at, e));
                    }
                    if let Some(subject) = condition.subject(graph.character_id()) {
                        if !engine.roster().contains(subject) {
                            errors.push(format!("{}: condition reads unknown character '{}'", at, subject));
                        }
                    }
                }

                if let Some(orb) = &choice.required_orb_fill {
                    if orb.threshold > 100 {
                        errors.push(format!(
                            "{}: orb fill threshold {} is above 100 percent",
                            at, orb.threshold
                        ));
                    }
                }

                if let Some(consequence) = &choice.consequence {
                    if let Some(character) = &consequence.character {
                        if !engine.roster().contains(character) {
                            errors.push(format!(
                                "{}: consequence targets unknown character '{}'",
                                at, character
                            ));
                        }
                    }
                }

                match registry.resolve(&choice.next_node_id) {
                    Ok(resolved) => {
                        targeted.insert(resolved.node.id.clone());
                        let path = &resolved.redirect_path;
                        if path.cycle_detected {
                            errors.push(format!(
                                "{}: redirect cycle via {}",
                                at,
                                path.path.join(" -> ")
                            ));
                        } else if path.truncated {
                            errors.push(format!(
                                "{}: redirect chain from '{}' exceeds {} hops",
                                at,
                                path.requested,
                                engine.settings().max_redirect_hops
                            ));
                        } else if path.was_redirected() {
                            warnings.push(format!(
                                "{}: targets legacy id '{}' (now '{}')",
                                at,
                                path.requested,
                                path.resolved_id()
                            ));
                        }
                    }
                    Err(_) => errors.push(format!(
                        "{}: target '{}' does not exist",
                        at, choice.next_node_id
                    )),
                }
            }
        }
    }

    for (from, to) in registry.redirects().iter() {
        if registry.locate(from).is_some() {
            warnings.push(format!(
                "redirect '{}' -> '{}' shadows an existing node",
                from, to
            ));
        }
        if registry.resolve(from).is_err() {
            errors.push(format!("redirect '{}' -> '{}' never reaches a node", from, to));
        }
    }

    for graph in registry.graphs() {
        for node in graph.nodes() {
            if !targeted.contains(&node.id) {
                warnings.push(format!("node '{}' is never targeted by any choice", node.id));
            }
        }
    }

    (errors, warnings)
}

fn lint_content_variations(
    engine: &DialogueEngine,
    node: &DialogueNode,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let mut seen = BTreeSet::new();
    for variation in &node.content {
        if !seen.insert(variation.variation_id.as_str()) {
            errors.push(format!(
                "node '{}' repeats content variation '{}'",
                node.id, variation.variation_id
            ));
        }
        if variation.text.trim().is_empty() {
            warnings.push(format!(
                "node '{}' variation '{}' has empty text",
                node.id, variation.variation_id
            ));
        }
        for condition in &variation.conditions {
            if let Err(e) = condition.validate(engine.combos()) {
                errors.push(format!(
                    "node '{}' variation '{}': malformed condition: {}",
                    node.id, variation.variation_id, e
                ));
            }
        }
    }
    if node.content.iter().all(|v| !v.conditions.is_empty()) {
        warnings.push(format!(
            "node '{}' has no ungated content variation to fall back on",
            node.id
        ));
    }
}
