/// Terminus walkthrough: a scripted playthrough of Samuel's arc.
///
/// Hub → bench → the photograph → the promise → platform nine, printing
/// each node, the locks along the way and what every choice changes.
///
/// Run with: cargo run --example terminus_walkthrough

use terminus_engine::core::deadlock::NarrativeSimOptions;
use terminus_engine::core::engine::DialogueEngine;
use terminus_engine::core::processing::Unlock;
use terminus_engine::schema::state::GameState;

const SCRIPT: [(&str, &str); 9] = [
    ("station_hub", "hub_to_samuel"),
    ("samuel_intro", "samuel_sit"),
    ("samuel_bench", "samuel_ask_photo"),
    ("samuel_daughter", "samuel_daughter_stay"),
    ("samuel_bench", "samuel_ask_photo"),
    ("samuel_daughter", "samuel_promise"),
    ("samuel_blessing", "samuel_blessing_leave"),
    ("samuel_hub_return", "samuel_hub_return__return_to_hub"),
    ("station_hub", "hub_board_train"),
];

fn main() {
    let engine = DialogueEngine::load("content/terminus").expect("Failed to load terminus content");
    let mut state = GameState::new();

    println!("=== Grand Central Terminus ===\n");

    for (step, (node_id, choice_id)) in SCRIPT.iter().enumerate() {
        let view = engine
            .evaluate_node(node_id, &state)
            .expect("Failed to evaluate node");

        println!("--- {}: {} ---", view.speaker, view.node_id);
        println!("{}", view.content.text);
        for choice in &view.choices {
            if !choice.visible {
                continue;
            }
            match &choice.reason {
                Some(reason) if !choice.enabled => {
                    println!("   [locked] {} ({})", choice.choice.text, reason.why)
                }
                _ => println!("   > {}", choice.choice.text),
            }
        }

        // The first visit to the daughter scene shows the promise locked.
        if step == 3 {
            if let Err(e) = engine.select_choice(node_id, "samuel_promise", &state) {
                println!("\n(tried to promise too early: {})", e);
            }
        }

        let update = engine
            .select_choice(node_id, choice_id, &state)
            .expect("Scripted choice should be available");
        let chosen = view
            .choices
            .iter()
            .find(|c| c.choice_id() == *choice_id)
            .map(|c| c.choice.text.to_string())
            .unwrap_or_default();
        println!("\nYou: {}", chosen);

        if update.trust.applied_delta != 0 {
            println!(
                "   trust {} -> {} ({:?} resonance)",
                update.trust.before, update.trust.after, update.trust.resonance
            );
        }
        if let Some(echo) = &update.echo {
            println!("   \"{}\"", echo.text);
        }
        for unlock in &update.unlocks {
            match unlock {
                Unlock::RelationshipMilestone { status, .. } => {
                    println!("   ** Samuel now counts you as a {}", status.name())
                }
                Unlock::Transformation { id, .. } => println!("   ** transformation: {}", id),
                Unlock::OrbMilestone { pattern, fill } => {
                    println!("   ** {} orb at {}%", pattern.name(), fill)
                }
                Unlock::ComboUnlocked { combo } => println!("   ** combo: {}", combo),
            }
        }
        println!();

        update.apply(&mut state, None);
    }

    let ending = engine
        .evaluate_node("station_departure", &state)
        .expect("Failed to evaluate ending");
    println!("--- {} ---", ending.node_id);
    println!("{}\n", ending.content.text);

    let report = engine
        .narrative_report(&NarrativeSimOptions::default())
        .expect("Simulation failed");
    println!(
        "Content check: {} states explored, {} failures, {} unreachable nodes",
        report.expanded_states,
        report.failures.len(),
        report.unreachable_node_ids.len()
    );
}
