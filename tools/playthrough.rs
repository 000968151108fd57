/// Playthrough: interactive shell for walking authored dialogue.
///
/// Usage: playthrough <content_dir> [--start <node>] [--state <state.json>]
///
/// Commands:
///   <n>                  - take the n-th listed choice
///   look                 - show the current node again
///   goto <node>          - jump to a node (redirects and fallback apply)
///   state                - print trust, relationships, flags and orbs
///   trust <char> <n>     - set trust for a character
///   flag <name>          - set a global flag
///   hidden               - toggle listing of hidden choices
///   save <file>          - write the state as JSON
///   load <file>          - read a JSON state
///   help                 - list commands
///   quit                 - exit

use std::io::{self, BufRead, Write};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use terminus_engine::core::engine::DialogueEngine;
use terminus_engine::core::evaluator::EvaluatedChoice;
use terminus_engine::core::processing::{EchoTone, StateUpdate, Unlock};
use terminus_engine::schema::character::{CharacterId, MAX_TRUST, MIN_TRUST};
use terminus_engine::schema::patterns::Pattern;
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
        return;
    }

    let content_dir = &args[1];
    let mut start = None;
    let mut state_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--start" if i + 1 < args.len() => {
                i += 1;
                start = Some(args[i].clone());
            }
            "--state" if i + 1 < args.len() => {
                i += 1;
                state_path = Some(args[i].clone());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    let engine = match DialogueEngine::load(content_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("ERROR: failed to load '{}': {}", content_dir, e);
            process::exit(1);
        }
    };

    let mut state = match state_path {
        Some(path) => match read_state(&path) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                process::exit(1);
            }
        },
        None => GameState::new(),
    };

    let mut current = start.unwrap_or_else(|| engine.settings().hub.hub_node_id.clone());
    let mut show_hidden = false;

    println!(
        "Loaded {} graphs ({} nodes). Type 'help' for commands.\n",
        engine.registry().graphs().len(),
        engine.registry().node_count()
    );
    show_node(&engine, &mut current, &state, show_hidden);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("terminus> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        if let Ok(n) = cmd.parse::<usize>() {
            take_choice(&engine, &mut current, &mut state, n, show_hidden);
            continue;
        }

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "look" | "l" => show_node(&engine, &mut current, &state, show_hidden),
            "goto" => {
                if parts.len() < 2 {
                    println!("Usage: goto <node>");
                    continue;
                }
                current = parts[1].to_string();
                show_node(&engine, &mut current, &state, show_hidden);
            }
            "state" => print_state(&engine, &state),
            "trust" => {
                let value = parts.get(2).and_then(|v| v.parse::<i32>().ok());
                match (parts.get(1), value) {
                    (Some(character), Some(value)) => {
                        let id = CharacterId::new(*character);
                        state.character_mut(&id).trust = value.clamp(MIN_TRUST, MAX_TRUST);
                        println!("Trust for {} set to {}", engine.roster().display_name(&id), state.trust(&id));
                    }
                    _ => println!("Usage: trust <char> <n>"),
                }
            }
            "flag" => match parts.get(1) {
                Some(flag) => {
                    state.global_flags.insert(flag.to_string());
                    println!("Set flag '{}'", flag);
                }
                None => println!("Usage: flag <name>"),
            },
            "hidden" => {
                show_hidden = !show_hidden;
                println!("Hidden choices {}", if show_hidden { "shown" } else { "hidden" });
            }
            "save" => match parts.get(1) {
                Some(path) => match serde_json::to_string_pretty(&state) {
                    Ok(json) => match std::fs::write(path, json + "\n") {
                        Ok(()) => println!("Saved to {}", path),
                        Err(e) => println!("ERROR: {}", e),
                    },
                    Err(e) => println!("ERROR: {}", e),
                },
                None => println!("Usage: save <file>"),
            },
            "load" => match parts.get(1) {
                Some(path) => match read_state(path) {
                    Ok(loaded) => {
                        state = loaded;
                        println!("Loaded {}", path);
                    }
                    Err(e) => println!("ERROR: {}", e),
                },
                None => println!("Usage: load <file>"),
            },
            _ => println!("Unknown command: {}. Type 'help' for commands.", cmd),
        }
    }
}

/// Print `current`, rewriting it to the node actually shown.
fn show_node(engine: &DialogueEngine, current: &mut String, state: &GameState, show_hidden: bool) {
    let view = match engine.evaluate_node(current, state) {
        Ok(view) => view,
        Err(e) => {
            println!("ERROR: {}", e);
            return;
        }
    };

    if view.degraded {
        println!("[node '{}' is missing; showing '{}']", current, view.node_id);
    } else if view.redirect_path.was_redirected() {
        println!("[redirected: {}]", view.redirect_path.path.join(" -> "));
    }
    *current = view.node_id.to_string();

    println!("\n--- {} ({}) ---", view.speaker, view.node_id);
    match &view.content.emotion {
        Some(emotion) => println!("[{}] {}", emotion, view.content.text),
        None => println!("{}", view.content.text),
    }
    println!();

    if view.terminal {
        println!("(The End)");
        return;
    }

    for (n, choice) in listed(&view.choices, show_hidden).enumerate() {
        let marker = if choice.synthesized { "*" } else { " " };
        if choice.is_available() {
            println!(" {}{}. {}", marker, n + 1, choice.choice.text);
        } else if let Some(reason) = &choice.reason {
            let progress = reason
                .progress
                .map(|p| format!(" [{}/{}]", p.current, p.required))
                .unwrap_or_default();
            let state = if choice.visible { "locked" } else { "hidden" };
            println!(
                " {}{}. ({}) {}: {}{}",
                marker,
                n + 1,
                state,
                choice.choice.text,
                reason.why,
                progress
            );
        }
    }
    println!();
}

fn listed<'v, 'a>(
    choices: &'v [EvaluatedChoice<'a>],
    show_hidden: bool,
) -> impl Iterator<Item = &'v EvaluatedChoice<'a>> {
    choices.iter().filter(move |c| show_hidden || c.visible)
}

fn take_choice(
    engine: &DialogueEngine,
    current: &mut String,
    state: &mut GameState,
    n: usize,
    show_hidden: bool,
) {
    let choice_id = {
        let view = match engine.evaluate_node(current, state) {
            Ok(view) => view,
            Err(e) => {
                println!("ERROR: {}", e);
                return;
            }
        };
        let Some(choice) = n.checked_sub(1).and_then(|ix| listed(&view.choices, show_hidden).nth(ix)) else {
            println!("No choice {}", n);
            return;
        };
        choice.choice_id().to_string()
    };

    match engine.select_choice(current, &choice_id, state) {
        Ok(update) => {
            report_update(engine, &update);
            update.apply(state, now_millis());
            *current = update.next_node_id;
            show_node(engine, current, state, show_hidden);
        }
        Err(e) => println!("{}", e),
    }
}

fn report_update(engine: &DialogueEngine, update: &StateUpdate) {
    let name = engine.roster().display_name(&update.character_id);
    let trust = &update.trust;
    if trust.applied_delta != 0 {
        println!(
            "  trust with {} {:+} ({} -> {}, {:?})",
            name, trust.applied_delta, trust.before, trust.after, trust.resonance
        );
    }
    if let Some(change) = &update.relationship {
        println!("  {} now sees you as {}", name, change.to.name());
    }
    if let Some(echo) = &update.echo {
        let tone = match echo.tone {
            EchoTone::Warm => "+",
            EchoTone::Cool => "-",
        };
        println!("  ({}) {}", tone, echo.text);
    }
    for unlock in &update.unlocks {
        match unlock {
            Unlock::RelationshipMilestone { character_id, status } => println!(
                "  ** {} is now your {}",
                engine.roster().display_name(character_id),
                status.name()
            ),
            Unlock::OrbMilestone { pattern, fill } => {
                println!("  ** {} orb reached {}%", pattern.name(), fill)
            }
            Unlock::ComboUnlocked { combo } => println!("  ** combo unlocked: {}", combo),
            Unlock::Transformation { character_id, id } => println!(
                "  ** {} changes: {}",
                engine.roster().display_name(character_id),
                id
            ),
        }
    }
}

fn print_state(engine: &DialogueEngine, state: &GameState) {
    println!("Characters:");
    for (id, character) in &state.characters {
        println!(
            "  {:<22} trust {:>2}  {:<12} knows {:?}",
            engine.roster().display_name(id),
            character.trust,
            character.relationship.name(),
            sorted(character.knowledge_flags.iter())
        );
    }
    println!("Flags: {:?}", sorted(state.global_flags.iter()));
    println!("Orbs:");
    for pattern in Pattern::ALL {
        println!(
            "  {:<11} {:>3} ({}%)",
            pattern.name(),
            state.patterns.get(pattern),
            state.patterns.fill_percent(pattern)
        );
    }
    if !state.skills.0.is_empty() {
        println!("Skills:");
        for (skill, level) in &state.skills.0 {
            println!("  {:<14} {:.2}", skill, level);
        }
    }
}

fn sorted<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut items: Vec<&str> = items.map(String::as_str).collect();
    items.sort_unstable();
    items
}

fn read_state(path: &str) -> Result<GameState, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path, e))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid state '{}': {}", path, e))
}

fn now_millis() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

fn print_usage() {
    println!("Usage: playthrough <content_dir> [--start <node>] [--state <state.json>]");
}

fn print_help() {
    println!("Commands:");
    println!("  <n>                take the n-th listed choice");
    println!("  look               show the current node again");
    println!("  goto <node>        jump to a node");
    println!("  state              print trust, relationships, flags and orbs");
    println!("  trust <char> <n>   set trust for a character");
    println!("  flag <name>        set a global flag");
    println!("  hidden             toggle listing of hidden choices");
    println!("  save <file>        write the state as JSON");
    println!("  load <file>        read a JSON state");
    println!("  help               this list");
    println!("  quit               exit");
}
