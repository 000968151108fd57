/// Simulator integration tests: the clean terminus content and a fixture
/// seeded with every kind of content failure.

use std::path::Path;

use terminus_engine::core::baseline::{Baseline, SimConfig};
use terminus_engine::core::deadlock::{FailureKind, NarrativeSimOptions};
use terminus_engine::core::engine::DialogueEngine;
use terminus_engine::core::reachability::ReachabilityOptions;
use terminus_engine::core::simulation::{SimulationLimits, TraceHop, TruncationCause};
use terminus_engine::schema::character::CharacterId;
use terminus_engine::schema::graph::{Choice, DialogueGraph, DialogueNode};
use terminus_engine::schema::state::GameState;

fn generous() -> SimulationLimits {
    SimulationLimits {
        max_steps: 100_000,
        max_states: 100_000,
        max_unique_states_per_node: 4_096,
    }
}

fn hop(node: &str, choice: &str, next: &str) -> TraceHop {
    TraceHop {
        node_id: node.to_string(),
        choice_id: choice.to_string(),
        next_node_id: next.to_string(),
    }
}

#[test]
fn two_node_graph_reaches_both_nodes() {
    let graph = DialogueGraph::new(
        "samuel",
        CharacterId::new("samuel"),
        "a",
        vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("to_b", "Go on.", "b")),
            DialogueNode::new("b", "Samuel", "B.").terminal(),
        ],
    )
    .unwrap();
    let engine = DialogueEngine::builder().with_graph(graph).build().unwrap();
    let report = engine
        .simulate_reachability(&GameState::new(), &ReachabilityOptions::new("a"))
        .unwrap();
    assert!(report.reached("a") && report.reached("b"));
    assert!(!report.truncated);
    assert!(report.unreachable_nodes(engine.registry()).is_empty());
}

#[test]
fn terminus_is_fully_reachable_from_the_hub() {
    let engine = DialogueEngine::load("content/terminus").unwrap();
    let options = ReachabilityOptions::new("station_hub").with_limits(generous());
    let report = engine.simulate_reachability(&GameState::new(), &options).unwrap();
    assert!(!report.truncated, "{:?}", report.truncation);
    assert!(report.dangling_targets.is_empty());
    for node in ["samuel_blessing", "maya_blueprint", "station_departure"] {
        assert!(report.reached(node), "{} was not reached", node);
    }
    assert_eq!(report.unreachable_nodes(engine.registry()), Vec::<String>::new());
}

#[test]
fn terminus_has_no_narrative_failures() {
    let engine = DialogueEngine::load("content/terminus").unwrap();
    let report = engine
        .narrative_report(&NarrativeSimOptions {
            start_node_ids: vec!["station_hub".to_string()],
            limits: generous(),
            ..Default::default()
        })
        .unwrap();
    assert!(report.is_clean(), "{:#?}", report.failures);
    assert!(report.unreachable_node_ids.is_empty());
}

#[test]
fn tight_limits_truncate_without_failing() {
    let engine = DialogueEngine::load("content/terminus").unwrap();
    let options = ReachabilityOptions::new("station_hub").with_limits(SimulationLimits {
        max_steps: 3,
        ..Default::default()
    });
    let report = engine.simulate_reachability(&GameState::new(), &options).unwrap();
    assert!(report.truncated);
    assert_eq!(report.truncation, Some(TruncationCause::MaxSteps));
    assert!(!report.reached("station_departure"));
}

#[test]
fn broken_fixture_reports_each_failure_kind() {
    let engine = DialogueEngine::load("content/broken").unwrap();
    let report = engine.narrative_report(&NarrativeSimOptions::default()).unwrap();

    let kinds: Vec<FailureKind> = report.failures.iter().map(|f| f.kind).collect();
    for kind in [
        FailureKind::SoftDeadlock,
        FailureKind::DanglingTarget,
        FailureKind::RedirectCycle,
        FailureKind::RedirectTruncated,
        FailureKind::EvaluationError,
    ] {
        assert!(kinds.contains(&kind), "missing {}", kind);
    }

    let deadlock = report.failure("soft_deadlock:porter_locked_room").unwrap();
    assert_eq!(
        deadlock.trace,
        vec![hop("porter_intro", "porter_ask", "porter_locked_room")]
    );
    assert_eq!(deadlock.start_node_id, "porter_intro");

    let dangling = report
        .failure("dangling_target:porter_intro:porter_lost->porter_missing_node")
        .unwrap();
    assert_eq!(
        dangling.trace,
        vec![hop("porter_intro", "porter_lost", "porter_missing_node")]
    );

    let cycle = report.failure("redirect_cycle:porter_legacy").unwrap();
    assert_eq!(cycle.target.as_deref(), Some("porter_office"));

    let truncated = report.failure("redirect_truncated:porter_annex_1").unwrap();
    assert_eq!(truncated.target.as_deref(), Some("porter_records"));
    assert_eq!(
        truncated.trace,
        vec![hop("porter_intro", "porter_annex", "porter_annex_1")]
    );
}

#[test]
fn failures_are_deduplicated_across_starts() {
    let engine = DialogueEngine::load("content/broken").unwrap();
    let report = engine
        .narrative_report(&NarrativeSimOptions {
            start_node_ids: vec!["porter_intro".to_string(), "porter_intro".to_string()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.failure_keys().len(), report.failures.len());
    assert_eq!(report.failures.len(), 5);
}

#[test]
fn checked_in_baselines_match() {
    for name in ["terminus", "broken"] {
        let config_path = format!("content/sim/{}.json", name);
        let config_path = Path::new(&config_path);
        let config = SimConfig::load(config_path).unwrap();
        let engine = DialogueEngine::load(config.fixture_path(config_path)).unwrap();
        let report = engine.narrative_report(&config.options()).unwrap();

        let baseline = Baseline::load(Path::new(&format!("content/sim/{}.baseline.json", name))).unwrap();
        let diff = baseline.diff(&report);
        assert!(!diff.is_regression(), "{}: {:?}", name, diff.new_failures);
        assert!(diff.fixed.is_empty(), "{}: {:?}", name, diff.fixed);
    }
}

#[test]
fn missing_baseline_entry_is_a_regression() {
    let engine = DialogueEngine::load("content/broken").unwrap();
    let report = engine.narrative_report(&NarrativeSimOptions::default()).unwrap();

    let mut baseline = Baseline::from_report(&report);
    baseline.failures.remove("soft_deadlock:porter_locked_room");
    baseline.failures.insert("soft_deadlock:porter_retired".to_string());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");
    baseline.save(&path).unwrap();

    let diff = Baseline::load(&path).unwrap().diff(&report);
    assert!(diff.is_regression());
    assert_eq!(diff.new_failures, vec!["soft_deadlock:porter_locked_room"]);
    assert_eq!(diff.fixed, vec!["soft_deadlock:porter_retired"]);
}
