/// Bounded breadth-first exploration shared by the reachability and
/// narrative-path simulators.
///
/// The explorer walks (node × coarsened state) pairs. Only state dimensions
/// some gate in the registry actually reads are kept in the fingerprint, and
/// numeric values saturate at the highest threshold any gate compares them
/// against, so states that no choice can tell apart are expanded once.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

use crate::core::evaluator::ChoiceEvaluator;
use crate::core::navigator::{GraphRegistry, NodeRef, RedirectPath};
use crate::core::processing::ChoiceProcessor;
use crate::schema::character::{CharacterId, CONFIDANT_TRUST};
use crate::schema::condition::Condition;
use crate::schema::patterns::{score_for_fill, ComboCatalog, Pattern, SKILL_STEP};
use crate::schema::state::GameState;

pub const DEFAULT_MAX_STEPS: usize = 5_000;
pub const DEFAULT_MAX_STATES: usize = 20_000;
pub const DEFAULT_MAX_UNIQUE_STATES_PER_NODE: usize = 32;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("start node not found: {0}")]
    StartNodeNotFound(String),
    #[error("simulation limits must all be greater than zero")]
    InvalidLimits,
}

/// Resource bounds for one exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationLimits {
    /// Maximum number of states expanded.
    pub max_steps: usize,
    /// Maximum number of distinct states admitted to the frontier.
    pub max_states: usize,
    /// Maximum number of distinct fingerprints admitted per node.
    pub max_unique_states_per_node: usize,
}

impl Default for SimulationLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_states: DEFAULT_MAX_STATES,
            max_unique_states_per_node: DEFAULT_MAX_UNIQUE_STATES_PER_NODE,
        }
    }
}

impl SimulationLimits {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.max_steps == 0 || self.max_states == 0 || self.max_unique_states_per_node == 0 {
            return Err(SimulationError::InvalidLimits);
        }
        Ok(())
    }
}

/// Which bound stopped an exploration early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationCause {
    MaxSteps,
    MaxStates,
}

/// One step of a reproduction trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceHop {
    pub node_id: String,
    pub choice_id: String,
    pub next_node_id: String,
}

/// Something wrong with the content, found while exploring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A non-terminal node offered no visible and enabled choice.
    SoftDeadlock { node_id: String, trace: Vec<TraceHop> },
    /// A choice points at a node no graph declares.
    DanglingTarget {
        node_id: String,
        choice_id: String,
        target: String,
        trace: Vec<TraceHop>,
    },
    RedirectCycle { path: RedirectPath, trace: Vec<TraceHop> },
    RedirectTruncated { path: RedirectPath, trace: Vec<TraceHop> },
    /// Evaluation or processing at `node_id` failed outright.
    EvaluationError {
        node_id: String,
        message: String,
        trace: Vec<TraceHop>,
    },
}

/// Everything the explorer needs from a built engine.
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext<'a> {
    pub registry: &'a GraphRegistry,
    pub combos: &'a ComboCatalog,
    pub evaluator: ChoiceEvaluator<'a>,
    pub processor: ChoiceProcessor<'a>,
}

/// The state dimensions read by any choice gate in a registry.
#[derive(Debug, Clone, Default)]
pub struct RelevanceIndex {
    /// Highest trust value any gate distinguishes, per character.
    trust: BTreeMap<CharacterId, i32>,
    relationships: BTreeSet<CharacterId>,
    global_flags: BTreeSet<String>,
    knowledge: BTreeSet<(CharacterId, String)>,
    patterns: BTreeMap<Pattern, u32>,
    /// Skills named by referenced combos, with the highest level required.
    skills: BTreeMap<String, f64>,
}

impl RelevanceIndex {
    pub fn build(registry: &GraphRegistry, catalog: &ComboCatalog) -> Self {
        let mut combo_ids = BTreeSet::new();
        let mut index = Self::default();

        for graph in registry.graphs() {
            let owner = graph.character_id();
            for choice in graph.nodes().iter().flat_map(|n| n.choices.iter()) {
                if let Some(req) = &choice.required_orb_fill {
                    index.raise_pattern(req.pattern, score_for_fill(req.threshold));
                }
                for condition in &choice.conditions {
                    match condition {
                        Condition::Trust { character, min, max } => {
                            let subject = character.clone().unwrap_or_else(|| owner.clone());
                            // `max` splits at max + 1: values above it fail the gate.
                            let top = max.map(|m| m.saturating_add(1)).max(*min).unwrap_or(0);
                            index.raise_trust(subject, top);
                        }
                        Condition::Relationship { character, .. } => {
                            // Status follows trust, so progress toward it must stay visible.
                            let subject = character.clone().unwrap_or_else(|| owner.clone());
                            index.raise_trust(subject.clone(), CONFIDANT_TRUST);
                            index.relationships.insert(subject);
                        }
                        Condition::RequiresGlobalFlags { flags }
                        | Condition::ForbidsGlobalFlags { flags } => {
                            index.global_flags.extend(flags.iter().cloned());
                        }
                        Condition::RequiresKnowledge { character, flags } => {
                            let subject = character.clone().unwrap_or_else(|| owner.clone());
                            for flag in flags {
                                index.knowledge.insert((subject.clone(), flag.clone()));
                            }
                        }
                        Condition::PatternAtLeast { pattern, min } => {
                            index.raise_pattern(*pattern, *min);
                        }
                        Condition::Combo { combo } => {
                            combo_ids.insert(combo.clone());
                        }
                    }
                }
            }
        }

        // Unknown combos are left out; the evaluator rejects them on contact.
        for combo in combo_ids.iter().filter_map(|id| catalog.get(id)) {
            for req in &combo.requirements {
                let entry = index.skills.entry(req.skill.clone()).or_insert(0.0);
                *entry = entry.max(req.min_level);
            }
        }
        index
    }

    fn raise_trust(&mut self, character: CharacterId, top: i32) {
        let entry = self.trust.entry(character).or_default();
        *entry = (*entry).max(top);
    }

    fn raise_pattern(&mut self, pattern: Pattern, score: u32) {
        let entry = self.patterns.entry(pattern).or_default();
        *entry = (*entry).max(score);
    }

    /// Number of entries in a fingerprint.
    pub fn dimensions(&self) -> usize {
        self.trust.len()
            + self.relationships.len()
            + self.global_flags.len()
            + self.knowledge.len()
            + self.patterns.len()
            + self.skills.len()
    }

    /// The banded projection of `state` onto the relevant dimensions.
    ///
    /// The dominant pattern is not part of it, so two merged states can
    /// still diverge in later trust through resonance.
    pub fn fingerprint(&self, state: &GameState) -> Vec<u32> {
        let mut bands = Vec::with_capacity(self.dimensions());
        for (character, top) in &self.trust {
            bands.push(state.trust(character).min(*top).max(0) as u32);
        }
        for character in &self.relationships {
            bands.push(
                state
                    .characters
                    .get(character)
                    .map_or(0, |c| c.relationship as u32),
            );
        }
        for flag in &self.global_flags {
            bands.push(u32::from(state.has_global_flag(flag)));
        }
        for (character, flag) in &self.knowledge {
            bands.push(u32::from(state.has_knowledge(character, flag)));
        }
        for (pattern, top) in &self.patterns {
            bands.push(state.patterns.get(*pattern).min(*top));
        }
        for (skill, top) in &self.skills {
            let level = state.skills.level(skill).min(*top);
            bands.push((level / SKILL_STEP).round() as u32);
        }
        bands
    }
}

/// A node paired with a state fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub node: NodeRef,
    pub bands: Vec<u32>,
}

/// The outcome of one bounded exploration.
#[derive(Debug, Clone, Default)]
pub struct Exploration {
    pub start_node_id: String,
    pub visited: BTreeSet<String>,
    pub expanded_states: usize,
    pub admitted_states: usize,
    pub truncation: Option<TruncationCause>,
    /// Nodes where the per-node fingerprint cap turned states away.
    pub capped_nodes: BTreeSet<String>,
    pub findings: Vec<Finding>,
}

impl Exploration {
    pub fn truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

struct Entry {
    node: NodeRef,
    state: GameState,
    parent: Option<(usize, TraceHop)>,
}

enum Admission {
    Admitted,
    Duplicate,
    NodeCapped,
    Full,
}

struct Frontier<'i> {
    index: &'i RelevanceIndex,
    limits: SimulationLimits,
    entries: Vec<Entry>,
    queue: VecDeque<usize>,
    seen: FxHashSet<StateKey>,
    per_node: FxHashMap<NodeRef, usize>,
}

impl<'i> Frontier<'i> {
    fn new(index: &'i RelevanceIndex, limits: SimulationLimits) -> Self {
        Self {
            index,
            limits,
            entries: Vec::new(),
            queue: VecDeque::new(),
            seen: FxHashSet::default(),
            per_node: FxHashMap::default(),
        }
    }

    fn admit(&mut self, node: NodeRef, state: GameState, parent: Option<(usize, TraceHop)>) -> Admission {
        let key = StateKey {
            node,
            bands: self.index.fingerprint(&state),
        };
        if self.seen.contains(&key) {
            return Admission::Duplicate;
        }
        let count = self.per_node.entry(node).or_default();
        if *count >= self.limits.max_unique_states_per_node {
            return Admission::NodeCapped;
        }
        if self.entries.len() >= self.limits.max_states {
            return Admission::Full;
        }
        *count += 1;
        self.seen.insert(key);
        self.queue.push_back(self.entries.len());
        self.entries.push(Entry { node, state, parent });
        Admission::Admitted
    }

    /// Hops from the start to the entry at `ix`.
    fn trace(&self, mut ix: usize) -> Vec<TraceHop> {
        let mut hops = Vec::new();
        while let Some((parent, hop)) = &self.entries[ix].parent {
            hops.push(hop.clone());
            ix = *parent;
        }
        hops.reverse();
        hops
    }
}

fn redirect_finding(path: &RedirectPath, trace: Vec<TraceHop>) -> Option<Finding> {
    if path.cycle_detected {
        Some(Finding::RedirectCycle {
            path: path.clone(),
            trace,
        })
    } else if path.truncated {
        Some(Finding::RedirectTruncated {
            path: path.clone(),
            trace,
        })
    } else {
        None
    }
}

/// Explore from `start_node_id` in breadth-first order.
///
/// Only visible and enabled choices are followed. Hitting a bound sets
/// `truncation` and is not an error.
pub fn explore(
    ctx: &SimulationContext<'_>,
    initial: &GameState,
    start_node_id: &str,
    limits: SimulationLimits,
    index: &RelevanceIndex,
) -> Result<Exploration, SimulationError> {
    limits.validate()?;
    let start = ctx
        .registry
        .resolve(start_node_id)
        .map_err(|_| SimulationError::StartNodeNotFound(start_node_id.to_string()))?;

    let mut out = Exploration {
        start_node_id: start_node_id.to_string(),
        ..Default::default()
    };
    out.findings
        .extend(redirect_finding(&start.redirect_path, Vec::new()));

    let mut frontier = Frontier::new(index, limits);
    frontier.admit(start.node_ref, initial.clone(), None);

    while let Some(ix) = frontier.queue.pop_front() {
        if out.expanded_states >= limits.max_steps {
            out.truncation.get_or_insert(TruncationCause::MaxSteps);
            break;
        }
        out.expanded_states += 1;

        let node_ref = frontier.entries[ix].node;
        let state = frontier.entries[ix].state.clone();
        let graph = ctx.registry.graph_at(node_ref.graph);
        let node = ctx.registry.node_at(node_ref);
        let owner = graph.character_id();
        out.visited.insert(node.id.clone());

        let evaluated = match ctx.evaluator.evaluate_choices(node, &state, owner, &state.skills) {
            Ok(evaluated) => evaluated,
            Err(err) => {
                out.findings.push(Finding::EvaluationError {
                    node_id: node.id.clone(),
                    message: err.to_string(),
                    trace: frontier.trace(ix),
                });
                continue;
            }
        };

        let available: Vec<_> = evaluated.iter().filter(|c| c.is_available()).collect();
        if available.is_empty() && !node.terminal {
            out.findings.push(Finding::SoftDeadlock {
                node_id: node.id.clone(),
                trace: frontier.trace(ix),
            });
            continue;
        }

        for evaluated in available {
            let choice = evaluated.choice.as_ref();
            let hop = TraceHop {
                node_id: node.id.clone(),
                choice_id: choice.choice_id.clone(),
                next_node_id: choice.next_node_id.clone(),
            };

            let resolved = match ctx.registry.resolve(&choice.next_node_id) {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracing::debug!(node = %node.id, choice = %choice.choice_id, error = %err, "dangling choice target");
                    let mut trace = frontier.trace(ix);
                    trace.push(hop);
                    out.findings.push(Finding::DanglingTarget {
                        node_id: node.id.clone(),
                        choice_id: choice.choice_id.clone(),
                        target: choice.next_node_id.clone(),
                        trace,
                    });
                    continue;
                }
            };
            if !resolved.redirect_path.is_clean() {
                let mut trace = frontier.trace(ix);
                trace.push(hop.clone());
                out.findings
                    .extend(redirect_finding(&resolved.redirect_path, trace));
            }

            let update = match ctx.processor.process_choice(&state, owner, node, choice) {
                Ok(update) => update,
                Err(err) => {
                    let mut trace = frontier.trace(ix);
                    trace.push(hop);
                    out.findings.push(Finding::EvaluationError {
                        node_id: node.id.clone(),
                        message: err.to_string(),
                        trace,
                    });
                    continue;
                }
            };

            let next = update.applied_to(&state, None);
            match frontier.admit(resolved.node_ref, next, Some((ix, hop))) {
                Admission::Admitted | Admission::Duplicate => {}
                Admission::NodeCapped => {
                    out.capped_nodes.insert(resolved.node.id.clone());
                }
                Admission::Full => {
                    out.truncation.get_or_insert(TruncationCause::MaxStates);
                }
            }
        }
    }

    out.admitted_states = frontier.entries.len();
    tracing::debug!(
        start = start_node_id,
        expanded = out.expanded_states,
        admitted = out.admitted_states,
        visited = out.visited.len(),
        findings = out.findings.len(),
        truncated = out.truncated(),
        "exploration finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::evaluator::HubConfig;
    use crate::schema::character::CharacterRoster;
    use crate::schema::graph::{Choice, Consequence, DialogueGraph, DialogueNode};

    struct World {
        registry: GraphRegistry,
        roster: CharacterRoster,
        combos: ComboCatalog,
        hub: HubConfig,
    }

    impl World {
        fn new(nodes: Vec<DialogueNode>) -> Self {
            let start = nodes[0].id.clone();
            let graph = DialogueGraph::new("samuel", CharacterId::new("samuel"), start, nodes).unwrap();
            let mut registry = GraphRegistry::new();
            registry.register(graph).unwrap();
            let mut roster = CharacterRoster::new();
            roster.ensure(&CharacterId::new("samuel"));
            Self {
                registry,
                roster,
                combos: ComboCatalog::new(),
                hub: HubConfig::default(),
            }
        }

        fn ctx(&self) -> SimulationContext<'_> {
            SimulationContext {
                registry: &self.registry,
                combos: &self.combos,
                evaluator: ChoiceEvaluator::new(&self.roster, &self.combos, &self.hub),
                processor: ChoiceProcessor::new(&self.roster, &self.combos),
            }
        }

        fn explore(&self, start: &str, limits: SimulationLimits) -> Exploration {
            let ctx = self.ctx();
            let index = RelevanceIndex::build(&self.registry, &self.combos);
            explore(&ctx, &GameState::new(), start, limits, &index).unwrap()
        }
    }

    fn trust_at_least(min: i32) -> Condition {
        Condition::Trust {
            character: None,
            min: Some(min),
            max: None,
        }
    }

    fn warm(id: &str, next: &str, delta: i32) -> Choice {
        Choice::new(id, id, next).with_consequence(Consequence {
            trust_change: delta,
            ..Default::default()
        })
    }

    #[test]
    fn two_node_graph_is_fully_reached() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("to_b", "On", "b")),
            DialogueNode::new("b", "Samuel", "B.").terminal(),
        ]);
        let out = world.explore("a", SimulationLimits::default());
        assert_eq!(out.visited, ["a".to_string(), "b".to_string()].into_iter().collect());
        assert!(out.findings.is_empty());
        assert!(!out.truncated());
    }

    #[test]
    fn fingerprint_keeps_only_referenced_dimensions() {
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.")
            .with_choice(Choice::new("x", "x", "a").with_condition(trust_at_least(4)))]);
        let index = RelevanceIndex::build(&world.registry, &world.combos);
        assert_eq!(index.dimensions(), 1);

        let samuel = CharacterId::new("samuel");
        let mut at = GameState::new();
        at.character_mut(&samuel).trust = 4;
        let mut above = at.clone();
        above.character_mut(&samuel).trust = 7;
        above.global_flags.insert("unreferenced".to_string());
        above.patterns.helping = 3;
        assert_eq!(index.fingerprint(&at), index.fingerprint(&above));

        let mut below = at.clone();
        below.character_mut(&samuel).trust = 3;
        assert_ne!(index.fingerprint(&at), index.fingerprint(&below));
    }

    #[test]
    fn trust_max_bound_splits_above_it() {
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.").with_choice(
            Choice::new("x", "x", "a").with_condition(Condition::Trust {
                character: None,
                min: None,
                max: Some(5),
            }),
        )]);
        let index = RelevanceIndex::build(&world.registry, &world.combos);
        let samuel = CharacterId::new("samuel");
        let mut at = GameState::new();
        at.character_mut(&samuel).trust = 5;
        let mut above = GameState::new();
        above.character_mut(&samuel).trust = 6;
        assert_ne!(index.fingerprint(&at), index.fingerprint(&above));
    }

    #[test]
    fn equivalent_states_expand_once() {
        // Looping on an ungated choice never changes the fingerprint.
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.")
            .with_choice(warm("again", "a", 1))]);
        let out = world.explore("a", SimulationLimits::default());
        assert_eq!(out.expanded_states, 1);
        assert_eq!(out.admitted_states, 1);
    }

    #[test]
    fn gated_choice_is_reached_once_trust_builds() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.")
                .with_choice(warm("chat", "a", 1))
                .with_choice(Choice::new("secret", "Ask", "b").with_condition(trust_at_least(3))),
            DialogueNode::new("b", "Samuel", "B.").terminal(),
        ]);
        let out = world.explore("a", SimulationLimits::default());
        assert!(out.visited.contains("b"));
        assert!(out.findings.is_empty());
    }

    #[test]
    fn dead_end_reports_trace() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("go", "Go", "b")),
            DialogueNode::new("b", "Samuel", "B."),
        ]);
        let out = world.explore("a", SimulationLimits::default());
        assert_eq!(
            out.findings,
            vec![Finding::SoftDeadlock {
                node_id: "b".to_string(),
                trace: vec![TraceHop {
                    node_id: "a".to_string(),
                    choice_id: "go".to_string(),
                    next_node_id: "b".to_string(),
                }],
            }]
        );
    }

    #[test]
    fn locked_only_node_is_a_dead_end() {
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.")
            .with_choice(Choice::new("x", "x", "a").with_condition(trust_at_least(9)))]);
        let out = world.explore("a", SimulationLimits::default());
        assert!(matches!(&out.findings[..], [Finding::SoftDeadlock { node_id, trace }] if node_id == "a" && trace.is_empty()));
    }

    #[test]
    fn max_steps_truncates() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("go", "Go", "b")),
            DialogueNode::new("b", "Samuel", "B.").with_choice(Choice::new("go", "Go", "c")),
            DialogueNode::new("c", "Samuel", "C.").terminal(),
        ]);
        let limits = SimulationLimits {
            max_steps: 1,
            ..Default::default()
        };
        let out = world.explore("a", limits);
        assert_eq!(out.truncation, Some(TruncationCause::MaxSteps));
        assert!(!out.visited.contains("c"));
    }

    #[test]
    fn max_states_truncates() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("go", "Go", "b")),
            DialogueNode::new("b", "Samuel", "B.").terminal(),
        ]);
        let limits = SimulationLimits {
            max_states: 1,
            ..Default::default()
        };
        let out = world.explore("a", limits);
        assert_eq!(out.truncation, Some(TruncationCause::MaxStates));
        assert_eq!(out.admitted_states, 1);
    }

    #[test]
    fn per_node_cap_limits_fingerprints() {
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.")
            .with_choice(warm("chat", "a", 1))
            .with_choice(Choice::new("gate", "x", "a").with_condition(trust_at_least(1)))
            .with_choice(Choice::new("gate2", "x", "a").with_condition(trust_at_least(2)))]);
        let limits = SimulationLimits {
            max_unique_states_per_node: 2,
            ..Default::default()
        };
        let out = world.explore("a", limits);
        assert_eq!(out.admitted_states, 2);
        assert!(out.capped_nodes.contains("a"));
        assert!(!out.truncated());
    }

    #[test]
    fn dangling_target_is_reported() {
        let world = World::new(vec![
            DialogueNode::new("a", "Samuel", "A.").with_choice(Choice::new("lost", "?", "nowhere")),
        ]);
        let out = world.explore("a", SimulationLimits::default());
        assert!(matches!(
            &out.findings[..],
            [Finding::DanglingTarget { target, .. }, Finding::SoftDeadlock { .. }] | [Finding::DanglingTarget { target, .. }]
                if target == "nowhere"
        ));
    }

    #[test]
    fn missing_start_is_an_error() {
        let world = World::new(vec![DialogueNode::new("a", "Samuel", "A.").terminal()]);
        let ctx = world.ctx();
        let index = RelevanceIndex::build(&world.registry, &world.combos);
        let err = explore(&ctx, &GameState::new(), "ghost", SimulationLimits::default(), &index).unwrap_err();
        assert!(matches!(err, SimulationError::StartNodeNotFound(id) if id == "ghost"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let limits = SimulationLimits {
            max_steps: 0,
            ..Default::default()
        };
        assert!(matches!(limits.validate(), Err(SimulationError::InvalidLimits)));
    }
}
