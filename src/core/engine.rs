/// The engine facade: content loading, node views and choice selection.
///
/// A `DialogueEngine` is immutable once built. Every call takes the player
/// state as input and returns results without touching it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::deadlock::{build_narrative_sim_report, NarrativeSimOptions, NarrativeSimReport};
use crate::core::evaluator::{ChoiceEvaluator, EvaluatedChoice, EvaluationError, HubConfig};
use crate::core::navigator::{
    GraphRegistry, NavigationError, RedirectPath, RedirectTable, ResolvedNode,
    DEFAULT_MAX_REDIRECT_HOPS,
};
use crate::core::processing::{ChoiceProcessor, ProcessingError, StateUpdate};
use crate::core::reachability::{simulate_reachability, ReachabilityOptions, ReachabilityReport};
use crate::core::simulation::{SimulationContext, SimulationError};
use crate::schema::character::{CharacterId, CharacterProfile, CharacterRoster};
use crate::schema::graph::{Choice, ContentVariation, DialogueGraph, DialogueNode, GraphError};
use crate::schema::patterns::{ComboCatalog, SkillCombo};
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error in {path}: {source}")]
    RonFile {
        path: String,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no dialogue graphs were loaded")]
    NoGraphs,
    #[error("fallback node '{0}' is not declared by any graph")]
    MissingFallback(String),
    #[error("choice '{choice_id}' not found at node '{node_id}'")]
    ChoiceNotFound { node_id: String, choice_id: String },
    #[error("choice '{choice_id}' at node '{node_id}' is locked: {reason}")]
    ChoiceLocked {
        node_id: String,
        choice_id: String,
        reason: String,
    },
}

fn default_max_redirect_hops() -> usize {
    DEFAULT_MAX_REDIRECT_HOPS
}

/// Engine-wide settings, read from `settings.ron` in a content directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub hub: HubConfig,
    /// Node shown when a requested node is missing.
    #[serde(default)]
    pub fallback_node_id: Option<String>,
    #[serde(default = "default_max_redirect_hops")]
    pub max_redirect_hops: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            fallback_node_id: None,
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
        }
    }
}

/// All content in one document, for the WASM boundary and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBundle {
    #[serde(default)]
    pub graphs: Vec<DialogueGraph>,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub combos: Vec<SkillCombo>,
    #[serde(default)]
    pub redirects: RedirectTable,
    #[serde(default)]
    pub settings: EngineSettings,
}

impl ContentBundle {
    pub fn from_json(input: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn parse_ron(input: &str) -> Result<Self, EngineError> {
        Ok(ron::from_str(input)?)
    }

    /// Assemble a bundle from the documents of a content directory, for
    /// callers that embed content instead of reading it from disk.
    pub fn from_ron_sources(sources: &ContentSources<'_>) -> Result<Self, EngineError> {
        let graphs = sources
            .graphs
            .iter()
            .map(|src| DialogueGraph::parse_ron(src))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            graphs,
            characters: parse_optional(sources.characters)?.unwrap_or_default(),
            combos: parse_optional(sources.combos)?.unwrap_or_default(),
            redirects: parse_optional(sources.redirects)?.unwrap_or_default(),
            settings: parse_optional(sources.settings)?.unwrap_or_default(),
        })
    }
}

/// RON documents laid out like a content directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSources<'a> {
    pub graphs: &'a [&'a str],
    pub characters: Option<&'a str>,
    pub combos: Option<&'a str>,
    pub redirects: Option<&'a str>,
    pub settings: Option<&'a str>,
}

fn parse_optional<T: DeserializeOwned>(source: Option<&str>) -> Result<Option<T>, EngineError> {
    source.map(ron::from_str).transpose().map_err(EngineError::from)
}

/// A resolved node prepared for display.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView<'a> {
    pub node_id: &'a str,
    pub graph_id: &'a str,
    pub character_id: &'a CharacterId,
    pub speaker: &'a str,
    pub content: &'a ContentVariation,
    pub choices: Vec<EvaluatedChoice<'a>>,
    pub redirect_path: RedirectPath,
    pub degraded: bool,
    pub terminal: bool,
}

impl NodeView<'_> {
    pub fn available_choices(&self) -> impl Iterator<Item = &EvaluatedChoice<'_>> {
        self.choices.iter().filter(|c| c.is_available())
    }
}

/// The dialogue engine. Built via `DialogueEngine::builder()`.
#[derive(Debug, Clone)]
pub struct DialogueEngine {
    registry: GraphRegistry,
    roster: CharacterRoster,
    combos: ComboCatalog,
    settings: EngineSettings,
}

/// Builder for constructing a `DialogueEngine`.
#[derive(Debug, Default)]
pub struct DialogueEngineBuilder {
    content_dir: Option<PathBuf>,
    /// Directly provided content (for tests and bundles).
    graphs: Vec<DialogueGraph>,
    characters: Vec<CharacterProfile>,
    combos: Vec<SkillCombo>,
    redirects: Option<RedirectTable>,
    settings: Option<EngineSettings>,
}

impl DialogueEngine {
    pub fn builder() -> DialogueEngineBuilder {
        DialogueEngineBuilder::default()
    }

    /// Shorthand for a builder over a content directory.
    pub fn load(content_dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::builder().content_dir(content_dir).build()
    }

    pub fn from_bundle(bundle: ContentBundle) -> Result<Self, EngineError> {
        Self::builder().with_bundle(bundle).build()
    }

    pub fn registry(&self) -> &GraphRegistry {
        &self.registry
    }

    pub fn roster(&self) -> &CharacterRoster {
        &self.roster
    }

    pub fn combos(&self) -> &ComboCatalog {
        &self.combos
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn evaluator(&self) -> ChoiceEvaluator<'_> {
        ChoiceEvaluator::new(&self.roster, &self.combos, &self.settings.hub)
    }

    pub fn processor(&self) -> ChoiceProcessor<'_> {
        ChoiceProcessor::new(&self.roster, &self.combos)
    }

    pub fn simulation_context(&self) -> SimulationContext<'_> {
        SimulationContext {
            registry: &self.registry,
            combos: &self.combos,
            evaluator: self.evaluator(),
            processor: self.processor(),
        }
    }

    pub fn resolve_node(&self, node_id: &str) -> Result<ResolvedNode<'_>, EngineError> {
        Ok(self.registry.resolve(node_id)?)
    }

    /// Resolve, degrading to the configured fallback node when `node_id`
    /// is missing. Without a fallback this is `resolve_node`.
    pub fn resolve_or_fallback(&self, node_id: &str) -> Result<ResolvedNode<'_>, EngineError> {
        match &self.settings.fallback_node_id {
            Some(fallback) => Ok(self.registry.resolve_or(node_id, fallback)?),
            None => self.resolve_node(node_id),
        }
    }

    pub fn evaluate_choices<'n>(
        &self,
        node: &'n DialogueNode,
        state: &GameState,
        character_id: &CharacterId,
    ) -> Result<Vec<EvaluatedChoice<'n>>, EngineError> {
        Ok(self
            .evaluator()
            .evaluate_choices(node, state, character_id, &state.skills)?)
    }

    pub fn select_content<'n>(
        &self,
        node: &'n DialogueNode,
        state: &GameState,
        character_id: &CharacterId,
    ) -> Result<&'n ContentVariation, EngineError> {
        Ok(self
            .evaluator()
            .select_content(node, state, character_id, &state.skills)?)
    }

    /// Resolve `node_id` and evaluate it for `state`, falling back when the
    /// node is missing and a fallback is configured.
    pub fn evaluate_node(&self, node_id: &str, state: &GameState) -> Result<NodeView<'_>, EngineError> {
        let resolved = self.resolve_or_fallback(node_id)?;
        let owner = resolved.graph.character_id();
        let content = self.select_content(resolved.node, state, owner)?;
        let choices = self.evaluate_choices(resolved.node, state, owner)?;
        Ok(NodeView {
            node_id: &resolved.node.id,
            graph_id: resolved.graph.id(),
            character_id: owner,
            speaker: &resolved.node.speaker,
            content,
            choices,
            redirect_path: resolved.redirect_path,
            degraded: resolved.degraded,
            terminal: resolved.node.terminal,
        })
    }

    pub fn process_choice(
        &self,
        state: &GameState,
        character_id: &CharacterId,
        node: &DialogueNode,
        choice: &Choice,
    ) -> Result<StateUpdate, EngineError> {
        Ok(self.processor().process_choice(state, character_id, node, choice)?)
    }

    /// Take `choice_id` at `node_id`. Locked, hidden and unknown choices are
    /// refused.
    pub fn select_choice(
        &self,
        node_id: &str,
        choice_id: &str,
        state: &GameState,
    ) -> Result<StateUpdate, EngineError> {
        let resolved = self.resolve_node(node_id)?;
        let owner = resolved.graph.character_id();
        let choices = self.evaluate_choices(resolved.node, state, owner)?;
        let evaluated = choices
            .iter()
            .find(|c| c.choice_id() == choice_id)
            .ok_or_else(|| EngineError::ChoiceNotFound {
                node_id: resolved.node.id.clone(),
                choice_id: choice_id.to_string(),
            })?;
        if !evaluated.is_available() {
            let reason = evaluated
                .reason
                .as_ref()
                .map_or_else(|| "not available".to_string(), |r| r.why.clone());
            return Err(EngineError::ChoiceLocked {
                node_id: resolved.node.id.clone(),
                choice_id: choice_id.to_string(),
                reason,
            });
        }
        tracing::debug!(node = %resolved.node.id, choice = choice_id, "choice selected");
        self.process_choice(state, owner, resolved.node, &evaluated.choice)
    }

    pub fn simulate_reachability(
        &self,
        initial_state: &GameState,
        options: &ReachabilityOptions,
    ) -> Result<ReachabilityReport, EngineError> {
        Ok(simulate_reachability(
            &self.simulation_context(),
            initial_state,
            options,
        )?)
    }

    pub fn narrative_report(
        &self,
        options: &NarrativeSimOptions,
    ) -> Result<NarrativeSimReport, EngineError> {
        Ok(build_narrative_sim_report(&self.simulation_context(), options)?)
    }
}

impl DialogueEngineBuilder {
    /// Load `graphs/`, `characters.ron`, `combos.ron`, `redirects.ron` and
    /// `settings.ron` from a content directory.
    pub fn content_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.content_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_graph(mut self, graph: DialogueGraph) -> Self {
        self.graphs.push(graph);
        self
    }

    pub fn with_graphs(mut self, graphs: impl IntoIterator<Item = DialogueGraph>) -> Self {
        self.graphs.extend(graphs);
        self
    }

    pub fn with_character(mut self, profile: CharacterProfile) -> Self {
        self.characters.push(profile);
        self
    }

    pub fn with_characters(mut self, profiles: impl IntoIterator<Item = CharacterProfile>) -> Self {
        self.characters.extend(profiles);
        self
    }

    pub fn with_combos(mut self, combos: impl IntoIterator<Item = SkillCombo>) -> Self {
        self.combos.extend(combos);
        self
    }

    /// Redirects layered over any loaded from the content directory.
    pub fn with_redirects(mut self, redirects: RedirectTable) -> Self {
        self.redirects = Some(redirects);
        self
    }

    /// Settings replacing any loaded from the content directory.
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_bundle(self, bundle: ContentBundle) -> Self {
        self.with_graphs(bundle.graphs)
            .with_characters(bundle.characters)
            .with_combos(bundle.combos)
            .with_redirects(bundle.redirects)
            .with_settings(bundle.settings)
    }

    pub fn build(self) -> Result<DialogueEngine, EngineError> {
        let mut registry = GraphRegistry::new();
        let mut roster = CharacterRoster::new();
        let mut combos = ComboCatalog::new();
        let mut redirects = RedirectTable::new();
        let mut settings = EngineSettings::default();

        if let Some(ref dir) = self.content_dir {
            registry.load_dir(&dir.join("graphs"))?;
            if let Some(profiles) = read_optional_ron::<Vec<CharacterProfile>>(&dir.join("characters.ron"))? {
                roster.extend(profiles);
            }
            if let Some(list) = read_optional_ron::<Vec<SkillCombo>>(&dir.join("combos.ron"))? {
                combos.extend(list);
            }
            if let Some(table) = read_optional_ron::<RedirectTable>(&dir.join("redirects.ron"))? {
                redirects = table;
            }
            if let Some(loaded) = read_optional_ron::<EngineSettings>(&dir.join("settings.ron"))? {
                settings = loaded;
            }
            tracing::info!(dir = %dir.display(), graphs = registry.graphs().len(), "loaded content directory");
        }

        for graph in self.graphs {
            registry.register(graph)?;
        }
        if registry.graphs().is_empty() {
            return Err(EngineError::NoGraphs);
        }

        roster.extend(self.characters);
        let owners: Vec<CharacterId> = registry
            .graphs()
            .iter()
            .map(|g| g.character_id().clone())
            .collect();
        for owner in &owners {
            roster.ensure(owner);
        }
        combos.extend(self.combos);

        if let Some(extra) = self.redirects {
            for (from, to) in extra.iter() {
                redirects.insert(from, to);
            }
        }
        let settings = self.settings.unwrap_or(settings);

        registry.set_redirects(redirects);
        registry.set_max_redirect_hops(settings.max_redirect_hops);

        if let Some(fallback) = &settings.fallback_node_id {
            if registry.locate(fallback).is_none() {
                return Err(EngineError::MissingFallback(fallback.clone()));
            }
        }

        tracing::debug!(
            graphs = registry.graphs().len(),
            nodes = registry.node_count(),
            characters = roster.iter().count(),
            combos = combos.len(),
            redirects = registry.redirects().len(),
            "dialogue engine built"
        );

        Ok(DialogueEngine {
            registry,
            roster,
            combos,
            settings,
        })
    }
}

/// Read a RON file if it exists.
fn read_optional_ron<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EngineError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    ron::from_str(&contents)
        .map(Some)
        .map_err(|source| EngineError::RonFile {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::evaluator::ReasonCode;
    use crate::schema::condition::Condition;
    use crate::schema::graph::Consequence;

    fn samuel_graph() -> DialogueGraph {
        DialogueGraph::new(
            "samuel",
            CharacterId::new("samuel"),
            "samuel_intro",
            vec![
                DialogueNode::new("samuel_intro", "Samuel", "Evening.")
                    .with_choice(
                        Choice::new("ask", "Ask about the trains", "samuel_trains").with_consequence(
                            Consequence {
                                trust_change: 1,
                                ..Default::default()
                            },
                        ),
                    )
                    .with_choice(
                        Choice::new("secret", "Ask about his daughter", "samuel_trains").with_condition(
                            Condition::Trust {
                                character: None,
                                min: Some(2),
                                max: None,
                            },
                        ),
                    ),
                DialogueNode::new("samuel_trains", "Samuel", "They still run.").terminal(),
                DialogueNode::new("samuel_hub_return", "Samuel", "Off you go."),
            ],
        )
        .unwrap()
    }

    fn hub_graph() -> DialogueGraph {
        DialogueGraph::new(
            "station",
            CharacterId::new("station"),
            "station_hub",
            vec![DialogueNode::new("station_hub", "Narrator", "The concourse hums.").terminal()],
        )
        .unwrap()
    }

    fn engine() -> DialogueEngine {
        DialogueEngine::builder()
            .with_graphs([samuel_graph(), hub_graph()])
            .build()
            .unwrap()
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DialogueEngine>();
    }

    #[test]
    fn graph_owners_join_the_roster() {
        let engine = engine();
        assert!(engine.roster().contains(&CharacterId::new("samuel")));
        assert!(engine.roster().contains(&CharacterId::new("station")));
    }

    #[test]
    fn empty_build_is_rejected() {
        assert!(matches!(
            DialogueEngine::builder().build(),
            Err(EngineError::NoGraphs)
        ));
    }

    #[test]
    fn missing_fallback_is_rejected() {
        let result = DialogueEngine::builder()
            .with_graph(hub_graph())
            .with_settings(EngineSettings {
                fallback_node_id: Some("nowhere".to_string()),
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(EngineError::MissingFallback(id)) if id == "nowhere"));
    }

    #[test]
    fn locked_choice_is_refused() {
        let engine = engine();
        let err = engine
            .select_choice("samuel_intro", "secret", &GameState::new())
            .unwrap_err();
        match err {
            EngineError::ChoiceLocked { reason, .. } => {
                assert_eq!(reason, "Requires trust 2 with samuel (currently 0)")
            }
            other => panic!("expected ChoiceLocked, got {other:?}"),
        }
    }

    #[test]
    fn unknown_choice_is_refused() {
        let engine = engine();
        let err = engine
            .select_choice("samuel_intro", "dance", &GameState::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::ChoiceNotFound { .. }));
    }

    #[test]
    fn select_then_apply_unlocks_gated_choice() {
        let engine = engine();
        let mut state = GameState::new();
        for _ in 0..2 {
            engine
                .select_choice("samuel_intro", "ask", &state)
                .unwrap()
                .apply(&mut state, None);
        }
        let view = engine.evaluate_node("samuel_intro", &state).unwrap();
        let secret = view.choices.iter().find(|c| c.choice_id() == "secret").unwrap();
        assert!(secret.is_available());
    }

    #[test]
    fn hub_return_choice_can_be_selected() {
        let engine = engine();
        let view = engine.evaluate_node("samuel_hub_return", &GameState::new()).unwrap();
        assert_eq!(view.choices.len(), 1);
        assert!(view.choices[0].synthesized);

        let update = engine
            .select_choice("samuel_hub_return", "samuel_hub_return__return_to_hub", &GameState::new())
            .unwrap();
        assert_eq!(update.next_node_id, "station_hub");
        let hub = engine.resolve_node(&update.next_node_id).unwrap();
        let from = engine.registry().graph("samuel").unwrap();
        assert!(hub.is_cross_graph(from));
    }

    #[test]
    fn fallback_marks_view_degraded() {
        let engine = DialogueEngine::builder()
            .with_graphs([samuel_graph(), hub_graph()])
            .with_settings(EngineSettings {
                fallback_node_id: Some("station_hub".to_string()),
                ..Default::default()
            })
            .build()
            .unwrap();
        let view = engine.evaluate_node("deleted_node", &GameState::new()).unwrap();
        assert!(view.degraded);
        assert_eq!(view.node_id, "station_hub");
        assert!(engine.resolve_node("deleted_node").is_err());
    }

    #[test]
    fn bundle_round_trips_through_json() {
        let bundle = ContentBundle {
            graphs: vec![samuel_graph(), hub_graph()],
            characters: vec![CharacterProfile::new("samuel", "Samuel")],
            ..Default::default()
        };
        let json = serde_json::to_string(&bundle).unwrap();
        let engine = DialogueEngine::from_bundle(ContentBundle::from_json(&json).unwrap()).unwrap();
        assert_eq!(engine.registry().node_count(), 4);
        assert_eq!(engine.roster().display_name(&CharacterId::new("samuel")), "Samuel");
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings: EngineSettings = ron::from_str("(fallback_node_id: Some(\"station_hub\"))").unwrap();
        assert_eq!(settings.hub, HubConfig::default());
        assert_eq!(settings.max_redirect_hops, DEFAULT_MAX_REDIRECT_HOPS);
    }

    #[test]
    fn reason_codes_surface_in_node_view() {
        let engine = engine();
        let view = engine.evaluate_node("samuel_intro", &GameState::new()).unwrap();
        let secret = view.choices.iter().find(|c| c.choice_id() == "secret").unwrap();
        assert_eq!(secret.reason.as_ref().unwrap().code, ReasonCode::NeedsTrust);
        assert_eq!(view.available_choices().count(), 1);
    }

    #[test]
    fn embedded_sources_match_content_directory() {
        let graphs = [
            include_str!("../../content/terminus/graphs/samuel.ron"),
            include_str!("../../content/terminus/graphs/maya.ron"),
            include_str!("../../content/terminus/graphs/station.ron"),
        ];
        let bundle = ContentBundle::from_ron_sources(&ContentSources {
            graphs: &graphs,
            characters: Some(include_str!("../../content/terminus/characters.ron")),
            combos: Some(include_str!("../../content/terminus/combos.ron")),
            redirects: Some(include_str!("../../content/terminus/redirects.ron")),
            settings: Some(include_str!("../../content/terminus/settings.ron")),
        })
        .unwrap();
        let embedded = DialogueEngine::from_bundle(bundle).unwrap();
        let loaded = DialogueEngine::load(concat!(env!("CARGO_MANIFEST_DIR"), "/content/terminus")).unwrap();
        assert_eq!(embedded.registry().node_count(), loaded.registry().node_count());
        assert_eq!(embedded.settings(), loaded.settings());
        assert_eq!(
            embedded.resolve_node("samuel_opening").unwrap().node.id,
            "samuel_bench"
        );
    }
}
