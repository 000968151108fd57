//! WASM bindings for terminus-engine, used by the browser playthrough.
//!
//! Everything crossing the boundary is a JSON string. The page owns the
//! player state; each call takes the current state and the selection call
//! hands back the next one.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use terminus_engine::core::deadlock::NarrativeSimOptions;
use terminus_engine::core::engine::{ContentBundle, ContentSources, DialogueEngine};
use terminus_engine::core::processing::StateUpdate;
use terminus_engine::core::reachability::ReachabilityOptions;
use terminus_engine::schema::state::GameState;

// ---------------------------------------------------------------------------
// Embedded terminus content, compiled into the WASM binary
// ---------------------------------------------------------------------------
mod data {
    pub const GRAPHS: [&str; 3] = [
        include_str!("../../content/terminus/graphs/samuel.ron"),
        include_str!("../../content/terminus/graphs/maya.ron"),
        include_str!("../../content/terminus/graphs/station.ron"),
    ];
    pub const CHARACTERS: &str = include_str!("../../content/terminus/characters.ron");
    pub const COMBOS: &str = include_str!("../../content/terminus/combos.ron");
    pub const REDIRECTS: &str = include_str!("../../content/terminus/redirects.ron");
    pub const SETTINGS: &str = include_str!("../../content/terminus/settings.ron");
}

#[derive(Serialize)]
struct Selection<'a> {
    update: &'a StateUpdate,
    state: GameState,
}

#[wasm_bindgen]
pub struct WasmEngine {
    engine: DialogueEngine,
}

#[wasm_bindgen]
impl WasmEngine {
    /// An engine over the built-in Grand Central Terminus content.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmEngine, JsError> {
        Self::terminus().map_err(|e| JsError::new(&e))
    }

    /// An engine over a JSON `ContentBundle`.
    pub fn from_bundle_json(bundle_json: &str) -> Result<WasmEngine, JsError> {
        Self::from_bundle_str(bundle_json).map_err(|e| JsError::new(&e))
    }

    /// An empty player state as JSON.
    pub fn new_state() -> String {
        serde_json::to_string(&GameState::new()).unwrap_or_else(|_| "{}".to_string())
    }

    /// The node the page should open on.
    pub fn hub_node_id(&self) -> String {
        self.engine.settings().hub.hub_node_id.clone()
    }

    /// Redirect resolution for `node_id`, as a JSON `RedirectPath`.
    pub fn resolve(&self, node_id: &str) -> Result<String, JsError> {
        self.resolve_json(node_id).map_err(|e| JsError::new(&e))
    }

    /// Resolve and evaluate `node_id` for the given state, as a JSON node view.
    pub fn evaluate(&self, node_id: &str, state_json: &str) -> Result<String, JsError> {
        self.evaluate_json(node_id, state_json)
            .map_err(|e| JsError::new(&e))
    }

    /// Take a choice. Returns `{ "update": ..., "state": ... }` where `state`
    /// is the input state with the update applied.
    pub fn select(
        &self,
        node_id: &str,
        choice_id: &str,
        state_json: &str,
        now_ms: Option<f64>,
    ) -> Result<String, JsError> {
        self.select_json(node_id, choice_id, state_json, now_ms.map(|ms| ms as u64))
            .map_err(|e| JsError::new(&e))
    }

    /// Reachability from `start_node_id` with an empty state.
    pub fn reachability(&self, start_node_id: &str) -> Result<String, JsError> {
        self.reachability_json(start_node_id)
            .map_err(|e| JsError::new(&e))
    }

    /// Narrative failures from every graph's entry point.
    pub fn narrative_report(&self) -> Result<String, JsError> {
        self.narrative_report_json().map_err(|e| JsError::new(&e))
    }
}

impl WasmEngine {
    fn terminus() -> Result<WasmEngine, String> {
        let bundle = ContentBundle::from_ron_sources(&ContentSources {
            graphs: &data::GRAPHS,
            characters: Some(data::CHARACTERS),
            combos: Some(data::COMBOS),
            redirects: Some(data::REDIRECTS),
            settings: Some(data::SETTINGS),
        })
        .map_err(|e| format!("Content parse error: {e}"))?;
        Self::from_bundle(bundle)
    }

    fn from_bundle_str(bundle_json: &str) -> Result<WasmEngine, String> {
        let bundle =
            ContentBundle::from_json(bundle_json).map_err(|e| format!("Invalid bundle JSON: {e}"))?;
        Self::from_bundle(bundle)
    }

    fn from_bundle(bundle: ContentBundle) -> Result<WasmEngine, String> {
        let engine =
            DialogueEngine::from_bundle(bundle).map_err(|e| format!("Engine build error: {e}"))?;
        Ok(WasmEngine { engine })
    }

    fn resolve_json(&self, node_id: &str) -> Result<String, String> {
        let resolved = self
            .engine
            .resolve_node(node_id)
            .map_err(|e| e.to_string())?;
        to_json(&resolved.redirect_path)
    }

    fn evaluate_json(&self, node_id: &str, state_json: &str) -> Result<String, String> {
        let state = parse_state(state_json)?;
        let view = self
            .engine
            .evaluate_node(node_id, &state)
            .map_err(|e| e.to_string())?;
        to_json(&view)
    }

    fn select_json(
        &self,
        node_id: &str,
        choice_id: &str,
        state_json: &str,
        now_ms: Option<u64>,
    ) -> Result<String, String> {
        let state = parse_state(state_json)?;
        let update = self
            .engine
            .select_choice(node_id, choice_id, &state)
            .map_err(|e| e.to_string())?;
        let state = update.applied_to(&state, now_ms);
        to_json(&Selection {
            update: &update,
            state,
        })
    }

    fn reachability_json(&self, start_node_id: &str) -> Result<String, String> {
        let report = self
            .engine
            .simulate_reachability(&GameState::new(), &ReachabilityOptions::new(start_node_id))
            .map_err(|e| e.to_string())?;
        to_json(&report)
    }

    fn narrative_report_json(&self) -> Result<String, String> {
        let report = self
            .engine
            .narrative_report(&NarrativeSimOptions::default())
            .map_err(|e| e.to_string())?;
        to_json(&report)
    }
}

fn parse_state(state_json: &str) -> Result<GameState, String> {
    if state_json.trim().is_empty() {
        return Ok(GameState::new());
    }
    serde_json::from_str(state_json).map_err(|e| format!("Invalid state JSON: {e}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("Serialization error: {e}"))
}
