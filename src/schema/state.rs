use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::character::{CharacterId, CharacterState};
use super::patterns::{PlayerPatterns, SkillLevels};

/// A snapshot of a player's progress, handed to the engine by the session
/// layer. The engine never mutates it in place; see `StateUpdate::apply`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub characters: BTreeMap<CharacterId, CharacterState>,
    #[serde(default)]
    pub global_flags: FxHashSet<String>,
    #[serde(default)]
    pub patterns: PlayerPatterns,
    #[serde(default)]
    pub skills: SkillLevels,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a character the player may not have met yet.
    ///
    /// Unmet characters read as the default state; nothing is inserted.
    pub fn character(&self, id: &CharacterId) -> CharacterState {
        self.characters.get(id).cloned().unwrap_or_default()
    }

    pub fn trust(&self, id: &CharacterId) -> i32 {
        self.characters.get(id).map_or(0, |c| c.trust)
    }

    pub fn has_met(&self, id: &CharacterId) -> bool {
        self.characters.contains_key(id)
    }

    pub fn has_knowledge(&self, id: &CharacterId, flag: &str) -> bool {
        self.characters
            .get(id)
            .is_some_and(|c| c.has_knowledge(flag))
    }

    pub fn has_global_flag(&self, flag: &str) -> bool {
        self.global_flags.contains(flag)
    }

    /// Mutable access, creating the character state on first meeting.
    pub fn character_mut(&mut self, id: &CharacterId) -> &mut CharacterState {
        self.characters.entry(id.clone()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::character::RelationshipStatus;

    #[test]
    fn unmet_character_reads_default() {
        let state = GameState::new();
        let samuel = CharacterId::new("samuel");
        assert_eq!(state.trust(&samuel), 0);
        assert_eq!(state.character(&samuel).relationship, RelationshipStatus::Stranger);
        assert!(!state.has_met(&samuel));
    }

    #[test]
    fn character_mut_creates_lazily() {
        let mut state = GameState::new();
        let maya = CharacterId::new("maya");
        state.character_mut(&maya).trust = 3;
        assert!(state.has_met(&maya));
        assert_eq!(state.trust(&maya), 3);
    }

    #[test]
    fn deserializes_partial_json() {
        let state: GameState = serde_json::from_str(
            r#"{"characters":{"samuel":{"trust":2}},"global_flags":["met_conductor"]}"#,
        )
        .unwrap();
        assert_eq!(state.trust(&CharacterId::new("samuel")), 2);
        assert!(state.has_global_flag("met_conductor"));
        assert_eq!(state.patterns, PlayerPatterns::default());
    }
}
