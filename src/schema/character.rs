use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::patterns::Pattern;

/// Lowest trust a character can hold.
pub const MIN_TRUST: i32 = 0;
/// Highest trust a character can hold.
pub const MAX_TRUST: i32 = 10;
/// Trust at which a stranger becomes an acquaintance.
pub const ACQUAINTANCE_TRUST: i32 = 4;
/// Trust at which an acquaintance becomes a confidant.
pub const CONFIDANT_TRUST: i32 = 8;

/// Newtype wrapper for character ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How well the player knows a character. Ordered from least to most close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Stranger,
    Acquaintance,
    Confidant,
}

impl Default for RelationshipStatus {
    fn default() -> Self {
        Self::Stranger
    }
}

impl RelationshipStatus {
    /// Status implied by a trust value alone.
    pub fn for_trust(trust: i32) -> Self {
        if trust >= CONFIDANT_TRUST {
            Self::Confidant
        } else if trust >= ACQUAINTANCE_TRUST {
            Self::Acquaintance
        } else {
            Self::Stranger
        }
    }

    /// Status after trust changes: never lower than the current one.
    pub fn advanced_by(self, trust: i32) -> Self {
        self.max(Self::for_trust(trust))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stranger => "stranger",
            Self::Acquaintance => "acquaintance",
            Self::Confidant => "confidant",
        }
    }
}

/// Per-character progress within one playthrough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    #[serde(default)]
    pub trust: i32,
    #[serde(default)]
    pub relationship: RelationshipStatus,
    #[serde(default)]
    pub knowledge_flags: FxHashSet<String>,
    /// Visited node ids, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
    /// Milliseconds since epoch, supplied by the caller.
    #[serde(default)]
    pub last_interaction: Option<u64>,
}

impl CharacterState {
    pub fn has_knowledge(&self, flag: &str) -> bool {
        self.knowledge_flags.contains(flag)
    }
}

/// Which patterns a character warms to or bristles at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternAffinity {
    pub primary: Pattern,
    #[serde(default)]
    pub secondary: Option<Pattern>,
    #[serde(default)]
    pub friction: Option<Pattern>,
}

/// Lines a character may say in reaction to a trust change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoLines {
    #[serde(default)]
    pub positive: Vec<String>,
    #[serde(default)]
    pub negative: Vec<String>,
}

/// A character arc turning point unlocked once trust and knowledge line up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationTrigger {
    pub id: String,
    pub min_trust: i32,
    #[serde(default)]
    pub required_knowledge: Vec<String>,
}

impl TransformationTrigger {
    pub fn is_met(&self, state: &CharacterState) -> bool {
        state.trust >= self.min_trust
            && self
                .required_knowledge
                .iter()
                .all(|flag| state.has_knowledge(flag))
    }
}

/// Static, authored facts about a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub affinity: Option<PatternAffinity>,
    #[serde(default)]
    pub echoes: EchoLines,
    #[serde(default)]
    pub transformation: Option<TransformationTrigger>,
}

impl CharacterProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CharacterId::new(id),
            name: name.into(),
            affinity: None,
            echoes: EchoLines::default(),
            transformation: None,
        }
    }
}

/// Every character the engine knows about, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CharacterRoster {
    profiles: BTreeMap<CharacterId, CharacterProfile>,
}

impl CharacterRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub fn register(&mut self, profile: CharacterProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Add a bare profile unless one is already registered.
    pub fn ensure(&mut self, id: &CharacterId) {
        if !self.profiles.contains_key(id) {
            self.register(CharacterProfile::new(id.as_str(), id.as_str()));
        }
    }

    pub fn get(&self, id: &CharacterId) -> Option<&CharacterProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &CharacterId) -> bool {
        self.profiles.contains_key(id)
    }

    /// Display name, falling back to the raw id.
    pub fn display_name<'a>(&'a self, id: &'a CharacterId) -> &'a str {
        self.profiles.get(id).map_or(id.as_str(), |p| p.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterProfile> {
        self.profiles.values()
    }
}

impl Extend<CharacterProfile> for CharacterRoster {
    fn extend<I: IntoIterator<Item = CharacterProfile>>(&mut self, iter: I) {
        for profile in iter {
            self.register(profile);
        }
    }
}

impl FromIterator<CharacterProfile> for CharacterRoster {
    fn from_iter<I: IntoIterator<Item = CharacterProfile>>(iter: I) -> Self {
        let mut roster = CharacterRoster::new();
        for profile in iter {
            roster.register(profile);
        }
        roster
    }
}
