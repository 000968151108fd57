/// Choice evaluation: visibility, enablement, and lock reasons.
///
/// Evaluation is a pure function of the node, the state snapshot, and the
/// engine's static catalogs. Gates run in `ConditionKind` order and the
/// first failure is the reported reason.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

use crate::schema::character::{CharacterId, CharacterRoster};
use crate::schema::condition::{priority_order, Condition, ConditionError};
use crate::schema::graph::{Choice, ContentVariation, DialogueNode, OrbFillRequirement};
use crate::schema::patterns::{ComboCatalog, SkillLevels};
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("unknown character: {0}")]
    UnknownCharacter(CharacterId),
    #[error("choice '{choice_id}' on node '{node_id}' has a malformed condition: {source}")]
    MalformedCondition {
        node_id: String,
        choice_id: String,
        #[source]
        source: ConditionError,
    },
    #[error("node '{0}' has no content variations")]
    NoContent(String),
}

/// Machine-readable reason a choice is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NeedsTrust,
    NeedsRelationship,
    NeedsGlobalFlag,
    BlockedByGlobalFlag,
    NeedsKnowledgeFlag,
    NeedsPatternLevel,
    NeedsCombo,
    NeedsOrbFill,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsTrust => "NEEDS_TRUST",
            Self::NeedsRelationship => "NEEDS_RELATIONSHIP",
            Self::NeedsGlobalFlag => "NEEDS_GLOBAL_FLAG",
            Self::BlockedByGlobalFlag => "BLOCKED_BY_GLOBAL_FLAG",
            Self::NeedsKnowledgeFlag => "NEEDS_KNOWLEDGE_FLAG",
            Self::NeedsPatternLevel => "NEEDS_PATTERN_LEVEL",
            Self::NeedsCombo => "NEEDS_COMBO",
            Self::NeedsOrbFill => "NEEDS_ORB_FILL",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress toward a numeric gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: i64,
    pub required: i64,
}

impl Progress {
    fn new(current: impl Into<i64>, required: impl Into<i64>) -> Self {
        Self {
            current: current.into(),
            required: required.into(),
        }
    }
}

/// Why a choice is locked and what the player can do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReason {
    pub code: ReasonCode,
    pub why: String,
    pub how: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// A choice annotated for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedChoice<'a> {
    pub choice: Cow<'a, Choice>,
    pub visible: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LockReason>,
    /// Every failing gate, in priority order.
    pub failed_gates: Vec<ReasonCode>,
    /// Generated by the engine rather than authored.
    pub synthesized: bool,
}

impl EvaluatedChoice<'_> {
    /// Visible and enabled: the player can take it.
    pub fn is_available(&self) -> bool {
        self.visible && self.enabled
    }

    pub fn choice_id(&self) -> &str {
        &self.choice.choice_id
    }
}

/// Where dead-end hub-return nodes lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    pub hub_node_id: String,
    pub return_suffix: String,
    #[serde(default = "default_return_text")]
    pub return_text: String,
}

fn default_return_text() -> String {
    "Return to the concourse".to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_node_id: "station_hub".to_string(),
            return_suffix: "_hub_return".to_string(),
            return_text: default_return_text(),
        }
    }
}

impl HubConfig {
    /// True when the engine should synthesize a return choice for `node`.
    pub fn wants_return(&self, node: &DialogueNode) -> bool {
        node.choices.is_empty()
            && node.id != self.hub_node_id
            && node.id.ends_with(&self.return_suffix)
    }

    pub fn return_choice(&self, node: &DialogueNode) -> Choice {
        Choice::new(
            format!("{}__return_to_hub", node.id),
            self.return_text.clone(),
            self.hub_node_id.clone(),
        )
    }
}

/// Evaluates choices against a state snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ChoiceEvaluator<'e> {
    roster: &'e CharacterRoster,
    combos: &'e ComboCatalog,
    hub: &'e HubConfig,
}

impl<'e> ChoiceEvaluator<'e> {
    pub fn new(roster: &'e CharacterRoster, combos: &'e ComboCatalog, hub: &'e HubConfig) -> Self {
        Self {
            roster,
            combos,
            hub,
        }
    }

    /// Annotate every choice of `node`, in declaration order.
    pub fn evaluate_choices<'n>(
        &self,
        node: &'n DialogueNode,
        state: &GameState,
        character_id: &CharacterId,
        skills: &SkillLevels,
    ) -> Result<Vec<EvaluatedChoice<'n>>, EvaluationError> {
        self.ensure_known(character_id)?;

        if self.hub.wants_return(node) {
            return Ok(vec![EvaluatedChoice {
                choice: Cow::Owned(self.hub.return_choice(node)),
                visible: true,
                enabled: true,
                reason: None,
                failed_gates: Vec::new(),
                synthesized: true,
            }]);
        }

        node.choices
            .iter()
            .map(|choice| self.evaluate_choice(node, choice, state, character_id, skills))
            .collect()
    }

    /// Annotate a single authored choice.
    pub fn evaluate_choice<'n>(
        &self,
        node: &DialogueNode,
        choice: &'n Choice,
        state: &GameState,
        character_id: &CharacterId,
        skills: &SkillLevels,
    ) -> Result<EvaluatedChoice<'n>, EvaluationError> {
        self.validate_choice(node, choice, character_id)?;

        let orb_lock = choice
            .required_orb_fill
            .as_ref()
            .and_then(|req| self.check_orb(req, state));
        let visible = orb_lock.is_none();

        let mut gate_failures = Vec::new();
        for i in priority_order(&choice.conditions) {
            if let Some(reason) = self.check_gate(&choice.conditions[i], state, character_id, skills) {
                gate_failures.push(reason);
            }
        }

        let mut failed_gates = Vec::with_capacity(gate_failures.len() + 1);
        if orb_lock.is_some() {
            failed_gates.push(ReasonCode::NeedsOrbFill);
        }
        failed_gates.extend(gate_failures.iter().map(|r| r.code));

        let enabled = visible && gate_failures.is_empty();
        let reason = orb_lock.or_else(|| gate_failures.into_iter().next());

        Ok(EvaluatedChoice {
            choice: Cow::Borrowed(choice),
            visible,
            enabled,
            reason,
            failed_gates,
            synthesized: false,
        })
    }

    /// The content variation to display: the first whose gates all hold,
    /// otherwise the first one authored.
    pub fn select_content<'n>(
        &self,
        node: &'n DialogueNode,
        state: &GameState,
        character_id: &CharacterId,
        skills: &SkillLevels,
    ) -> Result<&'n ContentVariation, EvaluationError> {
        self.ensure_known(character_id)?;
        let fallback = node
            .content
            .first()
            .ok_or_else(|| EvaluationError::NoContent(node.id.clone()))?;

        for variation in &node.content {
            let mut all_hold = true;
            for condition in &variation.conditions {
                condition
                    .validate(self.combos)
                    .map_err(|source| EvaluationError::MalformedCondition {
                        node_id: node.id.clone(),
                        choice_id: variation.variation_id.clone(),
                        source,
                    })?;
                condition
                    .subject(character_id)
                    .map(|subject| self.ensure_known(subject))
                    .transpose()?;
                if self.check_gate(condition, state, character_id, skills).is_some() {
                    all_hold = false;
                    break;
                }
            }
            if all_hold {
                return Ok(variation);
            }
        }
        Ok(fallback)
    }

    /// Check a single condition, returning the lock reason when it fails.
    pub fn check_gate(
        &self,
        condition: &Condition,
        state: &GameState,
        owner: &CharacterId,
        skills: &SkillLevels,
    ) -> Option<LockReason> {
        match condition {
            Condition::Trust { character, min, max } => {
                let subject = character.as_ref().unwrap_or(owner);
                let name = self.roster.display_name(subject);
                let current = state.trust(subject);
                if let Some(min) = min {
                    if current < *min {
                        return Some(LockReason {
                            code: ReasonCode::NeedsTrust,
                            why: format!("Requires trust {} with {} (currently {})", min, name, current),
                            how: format!("Keep talking with {}; responses they appreciate build trust", name),
                            progress: Some(Progress::new(current, *min)),
                        });
                    }
                }
                if let Some(max) = max {
                    if current > *max {
                        return Some(LockReason {
                            code: ReasonCode::NeedsTrust,
                            why: format!("Only available while trust with {} is {} or lower", name, max),
                            how: format!("This moment has passed as {} grew closer to you", name),
                            progress: Some(Progress::new(current, *max)),
                        });
                    }
                }
                None
            }
            Condition::Relationship { character, allowed } => {
                let subject = character.as_ref().unwrap_or(owner);
                let name = self.roster.display_name(subject);
                let current = state.character(subject).relationship;
                if allowed.contains(&current) {
                    return None;
                }
                let wanted: Vec<&str> = allowed.iter().map(|s| s.name()).collect();
                let how = if allowed.iter().any(|s| *s > current) {
                    format!("Build trust with {} to deepen the relationship", name)
                } else {
                    format!("Your relationship with {} has moved past this", name)
                };
                Some(LockReason {
                    code: ReasonCode::NeedsRelationship,
                    why: format!(
                        "Requires being {} with {} (currently {})",
                        wanted.join(" or "),
                        name,
                        current.name()
                    ),
                    how,
                    progress: None,
                })
            }
            Condition::RequiresGlobalFlags { flags } => {
                let missing = flags.iter().find(|f| !state.has_global_flag(f))?;
                Some(LockReason {
                    code: ReasonCode::NeedsGlobalFlag,
                    why: format!("Requires story progress: {}", missing),
                    how: "Keep exploring the station to uncover what comes first".to_string(),
                    progress: None,
                })
            }
            Condition::ForbidsGlobalFlags { flags } => {
                let present = flags.iter().find(|f| state.has_global_flag(f))?;
                Some(LockReason {
                    code: ReasonCode::BlockedByGlobalFlag,
                    why: format!("Closed off by an earlier decision ({})", present),
                    how: "A different path through the story leads here".to_string(),
                    progress: None,
                })
            }
            Condition::RequiresKnowledge { character, flags } => {
                let subject = character.as_ref().unwrap_or(owner);
                let missing = flags.iter().find(|f| !state.has_knowledge(subject, f))?;
                let name = self.roster.display_name(subject);
                Some(LockReason {
                    code: ReasonCode::NeedsKnowledgeFlag,
                    why: format!("{} hasn't shared this with you yet ({})", name, missing),
                    how: format!("Learn more about {} in conversation", name),
                    progress: None,
                })
            }
            Condition::PatternAtLeast { pattern, min } => {
                let current = state.patterns.get(*pattern);
                if current >= *min {
                    return None;
                }
                Some(LockReason {
                    code: ReasonCode::NeedsPatternLevel,
                    why: format!("Requires {} {} (currently {})", pattern, min, current),
                    how: format!("Make more {} choices", pattern),
                    progress: Some(Progress::new(current, *min)),
                })
            }
            Condition::Combo { combo } => {
                // Unknown combos are rejected by validation before this point;
                // treat a missing one as locked rather than open.
                let Some(def) = self.combos.get(combo) else {
                    return Some(LockReason {
                        code: ReasonCode::NeedsCombo,
                        why: format!("Requires the {} skill combination", combo),
                        how: "This combination is not available".to_string(),
                        progress: None,
                    });
                };
                if def.is_unlocked(skills) {
                    return None;
                }
                let unmet: Vec<String> = def
                    .requirements
                    .iter()
                    .filter(|req| skills.level(&req.skill) < req.min_level)
                    .map(|req| format!("{} {:.0}%", req.skill, req.min_level * 100.0))
                    .collect();
                Some(LockReason {
                    code: ReasonCode::NeedsCombo,
                    why: format!("Requires the {} skill combination", def.display_name()),
                    how: format!("Develop {}", unmet.join(", ")),
                    progress: Some(Progress::new(
                        def.satisfied_count(skills) as i64,
                        def.requirements.len() as i64,
                    )),
                })
            }
        }
    }

    fn check_orb(&self, req: &OrbFillRequirement, state: &GameState) -> Option<LockReason> {
        let fill = state.patterns.fill_percent(req.pattern);
        if fill >= req.threshold {
            return None;
        }
        Some(LockReason {
            code: ReasonCode::NeedsOrbFill,
            why: format!(
                "Your {} orb must be {}% full (currently {}%)",
                req.pattern, req.threshold, fill
            ),
            how: format!("Choose {} responses to fill the orb", req.pattern),
            progress: Some(Progress::new(fill, req.threshold)),
        })
    }

    fn ensure_known(&self, character_id: &CharacterId) -> Result<(), EvaluationError> {
        if self.roster.contains(character_id) {
            Ok(())
        } else {
            Err(EvaluationError::UnknownCharacter(character_id.clone()))
        }
    }

    fn validate_choice(
        &self,
        node: &DialogueNode,
        choice: &Choice,
        owner: &CharacterId,
    ) -> Result<(), EvaluationError> {
        let malformed = |source: ConditionError| EvaluationError::MalformedCondition {
            node_id: node.id.clone(),
            choice_id: choice.choice_id.clone(),
            source,
        };
        if let Some(req) = &choice.required_orb_fill {
            if req.threshold > 100 {
                return Err(malformed(ConditionError::OrbThresholdOutOfRange(req.threshold)));
            }
        }
        for condition in &choice.conditions {
            condition.validate(self.combos).map_err(malformed)?;
            if let Some(subject) = condition.subject(owner) {
                self.ensure_known(subject)?;
            }
        }
        Ok(())
    }
}
