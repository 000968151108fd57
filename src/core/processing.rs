/// Choice processing: the state transition a selected choice causes.
///
/// Processing never touches the caller's state. It returns a `StateUpdate`
/// describing every change, which the session layer persists and the
/// simulators apply to their own copies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::schema::character::{
    CharacterId, CharacterRoster, PatternAffinity, RelationshipStatus, MAX_TRUST, MIN_TRUST,
};
use crate::schema::graph::{Choice, DialogueNode};
use crate::schema::patterns::{fill_for_score, ComboCatalog, Pattern, SKILL_STEP};
use crate::schema::state::GameState;

/// Orb fill percentages that count as milestones.
pub const ORB_MILESTONES: [u32; 4] = [25, 50, 75, 100];

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("unknown character: {0}")]
    UnknownCharacter(CharacterId),
}

/// How the player's dominant pattern lines up with a character's affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resonance {
    Primary,
    Secondary,
    Friction,
    Neutral,
}

impl Resonance {
    pub fn between(dominant: Option<Pattern>, affinity: Option<&PatternAffinity>) -> Self {
        let (Some(dominant), Some(affinity)) = (dominant, affinity) else {
            return Self::Neutral;
        };
        if dominant == affinity.primary {
            Self::Primary
        } else if affinity.secondary == Some(dominant) {
            Self::Secondary
        } else if affinity.friction == Some(dominant) {
            Self::Friction
        } else {
            Self::Neutral
        }
    }

    /// Scaling ratio `(numerator, denominator)` for a delta of this sign.
    pub fn ratio(self, base_delta: i32) -> (i32, i32) {
        match (self, base_delta >= 0) {
            (Self::Primary, true) => (3, 2),
            (Self::Secondary, true) => (5, 4),
            (Self::Friction, true) => (1, 2),
            (Self::Primary, false) => (1, 2),
            (Self::Friction, false) => (3, 2),
            (Self::Secondary, false) | (Self::Neutral, _) => (1, 1),
        }
    }

    /// Scale a base trust delta, rounding half away from zero. Saturates at
    /// the bounds of `i32`.
    pub fn scale(self, base_delta: i32) -> i32 {
        let (num, den) = self.ratio(base_delta);
        let scaled = div_round_half_away(i64::from(base_delta) * i64::from(num), i64::from(den));
        i32::try_from(scaled).unwrap_or(if scaled < 0 { i32::MIN } else { i32::MAX })
    }
}

fn div_round_half_away(n: i64, d: i64) -> i64 {
    if n >= 0 {
        (2 * n + d) / (2 * d)
    } else {
        -((-2 * n + d) / (2 * d))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustChange {
    pub before: i32,
    pub base_delta: i32,
    pub resonance: Resonance,
    /// Delta after resonance, before clamping.
    pub scaled_delta: i32,
    /// Delta actually applied once trust is clamped to its bounds.
    pub applied_delta: i32,
    pub after: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipChange {
    pub from: RelationshipStatus,
    pub to: RelationshipStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDelta {
    pub pattern: Pattern,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDelta {
    pub skill: String,
    pub before: f64,
    pub after: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoTone {
    Warm,
    Cool,
}

/// A character's reaction surfaced after a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsequenceEcho {
    pub character_id: CharacterId,
    pub text: String,
    pub tone: EchoTone,
}

/// Something newly unlocked by crossing a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unlock {
    RelationshipMilestone {
        character_id: CharacterId,
        status: RelationshipStatus,
    },
    OrbMilestone {
        pattern: Pattern,
        fill: u32,
    },
    ComboUnlocked {
        combo: String,
    },
    Transformation {
        character_id: CharacterId,
        id: String,
    },
}

/// Every change a selected choice makes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Owner of the conversation the choice was made in.
    pub conversation_with: CharacterId,
    /// Character whose trust and knowledge change.
    pub character_id: CharacterId,
    pub node_id: String,
    pub choice_id: String,
    pub next_node_id: String,
    pub trust: TrustChange,
    pub relationship: Option<RelationshipChange>,
    pub pattern_deltas: Vec<PatternDelta>,
    pub skill_deltas: Vec<SkillDelta>,
    pub add_global_flags: Vec<String>,
    pub add_knowledge_flags: Vec<String>,
    pub echo: Option<ConsequenceEcho>,
    pub unlocks: Vec<Unlock>,
}

impl StateUpdate {
    /// Apply the update to `state`.
    ///
    /// `interaction_at` is recorded as the conversation owner's last
    /// interaction time when given.
    pub fn apply(&self, state: &mut GameState, interaction_at: Option<u64>) {
        {
            let target = state.character_mut(&self.character_id);
            target.trust = self.trust.after;
            if let Some(change) = &self.relationship {
                target.relationship = target.relationship.max(change.to);
            }
            target
                .knowledge_flags
                .extend(self.add_knowledge_flags.iter().cloned());
        }

        let owner = state.character_mut(&self.conversation_with);
        owner.history.push(self.node_id.clone());
        if interaction_at.is_some() {
            owner.last_interaction = interaction_at;
        }

        state
            .global_flags
            .extend(self.add_global_flags.iter().cloned());
        for delta in &self.pattern_deltas {
            state.patterns.add(delta.pattern, delta.amount);
        }
        for delta in &self.skill_deltas {
            state.skills.set(delta.skill.clone(), delta.after);
        }
    }

    /// A copy of `state` with the update applied.
    pub fn applied_to(&self, state: &GameState, interaction_at: Option<u64>) -> GameState {
        let mut next = state.clone();
        self.apply(&mut next, interaction_at);
        next
    }

    pub fn has_unlocks(&self) -> bool {
        !self.unlocks.is_empty()
    }
}

/// Computes `StateUpdate`s from the engine's static catalogs.
#[derive(Debug, Clone, Copy)]
pub struct ChoiceProcessor<'e> {
    roster: &'e CharacterRoster,
    combos: &'e ComboCatalog,
}

impl<'e> ChoiceProcessor<'e> {
    pub fn new(roster: &'e CharacterRoster, combos: &'e ComboCatalog) -> Self {
        Self { roster, combos }
    }

    /// Compute the effects of taking `choice` at `node` while talking to `owner`.
    pub fn process_choice(
        &self,
        state: &GameState,
        owner: &CharacterId,
        node: &DialogueNode,
        choice: &Choice,
    ) -> Result<StateUpdate, ProcessingError> {
        let consequence = choice.consequence.clone().unwrap_or_default();
        let target = consequence.character.clone().unwrap_or_else(|| owner.clone());
        for id in [owner, &target] {
            if !self.roster.contains(id) {
                return Err(ProcessingError::UnknownCharacter(id.clone()));
            }
        }
        let profile = self.roster.get(&target);
        let target_before = state.character(&target);

        // Trust, scaled by resonance and clamped.
        let base_delta = consequence.trust_change;
        let resonance = if base_delta == 0 {
            Resonance::Neutral
        } else {
            Resonance::between(
                state.patterns.dominant(),
                profile.and_then(|p| p.affinity.as_ref()),
            )
        };
        let scaled_delta = resonance.scale(base_delta);
        let before = target_before.trust;
        let after = i32::saturating_add(before, scaled_delta).clamp(MIN_TRUST, MAX_TRUST);
        let trust = TrustChange {
            before,
            base_delta,
            resonance,
            scaled_delta,
            applied_delta: after.saturating_sub(before),
            after,
        };

        let mut unlocks = Vec::new();

        let status_before = target_before.relationship;
        let status_after = status_before.advanced_by(after);
        let relationship = (status_after != status_before).then(|| {
            unlocks.push(Unlock::RelationshipMilestone {
                character_id: target.clone(),
                status: status_after,
            });
            RelationshipChange {
                from: status_before,
                to: status_after,
            }
        });

        // Pattern growth and orb milestones.
        let mut pattern_deltas = Vec::new();
        if let Some(pattern) = choice.pattern {
            let score = state.patterns.get(pattern);
            let fill_before = fill_for_score(score);
            let fill_after = fill_for_score(score.saturating_add(1));
            for milestone in ORB_MILESTONES {
                if fill_before < milestone && milestone <= fill_after {
                    unlocks.push(Unlock::OrbMilestone {
                        pattern,
                        fill: milestone,
                    });
                }
            }
            pattern_deltas.push(PatternDelta { pattern, amount: 1 });
        }

        // Skill growth and combo unlocks.
        let mut skill_deltas = Vec::new();
        if !choice.skills.is_empty() {
            let mut skills_after = state.skills.clone();
            let mut seen = FxHashSet::default();
            for skill in &choice.skills {
                if !seen.insert(skill.as_str()) {
                    continue;
                }
                let level_before = state.skills.level(skill);
                skills_after.raise(skill, SKILL_STEP);
                let level_after = skills_after.level(skill);
                if level_after > level_before {
                    skill_deltas.push(SkillDelta {
                        skill: skill.clone(),
                        before: level_before,
                        after: level_after,
                    });
                }
            }
            for combo in self.combos.iter() {
                if !combo.is_unlocked(&state.skills) && combo.is_unlocked(&skills_after) {
                    unlocks.push(Unlock::ComboUnlocked {
                        combo: combo.id.clone(),
                    });
                }
            }
        }

        let add_global_flags = new_flags(&consequence.add_global_flags, |f| state.has_global_flag(f));
        let add_knowledge_flags =
            new_flags(&consequence.add_knowledge_flags, |f| target_before.has_knowledge(f));

        if let Some(trigger) = profile.and_then(|p| p.transformation.as_ref()) {
            let mut projected = target_before.clone();
            projected.trust = after;
            projected
                .knowledge_flags
                .extend(add_knowledge_flags.iter().cloned());
            if !trigger.is_met(&target_before) && trigger.is_met(&projected) {
                unlocks.push(Unlock::Transformation {
                    character_id: target.clone(),
                    id: trigger.id.clone(),
                });
            }
        }

        let echo = self.select_echo(&target, choice, &trust, consequence.echo);

        Ok(StateUpdate {
            conversation_with: owner.clone(),
            character_id: target,
            node_id: node.id.clone(),
            choice_id: choice.choice_id.clone(),
            next_node_id: choice.next_node_id.clone(),
            trust,
            relationship,
            pattern_deltas,
            skill_deltas,
            add_global_flags,
            add_knowledge_flags,
            echo,
            unlocks,
        })
    }

    /// An explicit echo wins; otherwise a line from the character's pool,
    /// picked deterministically from the inputs.
    fn select_echo(
        &self,
        target: &CharacterId,
        choice: &Choice,
        trust: &TrustChange,
        explicit: Option<String>,
    ) -> Option<ConsequenceEcho> {
        let tone = if trust.scaled_delta < 0 {
            EchoTone::Cool
        } else {
            EchoTone::Warm
        };
        if let Some(text) = explicit {
            return Some(ConsequenceEcho {
                character_id: target.clone(),
                text,
                tone,
            });
        }
        if trust.scaled_delta == 0 {
            return None;
        }
        let echoes = &self.roster.get(target)?.echoes;
        let pool = match tone {
            EchoTone::Warm => &echoes.positive,
            EchoTone::Cool => &echoes.negative,
        };
        if pool.is_empty() {
            return None;
        }
        let mut hasher = FxHasher::default();
        target.hash(&mut hasher);
        choice.choice_id.hash(&mut hasher);
        trust.before.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        let text = pool[rng.gen_range(0..pool.len())].clone();
        Some(ConsequenceEcho {
            character_id: target.clone(),
            text,
            tone,
        })
    }
}

/// Flags from `candidates` not already held, without duplicates.
fn new_flags(candidates: &[String], held: impl Fn(&str) -> bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for flag in candidates {
        if !held(flag) && !out.contains(flag) {
            out.push(flag.clone());
        }
    }
    out
}
