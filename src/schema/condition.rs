/// Gating conditions attached to choices and content variations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::character::{CharacterId, RelationshipStatus, MAX_TRUST, MIN_TRUST};
use super::patterns::{ComboCatalog, Pattern};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("trust condition has neither a minimum nor a maximum")]
    UnboundedTrust,
    #[error("trust bound {0} is outside {min}..={max}", min = MIN_TRUST, max = MAX_TRUST)]
    TrustOutOfRange(i32),
    #[error("trust minimum {min} exceeds maximum {max}")]
    InvertedTrust { min: i32, max: i32 },
    #[error("relationship condition allows no status")]
    EmptyAllowList,
    #[error("{0} condition lists no flags")]
    EmptyFlagList(ConditionKind),
    #[error("unknown skill combo '{0}'")]
    UnknownCombo(String),
    #[error("orb fill threshold {0} is above 100 percent")]
    OrbThresholdOutOfRange(u32),
}

/// The kind of a gate. The derived ordering is the evaluation priority:
/// when several gates fail, the first kind in this order is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Trust,
    Relationship,
    GlobalFlagRequired,
    GlobalFlagForbidden,
    KnowledgeFlag,
    PatternMinimum,
    Combo,
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Trust => "trust",
            Self::Relationship => "relationship",
            Self::GlobalFlagRequired => "required global flag",
            Self::GlobalFlagForbidden => "forbidden global flag",
            Self::KnowledgeFlag => "knowledge flag",
            Self::PatternMinimum => "pattern minimum",
            Self::Combo => "combo",
        };
        f.write_str(name)
    }
}

/// A single gate on a choice.
///
/// A missing `character` refers to the character whose conversation the
/// node belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Trust {
        #[serde(default)]
        character: Option<CharacterId>,
        #[serde(default)]
        min: Option<i32>,
        #[serde(default)]
        max: Option<i32>,
    },
    Relationship {
        #[serde(default)]
        character: Option<CharacterId>,
        allowed: Vec<RelationshipStatus>,
    },
    RequiresGlobalFlags {
        flags: Vec<String>,
    },
    ForbidsGlobalFlags {
        flags: Vec<String>,
    },
    RequiresKnowledge {
        #[serde(default)]
        character: Option<CharacterId>,
        flags: Vec<String>,
    },
    PatternAtLeast {
        pattern: Pattern,
        min: u32,
    },
    Combo {
        combo: String,
    },
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::Trust { .. } => ConditionKind::Trust,
            Self::Relationship { .. } => ConditionKind::Relationship,
            Self::RequiresGlobalFlags { .. } => ConditionKind::GlobalFlagRequired,
            Self::ForbidsGlobalFlags { .. } => ConditionKind::GlobalFlagForbidden,
            Self::RequiresKnowledge { .. } => ConditionKind::KnowledgeFlag,
            Self::PatternAtLeast { .. } => ConditionKind::PatternMinimum,
            Self::Combo { .. } => ConditionKind::Combo,
        }
    }

    /// The character this condition reads, given the conversation owner.
    pub fn subject<'a>(&'a self, owner: &'a CharacterId) -> Option<&'a CharacterId> {
        match self {
            Self::Trust { character, .. }
            | Self::Relationship { character, .. }
            | Self::RequiresKnowledge { character, .. } => Some(character.as_ref().unwrap_or(owner)),
            _ => None,
        }
    }

    /// Reject conditions that could never be meaningfully evaluated.
    pub fn validate(&self, combos: &ComboCatalog) -> Result<(), ConditionError> {
        match self {
            Self::Trust { min, max, .. } => {
                if min.is_none() && max.is_none() {
                    return Err(ConditionError::UnboundedTrust);
                }
                for bound in min.iter().chain(max.iter()) {
                    if !(MIN_TRUST..=MAX_TRUST).contains(bound) {
                        return Err(ConditionError::TrustOutOfRange(*bound));
                    }
                }
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(ConditionError::InvertedTrust {
                            min: *min,
                            max: *max,
                        });
                    }
                }
                Ok(())
            }
            Self::Relationship { allowed, .. } => {
                if allowed.is_empty() {
                    Err(ConditionError::EmptyAllowList)
                } else {
                    Ok(())
                }
            }
            Self::RequiresGlobalFlags { flags }
            | Self::ForbidsGlobalFlags { flags }
            | Self::RequiresKnowledge { flags, .. } => {
                if flags.is_empty() {
                    Err(ConditionError::EmptyFlagList(self.kind()))
                } else {
                    Ok(())
                }
            }
            Self::PatternAtLeast { .. } => Ok(()),
            Self::Combo { combo } => {
                if combos.contains(combo) {
                    Ok(())
                } else {
                    Err(ConditionError::UnknownCombo(combo.clone()))
                }
            }
        }
    }
}

/// Indices of `conditions` sorted into evaluation priority. Declaration
/// order is kept among conditions of the same kind.
pub fn priority_order(conditions: &[Condition]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..conditions.len()).collect();
    order.sort_by_key(|&i| conditions[i].kind());
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::patterns::SkillCombo;

    fn trust(min: Option<i32>, max: Option<i32>) -> Condition {
        Condition::Trust {
            character: None,
            min,
            max,
        }
    }

    #[test]
    fn kinds_order_by_priority() {
        assert!(ConditionKind::Trust < ConditionKind::Relationship);
        assert!(ConditionKind::Relationship < ConditionKind::GlobalFlagRequired);
        assert!(ConditionKind::GlobalFlagRequired < ConditionKind::GlobalFlagForbidden);
        assert!(ConditionKind::GlobalFlagForbidden < ConditionKind::KnowledgeFlag);
        assert!(ConditionKind::KnowledgeFlag < ConditionKind::PatternMinimum);
        assert!(ConditionKind::PatternMinimum < ConditionKind::Combo);
    }

    #[test]
    fn priority_order_is_stable_within_kind() {
        let conditions = vec![
            Condition::Combo {
                combo: "a".to_string(),
            },
            Condition::RequiresGlobalFlags {
                flags: vec!["first".to_string()],
            },
            trust(Some(2), None),
            Condition::RequiresGlobalFlags {
                flags: vec!["second".to_string()],
            },
        ];
        assert_eq!(priority_order(&conditions), vec![2, 1, 3, 0]);
    }

    #[test]
    fn trust_validation() {
        let combos = ComboCatalog::new();
        assert!(trust(Some(2), None).validate(&combos).is_ok());
        assert!(trust(None, Some(5)).validate(&combos).is_ok());
        assert_eq!(
            trust(None, None).validate(&combos),
            Err(ConditionError::UnboundedTrust)
        );
        assert_eq!(
            trust(Some(11), None).validate(&combos),
            Err(ConditionError::TrustOutOfRange(11))
        );
        assert_eq!(
            ConditionError::TrustOutOfRange(11).to_string(),
            "trust bound 11 is outside 0..=10"
        );
        assert_eq!(
            trust(Some(6), Some(3)).validate(&combos),
            Err(ConditionError::InvertedTrust { min: 6, max: 3 })
        );
    }

    #[test]
    fn empty_lists_are_malformed() {
        let combos = ComboCatalog::new();
        let cond = Condition::Relationship {
            character: None,
            allowed: vec![],
        };
        assert_eq!(cond.validate(&combos), Err(ConditionError::EmptyAllowList));

        let cond = Condition::ForbidsGlobalFlags { flags: vec![] };
        assert_eq!(
            cond.validate(&combos),
            Err(ConditionError::EmptyFlagList(ConditionKind::GlobalFlagForbidden))
        );
    }

    #[test]
    fn combo_must_be_catalogued() {
        let mut combos = ComboCatalog::new();
        let cond = Condition::Combo {
            combo: "mentor_sight".to_string(),
        };
        assert_eq!(
            cond.validate(&combos),
            Err(ConditionError::UnknownCombo("mentor_sight".to_string()))
        );
        combos.register(SkillCombo {
            id: "mentor_sight".to_string(),
            name: String::new(),
            requirements: vec![],
        });
        assert!(cond.validate(&combos).is_ok());
    }

    #[test]
    fn subject_defaults_to_owner() {
        let owner = CharacterId::new("samuel");
        let other = CharacterId::new("maya");
        let implicit = trust(Some(1), None);
        assert_eq!(implicit.subject(&owner), Some(&owner));
        let explicit = Condition::RequiresKnowledge {
            character: Some(other.clone()),
            flags: vec!["x".to_string()],
        };
        assert_eq!(explicit.subject(&owner), Some(&other));
        let flag = Condition::RequiresGlobalFlags {
            flags: vec!["x".to_string()],
        };
        assert_eq!(flag.subject(&owner), None);
    }
}
