/// Play-style patterns, orb fill, and skill levels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pattern points needed to fill an orb completely.
pub const ORB_CAPACITY: u32 = 10;

/// Amount a skill grows each time a choice exercises it.
pub const SKILL_STEP: f64 = 0.1;

/// Upper bound of any skill level.
pub const MAX_SKILL_LEVEL: f64 = 1.0;

/// One of the fixed play-style axes a player accumulates through choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Analytical,
    Patience,
    Exploring,
    Helping,
    Building,
}

impl Pattern {
    /// All patterns in canonical order.
    pub const ALL: [Pattern; 5] = [
        Pattern::Analytical,
        Pattern::Patience,
        Pattern::Exploring,
        Pattern::Helping,
        Pattern::Building,
    ];

    /// Lowercase name used in content files and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Patience => "patience",
            Self::Exploring => "exploring",
            Self::Helping => "helping",
            Self::Building => "building",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scores for every pattern. All five axes are always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPatterns {
    #[serde(default)]
    pub analytical: u32,
    #[serde(default)]
    pub patience: u32,
    #[serde(default)]
    pub exploring: u32,
    #[serde(default)]
    pub helping: u32,
    #[serde(default)]
    pub building: u32,
}

impl PlayerPatterns {
    pub fn get(&self, pattern: Pattern) -> u32 {
        match pattern {
            Pattern::Analytical => self.analytical,
            Pattern::Patience => self.patience,
            Pattern::Exploring => self.exploring,
            Pattern::Helping => self.helping,
            Pattern::Building => self.building,
        }
    }

    pub fn get_mut(&mut self, pattern: Pattern) -> &mut u32 {
        match pattern {
            Pattern::Analytical => &mut self.analytical,
            Pattern::Patience => &mut self.patience,
            Pattern::Exploring => &mut self.exploring,
            Pattern::Helping => &mut self.helping,
            Pattern::Building => &mut self.building,
        }
    }

    /// Add points to a pattern, saturating instead of overflowing.
    pub fn add(&mut self, pattern: Pattern, amount: u32) {
        let score = self.get_mut(pattern);
        *score = score.saturating_add(amount);
    }

    /// Orb fill percentage (0..=100) for a pattern.
    pub fn fill_percent(&self, pattern: Pattern) -> u32 {
        fill_for_score(self.get(pattern))
    }

    /// The unique highest non-zero pattern. Ties have no dominant pattern.
    pub fn dominant(&self) -> Option<Pattern> {
        let mut best: Option<(Pattern, u32)> = None;
        let mut tied = false;
        for pattern in Pattern::ALL {
            let score = self.get(pattern);
            match best {
                Some((_, top)) if score > top => {
                    best = Some((pattern, score));
                    tied = false;
                }
                Some((_, top)) if score == top => tied = true,
                None if score > 0 => best = Some((pattern, score)),
                _ => {}
            }
        }
        match best {
            Some((pattern, _)) if !tied => Some(pattern),
            _ => None,
        }
    }
}

/// Fill percentage for a raw pattern score.
pub fn fill_for_score(score: u32) -> u32 {
    (score.saturating_mul(100) / ORB_CAPACITY).min(100)
}

/// Smallest pattern score whose fill reaches `threshold` percent.
pub fn score_for_fill(threshold: u32) -> u32 {
    let threshold = threshold.min(100);
    (threshold * ORB_CAPACITY).div_ceil(100)
}

/// Skill name → fractional level in `0.0..=1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillLevels(pub BTreeMap<String, f64>);

impl SkillLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, skill: &str) -> f64 {
        self.0.get(skill).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, skill: impl Into<String>, level: f64) {
        self.0.insert(skill.into(), level.clamp(0.0, MAX_SKILL_LEVEL));
    }

    /// Raise a skill by `amount`, clamped to the maximum level.
    pub fn raise(&mut self, skill: &str, amount: f64) {
        let next = (self.level(skill) + amount).clamp(0.0, MAX_SKILL_LEVEL);
        self.0.insert(skill.to_string(), next);
    }
}

/// A minimum level for one skill inside a combo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRequirement {
    pub skill: String,
    pub min_level: f64,
}

/// A named combination of skill levels that unlocks gated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillCombo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub requirements: Vec<SkillRequirement>,
}

impl SkillCombo {
    /// Number of requirements currently met.
    pub fn satisfied_count(&self, skills: &SkillLevels) -> usize {
        self.requirements
            .iter()
            .filter(|req| skills.level(&req.skill) >= req.min_level)
            .count()
    }

    pub fn is_unlocked(&self, skills: &SkillLevels) -> bool {
        self.satisfied_count(skills) == self.requirements.len()
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// All combos known to the engine, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ComboCatalog {
    combos: BTreeMap<String, SkillCombo>,
}

impl ComboCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, combo: SkillCombo) {
        self.combos.insert(combo.id.clone(), combo);
    }

    pub fn get(&self, id: &str) -> Option<&SkillCombo> {
        self.combos.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.combos.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillCombo> {
        self.combos.values()
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }
}

impl Extend<SkillCombo> for ComboCatalog {
    fn extend<I: IntoIterator<Item = SkillCombo>>(&mut self, iter: I) {
        for combo in iter {
            self.register(combo);
        }
    }
}

impl FromIterator<SkillCombo> for ComboCatalog {
    fn from_iter<I: IntoIterator<Item = SkillCombo>>(iter: I) -> Self {
        let mut catalog = ComboCatalog::new();
        catalog.extend(iter);
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_scales_with_capacity() {
        let mut patterns = PlayerPatterns::default();
        assert_eq!(patterns.fill_percent(Pattern::Analytical), 0);
        patterns.analytical = 1;
        assert_eq!(patterns.fill_percent(Pattern::Analytical), 10);
        patterns.analytical = 8;
        assert_eq!(patterns.fill_percent(Pattern::Analytical), 80);
        patterns.analytical = 25;
        assert_eq!(patterns.fill_percent(Pattern::Analytical), 100);
    }

    #[test]
    fn score_for_fill_rounds_up() {
        assert_eq!(score_for_fill(80), 8);
        assert_eq!(score_for_fill(75), 8);
        assert_eq!(score_for_fill(0), 0);
        assert_eq!(score_for_fill(150), 10);
        assert!(fill_for_score(score_for_fill(75)) >= 75);
    }

    #[test]
    fn dominant_requires_unique_maximum() {
        let mut patterns = PlayerPatterns::default();
        assert_eq!(patterns.dominant(), None);

        patterns.helping = 3;
        assert_eq!(patterns.dominant(), Some(Pattern::Helping));

        patterns.analytical = 3;
        assert_eq!(patterns.dominant(), None);

        patterns.analytical = 4;
        assert_eq!(patterns.dominant(), Some(Pattern::Analytical));
    }

    #[test]
    fn add_saturates() {
        let mut patterns = PlayerPatterns {
            building: u32::MAX,
            ..Default::default()
        };
        patterns.add(Pattern::Building, 5);
        assert_eq!(patterns.building, u32::MAX);
    }

    #[test]
    fn skills_clamp_to_max() {
        let mut skills = SkillLevels::new();
        assert_eq!(skills.level("deduction"), 0.0);
        for _ in 0..15 {
            skills.raise("deduction", SKILL_STEP);
        }
        assert!((skills.level("deduction") - MAX_SKILL_LEVEL).abs() < f64::EPSILON);
    }

    #[test]
    fn combo_unlocks_when_all_requirements_met() {
        let combo = SkillCombo {
            id: "mentor_sight".to_string(),
            name: String::new(),
            requirements: vec![
                SkillRequirement {
                    skill: "empathy".to_string(),
                    min_level: 0.3,
                },
                SkillRequirement {
                    skill: "deduction".to_string(),
                    min_level: 0.2,
                },
            ],
        };
        let mut skills = SkillLevels::new();
        skills.set("empathy", 0.5);
        assert_eq!(combo.satisfied_count(&skills), 1);
        assert!(!combo.is_unlocked(&skills));

        skills.set("deduction", 0.2);
        assert!(combo.is_unlocked(&skills));
        assert_eq!(combo.display_name(), "mentor_sight");
    }
}
