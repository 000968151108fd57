/// CI gating for the narrative simulator: a JSON run config plus a baseline
/// of accepted failure keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::deadlock::{NarrativeSimOptions, NarrativeSimReport};
use crate::core::simulation::{SimulationLimits, DEFAULT_MAX_UNIQUE_STATES_PER_NODE};
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, BaselineError> {
    let contents = std::fs::read_to_string(path).map_err(|source| BaselineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| BaselineError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// A narrative simulation run, as checked into the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Content directory, relative to the config file.
    pub fixture: String,
    #[serde(default)]
    pub start_node_ids: Vec<String>,
    pub max_steps: usize,
    pub max_states: usize,
    #[serde(default)]
    pub max_unique_states_per_node: Option<usize>,
    /// Starting state. Defaults to a fresh playthrough.
    #[serde(default)]
    pub initial_state: Option<GameState>,
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        read_json(path)
    }

    /// The fixture directory resolved against the config file's directory.
    pub fn fixture_path(&self, config_path: &Path) -> PathBuf {
        let fixture = Path::new(&self.fixture);
        if fixture.is_absolute() {
            return fixture.to_path_buf();
        }
        config_path
            .parent()
            .map_or_else(|| fixture.to_path_buf(), |dir| dir.join(fixture))
    }

    pub fn limits(&self) -> SimulationLimits {
        SimulationLimits {
            max_steps: self.max_steps,
            max_states: self.max_states,
            max_unique_states_per_node: self
                .max_unique_states_per_node
                .unwrap_or(DEFAULT_MAX_UNIQUE_STATES_PER_NODE),
        }
    }

    pub fn options(&self) -> NarrativeSimOptions {
        NarrativeSimOptions {
            start_node_ids: self.start_node_ids.clone(),
            initial_state: self.initial_state.clone().unwrap_or_default(),
            limits: self.limits(),
        }
    }
}

/// Failure keys accepted as known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub failures: BTreeSet<String>,
}

impl Baseline {
    pub fn from_report(report: &NarrativeSimReport) -> Self {
        Self {
            failures: report.failure_keys(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        read_json(path)
    }

    /// Load a baseline, treating a missing file as empty.
    pub fn load_or_empty(path: &Path) -> Result<Self, BaselineError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no baseline file, treating every failure as new");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), BaselineError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| BaselineError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, json + "\n").map_err(|source| BaselineError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn diff(&self, report: &NarrativeSimReport) -> BaselineDiff {
        let current = report.failure_keys();
        BaselineDiff {
            new_failures: current.difference(&self.failures).cloned().collect(),
            fixed: self.failures.difference(&current).cloned().collect(),
            known: current.intersection(&self.failures).cloned().collect(),
        }
    }
}

/// How a report compares with the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaselineDiff {
    /// Reported but not accepted: a regression.
    pub new_failures: Vec<String>,
    /// Accepted but no longer reported.
    pub fixed: Vec<String>,
    pub known: Vec<String>,
}

impl BaselineDiff {
    pub fn is_regression(&self) -> bool {
        !self.new_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::deadlock::{FailureKind, NarrativeFailure};

    fn report(keys: &[&str]) -> NarrativeSimReport {
        NarrativeSimReport {
            start_node_ids: vec!["a".to_string()],
            failures: keys
                .iter()
                .map(|k| NarrativeFailure {
                    kind: FailureKind::SoftDeadlock,
                    key: k.to_string(),
                    node_id: "a".to_string(),
                    choice_id: None,
                    target: None,
                    message: String::new(),
                    start_node_id: "a".to_string(),
                    trace: vec![],
                })
                .collect(),
            expanded_states: 1,
            admitted_states: 1,
            truncated: false,
            truncations: vec![],
            visited_node_ids: BTreeSet::new(),
            unreachable_node_ids: vec![],
        }
    }

    #[test]
    fn diff_splits_new_fixed_and_known() {
        let baseline = Baseline {
            failures: ["soft_deadlock:a", "soft_deadlock:b"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let diff = baseline.diff(&report(&["soft_deadlock:b", "soft_deadlock:c"]));
        assert_eq!(diff.new_failures, vec!["soft_deadlock:c"]);
        assert_eq!(diff.fixed, vec!["soft_deadlock:a"]);
        assert_eq!(diff.known, vec!["soft_deadlock:b"]);
        assert!(diff.is_regression());
    }

    #[test]
    fn fixing_everything_is_not_a_regression() {
        let baseline = Baseline::from_report(&report(&["soft_deadlock:a"]));
        let diff = baseline.diff(&report(&[]));
        assert!(!diff.is_regression());
        assert_eq!(diff.fixed.len(), 1);
    }

    #[test]
    fn baseline_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        assert_eq!(Baseline::load_or_empty(&path).unwrap(), Baseline::default());

        let baseline = Baseline::from_report(&report(&["dangling_target:a:go->b"]));
        baseline.save(&path).unwrap();
        assert_eq!(Baseline::load(&path).unwrap(), baseline);
    }

    #[test]
    fn malformed_baseline_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Baseline::load(&path).unwrap_err();
        assert!(matches!(err, BaselineError::Json { .. }));
        assert!(err.to_string().contains("baseline.json"));
    }

    #[test]
    fn config_resolves_fixture_beside_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(
            &path,
            r#"{"fixture": "terminus", "start_node_ids": ["samuel_intro"], "max_steps": 100, "max_states": 200}"#,
        )
        .unwrap();
        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.fixture_path(&path), dir.path().join("terminus"));
        let limits = config.limits();
        assert_eq!(limits.max_steps, 100);
        assert_eq!(limits.max_unique_states_per_node, DEFAULT_MAX_UNIQUE_STATES_PER_NODE);
        assert_eq!(config.options().start_node_ids, vec!["samuel_intro"]);
    }
}
