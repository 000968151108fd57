/// Narrative-path simulation: explore from every entry point and report
/// places a player could get stuck, with the steps that reproduce them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::simulation::{
    explore, Finding, RelevanceIndex, SimulationContext, SimulationError, SimulationLimits,
    TraceHop, TruncationCause,
};
use crate::schema::state::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SoftDeadlock,
    DanglingTarget,
    RedirectCycle,
    RedirectTruncated,
    EvaluationError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoftDeadlock => "soft_deadlock",
            Self::DanglingTarget => "dangling_target",
            Self::RedirectCycle => "redirect_cycle",
            Self::RedirectTruncated => "redirect_truncated",
            Self::EvaluationError => "evaluation_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content failure with its reproduction trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeFailure {
    pub kind: FailureKind,
    /// Stable identity used for de-duplication and CI baselines.
    pub key: String,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
    pub start_node_id: String,
    pub trace: Vec<TraceHop>,
}

impl NarrativeFailure {
    fn from_finding(finding: Finding, start_node_id: &str) -> Self {
        let start_node_id = start_node_id.to_string();
        match finding {
            Finding::SoftDeadlock { node_id, trace } => Self {
                kind: FailureKind::SoftDeadlock,
                key: format!("soft_deadlock:{}", node_id),
                message: format!("node '{}' offers no visible and enabled choice", node_id),
                node_id,
                choice_id: None,
                target: None,
                start_node_id,
                trace,
            },
            Finding::DanglingTarget {
                node_id,
                choice_id,
                target,
                trace,
            } => Self {
                kind: FailureKind::DanglingTarget,
                key: format!("dangling_target:{}:{}->{}", node_id, choice_id, target),
                message: format!(
                    "choice '{}' at '{}' leads to unknown node '{}'",
                    choice_id, node_id, target
                ),
                node_id,
                choice_id: Some(choice_id),
                target: Some(target),
                start_node_id,
                trace,
            },
            Finding::RedirectCycle { path, trace } => Self {
                kind: FailureKind::RedirectCycle,
                key: format!("redirect_cycle:{}", path.requested),
                message: format!("redirect cycle: {}", path.path.join(" -> ")),
                node_id: path.requested.clone(),
                choice_id: None,
                target: Some(path.resolved_id().to_string()),
                start_node_id,
                trace,
            },
            Finding::RedirectTruncated { path, trace } => Self {
                kind: FailureKind::RedirectTruncated,
                key: format!("redirect_truncated:{}", path.requested),
                message: format!(
                    "redirect chain from '{}' exceeds {} hops",
                    path.requested, path.hops
                ),
                node_id: path.requested.clone(),
                choice_id: None,
                target: Some(path.resolved_id().to_string()),
                start_node_id,
                trace,
            },
            Finding::EvaluationError {
                node_id,
                message,
                trace,
            } => Self {
                kind: FailureKind::EvaluationError,
                key: format!("evaluation_error:{}", node_id),
                node_id,
                choice_id: None,
                target: None,
                message,
                start_node_id,
                trace,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarrativeSimOptions {
    /// Entry points. Empty means every graph's start node.
    pub start_node_ids: Vec<String>,
    pub initial_state: GameState,
    pub limits: SimulationLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSimReport {
    pub start_node_ids: Vec<String>,
    pub failures: Vec<NarrativeFailure>,
    pub expanded_states: usize,
    pub admitted_states: usize,
    pub truncated: bool,
    #[serde(default)]
    pub truncations: Vec<TruncatedStart>,
    pub visited_node_ids: BTreeSet<String>,
    pub unreachable_node_ids: Vec<String>,
}

/// An entry point whose exploration hit a bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncatedStart {
    pub start_node_id: String,
    pub cause: TruncationCause,
}

impl NarrativeSimReport {
    pub fn failure_keys(&self) -> BTreeSet<String> {
        self.failures.iter().map(|f| f.key.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &NarrativeFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    pub fn failure(&self, key: &str) -> Option<&NarrativeFailure> {
        self.failures.iter().find(|f| f.key == key)
    }
}

/// Explore from each entry point and collect de-duplicated failures.
///
/// Exploration is breadth-first, so the first trace kept for a failure is
/// a shortest one from its entry point.
pub fn build_narrative_sim_report(
    ctx: &SimulationContext<'_>,
    options: &NarrativeSimOptions,
) -> Result<NarrativeSimReport, SimulationError> {
    let start_node_ids: Vec<String> = if options.start_node_ids.is_empty() {
        ctx.registry
            .graphs()
            .iter()
            .map(|g| g.start_node_id().to_string())
            .collect()
    } else {
        options.start_node_ids.clone()
    };

    let index = RelevanceIndex::build(ctx.registry, ctx.combos);
    let mut failures: Vec<NarrativeFailure> = Vec::new();
    let mut keys = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut truncations = Vec::new();
    let mut expanded_states = 0;
    let mut admitted_states = 0;

    for start in &start_node_ids {
        let exploration = explore(ctx, &options.initial_state, start, options.limits, &index)?;
        expanded_states += exploration.expanded_states;
        admitted_states += exploration.admitted_states;
        if let Some(cause) = exploration.truncation {
            tracing::warn!(start = %start, ?cause, "narrative simulation truncated");
            truncations.push(TruncatedStart {
                start_node_id: start.clone(),
                cause,
            });
        }
        visited.extend(exploration.visited);
        for finding in exploration.findings {
            let failure = NarrativeFailure::from_finding(finding, start);
            if keys.insert(failure.key.clone()) {
                tracing::debug!(key = %failure.key, trace_len = failure.trace.len(), "narrative failure");
                failures.push(failure);
            }
        }
    }

    let unreachable_node_ids = ctx
        .registry
        .graphs()
        .iter()
        .flat_map(|g| g.nodes())
        .filter(|n| !visited.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();

    let report = NarrativeSimReport {
        start_node_ids,
        failures,
        expanded_states,
        admitted_states,
        truncated: !truncations.is_empty(),
        truncations,
        visited_node_ids: visited,
        unreachable_node_ids,
    };
    tracing::info!(
        starts = report.start_node_ids.len(),
        failures = report.failures.len(),
        expanded = report.expanded_states,
        truncated = report.truncated,
        "narrative simulation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::navigator::RedirectPath;

    fn hop(node: &str, choice: &str, next: &str) -> TraceHop {
        TraceHop {
            node_id: node.to_string(),
            choice_id: choice.to_string(),
            next_node_id: next.to_string(),
        }
    }

    #[test]
    fn failure_keys_are_stable() {
        let dead = NarrativeFailure::from_finding(
            Finding::SoftDeadlock {
                node_id: "maya_workshop".to_string(),
                trace: vec![hop("maya_intro", "follow", "maya_workshop")],
            },
            "maya_intro",
        );
        assert_eq!(dead.key, "soft_deadlock:maya_workshop");
        assert_eq!(dead.kind, FailureKind::SoftDeadlock);

        let dangling = NarrativeFailure::from_finding(
            Finding::DanglingTarget {
                node_id: "a".to_string(),
                choice_id: "go".to_string(),
                target: "gone".to_string(),
                trace: vec![],
            },
            "a",
        );
        assert_eq!(dangling.key, "dangling_target:a:go->gone");
        assert_eq!(dangling.target.as_deref(), Some("gone"));
    }

    #[test]
    fn redirect_failures_name_the_requested_id() {
        let path = RedirectPath {
            requested: "old_intro".to_string(),
            path: vec!["old_intro".to_string(), "older_intro".to_string()],
            hops: 1,
            cycle_detected: true,
            truncated: false,
        };
        let failure = NarrativeFailure::from_finding(
            Finding::RedirectCycle {
                path,
                trace: vec![],
            },
            "samuel_intro",
        );
        assert_eq!(failure.key, "redirect_cycle:old_intro");
        assert_eq!(failure.message, "redirect cycle: old_intro -> older_intro");
        assert_eq!(failure.start_node_id, "samuel_intro");
    }

    #[test]
    fn report_serializes_kind_in_snake_case() {
        let failure = NarrativeFailure::from_finding(
            Finding::EvaluationError {
                node_id: "n".to_string(),
                message: "boom".to_string(),
                trace: vec![],
            },
            "n",
        );
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "evaluation_error");
        assert!(json.get("choice_id").is_none());
    }
}
