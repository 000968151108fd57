/// Reachability simulation: which nodes can a player actually get to?

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::navigator::GraphRegistry;
use crate::core::simulation::{
    explore, Finding, RelevanceIndex, SimulationContext, SimulationError, SimulationLimits,
    TruncationCause, DEFAULT_MAX_STATES, DEFAULT_MAX_STEPS, DEFAULT_MAX_UNIQUE_STATES_PER_NODE,
};
use crate::schema::state::GameState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityOptions {
    pub start_node_id: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_states")]
    pub max_states: usize,
    #[serde(default = "default_max_unique_states_per_node")]
    pub max_unique_states_per_node: usize,
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_max_states() -> usize {
    DEFAULT_MAX_STATES
}

fn default_max_unique_states_per_node() -> usize {
    DEFAULT_MAX_UNIQUE_STATES_PER_NODE
}

impl ReachabilityOptions {
    pub fn new(start_node_id: impl Into<String>) -> Self {
        let limits = SimulationLimits::default();
        Self {
            start_node_id: start_node_id.into(),
            max_steps: limits.max_steps,
            max_states: limits.max_states,
            max_unique_states_per_node: limits.max_unique_states_per_node,
        }
    }

    pub fn with_limits(mut self, limits: SimulationLimits) -> Self {
        self.max_steps = limits.max_steps;
        self.max_states = limits.max_states;
        self.max_unique_states_per_node = limits.max_unique_states_per_node;
        self
    }

    pub fn limits(&self) -> SimulationLimits {
        SimulationLimits {
            max_steps: self.max_steps,
            max_states: self.max_states,
            max_unique_states_per_node: self.max_unique_states_per_node,
        }
    }
}

/// A choice whose target no graph declares.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DanglingTarget {
    pub node_id: String,
    pub choice_id: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityReport {
    pub start_node_id: String,
    pub visited_node_ids: BTreeSet<String>,
    pub expanded_states: usize,
    pub admitted_states: usize,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationCause>,
    #[serde(default)]
    pub capped_node_ids: BTreeSet<String>,
    #[serde(default)]
    pub dangling_targets: BTreeSet<DanglingTarget>,
}

impl ReachabilityReport {
    pub fn reached(&self, node_id: &str) -> bool {
        self.visited_node_ids.contains(node_id)
    }

    /// Registered nodes never visited, in registry order.
    ///
    /// When the run was truncated this over-reports.
    pub fn unreachable_nodes(&self, registry: &GraphRegistry) -> Vec<String> {
        registry
            .graphs()
            .iter()
            .flat_map(|g| g.nodes())
            .filter(|n| !self.visited_node_ids.contains(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }
}

pub fn simulate_reachability(
    ctx: &SimulationContext<'_>,
    initial_state: &GameState,
    options: &ReachabilityOptions,
) -> Result<ReachabilityReport, SimulationError> {
    let index = RelevanceIndex::build(ctx.registry, ctx.combos);
    let exploration = explore(
        ctx,
        initial_state,
        &options.start_node_id,
        options.limits(),
        &index,
    )?;

    let dangling_targets = exploration
        .findings
        .iter()
        .filter_map(|f| match f {
            Finding::DanglingTarget {
                node_id,
                choice_id,
                target,
                ..
            } => Some(DanglingTarget {
                node_id: node_id.clone(),
                choice_id: choice_id.clone(),
                target: target.clone(),
            }),
            _ => None,
        })
        .collect();

    let report = ReachabilityReport {
        start_node_id: options.start_node_id.clone(),
        truncated: exploration.truncated(),
        truncation: exploration.truncation,
        visited_node_ids: exploration.visited,
        expanded_states: exploration.expanded_states,
        admitted_states: exploration.admitted_states,
        capped_node_ids: exploration.capped_nodes,
        dangling_targets,
    };
    tracing::info!(
        start = %report.start_node_id,
        visited = report.visited_node_ids.len(),
        expanded = report.expanded_states,
        truncated = report.truncated,
        "reachability simulation complete"
    );
    Ok(report)
}
