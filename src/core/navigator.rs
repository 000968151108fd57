/// Node resolution: redirect following and cross-graph lookup.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::schema::graph::{DialogueGraph, DialogueNode, GraphError, NodeIndex};

/// Default bound on redirect hops before resolution gives up.
pub const DEFAULT_MAX_REDIRECT_HOPS: usize = 8;

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("node not found in any graph: {0}")]
    NodeNotFound(String),
    #[error("node '{node}' is declared by both graph '{first}' and graph '{second}'")]
    DuplicateNode {
        node: String,
        first: String,
        second: String,
    },
    #[error("graph '{0}' is registered twice")]
    DuplicateGraph(String),
}

/// Position of a node across the whole registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef {
    pub graph: usize,
    pub node: NodeIndex,
}

/// Old node id → replacement id, kept so stale save states still resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedirectTable(BTreeMap<String, String>);

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.0.insert(from.into(), to.into());
    }

    pub fn target(&self, from: &str) -> Option<&str> {
        self.0.get(from).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Follow redirects from `node_id` for at most `max_hops` hops.
    pub fn follow(&self, node_id: &str, max_hops: usize) -> RedirectPath {
        let mut path = vec![node_id.to_string()];
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        seen.insert(node_id);
        let mut current = node_id;
        let mut cycle_detected = false;
        let mut truncated = false;

        while let Some(next) = self.target(current) {
            if seen.contains(next) {
                cycle_detected = true;
                tracing::warn!(
                    requested = node_id,
                    at = current,
                    back_to = next,
                    "redirect cycle detected"
                );
                break;
            }
            if path.len() > max_hops {
                truncated = true;
                tracing::warn!(requested = node_id, max_hops, "redirect chain truncated");
                break;
            }
            tracing::debug!(from = current, to = next, "following redirect");
            seen.insert(next);
            path.push(next.to_string());
            current = next;
        }

        RedirectPath {
            requested: node_id.to_string(),
            hops: path.len() - 1,
            path,
            cycle_detected,
            truncated,
        }
    }
}

/// The redirect chain taken while resolving a node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPath {
    pub requested: String,
    /// Every id visited, starting with `requested`.
    pub path: Vec<String>,
    pub hops: usize,
    pub cycle_detected: bool,
    pub truncated: bool,
}

impl RedirectPath {
    /// The id resolution landed on.
    pub fn resolved_id(&self) -> &str {
        self.path.last().map_or(self.requested.as_str(), String::as_str)
    }

    pub fn was_redirected(&self) -> bool {
        self.hops > 0
    }

    pub fn is_clean(&self) -> bool {
        !self.cycle_detected && !self.truncated
    }
}

/// A node located in the registry.
#[derive(Debug, Clone)]
pub struct ResolvedNode<'a> {
    pub graph: &'a DialogueGraph,
    pub node: &'a DialogueNode,
    pub node_ref: NodeRef,
    pub redirect_path: RedirectPath,
    /// Set when the requested node was missing and the fallback was used.
    pub degraded: bool,
}

impl ResolvedNode<'_> {
    /// True when reaching this node leaves `from` (e.g. returning to a hub).
    pub fn is_cross_graph(&self, from: &DialogueGraph) -> bool {
        self.graph.id() != from.id()
    }
}

/// All loaded graphs plus the redirect table layered over them.
#[derive(Debug, Clone)]
pub struct GraphRegistry {
    graphs: Vec<DialogueGraph>,
    locator: FxHashMap<String, NodeRef>,
    redirects: RedirectTable,
    max_redirect_hops: usize,
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self {
            graphs: Vec::new(),
            locator: FxHashMap::default(),
            redirects: RedirectTable::new(),
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
        }
    }

    /// Add a graph. Node ids must be unique across the whole registry.
    pub fn register(&mut self, graph: DialogueGraph) -> Result<(), NavigationError> {
        if self.graphs.iter().any(|g| g.id() == graph.id()) {
            return Err(NavigationError::DuplicateGraph(graph.id().to_string()));
        }
        let graph_index = self.graphs.len();
        for node in graph.nodes() {
            if let Some(existing) = self.locator.get(&node.id) {
                return Err(NavigationError::DuplicateNode {
                    node: node.id.clone(),
                    first: self.graphs[existing.graph].id().to_string(),
                    second: graph.id().to_string(),
                });
            }
        }
        for (i, node) in graph.nodes().iter().enumerate() {
            self.locator.insert(
                node.id.clone(),
                NodeRef {
                    graph: graph_index,
                    node: NodeIndex(i as u32),
                },
            );
        }
        self.graphs.push(graph);
        Ok(())
    }

    /// Load every `.ron` graph file in a directory (recursively).
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), crate::core::engine::EngineError> {
        let mut paths = Vec::new();
        collect_ron_files(dir, &mut paths)?;
        paths.sort();
        for path in paths {
            let graph = DialogueGraph::load_from_ron(&path).map_err(|e| match e {
                GraphError::Ron(err) => crate::core::engine::EngineError::RonFile {
                    path: path.display().to_string(),
                    source: err,
                },
                other => other.into(),
            })?;
            tracing::debug!(graph = graph.id(), nodes = graph.len(), path = %path.display(), "loaded graph");
            self.register(graph)?;
        }
        Ok(())
    }

    pub fn set_redirects(&mut self, redirects: RedirectTable) {
        self.redirects = redirects;
    }

    pub fn set_max_redirect_hops(&mut self, max_hops: usize) {
        self.max_redirect_hops = max_hops;
    }

    pub fn redirects(&self) -> &RedirectTable {
        &self.redirects
    }

    pub fn graphs(&self) -> &[DialogueGraph] {
        &self.graphs
    }

    pub fn graph(&self, id: &str) -> Option<&DialogueGraph> {
        self.graphs.iter().find(|g| g.id() == id)
    }

    pub fn graph_at(&self, index: usize) -> &DialogueGraph {
        &self.graphs[index]
    }

    pub fn node_at(&self, node_ref: NodeRef) -> &DialogueNode {
        self.graphs[node_ref.graph].node(node_ref.node)
    }

    /// Direct lookup without redirects.
    pub fn locate(&self, node_id: &str) -> Option<NodeRef> {
        self.locator.get(node_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.locator.len()
    }

    /// Resolve a node id through the redirect table to a concrete node.
    pub fn resolve(&self, node_id: &str) -> Result<ResolvedNode<'_>, NavigationError> {
        let redirect_path = self.redirects.follow(node_id, self.max_redirect_hops);
        let node_ref = self
            .locate(redirect_path.resolved_id())
            .ok_or_else(|| NavigationError::NodeNotFound(redirect_path.resolved_id().to_string()))?;
        Ok(ResolvedNode {
            graph: &self.graphs[node_ref.graph],
            node: self.node_at(node_ref),
            node_ref,
            redirect_path,
            degraded: false,
        })
    }

    /// Resolve `node_id`, falling back to `fallback_id` when it is missing.
    pub fn resolve_or(
        &self,
        node_id: &str,
        fallback_id: &str,
    ) -> Result<ResolvedNode<'_>, NavigationError> {
        match self.resolve(node_id) {
            Err(NavigationError::NodeNotFound(missing)) => {
                tracing::warn!(requested = node_id, missing = %missing, fallback = fallback_id, "falling back to default node");
                let mut resolved = self.resolve(fallback_id)?;
                resolved.degraded = true;
                Ok(resolved)
            }
            other => other,
        }
    }
}

fn collect_ron_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_ron_files(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            out.push(path);
        }
    }
    Ok(())
}
