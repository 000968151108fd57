/// Dialogue graph model: nodes, choices, and the per-graph node arena.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::character::CharacterId;
use super::condition::Condition;
use super::patterns::Pattern;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph '{graph}' declares node '{node}' more than once")]
    DuplicateNode { graph: String, node: String },
    #[error("graph '{graph}' start node '{node}' does not exist")]
    MissingStart { graph: String, node: String },
    #[error("node '{0}' has no content variations")]
    EmptyContent(String),
    #[error("node '{node}' declares choice '{choice}' more than once")]
    DuplicateChoice { node: String, choice: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Position of a node inside its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub u32);

/// One way a node's text can be displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVariation {
    pub variation_id: String,
    pub text: String,
    #[serde(default)]
    pub emotion: Option<String>,
    /// Display-only gates; the first variation whose gates hold is shown.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The minimum orb fill a choice needs before it is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrbFillRequirement {
    pub pattern: Pattern,
    /// Percentage in `0..=100`.
    pub threshold: u32,
}

/// State changes authored on a choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    /// Character affected; defaults to the conversation owner.
    #[serde(default)]
    pub character: Option<CharacterId>,
    #[serde(default)]
    pub trust_change: i32,
    #[serde(default)]
    pub add_knowledge_flags: Vec<String>,
    #[serde(default)]
    pub add_global_flags: Vec<String>,
    /// Explicit reaction line, overriding the character's echo pool.
    #[serde(default)]
    pub echo: Option<String>,
}

/// A player response leading to another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub choice_id: String,
    pub text: String,
    pub next_node_id: String,
    #[serde(default)]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub required_orb_fill: Option<OrbFillRequirement>,
    #[serde(default)]
    pub consequence: Option<Consequence>,
}

impl Choice {
    /// A plain, ungated choice.
    pub fn new(
        choice_id: impl Into<String>,
        text: impl Into<String>,
        next_node_id: impl Into<String>,
    ) -> Self {
        Self {
            choice_id: choice_id.into(),
            text: text.into(),
            next_node_id: next_node_id.into(),
            pattern: None,
            skills: Vec::new(),
            conditions: Vec::new(),
            required_orb_fill: None,
            consequence: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_orb_fill(mut self, pattern: Pattern, threshold: u32) -> Self {
        self.required_orb_fill = Some(OrbFillRequirement { pattern, threshold });
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_consequence(mut self, consequence: Consequence) -> Self {
        self.consequence = Some(consequence);
        self
    }
}

/// A single step of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueNode {
    pub id: String,
    pub speaker: String,
    pub content: Vec<ContentVariation>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Authored endings are allowed to have no way forward.
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DialogueNode {
    /// A node with a single plain content variation.
    pub fn new(id: impl Into<String>, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            content: vec![ContentVariation {
                variation_id: format!("{}_default", id),
                text: text.into(),
                emotion: None,
                conditions: Vec::new(),
            }],
            id,
            speaker: speaker.into(),
            choices: Vec::new(),
            terminal: false,
            tags: Vec::new(),
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn choice(&self, choice_id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.choice_id == choice_id)
    }
}

// On-disk shape: nodes as a plain list. The arena index is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawGraph {
    id: String,
    character_id: CharacterId,
    start_node_id: String,
    nodes: Vec<DialogueNode>,
}

/// An immutable conversation graph owned by one character (or a location).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGraph", into = "RawGraph")]
pub struct DialogueGraph {
    id: String,
    character_id: CharacterId,
    start_node_id: String,
    nodes: Vec<DialogueNode>,
    index: FxHashMap<String, NodeIndex>,
}

impl TryFrom<RawGraph> for DialogueGraph {
    type Error = GraphError;

    fn try_from(raw: RawGraph) -> Result<Self, Self::Error> {
        DialogueGraph::new(raw.id, raw.character_id, raw.start_node_id, raw.nodes)
    }
}

impl From<DialogueGraph> for RawGraph {
    fn from(graph: DialogueGraph) -> Self {
        RawGraph {
            id: graph.id,
            character_id: graph.character_id,
            start_node_id: graph.start_node_id,
            nodes: graph.nodes,
        }
    }
}

impl DialogueGraph {
    /// Build a graph, checking node uniqueness, content, and the start node.
    pub fn new(
        id: impl Into<String>,
        character_id: CharacterId,
        start_node_id: impl Into<String>,
        nodes: Vec<DialogueNode>,
    ) -> Result<Self, GraphError> {
        let id = id.into();
        let start_node_id = start_node_id.into();
        let mut index = FxHashMap::default();

        for (i, node) in nodes.iter().enumerate() {
            if node.content.is_empty() {
                return Err(GraphError::EmptyContent(node.id.clone()));
            }
            let mut seen_choices = rustc_hash::FxHashSet::default();
            for choice in &node.choices {
                if !seen_choices.insert(choice.choice_id.as_str()) {
                    return Err(GraphError::DuplicateChoice {
                        node: node.id.clone(),
                        choice: choice.choice_id.clone(),
                    });
                }
            }
            if index.insert(node.id.clone(), NodeIndex(i as u32)).is_some() {
                return Err(GraphError::DuplicateNode {
                    graph: id,
                    node: node.id.clone(),
                });
            }
        }

        if !index.contains_key(&start_node_id) {
            return Err(GraphError::MissingStart {
                graph: id,
                node: start_node_id,
            });
        }

        Ok(Self {
            id,
            character_id,
            start_node_id,
            nodes,
            index,
        })
    }

    /// Load a graph from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<Self, GraphError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a graph from a RON string.
    pub fn parse_ron(input: &str) -> Result<Self, GraphError> {
        let raw: RawGraph = ron::from_str(input)?;
        Self::try_from(raw)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn character_id(&self) -> &CharacterId {
        &self.character_id
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn index_of(&self, node_id: &str) -> Option<NodeIndex> {
        self.index.get(node_id).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &DialogueNode {
        &self.nodes[index.0 as usize]
    }

    pub fn get(&self, node_id: &str) -> Option<&DialogueNode> {
        self.index_of(node_id).map(|i| self.node(i))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    pub fn nodes(&self) -> &[DialogueNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
