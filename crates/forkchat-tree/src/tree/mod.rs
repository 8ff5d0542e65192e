//! Conversation tree data model.
//!
//! A forest of question/answer turns. Nodes are owned by the id-keyed map;
//! `parent_id` and `children_ids` are lookup keys used for traversal only.

mod iter;
mod patch;
mod store;

pub use iter::DepthFirst;
pub use patch::NodePatch;
pub use store::{check_tree_integrity, IntegrityIssue, TreeStats, TreeStore};
pub(crate) use store::{compute_stats, find_cycles};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Unique identifier for a conversation node.
pub type NodeId = String;

/// Generate a fresh node id.
pub fn new_node_id() -> NodeId {
    uuid::Uuid::new_v4().to_string()
}

/// The complete conversation forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTree {
    /// All nodes in the tree, keyed by ID
    pub nodes: HashMap<NodeId, ConversationNode>,

    /// Ids of parentless nodes, in creation order
    pub root_ids: Vec<NodeId>,
}

impl ConversationTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a node by ID.
    pub fn get(&self, id: &str) -> Option<&ConversationNode> {
        self.nodes.get(id)
    }

    /// Number of nodes in the forest.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the forest has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get children of a node, in stored order.
    pub fn children(&self, id: &str) -> Vec<&ConversationNode> {
        self.get(id)
            .map(|n| {
                n.children_ids
                    .iter()
                    .filter_map(|child_id| self.get(child_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Depth-first walk from every root in order, children in stored order.
    pub fn iter_depth_first(&self) -> DepthFirst<'_> {
        DepthFirst::new(self)
    }

    /// Render the forest as an indented outline, one node per line.
    pub fn to_outline(&self) -> String {
        let mut output = String::new();
        let mut visited = HashSet::new();
        let root_count = self.root_ids.len();

        for (i, root_id) in self.root_ids.iter().enumerate() {
            self.render_outline_node(&mut output, root_id, "", i == root_count - 1, true, &mut visited);
        }

        output
    }

    fn render_outline_node(
        &self,
        output: &mut String,
        node_id: &str,
        prefix: &str,
        is_last: bool,
        is_root: bool,
        visited: &mut HashSet<NodeId>,
    ) {
        let Some(node) = self.get(node_id) else {
            return;
        };
        if !visited.insert(node.id.clone()) {
            return;
        }

        let marker = match (node.is_bookmarked, node.is_collapsed) {
            (true, true) => " ★ [+]",
            (true, false) => " ★",
            (false, true) => " [+]",
            (false, false) => "",
        };
        let question = first_line(&node.question, 60);

        if is_root {
            output.push_str(&format!("{} [{}] {}{}\n", node.name, node.node_type, question, marker));
        } else {
            let connector = if is_last { "└── " } else { "├── " };
            output.push_str(&format!(
                "{}{}{} [{}] {}{}\n",
                prefix, connector, node.name, node.node_type, question, marker
            ));
        }

        if node.is_collapsed {
            return;
        }

        let child_count = node.children_ids.len();
        for (i, child_id) in node.children_ids.iter().enumerate() {
            let new_prefix = if is_root {
                String::new()
            } else {
                format!("{}{}   ", prefix, if is_last { " " } else { "│" })
            };
            self.render_outline_node(output, child_id, &new_prefix, i == child_count - 1, false, visited);
        }
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}

/// Kind of conversation turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Question,
    Answer,
    Decision,
    Summary,
    Reference,
    Action,
    Image,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Question => "question",
            NodeType::Answer => "answer",
            NodeType::Decision => "decision",
            NodeType::Summary => "summary",
            NodeType::Reference => "reference",
            NodeType::Action => "action",
            NodeType::Image => "image",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "question" => Ok(NodeType::Question),
            "answer" => Ok(NodeType::Answer),
            "decision" => Ok(NodeType::Decision),
            "summary" => Ok(NodeType::Summary),
            "reference" => Ok(NodeType::Reference),
            "action" => Ok(NodeType::Action),
            "image" => Ok(NodeType::Image),
            other => Err(format!("unknown node type: {}", other)),
        }
    }
}

/// Canvas coordinates of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A contiguous, trimmed slice of an answer, in parse order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSection {
    pub id: String,
    pub text: String,
    pub index: usize,
}

/// Value in a free-form parameter bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Record(BTreeMap<String, ParamValue>),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(v: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(v)
    }
}

/// Creation/update bookkeeping and generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Provider round-trip time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,

    /// Temperature, max tokens, and similar knobs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParamValue>,
}

impl NodeMetadata {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            processing_time_ms: None,
            parameters: BTreeMap::new(),
        }
    }
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self::now()
    }
}

/// Generated-image payload carried by `image` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    /// Image URLs, in generation order
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParamValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<ImageEdit>,
}

/// One edit pass over a generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEdit {
    pub prompt: String,
    pub urls: Vec<String>,
    pub edited_at: DateTime<Utc>,
}

/// File attached to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One turn in the conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationNode {
    pub id: NodeId,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub node_type: NodeType,

    #[serde(default)]
    pub question: String,

    #[serde(default)]
    pub answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<ImageData>,

    /// Cached parse of `answer`; derived on demand when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_sections: Option<Vec<AnswerSection>>,

    /// Parent node ID (None for roots)
    #[serde(default)]
    pub parent_id: Option<NodeId>,

    /// Direct children, insertion order
    #[serde(default)]
    pub children_ids: Vec<NodeId>,

    /// Absent means include
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_in_context: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_section_index_from_parent: Option<usize>,

    #[serde(default)]
    pub is_bookmarked: bool,

    #[serde(default)]
    pub is_collapsed: bool,

    #[serde(default)]
    pub position: Position,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default)]
    pub metadata: NodeMetadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ConversationNode {
    /// Create a node with the given id and everything else defaulted.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            node_type: NodeType::default(),
            question: String::new(),
            answer: String::new(),
            image_data: None,
            answer_sections: None,
            parent_id: None,
            children_ids: Vec::new(),
            include_in_context: None,
            selected_section_index_from_parent: None,
            is_bookmarked: false,
            is_collapsed: false,
            position: Position::default(),
            model: None,
            provider: None,
            tokens: None,
            cost: None,
            metadata: NodeMetadata::now(),
            attachments: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Create a node with a freshly generated id.
    pub fn generated() -> Self {
        Self::new(new_node_id())
    }

    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_sections(mut self, sections: Vec<AnswerSection>) -> Self {
        self.answer_sections = Some(sections);
        self
    }

    pub fn with_include_in_context(mut self, include: bool) -> Self {
        self.include_in_context = Some(include);
        self
    }

    pub fn with_selected_section(mut self, index: usize) -> Self {
        self.selected_section_index_from_parent = Some(index);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self.provider = Some(provider.into());
        self
    }

    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens = Some(tokens);
        self.cost = Some(cost);
        self
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.node_type = NodeType::Image;
        self.image_data = Some(image);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Check if this node is a root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Check if this node carries generated images.
    pub fn is_image(&self) -> bool {
        self.node_type == NodeType::Image
    }

    /// Context inclusion with the tri-state flag resolved (absent = include).
    pub fn includes_in_context(&self) -> bool {
        self.include_in_context != Some(false)
    }
}
