//! Versioned session documents.
//!
//! A document carries the node list, the root list and aggregate stats.
//! Decoding never trusts the stored structure: children lists are
//! reconciled with `parentId`, roots are recomputed, and any id clash,
//! unknown parent or parent loop rejects the whole document.

use crate::tree::{
    compute_stats, find_cycles, ConversationNode, ConversationTree, NodeId, TreeStats,
};
use crate::TreeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Format tag written into and required from every document.
pub const SESSION_FORMAT_VERSION: &str = "1.0";

/// Identity and timestamps of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
    /// New session identity with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Node list and root ids as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeDocument {
    pub nodes: Vec<ConversationNode>,
    #[serde(default)]
    pub root_ids: Vec<NodeId>,
}

/// The portable session envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub session: SessionInfo,
    pub tree: TreeDocument,
    #[serde(default)]
    pub stats: TreeStats,
}

/// Encode a tree, deriving session timestamps from the nodes.
///
/// `createdAt` is the earliest node creation and `updatedAt` the latest
/// node update; an empty tree uses the current time for both.
pub fn serialize(tree: &ConversationTree, session_name: &str, session_id: &str) -> SessionDocument {
    let now = Utc::now();
    let created_at = tree
        .nodes
        .values()
        .map(|n| n.metadata.created_at)
        .min()
        .unwrap_or(now);
    let updated_at = tree
        .nodes
        .values()
        .map(|n| n.metadata.updated_at)
        .max()
        .unwrap_or(now);

    let info = SessionInfo {
        id: session_id.to_string(),
        name: session_name.to_string(),
        created_at,
        updated_at,
    };
    serialize_session(tree, &info)
}

/// Encode a tree under an explicit session identity.
pub fn serialize_session(tree: &ConversationTree, info: &SessionInfo) -> SessionDocument {
    let mut nodes: Vec<ConversationNode> = tree
        .iter_depth_first()
        .map(|(_, node)| node.clone())
        .collect();

    // Nodes no root reaches still go out, after the walk, in id order
    if nodes.len() < tree.nodes.len() {
        let written: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut rest: Vec<&ConversationNode> = tree
            .nodes
            .values()
            .filter(|n| !written.contains(n.id.as_str()))
            .collect();
        rest.sort_by(|a, b| a.id.cmp(&b.id));
        let rest: Vec<ConversationNode> = rest.into_iter().cloned().collect();
        nodes.extend(rest);
    }

    debug!(session = %info.id, nodes = nodes.len(), "Session serialized");

    SessionDocument {
        version: SESSION_FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        session: info.clone(),
        tree: TreeDocument {
            nodes,
            root_ids: tree.root_ids.clone(),
        },
        stats: compute_stats(tree),
    }
}

/// Check version and shape, then decode the envelope.
pub fn decode_document(value: Value) -> Result<SessionDocument, TreeError> {
    let Some(envelope) = value.as_object() else {
        return Err(TreeError::Schema("document is not an object".to_string()));
    };

    match envelope.get("version").and_then(Value::as_str) {
        Some(version) => ensure_version(version)?,
        None => return Err(TreeError::Schema("missing version".to_string())),
    }

    let nodes = envelope.get("tree").and_then(|t| t.get("nodes"));
    if !nodes.map(Value::is_array).unwrap_or(false) {
        return Err(TreeError::Schema("tree.nodes must be an array".to_string()));
    }

    serde_json::from_value(value).map_err(|e| TreeError::Schema(e.to_string()))
}

/// Reject a typed document written in another format version.
pub fn check_version(document: &SessionDocument) -> Result<(), TreeError> {
    ensure_version(&document.version)
}

fn ensure_version(version: &str) -> Result<(), TreeError> {
    if version == SESSION_FORMAT_VERSION {
        return Ok(());
    }
    Err(TreeError::Schema(format!(
        "unsupported version {} (expected {})",
        version, SESSION_FORMAT_VERSION
    )))
}

/// Decode a document into a tree that satisfies every forest invariant.
pub fn deserialize(value: Value) -> Result<ConversationTree, TreeError> {
    let document = decode_document(value)?;
    rebuild_tree(document.tree)
}

/// Rebuild the id map, children lists and roots from a stored node list.
pub fn rebuild_tree(document: TreeDocument) -> Result<ConversationTree, TreeError> {
    let mut order: Vec<NodeId> = Vec::with_capacity(document.nodes.len());
    let mut nodes: HashMap<NodeId, ConversationNode> = HashMap::with_capacity(document.nodes.len());

    for node in document.nodes {
        if nodes.contains_key(&node.id) {
            return Err(TreeError::Schema(format!("duplicate node id {}", node.id)));
        }
        order.push(node.id.clone());
        nodes.insert(node.id.clone(), node);
    }

    // Children each parent should have, in document order
    let mut expected: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for id in &order {
        if let Some(parent_id) = &nodes[id].parent_id {
            if !nodes.contains_key(parent_id) {
                return Err(TreeError::Schema(format!(
                    "node {} references unknown parent {}",
                    id, parent_id
                )));
            }
            expected.entry(parent_id.clone()).or_default().push(id.clone());
        }
    }

    for (id, node) in nodes.iter_mut() {
        let wanted = expected.remove(id).unwrap_or_default();
        let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut children: Vec<NodeId> = Vec::with_capacity(wanted.len());
        for child in &node.children_ids {
            if wanted_set.contains(child.as_str()) && seen.insert(child.clone()) {
                children.push(child.clone());
            }
        }
        for child in &wanted {
            if seen.insert(child.clone()) {
                children.push(child.clone());
            }
        }
        node.children_ids = children;
    }

    let mut seen_roots: HashSet<NodeId> = HashSet::new();
    let mut root_ids: Vec<NodeId> = Vec::new();
    let stored_then_document = document.root_ids.iter().chain(order.iter());
    for id in stored_then_document {
        let is_root = nodes.get(id).map(|n| n.parent_id.is_none()).unwrap_or(false);
        if is_root && seen_roots.insert(id.clone()) {
            root_ids.push(id.clone());
        }
    }

    let tree = ConversationTree { nodes, root_ids };

    let cycles = find_cycles(&tree);
    if !cycles.is_empty() {
        return Err(TreeError::Schema(format!(
            "parent chain loops through {}",
            cycles.join(", ")
        )));
    }

    Ok(tree)
}

/// Pretty JSON text of a document.
pub fn to_json(document: &SessionDocument) -> Result<String, TreeError> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// Parse JSON text into a checked document.
pub fn from_json(text: &str) -> Result<SessionDocument, TreeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| TreeError::Schema(e.to_string()))?;
    decode_document(value)
}
