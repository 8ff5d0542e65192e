//! Owner of the mutable conversation forest.
//!
//! Every structural change goes through `add_node` or `delete_node`, and
//! each operation leaves the forest consistent before it returns:
//! acyclic parent links, `parent_id`/`children_ids` agreement, no dangling
//! ids, and `root_ids` equal to the set of parentless nodes.

use super::iter::collect_subtree;
use super::{
    AnswerSection, ConversationNode, ConversationTree, DepthFirst, NodeId, NodePatch, Position,
};
use crate::sections::parse_answer_into_sections;
use crate::TreeError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Aggregate numbers over the whole forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub total_nodes: usize,
    pub total_roots: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
}

/// A single violated tree invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Map key differs from the node's own id
    KeyMismatch { key: NodeId, id: NodeId },
    /// `children_ids` entry with no node behind it
    DanglingChild { parent: NodeId, child: NodeId },
    /// `root_ids` entry with no node behind it
    DanglingRoot(NodeId),
    /// Listed as a child of `parent` but its `parent_id` says otherwise
    ParentMismatch { parent: NodeId, child: NodeId },
    /// `parent_id` is set but the parent does not list it
    MissingFromParent { parent: NodeId, child: NodeId },
    /// `parent_id` names a node that does not exist
    UnknownParent { id: NodeId, parent: NodeId },
    /// Parentless node absent from `root_ids`
    MissingRoot(NodeId),
    /// Node in `root_ids` that has a parent
    RootHasParent(NodeId),
    /// Same id listed twice in `root_ids` or one `children_ids`
    DuplicateEntry(NodeId),
    /// Following `parent_id` from this node loops
    Cycle(NodeId),
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::KeyMismatch { key, id } => write!(f, "node {} stored under key {}", id, key),
            IntegrityIssue::DanglingChild { parent, child } => {
                write!(f, "{} lists missing child {}", parent, child)
            }
            IntegrityIssue::DanglingRoot(id) => write!(f, "root list names missing node {}", id),
            IntegrityIssue::ParentMismatch { parent, child } => {
                write!(f, "{} lists {} whose parent is elsewhere", parent, child)
            }
            IntegrityIssue::MissingFromParent { parent, child } => {
                write!(f, "{} is not listed by its parent {}", child, parent)
            }
            IntegrityIssue::UnknownParent { id, parent } => {
                write!(f, "{} references unknown parent {}", id, parent)
            }
            IntegrityIssue::MissingRoot(id) => write!(f, "parentless node {} missing from roots", id),
            IntegrityIssue::RootHasParent(id) => write!(f, "root {} has a parent", id),
            IntegrityIssue::DuplicateEntry(id) => write!(f, "{} listed more than once", id),
            IntegrityIssue::Cycle(id) => write!(f, "parent chain of {} loops", id),
        }
    }
}

/// Exclusive owner of a `ConversationTree`.
#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    tree: ConversationTree,
}

impl TreeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an existing tree after checking its invariants.
    pub fn from_tree(tree: ConversationTree) -> Result<Self, TreeError> {
        let mut store = Self::new();
        store.replace_tree(tree)?;
        Ok(store)
    }

    /// Read-only view of the forest.
    pub fn tree(&self) -> &ConversationTree {
        &self.tree
    }

    pub fn into_tree(self) -> ConversationTree {
        self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn root_ids(&self) -> &[NodeId] {
        &self.tree.root_ids
    }

    /// Root nodes in creation order.
    pub fn roots(&self) -> Vec<&ConversationNode> {
        self.tree
            .root_ids
            .iter()
            .filter_map(|id| self.tree.get(id))
            .collect()
    }

    /// Insert a node as a new root or as the last child of its parent.
    pub fn add_node(&mut self, node: ConversationNode) -> Result<(), TreeError> {
        if self.tree.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateId(node.id));
        }
        if !node.children_ids.is_empty() {
            return Err(TreeError::Validation(format!(
                "new node {} must not carry children",
                node.id
            )));
        }

        match &node.parent_id {
            Some(parent_id) => {
                let Some(parent) = self.tree.nodes.get_mut(parent_id) else {
                    return Err(TreeError::UnknownParent {
                        id: node.id,
                        parent_id: parent_id.clone(),
                    });
                };
                parent.children_ids.push(node.id.clone());
            }
            None => self.tree.root_ids.push(node.id.clone()),
        }

        debug!(id = %node.id, parent = ?node.parent_id, "Node added");
        self.tree.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Shallow-merge `patch` into the stored node and bump `updated_at`.
    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> Result<(), TreeError> {
        let Some(node) = self.tree.nodes.get_mut(id) else {
            warn!(id = %id, "Update for unknown node ignored");
            return Err(TreeError::NotFound(id.to_string()));
        };

        if patch.apply(node) {
            node.metadata.updated_at = Utc::now();
            debug!(id = %id, "Node updated");
        }
        Ok(())
    }

    /// Remove a node together with its whole subtree.
    ///
    /// Returns the removed ids, `id` first, in depth-first order.
    pub fn delete_node(&mut self, id: &str) -> Result<Vec<NodeId>, TreeError> {
        let Some(node) = self.tree.nodes.get(id) else {
            warn!(id = %id, "Delete for unknown node ignored");
            return Err(TreeError::NotFound(id.to_string()));
        };
        let parent_id = node.parent_id.clone();

        let removed = collect_subtree(&self.tree, id);
        for removed_id in &removed {
            self.tree.nodes.remove(removed_id);
        }

        match parent_id.and_then(|p| self.tree.nodes.get_mut(&p)) {
            Some(parent) => parent.children_ids.retain(|c| c != id),
            None => self.tree.root_ids.retain(|r| r != id),
        }

        info!(id = %id, removed = removed.len(), "Subtree deleted");
        Ok(removed)
    }

    /// Flip the collapsed flag. Returns the new value.
    pub fn toggle_collapse(&mut self, id: &str) -> Result<bool, TreeError> {
        let node = self
            .tree
            .nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
        node.is_collapsed = !node.is_collapsed;
        Ok(node.is_collapsed)
    }

    /// O(1) lookup.
    pub fn get_node(&self, id: &str) -> Option<&ConversationNode> {
        self.tree.get(id)
    }

    /// Ancestors of `id` from the root down, ending with `id` itself.
    ///
    /// A looping parent chain is cut where the loop closes and logged.
    /// Unknown ids give an empty chain.
    pub fn get_node_chain(&self, id: &str) -> Vec<&ConversationNode> {
        let (chain, cycle_at) = self.walk_chain(id);
        if let Some(cycle_at) = cycle_at {
            warn!(id = %id, cycle_at = %cycle_at, "Cycle in parent chain, chain truncated");
        }
        chain
    }

    /// Like `get_node_chain`, but a loop is reported as `TreeError::Cycle`.
    pub fn node_chain_checked(&self, id: &str) -> Result<Vec<&ConversationNode>, TreeError> {
        if !self.tree.nodes.contains_key(id) {
            return Err(TreeError::NotFound(id.to_string()));
        }
        match self.walk_chain(id) {
            (chain, None) => Ok(chain),
            (_, Some(cycle_at)) => Err(TreeError::Cycle(cycle_at)),
        }
    }

    fn walk_chain(&self, id: &str) -> (Vec<&ConversationNode>, Option<NodeId>) {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.tree.get(id);
        let mut cycle_at = None;

        while let Some(node) = current {
            if !visited.insert(node.id.as_str()) {
                cycle_at = Some(node.id.clone());
                break;
            }
            chain.push(node);
            current = node.parent_id.as_deref().and_then(|p| self.tree.get(p));
        }

        chain.reverse();
        (chain, cycle_at)
    }

    /// Next sequential label under `parent_id`.
    ///
    /// Roots are `Q1`, `Q2`, ...; children extend their parent's label
    /// (`Q1.1`, `Q1.2`, `Q1.2.1`). The index is one past the larger of the
    /// sibling count and the highest index already in use, so labels stay
    /// unique after deletes. An unknown parent falls back to a forest-wide
    /// count.
    pub fn generate_node_name(&self, parent_id: Option<&str>) -> String {
        let roots = self.roots();
        match parent_id {
            None => {
                let n = next_index(roots.iter().map(|n| n.name.as_str()), "Q", roots.len());
                format!("Q{}", n)
            }
            Some(parent_id) => match self.tree.get(parent_id) {
                Some(parent) => {
                    let label = if parent.name.is_empty() {
                        format!("Q{}", self.tree.len())
                    } else {
                        parent.name.clone()
                    };
                    let prefix = format!("{}.", label);
                    let children = self.tree.children(parent_id);
                    let names = children.iter().map(|n| n.name.as_str());
                    let k = next_index(names, &prefix, children.len());
                    format!("{}{}", prefix, k)
                }
                None => {
                    let names = self.tree.nodes.values().map(|n| n.name.as_str());
                    format!("Q{}", next_index(names, "Q", self.tree.len()))
                }
            },
        }
    }

    /// Drop every node.
    pub fn clear_all(&mut self) {
        let count = self.tree.len();
        self.tree.nodes.clear();
        self.tree.root_ids.clear();
        info!(removed = count, "Tree cleared");
    }

    /// Direct children in stored order.
    pub fn children(&self, id: &str) -> Vec<&ConversationNode> {
        self.tree.children(id)
    }

    /// Every node below `id`, depth-first, excluding `id`.
    pub fn descendants(&self, id: &str) -> Vec<NodeId> {
        let mut subtree = collect_subtree(&self.tree, id);
        if !subtree.is_empty() {
            subtree.remove(0);
        }
        subtree
    }

    /// Depth-first walk in export order.
    pub fn iter_depth_first(&self) -> DepthFirst<'_> {
        self.tree.iter_depth_first()
    }

    /// Cached answer sections, or a fresh parse when none are cached.
    pub fn sections_for(&self, id: &str) -> Option<Vec<AnswerSection>> {
        let node = self.tree.get(id)?;
        Some(match &node.answer_sections {
            Some(sections) => sections.clone(),
            None => parse_answer_into_sections(&node.answer),
        })
    }

    /// Bookmarked nodes in depth-first order.
    pub fn bookmarked(&self) -> Vec<&ConversationNode> {
        self.iter_depth_first()
            .map(|(_, node)| node)
            .filter(|node| node.is_bookmarked)
            .collect()
    }

    /// Case-insensitive substring match over name, question, answer and tags.
    pub fn search(&self, query: &str) -> Vec<&ConversationNode> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.iter_depth_first()
            .map(|(_, node)| node)
            .filter(|node| {
                node.name.to_lowercase().contains(&needle)
                    || node.question.to_lowercase().contains(&needle)
                    || node.answer.to_lowercase().contains(&needle)
                    || node.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn stats(&self) -> TreeStats {
        compute_stats(&self.tree)
    }

    /// Write back computed positions. Returns how many nodes were moved.
    pub fn apply_positions(&mut self, positions: &HashMap<NodeId, Position>) -> usize {
        let mut applied = 0;
        for (id, position) in positions {
            if let Some(node) = self.tree.nodes.get_mut(id) {
                node.position = *position;
                applied += 1;
            }
        }
        applied
    }

    /// Swap in a whole tree. On any invariant violation the current tree is kept.
    pub fn replace_tree(&mut self, tree: ConversationTree) -> Result<(), TreeError> {
        let issues = check_tree_integrity(&tree);
        if let Some(first) = issues.first() {
            warn!(issues = issues.len(), first = %first, "Rejected tree replacement");
            return Err(TreeError::Validation(format!(
                "tree violates {} invariant(s), first: {}",
                issues.len(),
                first
            )));
        }
        info!(nodes = tree.len(), roots = tree.root_ids.len(), "Tree replaced");
        self.tree = tree;
        Ok(())
    }

    /// Every violated invariant; empty for a healthy forest.
    pub fn check_integrity(&self) -> Vec<IntegrityIssue> {
        check_tree_integrity(&self.tree)
    }
}

fn next_index<'a>(names: impl Iterator<Item = &'a str>, prefix: &str, count: usize) -> usize {
    names
        .filter_map(|name| name.strip_prefix(prefix)?.parse::<usize>().ok())
        .fold(count, usize::max)
        + 1
}

pub(crate) fn compute_stats(tree: &ConversationTree) -> TreeStats {
    TreeStats {
        total_nodes: tree.nodes.len(),
        total_roots: tree.root_ids.len(),
        total_cost: tree.nodes.values().filter_map(|n| n.cost).sum(),
        total_tokens: tree.nodes.values().filter_map(|n| n.tokens).sum(),
    }
}

/// Check the four forest invariants over a raw tree.
pub fn check_tree_integrity(tree: &ConversationTree) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();

    let mut seen_roots = HashSet::new();
    for root_id in &tree.root_ids {
        if !seen_roots.insert(root_id.as_str()) {
            issues.push(IntegrityIssue::DuplicateEntry(root_id.clone()));
        }
        match tree.nodes.get(root_id) {
            None => issues.push(IntegrityIssue::DanglingRoot(root_id.clone())),
            Some(node) if node.parent_id.is_some() => {
                issues.push(IntegrityIssue::RootHasParent(root_id.clone()))
            }
            Some(_) => {}
        }
    }

    let mut ids: Vec<&NodeId> = tree.nodes.keys().collect();
    ids.sort();

    for key in ids {
        let node = &tree.nodes[key];
        if &node.id != key {
            issues.push(IntegrityIssue::KeyMismatch {
                key: key.clone(),
                id: node.id.clone(),
            });
        }

        let mut seen_children = HashSet::new();
        for child_id in &node.children_ids {
            if !seen_children.insert(child_id.as_str()) {
                issues.push(IntegrityIssue::DuplicateEntry(child_id.clone()));
            }
            match tree.nodes.get(child_id) {
                None => issues.push(IntegrityIssue::DanglingChild {
                    parent: key.clone(),
                    child: child_id.clone(),
                }),
                Some(child) if child.parent_id.as_deref() != Some(key.as_str()) => {
                    issues.push(IntegrityIssue::ParentMismatch {
                        parent: key.clone(),
                        child: child_id.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        match &node.parent_id {
            None => {
                if !seen_roots.contains(key.as_str()) {
                    issues.push(IntegrityIssue::MissingRoot(key.clone()));
                }
            }
            Some(parent_id) => match tree.nodes.get(parent_id) {
                None => issues.push(IntegrityIssue::UnknownParent {
                    id: key.clone(),
                    parent: parent_id.clone(),
                }),
                Some(parent) if !parent.children_ids.iter().any(|c| c == key) => {
                    issues.push(IntegrityIssue::MissingFromParent {
                        parent: parent_id.clone(),
                        child: key.clone(),
                    })
                }
                Some(_) => {}
            },
        }
    }

    issues.extend(find_cycles(tree).into_iter().map(IntegrityIssue::Cycle));
    issues
}

/// Ids whose parent chain never reaches a root, sorted.
pub(crate) fn find_cycles(tree: &ConversationTree) -> Vec<NodeId> {
    let mut reaches_root: HashSet<&str> = HashSet::new();
    let mut looping: HashSet<&str> = HashSet::new();

    for start in tree.nodes.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut current = Some(start.as_str());
        let mut loops = false;

        while let Some(id) = current {
            if reaches_root.contains(id) {
                break;
            }
            if looping.contains(id) || !on_path.insert(id) {
                loops = true;
                break;
            }
            path.push(id);
            current = tree
                .nodes
                .get(id)
                .and_then(|n| n.parent_id.as_deref())
                .filter(|p| tree.nodes.contains_key(*p));
        }

        if loops {
            looping.extend(path);
        } else {
            reaches_root.extend(path);
        }
    }

    let mut cycles: Vec<NodeId> = looping.into_iter().map(str::to_string).collect();
    cycles.sort();
    cycles
}
