//! Tidy hierarchical layout for the conversation canvas.
//!
//! Leaves take consecutive horizontal slots in traversal order, so sibling
//! subtrees never share an x-range; every parent is centred over its first
//! and last child. Rows are spaced by depth. The result depends only on the
//! tree shape and stored child order, never on previous positions.

use crate::tree::{ConversationTree, NodeId, Position, TreeStore};
use crate::TreeError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Spacing knobs for the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutOptions {
    /// Horizontal distance between adjacent leaf slots
    #[serde(default = "default_node_width")]
    pub node_width: f64,

    /// Vertical distance between depth levels
    #[serde(default = "default_row_height")]
    pub row_height: f64,

    /// Empty slots left between consecutive root trees
    #[serde(default = "default_root_gap")]
    pub root_gap: usize,
}

fn default_node_width() -> f64 {
    320.0
}

fn default_row_height() -> f64 {
    220.0
}

fn default_root_gap() -> usize {
    1
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            node_width: default_node_width(),
            row_height: default_row_height(),
            root_gap: default_root_gap(),
        }
    }
}

/// Outcome of a layout pass.
#[derive(Debug, Clone, Default)]
pub struct LayoutReport {
    /// Computed position for every node reachable from a root
    pub positions: HashMap<NodeId, Position>,

    /// Child links that pointed back at an already placed node
    pub cycles: Vec<NodeId>,

    /// Nodes no root leads to
    pub unreached: Vec<NodeId>,

    /// Deepest level placed (roots are 0)
    pub max_depth: usize,
}

impl LayoutReport {
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.unreached.is_empty()
    }

    /// Turn guard trips into a `TreeError::Layout`.
    pub fn check(&self) -> Result<(), TreeError> {
        if self.is_clean() {
            return Ok(());
        }
        Err(TreeError::Layout(format!(
            "{} cyclic link(s) broken, {} node(s) unreachable from any root",
            self.cycles.len(),
            self.unreached.len()
        )))
    }
}

/// Compute positions for every node without touching the tree.
pub fn compute_layout(tree: &ConversationTree, options: &LayoutOptions) -> LayoutReport {
    let mut report = LayoutReport::default();

    // Pass 1: breadth-first depths and the spanning children of each node
    let mut depths: HashMap<&str, usize> = HashMap::new();
    let mut spanning: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&str> = Vec::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    for root_id in &tree.root_ids {
        if tree.nodes.contains_key(root_id) && !depths.contains_key(root_id.as_str()) {
            depths.insert(root_id, 0);
            roots.push(root_id);
            queue.push_back(root_id);
        }
    }

    while let Some(id) = queue.pop_front() {
        let depth = depths[id];
        report.max_depth = report.max_depth.max(depth);
        let Some(node) = tree.nodes.get(id) else {
            continue;
        };
        for child_id in &node.children_ids {
            if !tree.nodes.contains_key(child_id) {
                continue;
            }
            if depths.contains_key(child_id.as_str()) {
                report.cycles.push(child_id.clone());
                continue;
            }
            depths.insert(child_id, depth + 1);
            spanning.entry(id).or_default().push(child_id);
            queue.push_back(child_id);
        }
    }

    // Pass 2: post-order slot assignment, roots left to right
    let mut slots: HashMap<&str, f64> = HashMap::new();
    let mut next_slot = 0.0_f64;

    for (i, root) in roots.iter().enumerate() {
        if i > 0 {
            next_slot += options.root_gap as f64;
        }

        let mut stack: Vec<(&str, bool)> = vec![(*root, false)];
        while let Some((id, expanded)) = stack.pop() {
            let children = spanning.get(id).map(Vec::as_slice).unwrap_or(&[]);
            if !expanded {
                stack.push((id, true));
                for child in children.iter().rev() {
                    stack.push((*child, false));
                }
                continue;
            }

            let slot = match (children.first(), children.last()) {
                (Some(first), Some(last)) => (slots[first] + slots[last]) / 2.0,
                _ => {
                    let slot = next_slot;
                    next_slot += 1.0;
                    slot
                }
            };
            slots.insert(id, slot);
        }
    }

    for (id, slot) in &slots {
        let depth = depths[id] as f64;
        report.positions.insert(
            id.to_string(),
            Position::new(slot * options.node_width, depth * options.row_height),
        );
    }

    let placed: HashSet<&str> = slots.keys().copied().collect();
    report.unreached = tree
        .nodes
        .keys()
        .filter(|id| !placed.contains(id.as_str()))
        .cloned()
        .collect();
    report.unreached.sort();

    report
}

/// Lay out the store's tree and write the positions back.
pub fn apply_auto_layout(store: &mut TreeStore, options: &LayoutOptions) -> LayoutReport {
    let report = compute_layout(store.tree(), options);

    if !report.is_clean() {
        warn!(
            cycles = ?report.cycles,
            unreached = ?report.unreached,
            "Layout skipped corrupted links"
        );
    }

    let applied = store.apply_positions(&report.positions);
    debug!(nodes = applied, depth = report.max_depth, "Auto layout applied");

    report
}
