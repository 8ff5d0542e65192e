//! Depth-first traversal over the conversation forest.

use super::{ConversationNode, ConversationTree, NodeId};
use std::collections::HashSet;
use tracing::warn;

/// Pre-order walk: each root in `root_ids` order, children in stored order.
///
/// Yields `(depth, node)` with roots at depth 0. An id reached twice is
/// skipped, so a corrupted tree cannot make the walk loop.
pub struct DepthFirst<'a> {
    tree: &'a ConversationTree,
    stack: Vec<(&'a str, usize)>,
    visited: HashSet<&'a str>,
}

impl<'a> DepthFirst<'a> {
    pub(super) fn new(tree: &'a ConversationTree) -> Self {
        // Push roots in reverse for left-to-right traversal
        let stack = tree.root_ids.iter().rev().map(|id| (id.as_str(), 0)).collect();
        Self {
            tree,
            stack,
            visited: HashSet::new(),
        }
    }
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = (usize, &'a ConversationNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current_id, depth)) = self.stack.pop() {
            let Some(node) = self.tree.nodes.get(current_id) else {
                continue;
            };
            if !self.visited.insert(current_id) {
                warn!(id = %current_id, "Node reached twice during traversal, skipping");
                continue;
            }
            for child in node.children_ids.iter().rev() {
                self.stack.push((child.as_str(), depth + 1));
            }
            return Some((depth, node));
        }
        None
    }
}

/// Collect `id` and every node below it, depth-first.
pub(super) fn collect_subtree(tree: &ConversationTree, id: &str) -> Vec<NodeId> {
    let mut collected = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![id];

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let Some(node) = tree.nodes.get(current) else {
            continue;
        };
        collected.push(node.id.clone());
        for child in node.children_ids.iter().rev() {
            stack.push(child.as_str());
        }
    }

    collected
}
