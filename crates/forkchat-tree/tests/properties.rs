//! Property tests: random edit sequences never break the forest.

use forkchat_tree::storage::codec;
use forkchat_tree::tree::check_tree_integrity;
use forkchat_tree::{
    compute_layout, parse_answer_into_sections, ConversationNode, LayoutOptions, NodeId, Position,
    TreeStore,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    /// Add under the picked node, or as a root
    Add { pick: usize, as_root: bool },
    Delete { pick: usize },
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), any::<bool>()).prop_map(|(pick, as_root)| Op::Add { pick, as_root }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn sorted_ids(store: &TreeStore) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = store.tree().nodes.keys().cloned().collect();
    ids.sort();
    ids
}

fn run(ops: &[Op]) -> TreeStore {
    let mut store = TreeStore::new();
    for (step, op) in ops.iter().enumerate() {
        let ids = sorted_ids(&store);
        match op {
            Op::Add { pick, as_root } => {
                let mut node = ConversationNode::new(format!("n{:03}", step));
                if !as_root && !ids.is_empty() {
                    let parent = &ids[pick % ids.len()];
                    node.name = store.generate_node_name(Some(parent.as_str()));
                    node = node.with_parent(parent.clone());
                } else {
                    node.name = store.generate_node_name(None);
                }
                store.add_node(node).unwrap();
            }
            Op::Delete { pick } => {
                if !ids.is_empty() {
                    store.delete_node(&ids[pick % ids.len()]).unwrap();
                }
            }
        }
    }
    store
}

/// Leftmost and rightmost x over the subtree rooted at `id`.
fn x_range(store: &TreeStore, positions: &HashMap<NodeId, Position>, id: &str) -> (f64, f64) {
    let mut lo = positions[id].x;
    let mut hi = lo;
    for d in store.descendants(id) {
        lo = lo.min(positions[&d].x);
        hi = hi.max(positions[&d].x);
    }
    (lo, hi)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn edits_preserve_invariants(ops in prop::collection::vec(arbitrary_op(), 0..40)) {
        let store = run(&ops);

        prop_assert!(check_tree_integrity(store.tree()).is_empty());

        let parentless: HashSet<&str> = store
            .tree()
            .nodes
            .values()
            .filter(|n| n.parent_id.is_none())
            .map(|n| n.id.as_str())
            .collect();
        let roots: HashSet<&str> = store.root_ids().iter().map(String::as_str).collect();
        prop_assert_eq!(parentless, roots);

        for id in sorted_ids(&store) {
            let chain = store.get_node_chain(&id);
            prop_assert!(chain[0].parent_id.is_none());
            prop_assert_eq!(&chain[chain.len() - 1].id, &id);
            for pair in chain.windows(2) {
                prop_assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].id.as_str()));
            }
        }
    }

    #[test]
    fn layout_separates_sibling_subtrees(ops in prop::collection::vec(arbitrary_op(), 0..40)) {
        let store = run(&ops);
        let options = LayoutOptions::default();
        let report = compute_layout(store.tree(), &options);

        prop_assert!(report.is_clean());
        prop_assert_eq!(report.positions.len(), store.len());

        for node in store.tree().nodes.values() {
            let children = &node.children_ids;
            for child in children {
                prop_assert_eq!(
                    report.positions[child].y,
                    report.positions[&node.id].y + options.row_height
                );
            }
            if let (Some(first), Some(last)) = (children.first(), children.last()) {
                let x = report.positions[&node.id].x;
                prop_assert!(report.positions[first].x <= x && x <= report.positions[last].x);
            }
            for pair in children.windows(2) {
                let (_, left_hi) = x_range(&store, &report.positions, &pair[0]);
                let (right_lo, _) = x_range(&store, &report.positions, &pair[1]);
                prop_assert!(left_hi < right_lo);
            }
        }

        let again = compute_layout(store.tree(), &options);
        prop_assert_eq!(again.positions, report.positions);
    }

    #[test]
    fn codec_round_trips(ops in prop::collection::vec(arbitrary_op(), 0..30)) {
        let store = run(&ops);
        let document = codec::serialize(store.tree(), "prop", "prop-session");
        let value = serde_json::to_value(&document).unwrap();

        let tree = codec::deserialize(value).unwrap();
        prop_assert_eq!(&tree, store.tree());
    }

    #[test]
    fn sections_are_trimmed_and_ordered(answer in "[a-z0-9. \n]{0,200}") {
        let sections = parse_answer_into_sections(&answer);
        for (i, section) in sections.iter().enumerate() {
            prop_assert_eq!(section.index, i);
            prop_assert!(!section.text.is_empty());
            prop_assert_eq!(section.text.trim(), section.text.as_str());
            prop_assert!(section.text.lines().all(|line| !line.trim().is_empty()));
        }
    }
}
