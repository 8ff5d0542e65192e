//! Integration tests for context derivation over a branching tree.

use forkchat_context::{build_prompt, prepare_question, ContextBuilder, ContextError};
use forkchat_tree::{AnswerSection, ConversationNode, NodePatch, TreeStore};

/// root -> (left, right), left -> deep
fn branching_store() -> TreeStore {
    let mut store = TreeStore::new();
    store
        .add_node(
            ConversationNode::new("root")
                .with_question("What is React?")
                .with_answer("React is a JavaScript library."),
        )
        .unwrap();
    store
        .add_node(
            ConversationNode::new("left")
                .with_parent("root")
                .with_question("What are hooks?")
                .with_answer("Functions for state.\n\n1. useState\n2. useEffect"),
        )
        .unwrap();
    store
        .add_node(
            ConversationNode::new("right")
                .with_parent("root")
                .with_question("What is JSX?")
                .with_answer("Markup in JavaScript."),
        )
        .unwrap();
    store
        .add_node(
            ConversationNode::new("deep")
                .with_parent("left")
                .with_selected_section(1)
                .with_question("Tell me about useState")
                .with_answer("It stores local state."),
        )
        .unwrap();
    store
}

#[test]
fn test_context_for_root_node() {
    let store = branching_store();
    let root = store.get_node("root").unwrap();
    let chain = store.get_node_chain("root");

    let context = ContextBuilder::new().build_context(root, &chain, None);

    assert!(context.contains("Q: What is React?"));
    assert!(context.contains("A: React is a JavaScript library."));
}

#[test]
fn test_sibling_branches_do_not_leak() {
    let store = branching_store();
    let deep = store.get_node("deep").unwrap();
    let chain = store.get_node_chain("deep");

    let context = ContextBuilder::new().build_context(deep, &chain, None);

    assert!(context.contains("What are hooks?"));
    assert!(context.contains("Tell me about useState"));
    assert!(!context.contains("What is JSX?"));

    let root_at = context.find("What is React?").unwrap();
    let left_at = context.find("What are hooks?").unwrap();
    let deep_at = context.find("Tell me about useState").unwrap();
    assert!(root_at < left_at && left_at < deep_at);
}

#[test]
fn test_cached_sections_take_precedence() {
    let mut store = TreeStore::new();
    store
        .add_node(
            ConversationNode::new("n")
                .with_question("Q")
                .with_answer("Full original answer text"),
        )
        .unwrap();
    store
        .update_node(
            "n",
            NodePatch::new().sections(vec![
                AnswerSection {
                    id: "a".to_string(),
                    text: "Section 1".to_string(),
                    index: 0,
                },
                AnswerSection {
                    id: "b".to_string(),
                    text: "Section 2".to_string(),
                    index: 1,
                },
            ]),
        )
        .unwrap();

    let n = store.get_node("n").unwrap();
    let context = ContextBuilder::new().build_context(n, &[n], Some(1));

    assert!(context.contains("A (selected section): Section 2"));
    assert!(!context.contains("Full original answer text"));
}

#[test]
fn test_all_excluded_gives_empty_prompt_wrapper() {
    let mut store = branching_store();
    for id in ["root", "left", "deep"] {
        store
            .update_node(id, NodePatch::new().include_in_context(Some(false)))
            .unwrap();
    }

    let deep = store.get_node("deep").unwrap();
    let chain = store.get_node_chain("deep");
    let context = ContextBuilder::new().build_context(deep, &chain, None);

    assert_eq!(context, "");
    assert_eq!(build_prompt("Next?", &context), "Next?");
}

#[test]
fn test_prepare_follow_up_on_list_item() {
    let store = branching_store();

    let prepared = prepare_question(
        &store,
        &ContextBuilder::new(),
        Some("left"),
        Some(2),
        "And useEffect?",
    )
    .unwrap();

    assert!(prepared.context.contains("Q: What is React?"));
    assert!(prepared
        .context
        .ends_with("Q: What are hooks?\nA (selected section): 2. useEffect"));
    assert!(prepared
        .prompt
        .starts_with("Context from previous conversation:\n"));

    let value = serde_json::to_value(&prepared).unwrap();
    assert_eq!(value["parentId"], "left");
    assert_eq!(value["selectedSectionIndex"], 2);
}

#[test]
fn test_prepare_respects_budget() {
    let store = branching_store();
    let builder = ContextBuilder::with_max_chars(60);

    let prepared = prepare_question(&store, &builder, Some("deep"), None, "More?").unwrap();

    assert!(prepared.context.contains("Tell me about useState"));
    assert!(!prepared.context.contains("What is React?"));
}

#[test]
fn test_prepare_unknown_parent() {
    let store = branching_store();
    let err = prepare_question(&store, &ContextBuilder::new(), Some("nope"), None, "?").unwrap_err();
    assert!(matches!(err, ContextError::NodeNotFound(ref id) if id == "nope"));
}
