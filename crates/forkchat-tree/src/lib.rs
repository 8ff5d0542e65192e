//! # forkchat-tree
//!
//! Branching conversation tree engine.
//!
//! This crate provides:
//! - The conversation forest model and its consistent mutation API
//! - Answer section parsing for follow-ups on a single passage
//! - Tidy auto layout for canvas positions
//! - Versioned session documents and their on-disk storage

mod error;
pub mod layout;
pub mod sections;
pub mod storage;
pub mod tree;

pub use error::TreeError;
pub use layout::{apply_auto_layout, compute_layout, LayoutOptions, LayoutReport};
pub use sections::parse_answer_into_sections;
pub use storage::codec::{deserialize, serialize, serialize_session};
pub use storage::{
    SessionDocument, SessionInfo, SessionStorage, SessionSummary, StorageOptions,
    SESSION_FORMAT_VERSION,
};
pub use tree::{
    AnswerSection, ConversationNode, ConversationTree, NodeId, NodePatch, NodeType, Position,
    TreeStats, TreeStore,
};
