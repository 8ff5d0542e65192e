//! Error types for context derivation.

use forkchat_tree::TreeError;
use thiserror::Error;

/// Errors that can occur while preparing context.
#[derive(Error, Debug)]
pub enum ContextError {
    /// Node not found in tree
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Tree error, e.g. a looping parent chain
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

pub type Result<T> = std::result::Result<T, ContextError>;
