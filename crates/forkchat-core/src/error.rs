//! Core error types for forkchat.

use forkchat_context::ContextError;
use forkchat_tree::TreeError;
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// No stored session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Tree store, codec or storage error
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Context derivation error
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
