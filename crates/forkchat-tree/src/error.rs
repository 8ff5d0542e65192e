//! Tree engine error types.

use crate::tree::NodeId;
use thiserror::Error;

/// Errors that can occur during tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Node rejected on insert for a structural reason
    #[error("Validation error: {0}")]
    Validation(String),

    /// Insert with an id that already exists
    #[error("Duplicate node id: {0}")]
    DuplicateId(NodeId),

    /// Insert referencing a parent that is not in the tree
    #[error("Node {id} references unknown parent {parent_id}")]
    UnknownParent { id: NodeId, parent_id: NodeId },

    /// Operation on an id that is not in the tree
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    /// No stored session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session document failed the version or shape check
    #[error("Schema error: {0}")]
    Schema(String),

    /// A parent chain loops back on itself
    #[error("Corrupted tree: cycle detected at node {0}")]
    Cycle(NodeId),

    /// Layout traversal had to break a cycle or skip unreachable nodes
    #[error("Layout error: {0}")]
    Layout(String),

    /// I/O error during session storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while writing a document
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TreeError {
    /// Whether this error belongs to the insert validation class.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TreeError::Validation(_) | TreeError::DuplicateId(_) | TreeError::UnknownParent { .. }
        )
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(e: serde_json::Error) -> Self {
        TreeError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TreeError::NotFound("n42".to_string());
        assert!(err.to_string().contains("n42"));

        let err = TreeError::UnknownParent {
            id: "child".to_string(),
            parent_id: "ghost".to_string(),
        };
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validation_class() {
        assert!(TreeError::DuplicateId("a".to_string()).is_validation());
        assert!(TreeError::Validation("bad".to_string()).is_validation());
        assert!(!TreeError::NotFound("a".to_string()).is_validation());
        assert!(!TreeError::Schema("bad".to_string()).is_validation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TreeError = io_err.into();
        assert!(matches!(err, TreeError::Io(_)));
    }
}
