//! Error types for sequence-lowering
//!
//! This module defines all error types used throughout the crate.
//!
//! Rewrites follow a "decline the match" policy: any precondition failure
//! makes a pass leave the graph untouched. Only internal errors (a pass
//! reaching a state its own pattern should have excluded) are surfaced to the
//! caller; see [`TransformError::is_internal`].

use thiserror::Error;

use crate::graph::NodeId;

/// Main error type for graph transformation operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Pattern matching failed
    #[error("Pattern matching failed: {0}")]
    PatternNotMatched(String),

    /// Invalid node configuration
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Node lookup failed
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Shape inference failed
    #[error("Shape inference failed: {0}")]
    ShapeInferenceFailed(String),

    /// Invalid tensor data type
    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    /// A matched recurrent cell is none of LSTM, RNN or GRU
    #[error("Unsupported sequence type: {0}")]
    UnsupportedCell(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransformError {
    /// Whether this error reports a bug in a pass rather than unsupported input.
    ///
    /// Internal errors abort the pipeline; every other error only declines
    /// the current match.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TransformError::UnsupportedCell(_) | TransformError::Internal(_)
        )
    }
}

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransformError::PatternNotMatched("TensorIterator body".to_string());
        assert!(err.to_string().contains("TensorIterator body"));

        let err = TransformError::NodeNotFound(NodeId(7));
        assert_eq!(err.to_string(), "Node not found: #7");
    }

    #[test]
    fn test_internal_classification() {
        assert!(TransformError::UnsupportedCell("Add".into()).is_internal());
        assert!(TransformError::Internal("bug".into()).is_internal());
        assert!(!TransformError::ShapeInferenceFailed("rank".into()).is_internal());
        assert!(!TransformError::InvalidNode("x".into()).is_internal());
    }
}
