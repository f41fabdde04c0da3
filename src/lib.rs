//! # Sequence Lowering
//!
//! Graph rewrites that lower loop-shaped recurrent subgraphs into dedicated
//! sequence operators.
//!
//! A `TensorIterator` or `Loop` whose body applies one recurrent cell per
//! time step is recognised and replaced by an `LSTMSequence`,
//! `RNNSequence` or `GRUSequence` with the same attributes. Follow-up
//! passes fold `ReverseSequence` pairs into the sequence direction and fuse
//! forward/reverse pairs into one bidirectional sequence.
//!
//! ## Features
//!
//! - **Graph IR**: typed ops, partial shapes and sub-graph descriptions
//! - **Pattern Matching**: label-based templates with backtracking
//! - **Staged Rewrites**: nothing touches the graph until a match commits
//!
//! ## Example
//!
//! ```
//! use sequence_lowering::prelude::*;
//!
//! let mut ctx = GraphContext::new();
//! let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 3]));
//! ctx.add_result(x).unwrap();
//!
//! let result = ConvertTensorIteratorToSequence::new().transform(&mut ctx).unwrap();
//! assert!(!result.changed());
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod graph;
pub mod opset;
pub mod pattern;
pub mod tensor;
pub mod traits;
pub mod transform;
pub mod transformers;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use sequence_lowering::prelude::*`
pub mod prelude {
    pub use crate::error::{GraphResult, TransformError};
    pub use crate::graph::{GraphContext, Node, NodeId, Output};
    pub use crate::opset::{CellAttrs, Direction, Op, OpType, SequenceAttrs};
    pub use crate::pattern::{MatchResult, Pattern, PatternMatcher};
    pub use crate::tensor::{ElementType, PartialShape, TensorData};
    pub use crate::transform::{TransformConfig, TransformEngine};
    pub use crate::transformers::{ConvertTensorIteratorToSequence, GraphTransformer, TransformResult};
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{GraphResult, TransformError};
pub use traits::Transformer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
