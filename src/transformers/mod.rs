//! Recurrent lowering transformers
//!
//! This module provides the passes that lower recurrent control flow to
//! sequence ops:
//!
//! - **Lifting**: `TensorIterator` and `Loop` bodies running one recurrent
//!   cell become `LSTMSequence`, `RNNSequence` or `GRUSequence`
//! - **Elimination**: gathers that read a whole axis through `Range`
//! - **Fusion**: reversal pairs fold into the sequence direction, and a
//!   forward/reverse pair becomes one bidirectional sequence
//!
//! # Overview
//!
//! Each transformer implements the [`GraphTransformer`] trait and can be
//! applied individually. [`ConvertTensorIteratorToSequence`] runs all of
//! them in dependency order.
//!
//! # Example
//!
//! ```
//! use sequence_lowering::graph::GraphContext;
//! use sequence_lowering::transformers::{ConvertTensorIteratorToSequence, GraphTransformer};
//!
//! let mut ctx = GraphContext::new();
//! let result = ConvertTensorIteratorToSequence::new().transform(&mut ctx).unwrap();
//! assert!(!result.changed());
//! ```

/// Common utilities and types
pub mod common;
/// Loop to LSTMSequence
pub mod convert_loop_to_lstm;
/// TensorIterator to LSTM/RNN/GRU sequences
pub mod convert_ti_to_sequences;
/// Gather with Range elimination
pub mod eliminate_gather_with_range;
/// Bidirectional LSTM fusion
pub mod fuse_bidirectional_lstm;
/// Reverse LSTM fusion
pub mod fuse_reverse_lstm;

// Re-export common types
pub use common::{run_transformers, GraphTransformer, TransformResult};

pub use convert_loop_to_lstm::ConvertLoopToLstmSequence;
pub use convert_ti_to_sequences::{
    CellKind, ConvertTensorIteratorToGruSequence, ConvertTensorIteratorToLstmSequence,
    ConvertTensorIteratorToRnnSequence,
};
pub use eliminate_gather_with_range::EliminateGatherWithRange;
pub use fuse_bidirectional_lstm::FuseLstmSequencesToBidirectional;
pub use fuse_reverse_lstm::FuseReverseLstmSequence;

use crate::error::GraphResult;
use crate::graph::GraphContext;
use crate::traits::Transformer;
use crate::transform::TransformConfig;

/// Runs every recurrent lowering pass in order
///
/// The lifters come first so that the fusers see canonical sequence ops,
/// and the gather eliminator runs before the fusers so that their
/// `data -> Transpose -> sequence` edges are direct.
#[derive(Debug, Default)]
pub struct ConvertTensorIteratorToSequence {
    config: TransformConfig,
}

impl ConvertTensorIteratorToSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl GraphTransformer for ConvertTensorIteratorToSequence {
    fn name(&self) -> &'static str {
        "ConvertTensorIteratorToSequence"
    }

    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
        let config = &self.config;
        run_transformers(
            ctx,
            &[
                &ConvertTensorIteratorToLstmSequence::with_config(config.clone()),
                &ConvertTensorIteratorToRnnSequence::with_config(config.clone()),
                &ConvertTensorIteratorToGruSequence::with_config(config.clone()),
                &ConvertLoopToLstmSequence::with_config(config.clone()),
                &EliminateGatherWithRange::with_config(config.clone()),
                &FuseReverseLstmSequence::with_config(config.clone()),
                &FuseLstmSequencesToBidirectional::with_config(config.clone()),
            ],
        )
    }
}

impl Transformer for ConvertTensorIteratorToSequence {
    fn transform(&self, mut graph: GraphContext) -> GraphResult<GraphContext> {
        GraphTransformer::transform(self, &mut graph)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::{Op, OpType};
    use crate::tensor::{ElementType, PartialShape, TensorData};

    fn plain_graph() -> GraphContext {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 3]));
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let t = ctx.add_node(Op::Transpose, &[x, order]).unwrap();
        ctx.add_result(t.out(0)).unwrap();
        ctx
    }

    #[test]
    fn test_aggregator_leaves_plain_graph() {
        let mut ctx = plain_graph();
        let before = ctx.clone();
        let pass = ConvertTensorIteratorToSequence::new();
        let result = GraphTransformer::transform(&pass, &mut ctx).unwrap();
        assert!(!result.changed());
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_aggregator_as_model_transformer() {
        let graph = plain_graph();
        let out = Transformer::transform(&ConvertTensorIteratorToSequence::new(), graph).unwrap();
        assert_eq!(out.find_nodes_by_type(OpType::Transpose).len(), 1);
    }
}
