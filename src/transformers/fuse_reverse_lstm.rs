//! Reverse LSTM fusion
//!
//! A forward `LSTMSequence` run between two `ReverseSequence` ops is a
//! reverse `LSTMSequence`:
//!
//! ```text
//! data -> [Transpose|Reshape] -> ReverseSequence -> Transpose
//!      -> LSTMSequence(forward) -> Squeeze -> ReverseSequence
//! ```
//!
//! becomes `data -> [Transpose] -> LSTMSequence(reverse) -> Squeeze`.

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::{Direction, Op, OpType, SequenceAttrs};
use crate::pattern::ops::PERMUTE_LIKE;
use crate::pattern::{Label, MatchResult, Pattern, Predicate};
use crate::tensor::normalize_axis;
use crate::transform::{NodeRegistry, TransformConfig, TransformEngine};
use crate::transformers::common::{
    compose_permutations, decline, is_identity, layout_permutation, permutation_data,
    scalar_const_i64, GraphTransformer, TransformResult,
};

struct ReversePattern {
    pattern: Pattern,
    root: Label,
    data: Label,
    first: Label,
    reverse_in: Label,
    second: Label,
    lstm: Label,
    squeeze: Label,
}

impl ReversePattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let data = p.any_input_with(&[Predicate::RankEquals(3)]);
        let first_order = p.constant();
        let first = p.wrap_with(PERMUTE_LIKE, &[data, first_order], &[Predicate::RankEquals(3)]);
        let input = p.or(&[first, data]);
        let lengths_in = p.any_input();
        let reverse_in = p.wrap(&[OpType::ReverseSequence], &[input, lengths_in]);
        let second_order = p.constant();
        let second = p.wrap(&[OpType::Transpose], &[reverse_in, second_order]);

        let mut lstm_inputs = vec![second];
        for _ in 0..6 {
            lstm_inputs.push(p.any_input());
        }
        let lstm = p.wrap_with(
            &[OpType::LstmSequence],
            &lstm_inputs,
            &[Predicate::ConsumersCount(1)],
        );
        let axis = p.constant();
        let squeeze = p.wrap(&[OpType::Squeeze], &[lstm, axis]);
        let lengths_out = p.any_input();
        let root = p.wrap(&[OpType::ReverseSequence], &[squeeze, lengths_out]);

        Self {
            pattern: p,
            root,
            data,
            first,
            reverse_in,
            second,
            lstm,
            squeeze,
        }
    }
}

fn bound(m: &MatchResult, label: Label) -> GraphResult<Output> {
    m.get(label)
        .ok_or_else(|| TransformError::Internal("pattern label left unbound".to_string()))
}

/// `(batch_axis, seq_axis)` of a `ReverseSequence` over a rank 3 value
fn reverse_axes(ctx: &GraphContext, id: NodeId) -> Option<(usize, usize)> {
    match ctx.try_node(id)?.op {
        Op::ReverseSequence {
            batch_axis,
            seq_axis,
        } => Some((normalize_axis(batch_axis, 3).ok()?, normalize_axis(seq_axis, 3).ok()?)),
        _ => None,
    }
}

// Not gated by the transformation callback
fn fuse_reverse(ctx: &mut GraphContext, root: NodeId, p: &ReversePattern) -> GraphResult<bool> {
    let m = match p.pattern.matcher(p.root).match_node(ctx, root) {
        Some(m) => m,
        None => return Ok(false),
    };

    let lstm = bound(&m, p.lstm)?;
    let lstm_node = ctx.node(lstm.node)?;
    let attrs = match lstm_node.op.sequence_attrs() {
        Some(attrs) if attrs.direction == Direction::Forward => attrs.cell.clone(),
        _ => return decline("sequence is not forward"),
    };

    let squeeze = bound(&m, p.squeeze)?;
    let squeeze_node = ctx.node(squeeze.node)?;
    let squeeze_axes = squeeze_node.input(1);
    if lstm.index != 0 || squeeze_axes.and_then(|a| scalar_const_i64(ctx, a)) != Some(1) {
        return decline("squeeze must drop the direction axis of Y");
    }

    let second = bound(&m, p.second)?;
    let second_perm = match layout_permutation(ctx, second.node) {
        Some(perm) => perm,
        None => return decline("second transpose is not a permutation"),
    };

    // The outer reversal works on [batch, seq, hidden]; the inner one on
    // the value the second transpose brings into [batch, seq, input]
    let reverse_in = bound(&m, p.reverse_in)?;
    if reverse_axes(ctx, root) != Some((0, 1))
        || reverse_axes(ctx, reverse_in.node) != Some((second_perm[0], second_perm[1]))
    {
        return decline("reversals disagree on batch and sequence axes");
    }

    let permutation = if m.contains(p.first) {
        match layout_permutation(ctx, bound(&m, p.first)?.node) {
            Some(first) => compose_permutations(&first, &second_perm),
            None => return decline("input reshape is not a pure permutation"),
        }
    } else {
        second_perm
    };

    let lstm_inputs: Vec<Output> = lstm_node.inputs.iter().skip(1).copied().collect();
    let root_name = ctx.node(root)?.friendly_name.clone();
    let data = bound(&m, p.data)?;

    let mut reg = NodeRegistry::new(ctx);
    let x = if is_identity(&permutation) {
        data
    } else {
        let order = reg.constant(permutation_data(&permutation));
        reg.make(ctx, Op::Transpose, &[data, order])?.out(0)
    };

    let mut inputs = vec![x];
    inputs.extend(lstm_inputs);
    let reversed = reg.make(
        ctx,
        Op::LstmSequence(SequenceAttrs::new(attrs, Direction::Reverse)),
        &inputs,
    )?;
    let axes = match squeeze_axes {
        Some(a) => a,
        None => return decline("squeeze has no axes"),
    };
    let new_squeeze = reg.make(ctx, Op::Squeeze, &[reversed.out(0), axes])?;
    reg.set_friendly_name(new_squeeze, root_name)?;

    let shape_users: Vec<NodeId> = ctx
        .consumers(second)
        .iter()
        .map(|c| c.node)
        .filter(|&id| ctx.try_node(id).is_some_and(|n| n.is_type(OpType::ShapeOf)))
        .collect();
    let new_shape = if shape_users.is_empty() {
        None
    } else {
        Some(reg.make(ctx, Op::ShapeOf, &[x])?)
    };

    let mut provenance = vec![reverse_in.node, second.node, lstm.node, squeeze.node, root];
    if m.contains(p.first) {
        provenance.push(bound(&m, p.first)?.node);
    }
    reg.commit(ctx, &provenance)?;

    if let Some(new_shape) = new_shape {
        for shape_of in shape_users {
            ctx.replace_node(shape_of, new_shape)?;
        }
    }
    ctx.replace_node(root, new_squeeze)?;
    Ok(true)
}

/// Folds a `ReverseSequence` pair around a forward LSTM into the sequence's direction
#[derive(Debug, Default)]
pub struct FuseReverseLstmSequence {
    config: TransformConfig,
}

impl FuseReverseLstmSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl GraphTransformer for FuseReverseLstmSequence {
    fn name(&self) -> &'static str {
        "FuseReverseLstmSequence"
    }

    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
        let pattern = ReversePattern::new();
        let mut engine = TransformEngine::new(ctx, &self.config);
        engine.apply(self.name(), &[OpType::ReverseSequence], |ctx, id| {
            fuse_reverse(ctx, id, &pattern)
        })?;
        Ok(engine.into_stats().into())
    }

    fn is_applicable(&self, ctx: &GraphContext) -> bool {
        ctx.nodes().any(|n| n.is_type(OpType::ReverseSequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::CellAttrs;
    use crate::tensor::{ElementType, PartialShape, TensorData};

    const HIDDEN: usize = 4;

    struct Built {
        ctx: GraphContext,
        data: Output,
        lstm: NodeId,
        root: NodeId,
        shape_of: NodeId,
    }

    /// data [5, 2, 3] (time-major) reversed, transposed to batch-major,
    /// run forward, squeezed and reversed back. With `batch_major_data` the
    /// data is [2, 5, 3] and goes through a leading transpose first.
    fn build(direction: Direction, inner_axes: (i64, i64), batch_major_data: bool) -> Built {
        let mut ctx = GraphContext::new();
        let (data, time_major) = if batch_major_data {
            let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 3]));
            let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
            (data, ctx.add_node(Op::Transpose, &[data, order]).unwrap().out(0))
        } else {
            let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[5, 2, 3]));
            (data, data)
        };
        let lengths = ctx.add_constant(TensorData::vec_i32(&[5, 5]));
        let rev_in = ctx
            .add_node(
                Op::ReverseSequence {
                    batch_axis: inner_axes.0,
                    seq_axis: inner_axes.1,
                },
                &[time_major, lengths],
            )
            .unwrap();
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let second = ctx.add_node(Op::Transpose, &[rev_in.out(0), order]).unwrap();
        let shape_of = ctx.add_node(Op::ShapeOf, &[second.out(0)]).unwrap();
        ctx.add_result(shape_of.out(0)).unwrap();

        let h0 = ctx.add_constant(TensorData::zeros_f32(&[2, 1, HIDDEN]));
        let c0 = ctx.add_constant(TensorData::zeros_f32(&[2, 1, HIDDEN]));
        let seq = ctx.add_constant(TensorData::vec_i32(&[5, 5]));
        let w = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, 3]));
        let r = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, HIDDEN]));
        let b = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN]));
        let lstm = ctx
            .add_node(
                Op::LstmSequence(SequenceAttrs::new(CellAttrs::lstm(HIDDEN), direction)),
                &[second.out(0), h0, c0, seq, w, r, b],
            )
            .unwrap();
        let axis = ctx.add_constant(TensorData::vec_i64(&[1]));
        let squeeze = ctx.add_node(Op::Squeeze, &[lstm.out(0), axis]).unwrap();
        let root = ctx
            .add_node(
                Op::ReverseSequence {
                    batch_axis: 0,
                    seq_axis: 1,
                },
                &[squeeze.out(0), seq],
            )
            .unwrap();
        ctx.set_friendly_name(root, "reversed").unwrap();
        ctx.add_result(root.out(0)).unwrap();

        Built {
            ctx,
            data,
            lstm,
            root,
            shape_of,
        }
    }

    #[test]
    fn test_fuse_reverse_pair() {
        let mut b = build(Direction::Forward, (1, 0), false);
        b.ctx.add_runtime_tag(b.lstm, "lstm").unwrap();
        let result = FuseReverseLstmSequence::new().transform(&mut b.ctx).unwrap();
        assert_eq!(result.transforms_applied, 1);
        assert!(b.ctx.find_nodes_by_type(OpType::ReverseSequence).is_empty());
        assert!(!b.ctx.has_node(b.lstm));
        assert!(!b.ctx.has_node(b.root));

        let seqs = b.ctx.find_nodes_by_type(OpType::LstmSequence);
        assert_eq!(seqs.len(), 1);
        let seq = b.ctx.node(seqs[0]).unwrap();
        assert_eq!(seq.op.sequence_attrs().unwrap().direction, Direction::Reverse);

        // data is transposed straight into [batch, seq, input]
        let transpose = b.ctx.producer(seq.input(0).unwrap()).unwrap();
        assert!(transpose.is_type(OpType::Transpose));
        assert_eq!(transpose.input(0), Some(b.data));

        let squeeze = b.ctx.find_by_friendly_name("reversed").unwrap();
        assert!(squeeze.is_type(OpType::Squeeze));
        assert_eq!(
            b.ctx.partial_shape(squeeze.output(0)).unwrap(),
            &PartialShape::from_static(&[2, 5, HIDDEN])
        );

        // shape queries now read the new input
        assert!(!b.ctx.has_node(b.shape_of));
        let shapes = b.ctx.find_nodes_by_type(OpType::ShapeOf);
        assert_eq!(shapes.len(), 1);
        assert_eq!(b.ctx.node(shapes[0]).unwrap().input(0), Some(transpose.output(0)));

        assert!(squeeze.rt_info.contains("lstm"));
        assert!(seq.rt_info.contains("lstm"));
    }

    #[test]
    fn test_leading_transpose_cancels_out() {
        let mut b = build(Direction::Forward, (1, 0), true);
        let result = FuseReverseLstmSequence::new().transform(&mut b.ctx).unwrap();
        assert_eq!(result.transforms_applied, 1);
        assert!(b.ctx.find_nodes_by_type(OpType::Transpose).is_empty());

        let seqs = b.ctx.find_nodes_by_type(OpType::LstmSequence);
        assert_eq!(seqs.len(), 1);
        let seq = b.ctx.node(seqs[0]).unwrap();
        assert_eq!(seq.op.sequence_attrs().unwrap().direction, Direction::Reverse);
        assert_eq!(seq.input(0), Some(b.data));

        let shapes = b.ctx.find_nodes_by_type(OpType::ShapeOf);
        assert_eq!(shapes.len(), 1);
        assert_eq!(b.ctx.node(shapes[0]).unwrap().input(0), Some(b.data));
    }

    #[test]
    fn test_fused_despite_declining_callback() {
        let mut b = build(Direction::Forward, (1, 0), false);
        let config = TransformConfig::default().with_callback(|_| true);
        let result = FuseReverseLstmSequence::with_config(config)
            .transform(&mut b.ctx)
            .unwrap();
        assert_eq!(result.transforms_applied, 1);
        assert!(b.ctx.find_nodes_by_type(OpType::ReverseSequence).is_empty());
    }

    #[test]
    fn test_reverse_direction_declined() {
        let mut b = build(Direction::Reverse, (1, 0), false);
        let before = b.ctx.node_count();
        let result = FuseReverseLstmSequence::new().transform(&mut b.ctx).unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert_eq!(b.ctx.node_count(), before);
    }

    #[test]
    fn test_mismatched_axes_declined() {
        // inner reversal walks the batch axis
        let mut b = build(Direction::Forward, (0, 1), false);
        let result = FuseReverseLstmSequence::new().transform(&mut b.ctx).unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert!(b.ctx.has_node(b.lstm));
    }
}
