//! Bidirectional LSTM fusion
//!
//! A forward and a reverse `LSTMSequence` over the same data, each squeezed
//! and then concatenated along the feature axis, become one bidirectional
//! sequence:
//!
//! ```text
//! data -> [Transpose] -> LSTMSequence(forward) -> Squeeze --+
//!                                                           +-> Concat(axis 2)
//! data -> [Transpose] -> LSTMSequence(reverse) -> Squeeze --+
//! ```
//!
//! becomes `LSTMSequence(bidirectional) -> Transpose(0, 2, 1, 3) -> Reshape(0, 0, -1)`.

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::{Direction, Op, OpType, SequenceAttrs};
use crate::pattern::ops::PERMUTE_LIKE;
use crate::pattern::{has_path, Label, MatchResult, Pattern, Predicate};
use crate::tensor::{normalize_axis, TensorData};
use crate::transform::{NodeRegistry, TransformConfig, TransformEngine};
use crate::transformers::common::{
    decline, layout_permutation, scalar_const_i64, GraphTransformer, TransformResult,
};

/// Labels of one direction's branch
#[derive(Debug, Clone, Copy)]
struct Branch {
    transpose: Label,
    max_len: Label,
    gather: Label,
    const_lengths: Label,
    lstm: Label,
    squeeze: Label,
}

impl Branch {
    fn new(p: &mut Pattern, data: Label, layout: &[OpType]) -> Self {
        let order = p.constant();
        let transpose = p.wrap(layout, &[data, order]);
        let input = p.or(&[transpose, data]);

        let max_len = p.constant();
        let shape = p.wrap(&[OpType::ShapeOf], &[input]);
        let batch_index = p.constant();
        let batch_axis = p.constant();
        let gather = p.wrap(&[OpType::Gather], &[shape, batch_index, batch_axis]);
        let broadcast = p.wrap(&[OpType::Broadcast], &[max_len, gather]);
        let const_lengths = p.constant();
        let lengths = p.or(&[broadcast, const_lengths]);

        let h = p.any_input();
        let c = p.any_input();
        let w = p.any_input();
        let r = p.any_input();
        let b = p.any_input();
        let lstm = p.wrap(&[OpType::LstmSequence], &[input, h, c, lengths, w, r, b]);
        let axis = p.constant();
        let squeeze = p.wrap_with(&[OpType::Squeeze], &[lstm, axis], &[Predicate::RankEquals(3)]);

        Self {
            transpose,
            max_len,
            gather,
            const_lengths,
            lstm,
            squeeze,
        }
    }
}

struct BidirectionalPattern {
    pattern: Pattern,
    root: Label,
    forward: Branch,
    reverse: Branch,
}

impl BidirectionalPattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let data = p.any_input();
        let forward = Branch::new(&mut p, data, &[OpType::Transpose]);
        let reverse = Branch::new(&mut p, data, PERMUTE_LIKE);
        let root = p.wrap(&[OpType::Concat], &[forward.squeeze, reverse.squeeze]);
        Self {
            pattern: p,
            root,
            forward,
            reverse,
        }
    }
}

fn bound(m: &MatchResult, label: Label) -> GraphResult<Output> {
    m.get(label)
        .ok_or_else(|| TransformError::Internal("pattern label left unbound".to_string()))
}

/// Sequence lengths of one branch, as the matched form
#[derive(Debug, PartialEq)]
enum Lengths<'a> {
    Constant(&'a TensorData),
    Broadcast(&'a TensorData),
}

fn branch_lengths<'a>(ctx: &'a GraphContext, m: &MatchResult, branch: &Branch) -> GraphResult<Option<Lengths<'a>>> {
    if m.contains(branch.const_lengths) {
        return Ok(ctx.constant_value(bound(m, branch.const_lengths)?).map(Lengths::Constant));
    }

    // Broadcast(max_len, Gather(ShapeOf(input), 0, 0))
    let gather = ctx.node(bound(m, branch.gather)?.node)?;
    let picks_batch = match (gather.input(1), gather.input(2)) {
        (Some(index), Some(axis)) => {
            scalar_const_i64(ctx, index) == Some(0) && scalar_const_i64(ctx, axis) == Some(0)
        }
        _ => false,
    };
    if !picks_batch {
        return Ok(None);
    }
    Ok(ctx.constant_value(bound(m, branch.max_len)?).map(Lengths::Broadcast))
}

fn fuse_bidirectional(
    ctx: &mut GraphContext,
    root: NodeId,
    p: &BidirectionalPattern,
    config: &TransformConfig,
) -> GraphResult<bool> {
    let m = match p.pattern.matcher(p.root).match_node(ctx, root) {
        Some(m) => m,
        None => return Ok(false),
    };

    let fw = bound(&m, p.forward.lstm)?;
    let rv = bound(&m, p.reverse.lstm)?;
    let fw_node = ctx.node(fw.node)?;
    let rv_node = ctx.node(rv.node)?;
    let attrs = match (fw_node.op.sequence_attrs(), rv_node.op.sequence_attrs()) {
        (Some(f), Some(r)) if f.direction == Direction::Forward && r.direction == Direction::Reverse => {
            if f.cell != r.cell {
                return decline("directions disagree on cell attributes");
            }
            f.cell.clone()
        }
        _ => return decline("expected a forward and a reverse sequence"),
    };

    for branch in [&p.forward, &p.reverse] {
        let lstm = bound(&m, branch.lstm)?;
        let squeeze = ctx.node(bound(&m, branch.squeeze)?.node)?;
        let axis = squeeze.input(1).and_then(|a| scalar_const_i64(ctx, a));
        if lstm.index != 0 || axis != Some(1) {
            return decline("squeeze must drop the direction axis of Y");
        }
    }
    let concat_axis = match ctx.node(root)?.op {
        Op::Concat { axis } => normalize_axis(axis, 3).ok(),
        _ => None,
    };
    if concat_axis != Some(2) {
        return decline("concat must join the feature axis");
    }

    match (m.contains(p.forward.transpose), m.contains(p.reverse.transpose)) {
        (false, false) => {}
        (true, true) => {
            let f = layout_permutation(ctx, bound(&m, p.forward.transpose)?.node);
            let r = layout_permutation(ctx, bound(&m, p.reverse.transpose)?.node);
            if f.is_none() || f != r {
                return decline("branches permute the data differently");
            }
        }
        _ => return decline("only one branch permutes the data"),
    }

    let fw_lengths = branch_lengths(ctx, &m, &p.forward)?;
    let rv_lengths = branch_lengths(ctx, &m, &p.reverse)?;
    if fw_lengths.is_none() || fw_lengths != rv_lengths {
        return decline("branches disagree on sequence lengths");
    }
    if has_path(ctx, fw.node, rv.node) || has_path(ctx, rv.node, fw.node) {
        return decline("one direction feeds the other");
    }

    let fw_inputs: Vec<Output> = fw_node.inputs.to_vec();
    let rv_inputs: Vec<Output> = rv_node.inputs.to_vec();
    if fw_inputs.len() != 7 || rv_inputs.len() != 7 {
        return decline("sequence must have seven inputs");
    }
    let concat_name = ctx.node(root)?.friendly_name.clone();

    let mut reg = NodeRegistry::new(ctx);
    let join = |reg: &mut NodeRegistry, slot: usize, axis: i64| {
        reg.make_try_fold(ctx, Op::Concat { axis }, &[fw_inputs[slot], rv_inputs[slot]])
    };
    let h = join(&mut reg, 1, 1)?;
    let c = join(&mut reg, 2, 1)?;
    let w = join(&mut reg, 4, 0)?;
    let r = join(&mut reg, 5, 0)?;
    let b = join(&mut reg, 6, 0)?;

    let lstm = reg.make(
        ctx,
        Op::LstmSequence(SequenceAttrs::new(attrs, Direction::Bidirectional)),
        &[fw_inputs[0], h, c, fw_inputs[3], w, r, b],
    )?;
    if let Some(node) = reg.get(lstm) {
        if config.declines(node) {
            return Ok(false);
        }
    }

    // Y [batch, 2, seq, hidden] -> [batch, seq, 2 * hidden]
    let order = reg.constant(TensorData::vec_i32(&[0, 2, 1, 3]));
    let transposed = reg.make(ctx, Op::Transpose, &[lstm.out(0), order])?;
    let pattern = reg.constant(TensorData::vec_i32(&[0, 0, -1]));
    let reshape = reg.make(
        ctx,
        Op::Reshape { special_zero: true },
        &[transposed.out(0), pattern],
    )?;
    reg.set_friendly_name(reshape, concat_name)?;

    let matched = m.matched_nodes().to_vec();
    reg.commit(ctx, &matched)?;
    ctx.replace_node(root, reshape)?;
    Ok(true)
}

/// Fuses a forward and a reverse LSTM over the same data into a bidirectional one
#[derive(Debug, Default)]
pub struct FuseLstmSequencesToBidirectional {
    config: TransformConfig,
}

impl FuseLstmSequencesToBidirectional {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl GraphTransformer for FuseLstmSequencesToBidirectional {
    fn name(&self) -> &'static str {
        "FuseLstmSequencesToBidirectional"
    }

    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
        let pattern = BidirectionalPattern::new();
        let mut engine = TransformEngine::new(ctx, &self.config);
        engine.apply(self.name(), &[OpType::Concat], |ctx, id| {
            fuse_bidirectional(ctx, id, &pattern, &self.config)
        })?;
        Ok(engine.into_stats().into())
    }

    fn is_applicable(&self, ctx: &GraphContext) -> bool {
        ctx.find_nodes_by_type(OpType::LstmSequence).len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::CellAttrs;
    use crate::tensor::{ElementType, PartialShape};

    const HIDDEN: usize = 4;

    fn branch(
        ctx: &mut GraphContext,
        x: Output,
        cell: CellAttrs,
        direction: Direction,
        max_len: i32,
    ) -> NodeId {
        let h0 = ctx.add_constant(TensorData::zeros_f32(&[2, 1, HIDDEN]));
        let c0 = ctx.add_constant(TensorData::zeros_f32(&[2, 1, HIDDEN]));
        let seq = ctx.add_constant(TensorData::vec_i32(&[max_len, max_len]));
        let w = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, 3]));
        let r = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, HIDDEN]));
        let b = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN]));
        let lstm = ctx
            .add_node(
                Op::LstmSequence(SequenceAttrs::new(cell, direction)),
                &[x, h0, c0, seq, w, r, b],
            )
            .unwrap();
        let axis = ctx.add_constant(TensorData::vec_i64(&[1]));
        ctx.add_node(Op::Squeeze, &[lstm.out(0), axis]).unwrap()
    }

    fn build(reverse_cell: CellAttrs, reverse_len: i32) -> (GraphContext, NodeId) {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 3]));
        let fw = branch(&mut ctx, x, CellAttrs::lstm(HIDDEN), Direction::Forward, 5);
        let rv = branch(&mut ctx, x, reverse_cell, Direction::Reverse, reverse_len);
        let concat = ctx
            .add_node(Op::Concat { axis: -1 }, &[fw.out(0), rv.out(0)])
            .unwrap();
        ctx.set_friendly_name(concat, "joined").unwrap();
        ctx.add_result(concat.out(0)).unwrap();
        (ctx, concat)
    }

    #[test]
    fn test_fuse_bidirectional() {
        let (mut ctx, concat) = build(CellAttrs::lstm(HIDDEN), 5);
        let result = FuseLstmSequencesToBidirectional::new().transform(&mut ctx).unwrap();
        assert_eq!(result.transforms_applied, 1);
        assert!(!ctx.has_node(concat));

        let seqs = ctx.find_nodes_by_type(OpType::LstmSequence);
        assert_eq!(seqs.len(), 1);
        let seq = ctx.node(seqs[0]).unwrap();
        assert_eq!(
            seq.op.sequence_attrs().unwrap().direction,
            Direction::Bidirectional
        );
        // weights were concatenated at fold time
        let w = seq.input(4).unwrap();
        assert_eq!(
            ctx.constant_value(w).unwrap().shape(),
            &[2, 4 * HIDDEN, 3]
        );

        let reshape = ctx.find_by_friendly_name("joined").unwrap();
        assert!(reshape.is_type(OpType::Reshape));
        assert_eq!(
            ctx.partial_shape(reshape.output(0)).unwrap(),
            &PartialShape::from_static(&[2, 5, 2 * HIDDEN])
        );
    }

    #[test]
    fn test_attribute_mismatch_declined() {
        let (mut ctx, concat) = build(CellAttrs::lstm(HIDDEN).with_clip(3.0), 5);
        let before = ctx.node_count();
        let result = FuseLstmSequencesToBidirectional::new().transform(&mut ctx).unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert!(ctx.has_node(concat));
        assert_eq!(ctx.node_count(), before);
    }

    #[test]
    fn test_length_mismatch_declined() {
        let (mut ctx, concat) = build(CellAttrs::lstm(HIDDEN), 4);
        let result = FuseLstmSequencesToBidirectional::new().transform(&mut ctx).unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert!(ctx.has_node(concat));
    }

    #[test]
    fn test_dependent_directions_declined() {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 3]));
        let fw = branch(&mut ctx, x, CellAttrs::lstm(HIDDEN), Direction::Forward, 5);
        let fw_lstm = ctx.node(fw).unwrap().input(0).unwrap().node;

        // reverse starts from the forward final state
        let c0 = ctx.add_constant(TensorData::zeros_f32(&[2, 1, HIDDEN]));
        let seq = ctx.add_constant(TensorData::vec_i32(&[5, 5]));
        let w = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, 3]));
        let r = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN, HIDDEN]));
        let b = ctx.add_constant(TensorData::zeros_f32(&[1, 4 * HIDDEN]));
        let rv_lstm = ctx
            .add_node(
                Op::LstmSequence(SequenceAttrs::new(CellAttrs::lstm(HIDDEN), Direction::Reverse)),
                &[x, fw_lstm.out(1), c0, seq, w, r, b],
            )
            .unwrap();
        let axis = ctx.add_constant(TensorData::vec_i64(&[1]));
        let rv = ctx.add_node(Op::Squeeze, &[rv_lstm.out(0), axis]).unwrap();
        let concat = ctx
            .add_node(Op::Concat { axis: 2 }, &[fw.out(0), rv.out(0)])
            .unwrap();
        ctx.add_result(concat.out(0)).unwrap();

        let result = FuseLstmSequencesToBidirectional::new().transform(&mut ctx).unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert!(ctx.has_node(concat));
    }

    #[test]
    fn test_callback_declines() {
        let (mut ctx, concat) = build(CellAttrs::lstm(HIDDEN), 5);
        let config = TransformConfig::default().with_callback(|node| node.is_type(OpType::LstmSequence));
        let result = FuseLstmSequencesToBidirectional::with_config(config)
            .transform(&mut ctx)
            .unwrap();
        assert_eq!(result.transforms_applied, 0);
        assert!(ctx.has_node(concat));
        assert_eq!(ctx.find_nodes_by_type(OpType::LstmSequence).len(), 2);
    }
}
