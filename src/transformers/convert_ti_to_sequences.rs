//! TensorIterator to RNN/GRU/LSTM sequence conversion
//!
//! A `TensorIterator` whose body is exactly one recurrent cell applied to a
//! time slice of its input is replaced by the matching sequence op:
//!
//! ```text
//! body:   data[1,b,i] -> Squeeze -> Cell(., H, [C,] W, R, B) -> Unsqueeze -> Result
//!                                       |-> Result (H)  [|-> Result (C)]
//! outer:  [Transpose] -> Sequence -> [Transpose] -> Squeeze(axis 1)  (one per output)
//! ```

use rustc_hash::FxHashSet;

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::{
    Direction, InputDescription, Op, OpType, OutputDescription, SequenceAttrs, SubGraphOp,
};
use crate::pattern::ops::{SQUEEZE_LIKE, UNSQUEEZE_LIKE};
use crate::pattern::{Label, MatchResult, Pattern, Predicate};
use crate::tensor::TensorData;
use crate::transform::{NodeRegistry, TransformConfig, TransformEngine};
use crate::transformers::common::{decline, lift_body_value, GraphTransformer, TransformResult};

/// Recurrent cell kinds a `TensorIterator` body can unroll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Rnn,
    Gru,
    Lstm,
}

impl CellKind {
    pub fn cell_type(self) -> OpType {
        match self {
            CellKind::Rnn => OpType::RnnCell,
            CellKind::Gru => OpType::GruCell,
            CellKind::Lstm => OpType::LstmCell,
        }
    }

    pub fn sequence_type(self) -> OpType {
        match self {
            CellKind::Rnn => OpType::RnnSequence,
            CellKind::Gru => OpType::GruSequence,
            CellKind::Lstm => OpType::LstmSequence,
        }
    }

    /// Only LSTM carries a cell state `C` next to the hidden state `H`
    pub fn has_cell_state(self) -> bool {
        self == CellKind::Lstm
    }

    /// Sequence op carrying every attribute of `cell`
    ///
    /// # Errors
    /// `UnsupportedCell` when `cell` is not a cell of this kind.
    pub fn sequence_op(self, cell: &Op, direction: Direction) -> GraphResult<Op> {
        match (self, cell) {
            (CellKind::Lstm, Op::LstmCell(attrs)) => {
                Ok(Op::LstmSequence(SequenceAttrs::new(attrs.clone(), direction)))
            }
            (CellKind::Rnn, Op::RnnCell(attrs)) => {
                Ok(Op::RnnSequence(SequenceAttrs::new(attrs.clone(), direction)))
            }
            (
                CellKind::Gru,
                Op::GruCell {
                    attrs,
                    linear_before_reset,
                },
            ) => Ok(Op::GruSequence {
                attrs: SequenceAttrs::new(attrs.clone(), direction),
                linear_before_reset: *linear_before_reset,
            }),
            (kind, other) => Err(TransformError::UnsupportedCell(format!(
                "{} matched while converting to {}",
                other.name(),
                kind.sequence_type().name()
            ))),
        }
    }
}

/// Body template rooted at the per-step `Unsqueeze`
struct BodyPattern {
    pattern: Pattern,
    root: Label,
    data: Label,
    h: Label,
    c: Option<Label>,
    w: Label,
    r: Label,
    b: Label,
    cell: Label,
}

impl BodyPattern {
    fn new(kind: CellKind) -> Self {
        let mut p = Pattern::new();
        let data = p.wrap_with(&[OpType::Parameter], &[], &[Predicate::RankEquals(3)]);
        let squeeze_axis = p.constant_with_rank(1);
        let step = p.wrap_with(SQUEEZE_LIKE, &[data, squeeze_axis], &[Predicate::RankEquals(2)]);

        let h = p.wrap_with(&[OpType::Parameter], &[], &[Predicate::RankEquals(2)]);
        let c = kind
            .has_cell_state()
            .then(|| p.wrap_with(&[OpType::Parameter], &[], &[Predicate::RankEquals(2)]));
        let w = p.constant_with_rank(2);
        let r = p.constant_with_rank(2);
        let b = p.constant_with_rank(1);

        let mut cell_inputs = vec![step, h];
        cell_inputs.extend(c);
        cell_inputs.extend([w, r, b]);
        let cell = p.wrap(&[kind.cell_type()], &cell_inputs);

        let unsqueeze_axis = p.constant();
        let root = p.wrap_with(UNSQUEEZE_LIKE, &[cell, unsqueeze_axis], &[Predicate::RankEquals(3)]);

        Self {
            pattern: p,
            root,
            data,
            h,
            c,
            w,
            r,
            b,
            cell,
        }
    }
}

/// Outer values and slicing parameters gathered from the descriptions
struct TiBinding {
    x: Output,
    h: Output,
    c: Option<Output>,
    slice_axis: i64,
    stride: i64,
    /// Outer output index for (Y, Hn, Cn)
    outputs: [Option<usize>; 3],
}

fn label_node(m: &MatchResult, label: Label) -> GraphResult<NodeId> {
    m.node(label)
        .ok_or_else(|| TransformError::Internal("pattern label left unbound".to_string()))
}

/// Rewrite one `TensorIterator` into a `kind` sequence
fn convert_tensor_iterator(
    ctx: &mut GraphContext,
    ti_id: NodeId,
    kind: CellKind,
    body_pattern: &BodyPattern,
    config: &TransformConfig,
) -> GraphResult<bool> {
    let ti = ctx.node(ti_id)?;
    let sub = match &ti.op {
        Op::TensorIterator(sub) => sub,
        _ => return Ok(false),
    };
    let body = &sub.body;

    // Some result must hold the per-step output
    let matcher = body_pattern.pattern.matcher(body_pattern.root);
    let m = body
        .results()
        .iter()
        .filter_map(|&r| body.node(r).ok()?.input(0))
        .find_map(|value| matcher.match_value(body, value));
    let m = match m {
        Some(m) => m,
        None => return Ok(false),
    };

    let matched: FxHashSet<NodeId> = m.matched_nodes().iter().copied().collect();
    if matched.len() + body.results().len() != body.node_count() {
        return decline("body holds ops outside the cell template");
    }

    let cell_value = m
        .get(body_pattern.cell)
        .ok_or_else(|| TransformError::Internal("cell label left unbound".to_string()))?;
    if cell_value.index != 0 {
        return decline("per-step output is not the cell's hidden state");
    }
    let per_step = m
        .get(body_pattern.root)
        .ok_or_else(|| TransformError::Internal("root label left unbound".to_string()))?;
    let cell_id = cell_value.node;

    let binding = bind_descriptions(ctx, ti_id, sub, &m, body_pattern, kind, cell_id, per_step)?;

    if config.declines(ti) {
        return Ok(false);
    }

    let ti_name = ti.friendly_name.clone();
    let cell_op = body.node(cell_id)?.op.clone();
    let sequence_op = kind.sequence_op(&cell_op, Direction::from_stride(binding.stride))?;

    let mut reg = NodeRegistry::new(ctx);
    let lift = |reg: &mut NodeRegistry, label: Label| -> GraphResult<Output> {
        let value = m
            .get(label)
            .ok_or_else(|| TransformError::Internal("weight label left unbound".to_string()))?;
        match lift_body_value(reg, ctx, ti_id, sub, value)? {
            Some(outer) => Ok(outer),
            None => decline("weight cannot be lifted out of the body"),
        }
    };
    let w = lift(&mut reg, body_pattern.w)?;
    let r = lift(&mut reg, body_pattern.r)?;
    let b = lift(&mut reg, body_pattern.b)?;

    let zero = reg.constant(TensorData::vec_i64(&[0]));
    let one = reg.constant(TensorData::vec_i64(&[1]));
    let axis_0 = reg.constant(TensorData::scalar_i64(0));

    // Sequence ops take [batch, seq, input]
    let x = if binding.slice_axis == 0 {
        let order = reg.constant(TensorData::vec_i64(&[1, 0, 2]));
        reg.make(ctx, Op::Transpose, &[binding.x, order])?.out(0)
    } else {
        binding.x
    };

    let h0 = reg.make(ctx, Op::Unsqueeze, &[binding.h, one])?.out(0);
    let c0 = match binding.c {
        Some(c) => Some(reg.make(ctx, Op::Unsqueeze, &[c, one])?.out(0)),
        None => None,
    };

    let shape = reg.make(ctx, Op::ShapeOf, &[x])?.out(0);
    let batch = reg.make_try_fold(ctx, Op::Gather { batch_dims: 0 }, &[shape, zero, axis_0])?;
    let seq_len = reg.make_try_fold(ctx, Op::Gather { batch_dims: 0 }, &[shape, one, axis_0])?;
    let seq_lengths = reg.make_try_fold(ctx, Op::Broadcast, &[seq_len, batch])?;

    let w = reg.make_try_fold(ctx, Op::Unsqueeze, &[w, zero])?;
    let r = reg.make_try_fold(ctx, Op::Unsqueeze, &[r, zero])?;
    let b = reg.make_try_fold(ctx, Op::Unsqueeze, &[b, zero])?;

    let mut inputs = vec![x, h0];
    inputs.extend(c0);
    inputs.extend([seq_lengths, w, r, b]);
    let sequence = reg.make(ctx, sequence_op, &inputs)?;

    let y = if binding.slice_axis == 0 {
        let order = reg.constant(TensorData::vec_i64(&[2, 1, 0, 3]));
        reg.make(ctx, Op::Transpose, &[sequence.out(0), order])?.out(0)
    } else {
        sequence.out(0)
    };

    let state_count = if kind.has_cell_state() { 2 } else { 1 };
    let mut squeezed = Vec::with_capacity(1 + state_count);
    for (slot, value) in std::iter::once(y)
        .chain((1..=state_count).map(|i| sequence.out(i)))
        .enumerate()
    {
        let squeeze = reg.make(ctx, Op::Squeeze, &[value, one])?;
        reg.set_friendly_name(squeeze, format!("{}.{}", ti_name, slot))?;
        squeezed.push(squeeze.out(0));
    }

    let outputs = binding.outputs;
    reg.commit(ctx, &[ti_id])?;
    for (slot, output_index) in outputs.iter().enumerate() {
        if let (Some(index), Some(&new)) = (output_index, squeezed.get(slot)) {
            ctx.replace_output(ti_id.out(*index), new)?;
        }
    }
    Ok(true)
}

/// Classify the input and output descriptions against the matched body
#[allow(clippy::too_many_arguments)]
fn bind_descriptions(
    ctx: &GraphContext,
    ti_id: NodeId,
    sub: &SubGraphOp,
    m: &MatchResult,
    body_pattern: &BodyPattern,
    kind: CellKind,
    cell_id: NodeId,
    per_step: Output,
) -> GraphResult<TiBinding> {
    let ti = ctx.node(ti_id)?;
    let body = &sub.body;
    let data_param = label_node(m, body_pattern.data)?;
    let h_param = label_node(m, body_pattern.h)?;
    let c_param = body_pattern.c.map(|c| label_node(m, c)).transpose()?;

    let mut x = None;
    let mut h = None;
    let mut c = None;
    let mut slice_axis = 0;
    let mut stride = 1;

    for desc in &sub.input_descriptions {
        let param = match body.parameters().get(desc.body_parameter_index()) {
            Some(&p) => p,
            None => return decline("input description names a missing parameter"),
        };
        let outer = ti.input(desc.input_index());

        if param == data_param {
            match desc {
                InputDescription::Sliced {
                    axis, stride: s, ..
                } => {
                    if *axis != 0 && *axis != 1 {
                        return decline(format!("unsupported slice axis {}", axis));
                    }
                    slice_axis = *axis;
                    stride = *s;
                    x = outer;
                }
                _ => return decline("sequence input is not sliced"),
            }
        } else if param == h_param {
            h = outer;
        } else if Some(param) == c_param {
            c = outer;
        } else {
            return decline("unexpected input description");
        }
    }

    let (x, h) = match (x, h) {
        (Some(x), Some(h)) => (x, h),
        _ => return decline("sequence input or hidden state is not bound"),
    };
    if kind.has_cell_state() && c.is_none() {
        return decline("cell state is not bound");
    }

    let mut outputs = [None; 3];
    for desc in &sub.output_descriptions {
        let result = match body.results().get(desc.body_value_index()) {
            Some(&r) => r,
            None => return decline("output description names a missing result"),
        };
        let value = body.node(result)?.input(0);

        if value == Some(per_step) {
            match desc {
                OutputDescription::Concat {
                    stride: s,
                    output_index,
                    ..
                } => {
                    // The concat stride decides the direction
                    stride = *s;
                    outputs[0] = Some(*output_index);
                }
                _ => return decline("per-step output is not concatenated"),
            }
        } else if value == Some(cell_id.out(0)) || (kind.has_cell_state() && value == Some(cell_id.out(1))) {
            match desc {
                OutputDescription::Body {
                    iteration: -1,
                    output_index,
                    ..
                } => {
                    let slot = if value == Some(cell_id.out(0)) { 1 } else { 2 };
                    outputs[slot] = Some(*output_index);
                }
                _ => return decline("state output is not the last iteration"),
            }
        } else {
            return decline("unexpected output description");
        }
    }

    Ok(TiBinding {
        x,
        h,
        c,
        slice_axis,
        stride,
        outputs,
    })
}

fn run_ti_lifter(
    ctx: &mut GraphContext,
    kind: CellKind,
    config: &TransformConfig,
    name: &str,
) -> GraphResult<TransformResult> {
    let body_pattern = BodyPattern::new(kind);
    let mut engine = TransformEngine::new(ctx, config);
    engine.apply(name, &[OpType::TensorIterator], |ctx, id| {
        convert_tensor_iterator(ctx, id, kind, &body_pattern, config)
    })?;
    Ok(engine.into_stats().into())
}

macro_rules! ti_lifter {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default)]
        pub struct $name {
            config: TransformConfig,
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with_config(config: TransformConfig) -> Self {
                Self { config }
            }
        }

        impl GraphTransformer for $name {
            fn name(&self) -> &'static str {
                stringify!($name)
            }

            fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
                run_ti_lifter(ctx, $kind, &self.config, self.name())
            }

            fn is_applicable(&self, ctx: &GraphContext) -> bool {
                ctx.nodes().any(|n| n.is_type(OpType::TensorIterator))
            }
        }
    };
}

ti_lifter!(
    /// Converts a `TensorIterator` over an `LSTMCell` into an `LSTMSequence`
    ConvertTensorIteratorToLstmSequence,
    CellKind::Lstm
);
ti_lifter!(
    /// Converts a `TensorIterator` over an `RNNCell` into an `RNNSequence`
    ConvertTensorIteratorToRnnSequence,
    CellKind::Rnn
);
ti_lifter!(
    /// Converts a `TensorIterator` over a `GRUCell` into a `GRUSequence`
    ConvertTensorIteratorToGruSequence,
    CellKind::Gru
);
