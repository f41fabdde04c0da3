//! Loop to LSTMSequence conversion
//!
//! Matches a counted `Loop` that unrolls an `LSTMCell` by hand: each
//! iteration gathers one time step of an invariant input, runs the cell and
//! scatters the hidden state into an accumulator.
//!
//! ```text
//! data -> [Transpose|Reshape] -> ScatterNDUpdate -> Loop -> Transpose
//!   body: Gather(X, seq_idx) -> LSTMCell -> Unsqueeze -> ScatterUpdate -> Result
//!         LogicalAnd(Less(iter + 1, limit), Less(seq_idx + 1, limit)) -> Result
//! ```
//!
//! The whole construct becomes `[Transpose] -> LSTMSequence -> Squeeze`.

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::{
    Direction, InputDescription, Op, OpType, OutputDescription, SequenceAttrs, SubGraphOp,
};
use crate::pattern::ops::{PERMUTE_LIKE, UNSQUEEZE_LIKE};
use crate::pattern::{Label, MatchResult, Pattern, Predicate};
use crate::tensor::TensorData;
use crate::transform::{NodeRegistry, TransformConfig, TransformEngine};
use crate::transformers::common::{
    compose_permutations, const_permutation, decline, dims_compatible, is_identity,
    is_zero_const, layout_permutation, lift_body_value, permutation_data, scalar_const_i64,
    GraphTransformer, TransformResult,
};

/// Layout the scatter writes into: `[seq, batch, input]`
const BATCH_FIRST: [usize; 3] = [1, 0, 2];

/// Outer template rooted at the output `Transpose`
struct OuterPattern {
    pattern: Pattern,
    root: Label,
    input: Label,
    permute: Label,
    scatter: Label,
    lp: Label,
}

impl OuterPattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let trip_count = p.constant();
        let condition = p.constant();

        let input = p.any_input_with(&[Predicate::RankEquals(3)]);
        let permute_order = p.constant();
        let permute = p.wrap_with(PERMUTE_LIKE, &[input, permute_order], &[Predicate::RankEquals(3)]);
        let scatter_update = p.or(&[permute, input]);
        let scatter_data = p.any_input();
        let scatter_indexes = p.constant();
        let scatter = p.wrap(
            &[OpType::ScatterNdUpdate],
            &[scatter_data, scatter_indexes, scatter_update],
        );

        let mut loop_inputs = vec![trip_count, condition];
        for _ in 0..5 {
            loop_inputs.push(p.any_input());
        }
        loop_inputs.push(scatter);
        let lp = p.wrap(&[OpType::Loop], &loop_inputs);

        let output_order = p.constant();
        let root = p.wrap(&[OpType::Transpose], &[lp, output_order]);

        Self {
            pattern: p,
            root,
            input,
            permute,
            scatter,
            lp,
        }
    }
}

/// Body condition: `LogicalAnd(Less(iter + step, limit), Less(seq + step, limit))`
struct ConditionPattern {
    pattern: Pattern,
    root: Label,
    iteration: Label,
    iteration_step: Label,
    iteration_limit: Label,
    sequence_index: Label,
    sequence_step: Label,
    sequence_limit: Label,
}

impl ConditionPattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let iteration = p.any_input();
        let iteration_step = p.constant();
        let iteration_next = p.wrap(&[OpType::Add], &[iteration, iteration_step]);
        let iteration_limit = p.constant();
        let iteration_less = p.wrap(&[OpType::Less], &[iteration_next, iteration_limit]);

        let sequence_index = p.any_input_with(&[Predicate::RankEquals(0)]);
        let sequence_step = p.constant();
        let sequence_next = p.wrap(&[OpType::Add], &[sequence_index, sequence_step]);
        let sequence_limit = p.constant();
        let sequence_less = p.wrap(&[OpType::Less], &[sequence_next, sequence_limit]);

        let and = p.wrap(&[OpType::LogicalAnd], &[iteration_less, sequence_less]);
        let root = p.wrap(&[OpType::Result], &[and]);

        Self {
            pattern: p,
            root,
            iteration,
            iteration_step,
            iteration_limit,
            sequence_index,
            sequence_step,
            sequence_limit,
        }
    }
}

/// Body output: the cell's hidden state scattered at the sequence index
struct OutputPattern {
    pattern: Pattern,
    root: Label,
    sequence_index: Label,
    x: Label,
    gather_axis: Label,
    h: Label,
    c: Label,
    w: Label,
    r: Label,
    b: Label,
    cell: Label,
    scatter_axis: Label,
}

impl OutputPattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let x = p.any_input_with(&[Predicate::RankEquals(3)]);
        let sequence_index = p.any_input_with(&[Predicate::RankEquals(0)]);
        let index_shape = p.constant();
        let index_reshape = p.wrap(&[OpType::Reshape], &[sequence_index, index_shape]);
        let gather_index = p.or(&[index_reshape, sequence_index]);
        let gather_axis = p.constant();
        let step = p.wrap_with(
            &[OpType::Gather],
            &[x, gather_index, gather_axis],
            &[Predicate::RankEquals(2)],
        );

        let h = p.any_input_with(&[Predicate::RankEquals(2)]);
        let c = p.any_input_with(&[Predicate::RankEquals(2)]);
        let w = p.any_input();
        let r = p.any_input();
        let b = p.constant();
        let cell = p.wrap(&[OpType::LstmCell], &[step, h, c, w, r, b]);

        let scatter_index_shape = p.constant();
        let scatter_index = p.wrap(&[OpType::Reshape], &[sequence_index, scatter_index_shape]);
        let updates_shape = p.constant();
        let updates = p.wrap(UNSQUEEZE_LIKE, &[cell, updates_shape]);
        let scatter_data = p.any_input();
        let scatter_axis = p.constant();
        let scatter = p.wrap_with(
            &[OpType::ScatterUpdate],
            &[scatter_data, scatter_index, updates, scatter_axis],
            &[Predicate::RankEquals(3)],
        );
        let root = p.wrap(&[OpType::Result], &[scatter]);

        Self {
            pattern: p,
            root,
            sequence_index,
            x,
            gather_axis,
            h,
            c,
            w,
            r,
            b,
            cell,
            scatter_axis,
        }
    }
}

struct LoopPatterns {
    outer: OuterPattern,
    condition: ConditionPattern,
    output: OutputPattern,
}

fn bound(m: &MatchResult, label: Label) -> GraphResult<Output> {
    m.get(label)
        .ok_or_else(|| TransformError::Internal("pattern label left unbound".to_string()))
}

/// Body parameter fed through a merged description looping back from `from`
fn merged_from(sub: &SubGraphOp, param: Output, from: Output) -> Option<usize> {
    match sub.input_description_for(param.node)? {
        InputDescription::Merged {
            input_index,
            body_value_index,
            ..
        } => {
            let result = *sub.body.results().get(*body_value_index)?;
            let fed = sub.body.try_node(result)?.input(0)?;
            (fed == from).then_some(*input_index)
        }
        _ => None,
    }
}

fn is_merged(sub: &SubGraphOp, param: Output) -> bool {
    matches!(
        sub.input_description_for(param.node),
        Some(InputDescription::Merged { .. })
    )
}

fn convert_loop(
    ctx: &mut GraphContext,
    root_id: NodeId,
    patterns: &LoopPatterns,
    config: &TransformConfig,
) -> GraphResult<bool> {
    let outer = &patterns.outer;
    let m = match outer.pattern.matcher(outer.root).match_node(ctx, root_id) {
        Some(m) => m,
        None => return Ok(false),
    };

    let loop_value = bound(&m, outer.lp)?;
    let loop_node = ctx.node(loop_value.node)?;
    let sub = match &loop_node.op {
        Op::Loop(sub) => sub,
        _ => return Ok(false),
    };
    let body = &sub.body;
    let scatter = bound(&m, outer.scatter)?;

    // Exactly one output: the accumulator after the last iteration
    let output_result = match sub.output_descriptions.as_slice() {
        [OutputDescription::Body {
            body_value_index,
            iteration: -1,
            ..
        }] => match body.results().get(*body_value_index) {
            Some(&r) => r,
            None => return decline("output description names a missing result"),
        },
        _ => return decline("loop must have a single last-iteration output"),
    };
    let condition_result = match sub.special_body_ports {
        Some(ports) if ports.body_condition_output_idx >= 0 => {
            match body.results().get(ports.body_condition_output_idx as usize) {
                Some(&r) => r,
                None => return decline("condition port names a missing result"),
            }
        }
        _ => return decline("loop has no body condition"),
    };

    let cp = &patterns.condition;
    let cm = match cp.pattern.matcher(cp.root).match_node(body, condition_result) {
        Some(cm) => cm,
        None => return decline("body condition does not match"),
    };
    let op = &patterns.output;
    let om = match op.pattern.matcher(op.root).match_node(body, output_result) {
        Some(om) => om,
        None => return decline("body output does not match"),
    };

    // Counters advance by one towards one shared limit
    let steps = (
        scalar_const_i64(body, bound(&cm, cp.iteration_step)?),
        scalar_const_i64(body, bound(&cm, cp.sequence_step)?),
    );
    if steps != (Some(1), Some(1)) {
        return decline("counter steps must be 1");
    }
    let limit = match (
        scalar_const_i64(body, bound(&cm, cp.iteration_limit)?),
        scalar_const_i64(body, bound(&cm, cp.sequence_limit)?),
    ) {
        (Some(a), Some(b)) if a == b => a,
        _ => return decline("counter limits differ"),
    };
    let limit = match i32::try_from(limit) {
        Ok(limit) => limit,
        Err(_) => return decline(format!("sequence length {} does not fit i32", limit)),
    };

    let sequence_index = bound(&om, op.sequence_index)?;
    if bound(&cm, cp.sequence_index)? != sequence_index {
        return decline("condition and output use different sequence indexes");
    }
    if !is_merged(sub, sequence_index) || !is_merged(sub, bound(&cm, cp.iteration)?) {
        return decline("counters must be loop-carried");
    }

    if scalar_const_i64(body, bound(&om, op.gather_axis)?) != Some(0)
        || scalar_const_i64(body, bound(&om, op.scatter_axis)?) != Some(0)
    {
        return decline("gather and scatter must run along axis 0");
    }

    let cell = bound(&om, op.cell)?;
    if cell.index != 0 {
        return decline("scattered value is not the cell's hidden state");
    }
    let cell_attrs = match &body.node(cell.node)?.op {
        Op::LstmCell(attrs) => attrs.clone(),
        other => return Err(TransformError::UnsupportedCell(other.name().to_string())),
    };

    // X is fed unchanged from the outer scatter
    let x_body = bound(&om, op.x)?;
    match sub.input_description_for(x_body.node) {
        Some(InputDescription::Invariant { input_index, .. })
            if loop_node.input(*input_index) == Some(scatter) => {}
        _ => return decline("sequence input is not the invariant scatter result"),
    }

    // States loop back through the cell and start at zero
    let h_input = merged_from(sub, bound(&om, op.h)?, cell.node.out(0));
    let c_input = merged_from(sub, bound(&om, op.c)?, cell.node.out(1));
    let (h, c) = match (
        h_input.and_then(|i| loop_node.input(i)),
        c_input.and_then(|i| loop_node.input(i)),
    ) {
        (Some(h), Some(c)) => (h, c),
        _ => return decline("states are not merged with the cell outputs"),
    };
    if !is_zero_const(ctx, h) || !is_zero_const(ctx, c) {
        return decline("initial states must be zero");
    }

    let root = ctx.node(root_id)?;
    match root.input(1).and_then(|order| const_permutation(ctx, order, 3)) {
        Some(perm) if perm == BATCH_FIRST => {}
        _ => return decline("output transpose must be [1, 0, 2]"),
    }
    let root_name = root.friendly_name.clone();

    // Layout of the outer data relative to [batch, seq, input]
    let permutation = if m.contains(outer.permute) {
        let permute = bound(&m, outer.permute)?;
        match layout_permutation(ctx, permute.node) {
            Some(first) => compose_permutations(&first, &BATCH_FIRST),
            None => return decline("input reshape is not a pure permutation"),
        }
    } else {
        BATCH_FIRST.to_vec()
    };
    let data = bound(&m, outer.input)?;

    let mut reg = NodeRegistry::new(ctx);
    let x = if is_identity(&permutation) {
        data
    } else {
        let order = reg.constant(permutation_data(&permutation));
        reg.make(ctx, Op::Transpose, &[data, order])?.out(0)
    };

    let x_shape = reg.partial_shape(ctx, x)?;
    let scatter_shape = ctx.partial_shape(scatter)?;
    match (x_shape.dims(), scatter_shape.dims()) {
        (Some(xd), Some(sd)) if xd.len() == 3 && sd.len() == 3 => {
            if !dims_compatible(xd, &[sd[1], sd[0], sd[2]]) {
                return decline(format!(
                    "input {} does not fit the scattered layout {}",
                    x_shape, scatter_shape
                ));
            }
        }
        _ => return decline("input and scatter must have rank 3"),
    }

    let zero = reg.constant(TensorData::vec_i32(&[0]));
    let max_len = reg.constant(TensorData::vec_i32(&[limit]));
    let x_dims = reg.make(ctx, Op::ShapeOf, &[x])?.out(0);
    let batch = reg.make_try_fold(ctx, Op::Gather { batch_dims: 0 }, &[x_dims, zero, zero])?;

    // [1 | batch, hidden] -> [batch, 1, hidden]
    let one = reg.constant(TensorData::vec_i32(&[1]));
    let state_tail = reg.constant(TensorData::vec_i64(&[1, cell_attrs.hidden_size as i64]));
    let target = reg.make_try_fold(ctx, Op::Concat { axis: 0 }, &[batch, state_tail])?;
    let broadcast_state = |reg: &mut NodeRegistry, state: Output| -> GraphResult<Output> {
        let state = reg.make_try_fold(ctx, Op::Unsqueeze, &[state, one])?;
        reg.make_try_fold(ctx, Op::Broadcast, &[state, target])
    };
    let h0 = broadcast_state(&mut reg, h)?;
    let c0 = broadcast_state(&mut reg, c)?;

    let lift = |reg: &mut NodeRegistry, label: Label| -> GraphResult<Output> {
        let value = bound(&om, label)?;
        let outer_value = match lift_body_value(reg, ctx, loop_value.node, sub, value)? {
            Some(v) => v,
            None => return decline("weight cannot be lifted out of the body"),
        };
        reg.make_try_fold(ctx, Op::Unsqueeze, &[outer_value, zero])
    };
    let w = lift(&mut reg, op.w)?;
    let r = lift(&mut reg, op.r)?;
    let b = lift(&mut reg, op.b)?;

    let seq_lengths = reg.make_try_fold(ctx, Op::Broadcast, &[max_len, batch])?;
    let lstm = reg.make(
        ctx,
        Op::LstmSequence(SequenceAttrs::new(cell_attrs, Direction::Forward)),
        &[x, h0, c0, seq_lengths, w, r, b],
    )?;
    if let Some(node) = reg.get(lstm) {
        if config.declines(node) {
            return Ok(false);
        }
    }

    let one = reg.constant(TensorData::vec_i32(&[1]));
    let squeezed = reg.make(ctx, Op::Squeeze, &[lstm.out(0), one])?;
    reg.set_friendly_name(squeezed, root_name)?;

    let shape_users: Vec<NodeId> = ctx
        .consumers(loop_value)
        .iter()
        .map(|c| c.node)
        .filter(|&id| ctx.try_node(id).is_some_and(|n| n.is_type(OpType::ShapeOf)))
        .collect();

    reg.commit(ctx, &[scatter.node, loop_value.node])?;

    // Keep shape queries on the loop output answering [seq, batch, hidden]
    for shape_of in shape_users {
        let name = ctx.node(shape_of)?.friendly_name.clone();
        let mut reg = NodeRegistry::new(ctx);
        let dims = reg.make(ctx, Op::ShapeOf, &[squeezed.out(0)])?.out(0);
        let order = reg.constant(permutation_data(&BATCH_FIRST));
        let axis = reg.constant(TensorData::vec_i32(&[0]));
        let reordered = reg.make(ctx, Op::Gather { batch_dims: 0 }, &[dims, order, axis])?;
        reg.set_friendly_name(reordered, name)?;
        reg.commit(ctx, &[shape_of])?;
        ctx.replace_node(shape_of, reordered)?;
    }

    ctx.replace_node(root_id, squeezed)?;
    Ok(true)
}

/// Converts a hand-unrolled LSTM `Loop` into an `LSTMSequence`
#[derive(Debug, Default)]
pub struct ConvertLoopToLstmSequence {
    config: TransformConfig,
}

impl ConvertLoopToLstmSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl GraphTransformer for ConvertLoopToLstmSequence {
    fn name(&self) -> &'static str {
        "ConvertLoopToLstmSequence"
    }

    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
        let patterns = LoopPatterns {
            outer: OuterPattern::new(),
            condition: ConditionPattern::new(),
            output: OutputPattern::new(),
        };
        let mut engine = TransformEngine::new(ctx, &self.config);
        engine.apply(self.name(), &[OpType::Transpose], |ctx, id| {
            convert_loop(ctx, id, &patterns, &self.config)
        })?;
        Ok(engine.into_stats().into())
    }

    fn is_applicable(&self, ctx: &GraphContext) -> bool {
        ctx.nodes().any(|n| n.is_type(OpType::Loop))
    }
}
