//! Graph builders shared by the integration tests

#![allow(dead_code)]

use sequence_lowering::graph::{GraphContext, NodeId, NodeOutputs, Output};
use sequence_lowering::opset::{
    CellAttrs, InputDescription, Op, OutputDescription, SpecialBodyPorts, SubGraphOp,
};
use sequence_lowering::tensor::{ElementType, PartialShape, TensorData, TensorInfo};

pub const BATCH: usize = 2;
pub const SEQ: usize = 5;
pub const INPUT: usize = 3;
pub const HIDDEN: usize = 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32_info(dims: &[usize]) -> TensorInfo {
    TensorInfo::new(ElementType::F32, PartialShape::from_static(dims))
}

/// Value of a constant as i64, panicking on anything else
pub fn const_values(ctx: &GraphContext, value: Output) -> Vec<i64> {
    ctx.constant_value(value)
        .expect("constant input")
        .to_i64_vec()
        .expect("integer constant")
}

// ============================================================================
// TensorIterator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Rnn,
    Gru { linear_before_reset: bool },
    Lstm,
}

impl Cell {
    fn gates(self) -> usize {
        match self {
            Cell::Rnn => 1,
            Cell::Gru { .. } => 3,
            Cell::Lstm => 4,
        }
    }

    fn has_cell_state(self) -> bool {
        self == Cell::Lstm
    }
}

#[derive(Debug, Clone)]
pub struct TiOptions {
    pub cell: Cell,
    pub slice_axis: i64,
    pub stride: i64,
    /// Expose `Hn` (and `Cn`) as outputs besides `Y`
    pub state_outputs: bool,
    /// Add an unused `Add` to the body
    pub extra_op: bool,
    pub clip: f32,
}

impl Default for TiOptions {
    fn default() -> Self {
        Self {
            cell: Cell::Lstm,
            slice_axis: 0,
            stride: 1,
            state_outputs: true,
            extra_op: false,
            clip: 0.0,
        }
    }
}

pub struct TiGraph {
    pub ctx: GraphContext,
    pub x: Output,
    pub ti: NodeId,
    /// Graph results in output order (Y, Hn, Cn)
    pub results: Vec<NodeId>,
}

/// Outer `[.., .., ..]` layout with `SEQ` on the slicing axis
fn sliced_dims(axis: i64, inner: usize) -> Vec<usize> {
    match axis {
        0 => vec![SEQ, BATCH, inner],
        1 => vec![BATCH, SEQ, inner],
        _ => vec![BATCH, inner, SEQ],
    }
}

/// Add one `TensorIterator` over `x` to `ctx`, named `name`
pub fn add_tensor_iterator(ctx: &mut GraphContext, x: Output, opts: &TiOptions, name: &str) -> NodeId {
    let axis = opts.slice_axis;
    let mut slice = sliced_dims(axis, INPUT);
    slice[axis as usize] = 1;

    let mut body = GraphContext::new();
    let data = body.add_parameter(ElementType::F32, PartialShape::from_static(&slice));
    let h = body.add_parameter(ElementType::F32, PartialShape::from_static(&[BATCH, HIDDEN]));
    let c = opts
        .cell
        .has_cell_state()
        .then(|| body.add_parameter(ElementType::F32, PartialShape::from_static(&[BATCH, HIDDEN])));

    let squeeze_axis = body.add_constant(TensorData::vec_i64(&[axis]));
    let step = body.add_node(Op::Squeeze, &[data, squeeze_axis]).unwrap();

    let gates = opts.cell.gates() * HIDDEN;
    let w = body.add_constant(TensorData::filled_f32(&[gates, INPUT], 0.1));
    let r = body.add_constant(TensorData::filled_f32(&[gates, HIDDEN], 0.2));
    let b = body.add_constant(TensorData::filled_f32(&[gates], 0.3));

    let (op, inputs) = match opts.cell {
        Cell::Lstm => (
            Op::LstmCell(CellAttrs::lstm(HIDDEN).with_clip(opts.clip)),
            vec![step.out(0), h, c.unwrap(), w, r, b],
        ),
        Cell::Rnn => (
            Op::RnnCell(CellAttrs::rnn(HIDDEN).with_clip(opts.clip)),
            vec![step.out(0), h, w, r, b],
        ),
        Cell::Gru {
            linear_before_reset,
        } => (
            Op::GruCell {
                attrs: CellAttrs::gru(HIDDEN).with_clip(opts.clip),
                linear_before_reset,
            },
            vec![step.out(0), h, w, r, b],
        ),
    };
    let cell = body.add_node(op, &inputs).unwrap();
    let unsqueeze_axis = body.add_constant(TensorData::vec_i64(&[axis]));
    let per_step = body.add_node(Op::Unsqueeze, &[cell.out(0), unsqueeze_axis]).unwrap();

    if opts.extra_op {
        let bias = body.add_constant(TensorData::filled_f32(&[1], 1.0));
        body.add_node(Op::Add, &[h, bias]).unwrap();
    }

    body.add_result(per_step.out(0)).unwrap();
    body.add_result(cell.out(0)).unwrap();
    if c.is_some() {
        body.add_result(cell.out(1)).unwrap();
    }

    let (start, end) = if opts.stride > 0 { (0, -1) } else { (-1, 0) };
    let mut sub = SubGraphOp::new(body);
    sub.input_descriptions.push(InputDescription::Sliced {
        input_index: 0,
        body_parameter_index: 0,
        start,
        stride: opts.stride,
        part_size: 1,
        end,
        axis,
    });
    sub.input_descriptions.push(InputDescription::Merged {
        input_index: 1,
        body_parameter_index: 1,
        body_value_index: 1,
    });
    if c.is_some() {
        sub.input_descriptions.push(InputDescription::Merged {
            input_index: 2,
            body_parameter_index: 2,
            body_value_index: 2,
        });
    }

    sub.output_descriptions.push(OutputDescription::Concat {
        body_value_index: 0,
        output_index: 0,
        start,
        stride: opts.stride,
        part_size: 1,
        end,
        axis,
    });
    let mut outputs = vec![f32_info(&sliced_dims(axis, HIDDEN))];
    if opts.state_outputs {
        let states = if c.is_some() { 2 } else { 1 };
        for i in 1..=states {
            sub.output_descriptions.push(OutputDescription::Body {
                body_value_index: i,
                output_index: i,
                iteration: -1,
            });
            outputs.push(f32_info(&[BATCH, HIDDEN]));
        }
    }

    let h0 = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[BATCH, HIDDEN]));
    let mut outer_inputs = vec![x, h0];
    if c.is_some() {
        outer_inputs.push(ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[BATCH, HIDDEN])));
    }

    let ti = ctx
        .add_node_with_outputs(
            Op::TensorIterator(Box::new(sub)),
            &outer_inputs,
            NodeOutputs::from_vec(outputs),
        )
        .unwrap();
    ctx.set_friendly_name(ti, name).unwrap();
    ti
}

/// A graph holding one `TensorIterator`, named `ti`, with every output a result
pub fn tensor_iterator(opts: &TiOptions) -> TiGraph {
    let mut ctx = GraphContext::new();
    let x = ctx.add_parameter(
        ElementType::F32,
        PartialShape::from_static(&sliced_dims(opts.slice_axis, INPUT)),
    );
    let ti = add_tensor_iterator(&mut ctx, x, opts, "ti");
    let results = (0..ctx.node(ti).unwrap().output_count())
        .map(|i| ctx.add_result(ti.out(i)).unwrap())
        .collect();
    TiGraph { ctx, x, ti, results }
}

// ============================================================================
// Loop
// ============================================================================

/// How the outer data reaches the scatter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopInput {
    /// `[batch, SEQ, INPUT]` through `Transpose [1, 0, 2]`
    Transpose,
    /// `[1, SEQ, INPUT]` through a `Reshape` to `[SEQ, 1, INPUT]`
    Reshape,
    /// `[SEQ, batch, INPUT]` fed straight in
    Direct,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub batch: usize,
    pub input: LoopInput,
    /// Fill value of the initial hidden state
    pub h_value: f32,
    /// Bound both body counters are compared against
    pub limit: i64,
    /// Also read the loop output through `ShapeOf`
    pub shape_of: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            batch: 1,
            input: LoopInput::Transpose,
            h_value: 0.0,
            limit: SEQ as i64,
            shape_of: false,
        }
    }
}

pub struct LoopGraph {
    pub ctx: GraphContext,
    /// Outer data, laid out per `LoopOptions::input`
    pub data: Output,
    pub lp: NodeId,
    pub root: NodeId,
    pub shape_of: Option<NodeId>,
}

fn scalar(ctx: &mut GraphContext, value: i64) -> Output {
    ctx.add_constant(TensorData::scalar_i64(value))
}

/// `[Transpose|Reshape] -> ScatterNDUpdate -> Loop(LSTMCell) -> Transpose`
pub fn lstm_loop(opts: &LoopOptions) -> LoopGraph {
    let batch = opts.batch;
    let seq = SEQ as i64;

    // Body parameters: iteration, sequence index, X, H, C, accumulator
    let mut body = GraphContext::new();
    let iteration = body.add_parameter(ElementType::I64, PartialShape::scalar());
    let seq_index = body.add_parameter(ElementType::I64, PartialShape::scalar());
    let x = body.add_parameter(ElementType::F32, PartialShape::from_static(&[SEQ, batch, INPUT]));
    let h = body.add_parameter(ElementType::F32, PartialShape::from_static(&[batch, HIDDEN]));
    let c = body.add_parameter(ElementType::F32, PartialShape::from_static(&[batch, HIDDEN]));
    let acc = body.add_parameter(ElementType::F32, PartialShape::from_static(&[SEQ, batch, HIDDEN]));

    let one = scalar(&mut body, 1);
    let iteration_next = body.add_node(Op::Add, &[iteration, one]).unwrap();
    let limit = scalar(&mut body, opts.limit);
    let iteration_less = body.add_node(Op::Less, &[iteration_next.out(0), limit]).unwrap();
    let one = scalar(&mut body, 1);
    let seq_next = body.add_node(Op::Add, &[seq_index, one]).unwrap();
    let limit = scalar(&mut body, opts.limit);
    let seq_less = body.add_node(Op::Less, &[seq_next.out(0), limit]).unwrap();
    let and = body
        .add_node(Op::LogicalAnd, &[iteration_less.out(0), seq_less.out(0)])
        .unwrap();

    let gather_axis = scalar(&mut body, 0);
    let step = body
        .add_node(Op::Gather { batch_dims: 0 }, &[x, seq_index, gather_axis])
        .unwrap();
    let w = body.add_constant(TensorData::filled_f32(&[4 * HIDDEN, INPUT], 0.1));
    let r = body.add_constant(TensorData::filled_f32(&[4 * HIDDEN, HIDDEN], 0.2));
    let b = body.add_constant(TensorData::filled_f32(&[4 * HIDDEN], 0.3));
    let cell = body
        .add_node(Op::LstmCell(CellAttrs::lstm(HIDDEN)), &[step.out(0), h, c, w, r, b])
        .unwrap();

    let index_shape = body.add_constant(TensorData::vec_i64(&[1]));
    let index = body
        .add_node(Op::Reshape { special_zero: false }, &[seq_index, index_shape])
        .unwrap();
    let updates_axis = body.add_constant(TensorData::vec_i64(&[0]));
    let updates = body.add_node(Op::Unsqueeze, &[cell.out(0), updates_axis]).unwrap();
    let scatter_axis = scalar(&mut body, 0);
    let scattered = body
        .add_node(
            Op::ScatterUpdate,
            &[acc, index.out(0), updates.out(0), scatter_axis],
        )
        .unwrap();

    // Results: condition, accumulator, H, C, sequence index, iteration
    body.add_result(and.out(0)).unwrap();
    body.add_result(scattered.out(0)).unwrap();
    body.add_result(cell.out(0)).unwrap();
    body.add_result(cell.out(1)).unwrap();
    body.add_result(seq_next.out(0)).unwrap();
    body.add_result(iteration_next.out(0)).unwrap();

    let mut sub = SubGraphOp::new(body);
    let merged = |input_index, body_parameter_index, body_value_index| InputDescription::Merged {
        input_index,
        body_parameter_index,
        body_value_index,
    };
    sub.input_descriptions = vec![
        merged(5, 0, 5),
        merged(4, 1, 4),
        InputDescription::Invariant {
            input_index: 7,
            body_parameter_index: 2,
        },
        merged(2, 3, 2),
        merged(3, 4, 3),
        merged(6, 5, 1),
    ];
    sub.output_descriptions = vec![OutputDescription::Body {
        body_value_index: 1,
        output_index: 0,
        iteration: -1,
    }];
    sub.special_body_ports = Some(SpecialBodyPorts {
        current_iteration_input_idx: -1,
        body_condition_output_idx: 0,
    });

    // Outer graph
    let mut ctx = GraphContext::new();
    let (data, time_major) = match opts.input {
        LoopInput::Transpose => {
            let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[batch, SEQ, INPUT]));
            let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
            (data, ctx.add_node(Op::Transpose, &[data, order]).unwrap().out(0))
        }
        LoopInput::Reshape => {
            assert_eq!(batch, 1, "a reshape only moves unit axes");
            let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[1, SEQ, INPUT]));
            let target = ctx.add_constant(TensorData::vec_i64(&[seq, 1, INPUT as i64]));
            let reshape = ctx
                .add_node(Op::Reshape { special_zero: false }, &[data, target])
                .unwrap();
            (data, reshape.out(0))
        }
        LoopInput::Direct => {
            let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[SEQ, batch, INPUT]));
            (data, data)
        }
    };
    let buffer = ctx.add_constant(TensorData::zeros_f32(&[SEQ, batch, INPUT]));
    let indices = ctx.add_constant(TensorData::from_i64(&[1, 1], vec![0]).unwrap());
    let scatter = ctx
        .add_node(Op::ScatterNdUpdate, &[buffer, indices, time_major])
        .unwrap();

    let trip_count = scalar(&mut ctx, seq);
    let condition = ctx.add_constant(TensorData::scalar_bool(true));
    let h0 = ctx.add_constant(TensorData::filled_f32(&[batch, HIDDEN], opts.h_value));
    let c0 = ctx.add_constant(TensorData::zeros_f32(&[batch, HIDDEN]));
    let seq_start = scalar(&mut ctx, 0);
    let iteration_start = scalar(&mut ctx, 0);
    let acc0 = ctx.add_constant(TensorData::zeros_f32(&[SEQ, batch, HIDDEN]));

    let lp = ctx
        .add_node_with_outputs(
            Op::Loop(Box::new(sub)),
            &[
                trip_count,
                condition,
                h0,
                c0,
                seq_start,
                iteration_start,
                acc0,
                scatter.out(0),
            ],
            NodeOutputs::from_vec(vec![f32_info(&[SEQ, batch, HIDDEN])]),
        )
        .unwrap();
    ctx.set_friendly_name(lp, "loop").unwrap();

    let out_order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
    let root = ctx.add_node(Op::Transpose, &[lp.out(0), out_order]).unwrap();
    ctx.set_friendly_name(root, "lstm_out").unwrap();
    ctx.add_result(root.out(0)).unwrap();

    let shape_of = opts.shape_of.then(|| {
        let shape_of = ctx.add_node(Op::ShapeOf, &[lp.out(0)]).unwrap();
        ctx.set_friendly_name(shape_of, "loop_shape").unwrap();
        ctx.add_result(shape_of.out(0)).unwrap();
        shape_of
    });

    LoopGraph {
        ctx,
        data,
        lp,
        root,
        shape_of,
    }
}
