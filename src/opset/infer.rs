//! Output type and shape inference
//!
//! Given the inputs of a node (their descriptors plus constant values where
//! known), compute the descriptors of its outputs. Rules are partial-shape
//! aware: unknown inputs produce dynamic dimensions instead of errors, while
//! statically provable inconsistencies are reported.

use smallvec::{smallvec, SmallVec};

use crate::error::{GraphResult, TransformError};
use crate::tensor::{
    broadcast_shape, normalize_axes, normalize_axis, Dimension, ElementType, PartialShape,
    TensorData, TensorInfo,
};

use super::recurrent::{CellAttrs, SequenceAttrs};
use super::Op;

/// What inference knows about one input
#[derive(Debug, Clone, Copy)]
pub struct InputFact<'a> {
    pub info: &'a TensorInfo,
    /// Constant value, when the producer is (or folds to) a constant
    pub value: Option<&'a TensorData>,
}

pub type OutputInfos = SmallVec<[TensorInfo; 3]>;

fn expect_inputs(op: &Op, inputs: &[InputFact], count: usize) -> GraphResult<()> {
    if inputs.len() != count {
        return Err(TransformError::InvalidNode(format!(
            "{} expects {} inputs, got {}",
            op.name(),
            count,
            inputs.len()
        )));
    }
    Ok(())
}

fn const_i64(fact: &InputFact) -> GraphResult<Option<Vec<i64>>> {
    fact.value.map(|v| v.to_i64_vec()).transpose()
}

fn single(info: TensorInfo) -> OutputInfos {
    smallvec![info]
}

/// Infer output descriptors for `op` applied to `inputs`
pub fn infer_outputs(op: &Op, inputs: &[InputFact]) -> GraphResult<OutputInfos> {
    match op {
        Op::Parameter | Op::TensorIterator(_) | Op::Loop(_) => Err(TransformError::InvalidNode(
            format!("{} outputs must be supplied explicitly", op.name()),
        )),
        Op::Constant(data) => {
            expect_inputs(op, inputs, 0)?;
            Ok(single(TensorInfo::new(
                data.element_type(),
                PartialShape::from_static(data.shape()),
            )))
        }
        Op::Result | Op::ReverseSequence { .. } => {
            expect_inputs(op, inputs, if matches!(op, Op::Result) { 1 } else { 2 })?;
            Ok(single(inputs[0].info.clone()))
        }
        Op::ScatterNdUpdate => {
            expect_inputs(op, inputs, 3)?;
            Ok(single(inputs[0].info.clone()))
        }
        Op::ScatterUpdate => {
            expect_inputs(op, inputs, 4)?;
            Ok(single(inputs[0].info.clone()))
        }
        Op::Transpose => {
            expect_inputs(op, inputs, 2)?;
            infer_transpose(&inputs[0], &inputs[1]).map(single)
        }
        Op::Reshape { special_zero } => {
            expect_inputs(op, inputs, 2)?;
            infer_reshape(&inputs[0], &inputs[1], *special_zero).map(single)
        }
        Op::Squeeze => {
            if inputs.is_empty() || inputs.len() > 2 {
                return Err(TransformError::InvalidNode(
                    "Squeeze expects 1 or 2 inputs".to_string(),
                ));
            }
            infer_squeeze(&inputs[0], inputs.get(1)).map(single)
        }
        Op::Unsqueeze => {
            expect_inputs(op, inputs, 2)?;
            infer_unsqueeze(&inputs[0], &inputs[1]).map(single)
        }
        Op::Gather { batch_dims } => {
            expect_inputs(op, inputs, 3)?;
            if *batch_dims != 0 {
                return Err(TransformError::InvalidNode(
                    "Gather with batch_dims is not supported".to_string(),
                ));
            }
            infer_gather(&inputs[0], &inputs[1], &inputs[2]).map(single)
        }
        Op::Add | Op::Less | Op::LogicalAnd => {
            expect_inputs(op, inputs, 2)?;
            let shape = broadcast_shape(&inputs[0].info.shape, &inputs[1].info.shape)?;
            let element_type = match op {
                Op::Add => inputs[0].info.element_type,
                _ => ElementType::Boolean,
            };
            Ok(single(TensorInfo::new(element_type, shape)))
        }
        Op::ShapeOf => {
            expect_inputs(op, inputs, 1)?;
            let rank = match inputs[0].info.shape.rank() {
                Some(r) => Dimension::Static(r),
                None => Dimension::Dynamic,
            };
            Ok(single(TensorInfo::new(
                ElementType::I64,
                PartialShape::new(vec![rank]),
            )))
        }
        Op::Broadcast => {
            expect_inputs(op, inputs, 2)?;
            infer_broadcast(&inputs[0], &inputs[1]).map(single)
        }
        Op::Concat { axis } => infer_concat(inputs, *axis).map(single),
        Op::Range => {
            expect_inputs(op, inputs, 3)?;
            infer_range(inputs).map(single)
        }
        Op::LstmCell(attrs) => {
            expect_inputs(op, inputs, 6)?;
            let state = cell_state(attrs, inputs)?;
            Ok(smallvec![state.clone(), state])
        }
        Op::RnnCell(attrs) | Op::GruCell { attrs, .. } => {
            expect_inputs(op, inputs, 5)?;
            cell_state(attrs, inputs).map(single)
        }
        Op::LstmSequence(attrs) => {
            expect_inputs(op, inputs, 7)?;
            let (y, state) = sequence_outputs(attrs, inputs)?;
            Ok(smallvec![y, state.clone(), state])
        }
        Op::RnnSequence(attrs) | Op::GruSequence { attrs, .. } => {
            expect_inputs(op, inputs, 6)?;
            let (y, state) = sequence_outputs(attrs, inputs)?;
            Ok(smallvec![y, state])
        }
    }
}

fn infer_transpose(data: &InputFact, order: &InputFact) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    let dims = match data.info.shape.dims() {
        Some(d) => d,
        None => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
    };
    let rank = dims.len();

    let perm: Vec<usize> = match const_i64(order)? {
        Some(order) if order.is_empty() => (0..rank).rev().collect(),
        Some(order) => {
            if order.len() != rank {
                return Err(TransformError::ShapeInferenceFailed(format!(
                    "Transpose order {:?} does not match rank {}",
                    order, rank
                )));
            }
            let perm = normalize_axes(&order, rank)?;
            let mut seen = vec![false; rank];
            for &p in &perm {
                if std::mem::replace(&mut seen[p], true) {
                    return Err(TransformError::ShapeInferenceFailed(format!(
                        "Transpose order {:?} repeats an axis",
                        order
                    )));
                }
            }
            perm
        }
        None => {
            return Ok(TensorInfo::new(
                element_type,
                PartialShape::dynamic_of_rank(rank),
            ))
        }
    };

    Ok(TensorInfo::new(
        element_type,
        PartialShape::new(perm.iter().map(|&p| dims[p]).collect()),
    ))
}

fn infer_reshape(data: &InputFact, pattern: &InputFact, special_zero: bool) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    let pattern = match const_i64(pattern)? {
        Some(p) => p,
        None => {
            let shape = match pattern.info.shape.to_static().as_deref() {
                Some(&[n]) => PartialShape::dynamic_of_rank(n),
                _ => PartialShape::dynamic(),
            };
            return Ok(TensorInfo::new(element_type, shape));
        }
    };

    let mut out = Vec::with_capacity(pattern.len());
    let mut infer_at = None;
    for (i, &v) in pattern.iter().enumerate() {
        let dim = match v {
            0 if special_zero => data.info.shape.dim(i),
            -1 => {
                if infer_at.replace(i).is_some() {
                    return Err(TransformError::ShapeInferenceFailed(
                        "Reshape pattern has more than one -1".to_string(),
                    ));
                }
                Dimension::Dynamic
            }
            v if v >= 0 => Dimension::Static(v as usize),
            v => {
                return Err(TransformError::ShapeInferenceFailed(format!(
                    "Invalid reshape value {}",
                    v
                )))
            }
        };
        out.push(dim);
    }

    let input_total = data.info.shape.to_static().map(|s| s.iter().product::<usize>());
    let known: Option<usize> = out
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != infer_at)
        .map(|(_, d)| d.get_static())
        .product();

    match (infer_at, input_total, known) {
        (Some(i), Some(total), Some(known)) => {
            if known == 0 || total % known != 0 {
                return Err(TransformError::ShapeInferenceFailed(format!(
                    "Cannot reshape {} elements with pattern {:?}",
                    total, pattern
                )));
            }
            out[i] = Dimension::Static(total / known);
        }
        (None, Some(total), Some(known)) if total != known => {
            return Err(TransformError::ShapeInferenceFailed(format!(
                "Cannot reshape {} elements into {} elements",
                total, known
            )));
        }
        _ => {}
    }

    Ok(TensorInfo::new(element_type, PartialShape::new(out)))
}

fn infer_squeeze(data: &InputFact, axes: Option<&InputFact>) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    let dims = match data.info.shape.dims() {
        Some(d) => d,
        None => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
    };

    let axes = match axes {
        Some(fact) => match const_i64(fact)? {
            Some(a) => normalize_axes(&a, dims.len())?,
            None => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
        },
        None => {
            if dims.iter().any(|d| !d.is_static()) {
                return Ok(TensorInfo::new(element_type, PartialShape::dynamic()));
            }
            (0..dims.len())
                .filter(|&i| dims[i] == Dimension::Static(1))
                .collect()
        }
    };

    for &a in &axes {
        if !dims[a].compatible(Dimension::Static(1)) {
            return Err(TransformError::ShapeInferenceFailed(format!(
                "Cannot squeeze axis {} of {}",
                a, data.info.shape
            )));
        }
    }

    let out = dims
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, d)| *d)
        .collect();
    Ok(TensorInfo::new(element_type, PartialShape::new(out)))
}

fn infer_unsqueeze(data: &InputFact, axes: &InputFact) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    let (dims, axes) = match (data.info.shape.dims(), const_i64(axes)?) {
        (Some(d), Some(a)) => (d, a),
        _ => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
    };

    let out_rank = dims.len() + axes.len();
    let axes = normalize_axes(&axes, out_rank)?;
    let mut rest = dims.iter();
    let out = (0..out_rank)
        .map(|i| {
            if axes.contains(&i) {
                Dimension::Static(1)
            } else {
                rest.next().copied().unwrap_or(Dimension::Dynamic)
            }
        })
        .collect();
    Ok(TensorInfo::new(element_type, PartialShape::new(out)))
}

fn infer_gather(data: &InputFact, indices: &InputFact, axis: &InputFact) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    let axis = match const_i64(axis)?.as_deref() {
        Some(&[a]) => a,
        _ => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
    };
    let (dims, index_dims) = match (data.info.shape.dims(), indices.info.shape.dims()) {
        (Some(d), Some(i)) => (d, i),
        _ => return Ok(TensorInfo::new(element_type, PartialShape::dynamic())),
    };
    let axis = normalize_axis(axis, dims.len())?;

    let mut out = dims[..axis].to_vec();
    out.extend_from_slice(index_dims);
    out.extend_from_slice(&dims[axis + 1..]);
    Ok(TensorInfo::new(element_type, PartialShape::new(out)))
}

fn infer_broadcast(data: &InputFact, target: &InputFact) -> GraphResult<TensorInfo> {
    let element_type = data.info.element_type;
    match const_i64(target)? {
        Some(target) => {
            let target = PartialShape::new(
                target
                    .iter()
                    .map(|&d| Dimension::Static(d.max(0) as usize))
                    .collect(),
            );
            let shape = broadcast_shape(&data.info.shape, &target)?;
            Ok(TensorInfo::new(element_type, shape))
        }
        None => {
            let shape = match target.info.shape.to_static().as_deref() {
                Some(&[n]) => {
                    let rank = data.info.shape.rank().map_or(n, |r| r.max(n));
                    PartialShape::dynamic_of_rank(rank)
                }
                _ => PartialShape::dynamic(),
            };
            Ok(TensorInfo::new(element_type, shape))
        }
    }
}

fn infer_concat(inputs: &[InputFact], axis: i64) -> GraphResult<TensorInfo> {
    let first = inputs
        .first()
        .ok_or_else(|| TransformError::InvalidNode("Concat expects inputs".to_string()))?;
    let element_type = first.info.element_type;

    let ranked: Vec<&[Dimension]> = inputs.iter().filter_map(|f| f.info.shape.dims()).collect();
    if ranked.len() != inputs.len() {
        return Ok(TensorInfo::new(element_type, PartialShape::dynamic()));
    }
    let rank = ranked[0].len();
    if ranked.iter().any(|d| d.len() != rank) {
        return Err(TransformError::ShapeInferenceFailed(
            "Concat inputs have different ranks".to_string(),
        ));
    }
    let axis = normalize_axis(axis, rank)?;

    let mut out = ranked[0].to_vec();
    for dims in &ranked[1..] {
        for (i, d) in dims.iter().enumerate() {
            if i == axis {
                out[i] = match (out[i], *d) {
                    (Dimension::Static(a), Dimension::Static(b)) => Dimension::Static(a + b),
                    _ => Dimension::Dynamic,
                };
            } else if out[i].compatible(*d) {
                out[i] = out[i].merge(*d);
            } else {
                return Err(TransformError::ShapeInferenceFailed(format!(
                    "Concat inputs disagree on axis {}",
                    i
                )));
            }
        }
    }
    Ok(TensorInfo::new(element_type, PartialShape::new(out)))
}

fn infer_range(inputs: &[InputFact]) -> GraphResult<TensorInfo> {
    let element_type = inputs[0].info.element_type;
    let scalar = |f: &InputFact| -> GraphResult<Option<i64>> {
        Ok(match const_i64(f)?.as_deref() {
            Some(&[v]) => Some(v),
            _ => None,
        })
    };
    let len = match (scalar(&inputs[0])?, scalar(&inputs[1])?, scalar(&inputs[2])?) {
        (_, _, Some(0)) => {
            return Err(TransformError::ShapeInferenceFailed(
                "Range step is zero".to_string(),
            ))
        }
        (Some(start), Some(stop), Some(step)) => {
            let span = stop - start;
            let count = (span + step - step.signum()) / step;
            Dimension::Static(count.max(0) as usize)
        }
        _ => Dimension::Dynamic,
    };
    Ok(TensorInfo::new(element_type, PartialShape::new(vec![len])))
}

fn check_attrs(cell: &CellAttrs) -> GraphResult<()> {
    if cell.hidden_size == 0 {
        return Err(TransformError::InvalidNode(
            "hidden_size must be positive".to_string(),
        ));
    }
    if let Some(name) = cell.unknown_activation() {
        return Err(TransformError::InvalidNode(format!(
            "Unsupported activation: {}",
            name
        )));
    }
    if cell.clip < 0.0 {
        return Err(TransformError::InvalidNode(
            "clip must be non-negative".to_string(),
        ));
    }
    Ok(())
}

/// `[batch, hidden]` for a cell with inputs `X, H, ...`
fn cell_state(attrs: &CellAttrs, inputs: &[InputFact]) -> GraphResult<TensorInfo> {
    check_attrs(attrs)?;
    let x = &inputs[0].info.shape;
    let h = &inputs[1].info.shape;
    if x.rank().is_some_and(|r| r != 2) || h.rank().is_some_and(|r| r != 2) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "Cell expects rank-2 X and H, got {} and {}",
            x, h
        )));
    }
    let batch = x.dim(0);
    if !batch.compatible(h.dim(0)) || !h.dim(1).compatible(Dimension::Static(attrs.hidden_size)) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "Cell state {} does not match batch {} / hidden_size {}",
            h, batch, attrs.hidden_size
        )));
    }
    Ok(TensorInfo::new(
        inputs[0].info.element_type,
        PartialShape::new(vec![batch.merge(h.dim(0)), Dimension::Static(attrs.hidden_size)]),
    ))
}

/// `Y = [batch, dirs, seq, hidden]` and state `[batch, dirs, hidden]`
fn sequence_outputs(attrs: &SequenceAttrs, inputs: &[InputFact]) -> GraphResult<(TensorInfo, TensorInfo)> {
    check_attrs(&attrs.cell)?;
    let x = &inputs[0].info.shape;
    let h = &inputs[1].info.shape;
    if x.rank().is_some_and(|r| r != 3) || h.rank().is_some_and(|r| r != 3) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "Sequence expects rank-3 X and H0, got {} and {}",
            x, h
        )));
    }

    let dirs = Dimension::Static(attrs.num_directions());
    let hidden = Dimension::Static(attrs.cell.hidden_size);
    if !h.dim(1).compatible(dirs) || !h.dim(2).compatible(hidden) || !x.dim(0).compatible(h.dim(0)) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "Initial state {} does not match direction {} / hidden_size {}",
            h, attrs.direction, attrs.cell.hidden_size
        )));
    }

    let batch = x.dim(0).merge(h.dim(0));
    let element_type = inputs[0].info.element_type;
    let y = TensorInfo::new(
        element_type,
        PartialShape::new(vec![batch, dirs, x.dim(1), hidden]),
    );
    let state = TensorInfo::new(element_type, PartialShape::new(vec![batch, dirs, hidden]));
    Ok((y, state))
}
