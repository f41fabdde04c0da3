//! Constant evaluation of shape-computing ops
//!
//! Only the ops that rewrites use to build shape and length tensors are
//! evaluated: `ShapeOf` over a static shape, index selection, broadcasting,
//! concatenation and the layout ops.

use crate::error::{GraphResult, TransformError};
use crate::opset::{infer_outputs, InputFact, Op, OpType};
use crate::tensor::{normalize_axes, normalize_axis, TensorData};

/// Check if an op kind can be evaluated by [`evaluate`]
pub fn is_foldable(op_type: OpType) -> bool {
    matches!(
        op_type,
        OpType::Constant
            | OpType::ShapeOf
            | OpType::Gather
            | OpType::Broadcast
            | OpType::Concat
            | OpType::Unsqueeze
            | OpType::Squeeze
            | OpType::Reshape
            | OpType::Transpose
    )
}

/// Evaluate `op` if every input it needs is known
///
/// `ShapeOf` only needs a static input shape; the other ops need every input
/// value.
pub fn evaluate(op: &Op, inputs: &[InputFact]) -> Option<TensorData> {
    match op {
        Op::Constant(data) => Some(data.clone()),
        Op::ShapeOf => {
            let dims = inputs.first()?.info.shape.to_static()?;
            let dims: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
            Some(TensorData::vec_i64(&dims))
        }
        op if is_foldable(op.op_type()) => {
            let values: Vec<&TensorData> = inputs.iter().map(|f| f.value).collect::<Option<_>>()?;
            match compute(op, inputs, &values) {
                Ok(data) => Some(data),
                Err(e) => {
                    log::trace!("not folding {}: {}", op.name(), e);
                    None
                }
            }
        }
        _ => None,
    }
}

fn compute(op: &Op, inputs: &[InputFact], values: &[&TensorData]) -> GraphResult<TensorData> {
    let data = values
        .first()
        .ok_or_else(|| TransformError::InvalidNode(format!("{} has no inputs", op.name())))?;

    match op {
        Op::Transpose => {
            let order = input(values, 1)?.to_i64_vec()?;
            let perm = if order.is_empty() {
                (0..data.rank()).rev().collect()
            } else {
                normalize_axes(&order, data.rank())?
            };
            data.permuted(&perm)
        }
        Op::Gather { .. } => {
            let indices = input(values, 1)?;
            let axis = match input(values, 2)?.to_i64_vec()?.as_slice() {
                &[a] => normalize_axis(a, data.rank())?,
                other => {
                    return Err(TransformError::InvalidNode(format!(
                        "Gather axis must be a single value, got {:?}",
                        other
                    )))
                }
            };
            let dim = data.shape()[axis] as i64;
            let positions = indices
                .to_i64_vec()?
                .into_iter()
                .map(|i| {
                    let i = if i < 0 { i + dim } else { i };
                    if i < 0 {
                        Err(TransformError::InvalidNode(format!(
                            "Gather index out of range for dim {}",
                            dim
                        )))
                    } else {
                        Ok(i as usize)
                    }
                })
                .collect::<GraphResult<Vec<_>>>()?;
            data.gather(&positions, indices.shape(), axis)
        }
        Op::Concat { axis } => {
            let axis = normalize_axis(*axis, data.rank())?;
            TensorData::concat(values, axis)
        }
        Op::Reshape { .. } | Op::Squeeze | Op::Unsqueeze | Op::Broadcast => {
            let outputs = infer_outputs(op, inputs)?;
            let shape = outputs
                .first()
                .and_then(|info| info.shape.to_static())
                .ok_or_else(|| {
                    TransformError::ShapeInferenceFailed(format!(
                        "{} output shape is not static",
                        op.name()
                    ))
                })?;
            if matches!(op, Op::Broadcast) {
                data.broadcast_to(&shape)
            } else {
                data.reshaped(&shape)
            }
        }
        other => Err(TransformError::InvalidNode(format!(
            "{} cannot be evaluated",
            other.name()
        ))),
    }
}

fn input<'a>(values: &[&'a TensorData], index: usize) -> GraphResult<&'a TensorData> {
    values
        .get(index)
        .copied()
        .ok_or_else(|| TransformError::InvalidNode(format!("missing input {}", index)))
}
