//! Constant tensor storage
//!
//! Constant payloads are kept as ndarray arrays. Only the element types the
//! rewrites need are supported: f32 weights, i32/i64 indices and shapes,
//! and booleans for loop conditions.

use ndarray::{concatenate, Array, ArrayD, Axis, IxDyn};

use crate::error::{GraphResult, TransformError};

use super::dtype::ElementType;
use super::shape::numel;

/// Typed constant payload
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    Bool(ArrayD<bool>),
}

/// Apply the same array expression to every variant
macro_rules! map_array {
    ($data:expr, |$a:ident| $body:expr) => {
        match $data {
            TensorData::F32($a) => TensorData::F32($body),
            TensorData::I32($a) => TensorData::I32($body),
            TensorData::I64($a) => TensorData::I64($body),
            TensorData::Bool($a) => TensorData::Bool($body),
        }
    };
}

/// Evaluate an expression against the array of any variant
macro_rules! with_array {
    ($data:expr, |$a:ident| $body:expr) => {
        match $data {
            TensorData::F32($a) => $body,
            TensorData::I32($a) => $body,
            TensorData::I64($a) => $body,
            TensorData::Bool($a) => $body,
        }
    };
}

fn build<T>(shape: &[usize], data: Vec<T>) -> GraphResult<ArrayD<T>> {
    if data.len() != numel(shape) {
        return Err(TransformError::ShapeInferenceFailed(format!(
            "Data length {} does not match shape {:?}",
            data.len(),
            shape
        )));
    }
    Array::from_shape_vec(IxDyn(shape), data).map_err(|e| TransformError::Internal(e.to_string()))
}

fn reshape_array<T: Clone>(array: &ArrayD<T>, shape: &[usize]) -> GraphResult<ArrayD<T>> {
    build(shape, array.iter().cloned().collect())
}

impl TensorData {
    /// Create i64 tensor from shape and row-major data
    pub fn from_i64(shape: &[usize], data: Vec<i64>) -> GraphResult<Self> {
        Ok(TensorData::I64(build(shape, data)?))
    }

    pub fn scalar_i64(value: i64) -> Self {
        TensorData::I64(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn scalar_bool(value: bool) -> Self {
        TensorData::Bool(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Create 1D i64 tensor from slice
    pub fn vec_i64(data: &[i64]) -> Self {
        TensorData::I64(ArrayD::from_shape_fn(IxDyn(&[data.len()]), |ix| data[ix[0]]))
    }

    /// Create 1D i32 tensor from slice
    pub fn vec_i32(data: &[i32]) -> Self {
        TensorData::I32(ArrayD::from_shape_fn(IxDyn(&[data.len()]), |ix| data[ix[0]]))
    }

    /// Create f32 tensor filled with zeros
    pub fn zeros_f32(shape: &[usize]) -> Self {
        TensorData::F32(ArrayD::zeros(IxDyn(shape)))
    }

    /// Create f32 tensor filled with one value
    pub fn filled_f32(shape: &[usize], value: f32) -> Self {
        TensorData::F32(ArrayD::from_elem(IxDyn(shape), value))
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::F32,
            TensorData::I32(_) => ElementType::I32,
            TensorData::I64(_) => ElementType::I64,
            TensorData::Bool(_) => ElementType::Boolean,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, |a| a.shape())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        with_array!(self, |a| a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Integer contents widened to i64, in row-major order
    pub fn to_i64_vec(&self) -> GraphResult<Vec<i64>> {
        match self {
            TensorData::I64(a) => Ok(a.iter().copied().collect()),
            TensorData::I32(a) => Ok(a.iter().map(|&v| v as i64).collect()),
            other => Err(TransformError::InvalidDataType(format!(
                "expected integer tensor, got {}",
                other.element_type()
            ))),
        }
    }

    /// Contents widened to f64, in row-major order
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TensorData::F32(a) => a.iter().map(|&v| v as f64).collect(),
            TensorData::I32(a) => a.iter().map(|&v| v as f64).collect(),
            TensorData::I64(a) => a.iter().map(|&v| v as f64).collect(),
            TensorData::Bool(a) => a.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// The value shared by every element, if all elements are equal
    ///
    /// Layout independent: a `[1, 4]` tensor of zeros and a scalar zero both
    /// report `Some(0.0)`. Empty tensors report `None`.
    pub fn single_value(&self) -> Option<f64> {
        let values = self.to_f64_vec();
        let first = *values.first()?;
        values.iter().all(|&v| v == first).then_some(first)
    }

    /// Same data with a new static shape
    pub fn reshaped(&self, shape: &[usize]) -> GraphResult<Self> {
        Ok(map_array!(self, |a| reshape_array(a, shape)?))
    }

    /// Axes permuted, materialized in row-major order
    pub fn permuted(&self, order: &[usize]) -> GraphResult<Self> {
        if order.len() != self.rank() {
            return Err(TransformError::InvalidNode(format!(
                "Permutation {:?} does not match rank {}",
                order,
                self.rank()
            )));
        }
        Ok(map_array!(self, |a| {
            let view = a.view().permuted_axes(IxDyn(order));
            build(view.shape(), view.iter().cloned().collect())?
        }))
    }

    /// Gather along `axis` with the given (already normalized) indices
    ///
    /// `indices_shape` replaces the gathered axis in the output shape.
    pub fn gather(&self, indices: &[usize], indices_shape: &[usize], axis: usize) -> GraphResult<Self> {
        let dim = self.shape().get(axis).copied().ok_or_else(|| {
            TransformError::InvalidNode(format!("Gather axis {} out of range", axis))
        })?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= dim) {
            return Err(TransformError::InvalidNode(format!(
                "Gather index {} out of range for dim {}",
                bad, dim
            )));
        }
        let mut out_shape: Vec<usize> = self.shape()[..axis].to_vec();
        out_shape.extend_from_slice(indices_shape);
        out_shape.extend_from_slice(&self.shape()[axis + 1..]);
        Ok(map_array!(self, |a| {
            let selected = a.select(Axis(axis), indices);
            reshape_array(&selected, &out_shape)?
        }))
    }

    /// Concatenate tensors of the same element type along `axis`
    pub fn concat(parts: &[&TensorData], axis: usize) -> GraphResult<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TransformError::InvalidNode("Concat of zero tensors".to_string()))?;
        let mismatch = || TransformError::InvalidDataType("Concat of mixed element types".to_string());
        let join_err = |e: ndarray::ShapeError| TransformError::ShapeInferenceFailed(e.to_string());

        match first {
            TensorData::F32(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        TensorData::F32(a) => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                Ok(TensorData::F32(concatenate(Axis(axis), &views).map_err(join_err)?))
            }
            TensorData::I32(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        TensorData::I32(a) => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                Ok(TensorData::I32(concatenate(Axis(axis), &views).map_err(join_err)?))
            }
            TensorData::I64(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        TensorData::I64(a) => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                Ok(TensorData::I64(concatenate(Axis(axis), &views).map_err(join_err)?))
            }
            TensorData::Bool(_) => {
                let views = parts
                    .iter()
                    .map(|p| match p {
                        TensorData::Bool(a) => Ok(a.view()),
                        _ => Err(mismatch()),
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                Ok(TensorData::Bool(concatenate(Axis(axis), &views).map_err(join_err)?))
            }
        }
    }

    /// Numpy-style broadcast to a static target shape
    pub fn broadcast_to(&self, target: &[usize]) -> GraphResult<Self> {
        let fail = || {
            TransformError::ShapeInferenceFailed(format!(
                "Cannot broadcast {:?} to {:?}",
                self.shape(),
                target
            ))
        };
        Ok(map_array!(self, |a| {
            let view = a.broadcast(IxDyn(target)).ok_or_else(fail)?;
            build(target, view.iter().cloned().collect())?
        }))
    }
}
