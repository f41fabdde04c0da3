//! Tensor utilities for graph values
//!
//! This module provides the value-level vocabulary of the IR:
//! - Element types (`dtype`)
//! - Dimensions, partial shapes and tensor descriptors (`shape`)
//! - Constant tensor storage backed by ndarray (`convert`)
//!
//! # Example
//!
//! ```
//! use sequence_lowering::tensor::{Dimension, PartialShape, TensorData};
//!
//! let shape = PartialShape::new(vec![Dimension::Dynamic, 4.into()]);
//! assert!(shape.compatible(&PartialShape::from_static(&[2, 4])));
//!
//! let perm = TensorData::vec_i64(&[1, 0, 2]);
//! assert_eq!(perm.to_i64_vec().unwrap(), vec![1, 0, 2]);
//! ```

pub mod convert;
pub mod dtype;
pub mod shape;

// Re-export commonly used items
pub use convert::TensorData;
pub use dtype::ElementType;
pub use shape::{
    broadcast_shape, normalize_axes, normalize_axis, numel, Dimension, PartialShape, TensorInfo,
};
