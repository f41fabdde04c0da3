//! Common operation groups used by the rewrite patterns

use crate::opset::OpType;

/// Ops that can drop a unit axis
pub const SQUEEZE_LIKE: &[OpType] = &[OpType::Reshape, OpType::Squeeze];

/// Ops that can insert a unit axis
pub const UNSQUEEZE_LIKE: &[OpType] = &[OpType::Reshape, OpType::Unsqueeze];

/// Ops that can reorder axes
pub const PERMUTE_LIKE: &[OpType] = &[OpType::Transpose, OpType::Reshape];
