//! Common utilities for transformers
//!
//! Shared helper functions and types used across the recurrent passes.

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::{InputDescription, OpType, SubGraphOp};
use crate::tensor::{normalize_axes, Dimension, PartialShape, TensorData};
use crate::transform::{NodeRegistry, TransformStats};

/// Decline the current match, giving the reason
pub fn decline<T>(reason: impl Into<String>) -> GraphResult<T> {
    Err(TransformError::PatternNotMatched(reason.into()))
}

// ============================================================================
// Constant inspection
// ============================================================================

/// Value of a one-element integer constant, widened to i64
pub fn scalar_const_i64(ctx: &GraphContext, value: Output) -> Option<i64> {
    match const_i64_vec(ctx, value)?.as_slice() {
        &[v] => Some(v),
        _ => None,
    }
}

/// Contents of an integer constant, widened to i64
pub fn const_i64_vec(ctx: &GraphContext, value: Output) -> Option<Vec<i64>> {
    ctx.constant_value(value)?.to_i64_vec().ok()
}

/// Check if a value is a constant whose every element is zero
pub fn is_zero_const(ctx: &GraphContext, value: Output) -> bool {
    ctx.constant_value(value)
        .and_then(TensorData::single_value)
        .is_some_and(|v| v == 0.0)
}

// ============================================================================
// Permutations
// ============================================================================

/// Permutation of a `Transpose` with a constant order, validated for `rank`
pub fn const_permutation(ctx: &GraphContext, order: Output, rank: usize) -> Option<Vec<usize>> {
    let order = const_i64_vec(ctx, order)?;
    let perm: Vec<usize> = if order.is_empty() {
        (0..rank).rev().collect()
    } else {
        normalize_axes(&order, rank).ok()?
    };
    is_permutation(&perm, rank).then_some(perm)
}

fn is_permutation(perm: &[usize], rank: usize) -> bool {
    let mut seen = vec![false; rank];
    perm.len() == rank && perm.iter().all(|&p| p < rank && !std::mem::replace(&mut seen[p], true))
}

/// Interpret a `Reshape` between two static shapes as an axis permutation
///
/// The shapes must have the same rank and list the same non-unit dims in
/// the same order, so that only unit axes move. The result `p` satisfies
/// `output[i] == input[p[i]]`; unit dims are assigned in order.
pub fn reshape_as_permutation(input: &PartialShape, output: &PartialShape) -> Option<Vec<usize>> {
    let input = input.to_static()?;
    let output = output.to_static()?;
    if input.len() != output.len() {
        return None;
    }

    let mut units = input.iter().enumerate().filter(|&(_, &d)| d == 1).map(|(j, _)| j);
    let mut others = input.iter().enumerate().filter(|&(_, &d)| d != 1).map(|(j, _)| j);
    let mut perm = Vec::with_capacity(output.len());
    for &dim in &output {
        let j = if dim == 1 { units.next()? } else { others.next()? };
        if input[j] != dim {
            return None;
        }
        perm.push(j);
    }
    Some(perm)
}

/// Permutation applied by a layout node (`Transpose`, or a `Reshape` that
/// only moves unit axes)
pub fn layout_permutation(ctx: &GraphContext, node: NodeId) -> Option<Vec<usize>> {
    let node = ctx.try_node(node)?;
    let data = node.input(0)?;
    match node.op_type() {
        OpType::Transpose => {
            let rank = ctx.rank(data)?;
            const_permutation(ctx, node.input(1)?, rank)
        }
        OpType::Reshape => {
            reshape_as_permutation(ctx.partial_shape(data).ok()?, ctx.partial_shape(node.output(0)).ok()?)
        }
        _ => None,
    }
}

/// Permutation equivalent to applying `first`, then `second`
///
/// With `y[i] = x[first[i]]` and `z[k] = y[second[k]]`, the result `c`
/// satisfies `z[k] = x[c[k]]`.
pub fn compose_permutations(first: &[usize], second: &[usize]) -> Vec<usize> {
    second.iter().map(|&s| first[s]).collect()
}

pub fn is_identity(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, &p)| i == p)
}

/// Permutation as an i32 constant payload
pub fn permutation_data(perm: &[usize]) -> TensorData {
    let order: Vec<i32> = perm.iter().map(|&p| p as i32).collect();
    TensorData::vec_i32(&order)
}

/// `dims` of `shape` reordered by `perm`
pub fn permute_shape(shape: &PartialShape, perm: &[usize]) -> PartialShape {
    PartialShape::new(perm.iter().map(|&p| shape.dim(p)).collect())
}

/// Check `a` and `b` agree dimension by dimension
pub fn dims_compatible(a: &[Dimension], b: &[Dimension]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible(*y))
}

// ============================================================================
// Body values
// ============================================================================

/// Make a body value available in the outer graph
///
/// Body constants are staged as fresh outer constants carrying the body
/// node's friendly name. A body `Parameter` fed through an invariant input
/// description resolves to the outer input. Anything else cannot be lifted.
pub fn lift_body_value(
    reg: &mut NodeRegistry,
    outer: &GraphContext,
    owner: NodeId,
    sub: &SubGraphOp,
    value: Output,
) -> GraphResult<Option<Output>> {
    let node = sub.body.node(value.node)?;
    if let Some(data) = node.op.as_constant() {
        let name = node.friendly_name.clone();
        let lifted = reg.constant(data.clone());
        reg.set_friendly_name(lifted.node, name)?;
        return Ok(Some(lifted));
    }

    if node.is_type(OpType::Parameter) {
        if let Some(InputDescription::Invariant { input_index, .. }) = sub.input_description_for(value.node) {
            return Ok(outer.node(owner)?.input(*input_index));
        }
    }
    Ok(None)
}

// ============================================================================
// Statistics
// ============================================================================

/// Transformation result for statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransformResult {
    /// Number of candidate roots examined
    pub patterns_matched: usize,
    /// Number of transformations applied
    pub transforms_applied: usize,
    /// Number of nodes eliminated
    pub nodes_eliminated: usize,
    /// Names of transformed nodes
    pub transformed_nodes: Vec<String>,
}

impl TransformResult {
    /// Create empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge with another result
    pub fn merge(&mut self, other: TransformResult) {
        self.patterns_matched += other.patterns_matched;
        self.transforms_applied += other.transforms_applied;
        self.nodes_eliminated += other.nodes_eliminated;
        self.transformed_nodes.extend(other.transformed_nodes);
    }

    /// Whether at least one match was rewritten
    pub fn changed(&self) -> bool {
        self.transforms_applied > 0
    }
}

impl From<TransformStats> for TransformResult {
    fn from(stats: TransformStats) -> Self {
        Self {
            patterns_matched: stats.patterns_matched,
            transforms_applied: stats.transforms_applied,
            nodes_eliminated: stats.nodes_eliminated,
            transformed_nodes: stats.transformed_nodes,
        }
    }
}

// ============================================================================
// Transformer trait
// ============================================================================

/// Trait for individual graph passes
pub trait GraphTransformer {
    /// Name of the transformer
    fn name(&self) -> &'static str;

    /// Apply the transformation in place
    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult>;

    /// Check if this transformer is applicable to the graph
    fn is_applicable(&self, _ctx: &GraphContext) -> bool {
        true
    }
}

/// Run multiple transformers in sequence
pub fn run_transformers(
    ctx: &mut GraphContext,
    transformers: &[&dyn GraphTransformer],
) -> GraphResult<TransformResult> {
    let mut total = TransformResult::new();

    for transformer in transformers {
        if transformer.is_applicable(ctx) {
            let result = transformer.transform(ctx)?;
            log::debug!(
                "{}: {} rewrites, {} nodes eliminated",
                transformer.name(),
                result.transforms_applied,
                result.nodes_eliminated
            );
            total.merge(result);
        }
    }

    Ok(total)
}
