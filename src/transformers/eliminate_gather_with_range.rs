//! Gather-with-Range elimination
//!
//! Removes a `Gather` that reads every index of one axis in order:
//!
//! ```text
//! data -> ShapeOf -> Gather(idx) -> Gather(k) -> Reshape(scalar)
//!                                                     |
//!                          Range(0, len, 1) <---------+
//!                               |
//! data ----------------------> Gather(axis = idx[k]) -> ...
//! ```
//!
//! Such a gather is the identity, so consumers read `data` directly.

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::OpType;
use crate::pattern::{Label, MatchResult, Pattern, Predicate};
use crate::tensor::normalize_axis;
use crate::transform::{TransformConfig, TransformEngine};
use crate::transformers::common::{
    const_i64_vec, decline, scalar_const_i64, GraphTransformer, TransformResult,
};

struct GatherRangePattern {
    pattern: Pattern,
    root: Label,
    data: Label,
    dims_index: Label,
    dims_axis: Label,
    dim_index: Label,
    dim_axis: Label,
    length: Label,
    start: Label,
    step: Label,
    axis: Label,
}

impl GatherRangePattern {
    fn new() -> Self {
        let mut p = Pattern::new();
        let data = p.any_input_with(&[Predicate::RankEquals(3)]);
        let shape = p.wrap(&[OpType::ShapeOf], &[data]);
        let dims_index = p.constant();
        let dims_axis = p.constant();
        let dims = p.wrap(&[OpType::Gather], &[shape, dims_index, dims_axis]);
        let dim_index = p.constant();
        let dim_axis = p.constant();
        let dim = p.wrap(&[OpType::Gather], &[dims, dim_index, dim_axis]);
        let scalar_shape = p.constant();
        let length = p.wrap(&[OpType::Reshape], &[dim, scalar_shape]);
        let start = p.constant();
        let step = p.constant();
        let range = p.wrap(&[OpType::Range], &[start, length, step]);
        let axis = p.constant();
        let root = p.wrap(&[OpType::Gather], &[data, range, axis]);

        Self {
            pattern: p,
            root,
            data,
            dims_index,
            dims_axis,
            dim_index,
            dim_axis,
            length,
            start,
            step,
            axis,
        }
    }
}

fn bound(m: &MatchResult, label: Label) -> GraphResult<Output> {
    m.get(label)
        .ok_or_else(|| TransformError::Internal("pattern label left unbound".to_string()))
}

// Not gated by the transformation callback
fn eliminate_gather(ctx: &mut GraphContext, root: NodeId, p: &GatherRangePattern) -> GraphResult<bool> {
    let m = match p.pattern.matcher(p.root).match_node(ctx, root) {
        Some(m) => m,
        None => return Ok(false),
    };

    let dims = match const_i64_vec(ctx, bound(&m, p.dims_index)?) {
        Some(dims) if dims.len() == 3 => dims,
        _ => return decline("shape gather must pick three dims"),
    };
    if scalar_const_i64(ctx, bound(&m, p.dims_axis)?) != Some(0)
        || scalar_const_i64(ctx, bound(&m, p.dim_axis)?) != Some(0)
    {
        return decline("shape gathers must run along axis 0");
    }
    let dim = match scalar_const_i64(ctx, bound(&m, p.dim_index)?).map(|k| normalize_axis(k, 3)) {
        Some(Ok(k)) => dims[k],
        _ => return decline("dim index out of range"),
    };

    if ctx.partial_shape(bound(&m, p.length)?)?.rank() != Some(0) {
        return decline("range length is not a scalar");
    }
    if scalar_const_i64(ctx, bound(&m, p.start)?) != Some(0)
        || scalar_const_i64(ctx, bound(&m, p.step)?) != Some(1)
    {
        return decline("range must start at 0 with step 1");
    }

    let axis = scalar_const_i64(ctx, bound(&m, p.axis)?).and_then(|a| normalize_axis(a, 3).ok());
    let dim = normalize_axis(dim, 3).ok();
    if axis.is_none() || axis != dim {
        return decline("gather axis differs from the ranged dim");
    }

    ctx.replace_output_update_name(root.out(0), bound(&m, p.data)?)
}

/// Removes gathers that select a whole axis through `Range(0, dim, 1)`
#[derive(Debug, Default)]
pub struct EliminateGatherWithRange {
    config: TransformConfig,
}

impl EliminateGatherWithRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl GraphTransformer for EliminateGatherWithRange {
    fn name(&self) -> &'static str {
        "EliminateGatherWithRange"
    }

    fn transform(&self, ctx: &mut GraphContext) -> GraphResult<TransformResult> {
        let pattern = GatherRangePattern::new();
        let mut engine = TransformEngine::new(ctx, &self.config);
        engine.apply(self.name(), &[OpType::Gather], |ctx, id| {
            eliminate_gather(ctx, id, &pattern)
        })?;
        Ok(engine.into_stats().into())
    }

    fn is_applicable(&self, ctx: &GraphContext) -> bool {
        ctx.nodes().any(|n| n.is_type(OpType::Range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::Op;
    use crate::tensor::{ElementType, PartialShape, TensorData};

    /// `data[:, range(0, shape[dims[pick]]), :]` gathered along `axis`
    fn build(dims: &[i64], pick: i64, axis: i64, start: i64) -> (GraphContext, Output, NodeId) {
        let mut ctx = GraphContext::new();
        let data = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 16]));
        let shape = ctx.add_node(Op::ShapeOf, &[data]).unwrap();
        let dims_index = ctx.add_constant(TensorData::vec_i64(dims));
        let zero = ctx.add_constant(TensorData::scalar_i64(0));
        let picked = ctx
            .add_node(Op::Gather { batch_dims: 0 }, &[shape.out(0), dims_index, zero])
            .unwrap();
        let pick = ctx.add_constant(TensorData::scalar_i64(pick));
        let dim = ctx
            .add_node(Op::Gather { batch_dims: 0 }, &[picked.out(0), pick, zero])
            .unwrap();
        let scalar = ctx.add_constant(TensorData::vec_i64(&[]));
        let length = ctx
            .add_node(Op::Reshape { special_zero: false }, &[dim.out(0), scalar])
            .unwrap();
        let start = ctx.add_constant(TensorData::scalar_i64(start));
        let step = ctx.add_constant(TensorData::scalar_i64(1));
        let range = ctx.add_node(Op::Range, &[start, length.out(0), step]).unwrap();
        let axis = ctx.add_constant(TensorData::scalar_i64(axis));
        let gather = ctx
            .add_node(Op::Gather { batch_dims: 0 }, &[data, range.out(0), axis])
            .unwrap();
        (ctx, data, gather)
    }

    fn run(ctx: &mut GraphContext) -> TransformResult {
        EliminateGatherWithRange::new().transform(ctx).unwrap()
    }

    #[test]
    fn test_full_axis_gather_removed() {
        let (mut ctx, data, gather) = build(&[0, 1, 2], 1, 1, 0);
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let consumer = ctx.add_node(Op::Transpose, &[gather.out(0), order]).unwrap();
        ctx.add_result(consumer.out(0)).unwrap();
        ctx.set_friendly_name(gather, "gathered").unwrap();

        let result = run(&mut ctx);
        assert_eq!(result.transforms_applied, 1);
        assert!(!ctx.has_node(gather));
        assert_eq!(ctx.node(consumer).unwrap().input(0), Some(data));
        assert!(ctx.find_nodes_by_type(OpType::Range).is_empty());
    }

    #[test]
    fn test_removed_despite_declining_callback() {
        let (mut ctx, data, gather) = build(&[0, 1, 2], 1, 1, 0);
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let consumer = ctx.add_node(Op::Transpose, &[gather.out(0), order]).unwrap();
        ctx.add_result(consumer.out(0)).unwrap();

        let config = TransformConfig::default().with_callback(|_| true);
        let result = EliminateGatherWithRange::with_config(config)
            .transform(&mut ctx)
            .unwrap();
        assert_eq!(result.transforms_applied, 1);
        assert_eq!(ctx.node(consumer).unwrap().input(0), Some(data));
    }

    #[test]
    fn test_axis_mismatch_kept() {
        let (mut ctx, _, gather) = build(&[0, 1, 2], 1, 2, 0);
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let consumer = ctx.add_node(Op::Transpose, &[gather.out(0), order]).unwrap();
        ctx.add_result(consumer.out(0)).unwrap();

        assert_eq!(run(&mut ctx).transforms_applied, 0);
        assert!(ctx.has_node(gather));
    }

    #[test]
    fn test_nonzero_start_kept() {
        let (mut ctx, _, gather) = build(&[0, 1, 2], 1, 1, 1);
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let consumer = ctx.add_node(Op::Transpose, &[gather.out(0), order]).unwrap();
        ctx.add_result(consumer.out(0)).unwrap();

        assert_eq!(run(&mut ctx).transforms_applied, 0);
        assert!(ctx.has_node(gather));
    }

    #[test]
    fn test_permuted_dims_follow_index() {
        // dims [2, 0, 1], pick 2 -> dim 1
        let (mut ctx, data, gather) = build(&[2, 0, 1], 2, 1, 0);
        let order = ctx.add_constant(TensorData::vec_i64(&[1, 0, 2]));
        let consumer = ctx.add_node(Op::Transpose, &[gather.out(0), order]).unwrap();
        ctx.add_result(consumer.out(0)).unwrap();

        assert_eq!(run(&mut ctx).transforms_applied, 1);
        assert_eq!(ctx.node(consumer).unwrap().input(0), Some(data));
    }

    #[test]
    fn test_graph_output_parameter_kept() {
        let (mut ctx, _, gather) = build(&[0, 1, 2], 1, 1, 0);
        ctx.add_result(gather.out(0)).unwrap();

        assert_eq!(run(&mut ctx).transforms_applied, 0);
        assert!(ctx.has_node(gather));
    }
}
