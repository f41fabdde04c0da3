//! Staging area for nodes created by a rewrite
//!
//! A rewrite builds its replacement subgraph in a [`NodeRegistry`] while the
//! graph stays untouched. Nothing is visible in the graph until
//! [`NodeRegistry::commit`]; dropping the registry discards every staged
//! node, so a rewrite may bail out at any point before committing.

use smallvec::SmallVec;

use crate::error::{GraphResult, TransformError};
use crate::graph::{GraphContext, Node, NodeId, NodeInputs, Output, RuntimeInfo};
use crate::opset::{infer_outputs, InputFact, Op, OpType};
use crate::tensor::{PartialShape, TensorData, TensorInfo};

use super::fold;

/// Nodes staged for insertion into one graph
#[derive(Debug)]
pub struct NodeRegistry {
    /// Id of the first staged node; staged ids are contiguous from here
    base: u32,
    staged: Vec<Node>,
}

impl NodeRegistry {
    /// Start staging nodes for `ctx`
    pub fn new(ctx: &GraphContext) -> Self {
        Self {
            base: ctx.next_id(),
            staged: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Ids of the staged nodes, in creation order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.staged.iter().map(|n| n.id)
    }

    fn staged_index(&self, id: NodeId) -> Option<usize> {
        id.0.checked_sub(self.base)
            .map(|i| i as usize)
            .filter(|&i| i < self.staged.len())
    }

    /// A staged node
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.staged_index(id).map(|i| &self.staged[i])
    }

    /// A staged node, or a node of the graph
    pub fn lookup<'a>(&'a self, ctx: &'a GraphContext, id: NodeId) -> GraphResult<&'a Node> {
        match self.get(id) {
            Some(node) => Ok(node),
            None => ctx.node(id),
        }
    }

    /// Descriptor of a staged or existing value
    pub fn output_info<'a>(&'a self, ctx: &'a GraphContext, value: Output) -> GraphResult<&'a TensorInfo> {
        self.lookup(ctx, value.node)?
            .outputs
            .get(value.index)
            .ok_or_else(|| {
                TransformError::InvalidNode(format!("{} has no output {}", value.node, value.index))
            })
    }

    pub fn partial_shape<'a>(&'a self, ctx: &'a GraphContext, value: Output) -> GraphResult<&'a PartialShape> {
        self.output_info(ctx, value).map(|i| &i.shape)
    }

    fn constant_value<'a>(&'a self, ctx: &'a GraphContext, value: Output) -> Option<&'a TensorData> {
        self.lookup(ctx, value.node).ok()?.op.as_constant()
    }

    // ========================================================================
    // Node creation
    // ========================================================================

    /// Stage a node, inferring its outputs
    pub fn make(&mut self, ctx: &GraphContext, op: Op, inputs: &[Output]) -> GraphResult<NodeId> {
        let outputs = {
            let facts = inputs
                .iter()
                .map(|&v| {
                    Ok(InputFact {
                        info: self.output_info(ctx, v)?,
                        value: self.constant_value(ctx, v),
                    })
                })
                .collect::<GraphResult<Vec<_>>>()?;
            infer_outputs(&op, &facts)?
        };

        let id = NodeId(self.base + self.staged.len() as u32);
        self.staged
            .push(Node::new(id, op, NodeInputs::from_slice(inputs), outputs));
        Ok(id)
    }

    /// Stage a constant
    pub fn constant(&mut self, data: TensorData) -> Output {
        let id = NodeId(self.base + self.staged.len() as u32);
        let info = TensorInfo::new(data.element_type(), PartialShape::from_static(data.shape()));
        self.staged.push(Node::new(
            id,
            Op::Constant(data),
            SmallVec::new(),
            smallvec::smallvec![info],
        ));
        id.out(0)
    }

    /// Stage a node, replacing it with a constant when it evaluates
    ///
    /// Evaluation looks through staged and existing producers, so chains
    /// such as `ShapeOf -> Gather -> Broadcast` over a static shape collapse
    /// into one constant.
    pub fn make_try_fold(&mut self, ctx: &GraphContext, op: Op, inputs: &[Output]) -> GraphResult<Output> {
        let id = self.make(ctx, op, inputs)?;
        match self.fold(ctx, id.out(0)) {
            Some(data) => {
                self.staged.pop();
                Ok(self.constant(data))
            }
            None => Ok(id.out(0)),
        }
    }

    /// Evaluate a staged or existing value, if it is constant-computable
    pub fn fold(&self, ctx: &GraphContext, value: Output) -> Option<TensorData> {
        let node = self.lookup(ctx, value.node).ok()?;
        if value.index != 0 || !fold::is_foldable(node.op_type()) {
            return None;
        }
        if let Some(data) = node.op.as_constant() {
            return Some(data.clone());
        }

        let values: Vec<Option<TensorData>> = if node.is_type(OpType::ShapeOf) {
            vec![None; node.inputs.len()]
        } else {
            node.inputs.iter().map(|&v| self.fold(ctx, v)).collect()
        };
        let infos = node
            .inputs
            .iter()
            .map(|&v| self.output_info(ctx, v))
            .collect::<GraphResult<Vec<_>>>()
            .ok()?;
        let facts: Vec<InputFact> = infos
            .into_iter()
            .zip(&values)
            .map(|(info, value)| InputFact {
                info,
                value: value.as_ref(),
            })
            .collect();
        fold::evaluate(&node.op, &facts)
    }

    pub fn set_friendly_name(&mut self, id: NodeId, name: impl Into<String>) -> GraphResult<()> {
        let index = self
            .staged_index(id)
            .ok_or_else(|| TransformError::Internal(format!("{} is not staged", id)))?;
        self.staged[index].friendly_name = name.into();
        Ok(())
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Insert every staged node into `ctx`
    ///
    /// Each new node receives the union of the provenance of `from`.
    /// Returns the inserted ids.
    pub fn commit(self, ctx: &mut GraphContext, from: &[NodeId]) -> GraphResult<Vec<NodeId>> {
        if ctx.next_id() != self.base {
            return Err(TransformError::Internal(format!(
                "graph changed while {} nodes were staged",
                self.staged.len()
            )));
        }

        let mut provenance = RuntimeInfo::new();
        for &id in from {
            if let Some(node) = ctx.try_node(id) {
                provenance.extend(node.rt_info.iter().cloned());
            }
        }

        let mut ids = Vec::with_capacity(self.staged.len());
        for mut node in self.staged {
            node.rt_info.extend(provenance.iter().cloned());
            ids.push(node.id);
            ctx.insert_node(node);
        }
        log::trace!("committed {} nodes", ids.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::ElementType;

    #[test]
    fn test_staging_leaves_graph_untouched() {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 16]));
        let before = ctx.clone();

        let mut reg = NodeRegistry::new(&ctx);
        let order = reg.constant(TensorData::vec_i64(&[1, 0, 2]));
        let t = reg.make(&ctx, Op::Transpose, &[x, order]).unwrap();
        assert_eq!(
            reg.partial_shape(&ctx, t.out(0)).unwrap(),
            &PartialShape::from_static(&[5, 2, 16])
        );
        assert_eq!(reg.len(), 2);
        drop(reg);
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_try_fold_through_shape_of() {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 5, 16]));

        let mut reg = NodeRegistry::new(&ctx);
        let zero = reg.constant(TensorData::vec_i32(&[0]));
        let max_len = reg.constant(TensorData::vec_i32(&[5]));
        let shape = reg.make(&ctx, Op::ShapeOf, &[x]).unwrap();
        let batch = reg
            .make(&ctx, Op::Gather { batch_dims: 0 }, &[shape.out(0), zero, zero])
            .unwrap();
        let lens = reg
            .make_try_fold(&ctx, Op::Broadcast, &[max_len, batch.out(0)])
            .unwrap();
        assert_eq!(
            reg.get(lens.node).and_then(|n| n.op.as_constant()),
            Some(&TensorData::vec_i32(&[5, 5]))
        );

        // dynamic batch stays symbolic
        let y = ctx.add_parameter(ElementType::F32, PartialShape::dynamic_of_rank(3));
        let mut reg = NodeRegistry::new(&ctx);
        let zero = reg.constant(TensorData::vec_i32(&[0]));
        let max_len = reg.constant(TensorData::vec_i32(&[5]));
        let shape = reg.make(&ctx, Op::ShapeOf, &[y]).unwrap();
        let batch = reg
            .make(&ctx, Op::Gather { batch_dims: 0 }, &[shape.out(0), zero, zero])
            .unwrap();
        let lens = reg
            .make_try_fold(&ctx, Op::Broadcast, &[max_len, batch.out(0)])
            .unwrap();
        assert!(reg.get(lens.node).unwrap().is_type(OpType::Broadcast));
    }

    #[test]
    fn test_commit_copies_provenance() {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[1, 4]));
        ctx.add_runtime_tag(x.node, "fused").unwrap();

        let mut reg = NodeRegistry::new(&ctx);
        let axes = reg.constant(TensorData::vec_i64(&[0]));
        let squeeze = reg.make(&ctx, Op::Squeeze, &[x, axes]).unwrap();
        reg.set_friendly_name(squeeze, "squeezed").unwrap();
        assert!(reg.set_friendly_name(x.node, "nope").is_err());

        let ids = reg.commit(&mut ctx, &[x.node]).unwrap();
        assert_eq!(ids, vec![axes.node, squeeze]);
        let node = ctx.node(squeeze).unwrap();
        assert_eq!(node.friendly_name, "squeezed");
        assert!(node.rt_info.contains("fused"));
        assert_eq!(ctx.consumers(x), &[squeeze.input(0)]);
    }

    #[test]
    fn test_commit_rejects_stale_registry() {
        let mut ctx = GraphContext::new();
        let reg = NodeRegistry::new(&ctx);
        ctx.add_constant(TensorData::scalar_i64(0));
        assert!(matches!(
            reg.commit(&mut ctx, &[]),
            Err(TransformError::Internal(_))
        ));
    }
}
