//! Graph context for dataflow graph manipulation
//!
//! `GraphContext` is the central structure for working with graphs. The
//! outer model and every `TensorIterator`/`Loop` body is one context.
//! It keeps nodes in insertion order plus a consumer map for O(1) edge
//! lookups in both directions.

use crate::error::{GraphResult, TransformError};
use crate::tensor::{ElementType, PartialShape, TensorData, TensorInfo};

use super::maps::{ConsumerMap, NodeMap};
use super::node::{InputRef, Node, NodeId, Output};

/// Graph context for efficient graph operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphContext {
    /// Maps node id → Node (preserves insertion order)
    pub(crate) node_map: NodeMap,

    /// Maps value → consumer input slots
    pub(crate) consumer_map: ConsumerMap,

    /// Graph inputs in declaration order
    pub(crate) parameters: Vec<NodeId>,

    /// Graph outputs in declaration order
    pub(crate) results: Vec<NodeId>,

    /// Next id to allocate
    pub(crate) next_id: u32,
}

impl GraphContext {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.node_map.get(&id).ok_or(TransformError::NodeNotFound(id))
    }

    /// Get a node by id, if present
    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.node_map.get(&id)
    }

    /// Get a mutable node by id
    pub fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.node_map
            .get_mut(&id)
            .ok_or(TransformError::NodeNotFound(id))
    }

    /// Check if a node exists
    pub fn has_node(&self, id: NodeId) -> bool {
        self.node_map.contains_key(&id)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.node_map.len()
    }

    /// Iterate over all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_map.values()
    }

    /// Iterate over node ids in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_map.keys().copied()
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    /// Id the next created node will receive
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    // ========================================================================
    // Value accessors
    // ========================================================================

    /// The node producing a value
    pub fn producer(&self, value: Output) -> GraphResult<&Node> {
        self.node(value.node)
    }

    /// Descriptor of a value
    pub fn output_info(&self, value: Output) -> GraphResult<&TensorInfo> {
        self.node(value.node)?.outputs.get(value.index).ok_or_else(|| {
            TransformError::InvalidNode(format!("{} has no output {}", value.node, value.index))
        })
    }

    pub fn partial_shape(&self, value: Output) -> GraphResult<&PartialShape> {
        self.output_info(value).map(|i| &i.shape)
    }

    pub fn element_type(&self, value: Output) -> GraphResult<ElementType> {
        self.output_info(value).map(|i| i.element_type)
    }

    /// Rank of a value, if known
    pub fn rank(&self, value: Output) -> Option<usize> {
        self.partial_shape(value).ok()?.rank()
    }

    /// Consumer input slots of a value
    pub fn consumers(&self, value: Output) -> &[InputRef] {
        self.consumer_map
            .get(&value)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Number of consumer input slots of a value
    pub fn consumer_count(&self, value: Output) -> usize {
        self.consumers(value).len()
    }

    /// Constant payload, if the value is produced by a `Constant`
    pub fn constant_value(&self, value: Output) -> Option<&TensorData> {
        self.try_node(value.node)?.op.as_constant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::{Op, OpType};

    #[test]
    fn test_empty_context() {
        let ctx = GraphContext::new();
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(ctx.next_id(), 0);
        assert!(matches!(
            ctx.node(NodeId(3)),
            Err(TransformError::NodeNotFound(NodeId(3)))
        ));
    }

    #[test]
    fn test_value_accessors() {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[2, 3]));
        let c = ctx.add_constant(TensorData::vec_i64(&[1, 0]));
        let t = ctx.add_node(Op::Transpose, &[x, c]).unwrap();

        assert!(ctx.producer(x).unwrap().is_type(OpType::Parameter));
        assert_eq!(ctx.rank(t.out(0)), Some(2));
        assert_eq!(ctx.partial_shape(t.out(0)).unwrap(), &PartialShape::from_static(&[3, 2]));
        assert_eq!(ctx.consumers(x), &[t.input(0)]);
        assert_eq!(ctx.consumer_count(t.out(0)), 0);
        assert_eq!(ctx.constant_value(c), Some(&TensorData::vec_i64(&[1, 0])));
        assert!(ctx.output_info(t.out(1)).is_err());
    }
}
