//! Graph mutation operations
//!
//! Methods for modifying the graph structure: adding, removing, and replacing nodes.

use smallvec::{smallvec, SmallVec};

use crate::error::{GraphResult, TransformError};
use crate::opset::{infer_outputs, InputFact, Op, OpType};
use crate::tensor::{ElementType, PartialShape, TensorData, TensorInfo};

use super::context::GraphContext;
use super::node::{InputRef, Node, NodeId, NodeInputs, NodeOutputs, Output};

impl GraphContext {
    // ========================================================================
    // Node creation
    // ========================================================================

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Facts about existing values, for output inference
    pub(crate) fn input_facts(&self, inputs: &[Output]) -> GraphResult<Vec<InputFact<'_>>> {
        inputs
            .iter()
            .map(|&v| {
                Ok(InputFact {
                    info: self.output_info(v)?,
                    value: self.constant_value(v),
                })
            })
            .collect()
    }

    /// Add a graph input
    pub fn add_parameter(&mut self, element_type: ElementType, shape: PartialShape) -> Output {
        let id = self.allocate_id();
        let node = Node::new(
            id,
            Op::Parameter,
            SmallVec::new(),
            smallvec![TensorInfo::new(element_type, shape)],
        );
        self.insert_node(node);
        self.parameters.push(id);
        id.out(0)
    }

    /// Add a constant
    pub fn add_constant(&mut self, data: TensorData) -> Output {
        let id = self.allocate_id();
        let info = TensorInfo::new(data.element_type(), PartialShape::from_static(data.shape()));
        let node = Node::new(id, Op::Constant(data), SmallVec::new(), smallvec![info]);
        self.insert_node(node);
        id.out(0)
    }

    /// Add a node, inferring its outputs
    pub fn add_node(&mut self, op: Op, inputs: &[Output]) -> GraphResult<NodeId> {
        let outputs: NodeOutputs = infer_outputs(&op, &self.input_facts(inputs)?)?;
        self.add_node_with_outputs(op, inputs, outputs)
    }

    /// Add a node with explicitly supplied outputs
    ///
    /// Used for body-carrying ops, whose outputs depend on iteration counts.
    pub fn add_node_with_outputs(
        &mut self,
        op: Op,
        inputs: &[Output],
        outputs: NodeOutputs,
    ) -> GraphResult<NodeId> {
        for &value in inputs {
            self.output_info(value)?;
        }
        let id = self.allocate_id();
        let is_result = matches!(op, Op::Result);
        self.insert_node(Node::new(id, op, NodeInputs::from_slice(inputs), outputs));
        if is_result {
            self.results.push(id);
        }
        Ok(id)
    }

    /// Add a graph output
    pub fn add_result(&mut self, value: Output) -> GraphResult<NodeId> {
        self.add_node(Op::Result, &[value])
    }

    /// Insert a fully formed node
    ///
    /// Updates the consumer map and keeps `next_id` past the node's id.
    pub fn insert_node(&mut self, node: Node) {
        for (slot, value) in node.inputs.iter().enumerate() {
            self.consumer_map
                .entry(*value)
                .or_default()
                .push(node.id.input(slot));
        }
        self.next_id = self.next_id.max(node.id.0 + 1);
        self.node_map.insert(node.id, node);
    }

    // ========================================================================
    // Node removal
    // ========================================================================

    /// Remove a node from the graph
    ///
    /// Its input edges are dropped from the consumer map. Consumers of its
    /// outputs are left dangling; callers re-point them first.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.node_map.shift_remove(&id)?;

        for (slot, value) in node.inputs.iter().enumerate() {
            if let Some(consumers) = self.consumer_map.get_mut(value) {
                consumers.retain(|c| *c != id.input(slot));
                if consumers.is_empty() {
                    self.consumer_map.remove(value);
                }
            }
        }
        for index in 0..node.outputs.len() {
            self.consumer_map.remove(&id.out(index));
        }
        self.parameters.retain(|&p| p != id);
        self.results.retain(|&r| r != id);

        Some(node)
    }

    // ========================================================================
    // Edge mutation
    // ========================================================================

    /// Point one input slot at a new value
    pub fn set_input(&mut self, slot: InputRef, value: Output) -> GraphResult<()> {
        let old = {
            let node = self.node_mut(slot.node)?;
            let input = node.inputs.get_mut(slot.index).ok_or_else(|| {
                TransformError::InvalidNode(format!("{} has no input {}", slot.node, slot.index))
            })?;
            std::mem::replace(input, value)
        };

        if let Some(consumers) = self.consumer_map.get_mut(&old) {
            consumers.retain(|c| *c != slot);
            if consumers.is_empty() {
                self.consumer_map.remove(&old);
            }
        }
        self.consumer_map.entry(value).or_default().push(slot);
        Ok(())
    }

    /// Re-point every consumer of `old` to `new`
    ///
    /// The node producing `new` is skipped if it consumes `old` itself, so a
    /// node inserted after `old` keeps reading it. Returns the number of
    /// re-pointed slots.
    pub fn replace_output(&mut self, old: Output, new: Output) -> GraphResult<usize> {
        if old == new {
            return Ok(0);
        }
        self.output_info(new)?;

        let targets: SmallVec<[InputRef; 4]> = self
            .consumers(old)
            .iter()
            .filter(|c| c.node != new.node)
            .copied()
            .collect();
        for &slot in &targets {
            self.set_input(slot, new)?;
        }
        Ok(targets.len())
    }

    /// Re-point consumers of every output of `old` to the same output of `new`
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> GraphResult<()> {
        let old_count = self.node(old)?.output_count();
        let new_count = self.node(new)?.output_count();
        if new_count < old_count {
            return Err(TransformError::InvalidNode(format!(
                "Cannot replace {} ({} outputs) with {} ({} outputs)",
                old, old_count, new, new_count
            )));
        }
        for index in 0..old_count {
            self.replace_output(old.out(index), new.out(index))?;
        }
        Ok(())
    }

    /// Re-point consumers of `old` to `new` and move `old`'s friendly name
    ///
    /// A graph input keeps its own name: if `new` is produced by a
    /// `Parameter` the name is not moved, and the replacement is refused
    /// when `old` is a graph output (the output name would be lost).
    /// Returns whether the replacement happened.
    pub fn replace_output_update_name(&mut self, old: Output, new: Output) -> GraphResult<bool> {
        let new_is_parameter = self.node(new.node)?.is_type(OpType::Parameter);
        let feeds_result = self.consumers(old).iter().any(|c| {
            self.try_node(c.node)
                .is_some_and(|n| n.is_type(OpType::Result))
        });
        if feeds_result && new_is_parameter {
            return Ok(false);
        }

        if !new_is_parameter {
            let name = self.node(old.node)?.friendly_name.clone();
            self.set_friendly_name(new.node, name)?;
        }
        self.replace_output(old, new)?;
        self.copy_runtime_info(&[old.node], new.node)?;
        Ok(true)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn set_friendly_name(&mut self, id: NodeId, name: impl Into<String>) -> GraphResult<()> {
        self.node_mut(id)?.friendly_name = name.into();
        Ok(())
    }

    /// Union the provenance of `from` onto `to`
    pub fn copy_runtime_info(&mut self, from: &[NodeId], to: NodeId) -> GraphResult<()> {
        let mut tags = Vec::new();
        for &id in from {
            if let Some(node) = self.try_node(id) {
                tags.extend(node.rt_info.iter().cloned());
            }
        }
        self.node_mut(to)?.rt_info.extend(tags);
        Ok(())
    }

    /// Attach one provenance tag
    pub fn add_runtime_tag(&mut self, id: NodeId, tag: impl Into<String>) -> GraphResult<()> {
        self.node_mut(id)?.rt_info.insert(tag.into());
        Ok(())
    }
}
