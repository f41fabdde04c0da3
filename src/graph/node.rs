//! Node identity, value references and the node record

use std::collections::BTreeSet;
use std::fmt;

use smallvec::SmallVec;

use crate::opset::{Op, OpType};
use crate::tensor::TensorInfo;

/// Stable node identity within one graph; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Value reference to output `index` of this node
    pub fn out(self, index: usize) -> Output {
        Output { node: self, index }
    }

    /// Input slot `index` of this node
    pub fn input(self, index: usize) -> InputRef {
        InputRef { node: self, index }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value reference: `(producing node, output index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Output {
    pub node: NodeId,
    pub index: usize,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.index)
    }
}

/// Consumer side of an edge: `(consuming node, input slot)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    pub node: NodeId,
    pub index: usize,
}

/// Provenance tags; accumulated by union across rewrites
pub type RuntimeInfo = BTreeSet<String>;

/// Node input list; most ops have at most four inputs
pub type NodeInputs = SmallVec<[Output; 4]>;

/// Node output descriptors
pub type NodeOutputs = SmallVec<[TensorInfo; 3]>;

/// A node of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    pub inputs: NodeInputs,
    pub outputs: NodeOutputs,
    pub friendly_name: String,
    pub rt_info: RuntimeInfo,
}

impl Node {
    /// Create a node with the default friendly name `<Kind>_<id>`
    pub fn new(id: NodeId, op: Op, inputs: NodeInputs, outputs: NodeOutputs) -> Self {
        let friendly_name = format!("{}_{}", op.name(), id.0);
        Self {
            id,
            op,
            inputs,
            outputs,
            friendly_name,
            rt_info: RuntimeInfo::new(),
        }
    }

    pub fn op_type(&self) -> OpType {
        self.op.op_type()
    }

    pub fn is_type(&self, op_type: OpType) -> bool {
        self.op_type() == op_type
    }

    pub fn input(&self, index: usize) -> Option<Output> {
        self.inputs.get(index).copied()
    }

    pub fn output(&self, index: usize) -> Output {
        self.id.out(index)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}
