//! Operation set for the graph IR
//!
//! Every node carries an [`Op`]: the operation kind together with its typed
//! attributes. Inputs and outputs live on the node itself, so an `Op` only
//! describes *what* the node computes.
//!
//! | Kind | Version | Attributes |
//! |------|---------|------------|
//! | `Gather` | 8 | `batch_dims` |
//! | `Reshape` | 1 | `special_zero` |
//! | `Concat` | 1 | `axis` |
//! | `ReverseSequence` | 1 | `batch_axis`, `seq_axis` |
//! | `LSTMCell`, `RNNCell`, `GRUCell` | 4 / 0 / 3 | [`CellAttrs`] |
//! | `LSTMSequence`, `RNNSequence`, `GRUSequence` | 5 | [`SequenceAttrs`] |
//! | `TensorIterator`, `Loop` | 0 / 5 | [`SubGraphOp`] |

pub mod infer;
pub mod recurrent;
pub mod subgraph;

use std::fmt;

use crate::tensor::TensorData;

pub use infer::{infer_outputs, InputFact};
pub use recurrent::{CellAttrs, Direction, SequenceAttrs};
pub use subgraph::{InputDescription, OutputDescription, SpecialBodyPorts, SubGraphOp};

/// Operation kind tag, used by patterns and for naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Parameter,
    Constant,
    Result,
    Transpose,
    Reshape,
    Squeeze,
    Unsqueeze,
    Gather,
    Add,
    Less,
    LogicalAnd,
    ShapeOf,
    Broadcast,
    Concat,
    Range,
    ReverseSequence,
    ScatterNdUpdate,
    ScatterUpdate,
    LstmCell,
    RnnCell,
    GruCell,
    LstmSequence,
    RnnSequence,
    GruSequence,
    TensorIterator,
    Loop,
}

impl OpType {
    /// Canonical kind name
    pub fn name(self) -> &'static str {
        match self {
            OpType::Parameter => "Parameter",
            OpType::Constant => "Constant",
            OpType::Result => "Result",
            OpType::Transpose => "Transpose",
            OpType::Reshape => "Reshape",
            OpType::Squeeze => "Squeeze",
            OpType::Unsqueeze => "Unsqueeze",
            OpType::Gather => "Gather",
            OpType::Add => "Add",
            OpType::Less => "Less",
            OpType::LogicalAnd => "LogicalAnd",
            OpType::ShapeOf => "ShapeOf",
            OpType::Broadcast => "Broadcast",
            OpType::Concat => "Concat",
            OpType::Range => "Range",
            OpType::ReverseSequence => "ReverseSequence",
            OpType::ScatterNdUpdate => "ScatterNDUpdate",
            OpType::ScatterUpdate => "ScatterUpdate",
            OpType::LstmCell => "LSTMCell",
            OpType::RnnCell => "RNNCell",
            OpType::GruCell => "GRUCell",
            OpType::LstmSequence => "LSTMSequence",
            OpType::RnnSequence => "RNNSequence",
            OpType::GruSequence => "GRUSequence",
            OpType::TensorIterator => "TensorIterator",
            OpType::Loop => "Loop",
        }
    }

    /// Opset version the kind is taken from
    pub fn version(self) -> u32 {
        match self {
            OpType::Gather => 8,
            OpType::ShapeOf | OpType::Broadcast | OpType::ScatterUpdate | OpType::GruCell => 3,
            OpType::Range | OpType::ScatterNdUpdate | OpType::LstmCell => 4,
            OpType::LstmSequence | OpType::RnnSequence | OpType::GruSequence | OpType::Loop => 5,
            OpType::RnnCell | OpType::TensorIterator => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opset{}::{}", self.version(), self.name())
    }
}

/// Operation with typed attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Parameter,
    Constant(TensorData),
    Result,
    /// Inputs: data, order
    Transpose,
    /// Inputs: data, pattern
    Reshape { special_zero: bool },
    /// Inputs: data, axes
    Squeeze,
    /// Inputs: data, axes
    Unsqueeze,
    /// Inputs: data, indices, axis
    Gather { batch_dims: i64 },
    Add,
    Less,
    LogicalAnd,
    ShapeOf,
    /// Inputs: data, target shape (numpy mode)
    Broadcast,
    Concat { axis: i64 },
    /// Inputs: start, stop, step
    Range,
    /// Inputs: data, sequence lengths
    ReverseSequence { batch_axis: i64, seq_axis: i64 },
    /// Inputs: data, indices, updates
    ScatterNdUpdate,
    /// Inputs: data, indices, updates, axis
    ScatterUpdate,
    /// Inputs: X, H, C, W, R, B
    LstmCell(CellAttrs),
    /// Inputs: X, H, W, R, B
    RnnCell(CellAttrs),
    /// Inputs: X, H, W, R, B
    GruCell {
        attrs: CellAttrs,
        linear_before_reset: bool,
    },
    /// Inputs: X, H0, C0, sequence lengths, W, R, B
    LstmSequence(SequenceAttrs),
    /// Inputs: X, H0, sequence lengths, W, R, B
    RnnSequence(SequenceAttrs),
    /// Inputs: X, H0, sequence lengths, W, R, B
    GruSequence {
        attrs: SequenceAttrs,
        linear_before_reset: bool,
    },
    TensorIterator(Box<SubGraphOp>),
    /// Inputs: trip count, execution condition, then body inputs
    Loop(Box<SubGraphOp>),
}

impl Op {
    pub fn op_type(&self) -> OpType {
        match self {
            Op::Parameter => OpType::Parameter,
            Op::Constant(_) => OpType::Constant,
            Op::Result => OpType::Result,
            Op::Transpose => OpType::Transpose,
            Op::Reshape { .. } => OpType::Reshape,
            Op::Squeeze => OpType::Squeeze,
            Op::Unsqueeze => OpType::Unsqueeze,
            Op::Gather { .. } => OpType::Gather,
            Op::Add => OpType::Add,
            Op::Less => OpType::Less,
            Op::LogicalAnd => OpType::LogicalAnd,
            Op::ShapeOf => OpType::ShapeOf,
            Op::Broadcast => OpType::Broadcast,
            Op::Concat { .. } => OpType::Concat,
            Op::Range => OpType::Range,
            Op::ReverseSequence { .. } => OpType::ReverseSequence,
            Op::ScatterNdUpdate => OpType::ScatterNdUpdate,
            Op::ScatterUpdate => OpType::ScatterUpdate,
            Op::LstmCell(_) => OpType::LstmCell,
            Op::RnnCell(_) => OpType::RnnCell,
            Op::GruCell { .. } => OpType::GruCell,
            Op::LstmSequence(_) => OpType::LstmSequence,
            Op::RnnSequence(_) => OpType::RnnSequence,
            Op::GruSequence { .. } => OpType::GruSequence,
            Op::TensorIterator(_) => OpType::TensorIterator,
            Op::Loop(_) => OpType::Loop,
        }
    }

    pub fn name(&self) -> &'static str {
        self.op_type().name()
    }

    /// Constant payload, if this is a `Constant`
    pub fn as_constant(&self) -> Option<&TensorData> {
        match self {
            Op::Constant(data) => Some(data),
            _ => None,
        }
    }

    /// Cell attributes, if this is a recurrent cell
    pub fn cell_attrs(&self) -> Option<&CellAttrs> {
        match self {
            Op::LstmCell(attrs) | Op::RnnCell(attrs) => Some(attrs),
            Op::GruCell { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    /// Sequence attributes, if this is a recurrent sequence
    pub fn sequence_attrs(&self) -> Option<&SequenceAttrs> {
        match self {
            Op::LstmSequence(attrs) | Op::RnnSequence(attrs) => Some(attrs),
            Op::GruSequence { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    /// Body and port descriptions, if this is `TensorIterator` or `Loop`
    pub fn subgraph(&self) -> Option<&SubGraphOp> {
        match self {
            Op::TensorIterator(sub) | Op::Loop(sub) => Some(sub),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_type_names() {
        assert_eq!(OpType::ScatterNdUpdate.name(), "ScatterNDUpdate");
        assert_eq!(OpType::LstmSequence.to_string(), "opset5::LSTMSequence");
        assert_eq!(OpType::Gather.to_string(), "opset8::Gather");
    }

    #[test]
    fn test_attribute_views() {
        let cell = Op::GruCell {
            attrs: CellAttrs::gru(16),
            linear_before_reset: true,
        };
        assert_eq!(cell.op_type(), OpType::GruCell);
        assert_eq!(cell.cell_attrs().map(|a| a.hidden_size), Some(16));
        assert!(cell.sequence_attrs().is_none());

        let seq = Op::LstmSequence(SequenceAttrs::new(CellAttrs::lstm(8), Direction::Reverse));
        assert_eq!(seq.sequence_attrs().map(|a| a.direction), Some(Direction::Reverse));
        assert!(Op::Constant(TensorData::scalar_i64(1)).as_constant().is_some());
    }
}
