//! Body-carrying operations: `TensorIterator` and `Loop`
//!
//! A body is an ordinary [`GraphContext`]. Input descriptions bind outer
//! input indices to body parameter indices (positions in
//! `body.parameters()`); output descriptions bind body result indices
//! (positions in `body.results()`) to outer output indices.

use crate::graph::{GraphContext, NodeId};

/// How an outer input feeds a body parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDescription {
    /// One slice of the outer tensor per iteration
    Sliced {
        input_index: usize,
        body_parameter_index: usize,
        start: i64,
        stride: i64,
        part_size: i64,
        end: i64,
        axis: i64,
    },
    /// Loop-carried: outer value first, then `body_value_index` result
    Merged {
        input_index: usize,
        body_parameter_index: usize,
        body_value_index: usize,
    },
    /// Outer value every iteration
    Invariant {
        input_index: usize,
        body_parameter_index: usize,
    },
}

impl InputDescription {
    pub fn input_index(&self) -> usize {
        match self {
            InputDescription::Sliced { input_index, .. }
            | InputDescription::Merged { input_index, .. }
            | InputDescription::Invariant { input_index, .. } => *input_index,
        }
    }

    pub fn body_parameter_index(&self) -> usize {
        match self {
            InputDescription::Sliced {
                body_parameter_index,
                ..
            }
            | InputDescription::Merged {
                body_parameter_index,
                ..
            }
            | InputDescription::Invariant {
                body_parameter_index,
                ..
            } => *body_parameter_index,
        }
    }
}

/// How a body result becomes an outer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDescription {
    /// Per-iteration values concatenated along `axis`
    Concat {
        body_value_index: usize,
        output_index: usize,
        start: i64,
        stride: i64,
        part_size: i64,
        end: i64,
        axis: i64,
    },
    /// Value of one iteration; `-1` is the last one
    Body {
        body_value_index: usize,
        output_index: usize,
        iteration: i64,
    },
}

impl OutputDescription {
    pub fn body_value_index(&self) -> usize {
        match self {
            OutputDescription::Concat {
                body_value_index, ..
            }
            | OutputDescription::Body {
                body_value_index, ..
            } => *body_value_index,
        }
    }
}

/// `Loop` body ports with a fixed meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialBodyPorts {
    /// Body parameter receiving the iteration number, `-1` if none
    pub current_iteration_input_idx: i64,
    /// Body result holding the continue condition
    pub body_condition_output_idx: i64,
}

/// Body graph plus port descriptions
#[derive(Debug, Clone, PartialEq)]
pub struct SubGraphOp {
    pub body: GraphContext,
    pub input_descriptions: Vec<InputDescription>,
    pub output_descriptions: Vec<OutputDescription>,
    /// Present for `Loop` only
    pub special_body_ports: Option<SpecialBodyPorts>,
}

impl SubGraphOp {
    pub fn new(body: GraphContext) -> Self {
        Self {
            body,
            input_descriptions: Vec::new(),
            output_descriptions: Vec::new(),
            special_body_ports: None,
        }
    }

    /// Index of a body parameter node in the parameter list
    pub fn parameter_index(&self, param: NodeId) -> Option<usize> {
        self.body.parameters().iter().position(|&p| p == param)
    }

    /// Input description bound to a body parameter node
    pub fn input_description_for(&self, param: NodeId) -> Option<&InputDescription> {
        let index = self.parameter_index(param)?;
        self.input_descriptions
            .iter()
            .find(|d| d.body_parameter_index() == index)
    }
}
