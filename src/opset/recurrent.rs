//! Recurrent cell and sequence attributes

use std::fmt;

/// Activation names accepted by the recurrent ops
const KNOWN_ACTIVATIONS: &[&str] = &["sigmoid", "tanh", "relu"];

/// Attributes shared by every recurrent cell kind
#[derive(Debug, Clone, PartialEq)]
pub struct CellAttrs {
    pub hidden_size: usize,
    pub activations: Vec<String>,
    pub activations_alpha: Vec<f32>,
    pub activations_beta: Vec<f32>,
    pub clip: f32,
}

impl CellAttrs {
    pub fn new(hidden_size: usize, activations: &[&str]) -> Self {
        Self {
            hidden_size,
            activations: activations.iter().map(|a| a.to_string()).collect(),
            activations_alpha: Vec::new(),
            activations_beta: Vec::new(),
            clip: 0.0,
        }
    }

    /// Default LSTM activations: sigmoid, tanh, tanh
    pub fn lstm(hidden_size: usize) -> Self {
        Self::new(hidden_size, &["sigmoid", "tanh", "tanh"])
    }

    /// Default RNN activation: tanh
    pub fn rnn(hidden_size: usize) -> Self {
        Self::new(hidden_size, &["tanh"])
    }

    /// Default GRU activations: sigmoid, tanh
    pub fn gru(hidden_size: usize) -> Self {
        Self::new(hidden_size, &["sigmoid", "tanh"])
    }

    pub fn with_clip(mut self, clip: f32) -> Self {
        self.clip = clip;
        self
    }

    /// First activation name not understood by the sequence ops
    pub fn unknown_activation(&self) -> Option<&str> {
        self.activations
            .iter()
            .map(String::as_str)
            .find(|a| !KNOWN_ACTIVATIONS.contains(&a.to_ascii_lowercase().as_str()))
    }
}

/// Iteration order of a sequence op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
    Bidirectional,
}

impl Direction {
    /// Size of the direction axis of weights, states and `Y`
    pub fn num_directions(self) -> usize {
        match self {
            Direction::Bidirectional => 2,
            _ => 1,
        }
    }

    /// Direction implied by a slicing stride
    pub fn from_stride(stride: i64) -> Self {
        if stride > 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
            Direction::Bidirectional => "bidirectional",
        })
    }
}

/// Sequence attributes: the cell attributes plus a direction
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceAttrs {
    pub cell: CellAttrs,
    pub direction: Direction,
}

impl SequenceAttrs {
    pub fn new(cell: CellAttrs, direction: Direction) -> Self {
        Self { cell, direction }
    }

    pub fn num_directions(&self) -> usize {
        self.direction.num_directions()
    }
}
