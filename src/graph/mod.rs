//! Graph manipulation module
//!
//! This module provides the core infrastructure for working with dataflow graphs:
//!
//! - [`GraphContext`]: Central structure for graph operations with O(1) lookups
//! - [`Node`], [`NodeId`], [`Output`], [`InputRef`]: node records and edges
//! - [`maps`]: Type definitions and builders for graph maps
//!
//! # Example
//!
//! ```
//! use sequence_lowering::graph::GraphContext;
//! use sequence_lowering::opset::Op;
//! use sequence_lowering::tensor::{ElementType, PartialShape, TensorData};
//!
//! let mut ctx = GraphContext::new();
//! let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[4, 1, 8]));
//! let axes = ctx.add_constant(TensorData::vec_i64(&[1]));
//! let squeeze = ctx.add_node(Op::Squeeze, &[x, axes]).unwrap();
//! ctx.add_result(squeeze.out(0)).unwrap();
//!
//! assert_eq!(ctx.consumers(x).len(), 1);
//! assert_eq!(ctx.rank(squeeze.out(0)), Some(2));
//! ```
//!
//! # Maps
//!
//! | Map | Description |
//! |-----|-------------|
//! | `node_map` | node id → Node (order preserved) |
//! | `consumer_map` | value → consumer input slots |

pub mod accessors;
pub mod context;
pub mod maps;
pub mod mutators;
pub mod node;

// Re-export main types
pub use context::GraphContext;
pub use maps::{ConsumerMap, NodeMap};
pub use node::{InputRef, Node, NodeId, NodeInputs, NodeOutputs, Output, RuntimeInfo};
