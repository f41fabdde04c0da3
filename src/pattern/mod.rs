//! Pattern matching module for graph rewriting
//!
//! This module provides tools for identifying subgraphs that a rewrite can
//! replace.
//!
//! # Overview
//!
//! The pattern matching system works by:
//! 1. Declaring a pattern as a DAG of labels ([`Pattern`])
//! 2. Matching it from a root value towards the graph inputs
//! 3. Reading the label → value bindings from the [`MatchResult`]
//!
//! # Example
//!
//! ```
//! use sequence_lowering::graph::GraphContext;
//! use sequence_lowering::opset::{Op, OpType};
//! use sequence_lowering::pattern::Pattern;
//! use sequence_lowering::tensor::{ElementType, PartialShape, TensorData};
//!
//! let mut ctx = GraphContext::new();
//! let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[4, 1, 8]));
//! let axes = ctx.add_constant(TensorData::vec_i64(&[1]));
//! let squeeze = ctx.add_node(Op::Squeeze, &[x, axes]).unwrap();
//!
//! let mut p = Pattern::new();
//! let data = p.any_input();
//! let axis = p.constant();
//! let root = p.wrap(&[OpType::Squeeze], &[data, axis]);
//!
//! let m = p.matcher(root).match_node(&ctx, squeeze).unwrap();
//! assert_eq!(m.get(data), Some(x));
//! ```
//!
//! # Traversal
//!
//! The module also provides graph traversal utilities, see [`traversal`].

pub mod matcher;
pub mod ops;
pub mod traversal;

// Re-export main types
pub use matcher::{Label, MatchResult, Pattern, PatternMatcher, Predicate};
pub use traversal::{has_path, BfsIterator};
