//! Graph transformation module
//!
//! This module provides the rewrite infrastructure shared by every pass:
//!
//! - [`TransformEngine`]: the matcher-pass loop over candidate roots
//! - [`NodeRegistry`]: staging of replacement nodes until commit
//! - [`fold`]: constant evaluation of shape-computing ops
//! - [`eliminate`]: dead node collection
//!
//! # Overview
//!
//! A pass names the op kinds its patterns are rooted at and supplies a
//! rewrite callback. The engine visits candidates in topological order; a
//! callback matches its pattern, checks preconditions, stages the
//! replacement in a [`NodeRegistry`], and only then commits and re-points
//! consumers. Returning `Ok(false)` (or a non-internal error) before the
//! commit leaves the graph exactly as it was.
//!
//! # Example
//!
//! ```
//! use sequence_lowering::graph::GraphContext;
//! use sequence_lowering::opset::{Op, OpType};
//! use sequence_lowering::tensor::{ElementType, PartialShape, TensorData};
//! use sequence_lowering::transform::{NodeRegistry, TransformConfig, TransformEngine};
//!
//! let mut ctx = GraphContext::new();
//! let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[4, 1, 8]));
//! let axes = ctx.add_constant(TensorData::vec_i64(&[1]));
//! let squeeze = ctx.add_node(Op::Squeeze, &[x, axes]).unwrap();
//! ctx.add_result(squeeze.out(0)).unwrap();
//!
//! let config = TransformConfig::default();
//! let mut engine = TransformEngine::new(&mut ctx, &config);
//! let applied = engine
//!     .apply("squeeze_to_reshape", &[OpType::Squeeze], |ctx, id| {
//!         let data = ctx.node(id)?.inputs[0];
//!         let mut reg = NodeRegistry::new(ctx);
//!         let pattern = reg.constant(TensorData::vec_i64(&[4, 8]));
//!         let reshape = reg.make(ctx, Op::Reshape { special_zero: false }, &[data, pattern])?;
//!         reg.commit(ctx, &[id])?;
//!         ctx.replace_node(id, reshape)?;
//!         Ok(true)
//!     })
//!     .unwrap();
//! assert_eq!(applied, 1);
//! assert!(ctx.find_nodes_by_type(OpType::Squeeze).is_empty());
//! ```

pub mod core;
pub mod eliminate;
pub mod fold;
pub mod registry;

// Re-export main types and functions
pub use core::{TransformConfig, TransformEngine, TransformStats, TransformationCallback};
pub use eliminate::{eliminate_dead_nodes, eliminate_node, is_dead};
pub use fold::{evaluate, is_foldable};
pub use registry::NodeRegistry;
