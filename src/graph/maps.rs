//! Graph map types
//!
//! Defines the core data structures for efficient graph traversal.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::node::{InputRef, Node, NodeId, Output};

/// Type alias for node map: id → Node (insertion order preserved)
pub type NodeMap = IndexMap<NodeId, Node>;

/// Type alias for consumer map: value → [consumer input slots]
/// SmallVec optimized for common case of 1-4 consumers
pub type ConsumerMap = FxHashMap<Output, SmallVec<[InputRef; 4]>>;
