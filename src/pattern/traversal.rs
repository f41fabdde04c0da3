//! Graph traversal utilities
//!
//! Provides forward BFS traversal for dataflow graphs.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::graph::{GraphContext, Node, NodeId};

/// BFS traversal iterator following consumer edges
pub struct BfsIterator<'a> {
    ctx: &'a GraphContext,
    queue: VecDeque<NodeId>,
    visited: FxHashSet<NodeId>,
}

impl<'a> BfsIterator<'a> {
    /// Create a new BFS iterator starting from `start` (inclusive)
    pub fn new(ctx: &'a GraphContext, start: NodeId) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = FxHashSet::default();

        if ctx.has_node(start) {
            visited.insert(start);
            queue.push_back(start);
        }

        Self {
            ctx,
            queue,
            visited,
        }
    }
}

impl<'a> Iterator for BfsIterator<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.queue.pop_front()?;
        let node = self.ctx.try_node(id)?;

        for user in self.ctx.users(id) {
            if self.visited.insert(user) {
                self.queue.push_back(user);
            }
        }

        Some(node)
    }
}

/// Check if there's a path between two nodes
pub fn has_path(ctx: &GraphContext, from: NodeId, to: NodeId) -> bool {
    BfsIterator::new(ctx, from).any(|n| n.id == to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opset::Op;
    use crate::tensor::{ElementType, PartialShape, TensorData};

    fn make_chain_graph() -> (GraphContext, Vec<NodeId>) {
        let mut ctx = GraphContext::new();
        let x = ctx.add_parameter(ElementType::F32, PartialShape::from_static(&[1, 4]));
        let axes = ctx.add_constant(TensorData::vec_i64(&[0]));
        let squeeze = ctx.add_node(Op::Squeeze, &[x, axes]).unwrap();
        let shape = ctx.add_node(Op::ShapeOf, &[squeeze.out(0)]).unwrap();
        let result = ctx.add_result(shape.out(0)).unwrap();
        (ctx, vec![x.node, axes.node, squeeze, shape, result])
    }

    #[test]
    fn test_bfs_forward() {
        let (ctx, ids) = make_chain_graph();
        let visited: Vec<NodeId> = BfsIterator::new(&ctx, ids[0]).map(|n| n.id).collect();
        assert_eq!(visited, vec![ids[0], ids[2], ids[3], ids[4]]);
    }

    #[test]
    fn test_has_path() {
        let (ctx, ids) = make_chain_graph();
        assert!(has_path(&ctx, ids[1], ids[4]));
        assert!(!has_path(&ctx, ids[4], ids[1]));
        assert!(!has_path(&ctx, ids[0], ids[1]));
    }
}
