//! Node elimination
//!
//! Removes nodes whose outputs nobody reads once a rewrite has re-pointed
//! their consumers.

use crate::graph::{GraphContext, NodeId};
use crate::opset::OpType;

/// Check if a node can be collected
///
/// Graph inputs and outputs are never dead; any other node is dead when
/// none of its outputs has a consumer.
pub fn is_dead(ctx: &GraphContext, id: NodeId) -> bool {
    let node = match ctx.try_node(id) {
        Some(n) => n,
        None => return false,
    };
    if node.is_type(OpType::Parameter) || node.is_type(OpType::Result) {
        return false;
    }
    (0..node.output_count()).all(|i| ctx.consumer_count(id.out(i)) == 0)
}

/// Remove one node if it is dead
pub fn eliminate_node(ctx: &mut GraphContext, id: NodeId) -> bool {
    if !is_dead(ctx, id) {
        return false;
    }
    ctx.remove_node(id).is_some()
}

/// Eliminate dead nodes until none are left
///
/// Removing a node can orphan its producers, so sweeps repeat until one
/// removes nothing. Returns the number of removed nodes.
pub fn eliminate_dead_nodes(ctx: &mut GraphContext) -> usize {
    let mut removed = 0;
    let mut changed = true;

    while changed {
        changed = false;

        let dead: Vec<NodeId> = ctx.node_ids().filter(|&id| is_dead(ctx, id)).collect();
        for id in dead {
            if eliminate_node(ctx, id) {
                removed += 1;
                changed = true;
            }
        }
    }

    if removed > 0 {
        log::debug!("eliminated {} dead nodes", removed);
    }
    removed
}
