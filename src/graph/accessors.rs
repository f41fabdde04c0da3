//! Advanced graph accessor methods
//!
//! High-level methods for pattern matching and graph analysis.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::opset::OpType;

use super::context::GraphContext;
use super::node::{Node, NodeId};

impl GraphContext {
    /// Find all nodes of a given kind
    pub fn find_nodes_by_type(&self, op_type: OpType) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.op_type() == op_type)
            .map(|n| n.id)
            .collect()
    }

    /// Find a node by friendly name
    pub fn find_by_friendly_name(&self, name: &str) -> Option<&Node> {
        self.nodes().find(|n| n.friendly_name == name)
    }

    /// Distinct nodes consuming any output of `id`, in first-use order
    pub fn users(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut users: SmallVec<[NodeId; 4]> = SmallVec::new();
        let outputs = self.try_node(id).map_or(0, Node::output_count);
        for index in 0..outputs {
            for c in self.consumers(id.out(index)) {
                if !users.contains(&c.node) {
                    users.push(c.node);
                }
            }
        }
        users
    }

    /// Nodes in topological order (Kahn's algorithm)
    ///
    /// Ties are broken by insertion order, so the result is deterministic.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut pending: FxHashMap<NodeId, usize> = FxHashMap::default();
        for node in self.nodes() {
            let producers = node
                .inputs
                .iter()
                .filter(|v| self.has_node(v.node))
                .count();
            pending.insert(node.id, producers);
        }

        let mut ready: Vec<NodeId> = self
            .nodes()
            .filter(|n| pending.get(&n.id) == Some(&0))
            .map(|n| n.id)
            .collect();
        ready.reverse();

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(id) = ready.pop() {
            order.push(id);
            let mut unlocked = Vec::new();
            for user in self.users(id) {
                let uses = self
                    .try_node(user)
                    .map_or(0, |n| n.inputs.iter().filter(|v| v.node == id).count());
                if let Some(count) = pending.get_mut(&user) {
                    *count = count.saturating_sub(uses);
                    if *count == 0 {
                        unlocked.push(user);
                    }
                }
            }
            unlocked.sort_by_key(|u| self.node_map.get_index_of(u));
            ready.extend(unlocked.into_iter().rev());
        }

        order
    }
}
