//! Core transformation loop
//!
//! Implements the matcher-pass loop: visit candidate root nodes in
//! topological order, hand each to a rewrite callback, and repeat until a
//! sweep changes nothing.

use std::fmt;
use std::sync::Arc;

use crate::error::GraphResult;
use crate::graph::{GraphContext, Node, NodeId};
use crate::opset::OpType;

use super::eliminate::eliminate_dead_nodes;

/// Predicate on a candidate node; returning `true` makes the pass decline it
pub type TransformationCallback = Arc<dyn Fn(&Node) -> bool + Send + Sync>;

/// Transform configuration
#[derive(Clone)]
pub struct TransformConfig {
    /// Maximum sweeps to prevent infinite loops
    pub max_iterations: usize,
    /// Whether to collect dead nodes after each rewrite
    pub cleanup_after: bool,
    /// Backend opt-out hook
    pub transformation_callback: Option<TransformationCallback>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cleanup_after: true,
            transformation_callback: None,
        }
    }
}

impl fmt::Debug for TransformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformConfig")
            .field("max_iterations", &self.max_iterations)
            .field("cleanup_after", &self.cleanup_after)
            .field(
                "transformation_callback",
                &self.transformation_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl TransformConfig {
    /// Install a transformation callback
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Node) -> bool + Send + Sync + 'static,
    {
        self.transformation_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Keep dead nodes in the graph after rewrites
    pub fn without_cleanup(mut self) -> Self {
        self.cleanup_after = false;
        self
    }

    /// Ask the callback whether `node` must be left alone
    pub fn declines(&self, node: &Node) -> bool {
        self.transformation_callback
            .as_ref()
            .is_some_and(|callback| callback(node))
    }
}

/// Statistics from a transform run
#[derive(Debug, Default, Clone)]
pub struct TransformStats {
    /// Number of sweeps performed
    pub iterations: usize,
    /// Number of candidate roots handed to the callback
    pub patterns_matched: usize,
    /// Number of rewrites applied
    pub transforms_applied: usize,
    /// Number of nodes collected after rewrites
    pub nodes_eliminated: usize,
    /// Friendly names of rewritten roots
    pub transformed_nodes: Vec<String>,
}

/// Main transformation engine
///
/// Borrows the graph for the duration of one pass.
pub struct TransformEngine<'a> {
    ctx: &'a mut GraphContext,
    config: &'a TransformConfig,
    stats: TransformStats,
}

impl<'a> TransformEngine<'a> {
    pub fn new(ctx: &'a mut GraphContext, config: &'a TransformConfig) -> Self {
        Self {
            ctx,
            config,
            stats: TransformStats::default(),
        }
    }

    /// Get the current context
    pub fn context(&self) -> &GraphContext {
        self.ctx
    }

    /// Get statistics
    pub fn stats(&self) -> &TransformStats {
        &self.stats
    }

    /// Consume the engine, returning its statistics
    pub fn into_stats(self) -> TransformStats {
        self.stats
    }

    /// Run `rewrite` on every node of `root_types` until a fixed point
    ///
    /// `rewrite` returns `Ok(true)` when it changed the graph and
    /// `Ok(false)` when it declined. A non-internal error is also a decline;
    /// internal errors abort the pass.
    ///
    /// # Returns
    /// * Number of rewrites applied
    pub fn apply<F>(&mut self, pass: &str, root_types: &[OpType], mut rewrite: F) -> GraphResult<usize>
    where
        F: FnMut(&mut GraphContext, NodeId) -> GraphResult<bool>,
    {
        let mut applied = 0;
        let mut iteration = 0;

        loop {
            if iteration >= self.config.max_iterations {
                break;
            }
            iteration += 1;

            let candidates: Vec<NodeId> = self
                .ctx
                .topological_order()
                .into_iter()
                .filter(|&id| {
                    self.ctx
                        .try_node(id)
                        .is_some_and(|n| root_types.contains(&n.op_type()))
                })
                .collect();
            log::trace!("{}: sweep {} over {} candidates", pass, iteration, candidates.len());

            if candidates.is_empty() {
                break;
            }

            let mut any_applied = false;
            for id in candidates {
                // Skip roots removed by an earlier rewrite in this sweep
                let name = match self.ctx.try_node(id) {
                    Some(node) => node.friendly_name.clone(),
                    None => continue,
                };
                self.stats.patterns_matched += 1;

                match rewrite(self.ctx, id) {
                    Ok(true) => {
                        log::info!("{}: rewrote {}", pass, name);
                        applied += 1;
                        any_applied = true;
                        self.stats.transforms_applied += 1;
                        self.stats.transformed_nodes.push(name);
                        if self.config.cleanup_after {
                            self.stats.nodes_eliminated += eliminate_dead_nodes(self.ctx);
                        }
                    }
                    Ok(false) => {}
                    Err(e) if e.is_internal() => return Err(e),
                    Err(e) => {
                        log::debug!("{}: declined {}: {}", pass, name, e);
                    }
                }
            }

            if !any_applied {
                break;
            }
        }

        self.stats.iterations = iteration;
        Ok(applied)
    }
}
