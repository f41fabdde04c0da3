//! Core traits for sequence-lowering
//!
//! Defines the whole-graph interface used to chain transformations.

use crate::error::GraphResult;
use crate::graph::GraphContext;

/// Transformer trait for graph-level transformations
///
/// Takes a graph by value and returns the transformed graph. In-place
/// passes implement [`crate::transformers::GraphTransformer`] instead; the
/// aggregator implements both.
///
/// # Example
///
/// ```
/// use sequence_lowering::error::GraphResult;
/// use sequence_lowering::graph::GraphContext;
/// use sequence_lowering::traits::Transformer;
///
/// struct Passthrough;
///
/// impl Transformer for Passthrough {
///     fn transform(&self, graph: GraphContext) -> GraphResult<GraphContext> {
///         Ok(graph)
///     }
/// }
///
/// let graph = Passthrough.transform(GraphContext::new()).unwrap();
/// assert_eq!(graph.node_count(), 0);
/// ```
pub trait Transformer {
    /// Transform the given graph
    fn transform(&self, graph: GraphContext) -> GraphResult<GraphContext>;
}

/// Chainable transformer that applies multiple transformers in sequence
#[derive(Default)]
pub struct TransformerChain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    /// Create a new empty transformer chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transformer to the chain
    #[allow(clippy::should_implement_trait)]
    pub fn add<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl Transformer for TransformerChain {
    fn transform(&self, mut graph: GraphContext) -> GraphResult<GraphContext> {
        for transformer in &self.transformers {
            graph = transformer.transform(graph)?;
        }
        Ok(graph)
    }
}
