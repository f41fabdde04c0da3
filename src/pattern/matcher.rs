//! Pattern matching engine for dataflow graphs
//!
//! Patterns are small DAGs of labels built with [`Pattern`]. Matching runs
//! from a root value towards the graph inputs: a `wrap` label checks the
//! producing node's kind and recurses into its inputs, `any_input` accepts
//! any value, and `or` commits to the first alternative that matches.
//! A label bound once must bind the same value wherever it reappears, which
//! is how shared inputs (e.g. one `data` feeding two branches) are expressed.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::graph::{GraphContext, NodeId, Output};
use crate::opset::OpType;

/// Handle to one node of a [`Pattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Extra condition on a matched value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Value has this static rank
    RankEquals(usize),
    /// Value has exactly this many consumer slots
    ConsumersCount(usize),
}

impl Predicate {
    fn check(self, ctx: &GraphContext, value: Output) -> bool {
        match self {
            Predicate::RankEquals(rank) => ctx.rank(value) == Some(rank),
            Predicate::ConsumersCount(count) => ctx.consumer_count(value) == count,
        }
    }
}

#[derive(Debug, Clone)]
enum PatternNode {
    Any {
        predicates: SmallVec<[Predicate; 1]>,
    },
    Wrap {
        types: SmallVec<[OpType; 2]>,
        inputs: Vec<Label>,
        predicates: SmallVec<[Predicate; 1]>,
    },
    Or {
        alternatives: Vec<Label>,
    },
}

/// Pattern builder
///
/// ```
/// use sequence_lowering::opset::OpType;
/// use sequence_lowering::pattern::{Pattern, Predicate};
///
/// let mut p = Pattern::new();
/// let data = p.any_input_with(&[Predicate::RankEquals(3)]);
/// let order = p.constant();
/// let transpose = p.wrap(&[OpType::Transpose], &[data, order]);
/// let input = p.or(&[transpose, data]);
/// let shape_of = p.wrap(&[OpType::ShapeOf], &[input]);
/// # let _ = shape_of;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    nodes: Vec<PatternNode>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: PatternNode) -> Label {
        self.nodes.push(node);
        Label(self.nodes.len() - 1)
    }

    /// Any value
    pub fn any_input(&mut self) -> Label {
        self.any_input_with(&[])
    }

    /// Any value satisfying every predicate
    pub fn any_input_with(&mut self, predicates: &[Predicate]) -> Label {
        self.push(PatternNode::Any {
            predicates: SmallVec::from_slice(predicates),
        })
    }

    /// Output of a node of one of `types`
    ///
    /// With a non-empty `inputs`, the node must have exactly that many
    /// inputs and each must match the corresponding label.
    pub fn wrap(&mut self, types: &[OpType], inputs: &[Label]) -> Label {
        self.wrap_with(types, inputs, &[])
    }

    /// Like [`Pattern::wrap`], with predicates on the node's output
    pub fn wrap_with(&mut self, types: &[OpType], inputs: &[Label], predicates: &[Predicate]) -> Label {
        self.push(PatternNode::Wrap {
            types: SmallVec::from_slice(types),
            inputs: inputs.to_vec(),
            predicates: SmallVec::from_slice(predicates),
        })
    }

    /// Output of a `Constant`
    pub fn constant(&mut self) -> Label {
        self.wrap(&[OpType::Constant], &[])
    }

    /// Output of a `Constant` with the given rank
    pub fn constant_with_rank(&mut self, rank: usize) -> Label {
        self.wrap_with(&[OpType::Constant], &[], &[Predicate::RankEquals(rank)])
    }

    /// First matching alternative
    pub fn or(&mut self, alternatives: &[Label]) -> Label {
        self.push(PatternNode::Or {
            alternatives: alternatives.to_vec(),
        })
    }

    /// Bind a matcher for this pattern rooted at `root`
    pub fn matcher(&self, root: Label) -> PatternMatcher<'_> {
        PatternMatcher {
            pattern: self,
            root,
        }
    }
}

/// Result of a successful pattern match
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    values: FxHashMap<Label, Output>,
    /// Nodes matched by `wrap` labels, in match order
    matched_nodes: Vec<NodeId>,
}

impl MatchResult {
    /// Value bound to a label, if the label took part in the match
    pub fn get(&self, label: Label) -> Option<Output> {
        self.values.get(&label).copied()
    }

    /// Check if a label took part in the match
    ///
    /// Labels under an `or` alternative that did not match are absent.
    pub fn contains(&self, label: Label) -> bool {
        self.values.contains_key(&label)
    }

    /// Node bound to a label
    pub fn node(&self, label: Label) -> Option<NodeId> {
        self.get(label).map(|v| v.node)
    }

    /// Nodes matched by `wrap` labels
    pub fn matched_nodes(&self) -> &[NodeId] {
        &self.matched_nodes
    }

    fn bind(&mut self, label: Label, value: Output) {
        self.values.insert(label, value);
    }
}

/// Pattern matcher rooted at one label
#[derive(Debug, Clone, Copy)]
pub struct PatternMatcher<'p> {
    pattern: &'p Pattern,
    root: Label,
}

impl<'p> PatternMatcher<'p> {
    /// Match the root label against `value`
    pub fn match_value(&self, ctx: &GraphContext, value: Output) -> Option<MatchResult> {
        let mut state = MatchResult::default();
        self.match_label(ctx, self.root, value, &mut state)
            .then_some(state)
    }

    /// Match against output 0 of `node`
    pub fn match_node(&self, ctx: &GraphContext, node: NodeId) -> Option<MatchResult> {
        self.match_value(ctx, node.out(0))
    }

    fn match_label(&self, ctx: &GraphContext, label: Label, value: Output, state: &mut MatchResult) -> bool {
        if let Some(bound) = state.get(label) {
            return bound == value;
        }

        match &self.pattern.nodes[label.0] {
            PatternNode::Any { predicates } => {
                if !predicates.iter().all(|p| p.check(ctx, value)) {
                    return false;
                }
                state.bind(label, value);
                true
            }
            PatternNode::Wrap {
                types,
                inputs,
                predicates,
            } => {
                let node = match ctx.try_node(value.node) {
                    Some(n) => n,
                    None => return false,
                };
                if !types.contains(&node.op_type()) || !predicates.iter().all(|p| p.check(ctx, value)) {
                    return false;
                }
                if !inputs.is_empty() {
                    if node.inputs.len() != inputs.len() {
                        return false;
                    }
                    for (&input_label, &input_value) in inputs.iter().zip(node.inputs.iter()) {
                        if !self.match_label(ctx, input_label, input_value, state) {
                            return false;
                        }
                    }
                }
                state.bind(label, value);
                state.matched_nodes.push(node.id);
                true
            }
            PatternNode::Or { alternatives } => {
                for &alternative in alternatives {
                    let snapshot = state.clone();
                    if self.match_label(ctx, alternative, value, state) {
                        state.bind(label, value);
                        return true;
                    }
                    *state = snapshot;
                }
                false
            }
        }
    }
}
