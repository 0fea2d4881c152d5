//! IR node definitions for the Sea-of-Nodes IR.
//!
//! Sea-of-Nodes represents data flow, control flow, memory dependencies and
//! guard dependencies uniformly as typed edges between nodes.
//!
//! # Node Structure
//!
//! Each node has:
//! - **Operator**: What the node computes (see [`Operator`])
//! - **Inputs**: Ordered use-def edges; each slot's edge type comes from the
//!   operator's input layout
//! - **Stamp**: The abstract value domain of the node's result
//!
//! Nodes are only ever mutated through [`Graph`](super::graph::Graph), which
//! keeps the reverse (usage) edges in sync.

use smallvec::SmallVec;

use super::arena::Id;
use super::operators::{Constant, InputType, Operator};
use super::stamp::Stamp;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Maximum number of inline inputs before spilling to heap.
const INLINE_INPUTS: usize = 4;

/// Compact input/usage list optimized for small node arity.
pub type NodeList = SmallVec<[NodeId; INLINE_INPUTS]>;

// =============================================================================
// Node
// =============================================================================

/// A single IR node.
#[derive(Clone, PartialEq)]
pub struct Node {
    pub(crate) op: Operator,
    pub(crate) inputs: NodeList,
    pub(crate) stamp: Stamp,
}

impl Node {
    pub(crate) fn new(op: Operator, inputs: &[NodeId], stamp: Stamp) -> Self {
        Node {
            op,
            inputs: inputs.iter().copied().collect(),
            stamp,
        }
    }

    /// The node's operator.
    #[inline]
    pub fn op(&self) -> &Operator {
        &self.op
    }

    /// All input slots in order.
    #[inline]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Input at `index`.
    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index).copied()
    }

    /// The node's stamp.
    #[inline]
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Control predecessor, for fixed nodes other than `Start` and `Merge`.
    pub fn control_input(&self) -> Option<NodeId> {
        if self.op.is_fixed() && !matches!(self.op, Operator::Merge) {
            self.input(0)
        } else {
            None
        }
    }

    /// Inputs paired with their slot index and edge type.
    pub fn typed_inputs(&self) -> impl Iterator<Item = (usize, InputType, NodeId)> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .map(|(i, &n)| (i, self.op.input_type(i), n))
    }

    /// Constant payload, if this is a constant node.
    #[inline]
    pub fn as_constant(&self) -> Option<Constant> {
        match self.op {
            Operator::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Integer constant payload.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        self.as_constant().and_then(|c| c.as_i64())
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.op.is_fixed()
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.op, Operator::Constant(_))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, "(")?;
            for (i, input) in self.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{input}")?;
            }
            write!(f, ")")?;
        }
        if self.stamp.is_value() {
            write!(f, " : {:?}", self.stamp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::BinaryOp;

    #[test]
    fn test_node_accessors() {
        let a = NodeId::new(1);
        let b = NodeId::new(2);
        let node = Node::new(
            Operator::Binary(BinaryOp::Add),
            &[a, b],
            Stamp::int_range(32, 0, 3),
        );
        assert_eq!(node.inputs(), &[a, b]);
        assert_eq!(node.input(1), Some(b));
        assert_eq!(node.input(2), None);
        assert_eq!(node.control_input(), None);
        assert!(!node.is_fixed());
        assert_eq!(format!("{node:?}"), "Add(#1, #2) : i32 [0, 3]");
    }

    #[test]
    fn test_fixed_control_input() {
        let pred = NodeId::new(0);
        let fence = Node::new(Operator::Fence, &[pred], Stamp::Void);
        assert_eq!(fence.control_input(), Some(pred));
        let types: Vec<_> = fence.typed_inputs().map(|(_, t, _)| t).collect();
        assert_eq!(types, vec![InputType::Control]);

        let c = Node::new(Operator::Constant(Constant::int(32, 7)), &[], Stamp::Void);
        assert_eq!(c.as_int(), Some(7));
    }
}
