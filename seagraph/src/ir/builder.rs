//! Graph builder.
//!
//! Appends fixed nodes at a control cursor and creates floating nodes through
//! value numbering. Used by front ends, snippet templates, tests and benches.

use super::graph::Graph;
use super::node::{NodeId, NodeList};
use super::operators::{
    BinaryOp, CmpOp, Constant, ConvertOp, FixedBinaryOp, GuardInfo, LocationIdentity, Operator,
};
use super::stamp::{Stamp, ValueKind};
use crate::error::CompileResult;

/// Builder for constructing IR graphs in control order.
pub struct GraphBuilder {
    graph: Graph,
    control: NodeId,
}

impl GraphBuilder {
    /// Start a new graph; the cursor sits on its start node.
    pub fn new(name: &str) -> Self {
        let graph = Graph::new(name);
        let control = graph.start();
        GraphBuilder { graph, control }
    }

    /// Finish building and return the graph.
    pub fn finish(self) -> Graph {
        self.graph
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Current control cursor.
    pub fn control(&self) -> NodeId {
        self.control
    }

    /// Move the control cursor, e.g. onto a branch projection.
    pub fn set_control(&mut self, control: NodeId) {
        self.control = control;
    }

    fn append(&mut self, op: Operator, extra: &[NodeId], stamp: Stamp) -> CompileResult<NodeId> {
        let mut inputs = NodeList::new();
        inputs.push(self.control);
        inputs.extend_from_slice(extra);
        let id = self.graph.add_node(op, &inputs, stamp)?;
        self.control = id;
        Ok(id)
    }

    // =========================================================================
    // Floating Values
    // =========================================================================

    pub fn parameter(&mut self, index: u16, stamp: Stamp) -> CompileResult<NodeId> {
        self.graph.add_node(Operator::Parameter(index), &[], stamp)
    }

    pub fn constant(&mut self, constant: Constant) -> CompileResult<NodeId> {
        self.graph.constant(constant)
    }

    pub fn int(&mut self, bits: u8, value: i64) -> CompileResult<NodeId> {
        self.graph.constant(Constant::int(bits, value))
    }

    pub fn binary(&mut self, op: BinaryOp, x: NodeId, y: NodeId) -> CompileResult<NodeId> {
        self.graph.unique(Operator::Binary(op), &[x, y], None)
    }

    pub fn compare(&mut self, op: CmpOp, x: NodeId, y: NodeId) -> CompileResult<NodeId> {
        self.graph.unique(Operator::Compare(op), &[x, y], None)
    }

    pub fn reinterpret(&mut self, value: NodeId, to: ValueKind) -> CompileResult<NodeId> {
        self.graph.unique(Operator::Reinterpret(to), &[value], None)
    }

    pub fn convert(&mut self, op: ConvertOp, value: NodeId, to: u8) -> CompileResult<NodeId> {
        self.graph.unique(Operator::Convert { op, to }, &[value], None)
    }

    /// Floating guard anchored at the current control cursor.
    pub fn guard(&mut self, condition: NodeId, info: GuardInfo) -> CompileResult<NodeId> {
        let anchor = self.control;
        self.graph.unique(Operator::Guard(info), &[condition, anchor], Some(Stamp::Void))
    }

    pub fn multi_guard(&mut self, guards: &[NodeId]) -> CompileResult<NodeId> {
        self.graph.unique(Operator::MultiGuard, guards, Some(Stamp::Void))
    }

    pub fn phi(&mut self, merge: NodeId, values: &[NodeId]) -> CompileResult<NodeId> {
        let mut inputs = NodeList::new();
        inputs.push(merge);
        inputs.extend_from_slice(values);
        self.graph.add_inferred(Operator::Phi, &inputs)
    }

    // =========================================================================
    // Fixed Nodes
    // =========================================================================

    pub fn read(&mut self, location: LocationIdentity, address: NodeId, stamp: Stamp) -> CompileResult<NodeId> {
        self.append(Operator::Read(location), &[address], stamp)
    }

    pub fn write(&mut self, location: LocationIdentity, address: NodeId, value: NodeId) -> CompileResult<NodeId> {
        self.append(Operator::Write(location), &[address, value], Stamp::Void)
    }

    pub fn memory_anchor(&mut self) -> CompileResult<NodeId> {
        self.append(Operator::MemoryAnchor, &[], Stamp::Void)
    }

    pub fn value_anchor(&mut self, guard: Option<NodeId>) -> CompileResult<NodeId> {
        match guard {
            Some(g) => self.append(Operator::ValueAnchor, &[g], Stamp::Void),
            None => self.append(Operator::ValueAnchor, &[], Stamp::Void),
        }
    }

    pub fn fixed_guard(&mut self, condition: NodeId, info: GuardInfo) -> CompileResult<NodeId> {
        self.append(Operator::FixedGuard(info), &[condition], Stamp::Void)
    }

    pub fn fence(&mut self) -> CompileResult<NodeId> {
        self.append(Operator::Fence, &[], Stamp::Void)
    }

    pub fn fixed_binary(&mut self, op: FixedBinaryOp, x: NodeId, y: NodeId) -> CompileResult<NodeId> {
        let stamps = [Stamp::Void, self.graph.stamp(x), self.graph.stamp(y)];
        let stamp = Operator::FixedBinary(op)
            .infer_stamp(&stamps)
            .or_else(|| self.graph.stamp(x).kind().map(Stamp::unrestricted))
            .unwrap_or(Stamp::Any);
        self.append(Operator::FixedBinary(op), &[x, y], stamp)
    }

    /// Split control on `condition`. Returns the `(true, false)` projections;
    /// the cursor is left on the true projection.
    pub fn branch(&mut self, condition: NodeId) -> CompileResult<(NodeId, NodeId)> {
        let iff = self.append(Operator::If, &[condition], Stamp::Void)?;
        let t = self.graph.add_node(Operator::IfTrue, &[iff], Stamp::Void)?;
        let f = self.graph.add_node(Operator::IfFalse, &[iff], Stamp::Void)?;
        self.control = t;
        Ok((t, f))
    }

    /// Join the given branch ends; the cursor moves onto the merge.
    pub fn merge(&mut self, ends: &[NodeId]) -> CompileResult<NodeId> {
        let merge = self.graph.add_node(Operator::Merge, ends, Stamp::Void)?;
        self.control = merge;
        Ok(merge)
    }

    pub fn return_value(&mut self, value: Option<NodeId>) -> CompileResult<NodeId> {
        match value {
            Some(v) => self.append(Operator::Return, &[v], Stamp::Void),
            None => self.append(Operator::Return, &[], Stamp::Void),
        }
    }
}
