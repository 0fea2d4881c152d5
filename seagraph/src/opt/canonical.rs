//! Canonical forms.
//!
//! A canonical rule inspects one node and proposes a cheaper equivalent
//! without touching the graph:
//!
//! - **Unchanged**: the node is already canonical
//! - **Replace**: every usage should be redirected to an existing node or to
//!   a node built from a [`NodeTemplate`]
//! - **Delete**: the node can go; optional usage edges are dropped
//!
//! The [canonicalizer](super::canonicalizer) applies the result. Keeping
//! rules pure lets them be tried in any order and makes the fixpoint
//! independent of the order nodes are visited.

use smallvec::SmallVec;

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BinaryOp, CmpOp, Constant, ConvertOp, FixedBinaryOp, Graph, GuardInfo, InputType,
    LocationIdentity, NodeId, NodeKind, NodeList, Operator, StageFlags, Stamp, ValueKind,
};

// =============================================================================
// Canonical Results
// =============================================================================

/// Input of a node that may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Node(NodeId),
    /// Value-numbered into the graph when the template is materialized.
    Constant(Constant),
}

impl From<NodeId> for Operand {
    fn from(id: NodeId) -> Self {
        Operand::Node(id)
    }
}

impl From<Constant> for Operand {
    fn from(constant: Constant) -> Self {
        Operand::Constant(constant)
    }
}

/// Description of a floating node to create (or find) on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTemplate {
    pub op: Operator,
    pub inputs: SmallVec<[Operand; 4]>,
    /// Explicit stamp; inferred from the inputs when `None`.
    pub stamp: Option<Stamp>,
}

impl NodeTemplate {
    pub fn new(op: Operator, inputs: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            op,
            inputs: inputs.into_iter().collect(),
            stamp: None,
        }
    }

    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Find or create the described node.
    pub fn materialize(&self, graph: &mut Graph) -> CompileResult<NodeId> {
        if self.op.is_fixed() {
            return Err(CompileError::graph_invariant(format!(
                "canonical templates cannot create fixed node {}",
                self.op
            )));
        }
        let mut inputs = NodeList::new();
        for operand in &self.inputs {
            inputs.push(match *operand {
                Operand::Node(id) => id,
                Operand::Constant(c) => graph.constant(c)?,
            });
        }
        graph.unique(self.op, &inputs, self.stamp)
    }
}

/// What a node should be replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Existing(NodeId),
    New(NodeTemplate),
}

/// Outcome of a canonical rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Already canonical.
    Unchanged,
    /// Redirect all usages to `target` and remove the node.
    ReplaceWith { target: Target, rule: &'static str },
    /// Remove the node; its usages must all be optional edges.
    Delete { rule: &'static str },
    /// A shape the rules do not handle. Left alone and counted.
    Unsupported { rule: &'static str },
}

impl Replacement {
    pub fn existing(id: NodeId, rule: &'static str) -> Self {
        Replacement::ReplaceWith {
            target: Target::Existing(id),
            rule,
        }
    }

    pub fn new_node(template: NodeTemplate, rule: &'static str) -> Self {
        Replacement::ReplaceWith {
            target: Target::New(template),
            rule,
        }
    }

    pub fn constant(constant: Constant, rule: &'static str) -> Self {
        Self::new_node(NodeTemplate::new(Operator::Constant(constant), []), rule)
    }

    pub fn delete(rule: &'static str) -> Self {
        Replacement::Delete { rule }
    }

    /// Check whether the graph is left as it is.
    #[inline]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Replacement::Unchanged | Replacement::Unsupported { .. })
    }

    /// Name of the rule that produced this result.
    pub fn rule(&self) -> Option<&'static str> {
        match self {
            Replacement::Unchanged => None,
            Replacement::ReplaceWith { rule, .. }
            | Replacement::Delete { rule }
            | Replacement::Unsupported { rule } => Some(rule),
        }
    }
}

// =============================================================================
// Rule Seam
// =============================================================================

/// Additional canonicalization registered by an embedder.
///
/// Custom rules are consulted before the built-in ones and must be pure.
pub trait CanonicalRule: Send + Sync {
    /// Name used in statistics and non-termination reports.
    fn name(&self) -> &'static str;

    /// Check whether the rule is interested in nodes of `kind`.
    fn applies_to(&self, kind: NodeKind) -> bool;

    /// Inspect `node` and propose a replacement.
    fn canonical(&self, graph: &Graph, node: NodeId) -> Replacement;
}

// =============================================================================
// Built-in Rules
// =============================================================================

/// Canonical form of a node under the built-in rules.
pub fn canonical(graph: &Graph, id: NodeId) -> Replacement {
    let Some(node) = graph.get(id) else {
        return Replacement::Unchanged;
    };
    let op = *node.op();
    if let Some(folded) = stamp_constant(graph, id, &op) {
        return folded;
    }
    match op {
        Operator::Binary(bop) => canonical_binary(graph, id, bop),
        Operator::Compare(cop) => canonical_compare(graph, id, cop),
        Operator::Reinterpret(to) => canonical_reinterpret(graph, id, to),
        Operator::Convert { op, to } => canonical_convert(graph, id, op, to),
        Operator::Phi => canonical_phi(graph, id),
        Operator::Guard(info) => canonical_guard(graph, id, info),
        Operator::MultiGuard => canonical_multi_guard(graph, id),
        Operator::FloatingRead(location) => canonical_floating_read(graph, id, location),
        Operator::FixedBinary(fop) => canonical_fixed_binary(graph, id, fop),
        Operator::MemoryAnchor => canonical_memory_anchor(graph, id),
        Operator::ValueAnchor => canonical_value_anchor(graph, id),
        Operator::FixedGuard(info) => canonical_fixed_guard(graph, id, info),
        _ => Replacement::Unchanged,
    }
}

fn int_constant(graph: &Graph, id: NodeId) -> Option<i64> {
    graph.get(id).and_then(|n| n.as_int())
}

fn int_bits(graph: &Graph, id: NodeId) -> Option<u8> {
    graph.stamp(id).as_int().map(|s| s.bits())
}

fn bool_constant(value: bool) -> Constant {
    Constant::int(32, value as i64)
}

/// A pure value whose stamp admits exactly one value is that value.
fn stamp_constant(graph: &Graph, id: NodeId, op: &Operator) -> Option<Replacement> {
    if !matches!(
        op,
        Operator::Binary(_)
            | Operator::Compare(_)
            | Operator::Reinterpret(_)
            | Operator::Convert { .. }
            | Operator::Phi
    ) {
        return None;
    }
    let constant = graph.stamp(id).as_constant()?;
    Some(Replacement::constant(constant, "stamp.constant"))
}

fn canonical_binary(graph: &Graph, id: NodeId, op: BinaryOp) -> Replacement {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let Some(bits) = int_bits(graph, x) else {
        return Replacement::Unsupported {
            rule: "binary.non_integer",
        };
    };
    let (cx, cy) = (int_constant(graph, x), int_constant(graph, y));

    match (cx, cy) {
        (Some(a), Some(b)) => {
            return Replacement::constant(Constant::int(bits, op.fold(bits, a, b)), "binary.fold");
        }
        (Some(_), None) if op.is_commutative() => {
            let swapped = NodeTemplate::new(Operator::Binary(op), [y.into(), x.into()]);
            return Replacement::new_node(swapped, "binary.commute");
        }
        _ => {}
    }

    if let Some(b) = cy {
        if b == op.identity(bits) {
            return Replacement::existing(x, "binary.identity");
        }
        if op.absorbing(bits) == Some(b) {
            return Replacement::constant(Constant::int(bits, b), "binary.absorb");
        }
        // (z op c1) op c2 => z op (c1 op c2)
        if op.is_commutative() && graph.op(x) == Operator::Binary(op) {
            let (z, c1) = (graph.inputs(x)[0], graph.inputs(x)[1]);
            if let Some(a) = int_constant(graph, c1) {
                let folded = Constant::int(bits, op.fold(bits, a, b));
                let template = NodeTemplate::new(Operator::Binary(op), [z.into(), folded.into()]);
                return Replacement::new_node(template, "binary.reassociate");
            }
        }
    }

    if x == y {
        match op {
            BinaryOp::Sub | BinaryOp::Xor => {
                return Replacement::constant(Constant::int(bits, 0), "binary.self_cancel");
            }
            BinaryOp::And | BinaryOp::Or => return Replacement::existing(x, "binary.self_idempotent"),
            _ => {}
        }
    }
    Replacement::Unchanged
}

fn canonical_compare(graph: &Graph, id: NodeId, op: CmpOp) -> Replacement {
    let (x, y) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let Some(bits) = int_bits(graph, x) else {
        return Replacement::Unsupported {
            rule: "compare.non_integer",
        };
    };
    if x == y {
        return Replacement::constant(bool_constant(op.reflexive_result()), "compare.self");
    }
    let (cx, cy) = (int_constant(graph, x), int_constant(graph, y));
    if let (Some(a), Some(b)) = (cx, cy) {
        return Replacement::constant(bool_constant(op.fold(bits, a, b)), "compare.fold");
    }
    if let (Some(sx), Some(sy)) = (graph.stamp(x).as_int(), graph.stamp(y).as_int()) {
        if let Some(result) = op.fold_stamps(sx, sy) {
            return Replacement::constant(bool_constant(result), "compare.stamps");
        }
    }
    if op.is_commutative() && cx.is_some() && cy.is_none() {
        let swapped = NodeTemplate::new(Operator::Compare(op), [y.into(), x.into()]);
        return Replacement::new_node(swapped, "compare.commute");
    }
    Replacement::Unchanged
}

fn canonical_reinterpret(graph: &Graph, id: NodeId, to: ValueKind) -> Replacement {
    let value = graph.inputs(id)[0];
    if let Some(folded) = graph
        .get(value)
        .and_then(|n| n.as_constant())
        .and_then(|c| c.reinterpret(to))
    {
        return Replacement::constant(folded, "reinterpret.fold");
    }
    if graph.stamp(value).kind() == Some(to) {
        return Replacement::existing(value, "reinterpret.noop");
    }
    if let Operator::Reinterpret(middle) = graph.op(value) {
        let original = graph.inputs(value)[0];
        if middle.bits() == to.bits() && graph.stamp(original).kind() == Some(to) {
            return Replacement::existing(original, "reinterpret.cancel");
        }
    }
    Replacement::Unchanged
}

fn canonical_convert(graph: &Graph, id: NodeId, op: ConvertOp, to: u8) -> Replacement {
    let value = graph.inputs(id)[0];
    let Some(from) = int_bits(graph, value) else {
        return Replacement::Unsupported {
            rule: "convert.non_integer",
        };
    };
    if let Some(v) = int_constant(graph, value) {
        return Replacement::constant(Constant::int(to, op.fold(from, to, v)), "convert.fold");
    }
    if from == to {
        return Replacement::existing(value, "convert.noop");
    }

    let Operator::Convert { op: inner, .. } = graph.op(value) else {
        return Replacement::Unchanged;
    };
    let original = graph.inputs(value)[0];
    let Some(original_bits) = int_bits(graph, original) else {
        return Replacement::Unchanged;
    };
    let convert = |op: ConvertOp, rule| {
        Replacement::new_node(NodeTemplate::new(Operator::Convert { op, to }, [original.into()]), rule)
    };
    match (op, inner) {
        (ConvertOp::Narrow, ConvertOp::SignExtend | ConvertOp::ZeroExtend) => {
            if original_bits == to {
                Replacement::existing(original, "convert.narrow_extend")
            } else if to < original_bits {
                convert(ConvertOp::Narrow, "convert.narrow_extend")
            } else {
                convert(inner, "convert.narrow_extend")
            }
        }
        (ConvertOp::Narrow, ConvertOp::Narrow) => convert(ConvertOp::Narrow, "convert.narrow_narrow"),
        (ConvertOp::SignExtend, ConvertOp::SignExtend) | (ConvertOp::ZeroExtend, ConvertOp::ZeroExtend) => {
            convert(op, "convert.extend_extend")
        }
        _ => Replacement::Unchanged,
    }
}

fn canonical_phi(graph: &Graph, id: NodeId) -> Replacement {
    let mut only = None;
    for &value in &graph.inputs(id)[1..] {
        if value == id {
            continue;
        }
        match only {
            None => only = Some(value),
            Some(v) if v == value => {}
            Some(_) => return Replacement::Unchanged,
        }
    }
    match only {
        Some(value) => Replacement::existing(value, "phi.redundant"),
        None => Replacement::Unchanged,
    }
}

fn canonical_guard(graph: &Graph, id: NodeId, info: GuardInfo) -> Replacement {
    let (condition, anchor) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    match int_constant(graph, condition) {
        // Anything guarded by a check that always passes only depends on
        // the anchor.
        Some(c) if info.passes(c != 0) => Replacement::existing(anchor, "guard.passes"),
        _ => Replacement::Unchanged,
    }
}

fn canonical_multi_guard(graph: &Graph, id: NodeId) -> Replacement {
    let mut guards: SmallVec<[NodeId; 8]> = SmallVec::new();
    let mut flattened = false;
    for &guard in graph.inputs(id) {
        if guard != id && graph.op(guard) == Operator::MultiGuard {
            guards.extend_from_slice(graph.inputs(guard));
            flattened = true;
        } else {
            guards.push(guard);
        }
    }
    guards.sort_unstable();
    guards.dedup();

    match guards.len() {
        0 => Replacement::delete("multiguard.empty"),
        1 => Replacement::existing(guards[0], "multiguard.single"),
        _ if flattened || guards.as_slice() != graph.inputs(id) => {
            let template = NodeTemplate::new(Operator::MultiGuard, guards.iter().map(|&g| Operand::Node(g)));
            Replacement::new_node(template, "multiguard.normalize")
        }
        _ => Replacement::Unchanged,
    }
}

fn canonical_floating_read(graph: &Graph, id: NodeId, location: LocationIdentity) -> Replacement {
    let (address, memory) = (graph.inputs(id)[0], graph.inputs(id)[1]);
    let Operator::Write(written) = graph.op(memory) else {
        return Replacement::Unchanged;
    };
    if written == location && !location.is_any() {
        let stored = graph.inputs(memory)[2];
        if graph.input(memory, 1) == Some(address) && graph.stamp(stored).kind() == graph.stamp(id).kind() {
            return Replacement::existing(stored, "read.forward");
        }
        return Replacement::Unchanged;
    }
    if written.overlaps(location) {
        return Replacement::Unchanged;
    }
    let earlier = graph
        .control_predecessor(memory)
        .and_then(|pred| graph.last_kill(pred, location).ok());
    match earlier {
        Some(kill) => {
            let guard = graph.input(id, 2).map(Operand::from);
            let operands = [Operand::from(address), Operand::from(kill)].into_iter().chain(guard);
            let template = NodeTemplate::new(Operator::FloatingRead(location), operands).with_stamp(graph.stamp(id));
            Replacement::new_node(template, "read.skip_write")
        }
        None => Replacement::Unchanged,
    }
}

fn canonical_fixed_binary(graph: &Graph, id: NodeId, op: FixedBinaryOp) -> Replacement {
    let (x, y) = (graph.inputs(id)[1], graph.inputs(id)[2]);
    let Some(bits) = int_bits(graph, x) else {
        return Replacement::Unsupported {
            rule: "fixed_binary.non_integer",
        };
    };
    let divisor = int_constant(graph, y);
    if let (Some(a), Some(b)) = (int_constant(graph, x), divisor) {
        if let Some(folded) = op.fold(bits, a, b) {
            return Replacement::constant(Constant::int(bits, folded), "fixed_binary.fold");
        }
    }
    if op == FixedBinaryOp::Div && divisor == Some(1) {
        return Replacement::existing(x, "fixed_binary.div_one");
    }
    Replacement::Unchanged
}

fn canonical_memory_anchor(graph: &Graph, id: NodeId) -> Replacement {
    // Once reads are fixed again the anchor may order them; keep it.
    if graph.is_after_stage(StageFlags::FIXED_READS) {
        return Replacement::Unchanged;
    }
    if graph.usage_edges(id).iter().all(|e| e.ty == InputType::Control) {
        return Replacement::delete("memory_anchor.unused");
    }
    Replacement::Unchanged
}

fn canonical_value_anchor(graph: &Graph, id: NodeId) -> Replacement {
    match graph.input(id, 1) {
        None => Replacement::delete("value_anchor.empty"),
        Some(anchored) if graph.op(anchored).is_fixed() => Replacement::delete("value_anchor.fixed"),
        Some(_) => Replacement::Unchanged,
    }
}

fn canonical_fixed_guard(graph: &Graph, id: NodeId, info: GuardInfo) -> Replacement {
    match int_constant(graph, graph.inputs(id)[1]) {
        Some(c) if info.passes(c != 0) => Replacement::delete("fixed_guard.passes"),
        _ => Replacement::Unchanged,
    }
}

// =============================================================================
// Tests
// =============================================================================
