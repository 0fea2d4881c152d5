//! Sea-of-Nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: Node ids are never reused within a graph
//! - **Use-def chains**: Every input edge has a matching usage entry, kept in
//!   sync by the mutation primitives below (usages are a multiset: a node used
//!   twice by the same user appears twice)
//! - **Value numbering**: `unique` returns an existing identical node instead of
//!   creating a duplicate
//! - **Stages and cancellation**: Monotone stage flags and a shared cancel token
//!
//! Direct field mutation is impossible from outside this module; all edits go
//! through `add_node`, `set_input`, `replace_all_usages`, `delete_node` and
//! friends.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use smallvec::SmallVec;

use super::arena::{Arena, SecondaryMap};
use super::node::{Node, NodeId, NodeList};
use super::operators::{Constant, ConvertOp, InputType, NodeKind, Operator};
use super::stamp::{Stamp, ValueKind};
use crate::error::{CompileError, CompileResult};

// =============================================================================
// Stages and Cancellation
// =============================================================================

bitflags! {
    /// Irreversible lowering milestones reached by a graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageFlags: u8 {
        /// Fixed reads have been turned into floating reads.
        const FLOATING_READS = 1 << 0;
        /// Floating guards have been lowered to fixed guards.
        const GUARDS_LOWERED = 1 << 1;
        /// Floating reads have been pinned back onto the control chain.
        const FIXED_READS = 1 << 2;
    }
}

/// Cooperative cancellation flag shared between a compilation and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next phase boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A single input edge seen from its target: `user.inputs[index]` is the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub user: NodeId,
    pub index: usize,
    pub ty: InputType,
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph for one compilation unit.
pub struct Graph {
    name: Arc<str>,
    nodes: Arena<Node>,
    usages: SecondaryMap<Node, NodeList>,
    start: NodeId,
    stages: StageFlags,
    cancel: CancellationToken,
    /// Value-numbering cache for input-less nodes (constants).
    leaf_cache: FxHashMap<Operator, NodeId>,
    /// Nodes added or touched while tracking is on.
    changes: Option<Vec<NodeId>>,
    mutations: u64,
}

impl Graph {
    /// Create a new graph containing only its start node.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(Operator::Start, &[], Stamp::Void));
        Graph {
            name: name.into(),
            nodes,
            usages: SecondaryMap::new(),
            start,
            stages: StageFlags::empty(),
            cancel: CancellationToken::new(),
            leaf_cache: FxHashMap::default(),
            changes: None,
            mutations: 0,
        }
    }

    /// Structural copy with a fresh cancellation token and no change tracking.
    pub fn duplicate(&self) -> Graph {
        Graph {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            usages: self.usages.clone(),
            start: self.start,
            stages: self.stages,
            cancel: CancellationToken::new(),
            leaf_cache: self.leaf_cache.clone(),
            changes: None,
            mutations: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// One past the largest id ever allocated.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.nodes.id_bound()
    }

    /// Number of edge mutations performed so far.
    #[inline]
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Get a live node. Panics on a deleted id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Get a live node or report the dangling id.
    pub fn try_node(&self, id: NodeId) -> CompileResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| CompileError::invariant(id, "reference to deleted node"))
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> Stamp {
        self.nodes[id].stamp
    }

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].inputs
    }

    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.input(index))
    }

    /// Usage multiset of a node.
    #[inline]
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.usages.get(id).map_or(&[][..], |u| u.as_slice())
    }

    #[inline]
    pub fn usage_count(&self, id: NodeId) -> usize {
        self.usages(id).len()
    }

    #[inline]
    pub fn has_usages(&self, id: NodeId) -> bool {
        !self.usages(id).is_empty()
    }

    /// Users of a node without repetition, in first-use order.
    pub fn distinct_usages(&self, id: NodeId) -> NodeList {
        let mut seen = FxHashSet::default();
        self.usages(id)
            .iter()
            .copied()
            .filter(|u| seen.insert(*u))
            .collect()
    }

    /// Every input edge that points at `id`.
    pub fn usage_edges(&self, id: NodeId) -> SmallVec<[Edge; 4]> {
        let mut edges = SmallVec::new();
        for user in self.distinct_usages(id) {
            let node = &self.nodes[user];
            for (index, ty, input) in node.typed_inputs() {
                if input == id {
                    edges.push(Edge { user, index, ty });
                }
            }
        }
        edges
    }

    /// Iterate over all live node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.ids()
    }

    /// Live node ids collected up front, safe to hold across mutation.
    pub fn snapshot(&self) -> Vec<NodeId> {
        self.nodes.ids().collect()
    }

    /// Lazily iterate over live nodes of one kind.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(move |(_, n)| n.op.kind() == kind)
            .map(|(id, _)| id)
    }

    /// Snapshot of live nodes of one kind.
    pub fn snapshot_of(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes_of(kind).collect()
    }

    // =========================================================================
    // Stages, Cancellation, Change Tracking
    // =========================================================================

    #[inline]
    pub fn stages(&self) -> StageFlags {
        self.stages
    }

    #[inline]
    pub fn is_after_stage(&self, stage: StageFlags) -> bool {
        self.stages.contains(stage)
    }

    /// Mark a stage as reached. Stages are never cleared.
    pub fn set_stage(&mut self, stage: StageFlags) {
        self.stages.insert(stage);
    }

    /// Token that cancels this compilation when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fail with [`CompileError::Cancelled`] if cancellation was requested.
    pub fn check_cancellation(&self, phase: &str) -> CompileResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    /// Start recording added and touched nodes.
    pub fn start_tracking(&mut self) {
        self.changes = Some(Vec::new());
    }

    /// Stop recording and return the live recorded nodes, deduplicated.
    pub fn take_tracked(&mut self) -> Vec<NodeId> {
        let recorded = self.changes.take().unwrap_or_default();
        let mut seen = FxHashSet::default();
        recorded
            .into_iter()
            .filter(|id| self.nodes.contains(*id) && seen.insert(*id))
            .collect()
    }

    #[inline]
    fn record(&mut self, id: NodeId) {
        if let Some(changes) = self.changes.as_mut() {
            changes.push(id);
        }
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node with an explicit stamp.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId], stamp: Stamp) -> CompileResult<NodeId> {
        if matches!(op, Operator::Start) {
            return Err(CompileError::graph_invariant("a graph has exactly one start node"));
        }
        if !op.accepts_arity(inputs.len()) {
            return Err(CompileError::graph_invariant(format!(
                "{op} does not accept {} inputs",
                inputs.len()
            )));
        }
        for &input in inputs {
            self.try_node(input)?;
        }
        if let Some(kind) = stamp.kind().filter(|k| !k.is_well_formed()) {
            return Err(CompileError::graph_invariant(format!("{op} cannot produce {kind}")));
        }
        self.check_operands(&op, inputs)?;

        let id = self.nodes.alloc(Node::new(op, inputs, stamp));
        for &input in inputs {
            self.usages.entry(input).push(id);
        }
        if inputs.is_empty() && op.is_value_numberable() {
            self.leaf_cache.entry(op).or_insert(id);
        }
        self.mutations += 1;
        self.record(id);
        Ok(id)
    }

    /// Reject operand widths the stamp transfer functions are not defined for.
    ///
    /// Inputs whose stamp has no kind yet (`Any`, `Empty`) are not checked.
    fn check_operands(&self, op: &Operator, inputs: &[NodeId]) -> CompileResult<()> {
        let bad = |message: String| Err(CompileError::graph_invariant(message));
        let kind_of = |i: usize| inputs.get(i).and_then(|&n| self.nodes.get(n)).and_then(|n| n.stamp.kind());

        match *op {
            Operator::Constant(c) if !c.kind().is_well_formed() => bad(format!("malformed constant {c}")),
            Operator::Reinterpret(to) => {
                if !to.is_well_formed() {
                    return bad(format!("cannot reinterpret as {to}"));
                }
                match kind_of(0) {
                    Some(from) if from.bits().is_none() || from.bits() != to.bits() => {
                        bad(format!("reinterpret from {from} to {to} changes width"))
                    }
                    _ => Ok(()),
                }
            }
            Operator::Convert { op: conversion, to } => {
                if !ValueKind::Int(to).is_well_formed() {
                    return bad(format!("{op} targets an unsupported width"));
                }
                let from = match kind_of(0) {
                    None => return Ok(()),
                    Some(ValueKind::Int(from)) => from,
                    Some(other) => return bad(format!("{op} needs an integer input, got {other}")),
                };
                let ok = match conversion {
                    ConvertOp::Narrow => to < from,
                    ConvertOp::SignExtend | ConvertOp::ZeroExtend => to > from,
                };
                if ok {
                    Ok(())
                } else {
                    bad(format!("{op} is not a valid conversion from i{from}"))
                }
            }
            Operator::Binary(_) | Operator::Compare(_) => match (kind_of(0), kind_of(1)) {
                (Some(x), Some(y)) if x != y => bad(format!("{op} mixes {x} and {y}")),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Add a node whose stamp is inferred from its inputs.
    pub fn add_inferred(&mut self, op: Operator, inputs: &[NodeId]) -> CompileResult<NodeId> {
        let stamp = self.inferred_stamp(&op, inputs)?;
        self.add_node(op, inputs, stamp)
    }

    /// Return an existing node identical to `op(inputs)`, or add one.
    ///
    /// Only value-numberable operators are shared; others are always added.
    pub fn unique(&mut self, op: Operator, inputs: &[NodeId], stamp: Option<Stamp>) -> CompileResult<NodeId> {
        if op.is_value_numberable() {
            if let Some(existing) = self.find_existing(&op, inputs, None) {
                return Ok(existing);
            }
        }
        let stamp = match stamp {
            Some(stamp) => stamp,
            None => self.inferred_stamp(&op, inputs)?,
        };
        self.add_node(op, inputs, stamp)
    }

    /// Value-numbered constant.
    pub fn constant(&mut self, constant: Constant) -> CompileResult<NodeId> {
        self.unique(Operator::Constant(constant), &[], None)
    }

    /// Another live node interchangeable with `id`, if one exists.
    pub fn find_duplicate(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id)?;
        if !node.op.is_value_numberable() {
            return None;
        }
        self.find_existing(&node.op, &node.inputs, Some(id))
    }

    fn find_existing(&self, op: &Operator, inputs: &[NodeId], exclude: Option<NodeId>) -> Option<NodeId> {
        match inputs.first() {
            None => self
                .leaf_cache
                .get(op)
                .copied()
                .filter(|&c| Some(c) != exclude && self.nodes.contains(c)),
            Some(&first) => self.usages(first).iter().copied().find(|&u| {
                Some(u) != exclude
                    && self
                        .nodes
                        .get(u)
                        .is_some_and(|n| n.op == *op && n.inputs.as_slice() == inputs)
            }),
        }
    }

    fn inferred_stamp(&self, op: &Operator, inputs: &[NodeId]) -> CompileResult<Stamp> {
        self.check_operands(op, inputs)?;
        let stamps: SmallVec<[Stamp; 4]> = inputs
            .iter()
            .map(|&i| self.try_node(i).map(|n| n.stamp))
            .collect::<CompileResult<_>>()?;
        op.infer_stamp(&stamps)
            .ok_or_else(|| CompileError::graph_invariant(format!("{op} needs an explicit stamp")))
    }

    // =========================================================================
    // Stamps
    // =========================================================================

    /// Refine a node's stamp from its inputs. Returns `true` if it narrowed.
    ///
    /// The new stamp is the join of the old one with the inferred one, so
    /// stamps only ever shrink.
    pub fn try_infer_stamp(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let Ok(inferred) = self.inferred_stamp(&node.op, &node.inputs) else {
            return false;
        };
        let current = node.stamp;
        let refined = current.join(&inferred);
        if refined == current || (refined == Stamp::Empty && inferred.kind() != current.kind()) {
            return false;
        }
        self.nodes[id].stamp = refined;
        true
    }

    pub(crate) fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.stamp = stamp;
        }
    }

    // =========================================================================
    // Edge Mutation
    // =========================================================================

    fn unregister_usage(&mut self, input: NodeId, user: NodeId) {
        let mut emptied = false;
        if let Some(list) = self.usages.get_mut(input) {
            if let Some(pos) = list.iter().position(|&u| u == user) {
                list.remove(pos);
                emptied = list.is_empty();
            }
        }
        if emptied {
            self.record(input);
        }
    }

    /// Point input slot `index` of `id` at `new`.
    pub fn set_input(&mut self, id: NodeId, index: usize, new: NodeId) -> CompileResult<()> {
        self.try_node(new)?;
        let old = self
            .try_node(id)?
            .input(index)
            .ok_or_else(|| CompileError::invariant(id, format!("no input slot {index}")))?;
        if old == new {
            return Ok(());
        }
        self.nodes[id].inputs[index] = new;
        self.unregister_usage(old, id);
        self.usages.entry(new).push(id);
        self.mutations += 1;
        self.record(id);
        Ok(())
    }

    /// Append an input to a variadic node.
    pub fn add_input(&mut self, id: NodeId, new: NodeId) -> CompileResult<()> {
        self.try_node(new)?;
        let count = self.try_node(id)?.inputs.len();
        if !self.nodes[id].op.accepts_arity(count + 1) {
            return Err(CompileError::invariant(id, "input list is full"));
        }
        self.nodes[id].inputs.push(new);
        self.usages.entry(new).push(id);
        self.mutations += 1;
        self.record(id);
        Ok(())
    }

    /// Remove input slot `index`, shifting later inputs down.
    pub fn remove_input(&mut self, id: NodeId, index: usize) -> CompileResult<NodeId> {
        let node = self.try_node(id)?;
        if index >= node.inputs.len() {
            return Err(CompileError::invariant(id, format!("no input slot {index}")));
        }
        let old = self.nodes[id].inputs.remove(index);
        self.unregister_usage(old, id);
        self.mutations += 1;
        self.record(id);
        Ok(old)
    }

    /// Drop every input of a node, returning the former inputs.
    pub fn clear_inputs(&mut self, id: NodeId) -> CompileResult<NodeList> {
        self.try_node(id)?;
        let inputs = std::mem::take(&mut self.nodes[id].inputs);
        for &input in &inputs {
            self.unregister_usage(input, id);
        }
        self.mutations += 1;
        Ok(inputs)
    }

    /// Redirect the usage edges of `old` accepted by `filter` to `new`.
    /// Returns the number of edges moved.
    pub fn replace_usages_where(
        &mut self,
        old: NodeId,
        new: NodeId,
        mut filter: impl FnMut(&Edge) -> bool,
    ) -> CompileResult<usize> {
        self.try_node(old)?;
        self.try_node(new)?;
        if old == new {
            return Ok(0);
        }
        let mut moved = 0;
        for edge in self.usage_edges(old) {
            if filter(&edge) {
                self.set_input(edge.user, edge.index, new)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Redirect every usage of `old` to `new`.
    pub fn replace_all_usages(&mut self, old: NodeId, new: NodeId) -> CompileResult<usize> {
        self.replace_usages_where(old, new, |_| true)
    }

    /// Redirect every usage of `old` to `new` except those by `except`.
    pub fn replace_all_usages_except(&mut self, old: NodeId, new: NodeId, except: NodeId) -> CompileResult<usize> {
        self.replace_usages_where(old, new, |e| e.user != except)
    }

    /// Delete a node that nothing uses any more.
    pub fn delete_node(&mut self, id: NodeId) -> CompileResult<()> {
        if id == self.start {
            return Err(CompileError::invariant(id, "cannot delete the start node"));
        }
        self.try_node(id)?;
        if self.has_usages(id) {
            return Err(CompileError::invariant(
                id,
                format!("cannot delete a node with {} usages", self.usage_count(id)),
            ));
        }
        self.clear_inputs(id)?;
        if let Some(node) = self.nodes.remove(id) {
            if self.leaf_cache.get(&node.op) == Some(&id) {
                self.leaf_cache.remove(&node.op);
            }
        }
        self.usages.reset(id);
        self.mutations += 1;
        Ok(())
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check edge consistency and edge typing for the whole graph.
    pub fn verify(&self) -> CompileResult<()> {
        for (id, node) in self.nodes.iter() {
            if !node.op.accepts_arity(node.inputs.len()) {
                return Err(CompileError::invariant(id, format!("{} has bad arity {}", node.op, node.inputs.len())));
            }

            for (index, ty, input) in node.typed_inputs() {
                let target = self
                    .nodes
                    .get(input)
                    .ok_or_else(|| CompileError::invariant(id, format!("input {index} is dangling ({input})")))?;
                self.verify_edge(id, node, index, ty, input, target)?;

                let in_inputs = node.inputs.iter().filter(|&&i| i == input).count();
                let in_usages = self.usages(input).iter().filter(|&&u| u == id).count();
                if in_inputs != in_usages {
                    return Err(CompileError::invariant(
                        id,
                        format!("{in_inputs} input edges to {input} but {in_usages} usage entries"),
                    ));
                }
            }

            for &user in self.usages(id) {
                let user_node = self
                    .nodes
                    .get(user)
                    .ok_or_else(|| CompileError::invariant(id, format!("usage by deleted node {user}")))?;
                if !user_node.inputs.contains(&id) {
                    return Err(CompileError::invariant(id, format!("stale usage entry for {user}")));
                }
            }

            self.verify_shape(id, node)?;
        }
        Ok(())
    }

    fn verify_edge(&self, id: NodeId, node: &Node, index: usize, ty: InputType, input: NodeId, target: &Node) -> CompileResult<()> {
        let ok = match ty {
            InputType::Control => match node.op {
                Operator::IfTrue | Operator::IfFalse => matches!(target.op, Operator::If),
                _ => target.op.is_fixed() && !matches!(target.op, Operator::If | Operator::Return),
            },
            InputType::Value => target.stamp.is_value(),
            InputType::Memory => target.op.is_memory_kill(),
            InputType::Guard => target.op.can_be_guard(),
            InputType::Association => match node.op {
                Operator::Phi => matches!(target.op, Operator::Merge),
                _ => target.op.is_fixed(),
            },
        };
        if ok {
            Ok(())
        } else {
            Err(CompileError::invariant(
                id,
                format!("{ty:?} input {index} of {} cannot point at {} ({input})", node.op, target.op),
            ))
        }
    }

    fn verify_shape(&self, id: NodeId, node: &Node) -> CompileResult<()> {
        match node.op {
            Operator::Phi => {
                let merge = node.inputs[0];
                let preds = self.nodes[merge].inputs.len();
                if node.inputs.len() - 1 != preds {
                    return Err(CompileError::invariant(
                        id,
                        format!("phi has {} values for {preds} predecessors", node.inputs.len() - 1),
                    ));
                }
            }
            Operator::FloatingRead(_) if self.is_after_stage(StageFlags::FIXED_READS) => {
                return Err(CompileError::invariant(id, "floating read after reads were fixed"));
            }
            Operator::Guard(_) if self.is_after_stage(StageFlags::GUARDS_LOWERED) => {
                return Err(CompileError::invariant(id, "floating guard after guard lowering"));
            }
            _ => {}
        }

        if node.op.is_fixed() {
            let successors = self.control_successors(id).len();
            let limit = match node.op {
                Operator::If => 2,
                Operator::Return => 0,
                _ => 1,
            };
            if successors > limit {
                return Err(CompileError::invariant(
                    id,
                    format!("{} has {successors} control successors", node.op),
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Fingerprint
    // =========================================================================

    /// Renumbering-invariant structural summary of the graph.
    ///
    /// Every node is hashed from its operator, stamp and the hashes of its
    /// inputs, in rounds, until no hash changes. On an acyclic graph that is
    /// the full recursive structure; a cycle is unrolled once per node, so
    /// the result never depends on which node of the cycle comes first.
    /// Multi-guard inputs are compared as a multiset.
    pub fn fingerprint(&self) -> GraphFingerprint {
        let ids: Vec<NodeId> = self.nodes.ids().collect();
        let mut hashes = vec![0u64; self.nodes.id_bound()];
        for _ in 0..=ids.len() {
            let mut next = hashes.clone();
            for &id in &ids {
                let node = &self.nodes[id];
                let mut inputs: SmallVec<[u64; 4]> = node.inputs.iter().map(|i| hashes[i.as_usize()]).collect();
                if matches!(node.op, Operator::MultiGuard) {
                    inputs.sort_unstable();
                }
                let mut hasher = FxHasher::default();
                node.op.hash(&mut hasher);
                node.stamp.hash(&mut hasher);
                inputs.hash(&mut hasher);
                next[id.as_usize()] = hasher.finish();
            }
            if next == hashes {
                break;
            }
            hashes = next;
        }
        let mut summary: Vec<u64> = ids.iter().map(|id| hashes[id.as_usize()]).collect();
        summary.sort_unstable();
        GraphFingerprint(summary)
    }
}

/// Result of [`Graph::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphFingerprint(Vec<u64>);

impl GraphFingerprint {
    /// Number of nodes summarized.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} ({} nodes, stages {:?})", self.name, self.len(), self.stages)?;
        for (id, node) in self.nodes.iter() {
            writeln!(f, "  {id} = {node:?}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{BinaryOp, CmpOp};

    fn param(graph: &mut Graph, index: u16) -> NodeId {
        graph
            .add_node(Operator::Parameter(index), &[], Stamp::int_range(32, 0, 100))
            .unwrap()
    }

    #[test]
    fn test_graph_creation() {
        let graph = Graph::new("empty");
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.op(graph.start()), Operator::Start);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_add_node_registers_usages() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let add = graph.add_inferred(Operator::Binary(BinaryOp::Add), &[x, x]).unwrap();
        assert_eq!(graph.usages(x), &[add, add]);
        assert_eq!(graph.distinct_usages(x).as_slice(), &[add]);
        assert_eq!(graph.usage_edges(x).len(), 2);
        let s = graph.stamp(add);
        assert_eq!(s.as_int().map(|s| (s.lower(), s.upper())), Some((0, 200)));
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_add_node_rejects_bad_input() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        assert!(graph.add_node(Operator::Binary(BinaryOp::Add), &[x], Stamp::Any).is_err());
        let dead = graph.constant(Constant::int(32, 3)).unwrap();
        graph.delete_node(dead).unwrap();
        let err = graph.add_inferred(Operator::Binary(BinaryOp::Add), &[x, dead]);
        assert!(matches!(err, Err(CompileError::InvariantViolation { .. })));
    }

    #[test]
    fn test_add_node_rejects_malformed_widths() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let convert = |op, to| Operator::Convert { op, to };

        assert!(graph.unique(convert(ConvertOp::SignExtend, 8), &[x], None).is_err());
        assert!(graph.unique(convert(ConvertOp::ZeroExtend, 32), &[x], None).is_err());
        assert!(graph.unique(convert(ConvertOp::Narrow, 64), &[x], None).is_err());
        assert!(graph.unique(convert(ConvertOp::SignExtend, 65), &[x], None).is_err());
        assert!(graph.unique(convert(ConvertOp::Narrow, 0), &[x], None).is_err());
        let wide = graph.unique(convert(ConvertOp::SignExtend, 64), &[x], None).unwrap();
        let narrow = graph.unique(convert(ConvertOp::Narrow, 8), &[x], None).unwrap();
        assert_eq!(graph.stamp(wide).kind(), Some(ValueKind::Int(64)));
        assert_eq!(graph.stamp(narrow).kind(), Some(ValueKind::Int(8)));

        let float64 = Operator::Reinterpret(ValueKind::Float(64));
        assert!(graph.unique(float64, &[x], None).is_err());
        assert!(graph.add_node(float64, &[x], Stamp::unrestricted(ValueKind::Float(64))).is_err());
        assert!(graph.unique(Operator::Reinterpret(ValueKind::Object), &[x], None).is_err());
        assert!(graph.unique(Operator::Reinterpret(ValueKind::Float(32)), &[x], None).is_ok());

        assert!(graph.constant(Constant::int(0, 1)).is_err());
        assert!(graph
            .add_node(Operator::Parameter(1), &[], Stamp::unrestricted(ValueKind::Int(65)))
            .is_err());
        let long = graph
            .add_node(Operator::Parameter(2), &[], Stamp::unrestricted(ValueKind::Int(64)))
            .unwrap();
        assert!(graph.add_inferred(Operator::Binary(BinaryOp::Add), &[x, long]).is_err());
        assert!(graph
            .add_node(Operator::Compare(CmpOp::Eq), &[x, long], Stamp::int_range(32, 0, 1))
            .is_err());
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_unique_shares_nodes() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let c1 = graph.constant(Constant::int(32, 1)).unwrap();
        let c1b = graph.constant(Constant::int(32, 1)).unwrap();
        assert_eq!(c1, c1b);

        let a = graph.unique(Operator::Binary(BinaryOp::Add), &[x, c1], None).unwrap();
        let b = graph.unique(Operator::Binary(BinaryOp::Add), &[x, c1], None).unwrap();
        assert_eq!(a, b);
        let dup = graph.add_inferred(Operator::Binary(BinaryOp::Add), &[x, c1]).unwrap();
        assert_eq!(graph.find_duplicate(dup), Some(a));
        assert_eq!(graph.find_duplicate(a), Some(dup));
    }

    #[test]
    fn test_replace_all_usages() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let y = param(&mut graph, 1);
        let cmp = graph.add_inferred(Operator::Compare(CmpOp::Lt), &[x, x]).unwrap();
        let moved = graph.replace_all_usages(x, y).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(graph.inputs(cmp), &[y, y]);
        assert!(!graph.has_usages(x));
        assert_eq!(graph.usage_count(y), 2);
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_delete_requires_no_usages() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let neg = graph.add_inferred(Operator::Binary(BinaryOp::Sub), &[x, x]).unwrap();
        assert!(graph.delete_node(x).is_err());
        graph.delete_node(neg).unwrap();
        assert!(!graph.contains(neg));
        assert!(!graph.has_usages(x));
        graph.delete_node(x).unwrap();
        assert!(graph.delete_node(graph.start()).is_err());
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn test_try_infer_stamp_only_narrows() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        let c = graph.constant(Constant::int(32, 1)).unwrap();
        let add = graph
            .add_node(Operator::Binary(BinaryOp::Add), &[x, c], Stamp::unrestricted(crate::ir::ValueKind::Int(32)))
            .unwrap();
        assert!(graph.try_infer_stamp(add));
        assert_eq!(graph.stamp(add).as_int().map(|s| (s.lower(), s.upper())), Some((1, 101)));
        assert!(!graph.try_infer_stamp(add));
    }

    #[test]
    fn test_cancellation() {
        let graph = Graph::new("t");
        assert!(graph.check_cancellation("x").is_ok());
        graph.cancellation_token().cancel();
        let err = graph.check_cancellation("Canonicalizer").unwrap_err();
        assert!(err.is_cancelled());
        assert!(graph.duplicate().check_cancellation("x").is_ok());
    }

    #[test]
    fn test_change_tracking() {
        let mut graph = Graph::new("t");
        let x = param(&mut graph, 0);
        graph.start_tracking();
        let c = graph.constant(Constant::int(32, 4)).unwrap();
        let add = graph.add_inferred(Operator::Binary(BinaryOp::Add), &[x, c]).unwrap();
        let tracked = graph.take_tracked();
        assert_eq!(tracked, vec![c, add]);
    }

    #[test]
    fn test_fingerprint_ignores_numbering() {
        let mut a = Graph::new("a");
        let pa = param(&mut a, 0);
        let ca = a.constant(Constant::int(32, 2)).unwrap();
        a.add_inferred(Operator::Binary(BinaryOp::Mul), &[pa, ca]).unwrap();

        let mut b = Graph::new("b");
        let cb = b.constant(Constant::int(32, 2)).unwrap();
        let pb = param(&mut b, 0);
        b.add_inferred(Operator::Binary(BinaryOp::Mul), &[pb, cb]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        b.add_inferred(Operator::Binary(BinaryOp::Add), &[pb, cb]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_of_cycles_ignores_numbering() {
        let stamp = Stamp::int_range(32, 0, 100);
        let add = Operator::Binary(BinaryOp::Add);
        let loop_header = |graph: &mut Graph| {
            let start = graph.start();
            let x = param(graph, 0);
            let merge = graph.add_node(Operator::Merge, &[start], Stamp::Void).unwrap();
            let one = graph.constant(Constant::int(32, 1)).unwrap();
            (x, merge, one)
        };

        // phi = Phi(merge, phi + 1), built phi first.
        let mut a = Graph::new("a");
        let (x, merge, one) = loop_header(&mut a);
        let phi = a.add_node(Operator::Phi, &[merge, x], stamp).unwrap();
        let sum = a.add_node(add, &[phi, one], stamp).unwrap();
        a.set_input(phi, 1, sum).unwrap();

        // The same loop, built sum first.
        let mut b = Graph::new("b");
        let (x, merge, one) = loop_header(&mut b);
        let sum = b.add_node(add, &[x, one], stamp).unwrap();
        let phi = b.add_node(Operator::Phi, &[merge, sum], stamp).unwrap();
        b.set_input(sum, 0, phi).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 6);

        b.add_node(add, &[phi, phi], stamp).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
