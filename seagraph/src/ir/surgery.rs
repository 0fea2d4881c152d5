//! Control-chain surgery and graph-wide cleanup utilities.
//!
//! These build on the edge primitives in [`graph`](super::graph) and keep the
//! fixed chain well formed: every fixed node except `Start` has one control
//! predecessor, and every fixed node except `If` and `Return` has at most one
//! control successor.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::arena::BitSet;
use super::graph::Graph;
use super::node::{NodeId, NodeList};
use super::operators::{InputType, LocationIdentity, Operator};
use super::stamp::Stamp;
use crate::error::{CompileError, CompileResult};

impl Graph {
    // =========================================================================
    // Chain Queries
    // =========================================================================

    /// Fixed nodes whose control input points at `id`.
    pub fn control_successors(&self, id: NodeId) -> NodeList {
        self.distinct_usages(id)
            .into_iter()
            .filter(|&u| {
                let node = self.node(u);
                node.typed_inputs()
                    .any(|(_, ty, input)| input == id && ty == InputType::Control)
            })
            .collect()
    }

    /// Control predecessor of a fixed node (not defined for `Start`/`Merge`).
    pub fn control_predecessor(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.control_input())
    }

    /// Phis attached to a merge.
    pub fn phis_of(&self, merge: NodeId) -> NodeList {
        self.distinct_usages(merge)
            .into_iter()
            .filter(|&u| matches!(self.op(u), Operator::Phi) && self.input(u, 0) == Some(merge))
            .collect()
    }

    /// Nearest node at or above `from` on the control chain that overwrites
    /// memory at `location`.
    pub fn last_kill(&self, from: NodeId, location: LocationIdentity) -> CompileResult<NodeId> {
        let mut current = from;
        loop {
            let node = self.try_node(current)?;
            if node.op().kills(location) {
                return Ok(current);
            }
            current = node
                .control_input()
                .ok_or_else(|| CompileError::invariant(current, "control chain ends without a memory kill"))?;
        }
    }

    /// Nearest check protecting the code at `from`, looking up the control
    /// chain from `from` (inclusive) to `stop` (exclusive).
    ///
    /// A check is a fixed guard, a branch successor, or the guard held by a
    /// value anchor.
    pub fn protecting_guard(&self, from: NodeId, stop: NodeId) -> CompileResult<Option<NodeId>> {
        let mut current = from;
        while current != stop {
            let node = self.try_node(current)?;
            match node.op() {
                Operator::FixedGuard(_) | Operator::IfTrue | Operator::IfFalse => return Ok(Some(current)),
                Operator::ValueAnchor => {
                    if let Some(guard) = node.input(1) {
                        return Ok(Some(guard));
                    }
                }
                Operator::Start | Operator::Merge => return Ok(None),
                _ => {}
            }
            match node.control_input() {
                Some(pred) => current = pred,
                None => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Fixed nodes reachable from `Start` along control edges.
    pub fn reachable_fixed(&self) -> BitSet {
        let mut seen = BitSet::with_capacity(self.id_bound());
        let mut queue = VecDeque::from([self.start()]);
        seen.insert(self.start().as_usize());
        while let Some(n) = queue.pop_front() {
            for s in self.control_successors(n) {
                if seen.insert(s.as_usize()) {
                    queue.push_back(s);
                }
            }
        }
        seen
    }

    /// Reachable fixed nodes in control order: every node appears after its
    /// predecessors, merges after all of their reachable predecessors.
    pub fn fixed_order(&self) -> Vec<NodeId> {
        let reachable = self.reachable_fixed();
        let mut pending: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.start()]);
        while let Some(n) = queue.pop_front() {
            order.push(n);
            for s in self.control_successors(n) {
                if matches!(self.op(s), Operator::Merge) {
                    let remaining = pending.entry(s).or_insert_with(|| {
                        self.inputs(s)
                            .iter()
                            .filter(|p| reachable.contains(p.as_usize()))
                            .count()
                    });
                    let hits = self.inputs(s).iter().filter(|&&p| p == n).count();
                    *remaining = remaining.saturating_sub(hits);
                    if *remaining == 0 {
                        queue.push_back(s);
                    }
                } else {
                    queue.push_back(s);
                }
            }
        }
        order
    }

    // =========================================================================
    // Chain Editing
    // =========================================================================

    /// Insert a new fixed node directly after `anchor`.
    ///
    /// The new node's inputs are `[anchor, extra...]`; whatever followed
    /// `anchor` now follows the new node.
    pub fn add_fixed_after(
        &mut self,
        anchor: NodeId,
        op: Operator,
        extra: &[NodeId],
        stamp: Stamp,
    ) -> CompileResult<NodeId> {
        let anchor_op = *self.try_node(anchor)?.op();
        if !op.is_fixed() || !anchor_op.is_fixed() || matches!(anchor_op, Operator::If | Operator::Return) {
            return Err(CompileError::invariant(anchor, format!("cannot insert {op} after {anchor_op}")));
        }
        let mut inputs: NodeList = NodeList::new();
        inputs.push(anchor);
        inputs.extend_from_slice(extra);
        let new = self.add_node(op, &inputs, stamp)?;
        self.replace_usages_where(anchor, new, |e| e.user != new && e.ty == InputType::Control)?;
        Ok(new)
    }

    /// Unlink a fixed node from the chain and delete it.
    ///
    /// Control, guard and anchor usages move to the predecessor, memory
    /// usages to the last kill above it, and value usages to `replacement`.
    pub fn replace_fixed(&mut self, id: NodeId, replacement: Option<NodeId>) -> CompileResult<()> {
        let op = *self.try_node(id)?.op();
        if !op.is_fixed() || matches!(op, Operator::Start | Operator::Merge | Operator::If | Operator::IfTrue | Operator::IfFalse) {
            return Err(CompileError::invariant(id, format!("{op} cannot be unlinked from the chain")));
        }
        let pred = self
            .control_predecessor(id)
            .ok_or_else(|| CompileError::invariant(id, "fixed node without predecessor"))?;

        let edges = self.usage_edges(id);
        if replacement.is_none() {
            if let Some(edge) = edges.iter().find(|e| e.ty == InputType::Value) {
                return Err(CompileError::invariant(
                    id,
                    format!("value used by {} but no replacement given", edge.user),
                ));
            }
        }
        for edge in edges {
            let target = match edge.ty {
                InputType::Control | InputType::Guard | InputType::Association => pred,
                InputType::Memory => {
                    let location = self.op(edge.user).location().unwrap_or(LocationIdentity::ANY);
                    self.last_kill(pred, location)?
                }
                InputType::Value => replacement.unwrap_or(pred),
            };
            self.set_input(edge.user, edge.index, target)?;
        }
        self.kill_with_unused_floating_inputs(id)
    }

    /// Remove predecessor slot `index` of a merge together with the matching
    /// phi values.
    pub fn remove_merge_predecessor(&mut self, merge: NodeId, index: usize) -> CompileResult<()> {
        for phi in self.phis_of(merge) {
            let value = self.remove_input(phi, index + 1)?;
            if self.contains(value) && !self.has_usages(value) && self.op(value).is_killable_when_unused() {
                self.kill_with_unused_floating_inputs(value)?;
            }
        }
        self.remove_input(merge, index)?;
        Ok(())
    }

    // =========================================================================
    // Killing
    // =========================================================================

    /// Delete an unused node, then every floating input left without usages.
    pub fn kill_with_unused_floating_inputs(&mut self, id: NodeId) -> CompileResult<()> {
        if self.has_usages(id) {
            return Err(CompileError::invariant(id, "cannot kill a node that is still used"));
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if !self.contains(n) || self.has_usages(n) {
                continue;
            }
            let inputs = self.clear_inputs(n)?;
            self.delete_node(n)?;
            for input in inputs {
                if self.contains(input) && !self.has_usages(input) && self.op(input).is_killable_when_unused() {
                    stack.push(input);
                }
            }
        }
        Ok(())
    }

    /// Kill a fixed node together with everything only reachable through it.
    ///
    /// Merges fed by the dead region lose those predecessors (and the phi
    /// values for them); a merge left without predecessors dies as well.
    /// Returns the surviving merges and phis whose inputs changed.
    pub fn kill_cfg(&mut self, root: NodeId) -> CompileResult<NodeList> {
        let mut dead = BitSet::with_capacity(self.id_bound());
        let mut dead_list: Vec<NodeId> = Vec::new();
        let mut touched = NodeList::new();
        let mut queue = VecDeque::from([root]);
        dead.insert(root.as_usize());
        dead_list.push(root);

        while let Some(n) = queue.pop_front() {
            for s in self.control_successors(n) {
                if dead.contains(s.as_usize()) {
                    continue;
                }
                if matches!(self.op(s), Operator::Merge) {
                    while let Some(index) = self.inputs(s).iter().position(|&p| p == n) {
                        self.remove_merge_predecessor(s, index)?;
                    }
                    if self.inputs(s).is_empty() {
                        dead.insert(s.as_usize());
                        dead_list.push(s);
                        queue.push_back(s);
                    } else {
                        touched.push(s);
                        touched.extend(self.phis_of(s));
                    }
                } else {
                    dead.insert(s.as_usize());
                    dead_list.push(s);
                    queue.push_back(s);
                }
            }
        }

        // Floating nodes hanging off the dead region die with it.
        let mut i = 0;
        while i < dead_list.len() {
            let n = dead_list[i];
            for edge in self.usage_edges(n) {
                if dead.contains(edge.user.as_usize()) {
                    continue;
                }
                if self.op(edge.user).is_fixed() {
                    return Err(CompileError::invariant(
                        edge.user,
                        format!("live fixed node keeps {:?} edge into dead region at {n}", edge.ty),
                    ));
                }
                dead.insert(edge.user.as_usize());
                dead_list.push(edge.user);
            }
            i += 1;
        }

        let mut former_inputs = Vec::new();
        for &n in &dead_list {
            former_inputs.extend(self.clear_inputs(n)?);
        }
        for &n in &dead_list {
            self.delete_node(n)?;
        }
        for input in former_inputs {
            if self.contains(input) && !self.has_usages(input) && self.op(input).is_killable_when_unused() {
                self.kill_with_unused_floating_inputs(input)?;
            }
        }

        touched.retain(|t| self.contains(*t));
        Ok(touched)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::{BinaryOp, Constant, DeoptReason, GuardInfo};

    fn diamond() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = Graph::new("diamond");
        let start = g.start();
        let p = g.add_node(Operator::Parameter(0), &[], Stamp::int_range(32, 0, 1)).unwrap();
        let iff = g.add_node(Operator::If, &[start, p], Stamp::Void).unwrap();
        let t = g.add_node(Operator::IfTrue, &[iff], Stamp::Void).unwrap();
        let f = g.add_node(Operator::IfFalse, &[iff], Stamp::Void).unwrap();
        let merge = g.add_node(Operator::Merge, &[t, f], Stamp::Void).unwrap();
        (g, iff, t, f, merge)
    }

    #[test]
    fn test_control_successors_and_order() {
        let (g, iff, t, f, merge) = diamond();
        let succ = g.control_successors(iff);
        assert_eq!(succ.as_slice(), &[t, f]);
        let order = g.fixed_order();
        assert_eq!(order.first(), Some(&g.start()));
        assert_eq!(order.last(), Some(&merge));
        assert_eq!(order.len(), 5);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_protecting_guard_stops_at_memory() {
        let (mut g, _, t, _, _) = diamond();
        let one = g.constant(Constant::int(32, 1)).unwrap();
        let check = g
            .add_fixed_after(t, Operator::FixedGuard(GuardInfo::new(DeoptReason::BoundsCheck)), &[one], Stamp::Void)
            .unwrap();
        let write = g
            .add_fixed_after(check, Operator::Write(LocationIdentity(1)), &[one, one], Stamp::Void)
            .unwrap();
        let fence = g.add_fixed_after(write, Operator::Fence, &[], Stamp::Void).unwrap();

        assert_eq!(g.protecting_guard(fence, g.start()).unwrap(), Some(check));
        assert_eq!(g.protecting_guard(write, check).unwrap(), None);
        assert_eq!(g.protecting_guard(t, g.start()).unwrap(), Some(t));
        assert_eq!(g.protecting_guard(g.start(), write).unwrap(), None);
    }

    #[test]
    fn test_add_fixed_after_relinks_successor() {
        let (mut g, _, t, _, merge) = diamond();
        let fence = g.add_fixed_after(t, Operator::Fence, &[], Stamp::Void).unwrap();
        assert_eq!(g.inputs(merge)[0], fence);
        assert_eq!(g.inputs(fence), &[t]);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_replace_fixed_moves_memory_usages() {
        let mut g = Graph::new("mem");
        let start = g.start();
        let addr = g.add_node(Operator::Parameter(0), &[], Stamp::int_range(64, 0, 1 << 20)).unwrap();
        let anchor = g.add_node(Operator::MemoryAnchor, &[start], Stamp::Void).unwrap();
        let loc = LocationIdentity(3);
        let read = g
            .add_node(Operator::FloatingRead(loc), &[addr, anchor], Stamp::int_range(32, 0, 9))
            .unwrap();
        let ret = g.add_node(Operator::Return, &[anchor, read], Stamp::Void).unwrap();

        g.replace_fixed(anchor, None).unwrap();
        assert!(!g.contains(anchor));
        assert_eq!(g.inputs(read)[1], start);
        assert_eq!(g.inputs(ret)[0], start);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_replace_fixed_needs_value_replacement() {
        let mut g = Graph::new("div");
        let start = g.start();
        let x = g.add_node(Operator::Parameter(0), &[], Stamp::int_range(32, 0, 9)).unwrap();
        let two = g.constant(Constant::int(32, 2)).unwrap();
        let div = g
            .add_inferred(Operator::FixedBinary(crate::ir::FixedBinaryOp::Div), &[start, x, two])
            .unwrap();
        g.add_node(Operator::Return, &[div, div], Stamp::Void).unwrap();
        assert!(g.replace_fixed(div, None).is_err());
    }

    #[test]
    fn test_kill_with_unused_floating_inputs() {
        let mut g = Graph::new("kill");
        let x = g.add_node(Operator::Parameter(0), &[], Stamp::int_range(32, 0, 9)).unwrap();
        let one = g.constant(Constant::int(32, 1)).unwrap();
        let add = g.add_inferred(Operator::Binary(BinaryOp::Add), &[x, one]).unwrap();
        let mul = g.add_inferred(Operator::Binary(BinaryOp::Mul), &[add, add]).unwrap();
        g.kill_with_unused_floating_inputs(mul).unwrap();
        assert!(!g.contains(add));
        assert!(!g.contains(one));
        assert!(g.contains(x), "parameters are never killed");
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_kill_cfg_fixes_merge_and_phis() {
        let (mut g, _, t, f, merge) = diamond();
        let a = g.constant(Constant::int(32, 10)).unwrap();
        let b = g.constant(Constant::int(32, 20)).unwrap();
        let phi = g.add_inferred(Operator::Phi, &[merge, a, b]).unwrap();
        g.add_node(Operator::Return, &[merge, phi], Stamp::Void).unwrap();

        let touched = g.kill_cfg(f).unwrap();
        assert!(!g.contains(f));
        assert_eq!(g.inputs(merge), &[t]);
        assert_eq!(g.inputs(phi), &[merge, a]);
        assert!(!g.contains(b));
        assert!(touched.contains(&merge) && touched.contains(&phi));
    }
}
