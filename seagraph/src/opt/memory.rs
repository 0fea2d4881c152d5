//! Memory phases.
//!
//! - **FloatingReadPhase**: Fixed reads become floating reads that depend
//!   only on the last write to their location and on the check that
//!   protected them, so they can be value numbered and forwarded
//! - **FixReadsPhase**: Floating reads are pinned back onto the control
//!   chain right after their memory state, guard and address dependencies

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, NodeKind, NodeList, Operator, StageFlags};

use super::{Phase, PhaseContext};

// =============================================================================
// Floating Reads
// =============================================================================

/// Turns every fixed read into a floating read.
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatingReadPhase;

impl Phase for FloatingReadPhase {
    fn name(&self) -> &'static str {
        "FloatingReads"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.check_cancellation(self.name())?;
        if graph.is_after_stage(StageFlags::FLOATING_READS) {
            return Ok(());
        }
        let mut floated = 0u64;
        for read in graph.snapshot_of(NodeKind::Read) {
            let Operator::Read(location) = graph.op(read) else {
                continue;
            };
            let pred = graph
                .control_predecessor(read)
                .ok_or_else(|| CompileError::invariant(read, "read without control predecessor"))?;
            let address = graph.inputs(read)[1];
            let memory = graph.last_kill(pred, location)?;
            let guard = graph.protecting_guard(pred, memory)?;
            let inputs: NodeList = [address, memory].into_iter().chain(guard).collect();
            let stamp = graph.stamp(read);
            let floating = graph.unique(Operator::FloatingRead(location), &inputs, Some(stamp))?;
            graph.replace_fixed(read, Some(floating))?;
            floated += 1;
        }
        graph.set_stage(StageFlags::FLOATING_READS);
        ctx.debug.increment("memory.floated_reads", floated);
        Ok(())
    }
}

// =============================================================================
// Fixing Reads
// =============================================================================

/// Pins every floating read back onto the control chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixReadsPhase;

impl Phase for FixReadsPhase {
    fn name(&self) -> &'static str {
        "FixReads"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.check_cancellation(self.name())?;
        let mut fixer = ReadFixer::new(graph);
        for read in fixer.graph.snapshot_of(NodeKind::FloatingRead) {
            fixer.fix(read)?;
        }
        let fixed = fixer.fixed;
        graph.set_stage(StageFlags::FIXED_READS);
        ctx.debug.increment("memory.fixed_reads", fixed);
        Ok(())
    }
}

/// Position on the control chain: `(index in control order, rank among the
/// reads inserted after that node)`.
type Position = (usize, usize);

struct ReadFixer<'g> {
    graph: &'g mut Graph,
    order: Vec<NodeId>,
    position: FxHashMap<NodeId, Position>,
    /// Last read inserted after each control-order index.
    tails: FxHashMap<usize, (NodeId, usize)>,
    fixed: u64,
}

impl<'g> ReadFixer<'g> {
    fn new(graph: &'g mut Graph) -> Self {
        let order = graph.fixed_order();
        let position = order.iter().enumerate().map(|(i, &n)| (n, (i, 0))).collect();
        Self {
            graph,
            order,
            position,
            tails: FxHashMap::default(),
            fixed: 0,
        }
    }

    fn position_of(&self, id: NodeId) -> Position {
        self.position.get(&id).copied().unwrap_or((0, 0))
    }

    /// Pin one floating read, fixing the reads its address depends on first.
    /// Returns the node now standing for `read`.
    fn fix(&mut self, read: NodeId) -> CompileResult<NodeId> {
        if !self.graph.contains(read) {
            return Ok(read);
        }
        let Operator::FloatingRead(location) = self.graph.op(read) else {
            return Ok(read);
        };
        if !self.graph.has_usages(read) {
            self.graph.kill_with_unused_floating_inputs(read)?;
            return Ok(read);
        }
        let (address, memory) = (self.graph.inputs(read)[0], self.graph.inputs(read)[1]);
        let guard = self.graph.input(read, 2);

        let mut latest = self.position_of(memory);
        let mut deps = self.fixed_dependencies(address)?;
        if let Some(guard) = guard {
            deps.extend(self.fixed_dependencies(guard)?);
        }
        for dep in deps {
            latest = latest.max(self.position_of(dep));
        }
        let group = self.past_fences(latest.0);
        let (after, rank) = match self.tails.get(&group) {
            Some(&(tail, rank)) => (tail, rank),
            None => (self.order[group], 0),
        };

        let stamp = self.graph.stamp(read);
        let pinned = self
            .graph
            .add_fixed_after(after, Operator::Read(location), &[address], stamp)?;
        self.position.insert(pinned, (group, rank + 1));
        self.tails.insert(group, (pinned, rank + 1));

        self.graph.replace_all_usages(read, pinned)?;
        self.graph.kill_with_unused_floating_inputs(read)?;
        self.fixed += 1;
        Ok(pinned)
    }

    /// Index of the fence directly behind `group`, if any, so a read never
    /// lands between a check and its speculation barrier.
    fn past_fences(&self, mut group: usize) -> usize {
        while let Some(&next) = self.order.get(group + 1) {
            let fenced = self.graph.op(next) == Operator::Fence
                && self.graph.control_predecessor(next) == Some(self.order[group]);
            if !fenced {
                break;
            }
            group += 1;
        }
        group
    }

    /// Fixed nodes reached from `value` through floating inputs.
    fn fixed_dependencies(&mut self, value: NodeId) -> CompileResult<Vec<NodeId>> {
        let mut deps = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![value];
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let op = self.graph.op(n);
            if op.is_fixed() {
                deps.push(n);
            } else if let Operator::FloatingRead(_) = op {
                deps.push(self.fix(n)?);
            } else {
                stack.extend(self.graph.inputs(n).iter().copied());
            }
        }
        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CmpOp, DeoptReason, GraphBuilder, GuardInfo, LocationIdentity, Stamp, ValueKind};
    use crate::options::CompilerOptions;

    const FIELD: LocationIdentity = LocationIdentity(7);

    fn ctx() -> PhaseContext {
        PhaseContext::new(CompilerOptions::default())
    }

    #[test]
    fn test_reads_float_above_unrelated_writes() {
        let mut b = GraphBuilder::new("float");
        let addr = b.parameter(0, Stamp::unrestricted(ValueKind::Int(64))).unwrap();
        let value = b.parameter(1, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        b.write(LocationIdentity(9), addr, value).unwrap();
        let read = b.read(FIELD, addr, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let ret = b.return_value(Some(read)).unwrap();
        let mut g = b.finish();

        FloatingReadPhase.run(&mut g, &mut ctx()).unwrap();
        assert!(!g.contains(read));
        let floating = g.inputs(ret)[1];
        assert_eq!(g.op(floating), Operator::FloatingRead(FIELD));
        assert_eq!(g.inputs(floating), &[addr, g.start()]);
        assert!(g.is_after_stage(StageFlags::FLOATING_READS));
        assert!(g.verify().is_ok(), "{g:?}");
    }

    #[test]
    fn test_reads_stay_behind_their_check() {
        let mut b = GraphBuilder::new("checked");
        let addr = b.parameter(0, Stamp::unrestricted(ValueKind::Int(64))).unwrap();
        let p = b.parameter(1, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let zero = b.int(32, 0).unwrap();
        let cond = b.compare(CmpOp::Ne, p, zero).unwrap();
        let check = b.fixed_guard(cond, GuardInfo::new(DeoptReason::NullCheck)).unwrap();
        let read = b.read(FIELD, addr, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let ret = b.return_value(Some(read)).unwrap();
        let mut g = b.finish();

        FloatingReadPhase.run(&mut g, &mut ctx()).unwrap();
        let floating = g.inputs(ret)[1];
        assert_eq!(g.inputs(floating), &[addr, g.start(), check]);

        let fence = g.add_fixed_after(check, Operator::Fence, &[], Stamp::Void).unwrap();
        FixReadsPhase.run(&mut g, &mut ctx()).unwrap();

        let pinned = g.inputs(ret)[1];
        assert_eq!(g.op(pinned), Operator::Read(FIELD));
        assert_eq!(g.inputs(pinned), &[fence, addr]);
        let order = g.fixed_order();
        let at = |n: NodeId| order.iter().position(|&o| o == n);
        assert!(at(check) < at(pinned), "{order:?}");
        assert!(g.verify().is_ok(), "{g:?}");
    }

    #[test]
    fn test_fix_reads_pins_after_memory() {
        let mut b = GraphBuilder::new("fix");
        let addr = b.parameter(0, Stamp::unrestricted(ValueKind::Int(64))).unwrap();
        let value = b.parameter(1, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let write = b.write(FIELD, addr, value).unwrap();
        let fence = b.fence().unwrap();
        let ret = b.return_value(Some(value)).unwrap();
        let mut g = b.finish();
        let other = g.add_node(Operator::Parameter(2), &[], Stamp::unrestricted(ValueKind::Int(64))).unwrap();
        let floating = g
            .add_node(
                Operator::FloatingRead(FIELD),
                &[other, write],
                Stamp::unrestricted(ValueKind::Int(32)),
            )
            .unwrap();
        g.set_input(ret, 1, floating).unwrap();
        g.set_stage(StageFlags::FLOATING_READS);

        FixReadsPhase.run(&mut g, &mut ctx()).unwrap();
        let pinned = g.inputs(ret)[1];
        assert_eq!(g.op(pinned), Operator::Read(FIELD));
        assert_eq!(g.inputs(pinned), &[write, other]);
        assert_eq!(g.inputs(fence), &[pinned]);
        assert!(g.snapshot_of(NodeKind::FloatingRead).is_empty());
        assert!(g.is_after_stage(StageFlags::FIXED_READS));
        assert!(g.verify().is_ok(), "{g:?}");
    }

    #[test]
    fn test_dependent_reads_keep_order() {
        let mut g = Graph::new("chain");
        let start = g.start();
        let base = g
            .add_node(Operator::Parameter(0), &[], Stamp::unrestricted(ValueKind::Int(64)))
            .unwrap();
        let first = g
            .add_node(
                Operator::FloatingRead(FIELD),
                &[base, start],
                Stamp::unrestricted(ValueKind::Int(64)),
            )
            .unwrap();
        let second = g
            .add_node(
                Operator::FloatingRead(FIELD),
                &[first, start],
                Stamp::unrestricted(ValueKind::Int(32)),
            )
            .unwrap();
        let ret = g.add_node(Operator::Return, &[start, second], Stamp::Void).unwrap();
        g.set_stage(StageFlags::FLOATING_READS);

        FixReadsPhase.run(&mut g, &mut ctx()).unwrap();
        let outer = g.inputs(ret)[1];
        let inner = g.inputs(outer)[1];
        assert_eq!(g.op(inner), Operator::Read(FIELD));
        assert_eq!(g.inputs(inner), &[start, base]);
        assert_eq!(g.inputs(outer)[0], inner);
        assert_eq!(g.inputs(ret)[0], outer);
        assert!(g.verify().is_ok(), "{g:?}");
    }
}
