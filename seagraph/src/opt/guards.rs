//! Guards.
//!
//! Floating guards record a condition that must hold for the code that
//! depends on them. Dependents usually need several guards at once; a
//! multi-guard aggregates them into one guard edge.
//!
//! Late in the pipeline guards are lowered onto the control chain, and
//! speculation barriers can be placed behind them.

use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, NodeKind, Operator, StageFlags, Stamp};
use crate::options::SpectrePhtBarriers;

use super::{Phase, PhaseContext};

// =============================================================================
// Multi-Guard Construction
// =============================================================================

/// Guard that implies both `first` and `second`.
///
/// Combining with nothing or with itself is the guard itself; otherwise a
/// value-numbered multi-guard over both is returned.
pub fn combine(graph: &mut Graph, first: Option<NodeId>, second: NodeId) -> CompileResult<NodeId> {
    match first {
        None => Ok(second),
        Some(first) if first == second => Ok(first),
        Some(first) => graph.unique(Operator::MultiGuard, &[first, second], Some(Stamp::Void)),
    }
}

/// Add `guard` to an existing multi-guard unless it is already there.
pub fn add_guard(graph: &mut Graph, multi: NodeId, guard: NodeId) -> CompileResult<()> {
    if graph.op(multi) != Operator::MultiGuard {
        return Err(CompileError::invariant(multi, "guards can only be added to a multi-guard"));
    }
    if graph.inputs(multi).contains(&guard) {
        return Ok(());
    }
    graph.add_input(multi, guard)
}

// =============================================================================
// Guard Lowering
// =============================================================================

/// Replaces every floating guard with a fixed guard placed right after its
/// anchor.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardLoweringPhase;

impl Phase for GuardLoweringPhase {
    fn name(&self) -> &'static str {
        "GuardLowering"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.check_cancellation(self.name())?;
        let mut lowered = 0u64;
        for guard in graph.snapshot_of(NodeKind::Guard) {
            let Operator::Guard(info) = graph.op(guard) else {
                continue;
            };
            let (condition, anchor) = (graph.inputs(guard)[0], graph.inputs(guard)[1]);
            let fixed = graph.add_fixed_after(anchor, Operator::FixedGuard(info), &[condition], Stamp::Void)?;
            graph.replace_all_usages(guard, fixed)?;
            graph.kill_with_unused_floating_inputs(guard)?;
            lowered += 1;
        }
        graph.set_stage(StageFlags::GUARDS_LOWERED);
        ctx.debug.increment("guards.lowered", lowered);
        Ok(())
    }
}

// =============================================================================
// Speculation Barriers
// =============================================================================

/// Places fences behind guards (and optionally branch targets) so that
/// mis-speculated execution does not run ahead of a failing check.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsertGuardFencesPhase;

impl InsertGuardFencesPhase {
    fn targets(graph: &Graph, mode: SpectrePhtBarriers) -> Vec<NodeId> {
        let mut targets = match mode {
            SpectrePhtBarriers::None => return Vec::new(),
            SpectrePhtBarriers::GuardTargets => graph.snapshot_of(NodeKind::FixedGuard),
            SpectrePhtBarriers::AllTargets => {
                let mut all = graph.snapshot_of(NodeKind::FixedGuard);
                all.extend(graph.snapshot_of(NodeKind::IfTrue));
                all.extend(graph.snapshot_of(NodeKind::IfFalse));
                all
            }
        };
        targets.sort_unstable();
        targets
    }
}

impl Phase for InsertGuardFencesPhase {
    fn name(&self) -> &'static str {
        "InsertGuardFences"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.check_cancellation(self.name())?;
        let mut inserted = 0u64;
        for target in Self::targets(graph, ctx.options.spectre_pht_barriers) {
            let fenced = graph
                .control_successors(target)
                .iter()
                .any(|&s| graph.op(s) == Operator::Fence);
            if !fenced {
                graph.add_fixed_after(target, Operator::Fence, &[], Stamp::Void)?;
                inserted += 1;
            }
        }
        ctx.debug.increment("guards.fences", inserted);
        Ok(())
    }
}
