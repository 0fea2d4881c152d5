//! Dead Code Elimination (DCE).
//!
//! Marks everything reachable from the roots and deletes the rest:
//!
//! - **Roots**: fixed nodes reachable from `Start` along control edges, and
//!   all parameters
//! - **Closure**: every input of a marked node is marked
//!
//! Merge predecessors outside the reachable region are dropped first,
//! together with the phi values flowing in from them.

use crate::error::CompileResult;
use crate::ir::{BitSet, Graph, NodeKind, Operator};

use super::{Phase, PhaseContext};

/// Whether finding nothing to delete is worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optionality {
    /// Silent when nothing is dead.
    Optional,
    /// Records a diagnostic when nothing is dead; a preceding phase was
    /// expected to leave garbage behind.
    Required,
}

/// Reachability-based dead code elimination.
#[derive(Debug, Clone, Copy)]
pub struct DeadCodeEliminationPhase {
    optionality: Optionality,
}

impl DeadCodeEliminationPhase {
    pub fn new(optionality: Optionality) -> Self {
        Self { optionality }
    }

    pub fn optional() -> Self {
        Self::new(Optionality::Optional)
    }

    pub fn required() -> Self {
        Self::new(Optionality::Required)
    }

    /// Delete all dead nodes and return how many were removed.
    pub fn eliminate(&self, graph: &mut Graph) -> CompileResult<usize> {
        let before = graph.len();
        let reachable = graph.reachable_fixed();

        for merge in graph.snapshot_of(NodeKind::Merge) {
            if !reachable.contains(merge.as_usize()) {
                continue;
            }
            for index in (0..graph.inputs(merge).len()).rev() {
                let pred = graph.inputs(merge)[index];
                if !reachable.contains(pred.as_usize()) {
                    graph.remove_merge_predecessor(merge, index)?;
                }
            }
        }

        let mut live = BitSet::with_capacity(graph.id_bound());
        let mut stack: Vec<_> = graph
            .node_ids()
            .filter(|&id| {
                reachable.contains(id.as_usize()) || matches!(graph.op(id), Operator::Parameter(_))
            })
            .collect();
        while let Some(id) = stack.pop() {
            if live.insert(id.as_usize()) {
                stack.extend(graph.inputs(id).iter().copied());
            }
        }

        let dead: Vec<_> = graph.node_ids().filter(|id| !live.contains(id.as_usize())).collect();
        for &id in &dead {
            graph.clear_inputs(id)?;
        }
        for &id in &dead {
            graph.delete_node(id)?;
        }
        Ok(before - graph.len())
    }
}

impl Phase for DeadCodeEliminationPhase {
    fn name(&self) -> &'static str {
        match self.optionality {
            Optionality::Optional => "DeadCodeElimination",
            Optionality::Required => "DeadCodeElimination(required)",
        }
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.check_cancellation(self.name())?;
        let deleted = self.eliminate(graph)?;
        ctx.debug.increment("dce.deleted", deleted as u64);
        tracing::debug!(graph = graph.name(), deleted, "dead code eliminated");
        if deleted == 0 && self.optionality == Optionality::Required {
            ctx.debug
                .diagnostic(format!("required dead code elimination found nothing to delete in {}", graph.name()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, GraphBuilder, Stamp, ValueKind};
    use crate::options::CompilerOptions;

    #[test]
    fn test_deletes_unused_floating_chain() {
        let mut b = GraphBuilder::new("dce");
        let p = b.parameter(0, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let mut x = p;
        for _ in 0..4 {
            x = b.binary(BinaryOp::Mul, x, p).unwrap();
        }
        b.return_value(Some(p)).unwrap();
        let mut g = b.finish();

        let deleted = DeadCodeEliminationPhase::optional().eliminate(&mut g).unwrap();
        assert_eq!(deleted, 4);
        assert!(g.contains(p));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_unused_parameters_survive() {
        let mut b = GraphBuilder::new("params");
        let p = b.parameter(0, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        b.return_value(None).unwrap();
        let mut g = b.finish();
        assert_eq!(DeadCodeEliminationPhase::optional().eliminate(&mut g).unwrap(), 0);
        assert!(g.contains(p));
    }

    #[test]
    fn test_required_reports_when_nothing_is_dead() {
        let mut b = GraphBuilder::new("clean");
        b.return_value(None).unwrap();
        let mut g = b.finish();

        let mut ctx = PhaseContext::new(CompilerOptions::default());
        DeadCodeEliminationPhase::optional().run(&mut g, &mut ctx).unwrap();
        assert!(ctx.debug.diagnostics().is_empty());
        DeadCodeEliminationPhase::required().run(&mut g, &mut ctx).unwrap();
        assert_eq!(ctx.debug.diagnostics().len(), 1);
    }
}
