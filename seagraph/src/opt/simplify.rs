//! Side-effecting simplifications.
//!
//! Unlike canonical rules, these edit the graph directly: they fold branches
//! on constant conditions, dissolve single-predecessor merges, and unhook
//! value anchors from multi-guards that only aggregate fixed guards.

use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, InputType, LocationIdentity, NodeId, NodeList, Operator};

/// A simplification that was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simplification {
    pub rule: &'static str,
    /// Surviving nodes whose inputs or usages changed.
    pub touched: NodeList,
}

/// Apply the simplification for `id`, if one matches.
pub fn simplify(graph: &mut Graph, id: NodeId) -> CompileResult<Option<Simplification>> {
    if !graph.contains(id) {
        return Ok(None);
    }
    match graph.op(id) {
        Operator::If => fold_constant_branch(graph, id),
        Operator::Merge => dissolve_single_merge(graph, id),
        Operator::MultiGuard => detach_value_anchors(graph, id),
        _ => Ok(None),
    }
}

// =============================================================================
// Branch Folding
// =============================================================================

fn fold_constant_branch(graph: &mut Graph, iff: NodeId) -> CompileResult<Option<Simplification>> {
    let (pred, condition) = (graph.inputs(iff)[0], graph.inputs(iff)[1]);
    let Some(value) = graph.node(condition).as_int() else {
        return Ok(None);
    };
    let taken = if value != 0 { Operator::IfTrue } else { Operator::IfFalse };

    let mut live = None;
    let mut dead = NodeList::new();
    for s in graph.control_successors(iff) {
        if graph.op(s) == taken {
            live = Some(s);
        } else {
            dead.push(s);
        }
    }
    let live = live.ok_or_else(|| CompileError::invariant(iff, "branch without the taken projection"))?;

    let mut touched = NodeList::new();
    for projection in dead {
        touched.extend(graph.kill_cfg(projection)?);
    }

    // Everything hanging off the taken projection now follows the branch's
    // predecessor directly.
    graph.replace_all_usages(live, pred)?;
    graph.kill_with_unused_floating_inputs(live)?;
    graph.kill_with_unused_floating_inputs(iff)?;

    touched.push(pred);
    touched.extend(graph.distinct_usages(pred));
    touched.retain(|t| graph.contains(*t));
    Ok(Some(Simplification {
        rule: "if.constant_condition",
        touched,
    }))
}

// =============================================================================
// Merge Dissolution
// =============================================================================

fn dissolve_single_merge(graph: &mut Graph, merge: NodeId) -> CompileResult<Option<Simplification>> {
    let &[pred] = graph.inputs(merge) else {
        return Ok(None);
    };

    let mut touched = NodeList::new();
    for phi in graph.phis_of(merge) {
        let value = graph.inputs(phi)[1];
        touched.extend(graph.distinct_usages(phi));
        graph.replace_all_usages(phi, value)?;
        graph.kill_with_unused_floating_inputs(phi)?;
        touched.push(value);
    }

    for edge in graph.usage_edges(merge) {
        let target = match edge.ty {
            InputType::Memory => {
                let location = graph.op(edge.user).location().unwrap_or(LocationIdentity::ANY);
                graph.last_kill(pred, location)?
            }
            _ => pred,
        };
        graph.set_input(edge.user, edge.index, target)?;
        touched.push(edge.user);
    }
    graph.kill_with_unused_floating_inputs(merge)?;

    touched.push(pred);
    touched.retain(|t| graph.contains(*t));
    Ok(Some(Simplification {
        rule: "merge.single_predecessor",
        touched,
    }))
}

// =============================================================================
// Multi-Guard Anchors
// =============================================================================

fn detach_value_anchors(graph: &mut Graph, multi: NodeId) -> CompileResult<Option<Simplification>> {
    let anchors: Vec<_> = graph
        .usage_edges(multi)
        .into_iter()
        .filter(|e| graph.op(e.user) == Operator::ValueAnchor)
        .collect();
    if anchors.is_empty() {
        return Ok(None);
    }

    // Fixed guards are already implied by the anchor's position; only a
    // single floating guard may stand in for the aggregate.
    let mut floating = None;
    for &guard in graph.inputs(multi) {
        if graph.op(guard).is_fixed() {
            continue;
        }
        match floating {
            None => floating = Some(guard),
            Some(g) if g == guard => {}
            Some(_) => return Ok(None),
        }
    }

    let mut touched = NodeList::new();
    for edge in anchors {
        match floating {
            Some(guard) => graph.set_input(edge.user, edge.index, guard)?,
            None => {
                graph.remove_input(edge.user, edge.index)?;
            }
        }
        touched.push(edge.user);
    }
    if let Some(guard) = floating {
        touched.push(guard);
    }
    if !graph.has_usages(multi) {
        graph.kill_with_unused_floating_inputs(multi)?;
    }
    Ok(Some(Simplification {
        rule: "multiguard.value_anchor",
        touched,
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CmpOp, DeoptReason, GraphBuilder, GuardInfo, Stamp, ValueKind};

    #[test]
    fn test_fold_true_branch() {
        let mut b = GraphBuilder::new("branch");
        let p = b.parameter(0, Stamp::int_range(32, 0, 10)).unwrap();
        let one = b.int(32, 1).unwrap();
        let (t, f) = b.branch(one).unwrap();
        let dead_value = b.binary(BinaryOp::Mul, p, p).unwrap();
        b.set_control(f);
        let dead_ret = b.return_value(Some(dead_value)).unwrap();
        b.set_control(t);
        let ret = b.return_value(Some(p)).unwrap();
        let mut g = b.finish();
        let iff = g.inputs(t)[0];

        let done = simplify(&mut g, iff).unwrap().unwrap();
        assert_eq!(done.rule, "if.constant_condition");
        assert!(!g.contains(iff));
        assert!(!g.contains(t));
        assert!(!g.contains(f));
        assert!(!g.contains(dead_ret));
        assert!(!g.contains(dead_value));
        assert_eq!(g.inputs(ret)[0], g.start());
        assert!(g.verify().is_ok(), "{g:?}");
    }

    #[test]
    fn test_fold_branch_leaves_single_merge() {
        let mut b = GraphBuilder::new("diamond");
        let p = b.parameter(0, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let zero = b.int(32, 0).unwrap();
        let (t, f) = b.branch(zero).unwrap();
        let merge = b.merge(&[t, f]).unwrap();
        let seven = b.int(32, 7).unwrap();
        let phi = b.phi(merge, &[seven, p]).unwrap();
        let ret = b.return_value(Some(phi)).unwrap();
        let mut g = b.finish();
        let iff = g.inputs(t)[0];

        let done = simplify(&mut g, iff).unwrap().unwrap();
        assert!(done.touched.contains(&merge));
        assert_eq!(g.inputs(merge), &[g.start()]);
        assert_eq!(g.inputs(phi), &[merge, p]);
        assert!(!g.contains(seven));

        let done = simplify(&mut g, merge).unwrap().unwrap();
        assert_eq!(done.rule, "merge.single_predecessor");
        assert!(!g.contains(phi));
        assert_eq!(g.inputs(ret), &[g.start(), p]);
        assert!(g.verify().is_ok(), "{g:?}");
    }

    #[test]
    fn test_unknown_condition_is_left_alone() {
        let mut b = GraphBuilder::new("branch");
        let p = b.parameter(0, Stamp::int_range(32, 0, 1)).unwrap();
        let (t, _) = b.branch(p).unwrap();
        let mut g = b.finish();
        let iff = g.inputs(t)[0];
        assert_eq!(simplify(&mut g, iff).unwrap(), None);
    }

    #[test]
    fn test_multi_guard_value_anchor_rewired() {
        let mut b = GraphBuilder::new("anchor");
        let p = b.parameter(0, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let zero = b.int(32, 0).unwrap();
        let cond = b.compare(CmpOp::Ne, p, zero).unwrap();
        let fixed = b.fixed_guard(cond, GuardInfo::new(DeoptReason::NullCheck)).unwrap();
        let floating = b.guard(cond, GuardInfo::new(DeoptReason::BoundsCheck)).unwrap();
        let multi = b.multi_guard(&[fixed, floating]).unwrap();
        let anchor = b.value_anchor(Some(multi)).unwrap();
        b.return_value(None).unwrap();
        let mut g = b.finish();

        let done = simplify(&mut g, multi).unwrap().unwrap();
        assert_eq!(done.rule, "multiguard.value_anchor");
        assert!(!g.contains(multi));
        assert_eq!(g.inputs(anchor), &[fixed, floating]);
        assert!(g.verify().is_ok(), "{g:?}");
    }
}
