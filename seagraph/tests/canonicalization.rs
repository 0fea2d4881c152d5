//! End-to-end canonicalization behavior: fixpoints, confluence, guard
//! aggregation and rule failures.

mod common;

use proptest::prelude::*;
use seagraph::ir::{
    BinaryOp, CmpOp, ConvertOp, DeoptReason, Graph, GraphBuilder, GuardInfo, NodeId, NodeKind, Operator, Stamp,
    ValueKind,
};
use seagraph::opt::canonical::{CanonicalRule, NodeTemplate, Replacement};
use seagraph::opt::guards::combine;
use seagraph::opt::{CanonicalizerPhase, PhaseContext, PopOrder};
use seagraph::{CompileError, CompilerOptions};

fn ctx() -> PhaseContext {
    PhaseContext::new(CompilerOptions::default())
}

fn int32() -> Stamp {
    Stamp::unrestricted(ValueKind::Int(32))
}

/// A graph on which many built-in rules fire and interact.
fn busy_graph() -> Graph {
    let mut b = GraphBuilder::new("busy");
    let p = b.parameter(0, int32()).unwrap();
    let q = b.parameter(1, int32()).unwrap();
    let zero = b.int(32, 0).unwrap();
    let one = b.int(32, 1).unwrap();
    let two = b.int(32, 2).unwrap();
    let three = b.int(32, 3).unwrap();

    // 3 + ((p + 1) + 2)
    let a1 = b.binary(BinaryOp::Add, p, one).unwrap();
    let a2 = b.binary(BinaryOp::Add, a1, two).unwrap();
    let a3 = b.binary(BinaryOp::Add, three, a2).unwrap();

    // (q * 1) ^ q
    let m = b.binary(BinaryOp::Mul, q, one).unwrap();
    let x = b.binary(BinaryOp::Xor, m, q).unwrap();
    let s = b.binary(BinaryOp::Add, a3, x).unwrap();

    // Two separate copies of p * q.
    let d1 = b.binary(BinaryOp::Mul, p, q).unwrap();
    let d2 = b
        .graph_mut()
        .add_inferred(Operator::Binary(BinaryOp::Mul), &[p, q])
        .unwrap();
    let d = b.binary(BinaryOp::Sub, d1, d2).unwrap();

    // narrow(sign_extend(p)) and int(float(q))
    let wide = b.convert(ConvertOp::SignExtend, p, 64).unwrap();
    let narrow = b.convert(ConvertOp::Narrow, wide, 32).unwrap();
    let f = b.reinterpret(q, ValueKind::Float(32)).unwrap();
    let back = b.reinterpret(f, ValueKind::Int(32)).unwrap();

    let t1 = b.binary(BinaryOp::Add, s, d).unwrap();
    let t2 = b.binary(BinaryOp::Or, narrow, back).unwrap();
    let total = b.binary(BinaryOp::Mul, t1, t2).unwrap();

    let c1 = b.compare(CmpOp::Ne, p, zero).unwrap();
    let c2 = b.compare(CmpOp::Eq, zero, q).unwrap();
    let g1 = b.guard(c1, GuardInfo::new(DeoptReason::NullCheck)).unwrap();
    let g2 = b.guard(c2, GuardInfo::negated(DeoptReason::BoundsCheck)).unwrap();
    let multi = b.multi_guard(&[g1, g2, g1]).unwrap();
    b.value_anchor(Some(multi)).unwrap();

    b.return_value(Some(total)).unwrap();
    b.finish()
}

fn canonicalize(graph: &mut Graph) {
    CanonicalizerPhase::new().apply(graph, &mut ctx()).unwrap();
}

#[test]
fn test_busy_graph_reaches_expected_form() {
    let mut graph = busy_graph();
    canonicalize(&mut graph);
    assert!(graph.verify().is_ok(), "{graph:?}");

    let ret = graph.snapshot_of(NodeKind::Return)[0];
    let total = graph.inputs(ret)[1];
    assert_eq!(graph.op(total), Operator::Binary(BinaryOp::Mul));
    let (t1, t2) = (graph.inputs(total)[0], graph.inputs(total)[1]);

    // (p + 6) + 0 + 0 collapses to p + 6.
    assert_eq!(graph.op(t1), Operator::Binary(BinaryOp::Add));
    assert_eq!(graph.node(graph.inputs(t1)[1]).as_int(), Some(6));

    // narrow(sign_extend(p)) | int(float(q)) is p | q.
    assert_eq!(graph.op(t2), Operator::Binary(BinaryOp::Or));
    let params: Vec<_> = graph.inputs(t2).iter().map(|&i| graph.op(i)).collect();
    assert_eq!(params, [Operator::Parameter(0), Operator::Parameter(1)]);

    assert!(graph.snapshot_of(NodeKind::Reinterpret).is_empty());
    assert!(graph.snapshot_of(NodeKind::Convert).is_empty());
}

#[test]
fn test_canonicalization_is_idempotent() {
    let mut graph = busy_graph();
    canonicalize(&mut graph);
    let once = graph.fingerprint();
    let mutations = graph.mutation_count();

    let stats = CanonicalizerPhase::new().apply(&mut graph, &mut ctx()).unwrap();
    assert_eq!(stats.rewrites, 0);
    assert_eq!(stats.nodes_killed, 0);
    assert_eq!(stats.gvn_merges, 0);
    assert_eq!(graph.fingerprint(), once);
    assert_eq!(graph.mutation_count(), mutations);
}

#[test]
fn test_multi_guard_deduplicates_inputs() {
    let mut graph = busy_graph();
    canonicalize(&mut graph);

    let anchor = graph.snapshot_of(NodeKind::ValueAnchor)[0];
    let multi = graph.inputs(anchor)[1];
    assert_eq!(graph.op(multi), Operator::MultiGuard);
    let guards = graph.inputs(multi);
    assert_eq!(guards.len(), 2);
    assert!(guards[0] < guards[1]);
    assert!(guards.iter().all(|&g| matches!(graph.op(g), Operator::Guard(_))));
}

#[test]
fn test_combine_laws() {
    let mut graph = busy_graph();
    let guards = graph.snapshot_of(NodeKind::Guard);
    let (a, b) = (guards[0], guards[1]);

    assert_eq!(combine(&mut graph, None, a).unwrap(), a);
    assert_eq!(combine(&mut graph, Some(a), a).unwrap(), a);
    let ab = combine(&mut graph, Some(a), b).unwrap();
    assert_eq!(graph.inputs(ab), &[a, b]);
}

#[test]
fn test_reinterpret_round_trip_cancels() {
    let mut b = GraphBuilder::new("reinterpret");
    let x = b.parameter(0, Stamp::int_range(32, 0, 100)).unwrap();
    let f = b.reinterpret(x, ValueKind::Float(32)).unwrap();
    let i = b.reinterpret(f, ValueKind::Int(32)).unwrap();
    let ret = b.return_value(Some(i)).unwrap();
    let mut graph = b.finish();

    let stats = CanonicalizerPhase::new().apply(&mut graph, &mut ctx()).unwrap();
    assert_eq!(stats.applied("reinterpret.cancel"), 1);
    assert_eq!(graph.inputs(ret)[1], x);
    assert_eq!(graph.stamp(x), Stamp::int_range(32, 0, 100));
    assert!(!graph.contains(f));
    assert!(!graph.contains(i));
    assert!(graph.verify().is_ok(), "{graph:?}");
}

#[test]
fn test_unsupported_shapes_are_left_alone() {
    let mut b = GraphBuilder::new("floats");
    let x = b.parameter(0, Stamp::unrestricted(ValueKind::Float(64))).unwrap();
    let y = b.parameter(1, Stamp::unrestricted(ValueKind::Float(64))).unwrap();
    let sum = b
        .graph_mut()
        .add_node(Operator::Binary(BinaryOp::Add), &[x, y], Stamp::unrestricted(ValueKind::Float(64)))
        .unwrap();
    b.return_value(Some(sum)).unwrap();
    let mut graph = b.finish();
    let before = graph.fingerprint();

    let mut ctx = ctx();
    let stats = CanonicalizerPhase::new().apply(&mut graph, &mut ctx).unwrap();
    assert_eq!(stats.rewrites, 0);
    assert!(stats.unsupported >= 1);
    assert_eq!(ctx.debug.counter("canonicalizer.unsupported"), stats.unsupported as u64);
    assert_eq!(graph.fingerprint(), before);
}

// =============================================================================
// Rule Failures
// =============================================================================

/// Rewrites `x op y` into `y op x` and back, forever.
struct Swap;

impl CanonicalRule for Swap {
    fn name(&self) -> &'static str {
        "test.swap"
    }

    fn applies_to(&self, kind: NodeKind) -> bool {
        kind == NodeKind::Binary
    }

    fn canonical(&self, graph: &Graph, node: NodeId) -> Replacement {
        let (x, y) = (graph.inputs(node)[0], graph.inputs(node)[1]);
        Replacement::new_node(NodeTemplate::new(graph.op(node), [y.into(), x.into()]), self.name())
    }
}

#[test]
fn test_looping_rule_reports_non_termination() {
    let mut b = GraphBuilder::new("swap");
    let p = b.parameter(0, int32()).unwrap();
    let q = b.parameter(1, int32()).unwrap();
    let x = b.binary(BinaryOp::Or, p, q).unwrap();
    b.return_value(Some(x)).unwrap();
    let mut graph = b.finish();

    let mut ctx = PhaseContext::new(CompilerOptions {
        max_worklist_iterations: 200,
        ..Default::default()
    });
    let err = CanonicalizerPhase::new()
        .with_rule(Swap)
        .apply(&mut graph, &mut ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::NonTermination { ref rule, budget: 200, .. } if rule == "test.swap"
    ));
    assert!(err.to_string().contains("test.swap"));
}

#[test]
fn test_cancellation_is_observed() {
    let mut graph = busy_graph();
    graph.cancellation_token().cancel();
    let err = CanonicalizerPhase::new().apply(&mut graph, &mut ctx()).unwrap_err();
    assert_eq!(
        err,
        CompileError::Cancelled {
            phase: "Canonicalizer".to_string()
        }
    );
}

// =============================================================================
// Confluence
// =============================================================================

fn seed_order() -> impl Strategy<Value = Vec<NodeId>> {
    Just(busy_graph().snapshot()).prop_shuffle()
}

fn pop_order() -> impl Strategy<Value = PopOrder> {
    prop_oneof![Just(PopOrder::Fifo), Just(PopOrder::Lifo)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fixpoint_is_order_independent(seeds in seed_order(), order in pop_order()) {
        let mut reference = busy_graph();
        canonicalize(&mut reference);

        let mut graph = busy_graph();
        let mut ctx = PhaseContext::new(CompilerOptions {
            worklist_order: order,
            ..Default::default()
        });
        CanonicalizerPhase::new().apply_to(&mut graph, &mut ctx, seeds).unwrap();

        prop_assert!(graph.verify().is_ok());
        prop_assert_eq!(graph.fingerprint(), reference.fingerprint());
    }
}

/// A generated arithmetic graph, a shuffled seed order over its nodes and a
/// pop order.
fn generated_case() -> impl Strategy<Value = (Vec<common::Step>, Vec<NodeId>, PopOrder)> {
    common::steps(16).prop_flat_map(|steps| {
        let ids = common::arithmetic_graph(&steps).snapshot();
        (Just(steps), Just(ids).prop_shuffle(), pop_order())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_generated_graphs_reach_one_fixpoint((steps, seeds, order) in generated_case()) {
        let mut reference = common::arithmetic_graph(&steps);
        canonicalize(&mut reference);

        let mut graph = common::arithmetic_graph(&steps);
        let mut ctx = PhaseContext::new(CompilerOptions {
            worklist_order: order,
            ..Default::default()
        });
        CanonicalizerPhase::new().apply_to(&mut graph, &mut ctx, seeds).unwrap();

        prop_assert!(graph.verify().is_ok(), "{:?}", graph);
        prop_assert_eq!(graph.fingerprint(), reference.fingerprint(), "{:?} vs {:?}", graph, reference);
    }
}
