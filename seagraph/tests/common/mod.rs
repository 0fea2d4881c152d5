//! Strategies and graph builders shared by the integration tests.

#![allow(dead_code)]

use proptest::prelude::*;
use seagraph::ir::{BinaryOp, Graph, GraphBuilder, Operator, Stamp, ValueKind};

pub fn binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::And),
        Just(BinaryOp::Or),
        Just(BinaryOp::Xor),
    ]
}

/// Ops that keep full-range inputs full range, so a non-constant value never
/// carries a refined stamp.
pub fn wrapping_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Sub), Just(BinaryOp::Xor)]
}

/// One generated value: `op` over two earlier values, picked modulo the
/// number of values built so far. Unshared steps bypass value numbering.
#[derive(Debug, Clone)]
pub struct Step {
    pub op: BinaryOp,
    pub x: usize,
    pub y: usize,
    pub shared: bool,
}

pub fn steps(max: usize) -> impl Strategy<Value = Vec<Step>> {
    let step = (wrapping_op(), any::<usize>(), any::<usize>(), any::<bool>())
        .prop_map(|(op, x, y, shared)| Step { op, x, y, shared });
    prop::collection::vec(step, 1..max)
}

/// Two 32-bit parameters and a few constants, then one value per step.
/// Every step feeds the returned sum, so nothing starts out dead.
pub fn arithmetic_graph(steps: &[Step]) -> Graph {
    let int32 = Stamp::unrestricted(ValueKind::Int(32));
    let mut b = GraphBuilder::new("arithmetic");
    let mut pool = vec![b.parameter(0, int32).unwrap(), b.parameter(1, int32).unwrap()];
    for c in [0, 1, 2, -1] {
        pool.push(b.int(32, c).unwrap());
    }

    let mut results = Vec::with_capacity(steps.len());
    for step in steps {
        let (x, y) = (pool[step.x % pool.len()], pool[step.y % pool.len()]);
        let value = if step.shared {
            b.binary(step.op, x, y).unwrap()
        } else {
            b.graph_mut().add_inferred(Operator::Binary(step.op), &[x, y]).unwrap()
        };
        pool.push(value);
        results.push(value);
    }

    let mut total = results[0];
    for &value in &results[1..] {
        total = b
            .graph_mut()
            .add_inferred(Operator::Binary(BinaryOp::Add), &[total, value])
            .unwrap();
    }
    b.return_value(Some(total)).unwrap();
    b.finish()
}
