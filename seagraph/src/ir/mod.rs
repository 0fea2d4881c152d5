//! Sea-of-Nodes Intermediate Representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): Tombstoned node storage, secondary maps, bit sets
//! - **Stamps** (`stamp.rs`): Abstract value lattice used for folding
//! - **Operators** (`operators.rs`): Operator set and per-slot edge types
//! - **Node** (`node.rs`): IR node definitions
//! - **Graph** (`graph.rs`): Node store, use-def chains, value numbering,
//!   verification
//! - **Surgery** (`surgery.rs`): Control-chain editing and dead-region killing
//! - **Builder** (`builder.rs`): Convenience construction in control order

pub mod arena;
pub mod builder;
pub mod graph;
pub mod node;
pub mod operators;
pub mod stamp;
mod surgery;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::GraphBuilder;
pub use graph::{CancellationToken, Edge, Graph, GraphFingerprint, StageFlags};
pub use node::{Node, NodeId, NodeList};
pub use operators::{
    BinaryOp, CmpOp, Constant, ConvertOp, DeoptReason, FixedBinaryOp, GuardInfo, InputType,
    LocationIdentity, NodeKind, Operator,
};
pub use stamp::{FloatStamp, IntegerStamp, ObjectStamp, Stamp, TypeId, ValueKind};
