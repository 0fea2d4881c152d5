//! Operator definitions for the Sea-of-Nodes IR.
//!
//! Operators fall into two groups:
//! - **Floating**: pure computations placed only by their data dependencies
//!   (constants, arithmetic, comparisons, casts, phis, guards, floating reads)
//! - **Fixed**: nodes ordered on the control chain (start, branches, merges,
//!   memory accesses, anchors, fences, returns)
//!
//! Each operator also describes its input layout: which slot is a control,
//! value, memory, guard or association edge, and which slots are optional.

use std::fmt;

use super::stamp::{mask, sign_extend, IntegerStamp, Stamp, ValueKind};

// =============================================================================
// Constants
// =============================================================================

/// A compile-time constant value.
///
/// Floats keep their exact bit pattern so bit-level casts are lossless and
/// NaN payloads survive folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Integer, sign-extended to 64 bits.
    Int { bits: u8, value: i64 },
    /// Float bit pattern at the given width (32-bit patterns zero-extended).
    Float { bits: u8, raw: u64 },
    /// The null reference.
    Null,
}

impl Constant {
    /// Integer constant truncated to `bits`.
    #[inline]
    pub const fn int(bits: u8, value: i64) -> Self {
        Constant::Int {
            bits,
            value: sign_extend(value, bits),
        }
    }

    /// 32-bit float constant.
    #[inline]
    pub fn f32(value: f32) -> Self {
        Constant::Float {
            bits: 32,
            raw: value.to_bits() as u64,
        }
    }

    /// 64-bit float constant.
    #[inline]
    pub fn f64(value: f64) -> Self {
        Constant::Float {
            bits: 64,
            raw: value.to_bits(),
        }
    }

    /// Integer value, if this is an integer constant.
    #[inline]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Float value, if this is a float constant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Constant::Float { bits: 32, raw } => Some(f32::from_bits(raw as u32) as f64),
            Constant::Float { raw, .. } => Some(f64::from_bits(raw)),
            _ => None,
        }
    }

    /// Kind of the value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Constant::Int { bits, .. } => ValueKind::Int(*bits),
            Constant::Float { bits, .. } => ValueKind::Float(*bits),
            Constant::Null => ValueKind::Object,
        }
    }

    /// Reinterpret the bits of this constant as `to`.
    pub fn reinterpret(&self, to: ValueKind) -> Option<Constant> {
        if self.kind() == to {
            return Some(*self);
        }
        match (*self, to) {
            (Constant::Int { bits, value }, ValueKind::Float(to_bits)) if bits == to_bits => {
                Some(Constant::Float {
                    bits,
                    raw: value as u64 & mask(bits),
                })
            }
            (Constant::Float { bits, raw }, ValueKind::Int(to_bits)) if bits == to_bits => {
                Some(Constant::int(bits, raw as i64))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { bits, value } => write!(f, "{value}i{bits}"),
            Constant::Float { bits, raw } => match self.as_f64() {
                Some(v) if v.is_nan() => write!(f, "nan({raw:#x})f{bits}"),
                Some(v) => write!(f, "{v}f{bits}"),
                None => Ok(()),
            },
            Constant::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// Arithmetic / Comparison / Conversion
// =============================================================================

/// Pure binary integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Check if this operation is commutative.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        !matches!(self, BinaryOp::Sub)
    }

    /// Right identity element: `x op e == x`.
    pub const fn identity(self, bits: u8) -> i64 {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor => 0,
            BinaryOp::Mul => 1,
            BinaryOp::And => sign_extend(mask(bits) as i64, bits),
        }
    }

    /// Absorbing element: `x op z == z`.
    pub const fn absorbing(self, bits: u8) -> Option<i64> {
        match self {
            BinaryOp::Mul | BinaryOp::And => Some(0),
            BinaryOp::Or => Some(sign_extend(mask(bits) as i64, bits)),
            _ => None,
        }
    }

    /// Evaluate with wrap-around at `bits`.
    pub const fn fold(self, bits: u8, a: i64, b: i64) -> i64 {
        let raw = match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
        };
        sign_extend(raw, bits)
    }

    /// Result stamp for operand stamps.
    pub fn stamp(self, a: &IntegerStamp, b: &IntegerStamp) -> IntegerStamp {
        match self {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::And => a.and(b),
            BinaryOp::Or => a.or(b),
            BinaryOp::Xor => a.xor(b),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
        }
    }
}

/// Integer comparison producing 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    /// Signed less-than.
    Lt,
    /// Signed less-or-equal.
    Le,
    /// Unsigned less-than.
    Below,
}

impl CmpOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    /// Result of comparing a value with itself.
    pub const fn reflexive_result(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Le)
    }

    /// Evaluate on constants.
    pub const fn fold(self, bits: u8, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Below => (a as u64 & mask(bits)) < (b as u64 & mask(bits)),
        }
    }

    /// Decide the comparison from operand stamps alone, if possible.
    pub fn fold_stamps(self, a: &IntegerStamp, b: &IntegerStamp) -> Option<bool> {
        if a.is_empty() || b.is_empty() {
            return None;
        }
        let disjoint = a.upper() < b.lower()
            || b.upper() < a.lower()
            || a.must_be_set() & !b.may_be_set() != 0
            || b.must_be_set() & !a.may_be_set() != 0;
        let same_constant = a.as_constant().is_some() && a.as_constant() == b.as_constant();
        match self {
            CmpOp::Eq if same_constant => Some(true),
            CmpOp::Eq if disjoint => Some(false),
            CmpOp::Ne if same_constant => Some(false),
            CmpOp::Ne if disjoint => Some(true),
            CmpOp::Lt if a.upper() < b.lower() => Some(true),
            CmpOp::Lt if a.lower() >= b.upper() => Some(false),
            CmpOp::Le if a.upper() <= b.lower() => Some(true),
            CmpOp::Le if a.lower() > b.upper() => Some(false),
            CmpOp::Below if a.lower() >= 0 && b.lower() >= 0 => CmpOp::Lt.fold_stamps(a, b),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Below => "|<|",
        }
    }
}

/// Integer division-like operation that traps on a zero divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedBinaryOp {
    Div,
    Rem,
}

impl FixedBinaryOp {
    /// Evaluate on constants. `None` for a zero divisor, which must stay in
    /// the graph so the trap is preserved.
    pub const fn fold(self, bits: u8, a: i64, b: i64) -> Option<i64> {
        if b == 0 {
            return None;
        }
        let raw = match self {
            FixedBinaryOp::Div => a.wrapping_div(b),
            FixedBinaryOp::Rem => a.wrapping_rem(b),
        };
        Some(sign_extend(raw, bits))
    }
}

/// Width conversion of an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertOp {
    Narrow,
    SignExtend,
    ZeroExtend,
}

impl ConvertOp {
    /// Evaluate on a constant of width `from`.
    pub const fn fold(self, from: u8, to: u8, value: i64) -> i64 {
        match self {
            ConvertOp::Narrow | ConvertOp::SignExtend => sign_extend(value, to),
            ConvertOp::ZeroExtend => sign_extend((value as u64 & mask(from)) as i64, to),
        }
    }

    /// Result stamp for an input stamp.
    pub fn stamp(self, input: &IntegerStamp, to: u8) -> IntegerStamp {
        match self {
            ConvertOp::Narrow => input.narrow(to),
            ConvertOp::SignExtend => input.sign_extend(to),
            ConvertOp::ZeroExtend => input.zero_extend(to),
        }
    }
}

// =============================================================================
// Memory and Guards
// =============================================================================

/// Identity of a memory location class. Accesses to different identities
/// never alias; [`LocationIdentity::ANY`] aliases everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationIdentity(pub u32);

impl LocationIdentity {
    /// Location that overlaps every other location.
    pub const ANY: LocationIdentity = LocationIdentity(u32::MAX);

    #[inline]
    pub const fn is_any(self) -> bool {
        self.0 == u32::MAX
    }

    /// Check whether accesses to the two locations may alias.
    #[inline]
    pub const fn overlaps(self, other: LocationIdentity) -> bool {
        self.is_any() || other.is_any() || self.0 == other.0
    }
}

/// Why a failing guard transfers execution out of compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    NullCheck,
    BoundsCheck,
    ClassCast,
    ArithmeticException,
    UnreachedCode,
    TransferToInterpreter,
}

/// Static description of a guard.
///
/// A guard passes when its condition is true, or false if `negated` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardInfo {
    pub reason: DeoptReason,
    pub negated: bool,
}

impl GuardInfo {
    pub const fn new(reason: DeoptReason) -> Self {
        GuardInfo {
            reason,
            negated: false,
        }
    }

    pub const fn negated(reason: DeoptReason) -> Self {
        GuardInfo {
            reason,
            negated: true,
        }
    }

    /// Check whether a constant condition value makes the guard pass.
    #[inline]
    pub const fn passes(&self, condition: bool) -> bool {
        condition != self.negated
    }
}

// =============================================================================
// Input Types
// =============================================================================

/// Type of an input edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    /// Data dependency on a value-producing node.
    Value,
    /// Predecessor on the control chain.
    Control,
    /// Dependency on the last memory state.
    Memory,
    /// Dependency on a guard (or an anchoring fixed node).
    Guard,
    /// Structural link: phi to merge, guard to its anchor.
    Association,
}

// =============================================================================
// Operator
// =============================================================================

/// The operation performed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // --- Fixed: control structure ---
    /// Entry of the graph.
    Start,
    /// Two-way branch: `[control, condition]`.
    If,
    /// True successor of an `If`: `[if]`.
    IfTrue,
    /// False successor of an `If`: `[if]`.
    IfFalse,
    /// Control-flow join: `[pred...]`.
    Merge,
    /// Function exit: `[control, value?]`.
    Return,

    // --- Fixed: effects ---
    /// Trapping division: `[control, x, y]`.
    FixedBinary(FixedBinaryOp),
    /// Memory load pinned on the chain: `[control, address]`.
    Read(LocationIdentity),
    /// Memory store: `[control, address, value]`.
    Write(LocationIdentity),
    /// Memory barrier that floating reads cannot cross: `[control]`.
    MemoryAnchor,
    /// Pins its guard at this point of the chain: `[control, guard?]`.
    ValueAnchor,
    /// Guard fixed on the chain: `[control, condition]`.
    FixedGuard(GuardInfo),
    /// Speculation barrier: `[control]`.
    Fence,

    // --- Floating ---
    /// Function parameter; stamp is supplied at creation.
    Parameter(u16),
    Constant(Constant),
    /// `[x, y]`
    Binary(BinaryOp),
    /// `[x, y]`
    Compare(CmpOp),
    /// Bit-level cast: `[value]`.
    Reinterpret(ValueKind),
    /// Integer width change: `[value]`.
    Convert { op: ConvertOp, to: u8 },
    /// SSA merge: `[merge, value per pred...]`.
    Phi,
    /// Floating guard: `[condition, anchor]`.
    Guard(GuardInfo),
    /// Conjunction of guards: `[guard...]` (inputs may be absent).
    MultiGuard,
    /// Memory load placed by dependencies: `[address, memory, guard?]`.
    ///
    /// The optional guard is whatever protected the load before it was
    /// floated; the load may not be scheduled above it.
    FloatingRead(LocationIdentity),
}

/// Fieldless discriminant of [`Operator`], used for kind queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    If,
    IfTrue,
    IfFalse,
    Merge,
    Return,
    FixedBinary,
    Read,
    Write,
    MemoryAnchor,
    ValueAnchor,
    FixedGuard,
    Fence,
    Parameter,
    Constant,
    Binary,
    Compare,
    Reinterpret,
    Convert,
    Phi,
    Guard,
    MultiGuard,
    FloatingRead,
}

impl Operator {
    /// Discriminant of this operator.
    pub const fn kind(&self) -> NodeKind {
        match self {
            Operator::Start => NodeKind::Start,
            Operator::If => NodeKind::If,
            Operator::IfTrue => NodeKind::IfTrue,
            Operator::IfFalse => NodeKind::IfFalse,
            Operator::Merge => NodeKind::Merge,
            Operator::Return => NodeKind::Return,
            Operator::FixedBinary(_) => NodeKind::FixedBinary,
            Operator::Read(_) => NodeKind::Read,
            Operator::Write(_) => NodeKind::Write,
            Operator::MemoryAnchor => NodeKind::MemoryAnchor,
            Operator::ValueAnchor => NodeKind::ValueAnchor,
            Operator::FixedGuard(_) => NodeKind::FixedGuard,
            Operator::Fence => NodeKind::Fence,
            Operator::Parameter(_) => NodeKind::Parameter,
            Operator::Constant(_) => NodeKind::Constant,
            Operator::Binary(_) => NodeKind::Binary,
            Operator::Compare(_) => NodeKind::Compare,
            Operator::Reinterpret(_) => NodeKind::Reinterpret,
            Operator::Convert { .. } => NodeKind::Convert,
            Operator::Phi => NodeKind::Phi,
            Operator::Guard(_) => NodeKind::Guard,
            Operator::MultiGuard => NodeKind::MultiGuard,
            Operator::FloatingRead(_) => NodeKind::FloatingRead,
        }
    }

    /// Check whether this node lives on the control chain.
    pub const fn is_fixed(&self) -> bool {
        matches!(
            self,
            Operator::Start
                | Operator::If
                | Operator::IfTrue
                | Operator::IfFalse
                | Operator::Merge
                | Operator::Return
                | Operator::FixedBinary(_)
                | Operator::Read(_)
                | Operator::Write(_)
                | Operator::MemoryAnchor
                | Operator::ValueAnchor
                | Operator::FixedGuard(_)
                | Operator::Fence
        )
    }

    /// Check whether two nodes with this operator and equal inputs are
    /// interchangeable.
    pub const fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            Operator::Constant(_)
                | Operator::Binary(_)
                | Operator::Compare(_)
                | Operator::Reinterpret(_)
                | Operator::Convert { .. }
                | Operator::Guard(_)
                | Operator::MultiGuard
                | Operator::FloatingRead(_)
        )
    }

    /// Check whether the node can be removed once nothing uses it.
    ///
    /// Guards are excluded: an unused guard still performs its check.
    pub const fn is_killable_when_unused(&self) -> bool {
        !self.is_fixed() && !matches!(self, Operator::Parameter(_) | Operator::Guard(_))
    }

    /// Check whether the node produces a value.
    pub const fn produces_value(&self) -> bool {
        matches!(
            self,
            Operator::Parameter(_)
                | Operator::Constant(_)
                | Operator::Binary(_)
                | Operator::Compare(_)
                | Operator::Reinterpret(_)
                | Operator::Convert { .. }
                | Operator::Phi
                | Operator::FloatingRead(_)
                | Operator::FixedBinary(_)
                | Operator::Read(_)
        )
    }

    /// Check whether this node may be the target of a guard edge.
    pub const fn can_be_guard(&self) -> bool {
        self.is_fixed() || matches!(self, Operator::Guard(_) | Operator::MultiGuard)
    }

    /// Check whether this node defines a memory state.
    pub const fn is_memory_kill(&self) -> bool {
        matches!(
            self,
            Operator::Start | Operator::Merge | Operator::MemoryAnchor | Operator::Write(_)
        )
    }

    /// Check whether this node overwrites memory at `location`.
    pub const fn kills(&self, location: LocationIdentity) -> bool {
        match self {
            Operator::Start | Operator::Merge | Operator::MemoryAnchor => true,
            Operator::Write(l) => l.overlaps(location),
            _ => false,
        }
    }

    /// Memory location accessed, for reads and writes.
    pub const fn location(&self) -> Option<LocationIdentity> {
        match self {
            Operator::Read(l) | Operator::Write(l) | Operator::FloatingRead(l) => Some(*l),
            _ => None,
        }
    }

    /// Guard description, for guards.
    pub const fn guard_info(&self) -> Option<GuardInfo> {
        match self {
            Operator::Guard(info) | Operator::FixedGuard(info) => Some(*info),
            _ => None,
        }
    }

    /// Allowed input count as `(min, max)`.
    pub const fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Operator::Start | Operator::Parameter(_) | Operator::Constant(_) => (0, Some(0)),
            Operator::IfTrue | Operator::IfFalse | Operator::MemoryAnchor | Operator::Fence => {
                (1, Some(1))
            }
            Operator::Reinterpret(_) | Operator::Convert { .. } => (1, Some(1)),
            Operator::If
            | Operator::Binary(_)
            | Operator::Compare(_)
            | Operator::Read(_)
            | Operator::FixedGuard(_)
            | Operator::Guard(_) => (2, Some(2)),
            Operator::FloatingRead(_) => (2, Some(3)),
            Operator::FixedBinary(_) | Operator::Write(_) => (3, Some(3)),
            Operator::Return | Operator::ValueAnchor => (1, Some(2)),
            Operator::Merge => (1, None),
            Operator::Phi => (1, None),
            Operator::MultiGuard => (0, None),
        }
    }

    /// Check whether `count` inputs is a legal arity.
    pub const fn accepts_arity(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        if count < min {
            return false;
        }
        match max {
            Some(max) => count <= max,
            None => true,
        }
    }

    /// Type of the edge at input slot `index`.
    pub const fn input_type(&self, index: usize) -> InputType {
        match self {
            Operator::Merge => InputType::Control,
            Operator::Phi if index == 0 => InputType::Association,
            Operator::Phi => InputType::Value,
            Operator::Guard(_) if index == 1 => InputType::Association,
            Operator::MultiGuard => InputType::Guard,
            Operator::ValueAnchor if index == 1 => InputType::Guard,
            Operator::FloatingRead(_) if index == 1 => InputType::Memory,
            Operator::FloatingRead(_) if index == 2 => InputType::Guard,
            _ if index == 0 && self.is_fixed() => InputType::Control,
            _ => InputType::Value,
        }
    }

    /// Check whether input slot `index` may be cleared without breaking the node.
    pub const fn is_optional_input(&self, index: usize) -> bool {
        match self {
            Operator::MultiGuard => true,
            Operator::ValueAnchor | Operator::Return => index == 1,
            Operator::FloatingRead(_) => index == 2,
            _ => false,
        }
    }

    /// Stamp implied by the input stamps. `None` means the operator carries
    /// a declared stamp that inputs cannot refine.
    pub fn infer_stamp(&self, inputs: &[Stamp]) -> Option<Stamp> {
        match self {
            Operator::Constant(c) => Some(Stamp::for_constant(c)),
            Operator::Binary(op) => match inputs {
                [Stamp::Int(a), Stamp::Int(b)] if a.bits() == b.bits() => {
                    Some(Stamp::Int(op.stamp(a, b)))
                }
                _ => None,
            },
            Operator::Compare(op) => {
                let folded = match inputs {
                    [Stamp::Int(a), Stamp::Int(b)] if a.bits() == b.bits() => op.fold_stamps(a, b),
                    _ => None,
                };
                Some(match folded {
                    Some(v) => Stamp::Int(IntegerStamp::constant(32, v as i64)),
                    None => Stamp::int_range(32, 0, 1),
                })
            }
            Operator::Reinterpret(to) => inputs.first().map(|s| s.reinterpret(*to)),
            Operator::Convert { op, to } => match inputs {
                [Stamp::Int(s)] => Some(Stamp::Int(op.stamp(s, *to))),
                _ => None,
            },
            Operator::Phi => Some(
                inputs
                    .iter()
                    .skip(1)
                    .fold(Stamp::Empty, |acc, s| acc.meet(s)),
            ),
            Operator::FixedBinary(op) => match inputs {
                [_, Stamp::Int(x), Stamp::Int(y)] => fixed_binary_stamp(*op, x, y).map(Stamp::Int),
                _ => None,
            },
            _ if !self.produces_value() => Some(Stamp::Void),
            _ => None,
        }
    }

    /// Short mnemonic for dumps and diagnostics.
    pub fn name(&self) -> String {
        match self {
            Operator::Start => "Start".into(),
            Operator::If => "If".into(),
            Operator::IfTrue => "IfTrue".into(),
            Operator::IfFalse => "IfFalse".into(),
            Operator::Merge => "Merge".into(),
            Operator::Return => "Return".into(),
            Operator::FixedBinary(op) => format!("{op:?}"),
            Operator::Read(l) => format!("Read[{}]", l.0),
            Operator::Write(l) => format!("Write[{}]", l.0),
            Operator::MemoryAnchor => "MemoryAnchor".into(),
            Operator::ValueAnchor => "ValueAnchor".into(),
            Operator::FixedGuard(info) => format!("FixedGuard[{:?}{}]", info.reason, neg(info)),
            Operator::Fence => "Fence".into(),
            Operator::Parameter(i) => format!("Param({i})"),
            Operator::Constant(c) => format!("Const({c})"),
            Operator::Binary(op) => op.name().into(),
            Operator::Compare(op) => format!("Cmp({})", op.name()),
            Operator::Reinterpret(to) => format!("Reinterpret({to})"),
            Operator::Convert { op, to } => format!("{op:?}({to})"),
            Operator::Phi => "Phi".into(),
            Operator::Guard(info) => format!("Guard[{:?}{}]", info.reason, neg(info)),
            Operator::MultiGuard => "MultiGuard".into(),
            Operator::FloatingRead(l) => format!("FloatingRead[{}]", l.0),
        }
    }
}

fn neg(info: &GuardInfo) -> &'static str {
    if info.negated {
        ",!"
    } else {
        ""
    }
}

fn fixed_binary_stamp(op: FixedBinaryOp, x: &IntegerStamp, y: &IntegerStamp) -> Option<IntegerStamp> {
    let d = y.as_constant()?;
    if d == 0 || x.is_empty() {
        return None;
    }
    let bits = x.bits();
    match op {
        FixedBinaryOp::Div if d > 0 => Some(IntegerStamp::range(bits, x.lower() / d, x.upper() / d)),
        FixedBinaryOp::Div => None,
        FixedBinaryOp::Rem => {
            let m = d.checked_abs()? - 1;
            let lo = if x.lower() >= 0 { 0 } else { -m };
            let hi = if x.upper() <= 0 { 0 } else { m };
            Some(IntegerStamp::range(bits, lo, hi))
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_fold_wraps() {
        assert_eq!(BinaryOp::Add.fold(32, i32::MAX as i64, 1), i32::MIN as i64);
        assert_eq!(BinaryOp::Mul.fold(8, 16, 16), 0);
        assert_eq!(BinaryOp::Sub.fold(64, 3, 5), -2);
        assert_eq!(BinaryOp::And.identity(32), -1);
        assert_eq!(BinaryOp::Xor.fold(32, 0b1100, 0b1010), 0b0110);
    }

    #[test]
    fn test_compare_fold() {
        assert!(CmpOp::Below.fold(32, 1, -1));
        assert!(!CmpOp::Lt.fold(32, 1, -1));
        let small = IntegerStamp::range(32, 0, 10);
        let big = IntegerStamp::range(32, 20, 30);
        assert_eq!(CmpOp::Lt.fold_stamps(&small, &big), Some(true));
        assert_eq!(CmpOp::Eq.fold_stamps(&small, &big), Some(false));
        assert_eq!(CmpOp::Le.fold_stamps(&small, &small), None);
    }

    #[test]
    fn test_fixed_binary_keeps_zero_divisor() {
        assert_eq!(FixedBinaryOp::Div.fold(32, 7, 0), None);
        assert_eq!(FixedBinaryOp::Div.fold(32, 7, 2), Some(3));
        assert_eq!(FixedBinaryOp::Rem.fold(32, -7, 2), Some(-1));
        assert_eq!(FixedBinaryOp::Div.fold(32, i32::MIN as i64, -1), Some(i32::MIN as i64));
    }

    #[test]
    fn test_convert_fold() {
        assert_eq!(ConvertOp::Narrow.fold(32, 8, 0x1FF), -1);
        assert_eq!(ConvertOp::ZeroExtend.fold(8, 32, -1), 255);
        assert_eq!(ConvertOp::SignExtend.fold(8, 32, -1), -1);
    }

    #[test]
    fn test_constant_reinterpret_is_exact() {
        let c = Constant::int(32, 0x7FC0_0001);
        let f = c.reinterpret(ValueKind::Float(32)).unwrap();
        assert!(f.as_f64().unwrap().is_nan());
        assert_eq!(f.reinterpret(ValueKind::Int(32)), Some(c));
        assert_eq!(c.reinterpret(ValueKind::Float(64)), None);
    }

    #[test]
    fn test_input_layout() {
        assert_eq!(Operator::Phi.input_type(0), InputType::Association);
        assert_eq!(Operator::Phi.input_type(2), InputType::Value);
        assert_eq!(Operator::Read(LocationIdentity(1)).input_type(0), InputType::Control);
        assert_eq!(Operator::Read(LocationIdentity(1)).input_type(1), InputType::Value);
        assert_eq!(
            Operator::FloatingRead(LocationIdentity(1)).input_type(1),
            InputType::Memory
        );
        assert_eq!(Operator::ValueAnchor.input_type(1), InputType::Guard);
        assert_eq!(
            Operator::FloatingRead(LocationIdentity(1)).input_type(2),
            InputType::Guard
        );
        assert!(Operator::FloatingRead(LocationIdentity(1)).is_optional_input(2));
        assert!(!Operator::FloatingRead(LocationIdentity(1)).accepts_arity(4));
        assert!(Operator::MultiGuard.accepts_arity(0));
        assert!(!Operator::Binary(BinaryOp::Add).accepts_arity(3));
        assert!(Operator::Return.is_optional_input(1));
    }

    #[test]
    fn test_memory_kills() {
        let a = LocationIdentity(1);
        let b = LocationIdentity(2);
        assert!(Operator::Write(a).kills(a));
        assert!(!Operator::Write(a).kills(b));
        assert!(Operator::Write(LocationIdentity::ANY).kills(b));
        assert!(Operator::MemoryAnchor.kills(b));
    }

    #[test]
    fn test_infer_phi_and_compare() {
        let phi = Operator::Phi.infer_stamp(&[
            Stamp::Void,
            Stamp::int_range(32, 0, 5),
            Stamp::int_range(32, 10, 12),
        ]);
        let s = phi.unwrap();
        let s = s.as_int().unwrap();
        assert_eq!((s.lower(), s.upper()), (0, 12));

        let cmp = Operator::Compare(CmpOp::Lt)
            .infer_stamp(&[Stamp::int_range(32, 0, 5), Stamp::int_range(32, 10, 12)]);
        assert_eq!(cmp.and_then(|s| s.as_constant()), Some(Constant::int(32, 1)));
    }
}
