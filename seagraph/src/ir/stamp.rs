//! Stamp lattice for the Sea-of-Nodes IR.
//!
//! A stamp describes the set of runtime values a node may produce:
//! - **Integer**: bit width, inclusive signed bounds, and known-bits masks
//! - **Float**: bit width, inclusive bounds, and whether NaN is possible
//! - **Object**: nullability plus an optional type bound
//!
//! The lattice is:
//! ```text
//!                    Any (every value)
//!              /        |        \
//!         i8..i64   f32, f64    object
//!              \        |        /
//!                  Empty (no value)
//! ```
//!
//! `meet` widens (set union, used at control-flow merges) and `join` narrows
//! (set intersection, used when two independent facts hold at once). Both must
//! stay sound: neither may drop a value that the inputs admit.
//!
//! Non-value nodes (control, guards, memory) carry [`Stamp::Void`].

use std::fmt;
use std::hash::{Hash, Hasher};

use super::operators::Constant;

// =============================================================================
// Bit-width helpers
// =============================================================================

/// All-ones mask for a `bits`-wide value.
#[inline]
pub const fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Smallest signed value representable in `bits`.
#[inline]
pub const fn min_value(bits: u8) -> i64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (bits - 1))
    }
}

/// Largest signed value representable in `bits`.
#[inline]
pub const fn max_value(bits: u8) -> i64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        i64::MAX
    } else {
        (1i64 << (bits - 1)) - 1
    }
}

/// Sign-extend the low `bits` of `value` to 64 bits.
#[inline]
pub const fn sign_extend(value: i64, bits: u8) -> i64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        value
    } else {
        let shift = 64 - bits as u32;
        (value << shift) >> shift
    }
}

/// The kind of value a node produces, used as the target of casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Two's-complement integer of the given width.
    Int(u8),
    /// IEEE-754 float of the given width (32 or 64).
    Float(u8),
    /// Object reference.
    Object,
}

impl ValueKind {
    /// Check whether the width is one the IR can represent: integers of
    /// 1 to 64 bits, floats of 32 or 64 bits.
    pub const fn is_well_formed(self) -> bool {
        match self {
            ValueKind::Int(bits) => bits >= 1 && bits <= 64,
            ValueKind::Float(bits) => bits == 32 || bits == 64,
            ValueKind::Object => true,
        }
    }

    /// Bit width of the representation, if it has one.
    pub const fn bits(self) -> Option<u8> {
        match self {
            ValueKind::Int(bits) | ValueKind::Float(bits) => Some(bits),
            ValueKind::Object => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int(bits) => write!(f, "i{bits}"),
            ValueKind::Float(bits) => write!(f, "f{bits}"),
            ValueKind::Object => write!(f, "obj"),
        }
    }
}

// =============================================================================
// Integer Stamp
// =============================================================================

/// Abstract integer value: `lower <= v <= upper` and the known-bits masks.
///
/// Bounds are stored sign-extended to 64 bits. A bit set in `must_be_set` is
/// one in every admitted value; a bit clear in `may_be_set` is zero in every
/// admitted value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerStamp {
    bits: u8,
    lower: i64,
    upper: i64,
    must_be_set: u64,
    may_be_set: u64,
}

impl IntegerStamp {
    /// Stamp admitting every `bits`-wide value.
    pub const fn unrestricted(bits: u8) -> Self {
        IntegerStamp {
            bits,
            lower: min_value(bits),
            upper: max_value(bits),
            must_be_set: 0,
            may_be_set: mask(bits),
        }
    }

    /// Stamp admitting no value. This is the identity element of `meet`.
    pub const fn empty(bits: u8) -> Self {
        IntegerStamp {
            bits,
            lower: max_value(bits),
            upper: min_value(bits),
            must_be_set: mask(bits),
            may_be_set: 0,
        }
    }

    /// Stamp admitting exactly `value` (truncated to `bits`).
    pub const fn constant(bits: u8, value: i64) -> Self {
        let v = sign_extend(value, bits);
        let m = v as u64 & mask(bits);
        IntegerStamp {
            bits,
            lower: v,
            upper: v,
            must_be_set: m,
            may_be_set: m,
        }
    }

    /// Stamp for `[lower, upper]`, with known bits derived from the range.
    pub fn range(bits: u8, lower: i64, upper: i64) -> Self {
        let lower = lower.max(min_value(bits));
        let upper = upper.min(max_value(bits));
        if lower > upper {
            return Self::empty(bits);
        }
        let (must, may) = Self::masks_for_range(bits, lower, upper);
        Self::create(bits, lower, upper, must, may)
    }

    /// Build a stamp from raw components, normalizing empty stamps.
    pub fn create(bits: u8, lower: i64, upper: i64, must_be_set: u64, may_be_set: u64) -> Self {
        let m = mask(bits);
        let lower = lower.max(min_value(bits));
        let upper = upper.min(max_value(bits));
        let must_be_set = must_be_set & m;
        let may_be_set = may_be_set & m;
        if lower > upper || must_be_set & !may_be_set != 0 {
            return Self::empty(bits);
        }
        IntegerStamp {
            bits,
            lower,
            upper,
            must_be_set,
            may_be_set,
        }
    }

    /// Known bits shared by every value in a same-signed range.
    fn masks_for_range(bits: u8, lower: i64, upper: i64) -> (u64, u64) {
        let m = mask(bits);
        if (lower < 0) != (upper < 0) {
            return (0, m);
        }
        let lo = lower as u64 & m;
        let hi = upper as u64 & m;
        let diff = lo ^ hi;
        let varying = if diff == 0 {
            0
        } else {
            let top = 64 - diff.leading_zeros();
            if top >= 64 {
                u64::MAX
            } else {
                (1u64 << top) - 1
            }
        };
        let fixed = m & !varying;
        let must = lo & fixed;
        (must, must | (varying & m))
    }

    /// Smallest signed value consistent with the masks.
    fn min_from_masks(bits: u8, must: u64, may: u64) -> i64 {
        let sign = 1u64 << (bits - 1);
        let raw = if may & sign != 0 { must | sign } else { must };
        sign_extend(raw as i64, bits)
    }

    /// Largest signed value consistent with the masks.
    fn max_from_masks(bits: u8, must: u64, may: u64) -> i64 {
        let sign = 1u64 << (bits - 1);
        let raw = if must & sign != 0 { may } else { may & !sign };
        sign_extend(raw as i64, bits)
    }

    /// Stamp described purely by known bits.
    pub fn from_masks(bits: u8, must: u64, may: u64) -> Self {
        let m = mask(bits);
        let (must, may) = (must & m, may & m);
        if must & !may != 0 {
            return Self::empty(bits);
        }
        Self::create(
            bits,
            Self::min_from_masks(bits, must, may),
            Self::max_from_masks(bits, must, may),
            must,
            may,
        )
    }

    #[inline]
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    #[inline]
    pub const fn lower(&self) -> i64 {
        self.lower
    }

    #[inline]
    pub const fn upper(&self) -> i64 {
        self.upper
    }

    #[inline]
    pub const fn must_be_set(&self) -> u64 {
        self.must_be_set
    }

    #[inline]
    pub const fn may_be_set(&self) -> u64 {
        self.may_be_set
    }

    /// Check whether no value is admitted.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    /// Check whether every `bits`-wide value is admitted.
    pub fn is_unrestricted(&self) -> bool {
        *self == Self::unrestricted(self.bits)
    }

    /// The single admitted value, if the stamp is a constant.
    pub fn as_constant(&self) -> Option<i64> {
        (self.lower == self.upper).then_some(self.lower)
    }

    /// Check whether `value` (interpreted at this width) is admitted.
    pub fn contains(&self, value: i64) -> bool {
        if value < min_value(self.bits) || value > max_value(self.bits) {
            return false;
        }
        let raw = value as u64 & mask(self.bits);
        self.lower <= value
            && value <= self.upper
            && raw & self.must_be_set == self.must_be_set
            && raw & !self.may_be_set == 0
    }

    /// Union. Componentwise so it is commutative, associative and idempotent.
    pub fn meet(&self, other: &IntegerStamp) -> IntegerStamp {
        debug_assert_eq!(self.bits, other.bits);
        IntegerStamp {
            bits: self.bits,
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
            must_be_set: self.must_be_set & other.must_be_set,
            may_be_set: self.may_be_set | other.may_be_set,
        }
    }

    /// Intersection (conservative: may admit values outside the exact intersection).
    pub fn join(&self, other: &IntegerStamp) -> IntegerStamp {
        debug_assert_eq!(self.bits, other.bits);
        Self::create(
            self.bits,
            self.lower.max(other.lower),
            self.upper.min(other.upper),
            self.must_be_set | other.must_be_set,
            self.may_be_set & other.may_be_set,
        )
    }

    /// Stamp for `self + other` without wrap-around knowledge.
    pub fn add(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::empty(self.bits);
        }
        self.checked_range(
            self.lower as i128 + other.lower as i128,
            self.upper as i128 + other.upper as i128,
        )
    }

    /// Stamp for `self - other`.
    pub fn sub(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::empty(self.bits);
        }
        self.checked_range(
            self.lower as i128 - other.upper as i128,
            self.upper as i128 - other.lower as i128,
        )
    }

    /// Stamp for `self * other`.
    pub fn mul(&self, other: &IntegerStamp) -> IntegerStamp {
        if self.is_empty() || other.is_empty() {
            return Self::empty(self.bits);
        }
        let corners = [
            self.lower as i128 * other.lower as i128,
            self.lower as i128 * other.upper as i128,
            self.upper as i128 * other.lower as i128,
            self.upper as i128 * other.upper as i128,
        ];
        let lo = corners.iter().copied().min().unwrap_or(0);
        let hi = corners.iter().copied().max().unwrap_or(0);
        self.checked_range(lo, hi)
    }

    /// Stamp for `self & other`.
    pub fn and(&self, other: &IntegerStamp) -> IntegerStamp {
        Self::from_masks(
            self.bits,
            self.must_be_set & other.must_be_set,
            self.may_be_set & other.may_be_set,
        )
    }

    /// Stamp for `self | other`.
    pub fn or(&self, other: &IntegerStamp) -> IntegerStamp {
        Self::from_masks(
            self.bits,
            self.must_be_set | other.must_be_set,
            self.may_be_set | other.may_be_set,
        )
    }

    /// Stamp for `self ^ other`.
    pub fn xor(&self, other: &IntegerStamp) -> IntegerStamp {
        let m = mask(self.bits);
        let zero_a = !self.may_be_set & m;
        let zero_b = !other.may_be_set & m;
        let ones = (self.must_be_set & zero_b) | (zero_a & other.must_be_set);
        let zeros = (zero_a & zero_b) | (self.must_be_set & other.must_be_set);
        Self::from_masks(self.bits, ones, m & !zeros)
    }

    /// Truncate to `to` bits.
    pub fn narrow(&self, to: u8) -> IntegerStamp {
        if self.is_empty() {
            return Self::empty(to);
        }
        let m = mask(to);
        if self.lower >= min_value(to) && self.upper <= max_value(to) {
            Self::create(to, self.lower, self.upper, self.must_be_set & m, self.may_be_set & m)
        } else {
            Self::from_masks(to, self.must_be_set & m, self.may_be_set & m)
        }
    }

    /// Sign-extend to `to` bits.
    pub fn sign_extend(&self, to: u8) -> IntegerStamp {
        if self.is_empty() {
            return Self::empty(to);
        }
        let sign = 1u64 << (self.bits - 1);
        let ext = mask(to) & !mask(self.bits);
        let (must, may) = if self.must_be_set & sign != 0 {
            (self.must_be_set | ext, self.may_be_set | ext)
        } else if self.may_be_set & sign == 0 {
            (self.must_be_set, self.may_be_set)
        } else {
            (self.must_be_set, self.may_be_set | ext)
        };
        Self::create(to, self.lower, self.upper, must, may)
    }

    /// Zero-extend to `to` bits.
    pub fn zero_extend(&self, to: u8) -> IntegerStamp {
        if self.is_empty() {
            return Self::empty(to);
        }
        let span = mask(self.bits) as i128 + 1;
        let (lo, hi) = if self.lower >= 0 {
            (self.lower as i128, self.upper as i128)
        } else if self.upper < 0 {
            (self.lower as i128 + span, self.upper as i128 + span)
        } else {
            (0, span - 1)
        };
        let lo = i64::try_from(lo).unwrap_or(i64::MAX);
        let hi = i64::try_from(hi).unwrap_or(i64::MAX);
        Self::create(to, lo, hi, self.must_be_set, self.may_be_set)
    }

    fn checked_range(&self, lo: i128, hi: i128) -> IntegerStamp {
        if lo >= min_value(self.bits) as i128 && hi <= max_value(self.bits) as i128 {
            Self::range(self.bits, lo as i64, hi as i64)
        } else {
            Self::unrestricted(self.bits)
        }
    }
}

impl fmt::Debug for IntegerStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "i{} <empty>", self.bits);
        }
        write!(f, "i{} [{}, {}]", self.bits, self.lower, self.upper)?;
        if *self != Self::range(self.bits, self.lower, self.upper) {
            write!(f, " #{:x}/{:x}", self.must_be_set, self.may_be_set)?;
        }
        Ok(())
    }
}

// =============================================================================
// Float Stamp
// =============================================================================

/// Abstract float value: `lower <= v <= upper`, or NaN if `may_be_nan`.
///
/// Bounds never hold NaN and never hold `-0.0` (normalized to `0.0`), since
/// comparisons already treat the two zeros as equal. An empty range is stored
/// as `[+inf, -inf]`.
#[derive(Clone, Copy, PartialEq)]
pub struct FloatStamp {
    bits: u8,
    lower: f64,
    upper: f64,
    may_be_nan: bool,
}

impl Eq for FloatStamp {}

impl Hash for FloatStamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
        self.lower.to_bits().hash(state);
        self.upper.to_bits().hash(state);
        self.may_be_nan.hash(state);
    }
}

impl FloatStamp {
    /// Stamp admitting every value, NaN included.
    pub const fn unrestricted(bits: u8) -> Self {
        FloatStamp {
            bits,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            may_be_nan: true,
        }
    }

    /// Stamp admitting no value.
    pub const fn empty(bits: u8) -> Self {
        FloatStamp {
            bits,
            lower: f64::INFINITY,
            upper: f64::NEG_INFINITY,
            may_be_nan: false,
        }
    }

    /// Stamp admitting exactly `value`.
    pub fn constant(bits: u8, value: f64) -> Self {
        if value.is_nan() {
            FloatStamp {
                may_be_nan: true,
                ..Self::empty(bits)
            }
        } else {
            Self::create(bits, value, value, false)
        }
    }

    /// Build a stamp, normalizing zero signs and empty ranges.
    pub fn create(bits: u8, lower: f64, upper: f64, may_be_nan: bool) -> Self {
        let normalize = |v: f64| if v == 0.0 { 0.0 } else { v };
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return FloatStamp {
                may_be_nan,
                ..Self::empty(bits)
            };
        }
        FloatStamp {
            bits,
            lower: normalize(lower),
            upper: normalize(upper),
            may_be_nan,
        }
    }

    #[inline]
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    #[inline]
    pub const fn lower(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub const fn upper(&self) -> f64 {
        self.upper
    }

    #[inline]
    pub const fn may_be_nan(&self) -> bool {
        self.may_be_nan
    }

    /// Check whether the non-NaN range is empty.
    #[inline]
    pub fn range_is_empty(&self) -> bool {
        self.lower > self.upper
    }

    /// Check whether no value at all is admitted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range_is_empty() && !self.may_be_nan
    }

    /// Check whether `value` is admitted.
    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            self.may_be_nan
        } else {
            self.lower <= value && value <= self.upper
        }
    }

    /// Union.
    pub fn meet(&self, other: &FloatStamp) -> FloatStamp {
        debug_assert_eq!(self.bits, other.bits);
        FloatStamp {
            bits: self.bits,
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
            may_be_nan: self.may_be_nan || other.may_be_nan,
        }
    }

    /// Intersection.
    pub fn join(&self, other: &FloatStamp) -> FloatStamp {
        debug_assert_eq!(self.bits, other.bits);
        Self::create(
            self.bits,
            self.lower.max(other.lower),
            self.upper.min(other.upper),
            self.may_be_nan && other.may_be_nan,
        )
    }
}

impl fmt::Debug for FloatStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.bits)?;
        if self.range_is_empty() {
            write!(f, " <no range>")?;
        } else {
            write!(f, " [{}, {}]", self.lower, self.upper)?;
        }
        if self.may_be_nan {
            write!(f, " nan?")?;
        }
        Ok(())
    }
}

// =============================================================================
// Object Stamp
// =============================================================================

/// Opaque identity of a class/type known to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Abstract object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    /// The reference is never null.
    pub non_null: bool,
    /// The reference is always null.
    pub always_null: bool,
    /// Upper type bound, if known.
    pub type_bound: Option<TypeId>,
    /// The bound is the exact type.
    pub exact: bool,
}

impl ObjectStamp {
    /// Any reference, null included.
    pub const fn unrestricted() -> Self {
        ObjectStamp {
            non_null: false,
            always_null: false,
            type_bound: None,
            exact: false,
        }
    }

    /// The null constant.
    pub const fn null() -> Self {
        ObjectStamp {
            non_null: false,
            always_null: true,
            type_bound: None,
            exact: false,
        }
    }

    /// Union.
    pub fn meet(&self, other: &ObjectStamp) -> ObjectStamp {
        let (type_bound, exact) = if self.always_null {
            (other.type_bound, other.exact)
        } else if other.always_null {
            (self.type_bound, self.exact)
        } else if self.type_bound == other.type_bound {
            (self.type_bound, self.exact && other.exact)
        } else {
            (None, false)
        };
        ObjectStamp {
            non_null: self.non_null && other.non_null,
            always_null: self.always_null && other.always_null,
            type_bound,
            exact,
        }
    }

    /// Intersection. `None` when the facts contradict each other.
    ///
    /// Without a class hierarchy two unrelated bounds cannot be intersected;
    /// either one is a sound over-approximation, so the smaller id is kept.
    pub fn join(&self, other: &ObjectStamp) -> Option<ObjectStamp> {
        let non_null = self.non_null || other.non_null;
        let always_null = self.always_null || other.always_null;
        if non_null && always_null {
            return None;
        }
        let (type_bound, exact) = match (self.type_bound, other.type_bound) {
            (Some(a), Some(b)) if a == b => (Some(a), self.exact || other.exact),
            (Some(_), Some(_)) if self.exact && other.exact && !always_null => return None,
            (Some(a), Some(b)) => {
                if a < b {
                    (Some(a), self.exact)
                } else {
                    (Some(b), other.exact)
                }
            }
            (Some(a), None) => (Some(a), self.exact),
            (None, Some(b)) => (Some(b), other.exact),
            (None, None) => (None, false),
        };
        Some(ObjectStamp {
            non_null,
            always_null,
            type_bound,
            exact,
        })
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// Abstract value domain of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// The node produces no value (control, guard, memory nodes).
    Void,
    /// Integer value.
    Int(IntegerStamp),
    /// Floating-point value.
    Float(FloatStamp),
    /// Object reference.
    Object(ObjectStamp),
    /// Any value of any kind (top).
    Any,
    /// No value at all (bottom); the producing code is unreachable.
    Empty,
}

impl Stamp {
    /// Unrestricted stamp for a value kind.
    pub const fn unrestricted(kind: ValueKind) -> Stamp {
        match kind {
            ValueKind::Int(bits) => Stamp::Int(IntegerStamp::unrestricted(bits)),
            ValueKind::Float(bits) => Stamp::Float(FloatStamp::unrestricted(bits)),
            ValueKind::Object => Stamp::Object(ObjectStamp::unrestricted()),
        }
    }

    /// Integer range stamp.
    pub fn int_range(bits: u8, lower: i64, upper: i64) -> Stamp {
        Stamp::Int(IntegerStamp::range(bits, lower, upper))
    }

    /// Float range stamp.
    pub fn float_range(bits: u8, lower: f64, upper: f64, may_be_nan: bool) -> Stamp {
        Stamp::Float(FloatStamp::create(bits, lower, upper, may_be_nan))
    }

    /// Exact stamp for a constant.
    pub fn for_constant(constant: &Constant) -> Stamp {
        match *constant {
            Constant::Int { bits, value } => Stamp::Int(IntegerStamp::constant(bits, value)),
            Constant::Float { bits, .. } => {
                Stamp::Float(FloatStamp::constant(bits, constant.as_f64().unwrap_or(f64::NAN)))
            }
            Constant::Null => Stamp::Object(ObjectStamp::null()),
        }
    }

    /// The value kind, if this stamp describes values of one kind.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Stamp::Int(s) => Some(ValueKind::Int(s.bits())),
            Stamp::Float(s) => Some(ValueKind::Float(s.bits())),
            Stamp::Object(_) => Some(ValueKind::Object),
            Stamp::Void | Stamp::Any | Stamp::Empty => None,
        }
    }

    /// Check whether this stamp describes a value at all.
    #[inline]
    pub fn is_value(&self) -> bool {
        !matches!(self, Stamp::Void)
    }

    /// Check whether no value is admitted.
    pub fn is_empty(&self) -> bool {
        match self {
            Stamp::Empty => true,
            Stamp::Int(s) => s.is_empty(),
            Stamp::Float(s) => s.is_empty(),
            Stamp::Object(_) | Stamp::Void | Stamp::Any => false,
        }
    }

    /// Integer component, if any.
    pub fn as_int(&self) -> Option<&IntegerStamp> {
        match self {
            Stamp::Int(s) => Some(s),
            _ => None,
        }
    }

    /// Float component, if any.
    pub fn as_float(&self) -> Option<&FloatStamp> {
        match self {
            Stamp::Float(s) => Some(s),
            _ => None,
        }
    }

    /// The constant this stamp pins down, if any.
    pub fn as_constant(&self) -> Option<Constant> {
        match self {
            Stamp::Int(s) => s.as_constant().map(|value| Constant::Int {
                bits: s.bits(),
                value,
            }),
            Stamp::Object(s) if s.always_null => Some(Constant::Null),
            _ => None,
        }
    }

    /// Check whether `constant` is admitted.
    pub fn contains(&self, constant: &Constant) -> bool {
        match (self, constant) {
            (Stamp::Any, _) => true,
            (Stamp::Int(s), Constant::Int { bits, value }) => s.bits() == *bits && s.contains(*value),
            (Stamp::Float(s), Constant::Float { bits, .. }) => {
                s.bits() == *bits && constant.as_f64().is_some_and(|v| s.contains(v))
            }
            (Stamp::Object(s), Constant::Null) => !s.non_null,
            _ => false,
        }
    }

    /// Least upper bound (union). Used at control-flow merges.
    pub fn meet(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Empty, x) | (x, Stamp::Empty) => *x,
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            (Stamp::Int(a), Stamp::Int(b)) if a.bits() == b.bits() => Stamp::Int(a.meet(b)),
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => Stamp::Float(a.meet(b)),
            (Stamp::Object(a), Stamp::Object(b)) => Stamp::Object(a.meet(b)),
            _ => Stamp::Any,
        }
    }

    /// Greatest lower bound (intersection). Only ever shrinks the value set.
    pub fn join(&self, other: &Stamp) -> Stamp {
        match (self, other) {
            (Stamp::Any, x) | (x, Stamp::Any) => *x,
            (Stamp::Void, Stamp::Void) => Stamp::Void,
            (Stamp::Int(a), Stamp::Int(b)) if a.bits() == b.bits() => Stamp::Int(a.join(b)),
            (Stamp::Float(a), Stamp::Float(b)) if a.bits() == b.bits() => Stamp::Float(a.join(b)),
            (Stamp::Object(a), Stamp::Object(b)) => a.join(b).map_or(Stamp::Empty, Stamp::Object),
            _ => Stamp::Empty,
        }
    }

    /// Stamp of the value obtained by reading this value's bits as `to`.
    ///
    /// The result admits the bit-level image of every admitted input value.
    pub fn reinterpret(&self, to: ValueKind) -> Stamp {
        if self.kind() == Some(to) {
            return *self;
        }
        match (self, to) {
            (Stamp::Empty, _) => Stamp::Empty,
            (Stamp::Int(s), ValueKind::Float(bits)) if s.bits() == bits && is_float_width(bits) => {
                Stamp::Float(float_from_int_bits(s))
            }
            (Stamp::Float(s), ValueKind::Int(bits)) if s.bits() == bits && is_float_width(bits) => {
                Stamp::Int(int_from_float_bits(s))
            }
            _ => Stamp::unrestricted(to),
        }
    }
}

impl Default for Stamp {
    fn default() -> Self {
        Stamp::Void
    }
}

impl fmt::Debug for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stamp::Void => write!(f, "void"),
            Stamp::Int(s) => write!(f, "{s:?}"),
            Stamp::Float(s) => write!(f, "{s:?}"),
            Stamp::Object(s) => {
                write!(f, "obj")?;
                if s.always_null {
                    write!(f, " null")?;
                } else if s.non_null {
                    write!(f, " !null")?;
                }
                if let Some(ty) = s.type_bound {
                    write!(f, " {}{}", if s.exact { "=" } else { "<:" }, ty.0)?;
                }
                Ok(())
            }
            Stamp::Any => write!(f, "⊤"),
            Stamp::Empty => write!(f, "⊥"),
        }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Bit-level reinterpretation
// =============================================================================

#[inline]
const fn is_float_width(bits: u8) -> bool {
    bits == 32 || bits == 64
}

/// Bit pattern of positive infinity at the given width.
#[inline]
const fn infinity_bits(bits: u8) -> i64 {
    if bits == 32 {
        0x7F80_0000
    } else {
        0x7FF0_0000_0000_0000
    }
}

/// Float denoted by a non-negative bit pattern.
#[inline]
pub fn float_from_bits(bits: u8, pattern: i64) -> f64 {
    if bits == 32 {
        f32::from_bits(pattern as u32) as f64
    } else {
        f64::from_bits(pattern as u64)
    }
}

/// Sign-extended bit pattern of a float at the given width.
#[inline]
pub fn bits_from_float(bits: u8, value: f64) -> i64 {
    if bits == 32 {
        (value as f32).to_bits() as i32 as i64
    } else {
        value.to_bits() as i64
    }
}

/// Image of an integer stamp under "read these bits as a float".
///
/// Non-negative patterns map monotonically onto `+0.0 ..= +inf` and then NaN.
/// Negative patterns carry the sign bit: their low bits give the magnitude, so
/// `MIN ..` maps onto `-0.0 ..= -inf` and then NaN again.
fn float_from_int_bits(s: &IntegerStamp) -> FloatStamp {
    let bits = s.bits();
    if s.is_empty() {
        return FloatStamp::empty(bits);
    }
    let inf = infinity_bits(bits);
    let min = min_value(bits);
    let mut out = FloatStamp::empty(bits);
    let mut nan = false;

    if s.upper() >= 0 {
        let a = s.lower().max(0);
        let b = s.upper();
        if a <= inf {
            let part = FloatStamp::create(bits, float_from_bits(bits, a), float_from_bits(bits, b.min(inf)), false);
            out = out.meet(&part);
        }
        nan |= b > inf;
    }

    if s.lower() < 0 {
        let a = s.lower();
        let b = s.upper().min(-1);
        let (ma, mb) = (a - min, b - min);
        if ma <= inf {
            let part = FloatStamp::create(
                bits,
                -float_from_bits(bits, mb.min(inf)),
                -float_from_bits(bits, ma),
                false,
            );
            out = out.meet(&part);
        }
        nan |= mb > inf;
    }

    FloatStamp::create(bits, out.lower(), out.upper(), nan)
}

/// Image of a float stamp under "read these bits as an integer".
fn int_from_float_bits(s: &FloatStamp) -> IntegerStamp {
    let bits = s.bits();
    let inf = infinity_bits(bits);
    let min = min_value(bits);
    let mut out = IntegerStamp::empty(bits);

    if !s.range_is_empty() {
        if s.upper() >= 0.0 {
            let lo = bits_from_float(bits, s.lower().max(0.0));
            let hi = bits_from_float(bits, s.upper());
            out = out.meet(&IntegerStamp::range(bits, lo, hi));
        }
        if s.lower() <= 0.0 {
            // The range admits -0.0 whenever it admits 0.0.
            let nearest = if s.upper() < 0.0 { s.upper().abs() } else { 0.0 };
            let farthest = s.lower().abs();
            let lo = min + bits_from_float(bits, nearest);
            let hi = min + bits_from_float(bits, farthest);
            out = out.meet(&IntegerStamp::range(bits, lo, hi));
        }
    }

    if s.may_be_nan() {
        out = out.meet(&IntegerStamp::range(bits, inf + 1, max_value(bits)));
        out = out.meet(&IntegerStamp::range(bits, min + inf + 1, -1));
    }

    out
}

// =============================================================================
// Tests
// =============================================================================
