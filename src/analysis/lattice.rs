//! The three-level value lattice of the constant propagation analysis.

use std::cmp::Ordering;

use crate::program::{BinaryOperator, ComparisonOperator, UnaryOperator};

use super::fixed_point::JoinSemiLattice;

/// The abstract value of an integer variable, field, or array element.
///
/// The lattice has height two: [`Unknown`](AbstractValue::Unknown) is the
/// bottom ("not yet computed"), every `Constant(i)` sits in a middle layer
/// of pairwise incomparable elements, and
/// [`NonConstant`](AbstractValue::NonConstant) is the top ("definitely
/// variable"). Once a binding reaches `NonConstant` it never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, derive_more::Display)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum AbstractValue {
    /// No value has been observed yet.
    #[default]
    #[display("<unknown>")]
    Unknown,
    /// The binding holds this exact integer on every path.
    #[display("const {_0}")]
    Constant(i32),
    /// The binding holds differing values or one outside the analyzable
    /// universe.
    #[display("variable")]
    NonConstant,
}

impl AbstractValue {
    /// Returns the constant carried by the value, if any.
    #[must_use]
    pub const fn as_constant(&self) -> Option<i32> {
        match self {
            AbstractValue::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Applies a binary operator.
    ///
    /// Two known constants produce the concrete (wrapping) result; a
    /// `NonConstant` operand taints the result immediately, while an
    /// `Unknown` operand keeps the result at bottom so it can still rise
    /// once the operand is computed. Division and remainder by a constant
    /// zero are `NonConstant` since the concrete execution throws.
    #[must_use]
    pub fn apply(op: BinaryOperator, lhs: Self, rhs: Self) -> Self {
        use AbstractValue::{Constant, NonConstant, Unknown};
        match (lhs, rhs) {
            (NonConstant, _) | (_, NonConstant) => NonConstant,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Constant(lhs), Constant(rhs)) => match op {
                BinaryOperator::Add => Constant(lhs.wrapping_add(rhs)),
                BinaryOperator::Sub => Constant(lhs.wrapping_sub(rhs)),
                BinaryOperator::Mul => Constant(lhs.wrapping_mul(rhs)),
                BinaryOperator::Div if rhs == 0 => NonConstant,
                BinaryOperator::Div => Constant(lhs.wrapping_div(rhs)),
                BinaryOperator::Rem if rhs == 0 => NonConstant,
                BinaryOperator::Rem => Constant(lhs.wrapping_rem(rhs)),
            },
        }
    }

    /// Applies a unary operator, with the same operand policy as
    /// [`Self::apply`].
    #[must_use]
    pub fn apply_unary(op: UnaryOperator, operand: Self) -> Self {
        match (op, operand) {
            (UnaryOperator::Neg, AbstractValue::Constant(value)) => {
                AbstractValue::Constant(value.wrapping_neg())
            }
            (UnaryOperator::Neg, other) => other,
        }
    }

    /// Evaluates a comparison between two abstract values.
    ///
    /// Returns the concrete outcome when both operands are known constants
    /// and `None` otherwise.
    #[must_use]
    pub fn compare(op: ComparisonOperator, lhs: Self, rhs: Self) -> Option<bool> {
        Some(op.evaluate(lhs.as_constant()?, rhs.as_constant()?))
    }
}

impl PartialOrd for AbstractValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use AbstractValue::{Constant, NonConstant, Unknown};
        match (self, other) {
            (Unknown, Unknown) | (NonConstant, NonConstant) => Some(Ordering::Equal),
            (Constant(lhs), Constant(rhs)) if lhs == rhs => Some(Ordering::Equal),
            (Constant(_), Constant(_)) => None,
            (Unknown, _) | (_, NonConstant) => Some(Ordering::Less),
            (_, Unknown) | (NonConstant, _) => Some(Ordering::Greater),
        }
    }
}

impl JoinSemiLattice for AbstractValue {
    fn join(self, other: Self) -> Self {
        use AbstractValue::{Constant, NonConstant, Unknown};
        match (self, other) {
            (Unknown, it) | (it, Unknown) => it,
            (Constant(lhs), Constant(rhs)) if lhs == rhs => Constant(lhs),
            _ => NonConstant,
        }
    }
}
