//! Executable code of a method in three-address form.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::{FieldRef, MethodRef, ProgramCounter};

/// Denotes a local variable slot within a method frame.
///
/// Parameters occupy the first slots, starting at `lv0`.
#[derive(
    Debug,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Clone,
    Copy,
    derive_more::Display,
    derive_more::From,
)]
#[display("lv{_0}")]
#[repr(transparent)]
pub struct LocalId(u16);

/// An operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Operand {
    /// A local variable slot.
    Local(LocalId),
    /// An integer literal.
    #[display("{_0}")]
    Constant(i32),
}

impl From<LocalId> for Operand {
    fn from(local: LocalId) -> Self {
        Operand::Local(local)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Constant(value)
    }
}

/// A unary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Arithmetic negation.
    Neg,
}

/// A binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
}

/// A comparison operator used in conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl ComparisonOperator {
    /// Evaluates the comparison on two concrete integers.
    #[must_use]
    pub const fn evaluate(self, lhs: i32, rhs: i32) -> bool {
        match self {
            ComparisonOperator::Eq => lhs == rhs,
            ComparisonOperator::Ne => lhs != rhs,
            ComparisonOperator::Lt => lhs < rhs,
            ComparisonOperator::Le => lhs <= rhs,
            ComparisonOperator::Gt => lhs > rhs,
            ComparisonOperator::Ge => lhs >= rhs,
        }
    }
}

/// An instruction in three-address form.
///
/// Control falls through to the next instruction in program counter order
/// unless the instruction transfers control explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Copies an operand (a local or an integer literal) into a local.
    Move {
        /// The destination local.
        dest: LocalId,
        /// The copied operand.
        src: Operand,
    },
    /// Applies a unary operator.
    Unary {
        /// The destination local.
        dest: LocalId,
        /// The operator.
        op: UnaryOperator,
        /// The operand.
        operand: Operand,
    },
    /// Applies a binary operator.
    Binary {
        /// The destination local.
        dest: LocalId,
        /// The operator.
        op: BinaryOperator,
        /// The left-hand operand.
        lhs: Operand,
        /// The right-hand operand.
        rhs: Operand,
    },
    /// Reads a static field into a local.
    GetStatic {
        /// The destination local.
        dest: LocalId,
        /// The field being read.
        field: FieldRef,
    },
    /// Writes an operand to a static field.
    PutStatic {
        /// The field being written.
        field: FieldRef,
        /// The written operand.
        value: Operand,
    },
    /// Allocates an integer array.
    ///
    /// The allocation site identifying the array is the pair of the
    /// enclosing method and the program counter of this instruction.
    NewArray {
        /// The local receiving the array reference.
        dest: LocalId,
        /// The array length.
        length: Operand,
    },
    /// Reads an array element into a local.
    ArrayLoad {
        /// The destination local.
        dest: LocalId,
        /// The local holding the array reference.
        array: LocalId,
        /// The element index.
        index: Operand,
    },
    /// Writes an operand to an array element.
    ArrayStore {
        /// The local holding the array reference.
        array: LocalId,
        /// The element index.
        index: Operand,
        /// The written operand.
        value: Operand,
    },
    /// Invokes a method.
    Call {
        /// The local receiving the return value, if used.
        dest: Option<LocalId>,
        /// The invoked method.
        callee: MethodRef,
        /// The arguments, in parameter order.
        args: Vec<Operand>,
    },
    /// Transfers control to `target` when the comparison holds; falls
    /// through otherwise.
    Branch {
        /// The comparison operator.
        op: ComparisonOperator,
        /// The left-hand operand.
        lhs: Operand,
        /// The right-hand operand.
        rhs: Operand,
        /// The branch target.
        target: ProgramCounter,
    },
    /// Transfers control to `target` unconditionally.
    Goto {
        /// The jump target.
        target: ProgramCounter,
    },
    /// Returns from the method, optionally with a value.
    Return {
        /// The returned operand, if any.
        value: Option<Operand>,
    },
    /// A construct the analysis cannot model (e.g., reflective access or
    /// a reference-typed computation).
    ///
    /// The destination local, if any, is treated as non-constant.
    Unsupported {
        /// The clobbered destination local, if any.
        dest: Option<LocalId>,
    },
}

/// The body of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// The number of local variable slots in the method frame.
    pub max_locals: u16,
    /// The number of parameters; they occupy the first local slots.
    pub parameter_count: u16,
    /// The executable instructions, keyed by program counter.
    pub instructions: BTreeMap<ProgramCounter, Instruction>,
}

impl MethodBody {
    /// Returns the instruction at the given program counter.
    #[must_use]
    pub fn instruction_at(&self, pc: ProgramCounter) -> Option<&Instruction> {
        self.instructions.get(&pc)
    }

    /// Returns the program counter of the first instruction.
    #[must_use]
    pub fn entry_point(&self) -> Option<ProgramCounter> {
        self.instructions.keys().next().copied()
    }

    /// Returns the program counter following `pc` in instruction order.
    #[must_use]
    pub fn next_pc_of(&self, pc: ProgramCounter) -> Option<ProgramCounter> {
        self.instructions
            .range((Bound::Excluded(pc), Bound::Unbounded))
            .next()
            .map(|(next, _)| *next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with_pcs(pcs: &[u16]) -> MethodBody {
        MethodBody {
            max_locals: 1,
            parameter_count: 0,
            instructions: pcs
                .iter()
                .map(|&pc| (ProgramCounter::from(pc), Instruction::Return { value: None }))
                .collect(),
        }
    }

    #[test]
    fn entry_point_is_first_instruction() {
        assert_eq!(
            body_with_pcs(&[3, 7]).entry_point(),
            Some(ProgramCounter::from(3))
        );
        assert_eq!(body_with_pcs(&[]).entry_point(), None);
    }

    #[test]
    fn next_pc_skips_gaps() {
        let body = body_with_pcs(&[0, 4, 9]);
        assert_eq!(
            body.next_pc_of(ProgramCounter::from(0)),
            Some(ProgramCounter::from(4))
        );
        assert_eq!(
            body.next_pc_of(ProgramCounter::from(4)),
            Some(ProgramCounter::from(9))
        );
        assert_eq!(body.next_pc_of(ProgramCounter::from(9)), None);
    }

    #[test]
    fn comparison_evaluation() {
        assert!(ComparisonOperator::Le.evaluate(0, 0));
        assert!(!ComparisonOperator::Gt.evaluate(0, 0));
        assert!(ComparisonOperator::Ne.evaluate(-1, 1));
    }
}
