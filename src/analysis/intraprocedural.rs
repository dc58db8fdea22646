//! The worklist-based solver for one method body.

use std::collections::BTreeMap;

use crate::program::{FieldRef, LocalId, MethodBody, MethodRef, ProgramCounter};

use super::AnalysisError;
use super::fixed_point::{DataflowProblem, JoinSemiLattice};
use super::lattice::AbstractValue;
use super::state::{AllocSite, ArrayObject, StateFact, StaticCell, join_maps};
use super::transfer::{self, CallOracle, Outcome};

/// The facts of one method at its return points, joined over every return
/// path.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct MethodExit {
    /// The abstract return value (`Unknown` when no return was reached or
    /// the method is `void`).
    pub return_value: AbstractValue,
    /// The static field effects visible to callers.
    pub statics: BTreeMap<FieldRef, StaticCell>,
    /// The array states at exit, keyed by allocation site.
    pub arrays: BTreeMap<AllocSite, ArrayObject>,
}

impl MethodExit {
    /// Joins the state at one return point into the exit facts.
    pub(crate) fn absorb(&mut self, value: AbstractValue, fact: StateFact) {
        self.return_value = self.return_value.join(value);
        self.statics = join_maps(std::mem::take(&mut self.statics), fact.statics);
        self.arrays = join_maps(std::mem::take(&mut self.arrays), fact.arrays);
    }

    /// Joins another exit summary into this one (used when collapsing the
    /// per-context summaries of a method).
    pub(crate) fn merge(&mut self, other: Self) {
        self.return_value = self.return_value.join(other.return_value);
        self.statics = join_maps(std::mem::take(&mut self.statics), other.statics);
        self.arrays = join_maps(std::mem::take(&mut self.arrays), other.arrays);
    }
}

/// A forward, flow-sensitive dataflow problem over one method body.
///
/// Locations are program counters and the fact entering each location is a
/// [`StateFact`]. Interprocedural knowledge is consulted through the
/// oracle, which also records the dependencies that drive re-analysis.
pub(crate) struct MethodAnalysis<'a, O> {
    method: MethodRef,
    body: &'a MethodBody,
    entry_values: &'a [AbstractValue],
    oracle: &'a mut O,
    /// Accumulated over every visit of a return instruction.
    pub(crate) exit: MethodExit,
}

impl<'a, O: CallOracle> MethodAnalysis<'a, O> {
    pub(crate) fn new(
        method: MethodRef,
        body: &'a MethodBody,
        entry_values: &'a [AbstractValue],
        oracle: &'a mut O,
    ) -> Self {
        Self {
            method,
            body,
            entry_values,
            oracle,
            exit: MethodExit::default(),
        }
    }

    fn entry_fact(&self) -> StateFact {
        let mut fact = StateFact::default();
        for slot in 0..self.body.parameter_count {
            let value = self
                .entry_values
                .get(usize::from(slot))
                .copied()
                .unwrap_or(AbstractValue::NonConstant);
            fact.set_local(LocalId::from(slot), value);
        }
        fact
    }

    fn next_pc(&self, pc: ProgramCounter) -> Result<ProgramCounter, AnalysisError> {
        self.body
            .next_pc_of(pc)
            .ok_or_else(|| AnalysisError::MalformedBody {
                method: self.method.clone(),
                pc,
            })
    }
}

impl<O: CallOracle> DataflowProblem for MethodAnalysis<'_, O> {
    type Location = ProgramCounter;
    type Fact = StateFact;
    type Err = AnalysisError;

    fn seeds(&self) -> impl IntoIterator<Item = (ProgramCounter, StateFact)> {
        self.body
            .entry_point()
            .map(|entry| (entry, self.entry_fact()))
    }

    fn flow(
        &mut self,
        location: &ProgramCounter,
        fact: &StateFact,
    ) -> Result<impl IntoIterator<Item = (ProgramCounter, StateFact)>, AnalysisError> {
        let instruction = self.body.instruction_at(*location).ok_or_else(|| {
            AnalysisError::MalformedBody {
                method: self.method.clone(),
                pc: *location,
            }
        })?;
        let outcome = transfer::execute(&self.method, *location, instruction, fact, self.oracle);
        let mut successors = Vec::with_capacity(2);
        match outcome {
            Outcome::FallThrough(post) => successors.push((self.next_pc(*location)?, post)),
            Outcome::Jump(target, post) => successors.push((target, post)),
            Outcome::Branch {
                target,
                take_target,
                take_fall_through,
                fact: post,
            } => {
                if take_fall_through {
                    successors.push((self.next_pc(*location)?, post.clone()));
                }
                if take_target {
                    successors.push((target, post));
                }
            }
            Outcome::Return { value, fact: post } => self.exit.absorb(value, post),
        }
        Ok(successors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fixed_point::solve;
    use crate::analysis::transfer::CallSummary;
    use crate::program::{BinaryOperator, ComparisonOperator, Instruction, Operand};
    use AbstractValue::{Constant, NonConstant};

    struct NoCalls;

    impl CallOracle for NoCalls {
        fn read_static(&mut self, _field: &FieldRef) -> AbstractValue {
            AbstractValue::Unknown
        }

        fn write_static(&mut self, _field: &FieldRef, _value: AbstractValue) {}

        fn call(&mut self, _callee: &MethodRef, _args: &[AbstractValue]) -> CallSummary {
            CallSummary::opaque()
        }
    }

    fn body(parameter_count: u16, instructions: Vec<Instruction>) -> MethodBody {
        MethodBody {
            max_locals: 8,
            parameter_count,
            instructions: instructions
                .into_iter()
                .enumerate()
                .map(|(pc, insn)| (ProgramCounter::from(pc as u16), insn))
                .collect(),
        }
    }

    fn solve_body(
        body: &MethodBody,
        entry_values: &[AbstractValue],
    ) -> (BTreeMap<ProgramCounter, StateFact>, MethodExit) {
        let mut oracle = NoCalls;
        let mut problem = MethodAnalysis::new(
            MethodRef::new("Example", "m"),
            body,
            entry_values,
            &mut oracle,
        );
        let facts = solve(&mut problem).unwrap();
        (facts, problem.exit)
    }

    /// `loop1`: a loop that increments a counter must converge to a
    /// non-constant counter in bounded iterations.
    #[test]
    fn loop_carried_variable_becomes_non_constant() {
        let a = LocalId::from(0);
        let res = LocalId::from(1);
        let body = body(
            1,
            vec![
                // res = 0
                Instruction::Move {
                    dest: res,
                    src: Operand::Constant(0),
                },
                // while (a > 0)
                Instruction::Branch {
                    op: ComparisonOperator::Le,
                    lhs: Operand::Local(a),
                    rhs: Operand::Constant(0),
                    target: ProgramCounter::from(5),
                },
                // a--
                Instruction::Binary {
                    dest: a,
                    op: BinaryOperator::Sub,
                    lhs: Operand::Local(a),
                    rhs: Operand::Constant(1),
                },
                // res++
                Instruction::Binary {
                    dest: res,
                    op: BinaryOperator::Add,
                    lhs: Operand::Local(res),
                    rhs: Operand::Constant(1),
                },
                Instruction::Goto {
                    target: ProgramCounter::from(1),
                },
                Instruction::Return {
                    value: Some(Operand::Local(res)),
                },
            ],
        );
        let (_, exit) = solve_body(&body, &[Constant(42)]);
        assert_eq!(exit.return_value, NonConstant);
    }

    /// `loop2`: a value perturbed and restored inside the loop body stays
    /// constant at the loop head.
    #[test]
    fn balanced_loop_updates_stay_constant() {
        let a = LocalId::from(0);
        let res = LocalId::from(1);
        let body = body(
            1,
            vec![
                // res = a - 1
                Instruction::Binary {
                    dest: res,
                    op: BinaryOperator::Sub,
                    lhs: Operand::Local(a),
                    rhs: Operand::Constant(1),
                },
                // while (a > 0)
                Instruction::Branch {
                    op: ComparisonOperator::Le,
                    lhs: Operand::Local(a),
                    rhs: Operand::Constant(0),
                    target: ProgramCounter::from(6),
                },
                Instruction::Binary {
                    dest: a,
                    op: BinaryOperator::Sub,
                    lhs: Operand::Local(a),
                    rhs: Operand::Constant(1),
                },
                // res += 2; res -= 2
                Instruction::Binary {
                    dest: res,
                    op: BinaryOperator::Add,
                    lhs: Operand::Local(res),
                    rhs: Operand::Constant(2),
                },
                Instruction::Binary {
                    dest: res,
                    op: BinaryOperator::Sub,
                    lhs: Operand::Local(res),
                    rhs: Operand::Constant(2),
                },
                Instruction::Goto {
                    target: ProgramCounter::from(1),
                },
                Instruction::Return {
                    value: Some(Operand::Local(res)),
                },
            ],
        );
        let (_, exit) = solve_body(&body, &[Constant(23)]);
        assert_eq!(exit.return_value, Constant(22));
    }

    /// A value must agree on every incoming path to stay constant after a
    /// merge.
    #[test]
    fn merge_requires_agreement_on_all_paths() {
        let cond = LocalId::from(0);
        let out = LocalId::from(1);
        let make = |then_value: i32, else_value: i32| {
            body(
                1,
                vec![
                    Instruction::Branch {
                        op: ComparisonOperator::Eq,
                        lhs: Operand::Local(cond),
                        rhs: Operand::Constant(0),
                        target: ProgramCounter::from(3),
                    },
                    Instruction::Move {
                        dest: out,
                        src: Operand::Constant(then_value),
                    },
                    Instruction::Goto {
                        target: ProgramCounter::from(4),
                    },
                    Instruction::Move {
                        dest: out,
                        src: Operand::Constant(else_value),
                    },
                    Instruction::Return {
                        value: Some(Operand::Local(out)),
                    },
                ],
            )
        };
        let (_, disagreeing) = solve_body(&make(11, 12), &[NonConstant]);
        assert_eq!(disagreeing.return_value, NonConstant);
        let (_, agreeing) = solve_body(&make(42, 42), &[NonConstant]);
        assert_eq!(agreeing.return_value, Constant(42));
    }

    #[test]
    fn falling_off_the_end_is_malformed() {
        let body = body(
            0,
            vec![Instruction::Move {
                dest: LocalId::from(0),
                src: Operand::Constant(1),
            }],
        );
        let mut oracle = NoCalls;
        let mut problem = MethodAnalysis::new(
            MethodRef::new("Example", "m"),
            &body,
            &[],
            &mut oracle,
        );
        assert!(matches!(
            solve(&mut problem),
            Err(AnalysisError::MalformedBody { .. })
        ));
    }
}
