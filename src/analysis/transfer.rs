//! Per-instruction abstract semantics.
//!
//! Each instruction kind maps an incoming [`StateFact`] to an [`Outcome`]:
//! the post-state plus the control transfer it performs. Interprocedural
//! information (static field bindings and callee summaries) is consulted
//! through the [`CallOracle`] implemented by the interprocedural driver.

use std::collections::BTreeMap;

use crate::program::{FieldRef, Instruction, MethodRef, Operand, ProgramCounter};

use super::fixed_point::JoinSemiLattice;
use super::lattice::AbstractValue;
use super::state::{AllocSite, ArrayObject, ArrayRef, StateFact, StaticCell};

/// The engine-side services a transfer function may consult.
///
/// Implementations record dependencies: a unit reading a static field or a
/// callee summary is re-analyzed when that information rises.
pub(crate) trait CallOracle {
    /// The current process-wide binding of a static field.
    fn read_static(&mut self, field: &FieldRef) -> AbstractValue;

    /// Joins a written value into the process-wide binding of a field.
    fn write_static(&mut self, field: &FieldRef, value: AbstractValue);

    /// The current summary of a callee for the given argument values.
    fn call(&mut self, callee: &MethodRef, args: &[AbstractValue]) -> CallSummary;
}

/// A snapshot of what the engine knows about one call.
#[derive(Debug, Clone)]
pub(crate) struct CallSummary {
    /// The abstract return value.
    pub return_value: AbstractValue,
    /// The callee's static field effects at exit.
    pub statics: BTreeMap<FieldRef, StaticCell>,
    /// Whether the callee is outside the analyzable universe.
    pub opaque: bool,
}

impl CallSummary {
    /// The summary of a native or otherwise unanalyzable callee.
    pub(crate) fn opaque() -> Self {
        Self {
            return_value: AbstractValue::NonConstant,
            statics: BTreeMap::new(),
            opaque: true,
        }
    }

    /// The bottom summary of a callee that has not been analyzed yet.
    pub(crate) fn bottom() -> Self {
        Self {
            return_value: AbstractValue::Unknown,
            statics: BTreeMap::new(),
            opaque: false,
        }
    }
}

/// The result of executing one instruction abstractly.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Control falls through to the next instruction.
    FallThrough(StateFact),
    /// Control jumps to the given program counter.
    Jump(ProgramCounter, StateFact),
    /// A conditional branch; either side may be infeasible given the
    /// current knowledge about the condition.
    Branch {
        /// The branch target.
        target: ProgramCounter,
        /// Whether the target side is feasible.
        take_target: bool,
        /// Whether the fall-through side is feasible.
        take_fall_through: bool,
        /// The post-state.
        fact: StateFact,
    },
    /// The method returns with the given abstract value.
    Return {
        /// The abstract return value (`Unknown` for `void` returns).
        value: AbstractValue,
        /// The post-state at the return point.
        fact: StateFact,
    },
}

/// Executes one instruction on an incoming fact.
pub(crate) fn execute<O: CallOracle>(
    method: &MethodRef,
    pc: ProgramCounter,
    instruction: &Instruction,
    fact: &StateFact,
    oracle: &mut O,
) -> Outcome {
    let mut post = fact.clone();
    match instruction {
        Instruction::Move { dest, src } => {
            let value = post.operand_value(src);
            let reference = match src {
                Operand::Local(src) => post.array_ref(*src),
                Operand::Constant(_) => ArrayRef::Unknown,
            };
            post.set_local(*dest, value);
            if reference != ArrayRef::Unknown {
                post.array_refs.insert(*dest, reference);
            }
        }
        Instruction::Unary { dest, op, operand } => {
            let value = AbstractValue::apply_unary(*op, post.operand_value(operand));
            post.set_local(*dest, value);
        }
        Instruction::Binary { dest, op, lhs, rhs } => {
            let value =
                AbstractValue::apply(*op, post.operand_value(lhs), post.operand_value(rhs));
            post.set_local(*dest, value);
        }
        Instruction::GetStatic { dest, field } => {
            let underlying = oracle.read_static(field);
            let value = post.static_cell(field).effective(underlying);
            post.set_local(*dest, value);
        }
        Instruction::PutStatic { field, value } => {
            let value = post.operand_value(value);
            post.statics.insert(field.clone(), StaticCell::Written(value));
            oracle.write_static(field, value);
        }
        Instruction::NewArray { dest, length: _ } => {
            let site = AllocSite {
                method: method.clone(),
                pc,
            };
            // A second allocation from the same site merges with the
            // recorded state; the site stands for all its instances.
            post.arrays
                .entry(site.clone())
                .and_modify(|existing| {
                    *existing = std::mem::take(existing).join(ArrayObject::new());
                })
                .or_default();
            post.set_local(*dest, AbstractValue::NonConstant);
            post.array_refs.insert(*dest, ArrayRef::Site(site));
        }
        Instruction::ArrayLoad { dest, array, index } => {
            let index = post.operand_value(index);
            let value = match post.array_ref(*array) {
                ArrayRef::Site(site) => post
                    .arrays
                    .get(&site)
                    .map_or(AbstractValue::Unknown, |array| array.read(index)),
                ArrayRef::Any => AbstractValue::NonConstant,
                ArrayRef::Unknown => AbstractValue::Unknown,
            };
            post.set_local(*dest, value);
        }
        Instruction::ArrayStore {
            array,
            index,
            value,
        } => {
            let index = post.operand_value(index);
            let value = post.operand_value(value);
            match post.array_ref(*array) {
                ArrayRef::Site(site) => {
                    post.arrays.entry(site).or_default().write(index, value);
                }
                ArrayRef::Any => poison_all(&mut post),
                ArrayRef::Unknown => {}
            }
        }
        Instruction::Call { dest, callee, args } => {
            let arg_values: Vec<AbstractValue> =
                args.iter().map(|arg| post.operand_value(arg)).collect();
            let summary = oracle.call(callee, &arg_values);

            // Any array reachable from an argument may be written by the
            // callee (a native bulk copy may even scribble over its
            // source), so all of them lose their element knowledge.
            for arg in args {
                let Operand::Local(local) = arg else {
                    continue;
                };
                match post.array_ref(*local) {
                    ArrayRef::Site(site) => {
                        post.arrays.entry(site).or_default().poison();
                    }
                    ArrayRef::Any => poison_all(&mut post),
                    ArrayRef::Unknown => {}
                }
            }

            if summary.opaque {
                if let Some(dest) = dest {
                    post.set_local(*dest, AbstractValue::NonConstant);
                }
            } else {
                for (field, cell) in &summary.statics {
                    let composed = post.static_cell(field).compose(*cell);
                    post.statics.insert(field.clone(), composed);
                }
                if let Some(dest) = dest {
                    post.set_local(*dest, summary.return_value);
                }
            }
        }
        Instruction::Branch {
            op,
            lhs,
            rhs,
            target,
        } => {
            let lhs = post.operand_value(lhs);
            let rhs = post.operand_value(rhs);
            let (take_target, take_fall_through) = match AbstractValue::compare(*op, lhs, rhs) {
                Some(taken) => (taken, !taken),
                // Propagate to neither side while an operand is still
                // unknown; to both once the condition is non-constant.
                None if lhs == AbstractValue::Unknown || rhs == AbstractValue::Unknown => {
                    (false, false)
                }
                None => (true, true),
            };
            return Outcome::Branch {
                target: *target,
                take_target,
                take_fall_through,
                fact: post,
            };
        }
        Instruction::Goto { target } => return Outcome::Jump(*target, post),
        Instruction::Return { value } => {
            let value = value
                .as_ref()
                .map_or(AbstractValue::Unknown, |value| post.operand_value(value));
            return Outcome::Return { value, fact: post };
        }
        Instruction::Unsupported { dest } => {
            if let Some(dest) = dest {
                post.set_local(*dest, AbstractValue::NonConstant);
            }
        }
    }
    Outcome::FallThrough(post)
}

fn poison_all(fact: &mut StateFact) {
    for array in fact.arrays.values_mut() {
        array.poison();
    }
}
