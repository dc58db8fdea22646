//! The abstract machine state propagated through a method body.
//!
//! A [`StateFact`] is a product lattice over four keyed families: local
//! variable values, local array references, array contents keyed by
//! allocation site, and a flow-sensitive view of static fields. Absent
//! keys denote the bottom element of the respective component, so the
//! join of two facts is the pointwise join over the union of their keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;

use itertools::Itertools;

use crate::program::{FieldRef, LocalId, MethodRef, Operand, ProgramCounter};

use super::fixed_point::{JoinSemiLattice, join_induced_ordering};
use super::lattice::AbstractValue;

/// Identifies an array by its allocation site.
///
/// Two arrays allocated by the same instruction share an identity; their
/// facts merge, which over-approximates soundly.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct AllocSite {
    /// The method containing the allocation.
    pub method: MethodRef,
    /// The program counter of the allocating instruction.
    pub pc: ProgramCounter,
}

impl Display for AllocSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.method, self.pc)
    }
}

/// The set of allocation sites a local may reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArrayRef {
    /// No reference has been observed yet.
    #[default]
    Unknown,
    /// The local references arrays from exactly this site.
    Site(AllocSite),
    /// The local may reference arrays the analysis cannot identify.
    Any,
}

impl PartialOrd for ArrayRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use ArrayRef::{Any, Site, Unknown};
        match (self, other) {
            (Unknown, Unknown) | (Any, Any) => Some(Ordering::Equal),
            (Site(lhs), Site(rhs)) if lhs == rhs => Some(Ordering::Equal),
            (Site(_), Site(_)) => None,
            (Unknown, _) | (_, Any) => Some(Ordering::Less),
            (_, Unknown) | (Any, _) => Some(Ordering::Greater),
        }
    }
}

impl JoinSemiLattice for ArrayRef {
    fn join(self, other: Self) -> Self {
        use ArrayRef::{Any, Site, Unknown};
        match (self, other) {
            (Unknown, it) | (it, Unknown) => it,
            (Site(lhs), Site(rhs)) if lhs == rhs => Site(lhs),
            _ => Any,
        }
    }
}

/// The abstract contents of the arrays allocated at one site.
///
/// Elements written at a statically known index are tracked individually;
/// all other indices share the `rest` value, which starts at the default
/// element value `0`. [`poison`](Self::poison) irreversibly discards all
/// knowledge, modeling writes whose extent cannot be bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayObject {
    poisoned: bool,
    elements: BTreeMap<i32, AbstractValue>,
    rest: AbstractValue,
}

impl ArrayObject {
    /// The state of a freshly allocated array: every element holds the
    /// default value `0`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poisoned: false,
            elements: BTreeMap::new(),
            rest: AbstractValue::Constant(0),
        }
    }

    /// Reads the element at an abstract index.
    #[must_use]
    pub fn read(&self, index: AbstractValue) -> AbstractValue {
        if self.poisoned {
            return AbstractValue::NonConstant;
        }
        match index {
            AbstractValue::Constant(index) => {
                self.elements.get(&index).copied().unwrap_or(self.rest)
            }
            AbstractValue::Unknown => AbstractValue::Unknown,
            AbstractValue::NonConstant => self
                .elements
                .values()
                .copied()
                .fold(self.rest, JoinSemiLattice::join),
        }
    }

    /// Writes a value at an abstract index.
    ///
    /// A known index receives a strong single-element update; an
    /// index-insensitive write poisons the whole array. Writes to a
    /// poisoned array are ignored (poisoning is irreversible within a
    /// run).
    pub fn write(&mut self, index: AbstractValue, value: AbstractValue) {
        if self.poisoned {
            return;
        }
        match index {
            AbstractValue::Constant(index) => {
                self.elements.insert(index, value);
            }
            // The index has not been computed yet; the write will be
            // re-executed once it rises.
            AbstractValue::Unknown => {}
            AbstractValue::NonConstant => self.poison(),
        }
    }

    /// Irreversibly marks every element as non-constant.
    pub fn poison(&mut self) {
        self.poisoned = true;
        self.elements.clear();
        self.rest = AbstractValue::NonConstant;
    }

    /// Checks whether the array has been poisoned.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Default for ArrayObject {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for ArrayObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        join_induced_ordering(self, other)
    }
}

impl JoinSemiLattice for ArrayObject {
    fn join(self, other: Self) -> Self {
        if self.poisoned || other.poisoned {
            let mut poisoned = self;
            poisoned.poison();
            return poisoned;
        }
        let indices: Vec<i32> = self
            .elements
            .keys()
            .merge(other.elements.keys())
            .copied()
            .dedup()
            .collect();
        let rest = self.rest.join(other.rest);
        let elements = indices
            .into_iter()
            .map(|index| {
                let lhs = self.elements.get(&index).copied().unwrap_or(self.rest);
                let rhs = other.elements.get(&index).copied().unwrap_or(other.rest);
                (index, lhs.join(rhs))
            })
            .collect();
        Self {
            poisoned: false,
            elements,
            rest,
        }
    }
}

/// The flow-sensitive view of one static field within a method.
///
/// `Untouched` defers to the process-wide binding; `Written` records a
/// definite overwrite on every path; `MaybeWritten` records an overwrite
/// on some paths only, so a read joins the written value with the
/// underlying binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticCell {
    /// The method has not written the field on any path to this point.
    #[default]
    Untouched,
    /// Every path to this point wrote the field, most recently this value.
    Written(AbstractValue),
    /// Some paths wrote the field, most recently this value.
    MaybeWritten(AbstractValue),
}

impl StaticCell {
    /// The value a read observes, given the process-wide binding of the
    /// field.
    #[must_use]
    pub fn effective(self, underlying: AbstractValue) -> AbstractValue {
        match self {
            StaticCell::Untouched => underlying,
            StaticCell::Written(value) => value,
            StaticCell::MaybeWritten(value) => underlying.join(value),
        }
    }

    /// Composes a callee's exit cell into this (caller) cell.
    #[must_use]
    pub fn compose(self, callee_exit: Self) -> Self {
        match callee_exit {
            StaticCell::Untouched => self,
            StaticCell::Written(value) => StaticCell::Written(value),
            StaticCell::MaybeWritten(value) => match self {
                StaticCell::Untouched => StaticCell::MaybeWritten(value),
                StaticCell::Written(previous) => StaticCell::Written(previous.join(value)),
                StaticCell::MaybeWritten(previous) => {
                    StaticCell::MaybeWritten(previous.join(value))
                }
            },
        }
    }
}

impl PartialOrd for StaticCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        join_induced_ordering(self, other)
    }
}

impl JoinSemiLattice for StaticCell {
    fn join(self, other: Self) -> Self {
        use StaticCell::{MaybeWritten, Untouched, Written};
        match (self, other) {
            (Untouched, Untouched) => Untouched,
            (Written(lhs), Written(rhs)) => Written(lhs.join(rhs)),
            (Untouched, Written(value) | MaybeWritten(value))
            | (Written(value) | MaybeWritten(value), Untouched) => MaybeWritten(value),
            (Written(lhs) | MaybeWritten(lhs), MaybeWritten(rhs))
            | (MaybeWritten(lhs), Written(rhs)) => MaybeWritten(lhs.join(rhs)),
        }
    }
}

/// The dataflow fact entering a program point.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateFact {
    /// The abstract values of the local variables.
    pub locals: BTreeMap<LocalId, AbstractValue>,
    /// The array references held by local variables.
    pub array_refs: BTreeMap<LocalId, ArrayRef>,
    /// The array contents, keyed by allocation site.
    pub arrays: BTreeMap<AllocSite, ArrayObject>,
    /// The flow-sensitive static field cells.
    pub statics: BTreeMap<FieldRef, StaticCell>,
}

impl StateFact {
    /// The abstract value of a local variable (bottom when never bound).
    #[must_use]
    pub fn local(&self, local: LocalId) -> AbstractValue {
        self.locals
            .get(&local)
            .copied()
            .unwrap_or(AbstractValue::Unknown)
    }

    /// Binds a local variable, clearing any array reference it held.
    pub fn set_local(&mut self, local: LocalId, value: AbstractValue) {
        self.locals.insert(local, value);
        self.array_refs.remove(&local);
    }

    /// The array reference held by a local variable.
    #[must_use]
    pub fn array_ref(&self, local: LocalId) -> ArrayRef {
        self.array_refs.get(&local).cloned().unwrap_or_default()
    }

    /// The abstract value of an operand.
    #[must_use]
    pub fn operand_value(&self, operand: &Operand) -> AbstractValue {
        match operand {
            Operand::Local(local) => self.local(*local),
            Operand::Constant(value) => AbstractValue::Constant(*value),
        }
    }

    /// The cell of a static field (untouched when never recorded).
    #[must_use]
    pub fn static_cell(&self, field: &FieldRef) -> StaticCell {
        self.statics.get(field).copied().unwrap_or_default()
    }
}

impl PartialOrd for StateFact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        join_induced_ordering(self, other)
    }
}

impl JoinSemiLattice for StateFact {
    fn join(self, other: Self) -> Self {
        Self {
            locals: join_maps(self.locals, other.locals),
            array_refs: join_maps(self.array_refs, other.array_refs),
            arrays: join_maps(self.arrays, other.arrays),
            statics: join_maps(self.statics, other.statics),
        }
    }
}

/// Joins two keyed lattice families pointwise; a key absent on one side
/// keeps the other side's value (absence is bottom).
pub(crate) fn join_maps<K, V>(lhs: BTreeMap<K, V>, mut rhs: BTreeMap<K, V>) -> BTreeMap<K, V>
where
    K: Ord,
    V: JoinSemiLattice,
{
    let mut result = BTreeMap::new();
    for (key, value) in lhs {
        let joined = match rhs.remove(&key) {
            Some(other) => value.join(other),
            None => value,
        };
        result.insert(key, joined);
    }
    result.extend(rhs);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use AbstractValue::{Constant, NonConstant, Unknown};

    fn site(pc: u16) -> AllocSite {
        AllocSite {
            method: MethodRef::new("Example", "main"),
            pc: ProgramCounter::from(pc),
        }
    }

    #[test]
    fn fresh_array_elements_default_to_zero() {
        let array = ArrayObject::new();
        assert_eq!(array.read(Constant(3)), Constant(0));
    }

    #[test]
    fn known_index_writes_are_strong() {
        let mut array = ArrayObject::new();
        array.write(Constant(0), Constant(42));
        array.write(Constant(0), Constant(23));
        assert_eq!(array.read(Constant(0)), Constant(23));
        assert_eq!(array.read(Constant(1)), Constant(0));
    }

    #[test]
    fn unknown_index_write_poisons() {
        let mut array = ArrayObject::new();
        array.write(Constant(0), Constant(42));
        array.write(NonConstant, Constant(7));
        assert!(array.is_poisoned());
        assert_eq!(array.read(Constant(0)), NonConstant);
    }

    #[test]
    fn poisoning_is_irreversible() {
        let mut array = ArrayObject::new();
        array.poison();
        array.write(Constant(0), Constant(42));
        assert_eq!(array.read(Constant(0)), NonConstant);
    }

    #[test]
    fn index_insensitive_read_joins_all_elements() {
        let mut array = ArrayObject::new();
        array.write(Constant(0), Constant(42));
        assert_eq!(array.read(NonConstant), NonConstant);

        let mut uniform = ArrayObject::new();
        uniform.write(Constant(0), Constant(0));
        assert_eq!(uniform.read(NonConstant), Constant(0));
    }

    #[test]
    fn array_join_is_elementwise() {
        let mut lhs = ArrayObject::new();
        lhs.write(Constant(0), Constant(42));
        lhs.write(Constant(1), Constant(5));
        let mut rhs = ArrayObject::new();
        rhs.write(Constant(0), Constant(42));
        rhs.write(Constant(1), Constant(6));
        let joined = lhs.join(rhs);
        assert_eq!(joined.read(Constant(0)), Constant(42));
        assert_eq!(joined.read(Constant(1)), NonConstant);
        assert_eq!(joined.read(Constant(2)), Constant(0));
    }

    #[test]
    fn static_cell_join_tracks_conditional_writes() {
        use StaticCell::{MaybeWritten, Untouched, Written};
        assert_eq!(
            Written(Constant(11)).join(Written(Constant(12))),
            Written(NonConstant)
        );
        assert_eq!(
            Untouched.join(Written(Constant(11))),
            MaybeWritten(Constant(11))
        );
        assert_eq!(
            MaybeWritten(Constant(11)).effective(Constant(0)),
            NonConstant
        );
        assert_eq!(Written(Constant(11)).effective(NonConstant), Constant(11));
    }

    #[test]
    fn static_cell_composition() {
        use StaticCell::{MaybeWritten, Untouched, Written};
        // A definite callee write overrides the caller's view.
        assert_eq!(
            Written(Constant(11)).compose(Written(Constant(42))),
            Written(Constant(42))
        );
        // A conditional callee write merges with it.
        assert_eq!(
            Written(Constant(11)).compose(MaybeWritten(Constant(42))),
            Written(NonConstant)
        );
        assert_eq!(Untouched.compose(Untouched), Untouched);
    }

    #[test]
    fn array_ref_join() {
        use ArrayRef::{Any, Site, Unknown as NoRef};
        assert_eq!(Site(site(0)).join(Site(site(0))), Site(site(0)));
        assert_eq!(Site(site(0)).join(Site(site(1))), Any);
        assert_eq!(NoRef.join(Site(site(0))), Site(site(0)));
    }

    #[test]
    fn fact_join_is_pointwise_with_absent_bottom() {
        let zero = LocalId::from(0);
        let one = LocalId::from(1);
        let mut lhs = StateFact::default();
        lhs.set_local(zero, Constant(1));
        let mut rhs = StateFact::default();
        rhs.set_local(zero, Constant(2));
        rhs.set_local(one, Constant(3));
        let joined = lhs.join(rhs);
        assert_eq!(joined.local(zero), NonConstant);
        assert_eq!(joined.local(one), Constant(3));
        assert_eq!(joined.local(LocalId::from(2)), Unknown);
    }

    #[test]
    fn fact_ordering_follows_join() {
        let zero = LocalId::from(0);
        let mut smaller = StateFact::default();
        smaller.set_local(zero, Unknown);
        let mut bigger = StateFact::default();
        bigger.set_local(zero, Constant(1));
        assert!(smaller <= bigger);
        assert!(bigger <= bigger.clone());
    }
}
