//! A generic framework for iterative dataflow analyses.
//!
//! The framework follows the standard abstractions of program analysis
//! theory: dataflow facts form a [`JoinSemiLattice`], an analysis is a
//! [`DataflowProblem`] (seed facts plus a flow function), and [`solve`]
//! runs a worklist algorithm until the facts stabilize.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A join semi-lattice of dataflow facts.
///
/// The required [`PartialOrd`] expresses the lattice ordering: `a <= b`
/// means "a carries less information than or equal to b". Implementations
/// must satisfy idempotency (`a.join(a) == a`), commutativity, and
/// associativity, and `join` must compute the least upper bound with
/// respect to that ordering.
///
/// For the fixed-point algorithm to terminate, all ascending chains of the
/// lattice must be finite.
pub trait JoinSemiLattice: Clone + PartialOrd {
    /// Computes the join (least upper bound) of two elements.
    ///
    /// Both operands are consumed so that implementations can reuse
    /// allocations.
    #[must_use]
    fn join(self, other: Self) -> Self;
}

/// A "lifted" lattice over `Option<T>` where `None` is the bottom element.
impl<T: JoinSemiLattice> JoinSemiLattice for Option<T> {
    fn join(self, other: Self) -> Self {
        match (self, other) {
            (None, other) => other,
            (this, None) => this,
            (Some(lhs), Some(rhs)) => Some(lhs.join(rhs)),
        }
    }
}

/// The lattice ordering induced by the join operation.
///
/// `a <= b` holds exactly when `a ⊔ b == b`. Composite facts (maps of
/// lattice values) use this to implement [`PartialOrd`] without spelling
/// out the pointwise comparison.
#[must_use]
pub fn join_induced_ordering<T>(lhs: &T, rhs: &T) -> Option<Ordering>
where
    T: JoinSemiLattice + PartialEq,
{
    if lhs == rhs {
        return Some(Ordering::Equal);
    }
    let joined = lhs.clone().join(rhs.clone());
    if &joined == rhs {
        Some(Ordering::Less)
    } else if &joined == lhs {
        Some(Ordering::Greater)
    } else {
        None
    }
}

/// A dataflow analysis problem: the seed facts at the entry locations and
/// the flow function transforming facts at each location.
///
/// The flow function must be monotone with respect to the lattice ordering
/// of [`Self::Fact`]; together with the finite lattice height this
/// guarantees that [`solve`] terminates.
pub trait DataflowProblem {
    /// A location in the control flow graph.
    type Location: Ord + Clone;

    /// The dataflow fact computed at each location.
    type Fact: JoinSemiLattice;

    /// The error type for fallible flow functions.
    type Err;

    /// Returns the initial facts at the entry location(s).
    fn seeds(&self) -> impl IntoIterator<Item = (Self::Location, Self::Fact)>;

    /// Applies the flow function at a location, producing the facts
    /// propagated to successor locations.
    ///
    /// Takes `&mut self` so that analyses can accumulate state (e.g.,
    /// method exit facts) while traversing.
    ///
    /// # Errors
    /// Returns an error when the flow function cannot be computed.
    fn flow(
        &mut self,
        location: &Self::Location,
        fact: &Self::Fact,
    ) -> Result<impl IntoIterator<Item = (Self::Location, Self::Fact)>, Self::Err>;
}

/// Computes the fixed point of a dataflow problem with a worklist
/// algorithm.
///
/// Returns the final fact at every reached location. A fact is
/// re-propagated only when the incoming information strictly increases it
/// in the lattice ordering, so the facts rise monotonically and the loop
/// drains in finitely many steps.
///
/// # Errors
/// Propagates the first error returned by the flow function.
pub fn solve<P>(problem: &mut P) -> Result<BTreeMap<P::Location, P::Fact>, P::Err>
where
    P: DataflowProblem,
{
    let mut facts: BTreeMap<P::Location, P::Fact> = BTreeMap::new();
    let mut worklist: BTreeMap<P::Location, P::Fact> = BTreeMap::new();

    for (location, fact) in problem.seeds() {
        insert_or_join(&mut worklist, location, fact);
    }

    while let Some((location, incoming)) = worklist.pop_first() {
        let merged = match facts.get(&location) {
            Some(current) => current.clone().join(incoming),
            None => incoming,
        };

        // Re-propagate unless the merged fact is already subsumed by the
        // recorded one. Incomparable facts are propagated as well; they can
        // only occur when the flow function is not monotone.
        let subsumed = facts.get(&location).is_some_and(|current| {
            matches!(
                merged.partial_cmp(current),
                Some(Ordering::Equal | Ordering::Less)
            )
        });

        if !subsumed {
            for (successor, fact) in problem.flow(&location, &merged)? {
                insert_or_join(&mut worklist, successor, fact);
            }
            facts.insert(location, merged);
        }
    }

    Ok(facts)
}

fn insert_or_join<L: Ord, F: JoinSemiLattice>(map: &mut BTreeMap<L, F>, location: L, fact: F) {
    match map.remove(&location) {
        Some(existing) => {
            map.insert(location, existing.join(fact));
        }
        None => {
            map.insert(location, fact);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A chain lattice 0 <= 1 <= 2, capped at 2.
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
    struct Level(u8);

    impl JoinSemiLattice for Level {
        fn join(self, other: Self) -> Self {
            Level(self.0.max(other.0))
        }
    }

    /// Propagates levels around a two-node cycle, incrementing on one edge.
    struct Cycle;

    impl DataflowProblem for Cycle {
        type Location = u8;
        type Fact = Level;
        type Err = std::convert::Infallible;

        fn seeds(&self) -> impl IntoIterator<Item = (u8, Level)> {
            [(0, Level(0))]
        }

        fn flow(
            &mut self,
            location: &u8,
            fact: &Level,
        ) -> Result<impl IntoIterator<Item = (u8, Level)>, Self::Err> {
            let next = (location + 1) % 2;
            let bumped = Level((fact.0 + 1).min(2));
            Ok([(next, bumped)])
        }
    }

    #[test]
    fn converges_on_cyclic_flow() {
        let facts = solve(&mut Cycle).unwrap();
        assert_eq!(facts[&0], Level(2));
        assert_eq!(facts[&1], Level(2));
    }

    #[test]
    fn option_lattice_lifts_bottom() {
        assert_eq!(None.join(Some(Level(1))), Some(Level(1)));
        assert_eq!(Some(Level(1)).join(None), Some(Level(1)));
        assert_eq!(Some(Level(1)).join(Some(Level(2))), Some(Level(2)));
    }

    #[test]
    fn join_induced_ordering_matches_chain() {
        assert_eq!(
            join_induced_ordering(&Level(0), &Level(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            join_induced_ordering(&Level(2), &Level(2)),
            Some(Ordering::Equal)
        );
    }
}
