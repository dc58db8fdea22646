//! The read-only result surface of a completed analysis run.

use std::collections::{BTreeMap, HashMap};

use crate::program::{FieldRef, LocalId, MethodRef, ProgramCounter};

use super::intraprocedural::MethodExit;
use super::lattice::AbstractValue;
use super::state::{AllocSite, StateFact};

/// A key into the final facts of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKey {
    /// The value of a local variable in the state *entering* a program
    /// point, joined over every analyzed context of the method.
    Local {
        /// The method containing the program point.
        method: MethodRef,
        /// The program point.
        pc: ProgramCounter,
        /// The local variable slot.
        local: LocalId,
    },
    /// The final process-wide binding of a static field.
    StaticField(FieldRef),
    /// The value of an array element in the allocating method's exit
    /// state.
    ArrayElement {
        /// The allocation site identifying the array.
        site: AllocSite,
        /// The element index.
        index: i32,
    },
    /// The abstract return value of a method, joined over every analyzed
    /// context.
    ReturnValue(MethodRef),
}

/// An error answering a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The queried key was never reached from any entry point.
    #[error("The queried key was never reached from any entry point")]
    NotAnalyzed,
}

/// The final facts of an analysis run, frozen after the whole-program
/// fixed point settled.
#[derive(Debug)]
pub struct AnalysisResults {
    fields: BTreeMap<FieldRef, AbstractValue>,
    facts: HashMap<MethodRef, BTreeMap<ProgramCounter, StateFact>>,
    exits: HashMap<MethodRef, MethodExit>,
}

impl AnalysisResults {
    pub(crate) fn new(
        fields: BTreeMap<FieldRef, AbstractValue>,
        facts: HashMap<MethodRef, BTreeMap<ProgramCounter, StateFact>>,
        exits: HashMap<MethodRef, MethodExit>,
    ) -> Self {
        Self {
            fields,
            facts,
            exits,
        }
    }

    /// Looks up the final abstract value of a key.
    ///
    /// # Errors
    /// See [`QueryError::NotAnalyzed`].
    pub fn query(&self, key: &QueryKey) -> Result<AbstractValue, QueryError> {
        match key {
            QueryKey::Local { method, pc, local } => self
                .facts
                .get(method)
                .and_then(|facts| facts.get(pc))
                .map(|fact| fact.local(*local))
                .ok_or(QueryError::NotAnalyzed),
            QueryKey::StaticField(field) => {
                self.fields.get(field).copied().ok_or(QueryError::NotAnalyzed)
            }
            QueryKey::ArrayElement { site, index } => self
                .exits
                .get(&site.method)
                .and_then(|exit| exit.arrays.get(site))
                .map(|array| array.read(AbstractValue::Constant(*index)))
                .ok_or(QueryError::NotAnalyzed),
            QueryKey::ReturnValue(method) => self
                .exits
                .get(method)
                .map(|exit| exit.return_value)
                .ok_or(QueryError::NotAnalyzed),
        }
    }
}
