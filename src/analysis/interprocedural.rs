//! The whole-program propagator for static state and call summaries.
//!
//! Methods are analyzed as units keyed by calling context (the abstract
//! values of the arguments). A FIFO queue drives the global fixed point:
//! analyzing a unit may raise a static field binding or a method summary,
//! which re-enqueues every unit that depends on the raised information.
//! Recursive cycles are collapsed via the call graph's strongly connected
//! components: a call edge inside the caller's own component uses the
//! shared context-insensitive summary, so the mutual iteration stays
//! within one finite-height fixed point.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Display;

use itertools::Itertools;
use log::{debug, trace};

use crate::program::call_graph::CallGraph;
use crate::program::{FieldRef, Method, MethodRef, Program, ProgramCounter};

use super::AnalysisError;
use super::fixed_point::{JoinSemiLattice, solve};
use super::intraprocedural::{MethodAnalysis, MethodExit};
use super::lattice::AbstractValue;
use super::results::AnalysisResults;
use super::state::{StateFact, StaticCell};
use super::transfer::{CallOracle, CallSummary};

/// The calling context of an analysis unit: the abstract values of the
/// parameters at entry.
type Context = Vec<AbstractValue>;

/// One unit of interprocedural work: a method analyzed under a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UnitKey {
    method: MethodRef,
    context: Context,
}

impl Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.method, self.context.iter().format(", "))
    }
}

/// The interprocedural linear constant propagation analysis.
///
/// Consumes an immutable [`Program`] and a [`CallGraph`] over its methods
/// and computes the whole-program fixed point described in the module
/// documentation.
#[derive(Debug)]
pub struct ConstantPropagation<'p> {
    program: &'p Program,
    call_graph: &'p CallGraph,
}

impl<'p> ConstantPropagation<'p> {
    /// Creates the analysis over a program and its call graph.
    #[must_use]
    pub fn new(program: &'p Program, call_graph: &'p CallGraph) -> Self {
        Self {
            program,
            call_graph,
        }
    }

    /// Runs the analysis to its global fixed point.
    ///
    /// Static initializers are processed first; their exit states
    /// establish the base bindings of the static fields. The entry points
    /// are then propagated until no unit's output changes.
    ///
    /// # Errors
    /// - [`AnalysisError::MalformedCallGraph`] when the call graph or the
    ///   entry points refer to methods outside the program.
    /// - [`AnalysisError::MalformedBody`] when control falls through the
    ///   end of a method body.
    pub fn run(self) -> Result<AnalysisResults, AnalysisError> {
        self.call_graph.validate(self.program)?;
        if let Some(unknown) = self
            .program
            .entry_points
            .iter()
            .find(|entry| !self.program.methods.contains_key(*entry))
        {
            return Err(AnalysisError::UnknownEntryPoint {
                method: unknown.clone(),
            });
        }

        let mut engine = Engine {
            program: self.program,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            shared: SharedState {
                program: self.program,
                scc_of: self.call_graph.scc_membership(self.program),
                fields: BTreeMap::new(),
                bases_frozen: false,
                summaries: HashMap::new(),
                facts: HashMap::new(),
                field_readers: BTreeMap::new(),
                callers: HashMap::new(),
                pending: Vec::new(),
                dirty: Vec::new(),
                current: None,
            },
        };
        engine.run()
    }
}

struct Engine<'p> {
    program: &'p Program,
    queue: VecDeque<UnitKey>,
    queued: HashSet<UnitKey>,
    shared: SharedState<'p>,
}

impl Engine<'_> {
    fn run(&mut self) -> Result<AnalysisResults, AnalysisError> {
        debug!("analyzing static initializers");
        let initializers: Vec<MethodRef> =
            self.program.static_initializers().cloned().collect();
        for initializer in initializers {
            self.enqueue_default(&initializer);
        }
        self.drain()?;
        self.shared.freeze_bases();
        // Phase-one reads observed declared initial values; the frozen
        // bases (and replayed helper writes) may differ, so every helper
        // that read a field gets another pass. Initializers are not
        // re-run: they execute once, before the bases exist.
        let readers: Vec<UnitKey> = self
            .shared
            .field_readers
            .values()
            .flatten()
            .filter(|unit| !unit.method.is_static_initializer())
            .cloned()
            .collect();
        for reader in readers {
            self.enqueue(reader);
        }
        self.shared.dirty.clear();

        debug!("propagating from entry points");
        let entries: Vec<MethodRef> = self.program.entry_points.clone();
        for entry in entries {
            self.enqueue_default(&entry);
        }
        self.drain()?;

        Ok(self.snapshot())
    }

    /// Enqueues a method under the context-insensitive default context.
    fn enqueue_default(&mut self, method: &MethodRef) {
        let Some(resolved) = self.program.methods.get(method) else {
            return;
        };
        if resolved.is_opaque() {
            debug!("skipping opaque method {method}");
            return;
        }
        self.enqueue(UnitKey {
            method: method.clone(),
            context: default_context(resolved),
        });
    }

    fn enqueue(&mut self, unit: UnitKey) {
        if self.queued.insert(unit.clone()) {
            self.queue.push_back(unit);
        }
    }

    fn drain(&mut self) -> Result<(), AnalysisError> {
        while let Some(unit) = self.queue.pop_front() {
            self.queued.remove(&unit);
            self.analyze_unit(&unit)?;

            for discovered in std::mem::take(&mut self.shared.pending) {
                self.enqueue(discovered);
            }
            for invalidated in std::mem::take(&mut self.shared.dirty) {
                self.enqueue(invalidated);
            }
        }
        Ok(())
    }

    fn analyze_unit(&mut self, unit: &UnitKey) -> Result<(), AnalysisError> {
        let body = self
            .program
            .methods
            .get(&unit.method)
            .and_then(|method| method.body.as_ref())
            .expect("BUG: only methods with bodies are enqueued");
        trace!("analyzing {unit}");

        self.shared.current = Some(unit.clone());
        let mut problem =
            MethodAnalysis::new(unit.method.clone(), body, &unit.context, &mut self.shared);
        let solved = solve(&mut problem);
        let exit = std::mem::take(&mut problem.exit);
        self.shared.current = None;
        let facts = solved?;

        self.shared.facts.insert(unit.clone(), facts);
        let changed = self.shared.summaries.get(unit) != Some(&exit);
        self.shared.summaries.insert(unit.clone(), exit);
        if changed {
            trace!("summary of {unit} changed; re-enqueueing its callers");
            let callers: Vec<UnitKey> = self
                .shared
                .callers
                .get(unit)
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            for caller in callers {
                self.enqueue(caller);
            }
        }
        Ok(())
    }

    /// Freezes the final facts into the read-only result surface, joining
    /// over the analyzed contexts of each method.
    fn snapshot(&mut self) -> AnalysisResults {
        let mut facts: HashMap<MethodRef, BTreeMap<ProgramCounter, StateFact>> = HashMap::new();
        for (unit, unit_facts) in std::mem::take(&mut self.shared.facts) {
            let merged = facts.entry(unit.method).or_default();
            for (pc, fact) in unit_facts {
                match merged.remove(&pc) {
                    Some(existing) => {
                        merged.insert(pc, existing.join(fact));
                    }
                    None => {
                        merged.insert(pc, fact);
                    }
                }
            }
        }

        let mut exits: HashMap<MethodRef, MethodExit> = HashMap::new();
        for (unit, exit) in std::mem::take(&mut self.shared.summaries) {
            exits.entry(unit.method).or_default().merge(exit);
        }

        AnalysisResults::new(std::mem::take(&mut self.shared.fields), facts, exits)
    }
}

/// The tables shared between the driver and the transfer functions.
struct SharedState<'p> {
    program: &'p Program,
    scc_of: HashMap<MethodRef, usize>,
    /// The process-wide static field bindings; mutated only by join.
    fields: BTreeMap<FieldRef, AbstractValue>,
    /// Whether the initializer phase has completed and the field bases
    /// are established.
    bases_frozen: bool,
    summaries: HashMap<UnitKey, MethodExit>,
    facts: HashMap<UnitKey, BTreeMap<ProgramCounter, StateFact>>,
    /// Units to re-analyze when a field binding rises.
    field_readers: BTreeMap<FieldRef, HashSet<UnitKey>>,
    /// Units to re-analyze when a callee summary changes.
    callers: HashMap<UnitKey, HashSet<UnitKey>>,
    /// Units discovered during the current intraprocedural solve.
    pending: Vec<UnitKey>,
    /// Units invalidated by a binding rise during the current solve.
    dirty: Vec<UnitKey>,
    current: Option<UnitKey>,
}

impl SharedState<'_> {
    /// Establishes the base binding of every declared field from the
    /// static initializer summaries.
    ///
    /// A field the initializer definitely writes takes the initializer's
    /// exit value: the runtime completes initialization before any other
    /// access, so the default value is unobservable. A field only written
    /// on some initializer paths joins with its declared-or-default
    /// initial; an untouched field keeps that initial.
    ///
    /// Non-initializer methods analyzed during this phase (helpers called
    /// from an initializer) have bypassed the global table; their exit
    /// writes are replayed into it, since an entry point may invoke them
    /// again after initialization completes.
    fn freeze_bases(&mut self) {
        for (field, declaration) in &self.program.static_fields {
            let declared = AbstractValue::Constant(declaration.declared_or_default());
            let initializer_cell = self
                .summaries
                .iter()
                .filter(|(unit, _)| unit.method.is_static_initializer())
                .map(|(_, exit)| exit.statics.get(field).copied().unwrap_or_default())
                .reduce(JoinSemiLattice::join)
                .unwrap_or_default();
            let base = match initializer_cell {
                StaticCell::Untouched => declared,
                StaticCell::Written(value) => value,
                StaticCell::MaybeWritten(value) => declared.join(value),
            };
            trace!("field {field} starts at {base}");
            self.fields.insert(field.clone(), base);
        }
        self.bases_frozen = true;

        let replayed: Vec<(FieldRef, AbstractValue)> = self
            .summaries
            .iter()
            .filter(|(unit, _)| !unit.method.is_static_initializer())
            .flat_map(|(_, exit)| &exit.statics)
            .filter_map(|(field, cell)| match cell {
                StaticCell::Untouched => None,
                StaticCell::Written(value) | StaticCell::MaybeWritten(value) => {
                    Some((field.clone(), *value))
                }
            })
            .collect();
        for (field, value) in replayed {
            self.write_static(&field, value);
        }
    }

    fn record_reader(&mut self, field: &FieldRef) {
        if let Some(current) = &self.current {
            self.field_readers
                .entry(field.clone())
                .or_default()
                .insert(current.clone());
        }
    }

    fn declared_initial(&self, field: &FieldRef) -> AbstractValue {
        self.program
            .static_fields
            .get(field)
            .map_or(AbstractValue::Constant(0), |declaration| {
                AbstractValue::Constant(declaration.declared_or_default())
            })
    }
}

impl CallOracle for SharedState<'_> {
    fn read_static(&mut self, field: &FieldRef) -> AbstractValue {
        self.record_reader(field);
        let recorded = self
            .fields
            .get(field)
            .copied()
            .unwrap_or(AbstractValue::Unknown);
        if self.bases_frozen {
            recorded
        } else {
            // During the initializer phase the relative order of
            // initializers is unspecified; a cross-initializer read
            // observes the declared initial value.
            recorded.join(self.declared_initial(field))
        }
    }

    fn write_static(&mut self, field: &FieldRef, value: AbstractValue) {
        if !self.bases_frozen {
            // Initializer writes reach the binding through the exit-cell
            // composition in `freeze_bases`.
            return;
        }
        let current = self
            .fields
            .get(field)
            .copied()
            .unwrap_or(AbstractValue::Unknown);
        let updated = current.join(value);
        if updated != current {
            trace!("field {field} rises to {updated}");
            self.fields.insert(field.clone(), updated);
            let readers = self.field_readers.get(field).into_iter().flatten();
            self.dirty.extend(readers.cloned());
        }
    }

    fn call(&mut self, callee: &MethodRef, args: &[AbstractValue]) -> CallSummary {
        let Some(method) = self.program.methods.get(callee) else {
            return CallSummary::opaque();
        };
        if method.is_opaque() {
            return CallSummary::opaque();
        }

        let recursive = self.current.as_ref().is_some_and(|current| {
            self.scc_of.get(&current.method) == self.scc_of.get(callee)
        });
        let context = if recursive {
            // A call edge within the caller's own strongly connected
            // component must not spawn argument-specific contexts, or the
            // mutual iteration would not be bounded.
            default_context(method)
        } else {
            context_of(method, args)
        };

        let key = UnitKey {
            method: callee.clone(),
            context,
        };
        if let Some(current) = &self.current {
            self.callers
                .entry(key.clone())
                .or_default()
                .insert(current.clone());
        }
        match self.summaries.get(&key) {
            Some(exit) => CallSummary {
                return_value: exit.return_value,
                statics: exit.statics.clone(),
                opaque: false,
            },
            None => {
                self.pending.push(key);
                CallSummary::bottom()
            }
        }
    }
}

fn parameter_count(method: &Method) -> u16 {
    method
        .body
        .as_ref()
        .map_or(0, |body| body.parameter_count)
}

/// The context-insensitive seed: every parameter is non-constant.
fn default_context(method: &Method) -> Context {
    vec![AbstractValue::NonConstant; usize::from(parameter_count(method))]
}

/// The context of a specific call site: the argument values, padded with
/// `NonConstant` when the site passes fewer arguments than declared.
fn context_of(method: &Method, args: &[AbstractValue]) -> Context {
    (0..usize::from(parameter_count(method)))
        .map(|slot| args.get(slot).copied().unwrap_or(AbstractValue::NonConstant))
        .collect()
}
