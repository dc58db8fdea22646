//! APIs for the constant propagation analyses.
//!
//! The engine determines, for each program point, whether a local
//! variable, a static field, or an array element holds a single known
//! integer constant or must be treated as variable. See
//! [`ConstantPropagation`] for the entry point and
//! [`AnalysisResults`] for the query surface.

use crate::program::call_graph::InvalidCallGraph;
use crate::program::{MethodRef, ProgramCounter};

pub mod fixed_point;
mod interprocedural;
mod intraprocedural;
pub mod lattice;
pub mod results;
pub mod state;
mod transfer;

pub use interprocedural::ConstantPropagation;
pub use lattice::AbstractValue;
pub use results::{AnalysisResults, QueryError, QueryKey};

/// An error aborting an analysis run.
///
/// Unsupported constructs are *not* errors: the transfer functions recover
/// from them locally by treating the affected bindings as non-constant.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The supplied call graph does not match the program.
    #[error(transparent)]
    MalformedCallGraph(#[from] InvalidCallGraph),
    /// An entry point does not name a method of the program.
    #[error("The entry point {method} is not part of the program")]
    UnknownEntryPoint {
        /// The offending entry point.
        method: MethodRef,
    },
    /// Control falls through the end of a method body.
    #[error("Malformed body in {method}: no instruction follows {pc}")]
    MalformedBody {
        /// The method with the malformed body.
        method: MethodRef,
        /// The last program counter control reached.
        pc: ProgramCounter,
    },
}
