//! The call graph consumed by the interprocedural analysis.
//!
//! Building the graph (including virtual call resolution) is a collaborator
//! concern; the analysis only validates it against the program and collapses
//! recursive cycles into strongly connected components.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use super::{MethodRef, Program};

/// A call graph over the methods of a [`Program`].
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: BTreeMap<MethodRef, BTreeSet<MethodRef>>,
}

/// An error indicating that a call graph does not match the program it is
/// supposed to describe.
#[derive(Debug, thiserror::Error)]
#[error("The call graph refers to {method}, which is not part of the program")]
pub struct InvalidCallGraph {
    /// The offending method reference.
    pub method: MethodRef,
}

impl CallGraph {
    /// Creates a call graph from an iterator of caller-callee pairs.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (MethodRef, MethodRef)>,
    {
        let mut result = Self::default();
        for (caller, callee) in edges {
            result.add_edge(caller, callee);
        }
        result
    }

    /// Adds a call edge.
    pub fn add_edge(&mut self, caller: MethodRef, callee: MethodRef) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    /// Iterates over the recorded callees of a method.
    pub fn callees(&self, caller: &MethodRef) -> impl Iterator<Item = &MethodRef> {
        self.edges.get(caller).into_iter().flatten()
    }

    /// Checks that every endpoint of the graph names a method of `program`.
    ///
    /// # Errors
    /// See [`InvalidCallGraph`].
    pub fn validate(&self, program: &Program) -> Result<(), InvalidCallGraph> {
        self.edges
            .iter()
            .flat_map(|(caller, callees)| std::iter::once(caller).chain(callees))
            .find(|method| !program.methods.contains_key(method))
            .map_or(Ok(()), |method| {
                Err(InvalidCallGraph {
                    method: method.clone(),
                })
            })
    }

    /// Collapses the graph into strongly connected components.
    ///
    /// Every method of `program` is assigned a component id; methods absent
    /// from any call edge form singleton components. Mutually recursive
    /// methods share an id, so the interprocedural propagator can analyze
    /// them as one fixed-point unit.
    #[must_use]
    pub fn scc_membership(&self, program: &Program) -> HashMap<MethodRef, usize> {
        let mut graph = DiGraph::<&MethodRef, ()>::new();
        let indices: HashMap<_, _> = program
            .methods
            .keys()
            .map(|method| (method, graph.add_node(method)))
            .collect();
        for (caller, callees) in &self.edges {
            let Some(&from) = indices.get(caller) else {
                continue;
            };
            for callee in callees {
                if let Some(&to) = indices.get(callee) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        tarjan_scc(&graph)
            .into_iter()
            .enumerate()
            .flat_map(|(scc_id, members)| {
                members
                    .into_iter()
                    .map(move |node| (scc_id, node))
            })
            .map(|(scc_id, node)| (graph[node].clone(), scc_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Method;

    fn method(name: &str) -> MethodRef {
        MethodRef::new("Example", name)
    }

    fn program_with_methods(names: &[&str]) -> Program {
        Program {
            methods: names
                .iter()
                .map(|name| (method(name), Method {
                    access_flags: Default::default(),
                    body: None,
                }))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn validation_rejects_unknown_methods() {
        let program = program_with_methods(&["a"]);
        let graph = CallGraph::from_edges([(method("a"), method("b"))]);
        let err = graph.validate(&program).unwrap_err();
        assert_eq!(err.method, method("b"));
    }

    #[test]
    fn recursive_methods_share_a_component() {
        let program = program_with_methods(&["a", "b", "c"]);
        let graph = CallGraph::from_edges([
            (method("a"), method("b")),
            (method("b"), method("a")),
            (method("a"), method("c")),
        ]);
        let sccs = graph.scc_membership(&program);
        assert_eq!(sccs[&method("a")], sccs[&method("b")]);
        assert_ne!(sccs[&method("a")], sccs[&method("c")]);
    }

    #[test]
    fn self_recursion_is_a_singleton_component() {
        let program = program_with_methods(&["a", "b"]);
        let graph = CallGraph::from_edges([(method("a"), method("a"))]);
        let sccs = graph.scc_membership(&program);
        assert_ne!(sccs[&method("a")], sccs[&method("b")]);
    }
}
