//! Graph assembly and execution
//!
//! A minimal in-process execution engine. Flows register nodes and edges on a
//! [`GraphBuilder`], compile it once against a [`Checkpointer`], and drive the
//! resulting [`CompiledGraph`] through `invoke`, `resume` and `get_state`.
//!
//! State is checkpointed after every node. A node that suspends for user
//! input leaves a pending interrupt behind; resuming re-executes that node
//! from its start.

pub mod checkpoint;
pub mod executor;
pub mod node;

pub use checkpoint::{Checkpoint, Checkpointer, MemoryCheckpointer, PendingInterrupt};
pub use executor::{CompiledGraph, GraphOutcome, Snapshot};
pub use node::{NodeFn, NodeFuture, NodeParams, StateHandle};

use crate::state_machine::ChatbotState;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Terminal marker. Routing here completes the conversation cycle.
pub const END: &str = "__end__";
/// Reserved name of the implicit start node
pub const START: &str = "__start__";

/// Conditional routing function evaluated after its source node completes
pub type RouteFn = Arc<dyn Fn(&ChatbotState) -> String + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Edge {
    Static(String),
    Conditional(RouteFn),
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Static(to) => f.debug_tuple("Static").field(to).finish(),
            Edge::Conditional(_) => f.write_str("Conditional(..)"),
        }
    }
}

// ============================================================================
// Compile errors
// ============================================================================

/// A single problem found while assembling a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphProblem {
    #[error("node '{0}' is registered more than once")]
    DuplicateNode(String),
    #[error("node name '{0}' is reserved")]
    ReservedName(String),
    #[error("node '{0}' has more than one outgoing edge")]
    DuplicateEdge(String),
    #[error("edge starts at unknown node '{0}'")]
    UnknownEdgeSource(String),
    #[error("edge from '{from}' points to unknown node '{to}'")]
    UnknownEdgeTarget { from: String, to: String },
    #[error("graph has no nodes")]
    NoNodes,
    #[error("no entry point; call create_entry_point")]
    MissingEntryPoint,
    #[error("entry point '{0}' is not a registered node")]
    UnknownEntryPoint(String),
    #[error("entry point already set to '{previous}', refusing '{requested}'")]
    EntryPointRedefined { previous: String, requested: String },
}

/// Every problem found while compiling a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_problems(.problems))]
pub struct CompileError {
    pub problems: Vec<GraphProblem>,
}

impl CompileError {
    pub fn contains(&self, problem: &GraphProblem) -> bool {
        self.problems.contains(problem)
    }
}

fn join_problems(problems: &[GraphProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Builder
// ============================================================================

/// Collects nodes and transitions of a flow.
///
/// Builder calls never fail; problems are collected and reported together by
/// [`GraphBuilder::compile`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<String, NodeFn>,
    edges: HashMap<String, Edge>,
    entry_point: Option<String>,
    problems: Vec<GraphProblem>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` under `name`. Names must be unique within the graph.
    pub fn add_node(&mut self, name: impl Into<String>, node: NodeFn) -> &mut Self {
        let name = name.into();
        if is_reserved(&name) {
            self.problems.push(GraphProblem::ReservedName(name));
        } else if self.nodes.contains_key(&name) {
            self.problems.push(GraphProblem::DuplicateNode(name));
        } else {
            self.nodes.insert(name, node);
        }
        self
    }

    /// Static transition; `to` may be [`END`]
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.insert_edge(from.into(), Edge::Static(to.into()));
        self
    }

    /// Transition decided by `route` once `from` completes
    pub fn add_conditional_edge<F>(&mut self, from: impl Into<String>, route: F) -> &mut Self
    where
        F: Fn(&ChatbotState) -> String + Send + Sync + 'static,
    {
        self.insert_edge(from.into(), Edge::Conditional(Arc::new(route)));
        self
    }

    /// Mark the node every conversation cycle starts at. May be called once.
    pub fn create_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        let requested = name.into();
        match &self.entry_point {
            Some(previous) => self.problems.push(GraphProblem::EntryPointRedefined {
                previous: previous.clone(),
                requested,
            }),
            None => self.entry_point = Some(requested),
        }
        self
    }

    fn insert_edge(&mut self, from: String, edge: Edge) {
        if self.edges.contains_key(&from) {
            self.problems.push(GraphProblem::DuplicateEdge(from));
        } else {
            self.edges.insert(from, edge);
        }
    }

    /// Validate the graph and bind it to a checkpoint backend
    pub fn compile(
        self,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Result<CompiledGraph, CompileError> {
        let mut problems = self.problems;

        if self.nodes.is_empty() {
            problems.push(GraphProblem::NoNodes);
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                problems.push(GraphProblem::UnknownEdgeSource(from.clone()));
            }
            if let Edge::Static(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    problems.push(GraphProblem::UnknownEdgeTarget {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        match &self.entry_point {
            None => problems.push(GraphProblem::MissingEntryPoint),
            Some(entry) if !self.nodes.contains_key(entry) => {
                problems.push(GraphProblem::UnknownEntryPoint(entry.clone()));
            }
            Some(_) => {}
        }

        match self.entry_point {
            Some(entry_point) if problems.is_empty() => Ok(CompiledGraph::new(
                self.nodes,
                self.edges,
                entry_point,
                checkpointer,
            )),
            _ => Err(CompileError { problems }),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    name == END || name == START
}
