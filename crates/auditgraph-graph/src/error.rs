use auditgraph_core::{CallError, NodeId, StateError, StateField};
use thiserror::Error;

use crate::Route;

/// Construction-time failures. A graph that fails any of these never runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node `{0}` added twice")]
    DuplicateNode(NodeId),

    #[error("edge `{from}` -> `{to}` references a node that was never added")]
    DanglingEdge { from: NodeId, to: NodeId },

    #[error("cycle detected among nodes {0:?}")]
    Cycle(Vec<NodeId>),

    #[error("node `{node}` writes `{field}` but no reducer is registered for it")]
    UndeclaredReducer { node: NodeId, field: StateField },

    #[error("single-writer field `{field}` has several writers: {writers:?}")]
    DuplicateWriter {
        field: StateField,
        writers: Vec<NodeId>,
    },

    #[error("conditional edge from `{from}` is missing the `{route}` alternative")]
    MissingAlternative { from: NodeId, route: Route },

    #[error("node `{0}` has more than one conditional edge")]
    DuplicateConditional(NodeId),

    #[error("barrier `{0}` has no fan-in predecessors")]
    EmptyBarrier(NodeId),

    #[error("no finalization node declared")]
    MissingFinish,
}

/// A routing predicate could not evaluate the state it depends on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("required field `{0}` has not been committed")]
    MissingField(StateField),

    #[error("routing predicate failed: {0}")]
    Invalid(String),
}

/// Node-level failure marker. The scheduler turns it into a degraded commit.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("node failed: {0}")]
    Failed(String),

    #[error("node panicked")]
    Panicked,
}

/// Fatal run failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("graph construction failed: {0}")]
    Graph(#[from] GraphError),

    #[error("commit from `{node}` rejected: {source}")]
    Commit {
        node: NodeId,
        #[source]
        source: StateError,
    },

    #[error("routing after `{node}` failed: {source}")]
    Routing {
        node: NodeId,
        #[source]
        source: RoutingError,
    },

    #[error("barrier `{node}` cannot release: predecessors {missing:?} were skipped")]
    BarrierIncomplete { node: NodeId, missing: Vec<NodeId> },

    #[error("finalization node `{0}` was never reached")]
    FinishNotReached(NodeId),
}
