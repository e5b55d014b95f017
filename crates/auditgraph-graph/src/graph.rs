use auditgraph_core::{NodeId, ReducerKind, RunState, StateField, StateSchema};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::{GraphError, GraphNode, RoutingError};

/// The two downstream sets a conditional edge chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Continue into the evaluation fan-out.
    Evaluate,
    /// Jump straight to finalization.
    Finalize,
}

impl Route {
    pub const ALL: [Route; 2] = [Route::Evaluate, Route::Finalize];
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Evaluate => f.write_str("evaluate"),
            Route::Finalize => f.write_str("finalize"),
        }
    }
}

/// Pure predicate over committed state. It must not block or read anything
/// that has not been committed yet.
pub type RoutePredicate = Arc<dyn Fn(&RunState) -> Result<Route, RoutingError> + Send + Sync>;

#[derive(Clone)]
pub struct ConditionalEdge {
    pub from: NodeId,
    pub predicate: RoutePredicate,
    pub alternatives: BTreeMap<Route, Vec<NodeId>>,
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("alternatives", &self.alternatives)
            .finish_non_exhaustive()
    }
}

/// An incoming edge as the scheduler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Static(NodeId),
    Conditional { from: NodeId, route: Route },
}

impl Incoming {
    pub fn source(&self) -> NodeId {
        match self {
            Incoming::Static(from) | Incoming::Conditional { from, .. } => *from,
        }
    }
}

#[derive(Clone)]
pub(crate) struct NodeEntry {
    pub(crate) node: Arc<dyn GraphNode>,
    pub(crate) writes: Vec<StateField>,
}

/// Collects nodes and edges; `build` validates the whole definition at once.
pub struct GraphBuilder {
    schema: StateSchema,
    nodes: BTreeMap<NodeId, NodeEntry>,
    edges: Vec<(NodeId, NodeId)>,
    barriers: BTreeSet<NodeId>,
    conditionals: Vec<ConditionalEdge>,
    finish: Option<NodeId>,
    errors: Vec<GraphError>,
}

impl GraphBuilder {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            barriers: BTreeSet::new(),
            conditionals: Vec::new(),
            finish: None,
            errors: Vec::new(),
        }
    }

    pub fn add_node(mut self, id: NodeId, node: Arc<dyn GraphNode>) -> Self {
        if self.nodes.contains_key(&id) {
            self.errors.push(GraphError::DuplicateNode(id));
            return self;
        }
        let mut writes = node.writes().to_vec();
        if !writes.contains(&StateField::Degraded) {
            writes.push(StateField::Degraded);
        }
        self.nodes.insert(id, NodeEntry { node, writes });
        self
    }

    pub fn add_edge(mut self, from: NodeId, to: NodeId) -> Self {
        self.edges.push((from, to));
        self
    }

    /// Make `id` a barrier over `predecessors`: it becomes eligible only once
    /// every one of them has committed.
    pub fn add_barrier(
        mut self,
        id: NodeId,
        predecessors: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        self.barriers.insert(id);
        for from in predecessors {
            self.edges.push((from, id));
        }
        self
    }

    pub fn add_conditional_edges(
        mut self,
        from: NodeId,
        predicate: RoutePredicate,
        alternatives: impl IntoIterator<Item = (Route, Vec<NodeId>)>,
    ) -> Self {
        self.conditionals.push(ConditionalEdge {
            from,
            predicate,
            alternatives: alternatives.into_iter().collect(),
        });
        self
    }

    pub fn set_finish(mut self, id: NodeId) -> Self {
        self.finish = Some(id);
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let mut incoming: BTreeMap<NodeId, Vec<Incoming>> =
            self.nodes.keys().map(|id| (*id, Vec::new())).collect();
        let mut outgoing: BTreeMap<NodeId, BTreeSet<NodeId>> =
            self.nodes.keys().map(|id| (*id, BTreeSet::new())).collect();

        for (from, to) in &self.edges {
            if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
                return Err(GraphError::DanglingEdge {
                    from: *from,
                    to: *to,
                });
            }
            push_unique(incoming.entry(*to).or_default(), Incoming::Static(*from));
            outgoing.entry(*from).or_default().insert(*to);
        }

        let mut conditionals = BTreeMap::new();
        for edge in self.conditionals {
            if conditionals.contains_key(&edge.from) {
                return Err(GraphError::DuplicateConditional(edge.from));
            }
            for route in Route::ALL {
                let targets = edge.alternatives.get(&route).filter(|t| !t.is_empty());
                let Some(targets) = targets else {
                    return Err(GraphError::MissingAlternative {
                        from: edge.from,
                        route,
                    });
                };
                for to in targets {
                    if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(to) {
                        return Err(GraphError::DanglingEdge {
                            from: edge.from,
                            to: *to,
                        });
                    }
                    push_unique(
                        incoming.entry(*to).or_default(),
                        Incoming::Conditional {
                            from: edge.from,
                            route,
                        },
                    );
                    outgoing.entry(edge.from).or_default().insert(*to);
                }
            }
            conditionals.insert(edge.from, edge);
        }

        for barrier in &self.barriers {
            match incoming.get(barrier) {
                None => {
                    return Err(GraphError::DanglingEdge {
                        from: *barrier,
                        to: *barrier,
                    })
                }
                Some(preds) if preds.is_empty() => return Err(GraphError::EmptyBarrier(*barrier)),
                Some(_) => {}
            }
        }

        let mut once_writers: BTreeMap<StateField, Vec<NodeId>> = BTreeMap::new();
        for (id, entry) in &self.nodes {
            for field in &entry.writes {
                let Some(kind) = self.schema.reducer(*field) else {
                    return Err(GraphError::UndeclaredReducer {
                        node: *id,
                        field: *field,
                    });
                };
                if kind == ReducerKind::OverwriteOnce {
                    once_writers.entry(*field).or_default().push(*id);
                }
            }
        }
        if let Some((field, writers)) = once_writers.into_iter().find(|(_, w)| w.len() > 1) {
            return Err(GraphError::DuplicateWriter { field, writers });
        }

        let order = topological_order(&incoming, &outgoing)?;

        let finish = self.finish.ok_or(GraphError::MissingFinish)?;
        if !self.nodes.contains_key(&finish) {
            return Err(GraphError::DanglingEdge {
                from: finish,
                to: finish,
            });
        }
        Ok(Graph {
            schema: self.schema,
            nodes: self.nodes,
            incoming,
            barriers: self.barriers,
            conditionals,
            order,
            finish,
        })
    }
}

fn push_unique(list: &mut Vec<Incoming>, edge: Incoming) {
    if !list.contains(&edge) {
        list.push(edge);
    }
}

/// Kahn's algorithm; nodes left over once no zero in-degree node remains form a cycle.
fn topological_order(
    incoming: &BTreeMap<NodeId, Vec<Incoming>>,
    outgoing: &BTreeMap<NodeId, BTreeSet<NodeId>>,
) -> Result<Vec<NodeId>, GraphError> {
    let mut in_degree: BTreeMap<NodeId, usize> = incoming
        .iter()
        .map(|(id, preds)| {
            let sources: BTreeSet<NodeId> = preds.iter().map(Incoming::source).collect();
            (*id, sources.len())
        })
        .collect();
    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(id) = queue.pop_front() {
        order.push(id);
        for next in outgoing.get(&id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(id, _)| !order.contains(id))
            .map(|(id, _)| id)
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

/// A validated, immutable graph definition.
pub struct Graph {
    schema: StateSchema,
    nodes: BTreeMap<NodeId, NodeEntry>,
    incoming: BTreeMap<NodeId, Vec<Incoming>>,
    barriers: BTreeSet<NodeId>,
    conditionals: BTreeMap<NodeId, ConditionalEdge>,
    order: Vec<NodeId>,
    finish: NodeId,
}

impl Graph {
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn incoming(&self, id: NodeId) -> &[Incoming] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_barrier(&self, id: NodeId) -> bool {
        self.barriers.contains(&id)
    }

    pub fn conditional_from(&self, id: NodeId) -> Option<&ConditionalEdge> {
        self.conditionals.get(&id)
    }

    /// A topological order of the nodes, used for deterministic iteration.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn finish(&self) -> NodeId {
        self.finish
    }

    pub(crate) fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("order", &self.order)
            .field("barriers", &self.barriers)
            .field("conditionals", &self.conditionals)
            .field("finish", &self.finish)
            .finish()
    }
}
