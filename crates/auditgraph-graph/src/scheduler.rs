use auditgraph_core::{NodeId, RunState, StateStore};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{Graph, Incoming, NodeContext, NodeError, Route, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Committed,
    /// Failed and committed its degraded fragment instead.
    Degraded,
    /// Every incoming edge was resolved without selecting this node.
    Skipped,
    /// Running when the run was cancelled; nothing was committed.
    Aborted,
}

impl NodeStatus {
    fn is_resolved(self) -> bool {
        matches!(
            self,
            NodeStatus::Committed | NodeStatus::Degraded | NodeStatus::Skipped
        )
    }

    fn has_committed(self) -> bool {
        matches!(self, NodeStatus::Committed | NodeStatus::Degraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Cancelled before finalization; the state holds every fragment committed so far.
    Cancelled,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub state: RunState,
    pub nodes: BTreeMap<NodeId, NodeStatus>,
    pub commit_order: Vec<NodeId>,
    pub routes: BTreeMap<NodeId, Route>,
}

impl RunOutcome {
    pub fn status_of(&self, id: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&id).copied()
    }
}

type TaskOutput = (NodeId, Result<auditgraph_core::StateFragment, NodeError>, Duration);

/// Executes a validated graph: every node once, as soon as its predecessors
/// have resolved, with all eligible nodes running concurrently.
///
/// Node bodies run on the tokio runtime; their results flow back to this loop,
/// which is the only place the state store is mutated.
pub struct GraphScheduler {
    graph: Arc<Graph>,
}

impl GraphScheduler {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub async fn run(
        &self,
        initial: RunState,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run_inner(run_id, initial, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        initial: RunState,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let graph = &self.graph;
        let mut store = StateStore::new(graph.schema().clone(), initial);
        let mut nodes: BTreeMap<NodeId, NodeStatus> = graph
            .node_ids()
            .map(|id| (id, NodeStatus::Pending))
            .collect();
        let mut routes: BTreeMap<NodeId, Route> = BTreeMap::new();
        let mut commit_order = Vec::new();
        let mut tasks: HashMap<tokio::task::Id, NodeId> = HashMap::new();
        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
        let mut cancelled = false;

        info!(nodes = nodes.len(), "run started");

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            for id in self.eligible(&mut nodes, &routes)? {
                let entry = match graph.entry(id) {
                    Some(entry) => entry,
                    None => continue,
                };
                let node = Arc::clone(&entry.node);
                let ctx = NodeContext {
                    id,
                    snapshot: store.snapshot(),
                    cancel: cancel.child_token(),
                };
                debug!(node = %id, "node started");
                let handle = join_set.spawn(
                    async move {
                        let started = Instant::now();
                        let result = node.execute(ctx).await;
                        (id, result, started.elapsed())
                    }
                    .instrument(info_span!("node", node = %id)),
                );
                tasks.insert(handle.id(), id);
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = join_set.join_next_with_id() => joined,
            };

            let (id, result) = match joined {
                Some(Ok((task_id, (id, result, elapsed)))) => {
                    tasks.remove(&task_id);
                    histogram!("auditgraph_node_duration_seconds").record(elapsed);
                    (id, result)
                }
                Some(Err(join_error)) => match tasks.remove(&join_error.id()) {
                    Some(id) => (id, Err(NodeError::Panicked)),
                    None => continue,
                },
                None => break,
            };

            let entry = match graph.entry(id) {
                Some(entry) => entry,
                None => continue,
            };
            let status = match result {
                Ok(fragment) => {
                    store
                        .commit(id, &entry.writes, fragment)
                        .map_err(|source| RunError::Commit { node: id, source })?;
                    counter!("auditgraph_nodes_committed").increment(1);
                    info!(node = %id, "node committed");
                    NodeStatus::Committed
                }
                Err(error) => {
                    warn!(node = %id, %error, "node failed, committing degraded fragment");
                    let fragment = entry.node.degraded(id, &error);
                    store
                        .commit(id, &entry.writes, fragment)
                        .map_err(|source| RunError::Commit { node: id, source })?;
                    counter!("auditgraph_nodes_degraded").increment(1);
                    NodeStatus::Degraded
                }
            };
            nodes.insert(id, status);
            commit_order.push(id);

            if let Some(edge) = graph.conditional_from(id) {
                let snapshot = store.snapshot();
                let route = (edge.predicate)(&snapshot)
                    .map_err(|source| RunError::Routing { node: id, source })?;
                info!(node = %id, %route, "routing decision");
                routes.insert(id, route);
            }
        }

        if cancelled {
            join_set.shutdown().await;
            for status in nodes.values_mut() {
                if *status == NodeStatus::Running {
                    *status = NodeStatus::Aborted;
                }
            }
            warn!(
                committed = commit_order.len(),
                "run cancelled, keeping committed fragments"
            );
            return Ok(RunOutcome {
                run_id,
                status: RunStatus::Cancelled,
                state: store.into_state(),
                nodes,
                commit_order,
                routes,
            });
        }

        let finish = graph.finish();
        if !nodes.get(&finish).is_some_and(|s| s.has_committed()) {
            return Err(RunError::FinishNotReached(finish));
        }

        info!(commits = store.commits(), "run completed");
        Ok(RunOutcome {
            run_id,
            status: RunStatus::Completed,
            state: store.into_state(),
            nodes,
            commit_order,
            routes,
        })
    }

    /// Resolve pending nodes against the current statuses: mark the ones that can
    /// no longer be selected as skipped and return the ones ready to start, marked
    /// running. Repeats until nothing changes since a skip can unblock successors.
    fn eligible(
        &self,
        nodes: &mut BTreeMap<NodeId, NodeStatus>,
        routes: &BTreeMap<NodeId, Route>,
    ) -> Result<Vec<NodeId>, RunError> {
        let mut ready = Vec::new();
        loop {
            let mut changed = false;
            for &id in self.graph.topological_order() {
                if nodes.get(&id) != Some(&NodeStatus::Pending) {
                    continue;
                }
                let incoming = self.graph.incoming(id);
                let resolved = incoming.iter().all(|edge| {
                    nodes
                        .get(&edge.source())
                        .is_some_and(|status| status.is_resolved())
                });
                if !resolved {
                    continue;
                }

                let live: Vec<bool> = incoming
                    .iter()
                    .map(|edge| is_live(edge, nodes, routes))
                    .collect();
                let next = if incoming.is_empty() {
                    NodeStatus::Running
                } else if self.graph.is_barrier(id) {
                    if live.iter().all(|l| *l) {
                        NodeStatus::Running
                    } else if live.iter().any(|l| *l) {
                        let missing = incoming
                            .iter()
                            .zip(&live)
                            .filter(|(_, l)| !**l)
                            .map(|(edge, _)| edge.source())
                            .collect();
                        return Err(RunError::BarrierIncomplete { node: id, missing });
                    } else {
                        NodeStatus::Skipped
                    }
                } else if live.iter().any(|l| *l) {
                    NodeStatus::Running
                } else {
                    NodeStatus::Skipped
                };

                if next == NodeStatus::Skipped {
                    debug!(node = %id, "node skipped");
                } else {
                    ready.push(id);
                }
                nodes.insert(id, next);
                changed = true;
            }
            if !changed {
                return Ok(ready);
            }
        }
    }
}

fn is_live(
    edge: &Incoming,
    nodes: &BTreeMap<NodeId, NodeStatus>,
    routes: &BTreeMap<NodeId, Route>,
) -> bool {
    let committed = nodes
        .get(&edge.source())
        .is_some_and(|status| status.has_committed());
    match edge {
        Incoming::Static(_) => committed,
        Incoming::Conditional { from, route } => committed && routes.get(from) == Some(route),
    }
}
